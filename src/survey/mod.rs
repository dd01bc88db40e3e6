//! Camp survey decoding and cross-round reconciliation.

pub mod reconcile;
pub mod schema;

pub use reconcile::{LoadedRound, Reconciliation, reconcile_camps, select_rounds};
pub use schema::{SchemaVariant, SiteRow, extract_site_rows};
