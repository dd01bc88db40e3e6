pub mod event_source;
pub mod simulator;
