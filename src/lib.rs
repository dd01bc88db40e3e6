pub mod classifier;
pub mod config;
pub mod dates;
pub mod error;
pub mod fetch;
pub mod output;
pub mod parser;
pub mod pipeline;
pub mod publish;
pub mod routes;
pub mod stats;
pub mod survey;
pub mod timeline;
pub mod types;
pub mod validation;
