pub mod config;
pub mod error;
pub mod graphql;
pub mod jobs;
pub mod output;
pub mod pipeline;
pub mod report;
pub mod server;
pub mod types;

pub use error::AuditError;
