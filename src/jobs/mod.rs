pub mod runner;
pub mod store;

pub use runner::spawn_report_job;
pub use store::{JobHandle, JobId, JobRecord, JobState, JobStore, JobStoreError, JobSummary};
