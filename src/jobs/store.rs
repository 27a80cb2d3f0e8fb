use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use serde::Serialize;
use thiserror::Error;
use tokio::sync::watch;
use uuid::Uuid;

use crate::pipeline::{ProgressSink, ReportOutput};
use crate::types::ReportCounts;

pub type JobId = Uuid;

pub const STATUS_COMPLETE: &str = "complete";
pub const STATUS_CANCELLED: &str = "cancelled";

#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum JobState {
    Queued,
    Running,
    Complete,
    Failed,
    Cancelled,
}

impl JobState {
    pub fn is_finished(self) -> bool {
        matches!(self, Self::Complete | Self::Failed | Self::Cancelled)
    }
}

#[derive(Debug, Clone)]
pub struct JobRecord {
    pub id: JobId,
    pub state: JobState,
    /// Free-text progress, `complete`, `cancelled`, or `Error: ...`.
    pub status: String,
    pub counts: ReportCounts,
    pub alerts: Option<String>,
    pub audit: Option<String>,
    /// Why the audit table is missing from an otherwise complete job.
    pub audit_error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
pub struct JobSummary {
    pub id: JobId,
    pub state: JobState,
    pub status: String,
    pub counts: ReportCounts,
    pub has_alerts: bool,
    pub has_audit: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub audit_error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl JobRecord {
    pub fn summary(&self) -> JobSummary {
        JobSummary {
            id: self.id,
            state: self.state,
            status: self.status.clone(),
            counts: self.counts,
            has_alerts: self.alerts.is_some(),
            has_audit: self.audit.is_some(),
            audit_error: self.audit_error.clone(),
            created_at: self.created_at,
            updated_at: self.updated_at,
        }
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum JobStoreError {
    #[error("job store is full ({0} jobs still running)")]
    AtCapacity(usize),
}

struct JobEntry {
    record: JobRecord,
    cancel: watch::Sender<bool>,
    finished_at: Option<Instant>,
}

/// Status records for report jobs, keyed by job id.
///
/// Each job has exactly one writer, the [`JobHandle`] returned by `create`;
/// everyone else reads cloned snapshots. Finished jobs expire `ttl` after
/// they finish, and the store never holds more than `max_jobs` entries.
#[derive(Clone)]
pub struct JobStore {
    inner: Arc<Mutex<HashMap<JobId, JobEntry>>>,
    ttl: Duration,
    max_jobs: usize,
}

impl JobStore {
    pub fn new(ttl: Duration, max_jobs: usize) -> Self {
        Self {
            inner: Arc::new(Mutex::new(HashMap::new())),
            ttl,
            max_jobs: max_jobs.max(1),
        }
    }

    pub fn create(&self) -> Result<JobHandle, JobStoreError> {
        let now = Instant::now();
        let mut jobs = self.lock();
        if jobs.len() >= self.max_jobs {
            evict_expired_locked(&mut jobs, now, self.ttl);
        }
        if jobs.len() >= self.max_jobs {
            let oldest_finished = jobs
                .iter()
                .filter_map(|(id, entry)| entry.finished_at.map(|at| (at, *id)))
                .min()
                .map(|(_, id)| id);
            match oldest_finished {
                Some(id) => {
                    jobs.remove(&id);
                }
                None => return Err(JobStoreError::AtCapacity(jobs.len())),
            }
        }

        let id = Uuid::new_v4();
        let (cancel, cancel_rx) = watch::channel(false);
        let created_at = Utc::now();
        jobs.insert(
            id,
            JobEntry {
                record: JobRecord {
                    id,
                    state: JobState::Queued,
                    status: "Queued".to_string(),
                    counts: ReportCounts::default(),
                    alerts: None,
                    audit: None,
                    audit_error: None,
                    created_at,
                    updated_at: created_at,
                },
                cancel,
                finished_at: None,
            },
        );
        Ok(JobHandle {
            id,
            store: self.clone(),
            cancel_rx,
        })
    }

    pub fn get(&self, id: &JobId) -> Option<JobRecord> {
        self.lock().get(id).map(|entry| entry.record.clone())
    }

    /// Signals a job to stop. Returns false for unknown ids; finished jobs
    /// are left as they are.
    pub fn cancel(&self, id: &JobId) -> bool {
        let jobs = self.lock();
        let Some(entry) = jobs.get(id) else {
            return false;
        };
        if !entry.record.state.is_finished() {
            entry.cancel.send_replace(true);
        }
        true
    }

    pub fn evict_expired(&self) -> usize {
        self.evict_expired_at(Instant::now())
    }

    pub fn evict_expired_at(&self, now: Instant) -> usize {
        evict_expired_locked(&mut self.lock(), now, self.ttl)
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Marks a job failed unless it already reached a terminal state. Used
    /// when the worker task dies without reporting through its handle.
    pub fn fail_if_unfinished(&self, id: &JobId, message: &str) {
        self.finish(id, JobState::Failed, format!("Error: {message}"), None);
    }

    fn update(&self, id: &JobId, apply: impl FnOnce(&mut JobRecord)) {
        if let Some(entry) = self.lock().get_mut(id) {
            if !entry.record.state.is_finished() {
                apply(&mut entry.record);
                entry.record.updated_at = Utc::now();
            }
        }
    }

    fn finish(
        &self,
        id: &JobId,
        state: JobState,
        status: String,
        output: Option<ReportOutput>,
    ) {
        let mut jobs = self.lock();
        let Some(entry) = jobs.get_mut(id) else {
            return;
        };
        if entry.record.state.is_finished() {
            return;
        }
        let record = &mut entry.record;
        record.state = state;
        record.status = status;
        if let Some(output) = output {
            record.counts = output.counts;
            record.alerts = output.alerts_csv;
            record.audit = output.audit_csv;
            record.audit_error = output.audit_error;
        }
        record.updated_at = Utc::now();
        entry.finished_at = Some(Instant::now());
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<JobId, JobEntry>> {
        self.inner.lock().expect("job store mutex poisoned")
    }
}

fn evict_expired_locked(jobs: &mut HashMap<JobId, JobEntry>, now: Instant, ttl: Duration) -> usize {
    let before = jobs.len();
    jobs.retain(|_, entry| match entry.finished_at {
        Some(finished) => now.saturating_duration_since(finished) < ttl,
        None => true,
    });
    before - jobs.len()
}

/// The single writer for one job's record.
pub struct JobHandle {
    id: JobId,
    store: JobStore,
    cancel_rx: watch::Receiver<bool>,
}

impl JobHandle {
    pub fn id(&self) -> JobId {
        self.id
    }

    pub fn store(&self) -> &JobStore {
        &self.store
    }

    pub fn mark_running(&self) {
        self.store.update(&self.id, |record| {
            record.state = JobState::Running;
            record.status = "Starting".to_string();
        });
    }

    pub fn complete(self, output: ReportOutput) {
        self.store.finish(
            &self.id,
            JobState::Complete,
            STATUS_COMPLETE.to_string(),
            Some(output),
        );
    }

    pub fn fail(self, message: &str) {
        self.store
            .finish(&self.id, JobState::Failed, format!("Error: {message}"), None);
    }

    pub fn mark_cancelled(self) {
        self.store.finish(
            &self.id,
            JobState::Cancelled,
            STATUS_CANCELLED.to_string(),
            None,
        );
    }

    /// Resolves once cancellation is requested, or once the store has
    /// dropped the job.
    pub async fn cancelled(&self) {
        let mut rx = self.cancel_rx.clone();
        let _ = rx.wait_for(|cancelled| *cancelled).await;
    }
}

impl ProgressSink for JobHandle {
    fn progress(&self, message: &str) {
        self.store.update(&self.id, |record| {
            record.state = JobState::Running;
            record.status = message.to_string();
        });
    }
}
