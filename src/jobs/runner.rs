use std::sync::Arc;

use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use crate::error::AuditError;
use crate::graphql::GraphqlTransport;
use crate::jobs::store::JobHandle;
use crate::pipeline::{run_report, FetchSettings, ReportRequest};

/// Runs one report in the background, publishing progress through `handle`.
/// The task ends as complete, failed (`Error: ...`) or cancelled; a panic in
/// the pipeline is recorded as a failure rather than leaving the job running.
pub fn spawn_report_job(
    handle: JobHandle,
    transport: Arc<dyn GraphqlTransport>,
    settings: FetchSettings,
    request: ReportRequest,
) -> JoinHandle<()> {
    let job_id = handle.id();
    let store = handle.store().clone();

    let worker = tokio::spawn(async move {
        handle.mark_running();
        let outcome = tokio::select! {
            result = run_report(transport.as_ref(), &settings, &request, &handle) => result,
            _ = handle.cancelled() => Err(AuditError::Cancelled),
        };
        match outcome {
            Ok(output) => {
                info!(
                    %job_id,
                    conditions_changed = output.counts.conditions_changed,
                    policies_changed = output.counts.policies_changed,
                    "report job complete"
                );
                handle.complete(output);
            }
            Err(AuditError::Cancelled) => {
                info!(%job_id, "report job cancelled");
                handle.mark_cancelled();
            }
            Err(error) => {
                warn!(%job_id, "report job failed: {error}");
                handle.fail(&error.to_string());
            }
        }
    });

    tokio::spawn(async move {
        if let Err(join_error) = worker.await {
            error!(%job_id, "report worker aborted: {join_error}");
            store.fail_if_unfinished(&job_id, "report worker aborted unexpectedly");
        }
    })
}
