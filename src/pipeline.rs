use std::time::Duration;

use serde::Serialize;
use tracing::{info, warn};

use crate::error::AuditError;
use crate::graphql::audit::fetch_audit_events;
use crate::graphql::paginate::{fetch_all_pages, PageLimits, CONDITIONS_PATH, POLICIES_PATH};
use crate::graphql::{GraphqlTransport, CONDITIONS_QUERY, POLICIES_QUERY};
use crate::output::csv::{alerts_to_csv, audit_to_csv};
use crate::report::{correlate, filter_conditions_by_date, ConsoleLinks, DateRange, PolicyUpdateMode};
use crate::types::{AlertReportRow, Condition, Policy, ReportCounts};

/// Receives free-text progress updates while a report runs.
pub trait ProgressSink: Send + Sync {
    fn progress(&self, message: &str);
}

pub struct LogProgress;

impl ProgressSink for LogProgress {
    fn progress(&self, message: &str) {
        info!("{message}");
    }
}

#[derive(Debug, Clone)]
pub struct FetchSettings {
    pub page_timeout: Duration,
    pub audit_timeout: Duration,
    pub max_pages: usize,
    pub console_url: String,
    pub policy_update_mode: PolicyUpdateMode,
}

impl Default for FetchSettings {
    fn default() -> Self {
        Self {
            page_timeout: Duration::from_secs(15),
            audit_timeout: Duration::from_secs(30),
            max_pages: 1000,
            console_url: "https://one.newrelic.com".to_string(),
            policy_update_mode: PolicyUpdateMode::PolicyMax,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReportRequest {
    pub account_id: i64,
    pub range: DateRange,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct ReportOutput {
    pub counts: ReportCounts,
    pub rows: Vec<AlertReportRow>,
    pub audit_events: usize,
    /// Set when the audit stage failed; the audit table is then absent.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub audit_error: Option<String>,
    #[serde(skip)]
    pub alerts_csv: Option<String>,
    #[serde(skip)]
    pub audit_csv: Option<String>,
}

/// Fetches policies, then conditions, then audit events, strictly in that
/// order. A policy or condition fetch failure aborts the run; an audit
/// failure only leaves the audit table absent.
pub async fn run_report(
    transport: &dyn GraphqlTransport,
    settings: &FetchSettings,
    request: &ReportRequest,
    progress: &dyn ProgressSink,
) -> Result<ReportOutput, AuditError> {
    let limits = PageLimits {
        timeout: settings.page_timeout,
        max_pages: settings.max_pages,
    };

    progress.progress("Fetching policies...");
    let policies: Vec<Policy> = fetch_all_pages(
        transport,
        POLICIES_QUERY,
        &POLICIES_PATH,
        request.account_id,
        limits,
    )
    .await?;

    progress.progress("Fetching NRQL conditions...");
    let conditions: Vec<Condition> = fetch_all_pages(
        transport,
        CONDITIONS_QUERY,
        &CONDITIONS_PATH,
        request.account_id,
        limits,
    )
    .await?;
    info!(
        policies = policies.len(),
        conditions = conditions.len(),
        "fetched alert configuration"
    );

    progress.progress(&format!(
        "Filtering {} conditions by date...",
        conditions.len()
    ));
    let changed = match filter_conditions_by_date(&conditions, &request.range) {
        Ok(changed) => changed,
        Err(error) => {
            warn!("{error}; no conditions will be reported");
            Vec::new()
        }
    };

    let links = ConsoleLinks {
        base_url: settings.console_url.clone(),
        account_id: request.account_id,
    };
    let report = correlate(
        &policies,
        &conditions,
        &changed,
        settings.policy_update_mode,
        &links,
    );
    let alerts_csv = alerts_to_csv(&report.rows)
        .map_err(|e| AuditError::fetch(format!("failed rendering alert table: {e}")))?;

    progress.progress("Fetching alert-related audit events...");
    let (audit_events, audit_csv, audit_error) = match fetch_audit_events(
        transport,
        request.account_id,
        &request.range,
        settings.audit_timeout,
    )
    .await
    {
        Ok(events) => {
            let csv = audit_to_csv(&events)
                .map_err(|e| AuditError::fetch(format!("failed rendering audit table: {e}")))?;
            (events.len(), csv, None)
        }
        Err(error) => {
            warn!("audit stage failed: {error}");
            progress.progress(&format!("Audit events unavailable: {error}"));
            (0, None, Some(error.to_string()))
        }
    };

    Ok(ReportOutput {
        counts: ReportCounts {
            policies_fetched: policies.len(),
            conditions_fetched: conditions.len(),
            policies_changed: report.policies_changed,
            conditions_changed: report.conditions_changed,
        },
        rows: report.rows,
        audit_events,
        audit_error,
        alerts_csv,
        audit_csv,
    })
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use chrono::{Local, NaiveDate, TimeZone};
    use serde_json::json;

    use super::*;
    use crate::graphql::testing::{conditions_page, nrql_results, policies_page, ScriptedTransport};

    #[derive(Default)]
    struct RecordingProgress(Mutex<Vec<String>>);

    impl ProgressSink for RecordingProgress {
        fn progress(&self, message: &str) {
            self.0
                .lock()
                .expect("progress mutex poisoned")
                .push(message.to_string());
        }
    }

    fn local_midnight_ms(y: i32, m: u32, d: u32) -> i64 {
        let naive = NaiveDate::from_ymd_opt(y, m, d)
            .and_then(|date| date.and_hms_opt(0, 0, 0))
            .expect("valid date");
        Local
            .from_local_datetime(&naive)
            .earliest()
            .expect("representable locally")
            .timestamp_millis()
    }

    fn june_request() -> ReportRequest {
        ReportRequest {
            account_id: 99,
            range: DateRange {
                start: "2024-06-01".to_string(),
                end: "2024-06-30".to_string(),
            },
        }
    }

    #[tokio::test]
    async fn end_to_end_single_condition() {
        let updated = local_midnight_ms(2024, 6, 15);
        let transport = ScriptedTransport::new(vec![
            Ok(policies_page(json!([{ "id": 1, "name": "P1" }]), None)),
            Ok(conditions_page(
                json!([{ "id": 10, "policyId": 1, "name": "C1", "updatedAt": updated }]),
                None,
            )),
            Ok(nrql_results(json!([]))),
        ]);
        let progress = RecordingProgress::default();

        let output = run_report(&transport, &FetchSettings::default(), &june_request(), &progress)
            .await
            .expect("pipeline succeeds");

        assert_eq!(output.rows.len(), 1);
        let row = &output.rows[0];
        assert_eq!(row.condition_last_update, Some(updated));
        assert_eq!(row.policy_last_update, Some(updated));
        assert!(row.policy_url.contains("policy/1"));
        assert!(row.condition_url.contains("condition/10"));

        let csv = output.alerts_csv.expect("alert table");
        assert!(csv.contains("C1,10,P1,1,2024-06-15 00:00:00,2024-06-15 00:00:00,"));
        assert_eq!(output.audit_csv, None);
        assert_eq!(output.audit_error, None);
        assert_eq!(
            output.counts,
            ReportCounts {
                policies_fetched: 1,
                conditions_fetched: 1,
                policies_changed: 1,
                conditions_changed: 1,
            }
        );
        assert_eq!(transport.request_count(), 3);

        let messages = progress.0.lock().expect("progress mutex poisoned").clone();
        assert_eq!(messages[0], "Fetching policies...");
        assert_eq!(messages[1], "Fetching NRQL conditions...");
        assert_eq!(messages.last().map(String::as_str), Some("Fetching alert-related audit events..."));
    }

    #[tokio::test]
    async fn policy_fetch_failure_aborts_before_conditions() {
        let transport = ScriptedTransport::new(vec![Err(AuditError::fetch("503"))]);
        let result = run_report(
            &transport,
            &FetchSettings::default(),
            &june_request(),
            &LogProgress,
        )
        .await;
        assert!(matches!(result, Err(AuditError::FetchFailed(_))));
        assert_eq!(transport.request_count(), 1);
    }

    #[tokio::test]
    async fn invalid_range_yields_empty_alert_table_but_continues() {
        let transport = ScriptedTransport::new(vec![
            Ok(policies_page(json!([{ "id": 1, "name": "P1" }]), None)),
            Ok(conditions_page(
                json!([{ "id": 10, "policyId": 1, "name": "C1", "updatedAt": 1 }]),
                None,
            )),
        ]);
        let request = ReportRequest {
            account_id: 99,
            range: DateRange {
                start: "06/01/2024".to_string(),
                end: "2024-06-30".to_string(),
            },
        };
        let output = run_report(&transport, &FetchSettings::default(), &request, &LogProgress)
            .await
            .expect("range errors do not abort");
        assert!(output.alerts_csv.is_none());
        assert_eq!(output.counts.conditions_changed, 0);
        assert_eq!(output.counts.conditions_fetched, 1);
        // The audit query is never sent with an unparseable date.
        assert_eq!(transport.request_count(), 2);
    }

    #[tokio::test]
    async fn audit_failure_keeps_alert_table() {
        let updated = local_midnight_ms(2024, 6, 10);
        let transport = ScriptedTransport::new(vec![
            Ok(policies_page(json!([{ "id": 1, "name": "P1" }]), None)),
            Ok(conditions_page(
                json!([{ "id": 10, "policyId": 1, "name": "C1", "updatedAt": updated }]),
                None,
            )),
            Err(AuditError::fetch("timeout")),
        ]);
        let output = run_report(
            &transport,
            &FetchSettings::default(),
            &june_request(),
            &LogProgress,
        )
        .await
        .expect("audit failure is not fatal");
        assert!(output.alerts_csv.is_some());
        assert!(output.audit_csv.is_none());
        assert_eq!(output.audit_events, 0);
        assert!(output
            .audit_error
            .as_deref()
            .is_some_and(|e| e.contains("timeout")));
    }
}
