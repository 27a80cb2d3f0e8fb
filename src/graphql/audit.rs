use std::time::Duration;

use serde_json::{json, Value};
use tracing::warn;

use crate::error::AuditError;
use crate::graphql::{check_response, GraphqlRequest, GraphqlTransport, NRQL_QUERY};
use crate::report::filter::{parse_day, DateRange, DATE_FORMAT};
use crate::types::AuditEvent;

pub const AUDIT_ACTION_PREFIX: &str = "alerts";
/// NRQL returns at most this many rows when the query has no LIMIT clause.
pub const NRQL_DEFAULT_LIMIT: usize = 100;

pub fn audit_nrql(range: &DateRange) -> Result<String, AuditError> {
    let start = parse_day(&range.start)?.format(DATE_FORMAT);
    let end = parse_day(&range.end)?.format(DATE_FORMAT);
    Ok(format!(
        "FROM NrAuditEvent SELECT * WHERE actionIdentifier LIKE '{AUDIT_ACTION_PREFIX}%' \
         SINCE '{start} 00:00:00' UNTIL '{end} 23:59:59'"
    ))
}

/// Runs a single NRQL read for alert-related audit events in the range.
/// Results are not paginated.
pub async fn fetch_audit_events(
    transport: &dyn GraphqlTransport,
    account_id: i64,
    range: &DateRange,
    timeout: Duration,
) -> Result<Vec<AuditEvent>, AuditError> {
    let request = GraphqlRequest {
        query: NRQL_QUERY,
        variables: json!({ "accountId": account_id, "nrqlQuery": audit_nrql(range)? }),
    };
    let response = transport.execute(&request, timeout).await?;
    let account = check_response(&response, "audit")?;
    let rows = match account.get("nrql").and_then(|n| n.get("results")) {
        Some(Value::Array(rows)) => rows.clone(),
        _ => Vec::new(),
    };
    if rows.len() == NRQL_DEFAULT_LIMIT {
        warn!(
            rows = rows.len(),
            "audit query hit the NRQL default row limit; results may be truncated"
        );
    }

    rows.into_iter()
        .map(|row| {
            serde_json::from_value(row)
                .map_err(|e| AuditError::fetch(format!("malformed audit row: {e}")))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use serde_json::json;

    use super::*;
    use crate::graphql::testing::{nrql_results, ScriptedTransport};

    fn june() -> DateRange {
        DateRange {
            start: "2024-06-01".to_string(),
            end: "2024-06-30".to_string(),
        }
    }

    #[test]
    fn builds_time_bounded_query() {
        let nrql = audit_nrql(&june()).expect("valid range");
        assert!(nrql.contains("actionIdentifier LIKE 'alerts%'"));
        assert!(nrql.contains("SINCE '2024-06-01 00:00:00' UNTIL '2024-06-30 23:59:59'"));
    }

    #[test]
    fn refuses_to_embed_malformed_dates() {
        let range = DateRange {
            start: "2024-06-01' OR 1=1".to_string(),
            end: "2024-06-30".to_string(),
        };
        assert!(matches!(audit_nrql(&range), Err(AuditError::InvalidDateRange(_))));
    }

    #[tokio::test]
    async fn fetches_single_page_of_rows() {
        let transport = ScriptedTransport::new(vec![Ok(nrql_results(json!([
            { "timestamp": 1718409600000i64, "actionIdentifier": "alerts_policy.create" },
            { "timestamp": 1718409601000i64, "actionIdentifier": "alerts_condition.update" }
        ])))]);
        let events = fetch_audit_events(&transport, 7, &june(), Duration::from_secs(30))
            .await
            .expect("fetch succeeds");
        assert_eq!(events.len(), 2);
        assert_eq!(transport.request_count(), 1);
        let (request, timeout) = transport.request(0);
        assert_eq!(timeout, Duration::from_secs(30));
        assert_eq!(request.variables["accountId"], 7);
        assert!(request.variables["nrqlQuery"]
            .as_str()
            .unwrap_or_default()
            .starts_with("FROM NrAuditEvent"));
    }

    #[tokio::test]
    async fn graphql_errors_fail_the_fetch() {
        let transport = ScriptedTransport::new(vec![Ok(json!({
            "errors": [{ "message": "NRQL syntax error" }]
        }))]);
        let result = fetch_audit_events(&transport, 7, &june(), Duration::from_secs(30)).await;
        assert!(matches!(result, Err(AuditError::FetchFailed(_))));
    }
}
