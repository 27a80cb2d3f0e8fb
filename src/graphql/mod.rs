pub mod audit;
pub mod http;
pub mod paginate;

use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;
use serde_json::Value;

use crate::error::AuditError;

pub const POLICIES_QUERY: &str = r#"
query($accountId: Int!, $cursor: String) {
  actor {
    account(id: $accountId) {
      alerts {
        policiesSearch(cursor: $cursor) {
          policies { id name }
          nextCursor
        }}}}}
"#;

pub const CONDITIONS_QUERY: &str = r#"
query($accountId: Int!, $cursor: String) {
  actor {
    account(id: $accountId) {
      alerts {
        nrqlConditionsSearch(cursor: $cursor) {
          nrqlConditions { policyId id name updatedAt }
          nextCursor
        }}}}}
"#;

pub const NRQL_QUERY: &str = r#"
query($accountId: Int!, $nrqlQuery: Nrql!) {
  actor {
    account(id: $accountId) {
      nrql(query: $nrqlQuery, timeout: 120) {
        results
      }
    }
  }
}
"#;

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct GraphqlRequest {
    pub query: &'static str,
    pub variables: Value,
}

/// Sends one GraphQL request and returns the decoded response body.
///
/// Implementations fail with `FetchFailed` on network errors and non-2xx
/// statuses. GraphQL-level `errors` are left for [`check_response`].
#[async_trait]
pub trait GraphqlTransport: Send + Sync {
    async fn execute(&self, request: &GraphqlRequest, timeout: Duration)
        -> Result<Value, AuditError>;
}

/// Rejects responses carrying a top-level error list and returns the
/// `data.actor.account` object.
pub fn check_response<'a>(response: &'a Value, context: &str) -> Result<&'a Value, AuditError> {
    if let Some(errors) = response.get("errors") {
        if !errors.is_null() {
            return Err(AuditError::fetch(format!("GraphQL error on {context}: {errors}")));
        }
    }
    response
        .get("data")
        .and_then(|d| d.get("actor"))
        .and_then(|a| a.get("account"))
        .filter(|account| account.is_object())
        .ok_or_else(|| {
            AuditError::fetch(format!("{context} response has no data.actor.account"))
        })
}

#[cfg(test)]
pub(crate) mod testing {
    use std::collections::VecDeque;
    use std::sync::Mutex;
    use std::time::Duration;

    use async_trait::async_trait;
    use serde_json::{json, Value};

    use super::{GraphqlRequest, GraphqlTransport};
    use crate::error::AuditError;

    /// Replays canned responses in order and records every request it sees.
    #[derive(Default)]
    pub struct ScriptedTransport {
        responses: Mutex<VecDeque<Result<Value, AuditError>>>,
        pub requests: Mutex<Vec<(GraphqlRequest, Duration)>>,
    }

    impl ScriptedTransport {
        pub fn new(responses: Vec<Result<Value, AuditError>>) -> Self {
            Self {
                responses: Mutex::new(responses.into()),
                requests: Mutex::new(Vec::new()),
            }
        }

        pub fn request_count(&self) -> usize {
            self.requests.lock().expect("requests mutex poisoned").len()
        }

        pub fn request(&self, index: usize) -> (GraphqlRequest, Duration) {
            self.requests.lock().expect("requests mutex poisoned")[index].clone()
        }
    }

    #[async_trait]
    impl GraphqlTransport for ScriptedTransport {
        async fn execute(
            &self,
            request: &GraphqlRequest,
            timeout: Duration,
        ) -> Result<Value, AuditError> {
            self.requests
                .lock()
                .expect("requests mutex poisoned")
                .push((request.clone(), timeout));
            self.responses
                .lock()
                .expect("responses mutex poisoned")
                .pop_front()
                .unwrap_or_else(|| Err(AuditError::fetch("script exhausted")))
        }
    }

    pub fn policies_page(policies: Value, cursor: Option<&str>) -> Value {
        json!({ "data": { "actor": { "account": { "alerts": {
            "policiesSearch": { "policies": policies, "nextCursor": cursor }
        }}}}})
    }

    pub fn conditions_page(conditions: Value, cursor: Option<&str>) -> Value {
        json!({ "data": { "actor": { "account": { "alerts": {
            "nrqlConditionsSearch": { "nrqlConditions": conditions, "nextCursor": cursor }
        }}}}})
    }

    pub fn nrql_results(results: Value) -> Value {
        json!({ "data": { "actor": { "account": { "nrql": { "results": results } } } } })
    }
}
