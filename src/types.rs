use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

use crate::error::AuditError;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Policy {
    #[serde(deserialize_with = "flexible_i64")]
    pub id: i64,
    pub name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Condition {
    #[serde(deserialize_with = "flexible_i64")]
    pub id: i64,
    #[serde(deserialize_with = "flexible_i64")]
    pub policy_id: i64,
    #[serde(default)]
    pub name: Option<String>,
    /// Epoch milliseconds.
    #[serde(default)]
    pub updated_at: Option<i64>,
}

impl Condition {
    pub fn display_name(&self) -> &str {
        self.name.as_deref().unwrap_or("N/A")
    }

    pub fn sort_key(&self) -> String {
        self.name.as_deref().unwrap_or_default().to_lowercase()
    }
}

/// One NrAuditEvent row. Fields the report does not use are dropped on decode;
/// values are kept as raw JSON because the platform mixes strings, numbers and
/// structured payloads for the same attribute.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct AuditEvent {
    pub timestamp: Option<Value>,
    pub action_identifier: Option<Value>,
    pub actor_email: Option<Value>,
    pub actor_id: Option<Value>,
    pub target_id: Option<Value>,
    pub target_type: Option<Value>,
    pub target_name: Option<Value>,
    pub description: Option<Value>,
    pub changes: Option<Value>,
}

impl AuditEvent {
    pub fn timestamp_ms(&self) -> Option<i64> {
        match self.timestamp.as_ref()? {
            Value::Number(n) => n.as_i64().or_else(|| n.as_f64().map(|f| f as i64)),
            Value::String(s) => s.trim().parse().ok(),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct AlertReportRow {
    pub condition_name: String,
    pub condition_id: i64,
    pub policy_name: String,
    pub policy_id: i64,
    pub condition_last_update: Option<i64>,
    pub policy_last_update: Option<i64>,
    pub condition_url: String,
    pub policy_url: String,
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct ReportCounts {
    pub policies_fetched: usize,
    pub conditions_fetched: usize,
    pub policies_changed: usize,
    pub conditions_changed: usize,
}

#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    pub api_key: String,
    pub account_id: i64,
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("api_key", &"<redacted>")
            .field("account_id", &self.account_id)
            .finish()
    }
}

impl Credentials {
    pub fn from_parts(api_key: Option<&str>, account_id: Option<&str>) -> Result<Self, AuditError> {
        let api_key = api_key.map(str::trim).filter(|k| !k.is_empty());
        let account_id = account_id.map(str::trim).filter(|a| !a.is_empty());
        let (api_key, account_id) = match (api_key, account_id) {
            (Some(key), Some(account)) => (key, account),
            (None, _) => return Err(AuditError::MissingCredentials("api key is required".into())),
            (_, None) => {
                return Err(AuditError::MissingCredentials("account id is required".into()))
            }
        };
        Ok(Self {
            api_key: api_key.to_string(),
            account_id: parse_account_id(account_id)?,
        })
    }
}

pub fn parse_account_id(raw: &str) -> Result<i64, AuditError> {
    match raw.trim().parse::<i64>() {
        Ok(id) if id > 0 => Ok(id),
        Ok(_) => Err(AuditError::InvalidAccountId(format!(
            "{raw} is not a positive integer"
        ))),
        Err(_) => Err(AuditError::InvalidAccountId(format!("{raw} is not an integer"))),
    }
}

fn flexible_i64<'de, D>(deserializer: D) -> Result<i64, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Int(i64),
        Text(String),
    }

    match Raw::deserialize(deserializer)? {
        Raw::Int(v) => Ok(v),
        Raw::Text(s) => s
            .trim()
            .parse()
            .map_err(|_| serde::de::Error::custom(format!("expected integer id, got {s:?}"))),
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn decodes_string_and_numeric_ids() {
        let condition: Condition = serde_json::from_value(json!({
            "id": "10",
            "policyId": 1,
            "name": "High CPU",
            "updatedAt": 1718409600000i64
        }))
        .expect("condition should decode");
        assert_eq!(condition.id, 10);
        assert_eq!(condition.policy_id, 1);
        assert_eq!(condition.updated_at, Some(1718409600000));

        let policy: Policy =
            serde_json::from_value(json!({ "id": "77", "name": "Infra" })).expect("policy");
        assert_eq!(policy.id, 77);
    }

    #[test]
    fn rejects_condition_without_policy() {
        let decoded = serde_json::from_value::<Condition>(json!({ "id": "10", "name": "x" }));
        assert!(decoded.is_err());
    }

    #[test]
    fn audit_event_ignores_unknown_fields() {
        let event: AuditEvent = serde_json::from_value(json!({
            "timestamp": 1718409600000i64,
            "actionIdentifier": "alerts_policy.update",
            "somethingElse": true
        }))
        .expect("audit event");
        assert_eq!(event.timestamp_ms(), Some(1718409600000));
        assert!(event.actor_email.is_none());
    }

    #[test]
    fn validates_credentials() {
        assert_eq!(
            Credentials::from_parts(Some("key"), Some("0")),
            Err(AuditError::InvalidAccountId("0 is not a positive integer".into()))
        );
        assert!(matches!(
            Credentials::from_parts(Some("  "), Some("12")),
            Err(AuditError::MissingCredentials(_))
        ));
        assert!(matches!(
            Credentials::from_parts(Some("key"), Some("abc")),
            Err(AuditError::InvalidAccountId(_))
        ));
        let creds = Credentials::from_parts(Some("NRAK-secret"), Some(" 42 ")).expect("valid");
        assert_eq!(creds.account_id, 42);
        assert!(!format!("{creds:?}").contains("NRAK-secret"));
    }
}
