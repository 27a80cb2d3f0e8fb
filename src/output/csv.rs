use anyhow::Result;
use chrono::{Local, TimeZone};
use serde_json::Value;

use crate::types::{AlertReportRow, AuditEvent};

pub const ALERT_COLUMNS: [&str; 8] = [
    "condition_name",
    "condition_id",
    "policy_name",
    "policy_id",
    "condition_last_update",
    "policy_last_update",
    "condition_url",
    "policy_url",
];

pub const AUDIT_COLUMNS: [&str; 9] = [
    "timestamp",
    "actionIdentifier",
    "actorEmail",
    "actorId",
    "targetId",
    "targetType",
    "targetName",
    "description",
    "changes",
];

const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// `None` when there are no rows, so callers can tell "no data" from a
/// header-only table.
pub fn alerts_to_csv(rows: &[AlertReportRow]) -> Result<Option<String>> {
    if rows.is_empty() {
        return Ok(None);
    }
    let mut writer = csv::Writer::from_writer(vec![]);
    writer.write_record(ALERT_COLUMNS)?;
    for row in rows {
        writer.write_record([
            row.condition_name.clone(),
            row.condition_id.to_string(),
            row.policy_name.clone(),
            row.policy_id.to_string(),
            format_timestamp(row.condition_last_update),
            format_timestamp(row.policy_last_update),
            row.condition_url.clone(),
            row.policy_url.clone(),
        ])?;
    }
    let data = writer.into_inner()?;
    Ok(Some(String::from_utf8_lossy(&data).to_string()))
}

pub fn audit_to_csv(events: &[AuditEvent]) -> Result<Option<String>> {
    if events.is_empty() {
        return Ok(None);
    }
    let mut writer = csv::Writer::from_writer(vec![]);
    writer.write_record(AUDIT_COLUMNS)?;
    for event in events {
        let timestamp = match event.timestamp_ms() {
            Some(ms) => format_local_ms(ms).unwrap_or_else(|| ms.to_string()),
            None => cell_text(event.timestamp.as_ref()),
        };
        writer.write_record([
            timestamp,
            cell_text(event.action_identifier.as_ref()),
            cell_text(event.actor_email.as_ref()),
            cell_text(event.actor_id.as_ref()),
            cell_text(event.target_id.as_ref()),
            cell_text(event.target_type.as_ref()),
            cell_text(event.target_name.as_ref()),
            cell_text(event.description.as_ref()),
            cell_text(event.changes.as_ref()),
        ])?;
    }
    let data = writer.into_inner()?;
    Ok(Some(String::from_utf8_lossy(&data).to_string()))
}

/// `YYYY-MM-DD HH:MM:SS` in local time, or `N/A`.
pub fn format_timestamp(epoch_ms: Option<i64>) -> String {
    epoch_ms
        .and_then(format_local_ms)
        .unwrap_or_else(|| "N/A".to_string())
}

fn format_local_ms(epoch_ms: i64) -> Option<String> {
    Local
        .timestamp_millis_opt(epoch_ms)
        .single()
        .map(|dt| dt.format(TIMESTAMP_FORMAT).to_string())
}

/// Plain text stays as-is, structured values become JSON, absent is blank.
fn cell_text(value: Option<&Value>) -> String {
    match value {
        None | Some(Value::Null) => String::new(),
        Some(Value::String(s)) => s.clone(),
        Some(other) => other.to_string(),
    }
}
