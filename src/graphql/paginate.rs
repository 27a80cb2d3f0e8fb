use std::collections::HashSet;
use std::time::Duration;

use serde::de::DeserializeOwned;
use serde_json::{json, Value};
use tracing::debug;

use crate::error::AuditError;
use crate::graphql::{check_response, GraphqlRequest, GraphqlTransport};

/// Where a page's items and next cursor live below `data.actor.account`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PagePath {
    pub label: &'static str,
    pub connection: &'static [&'static str],
    pub items: &'static str,
}

pub const POLICIES_PATH: PagePath = PagePath {
    label: "policies",
    connection: &["alerts", "policiesSearch"],
    items: "policies",
};

pub const CONDITIONS_PATH: PagePath = PagePath {
    label: "conditions",
    connection: &["alerts", "nrqlConditionsSearch"],
    items: "nrqlConditions",
};

#[derive(Debug, Clone, Copy)]
pub struct PageLimits {
    pub timeout: Duration,
    pub max_pages: usize,
}

#[derive(Debug, Default, PartialEq)]
struct Page {
    items: Vec<Value>,
    next_cursor: Option<String>,
}

/// Follows `nextCursor` until it is null, absent or empty and returns every
/// item in server order. Any failure discards what was accumulated.
pub async fn fetch_all_pages<T: DeserializeOwned>(
    transport: &dyn GraphqlTransport,
    query: &'static str,
    path: &PagePath,
    account_id: i64,
    limits: PageLimits,
) -> Result<Vec<T>, AuditError> {
    if account_id <= 0 {
        return Err(AuditError::InvalidAccountId(format!(
            "{account_id} is not a positive integer"
        )));
    }

    let mut all = Vec::new();
    let mut cursor: Option<String> = None;
    let mut seen_cursors = HashSet::new();
    let mut pages = 0usize;

    loop {
        let request = GraphqlRequest {
            query,
            variables: json!({ "accountId": account_id, "cursor": cursor }),
        };
        let response = transport.execute(&request, limits.timeout).await?;
        let page = extract_page(&response, path)?;
        pages += 1;
        debug!(
            collection = path.label,
            page = pages,
            items = page.items.len(),
            "fetched page"
        );

        for item in page.items {
            let decoded = serde_json::from_value(item).map_err(|e| {
                AuditError::fetch(format!("malformed {} item on page {pages}: {e}", path.label))
            })?;
            all.push(decoded);
        }

        let Some(next) = page.next_cursor else {
            break;
        };
        if !seen_cursors.insert(next.clone()) {
            return Err(AuditError::fetch(format!(
                "{} pagination returned cursor {next:?} twice",
                path.label
            )));
        }
        if pages >= limits.max_pages {
            return Err(AuditError::fetch(format!(
                "{} pagination exceeded {} pages",
                path.label, limits.max_pages
            )));
        }
        cursor = Some(next);
    }

    Ok(all)
}

fn extract_page(response: &Value, path: &PagePath) -> Result<Page, AuditError> {
    let mut node = check_response(response, path.label)?;
    for segment in path.connection {
        match node.get(segment) {
            Some(next) if !next.is_null() => node = next,
            _ => return Ok(Page::default()),
        }
    }

    let items = match node.get(path.items) {
        Some(Value::Array(items)) => items.clone(),
        Some(Value::Null) | None => Vec::new(),
        Some(other) => {
            return Err(AuditError::fetch(format!(
                "{} page has non-array {}: {other}",
                path.label, path.items
            )))
        }
    };
    let next_cursor = node
        .get("nextCursor")
        .and_then(Value::as_str)
        .filter(|c| !c.is_empty())
        .map(str::to_string);

    Ok(Page { items, next_cursor })
}
