use std::collections::{BTreeSet, HashMap};

use serde::{Deserialize, Serialize};

use crate::types::{AlertReportRow, Condition, Policy};

pub const POLICY_NOT_FOUND: &str = "Policy Not Found";

/// What the `policy_last_update` column reports.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum PolicyUpdateMode {
    /// Latest `updatedAt` across every fetched condition of the policy.
    #[default]
    PolicyMax,
    /// The condition's own `updatedAt`.
    Condition,
}

#[derive(Debug, Clone)]
pub struct ConsoleLinks {
    pub base_url: String,
    pub account_id: i64,
}

impl ConsoleLinks {
    pub fn policy_url(&self, policy_id: i64) -> String {
        format!(
            "{}/alerts-ai/policy/{policy_id}?account={}",
            self.base_url.trim_end_matches('/'),
            self.account_id
        )
    }

    pub fn condition_url(&self, policy_id: i64, condition_id: i64) -> String {
        format!(
            "{}/alerts-ai/policy/{policy_id}/condition/{condition_id}?account={}",
            self.base_url.trim_end_matches('/'),
            self.account_id
        )
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CorrelatedReport {
    pub rows: Vec<AlertReportRow>,
    pub policies_changed: usize,
    pub conditions_changed: usize,
}

/// Joins `changed` conditions to their policies. `all_conditions` is the
/// unfiltered fetch and feeds the per-policy latest update; rows come back
/// sorted case-insensitively by condition name, ties in fetch order.
pub fn correlate(
    policies: &[Policy],
    all_conditions: &[Condition],
    changed: &[Condition],
    mode: PolicyUpdateMode,
    links: &ConsoleLinks,
) -> CorrelatedReport {
    let policy_names: HashMap<i64, &str> =
        policies.iter().map(|p| (p.id, p.name.as_str())).collect();
    let latest_by_policy = latest_update_by_policy(all_conditions);

    let mut ordered: Vec<&Condition> = changed.iter().collect();
    ordered.sort_by_cached_key(|c| c.sort_key());

    let rows = ordered
        .into_iter()
        .map(|condition| {
            let policy_last_update = match mode {
                PolicyUpdateMode::PolicyMax => {
                    latest_by_policy.get(&condition.policy_id).copied()
                }
                PolicyUpdateMode::Condition => condition.updated_at,
            };
            AlertReportRow {
                condition_name: condition.display_name().to_string(),
                condition_id: condition.id,
                policy_name: policy_names
                    .get(&condition.policy_id)
                    .copied()
                    .unwrap_or(POLICY_NOT_FOUND)
                    .to_string(),
                policy_id: condition.policy_id,
                condition_last_update: condition.updated_at,
                policy_last_update,
                condition_url: links.condition_url(condition.policy_id, condition.id),
                policy_url: links.policy_url(condition.policy_id),
            }
        })
        .collect();

    let policies_changed = changed
        .iter()
        .map(|c| c.policy_id)
        .collect::<BTreeSet<_>>()
        .len();

    CorrelatedReport {
        rows,
        policies_changed,
        conditions_changed: changed.len(),
    }
}

pub fn latest_update_by_policy(conditions: &[Condition]) -> HashMap<i64, i64> {
    let mut latest = HashMap::new();
    for condition in conditions {
        let Some(updated_at) = condition.updated_at else {
            continue;
        };
        latest
            .entry(condition.policy_id)
            .and_modify(|current: &mut i64| *current = (*current).max(updated_at))
            .or_insert(updated_at);
    }
    latest
}
