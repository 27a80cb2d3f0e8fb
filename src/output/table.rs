use comfy_table::presets::UTF8_FULL;
use comfy_table::{Cell, Color, ContentArrangement, Row, Table};

use crate::output::csv::format_timestamp;
use crate::report::DateRange;
use crate::types::{AlertReportRow, ReportCounts};

pub fn render_summary_table(
    range: &DateRange,
    counts: &ReportCounts,
    audit_events: usize,
    audit_error: Option<&str>,
) -> String {
    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL)
        .set_content_arrangement(ContentArrangement::Dynamic);
    table.set_header(vec!["Metric", "Value"]);
    table.add_row(vec![
        "Date range".to_string(),
        format!("{} .. {}", range.start, range.end),
    ]);
    table.add_row(vec![
        "Policies fetched".to_string(),
        counts.policies_fetched.to_string(),
    ]);
    table.add_row(vec![
        "Conditions fetched".to_string(),
        counts.conditions_fetched.to_string(),
    ]);
    let changed_color = if counts.conditions_changed > 0 {
        Color::Yellow
    } else {
        Color::Green
    };
    table.add_row(Row::from(vec![
        Cell::new("Policies changed"),
        Cell::new(counts.policies_changed).fg(changed_color),
    ]));
    table.add_row(Row::from(vec![
        Cell::new("Conditions changed"),
        Cell::new(counts.conditions_changed).fg(changed_color),
    ]));
    match audit_error {
        Some(error) => table.add_row(Row::from(vec![
            Cell::new("Audit events"),
            Cell::new(format!("unavailable: {error}")).fg(Color::Red),
        ])),
        None => table.add_row(vec!["Audit events".to_string(), audit_events.to_string()]),
    };
    table.to_string()
}

pub fn render_alert_rows_table(rows: &[AlertReportRow]) -> String {
    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL)
        .set_content_arrangement(ContentArrangement::Dynamic);
    table.set_header(vec![
        "Condition",
        "Condition ID",
        "Policy",
        "Policy ID",
        "Condition Updated",
        "Policy Updated",
    ]);
    for row in rows {
        table.add_row(vec![
            row.condition_name.clone(),
            row.condition_id.to_string(),
            row.policy_name.clone(),
            row.policy_id.to_string(),
            format_timestamp(row.condition_last_update),
            format_timestamp(row.policy_last_update),
        ]);
    }
    table.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn summary_lists_all_counts() {
        let range = DateRange {
            start: "2024-06-01".to_string(),
            end: "2024-06-30".to_string(),
        };
        let counts = ReportCounts {
            policies_fetched: 12,
            conditions_fetched: 40,
            policies_changed: 2,
            conditions_changed: 3,
        };
        let rendered = render_summary_table(&range, &counts, 5, None);
        assert!(rendered.contains("2024-06-01 .. 2024-06-30"));
        assert!(rendered.contains("Policies changed"));
        assert!(rendered.contains("40"));

        let failed = render_summary_table(&range, &counts, 0, Some("POST returned 403 Forbidden"));
        assert!(failed.contains("unavailable: POST returned 403 Forbidden"));
    }

    #[test]
    fn alert_rows_render_placeholder_for_missing_times() {
        let rows = vec![AlertReportRow {
            condition_name: "Disk full".to_string(),
            condition_id: 3,
            policy_name: "Storage".to_string(),
            policy_id: 1,
            condition_last_update: None,
            policy_last_update: None,
            condition_url: String::new(),
            policy_url: String::new(),
        }];
        let rendered = render_alert_rows_table(&rows);
        assert!(rendered.contains("Disk full"));
        assert!(rendered.contains("N/A"));
    }
}
