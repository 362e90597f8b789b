//! Terminal table rendering.
//!
//! Formats a scan result as a categorized listing:
//! - One block per category with its record count and status
//! - The scopes that failed to list a category, with the reason
//! - A scope summary and grand total at the end

use std::collections::BTreeMap;

use super::format_timestamp;
use crate::scan::records;
use crate::scan::{AggregateResult, CategoryStatus, ResourceRecord, ScopeStatus};
use crate::store::diff::{DiffEntry, DiffResult, DiffType};
use crate::store::SnapshotInfo;

const NAME_WIDTH: usize = 40;

pub fn render(result: &AggregateResult) -> String {
    let mut output = format!(
        "{} account {} ({})\n",
        result.provider.display_name(),
        result.account,
        result.services.joined()
    );

    if result.categories.is_empty() {
        output.push_str("No categories requested.\n");
        return output;
    }

    for (category, section) in &result.categories {
        output.push_str(&format!(
            "\n{category} ({}) [{}]\n",
            section.records.len(),
            status_label(section.status())
        ));
        output.push_str(&"-".repeat(NAME_WIDTH + 22));
        output.push('\n');

        for record in &section.records {
            output.push_str(&format!(
                "  {:width$} {:>20}\n",
                truncate(&record_label(record), NAME_WIDTH),
                records::scope_of(record).unwrap_or_else(|| "global".to_string()),
                width = NAME_WIDTH
            ));
        }

        for failure in &section.failures {
            let scope = failure
                .scope
                .as_ref()
                .map(|s| s.to_string())
                .unwrap_or_else(|| "global".to_string());
            output.push_str(&format!("  ! {scope}: {}\n", failure.reason));
        }
    }

    let failed: Vec<_> = result.failed_scopes().collect();
    output.push_str(&format!(
        "\nscopes: {} scanned, {} failed\n",
        result.scopes.len(),
        failed.len()
    ));
    for report in failed {
        if let ScopeStatus::Failed { reason } = &report.status {
            output.push_str(&format!("  ! {}: {reason}\n", report.scope));
        }
    }

    output.push_str(&format!("TOTAL: {} resources\n", result.resource_count()));
    output
}

pub fn render_snapshots(snapshots: &[SnapshotInfo]) -> String {
    if snapshots.is_empty() {
        return String::from("No snapshots found. Run 'skyscan scan' to create one.\n");
    }

    let mut output = String::from("Snapshots:\n");
    output.push_str(&format!(
        "{:<6} {:<8} {:<20} {:>10} {:>10}\n",
        "ID", "Provider", "Date", "Resources", "Duration"
    ));
    output.push_str(&"-".repeat(58));
    output.push('\n');

    for snapshot in snapshots {
        output.push_str(&format!(
            "{:<6} {:<8} {:<20} {:>10} {:>9.1}s\n",
            snapshot.id,
            snapshot.provider,
            format_timestamp(snapshot.timestamp),
            snapshot.resource_count,
            snapshot.duration_ms as f64 / 1000.0
        ));
    }

    output
}

pub fn render_diff(result: &DiffResult) -> String {
    let mut output = String::from("\nComparing snapshots:\n");
    output.push_str(&format!(
        "  From: #{} ({})\n",
        result.from_id,
        format_timestamp(result.from_timestamp)
    ));
    output.push_str(&format!(
        "  To:   #{} ({})\n\n",
        result.to_id,
        format_timestamp(result.to_timestamp)
    ));

    if result.entries.is_empty() {
        output.push_str("No changes detected.\n");
        return output;
    }

    let mut by_category: BTreeMap<&str, Vec<&DiffEntry>> = BTreeMap::new();
    for entry in &result.entries {
        by_category.entry(entry.category.as_str()).or_default().push(entry);
    }

    for (category, entries) in by_category {
        output.push_str(&format!("{category}:\n"));
        for entry in entries {
            let marker = match entry.diff_type {
                DiffType::Appeared => "[new] ",
                DiffType::Gone => "[gone]",
            };
            let scope = entry.scope.as_deref().unwrap_or("global");
            output.push_str(&format!("  {marker} {} ({scope})\n", entry.identity));
        }
        output.push('\n');
    }

    output.push_str(&format!(
        "Net change: {} appeared, {} gone\n",
        result.count(DiffType::Appeared),
        result.count(DiffType::Gone)
    ));
    output
}

fn status_label(status: CategoryStatus) -> &'static str {
    match status {
        CategoryStatus::Ok => "ok",
        CategoryStatus::Empty => "empty",
        CategoryStatus::Error => "error",
    }
}

fn record_label(record: &ResourceRecord) -> String {
    records::identity(record).unwrap_or_else(|| "(unnamed)".to_string())
}

fn truncate(s: &str, max_len: usize) -> String {
    if s.chars().count() <= max_len {
        s.to_string()
    } else {
        let truncated: String = s.chars().take(max_len - 3).collect();
        format!("{truncated}...")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scan::{CategoryOutcome, PartialResult, ProviderKind, ScanScope, ServiceSet};
    use serde_json::json;

    fn sample() -> AggregateResult {
        let mut agg = AggregateResult::new(
            ProviderKind::Aws,
            "123456789012",
            ServiceSet::from_tags(["ec2"]),
            ["ec2_instances", "vpcs"],
        );

        let mut ok = PartialResult::default();
        ok.insert(
            "ec2_instances",
            CategoryOutcome::Listed(vec![records::record([
                ("instance_id", json!("i-0abc")),
                ("region", json!("us-east-1")),
            ])]),
        );
        agg.merge(Some(&ScanScope::new("us-east-1")), ok);

        let mut failed = PartialResult::default();
        failed.insert("vpcs", CategoryOutcome::Failed { reason: "access denied".into() });
        agg.merge(Some(&ScanScope::new("eu-west-1")), failed);

        agg.record_scope(ScanScope::new("us-east-1"), ScopeStatus::Completed);
        agg.record_scope(
            ScanScope::new("ap-south-1"),
            ScopeStatus::Failed { reason: "timed out".into() },
        );
        agg
    }

    #[test]
    fn render_shows_counts_status_and_failures() {
        let out = render(&sample());
        assert!(out.contains("ec2_instances (1) [ok]"));
        assert!(out.contains("i-0abc"));
        assert!(out.contains("vpcs (0) [error]"));
        assert!(out.contains("! eu-west-1: access denied"));
        assert!(out.contains("scopes: 2 scanned, 1 failed"));
        assert!(out.contains("! ap-south-1: timed out"));
        assert!(out.contains("TOTAL: 1 resources"));
    }

    #[test]
    fn truncate_long_names() {
        assert_eq!(truncate("short", 10), "short");
        assert_eq!(truncate("a-very-long-resource-name", 10), "a-very-...");
    }

    #[test]
    fn empty_snapshot_list_hints_at_scan() {
        assert!(render_snapshots(&[]).contains("skyscan scan"));
    }

    #[test]
    fn diff_groups_by_category() {
        let result = DiffResult {
            entries: vec![
                DiffEntry {
                    category: "vpcs".into(),
                    identity: "vpc-1".into(),
                    scope: Some("us-east-1".into()),
                    diff_type: DiffType::Gone,
                },
                DiffEntry {
                    category: "ec2_instances".into(),
                    identity: "i-1".into(),
                    scope: Some("us-east-1".into()),
                    diff_type: DiffType::Appeared,
                },
            ],
            from_id: 1,
            to_id: 2,
            from_timestamp: 0,
            to_timestamp: 60,
        };

        let out = render_diff(&result);
        let ec2 = out.find("ec2_instances:").unwrap();
        let vpcs = out.find("vpcs:").unwrap();
        assert!(ec2 < vpcs);
        assert!(out.contains("[gone] vpc-1 (us-east-1)"));
        assert!(out.contains("Net change: 1 appeared, 1 gone"));
    }
}
