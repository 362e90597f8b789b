//! Snapshot comparison engine.
//!
//! Compares two snapshots of one provider and reports changes:
//! - Matches records per category on their identity attribute plus the
//!   scope they were found in (not on the full attribute map)
//! - Reports resources that appeared or are gone
//! - Categories present in only one snapshot count as empty in the other

use std::collections::{BTreeMap, BTreeSet};

use serde_json::Value;

use super::StoredSnapshot;
use crate::scan::records;
use crate::scan::{AggregateResult, ResourceRecord};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiffType {
    Appeared,
    Gone,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiffEntry {
    pub category: String,
    /// Identity attribute value, or the whole record when it has none.
    pub identity: String,
    pub scope: Option<String>,
    pub diff_type: DiffType,
}

#[derive(Debug)]
pub struct DiffResult {
    pub entries: Vec<DiffEntry>,
    pub from_id: i64,
    pub to_id: i64,
    pub from_timestamp: i64,
    pub to_timestamp: i64,
}

impl DiffResult {
    pub fn count(&self, diff_type: DiffType) -> usize {
        self.entries.iter().filter(|e| e.diff_type == diff_type).count()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
struct RecordKey {
    scope: Option<String>,
    identity: String,
}

fn make_key(record: &ResourceRecord) -> RecordKey {
    RecordKey {
        scope: records::scope_of(record),
        identity: records::identity(record)
            .unwrap_or_else(|| Value::Object(record.clone()).to_string()),
    }
}

fn keys(result: &AggregateResult, category: &str) -> BTreeSet<RecordKey> {
    result.records(category).iter().map(make_key).collect()
}

/// Compares two stored snapshots.
pub fn compare(from: &StoredSnapshot, to: &StoredSnapshot) -> DiffResult {
    compare_results(
        &from.data,
        &to.data,
        from.info.id,
        to.info.id,
        from.info.timestamp,
        to.info.timestamp,
    )
}

pub fn compare_results(
    from: &AggregateResult,
    to: &AggregateResult,
    from_id: i64,
    to_id: i64,
    from_timestamp: i64,
    to_timestamp: i64,
) -> DiffResult {
    let categories: BTreeSet<&String> = from.categories.keys().chain(to.categories.keys()).collect();
    let mut entries = Vec::new();

    for category in categories {
        let before = keys(from, category);
        let after = keys(to, category);

        let mut changes: BTreeMap<&RecordKey, DiffType> = BTreeMap::new();
        for key in after.difference(&before) {
            changes.insert(key, DiffType::Appeared);
        }
        for key in before.difference(&after) {
            changes.insert(key, DiffType::Gone);
        }

        entries.extend(changes.into_iter().map(|(key, diff_type)| DiffEntry {
            category: category.clone(),
            identity: key.identity.clone(),
            scope: key.scope.clone(),
            diff_type,
        }));
    }

    DiffResult {
        entries,
        from_id,
        to_id,
        from_timestamp,
        to_timestamp,
    }
}
