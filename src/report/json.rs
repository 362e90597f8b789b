//! JSON output for scripting and piping.

use serde::Serialize;
use serde_json::json;

use crate::scan::AggregateResult;
use crate::store::diff::{DiffResult, DiffType};
use crate::store::SnapshotInfo;

/// The aggregate as stored, plus a derived per-category status map.
pub fn render(result: &AggregateResult) -> String {
    let mut value = match serde_json::to_value(result) {
        Ok(value) => value,
        Err(e) => return error_document(&e),
    };

    let status: serde_json::Map<String, serde_json::Value> = result
        .categories
        .iter()
        .map(|(name, section)| (name.clone(), json!(section.status())))
        .collect();

    if let Some(obj) = value.as_object_mut() {
        obj.insert("status".to_string(), serde_json::Value::Object(status));
    }

    pretty(&value)
}

pub fn render_snapshots(snapshots: &[SnapshotInfo]) -> String {
    let list: Vec<_> = snapshots
        .iter()
        .map(|s| {
            json!({
                "id": s.id,
                "provider": s.provider,
                "timestamp": s.timestamp,
                "resource_count": s.resource_count,
                "duration_ms": s.duration_ms,
            })
        })
        .collect();
    pretty(&list)
}

pub fn render_diff(result: &DiffResult) -> String {
    let entries: Vec<_> = result
        .entries
        .iter()
        .map(|e| {
            json!({
                "category": e.category,
                "identity": e.identity,
                "scope": e.scope,
                "change": match e.diff_type {
                    DiffType::Appeared => "appeared",
                    DiffType::Gone => "gone",
                },
            })
        })
        .collect();

    pretty(&json!({
        "from": {"id": result.from_id, "timestamp": result.from_timestamp},
        "to": {"id": result.to_id, "timestamp": result.to_timestamp},
        "entries": entries,
    }))
}

pub fn pretty<T: Serialize + ?Sized>(value: &T) -> String {
    serde_json::to_string_pretty(value).unwrap_or_else(|e| error_document(&e))
}

fn error_document(e: &serde_json::Error) -> String {
    json!({"error": e.to_string()}).to_string()
}
