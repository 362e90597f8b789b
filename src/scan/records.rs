//! Helpers for turning provider JSON into flat resource records.

use serde_json::Value;

use super::ResourceRecord;
use crate::error::ServiceCallError;

/// The array stored under `key`. A missing key means the response is not
/// the shape we expected, which is a failure rather than "no resources".
pub fn array<'a>(value: &'a Value, key: &str) -> Result<&'a [Value], ServiceCallError> {
    value
        .get(key)
        .and_then(Value::as_array)
        .map(Vec::as_slice)
        .ok_or_else(|| ServiceCallError::Malformed(format!("expected an array under '{key}'")))
}

/// The response itself must be an array (Azure list commands).
pub fn top_level(value: &Value) -> Result<&[Value], ServiceCallError> {
    value
        .as_array()
        .map(Vec::as_slice)
        .ok_or_else(|| ServiceCallError::Malformed("expected a top-level array".to_string()))
}

/// Value at a JSON pointer, or an explicit null when absent.
pub fn field(value: &Value, pointer: &str) -> Value {
    value.pointer(pointer).cloned().unwrap_or(Value::Null)
}

pub fn record<const N: usize>(fields: [(&str, Value); N]) -> ResourceRecord {
    fields
        .into_iter()
        .map(|(name, value)| (name.to_string(), value))
        .collect()
}

/// Attributes that identify a resource, most specific first.
const IDENTITY_KEYS: &[&str] = &[
    "instance_id",
    "group_id",
    "arn",
    "db_identifier",
    "cluster_id",
    "function_name",
    "vpc_id",
    "name",
];

const SCOPE_KEYS: &[&str] = &["region", "resource_group"];

fn text(value: &Value) -> Option<String> {
    match value {
        Value::Null => None,
        Value::String(s) => Some(s.clone()),
        other => Some(other.to_string()),
    }
}

/// The record's identifying attribute value, if it has one.
pub fn identity(record: &ResourceRecord) -> Option<String> {
    IDENTITY_KEYS.iter().find_map(|key| record.get(*key).and_then(text))
}

/// The scope the record was listed in; `None` for account-wide resources.
pub fn scope_of(record: &ResourceRecord) -> Option<String> {
    SCOPE_KEYS.iter().find_map(|key| record.get(*key).and_then(text))
}
