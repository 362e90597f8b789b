//! Parallel multi-scope resource scanner.
//!
//! A scan fans out over the scopes of one cloud account (AWS regions or
//! Azure resource groups), runs the requested service listings inside each
//! scope and merges the partial results into one [`AggregateResult`].
//!
//! Failures degrade into emptier results instead of aborting the scan, but
//! they are never silent: every category carries the scopes that failed to
//! list it, and every scope carries its own completion status.

pub mod aws;
pub mod azure;
pub mod cli_api;
pub mod coordinator;
pub mod provider;
pub mod records;
pub mod scanner;

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::ScanError;
use provider::Provider;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    Aws,
    Azure,
}

impl ProviderKind {
    pub const ALL: [ProviderKind; 2] = [ProviderKind::Aws, ProviderKind::Azure];

    pub fn as_str(&self) -> &'static str {
        match self {
            ProviderKind::Aws => "aws",
            ProviderKind::Azure => "azure",
        }
    }

    pub fn display_name(&self) -> &'static str {
        match self {
            ProviderKind::Aws => "AWS",
            ProviderKind::Azure => "Azure",
        }
    }
}

impl fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ProviderKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "aws" => Ok(ProviderKind::Aws),
            "azure" => Ok(ProviderKind::Azure),
            other => Err(format!("unknown provider '{other}', expected 'aws' or 'azure'")),
        }
    }
}

/// One independent unit of parallel scan work: a region or a resource group.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ScanScope(String);

impl ScanScope {
    pub fn new(name: impl Into<String>) -> Self {
        ScanScope(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ScanScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A flat attribute map describing one cloud resource.
pub type ResourceRecord = serde_json::Map<String, serde_json::Value>;

/// Sorted, deduplicated set of service tags.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ServiceSet(BTreeSet<String>);

impl ServiceSet {
    /// Builds a set without checking the tags against any provider table.
    pub fn from_tags<I, S>(tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        ServiceSet(tags.into_iter().filter_map(|t| normalize_tag(t.as_ref())).collect())
    }

    /// Resolves a caller's request into the effective set for `provider`.
    ///
    /// Entries may be comma-separated. An empty request selects the
    /// provider's default set. Unknown tags are rejected before any provider
    /// call is made, and tags implied by a requested service are added.
    pub fn resolve(provider: &dyn Provider, requested: &[String]) -> Result<Self, ScanError> {
        let mut tags: BTreeSet<String> = requested
            .iter()
            .flat_map(|entry| entry.split(','))
            .filter_map(normalize_tag)
            .collect();

        if tags.is_empty() {
            tags = provider.default_services().iter().map(|t| t.to_string()).collect();
        }

        for tag in &tags {
            if provider.service(tag).is_none() {
                return Err(ScanError::UnknownService {
                    provider: provider.kind(),
                    tag: tag.clone(),
                    known: provider.services().iter().map(|s| s.tag).collect::<Vec<_>>().join(", "),
                });
            }
        }

        loop {
            let implied: Vec<String> = tags
                .iter()
                .filter_map(|tag| provider.service(tag))
                .flat_map(|def| def.implies.iter())
                .filter(|tag| !tags.contains(**tag))
                .map(|tag| tag.to_string())
                .collect();
            if implied.is_empty() {
                break;
            }
            tags.extend(implied);
        }

        Ok(ServiceSet(tags))
    }

    pub fn contains(&self, tag: &str) -> bool {
        self.0.contains(tag)
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.0.iter().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Comma-joined tags in sorted order.
    pub fn joined(&self) -> String {
        self.iter().collect::<Vec<_>>().join(",")
    }
}

fn normalize_tag(raw: &str) -> Option<String> {
    let tag = raw.trim().to_ascii_lowercase();
    (!tag.is_empty()).then_some(tag)
}

/// Result of one category listing inside one scope.
#[derive(Debug, Clone, PartialEq)]
pub enum CategoryOutcome {
    Listed(Vec<ResourceRecord>),
    Failed { reason: String },
}

/// Everything one scope (or the account-wide pass) produced.
#[derive(Debug, Clone, Default)]
pub struct PartialResult {
    pub categories: BTreeMap<String, CategoryOutcome>,
}

impl PartialResult {
    pub fn insert(&mut self, category: &str, outcome: CategoryOutcome) {
        self.categories.insert(category.to_string(), outcome);
    }

    pub fn is_empty(&self) -> bool {
        self.categories.is_empty()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CategoryStatus {
    Ok,
    Empty,
    Error,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CategoryFailure {
    /// `None` for account-wide services.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scope: Option<ScanScope>,
    pub reason: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CategorySection {
    pub records: Vec<ResourceRecord>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub failures: Vec<CategoryFailure>,
}

impl CategorySection {
    /// `error` wins over record count: a category with records from healthy
    /// scopes but a failure elsewhere is still incomplete.
    pub fn status(&self) -> CategoryStatus {
        if !self.failures.is_empty() {
            CategoryStatus::Error
        } else if self.records.is_empty() {
            CategoryStatus::Empty
        } else {
            CategoryStatus::Ok
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum ScopeStatus {
    Completed,
    Failed { reason: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScopeReport {
    pub scope: ScanScope,
    #[serde(flatten)]
    pub status: ScopeStatus,
}

/// Merged cross-scope view of every requested category for one scan.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AggregateResult {
    pub provider: ProviderKind,
    pub account: String,
    pub services: ServiceSet,
    pub categories: BTreeMap<String, CategorySection>,
    #[serde(default)]
    pub scopes: Vec<ScopeReport>,
    pub scanned_at: i64,
    #[serde(default)]
    pub duration_ms: u64,
}

impl AggregateResult {
    /// Creates an aggregate whose template holds exactly `categories`.
    pub fn new<'a>(
        provider: ProviderKind,
        account: impl Into<String>,
        services: ServiceSet,
        categories: impl IntoIterator<Item = &'a str>,
    ) -> Self {
        AggregateResult {
            provider,
            account: account.into(),
            services,
            categories: categories
                .into_iter()
                .map(|name| (name.to_string(), CategorySection::default()))
                .collect(),
            scopes: Vec::new(),
            scanned_at: chrono::Utc::now().timestamp(),
            duration_ms: 0,
        }
    }

    /// Folds a partial result into the aggregate. Categories outside the
    /// template are dropped.
    pub fn merge(&mut self, scope: Option<&ScanScope>, partial: PartialResult) {
        for (category, outcome) in partial.categories {
            let Some(section) = self.categories.get_mut(&category) else {
                debug!(%category, "dropping category outside the requested template");
                continue;
            };

            match outcome {
                CategoryOutcome::Listed(records) => section.records.extend(records),
                CategoryOutcome::Failed { reason } => section.failures.push(CategoryFailure {
                    scope: scope.cloned(),
                    reason,
                }),
            }
        }
    }

    pub fn record_scope(&mut self, scope: ScanScope, status: ScopeStatus) {
        self.scopes.push(ScopeReport { scope, status });
    }

    pub fn records(&self, category: &str) -> &[ResourceRecord] {
        self.categories
            .get(category)
            .map(|section| section.records.as_slice())
            .unwrap_or_default()
    }

    pub fn resource_count(&self) -> usize {
        self.categories.values().map(|s| s.records.len()).sum()
    }

    pub fn failed_scopes(&self) -> impl Iterator<Item = &ScopeReport> {
        self.scopes
            .iter()
            .filter(|report| matches!(report.status, ScopeStatus::Failed { .. }))
    }
}
