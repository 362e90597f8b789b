//! Scans one scope: every requested service, each category isolated so a
//! failing call never aborts the rest of the scope.

use std::time::Instant;

use serde_json::Value;
use tracing::{debug, warn};

use super::provider::{self, Binding, CategoryDef, CloudApi, Connector, Provider, Reach};
use super::{CategoryOutcome, PartialResult, ScanScope, ServiceSet};
use crate::error::ScopeInitError;

/// Lists every scoped category requested in `services` inside `scope`.
///
/// Only opening the scope client can fail; individual listings come back as
/// [`CategoryOutcome::Failed`]. Listings still running at `deadline` fail
/// with [`ServiceCallError::TimedOut`](crate::error::ServiceCallError::TimedOut)
/// when the client enforces it.
pub fn scan_scope(
    provider: &dyn Provider,
    connector: &dyn Connector,
    account: &str,
    scope: &ScanScope,
    services: &ServiceSet,
    deadline: Option<Instant>,
) -> Result<PartialResult, ScopeInitError> {
    let api = connector.connect(&Binding::scope(account, scope).with_deadline(deadline))?;
    let mut partial = PartialResult::default();

    for def in provider::selected(provider, services) {
        if def.reach != Reach::Scoped {
            continue;
        }

        for category in def.categories {
            let outcome = list_category(provider, api.as_ref(), Some(scope), def.tag, category);
            partial.insert(category.name, outcome);
        }
    }

    Ok(partial)
}

/// Lists the account-wide categories requested in `services`, once.
pub fn scan_global(provider: &dyn Provider, api: &dyn CloudApi, services: &ServiceSet) -> PartialResult {
    let mut partial = PartialResult::default();

    for def in provider::selected(provider, services) {
        if def.reach != Reach::Global {
            continue;
        }

        for category in def.categories {
            let outcome = list_category(provider, api, None, def.tag, category);
            partial.insert(category.name, outcome);
        }
    }

    partial
}

fn list_category(
    provider: &dyn Provider,
    api: &dyn CloudApi,
    scope: Option<&ScanScope>,
    service: &str,
    category: &CategoryDef,
) -> CategoryOutcome {
    let scope_name = scope.map(ScanScope::as_str).unwrap_or("global");

    match (category.list)(api) {
        Ok(mut records) => {
            if let Some(scope) = scope {
                for record in &mut records {
                    record.insert(
                        provider.provenance_key().to_string(),
                        Value::String(scope.to_string()),
                    );
                }
            }
            debug!(
                scope = scope_name,
                service,
                category = category.name,
                count = records.len(),
                "listed"
            );
            CategoryOutcome::Listed(records)
        }
        Err(e) => {
            warn!(
                scope = scope_name,
                service,
                category = category.name,
                error = %e,
                "service call failed"
            );
            CategoryOutcome::Failed { reason: e.to_string() }
        }
    }
}
