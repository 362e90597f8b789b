//! Provider seams: the client a listing routine talks to, and the static
//! service table each cloud provider registers.

use std::sync::Arc;
use std::time::Instant;

use serde_json::Value;

use super::{ProviderKind, ResourceRecord, ScanScope, ServiceSet};
use crate::error::{ScopeInitError, ServiceCallError};

/// One provider API invocation, e.g. `["ec2", "describe-instances"]`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ApiCall {
    pub command: &'static [&'static str],
    pub args: Vec<String>,
}

impl ApiCall {
    pub fn new(command: &'static [&'static str]) -> Self {
        ApiCall {
            command,
            args: Vec::new(),
        }
    }

    pub fn arg(mut self, flag: &str, value: impl Into<String>) -> Self {
        self.args.push(flag.to_string());
        self.args.push(value.into());
        self
    }

    /// Space-joined command path without arguments.
    pub fn operation(&self) -> String {
        self.command.join(" ")
    }
}

/// A client already bound to an account and, optionally, a scope.
pub trait CloudApi: Send + Sync {
    fn call(&self, call: &ApiCall) -> Result<Value, ServiceCallError>;
}

/// What a client should be bound to when it is opened.
#[derive(Debug, Clone, Copy, Default)]
pub struct Binding<'a> {
    /// AWS profile or Azure subscription. `None` uses the tool's default.
    pub account: Option<&'a str>,
    pub scope: Option<&'a ScanScope>,
    /// Calls still running at this instant are abandoned and their process
    /// killed. `None` waits forever.
    pub deadline: Option<Instant>,
}

impl<'a> Binding<'a> {
    pub fn account(account: Option<&'a str>) -> Self {
        Binding {
            account,
            scope: None,
            deadline: None,
        }
    }

    pub fn scope(account: &'a str, scope: &'a ScanScope) -> Self {
        Binding {
            account: Some(account),
            scope: Some(scope),
            deadline: None,
        }
    }

    pub fn with_deadline(mut self, deadline: Option<Instant>) -> Self {
        self.deadline = deadline;
        self
    }
}

/// Opens provider clients. Shared across worker threads for a whole scan.
pub trait Connector: Send + Sync {
    /// Checks that the underlying tooling is usable at all.
    fn probe(&self) -> Result<(), ScopeInitError> {
        Ok(())
    }

    fn connect(&self, binding: &Binding<'_>) -> Result<Arc<dyn CloudApi>, ScopeInitError>;
}

/// Lists one resource category through an already-bound client.
pub type ListFn = fn(&dyn CloudApi) -> Result<Vec<ResourceRecord>, ServiceCallError>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reach {
    /// Listed once per account, outside the per-scope fan-out.
    Global,
    Scoped,
}

pub struct CategoryDef {
    pub name: &'static str,
    pub list: ListFn,
}

pub struct ServiceDef {
    pub tag: &'static str,
    pub reach: Reach,
    pub implies: &'static [&'static str],
    pub categories: &'static [CategoryDef],
}

pub trait Provider: Send + Sync {
    fn kind(&self) -> ProviderKind;

    /// Attribute stamped on every scoped record: `region` or `resource_group`.
    fn provenance_key(&self) -> &'static str;

    fn services(&self) -> &'static [ServiceDef];

    fn default_services(&self) -> &'static [&'static str];

    /// Resolves the concrete account identifier (account id, subscription id).
    fn resolve_account(
        &self,
        api: &dyn CloudApi,
        requested: Option<&str>,
    ) -> Result<String, ServiceCallError>;

    fn enumerate_scopes(&self, api: &dyn CloudApi) -> Result<Vec<ScanScope>, ServiceCallError>;

    fn service(&self, tag: &str) -> Option<&'static ServiceDef> {
        self.services().iter().find(|def| def.tag == tag)
    }
}

/// Table rows selected by `services`, in table order.
pub fn selected(provider: &dyn Provider, services: &ServiceSet) -> Vec<&'static ServiceDef> {
    provider
        .services()
        .iter()
        .filter(|def| services.contains(def.tag))
        .collect()
}

/// Category template for an aggregate scanned with `services`.
pub fn category_names(provider: &dyn Provider, services: &ServiceSet) -> Vec<&'static str> {
    selected(provider, services)
        .into_iter()
        .flat_map(|def| def.categories.iter().map(|c| c.name))
        .collect()
}
