//! Azure service table.
//!
//! Scopes are resource groups that hold at least one tracked resource type;
//! groups with nothing we list are skipped so they cost no calls. The
//! subscription is either supplied by the caller or the CLI default.

use serde_json::Value;

use super::provider::{ApiCall, CategoryDef, CloudApi, Provider, Reach, ServiceDef};
use super::records::{field, record, top_level};
use super::{ProviderKind, ResourceRecord, ScanScope};
use crate::error::ServiceCallError;

pub struct Azure;

pub static AZURE: Azure = Azure;

/// Resource types that make a resource group worth scanning.
pub const TRACKED_TYPES: &[&str] = &[
    "Microsoft.Compute/virtualMachines",
    "Microsoft.Web/sites",
    "Microsoft.Storage/storageAccounts",
    "Microsoft.ContainerService/managedClusters",
    "Microsoft.DocumentDB/databaseAccounts",
    "Microsoft.Sql/servers",
];

const DEFAULT_SERVICES: &[&str] = &["compute", "storage", "web", "container", "cosmos", "sql", "groups"];

static SERVICES: &[ServiceDef] = &[
    ServiceDef {
        tag: "compute",
        reach: Reach::Scoped,
        // security groups and vnets are how VMs are reached
        implies: &["network"],
        categories: &[CategoryDef { name: "virtual_machines", list: virtual_machines }],
    },
    ServiceDef {
        tag: "network",
        reach: Reach::Scoped,
        implies: &[],
        categories: &[
            CategoryDef { name: "virtual_networks", list: virtual_networks },
            CategoryDef { name: "network_security_groups", list: network_security_groups },
        ],
    },
    ServiceDef {
        tag: "storage",
        reach: Reach::Scoped,
        implies: &[],
        categories: &[CategoryDef { name: "storage_accounts", list: storage_accounts }],
    },
    ServiceDef {
        tag: "web",
        reach: Reach::Scoped,
        implies: &[],
        categories: &[CategoryDef { name: "web_apps", list: web_apps }],
    },
    ServiceDef {
        tag: "container",
        reach: Reach::Scoped,
        implies: &[],
        categories: &[CategoryDef { name: "aks_clusters", list: aks_clusters }],
    },
    ServiceDef {
        tag: "cosmos",
        reach: Reach::Scoped,
        implies: &[],
        categories: &[CategoryDef { name: "cosmos_db", list: cosmos_db }],
    },
    ServiceDef {
        tag: "sql",
        reach: Reach::Scoped,
        implies: &[],
        categories: &[CategoryDef { name: "sql_servers", list: sql_servers }],
    },
    ServiceDef {
        tag: "groups",
        reach: Reach::Global,
        implies: &[],
        categories: &[CategoryDef { name: "resource_groups", list: resource_groups }],
    },
];

impl Provider for Azure {
    fn kind(&self) -> ProviderKind {
        ProviderKind::Azure
    }

    fn provenance_key(&self) -> &'static str {
        "resource_group"
    }

    fn services(&self) -> &'static [ServiceDef] {
        SERVICES
    }

    fn default_services(&self) -> &'static [&'static str] {
        DEFAULT_SERVICES
    }

    fn resolve_account(
        &self,
        api: &dyn CloudApi,
        requested: Option<&str>,
    ) -> Result<String, ServiceCallError> {
        if let Some(subscription) = requested {
            return Ok(subscription.to_string());
        }

        let account = api.call(&ApiCall::new(&["account", "show"]))?;
        account
            .get("id")
            .and_then(Value::as_str)
            .map(str::to_string)
            .ok_or_else(|| ServiceCallError::Malformed("no default subscription found".to_string()))
    }

    fn enumerate_scopes(&self, api: &dyn CloudApi) -> Result<Vec<ScanScope>, ServiceCallError> {
        active_resource_groups(api)
    }
}

/// Distinct owning groups of tracked resources, in first-seen order.
pub fn active_resource_groups(api: &dyn CloudApi) -> Result<Vec<ScanScope>, ServiceCallError> {
    let resources = api.call(&ApiCall::new(&["resource", "list"]))?;
    let mut groups: Vec<ScanScope> = Vec::new();

    for resource in top_level(&resources)? {
        let Some(kind) = resource.get("type").and_then(Value::as_str) else {
            continue;
        };
        if !TRACKED_TYPES.iter().any(|tracked| tracked.eq_ignore_ascii_case(kind)) {
            continue;
        }

        let group = resource
            .get("id")
            .and_then(Value::as_str)
            .and_then(resource_group_of)
            .or_else(|| resource.get("resourceGroup").and_then(Value::as_str));

        if let Some(group) = group {
            let scope = ScanScope::new(group);
            if !groups.contains(&scope) {
                groups.push(scope);
            }
        }
    }

    Ok(groups)
}

/// `/subscriptions/{sub}/resourceGroups/{group}/providers/...` -> `{group}`
fn resource_group_of(id: &str) -> Option<&str> {
    let mut segments = id.split('/');
    match (segments.nth(3), segments.next()) {
        (Some(marker), Some(group)) if marker.eq_ignore_ascii_case("resourceGroups") && !group.is_empty() => {
            Some(group)
        }
        _ => None,
    }
}

fn resource_groups(api: &dyn CloudApi) -> Result<Vec<ResourceRecord>, ServiceCallError> {
    let active = active_resource_groups(api)?;
    let out = api.call(&ApiCall::new(&["group", "list"]))?;

    Ok(top_level(&out)?
        .iter()
        .filter(|group| {
            group
                .get("name")
                .and_then(Value::as_str)
                .is_some_and(|name| active.iter().any(|scope| scope.as_str() == name))
        })
        .map(|group| {
            record([
                ("name", field(group, "/name")),
                ("location", field(group, "/location")),
                ("tags", field(group, "/tags")),
            ])
        })
        .collect())
}

fn virtual_machines(api: &dyn CloudApi) -> Result<Vec<ResourceRecord>, ServiceCallError> {
    let out = api.call(&ApiCall::new(&["vm", "list"]))?;
    Ok(top_level(&out)?
        .iter()
        .map(|vm| {
            record([
                ("name", field(vm, "/name")),
                ("location", field(vm, "/location")),
                ("vm_size", field(vm, "/hardwareProfile/vmSize")),
                ("os_type", field(vm, "/storageProfile/osDisk/osType")),
                ("tags", field(vm, "/tags")),
            ])
        })
        .collect())
}

fn virtual_networks(api: &dyn CloudApi) -> Result<Vec<ResourceRecord>, ServiceCallError> {
    let out = api.call(&ApiCall::new(&["network", "vnet", "list"]))?;
    Ok(top_level(&out)?
        .iter()
        .map(|vnet| {
            record([
                ("name", field(vnet, "/name")),
                ("location", field(vnet, "/location")),
                ("address_space", field(vnet, "/addressSpace/addressPrefixes")),
                ("tags", field(vnet, "/tags")),
            ])
        })
        .collect())
}

fn network_security_groups(api: &dyn CloudApi) -> Result<Vec<ResourceRecord>, ServiceCallError> {
    let out = api.call(&ApiCall::new(&["network", "nsg", "list"]))?;
    Ok(top_level(&out)?
        .iter()
        .map(|nsg| {
            record([
                ("name", field(nsg, "/name")),
                ("location", field(nsg, "/location")),
                ("tags", field(nsg, "/tags")),
            ])
        })
        .collect())
}

fn storage_accounts(api: &dyn CloudApi) -> Result<Vec<ResourceRecord>, ServiceCallError> {
    let out = api.call(&ApiCall::new(&["storage", "account", "list"]))?;
    Ok(top_level(&out)?
        .iter()
        .map(|account| {
            record([
                ("name", field(account, "/name")),
                ("location", field(account, "/location")),
                ("sku", field(account, "/sku/name")),
                ("kind", field(account, "/kind")),
                ("tags", field(account, "/tags")),
            ])
        })
        .collect())
}

fn web_apps(api: &dyn CloudApi) -> Result<Vec<ResourceRecord>, ServiceCallError> {
    let out = api.call(&ApiCall::new(&["webapp", "list"]))?;
    Ok(top_level(&out)?
        .iter()
        .map(|app| {
            record([
                ("name", field(app, "/name")),
                ("location", field(app, "/location")),
                ("state", field(app, "/state")),
                ("tags", field(app, "/tags")),
            ])
        })
        .collect())
}

fn aks_clusters(api: &dyn CloudApi) -> Result<Vec<ResourceRecord>, ServiceCallError> {
    let out = api.call(&ApiCall::new(&["aks", "list"]))?;
    Ok(top_level(&out)?
        .iter()
        .map(|cluster| {
            record([
                ("name", field(cluster, "/name")),
                ("location", field(cluster, "/location")),
                ("kubernetes_version", field(cluster, "/kubernetesVersion")),
                ("tags", field(cluster, "/tags")),
            ])
        })
        .collect())
}

fn cosmos_db(api: &dyn CloudApi) -> Result<Vec<ResourceRecord>, ServiceCallError> {
    let out = api.call(&ApiCall::new(&["cosmosdb", "list"]))?;
    Ok(top_level(&out)?
        .iter()
        .map(|account| {
            record([
                ("name", field(account, "/name")),
                ("location", field(account, "/location")),
                ("kind", field(account, "/kind")),
                ("tags", field(account, "/tags")),
            ])
        })
        .collect())
}

/// Servers with their databases nested, one extra call per server.
fn sql_servers(api: &dyn CloudApi) -> Result<Vec<ResourceRecord>, ServiceCallError> {
    let out = api.call(&ApiCall::new(&["sql", "server", "list"]))?;
    let mut servers = Vec::new();

    for server in top_level(&out)? {
        let name = server
            .get("name")
            .and_then(Value::as_str)
            .ok_or_else(|| ServiceCallError::Malformed("sql server without a name".to_string()))?;

        let dbs = api.call(&ApiCall::new(&["sql", "db", "list"]).arg("--server", name))?;
        let databases = top_level(&dbs)?
            .iter()
            .map(|db| {
                Value::Object(record([
                    ("name", field(db, "/name")),
                    ("status", field(db, "/status")),
                    ("max_size_bytes", field(db, "/maxSizeBytes")),
                ]))
            })
            .collect();

        servers.push(record([
            ("name", Value::String(name.to_string())),
            ("location", field(server, "/location")),
            ("version", field(server, "/version")),
            ("databases", Value::Array(databases)),
            ("tags", field(server, "/tags")),
        ]));
    }

    Ok(servers)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::collections::HashMap;

    /// Routes calls by operation name.
    struct Routes(HashMap<String, Value>);

    impl Routes {
        fn new(routes: &[(&str, Value)]) -> Self {
            Routes(routes.iter().map(|(op, v)| (op.to_string(), v.clone())).collect())
        }
    }

    impl CloudApi for Routes {
        fn call(&self, call: &ApiCall) -> Result<Value, ServiceCallError> {
            let mut key = call.operation();
            if !call.args.is_empty() {
                key = format!("{key} {}", call.args.join(" "));
            }
            self.0
                .get(&key)
                .cloned()
                .ok_or_else(|| ServiceCallError::CommandFailed { program: "az".into(), stderr: key })
        }
    }

    fn resource(group: &str, kind: &str) -> Value {
        json!({
            "id": format!("/subscriptions/sub-1/resourceGroups/{group}/providers/{kind}/thing"),
            "type": kind,
        })
    }

    #[test]
    fn active_groups_are_filtered_and_first_seen() {
        let api = Routes::new(&[(
            "resource list",
            json!([
                resource("rg-web", "Microsoft.Web/sites"),
                resource("rg-dns", "Microsoft.Network/dnszones"),
                resource("rg-data", "Microsoft.Sql/servers"),
                resource("rg-web", "Microsoft.Storage/storageAccounts"),
                resource("rg-vm", "microsoft.compute/virtualmachines"),
            ]),
        )]);

        let groups = active_resource_groups(&api).unwrap();
        let names: Vec<_> = groups.iter().map(ScanScope::as_str).collect();
        assert_eq!(names, ["rg-web", "rg-data", "rg-vm"]);
    }

    #[test]
    fn resource_group_parsed_from_id() {
        assert_eq!(
            resource_group_of("/subscriptions/s/resourceGroups/prod-rg/providers/Microsoft.Web/sites/app"),
            Some("prod-rg")
        );
        assert_eq!(resource_group_of("/subscriptions/s"), None);
        assert_eq!(resource_group_of("not-an-id"), None);
    }

    #[test]
    fn requested_subscription_skips_lookup() {
        let api = Routes::new(&[]);
        assert_eq!(AZURE.resolve_account(&api, Some("sub-9")).unwrap(), "sub-9");

        let api = Routes::new(&[("account show", json!({"id": "sub-default", "isDefault": true}))]);
        assert_eq!(AZURE.resolve_account(&api, None).unwrap(), "sub-default");
    }

    #[test]
    fn sql_servers_nest_databases() {
        let api = Routes::new(&[
            ("sql server list", json!([{"name": "sql-1", "location": "westeurope", "version": "12.0"}])),
            (
                "sql db list --server sql-1",
                json!([{"name": "orders", "status": "Online", "maxSizeBytes": 1073741824}]),
            ),
        ]);

        let servers = sql_servers(&api).unwrap();
        assert_eq!(servers.len(), 1);
        assert_eq!(servers[0]["databases"][0]["status"], json!("Online"));
        assert_eq!(servers[0]["tags"], Value::Null);
    }

    #[test]
    fn resource_groups_only_lists_active_ones() {
        let api = Routes::new(&[
            ("resource list", json!([resource("rg-web", "Microsoft.Web/sites")])),
            (
                "group list",
                json!([
                    {"name": "rg-web", "location": "eastus", "tags": {"team": "web"}},
                    {"name": "rg-empty", "location": "eastus"}
                ]),
            ),
        ]);

        let groups = resource_groups(&api).unwrap();
        assert_eq!(groups.len(), 1);
        assert_eq!(groups[0]["tags"]["team"], json!("web"));
    }

    #[test]
    fn vm_fields_follow_nested_profiles() {
        let api = Routes::new(&[(
            "vm list",
            json!([{
                "name": "vm-1", "location": "eastus",
                "hardwareProfile": {"vmSize": "Standard_B2s"},
                "storageProfile": {"osDisk": {"osType": "Linux"}}
            }]),
        )]);

        let vms = virtual_machines(&api).unwrap();
        assert_eq!(vms[0]["vm_size"], json!("Standard_B2s"));
        assert_eq!(vms[0]["os_type"], json!("Linux"));
    }

    #[test]
    fn compute_implies_network() {
        assert_eq!(AZURE.service("compute").unwrap().implies, ["network"]);
    }
}
