//! AWS service table.
//!
//! Scopes are regions as returned by `ec2 describe-regions`. The account id
//! comes from `sts get-caller-identity`. S3 is account-wide and is listed
//! once, outside the per-region fan-out.

use serde_json::Value;

use super::provider::{ApiCall, CategoryDef, CloudApi, Provider, Reach, ServiceDef};
use super::records::{array, field, record};
use super::{ProviderKind, ResourceRecord, ScanScope};
use crate::error::ServiceCallError;

pub struct Aws;

pub static AWS: Aws = Aws;

const DEFAULT_SERVICES: &[&str] = &["ec2", "rds", "lambda", "dynamodb", "elasticache", "elb", "eks"];

static SERVICES: &[ServiceDef] = &[
    ServiceDef {
        tag: "ec2",
        reach: Reach::Scoped,
        implies: &[],
        categories: &[
            CategoryDef { name: "ec2_instances", list: ec2_instances },
            CategoryDef { name: "vpcs", list: vpcs },
            CategoryDef { name: "security_groups", list: security_groups },
        ],
    },
    ServiceDef {
        tag: "s3",
        reach: Reach::Global,
        implies: &[],
        categories: &[CategoryDef { name: "s3_buckets", list: s3_buckets }],
    },
    ServiceDef {
        tag: "rds",
        reach: Reach::Scoped,
        implies: &[],
        categories: &[CategoryDef { name: "rds_instances", list: rds_instances }],
    },
    ServiceDef {
        tag: "lambda",
        reach: Reach::Scoped,
        implies: &[],
        categories: &[CategoryDef { name: "lambda_functions", list: lambda_functions }],
    },
    ServiceDef {
        tag: "logs",
        reach: Reach::Scoped,
        implies: &[],
        categories: &[CategoryDef { name: "cloudwatch_logs", list: cloudwatch_logs }],
    },
    ServiceDef {
        tag: "cloudwatch",
        reach: Reach::Scoped,
        implies: &[],
        categories: &[CategoryDef { name: "cloudwatch_alarms", list: cloudwatch_alarms }],
    },
    ServiceDef {
        tag: "dynamodb",
        reach: Reach::Scoped,
        implies: &[],
        categories: &[CategoryDef { name: "dynamodb_tables", list: dynamodb_tables }],
    },
    ServiceDef {
        tag: "elasticache",
        reach: Reach::Scoped,
        implies: &[],
        categories: &[CategoryDef { name: "elasticache_clusters", list: elasticache_clusters }],
    },
    ServiceDef {
        tag: "elb",
        reach: Reach::Scoped,
        implies: &[],
        categories: &[CategoryDef { name: "load_balancers", list: load_balancers }],
    },
    ServiceDef {
        tag: "eks",
        reach: Reach::Scoped,
        implies: &[],
        categories: &[CategoryDef { name: "eks_clusters", list: eks_clusters }],
    },
];

impl Provider for Aws {
    fn kind(&self) -> ProviderKind {
        ProviderKind::Aws
    }

    fn provenance_key(&self) -> &'static str {
        "region"
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
        _requested: Option<&str>,
    ) -> Result<String, ServiceCallError> {
        let identity = api.call(&ApiCall::new(&["sts", "get-caller-identity"]))?;
        identity
            .get("Account")
            .and_then(Value::as_str)
            .map(str::to_string)
            .ok_or_else(|| ServiceCallError::Malformed("caller identity has no Account".to_string()))
    }

    fn enumerate_scopes(&self, api: &dyn CloudApi) -> Result<Vec<ScanScope>, ServiceCallError> {
        let regions = api.call(&ApiCall::new(&["ec2", "describe-regions"]))?;
        array(&regions, "Regions")?
            .iter()
            .map(|region| {
                region
                    .get("RegionName")
                    .and_then(Value::as_str)
                    .map(ScanScope::new)
                    .ok_or_else(|| ServiceCallError::Malformed("region without RegionName".to_string()))
            })
            .collect()
    }
}

fn ec2_instances(api: &dyn CloudApi) -> Result<Vec<ResourceRecord>, ServiceCallError> {
    let out = api.call(&ApiCall::new(&["ec2", "describe-instances"]))?;
    let mut instances = Vec::new();

    for reservation in array(&out, "Reservations")? {
        for instance in array(reservation, "Instances")? {
            instances.push(record([
                ("instance_id", field(instance, "/InstanceId")),
                ("instance_type", field(instance, "/InstanceType")),
                ("state", field(instance, "/State/Name")),
                ("tags", field(instance, "/Tags")),
            ]));
        }
    }

    Ok(instances)
}

fn vpcs(api: &dyn CloudApi) -> Result<Vec<ResourceRecord>, ServiceCallError> {
    let out = api.call(&ApiCall::new(&["ec2", "describe-vpcs"]))?;
    Ok(array(&out, "Vpcs")?
        .iter()
        .map(|vpc| {
            record([
                ("vpc_id", field(vpc, "/VpcId")),
                ("cidr_block", field(vpc, "/CidrBlock")),
                ("tags", field(vpc, "/Tags")),
            ])
        })
        .collect())
}

fn security_groups(api: &dyn CloudApi) -> Result<Vec<ResourceRecord>, ServiceCallError> {
    let out = api.call(&ApiCall::new(&["ec2", "describe-security-groups"]))?;
    Ok(array(&out, "SecurityGroups")?
        .iter()
        .map(|sg| {
            record([
                ("group_id", field(sg, "/GroupId")),
                ("group_name", field(sg, "/GroupName")),
                ("description", field(sg, "/Description")),
                ("vpc_id", field(sg, "/VpcId")),
            ])
        })
        .collect())
}

fn s3_buckets(api: &dyn CloudApi) -> Result<Vec<ResourceRecord>, ServiceCallError> {
    let out = api.call(&ApiCall::new(&["s3api", "list-buckets"]))?;
    Ok(array(&out, "Buckets")?
        .iter()
        .map(|bucket| {
            record([
                ("name", field(bucket, "/Name")),
                ("creation_date", field(bucket, "/CreationDate")),
            ])
        })
        .collect())
}

fn rds_instances(api: &dyn CloudApi) -> Result<Vec<ResourceRecord>, ServiceCallError> {
    let out = api.call(&ApiCall::new(&["rds", "describe-db-instances"]))?;
    Ok(array(&out, "DBInstances")?
        .iter()
        .map(|db| {
            record([
                ("db_identifier", field(db, "/DBInstanceIdentifier")),
                ("engine", field(db, "/Engine")),
                ("status", field(db, "/DBInstanceStatus")),
            ])
        })
        .collect())
}

fn lambda_functions(api: &dyn CloudApi) -> Result<Vec<ResourceRecord>, ServiceCallError> {
    let out = api.call(&ApiCall::new(&["lambda", "list-functions"]))?;
    Ok(array(&out, "Functions")?
        .iter()
        .map(|func| {
            record([
                ("function_name", field(func, "/FunctionName")),
                ("runtime", field(func, "/Runtime")),
            ])
        })
        .collect())
}

fn cloudwatch_logs(api: &dyn CloudApi) -> Result<Vec<ResourceRecord>, ServiceCallError> {
    let out = api.call(&ApiCall::new(&["logs", "describe-log-groups"]))?;
    Ok(array(&out, "logGroups")?
        .iter()
        .map(|group| {
            record([
                ("name", field(group, "/logGroupName")),
                ("retention_days", field(group, "/retentionInDays")),
                ("stored_bytes", field(group, "/storedBytes")),
            ])
        })
        .collect())
}

fn cloudwatch_alarms(api: &dyn CloudApi) -> Result<Vec<ResourceRecord>, ServiceCallError> {
    let out = api.call(&ApiCall::new(&["cloudwatch", "describe-alarms"]))?;
    Ok(array(&out, "MetricAlarms")?
        .iter()
        .map(|alarm| {
            record([
                ("name", field(alarm, "/AlarmName")),
                ("state", field(alarm, "/StateValue")),
                ("metric_name", field(alarm, "/MetricName")),
                ("namespace", field(alarm, "/Namespace")),
            ])
        })
        .collect())
}

fn dynamodb_tables(api: &dyn CloudApi) -> Result<Vec<ResourceRecord>, ServiceCallError> {
    let out = api.call(&ApiCall::new(&["dynamodb", "list-tables"]))?;
    Ok(array(&out, "TableNames")?
        .iter()
        .map(|name| record([("name", name.clone())]))
        .collect())
}

fn elasticache_clusters(api: &dyn CloudApi) -> Result<Vec<ResourceRecord>, ServiceCallError> {
    let out = api.call(&ApiCall::new(&["elasticache", "describe-cache-clusters"]))?;
    Ok(array(&out, "CacheClusters")?
        .iter()
        .map(|cluster| {
            record([
                ("cluster_id", field(cluster, "/CacheClusterId")),
                ("engine", field(cluster, "/Engine")),
                ("status", field(cluster, "/CacheClusterStatus")),
            ])
        })
        .collect())
}

fn load_balancers(api: &dyn CloudApi) -> Result<Vec<ResourceRecord>, ServiceCallError> {
    let out = api.call(&ApiCall::new(&["elbv2", "describe-load-balancers"]))?;
    Ok(array(&out, "LoadBalancers")?
        .iter()
        .map(|lb| {
            record([
                ("arn", field(lb, "/LoadBalancerArn")),
                ("name", field(lb, "/LoadBalancerName")),
                ("type", field(lb, "/Type")),
                ("state", field(lb, "/State/Code")),
                ("dns_name", field(lb, "/DNSName")),
            ])
        })
        .collect())
}

fn eks_clusters(api: &dyn CloudApi) -> Result<Vec<ResourceRecord>, ServiceCallError> {
    let out = api.call(&ApiCall::new(&["eks", "list-clusters"]))?;
    Ok(array(&out, "clusters")?
        .iter()
        .map(|name| record([("name", name.clone())]))
        .collect())
}
