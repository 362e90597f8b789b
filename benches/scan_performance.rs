use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use serde_json::{json, Value};
use skyscan::cache::ResultCache;
use skyscan::error::{ScopeInitError, ServiceCallError};
use skyscan::scan::aws::AWS;
use skyscan::scan::coordinator::{AccountContext, Coordinator};
use skyscan::scan::provider::{ApiCall, Binding, CloudApi, Connector};
use skyscan::scan::{
    AggregateResult, CategoryOutcome, PartialResult, ProviderKind, ResourceRecord, ScanScope, ServiceSet,
};
use skyscan::store::diff;
use std::sync::Arc;
use std::time::Duration;

/// Synthetic accounts of configurable width
mod fixtures {
    use super::*;

    pub fn instance(scope: &str, i: usize) -> ResourceRecord {
        let mut r = ResourceRecord::new();
        r.insert("instance_id".into(), json!(format!("i-{scope}-{i:05}")));
        r.insert("instance_type".into(), json!("m5.large"));
        r.insert("state".into(), json!("running"));
        r.insert("region".into(), json!(scope));
        r
    }

    pub fn partial(scope: &str, records: usize) -> PartialResult {
        let mut partial = PartialResult::default();
        partial.insert(
            "ec2_instances",
            CategoryOutcome::Listed((0..records).map(|i| instance(scope, i)).collect()),
        );
        partial.insert("vpcs", CategoryOutcome::Listed(Vec::new()));
        partial.insert("security_groups", CategoryOutcome::Failed { reason: "throttled".into() });
        partial
    }

    pub fn aggregate(scopes: usize, records: usize) -> AggregateResult {
        let mut agg = AggregateResult::new(
            ProviderKind::Aws,
            "123456789012",
            ServiceSet::from_tags(["ec2"]),
            ["ec2_instances", "vpcs", "security_groups"],
        );
        for s in 0..scopes {
            let scope = ScanScope::new(format!("region-{s}"));
            agg.merge(Some(&scope), partial(scope.as_str(), records));
        }
        agg
    }

    /// Account answering every call from memory.
    pub struct Account {
        pub regions: usize,
        pub instances: usize,
    }

    struct Api {
        regions: usize,
        instances: usize,
        region: Option<String>,
    }

    impl CloudApi for Api {
        fn call(&self, call: &ApiCall) -> Result<Value, ServiceCallError> {
            let region = self.region.as_deref().unwrap_or("global");
            match call.command {
                ["sts", "get-caller-identity"] => Ok(json!({"Account": "123456789012"})),
                ["ec2", "describe-regions"] => Ok(json!({
                    "Regions": (0..self.regions).map(|r| json!({"RegionName": format!("region-{r}")})).collect::<Vec<_>>()
                })),
                ["ec2", "describe-instances"] => Ok(json!({
                    "Reservations": [{
                        "Instances": (0..self.instances)
                            .map(|i| json!({"InstanceId": format!("i-{region}-{i}"), "State": {"Name": "running"}}))
                            .collect::<Vec<_>>()
                    }]
                })),
                _ => Ok(json!({"Vpcs": [], "SecurityGroups": []})),
            }
        }
    }

    impl Connector for Account {
        fn connect(&self, binding: &Binding<'_>) -> Result<Arc<dyn CloudApi>, ScopeInitError> {
            Ok(Arc::new(Api {
                regions: self.regions,
                instances: self.instances,
                region: binding.scope.map(|s| s.to_string()),
            }))
        }
    }
}

fn bench_merge(c: &mut Criterion) {
    let mut group = c.benchmark_group("merge_scopes");

    for scopes in [4, 17, 64] {
        let partials: Vec<(ScanScope, PartialResult)> = (0..scopes)
            .map(|s| {
                let scope = ScanScope::new(format!("region-{s}"));
                let partial = fixtures::partial(scope.as_str(), 200);
                (scope, partial)
            })
            .collect();

        group.bench_with_input(BenchmarkId::new("scopes", scopes), &partials, |b, partials| {
            b.iter(|| {
                let mut agg = fixtures::aggregate(0, 0);
                for (scope, partial) in partials.iter().cloned() {
                    agg.merge(Some(&scope), partial);
                }
                black_box(agg.resource_count())
            });
        });
    }

    group.finish();
}

fn bench_full_scan(c: &mut Criterion) {
    let mut group = c.benchmark_group("coordinator_scan");
    let pool = Coordinator::build_pool(8).unwrap();

    for regions in [1, 17, 32] {
        let account = AccountContext::new(
            &AWS,
            Arc::new(fixtures::Account { regions, instances: 50 }),
            None,
        );
        let services = vec!["ec2".to_string()];

        group.bench_with_input(BenchmarkId::new("regions", regions), &regions, |b, _| {
            b.iter(|| {
                // zero ttl: every iteration is a real fan-out
                let coordinator = Coordinator::new(
                    Arc::clone(&pool),
                    Arc::new(ResultCache::new(Duration::ZERO)),
                    Duration::from_secs(30),
                );
                black_box(coordinator.scan(&account, &services).unwrap())
            });
        });
    }

    group.finish();
}

fn bench_cache_hit(c: &mut Criterion) {
    let coordinator = Coordinator::new(
        Coordinator::build_pool(4).unwrap(),
        Arc::new(ResultCache::new(Duration::from_secs(3600))),
        Duration::from_secs(30),
    );
    let account = AccountContext::new(
        &AWS,
        Arc::new(fixtures::Account { regions: 17, instances: 50 }),
        None,
    );
    let services = vec!["ec2".to_string()];
    coordinator.scan(&account, &services).unwrap();

    c.bench_function("scan_cache_hit", |b| {
        b.iter(|| {
            let outcome = coordinator.scan(&account, black_box(&services)).unwrap();
            assert!(outcome.cached);
            black_box(outcome)
        });
    });
}

fn bench_diff(c: &mut Criterion) {
    let before = fixtures::aggregate(17, 500);
    let mut after = fixtures::aggregate(17, 500);
    // churn: drop a region, add another
    if let Some(section) = after.categories.get_mut("ec2_instances") {
        section.records.retain(|r| r["region"] != json!("region-3"));
    }
    after.merge(Some(&ScanScope::new("region-99")), fixtures::partial("region-99", 500));

    c.bench_function("diff_snapshots", |b| {
        b.iter(|| black_box(diff::compare_results(black_box(&before), black_box(&after), 1, 2, 0, 60)));
    });
}

criterion_group!(benches, bench_merge, bench_full_scan, bench_cache_hit, bench_diff);
criterion_main!(benches);
