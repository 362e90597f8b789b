//! Fans a scan out across every scope of an account and merges the results.
//!
//! Scope tasks run on one long-lived [`rayon::ThreadPool`] shared by all
//! scans, so the pool size is the concurrency bound for provider calls.
//! Results come back over a channel in completion order and are merged on
//! the calling thread only, which is therefore the single writer of the
//! aggregate.
//!
//! Every client is bound with a deadline of `scope_timeout` from when its
//! task starts. Clients that honour it kill hung calls, so a stuck scope
//! gives its worker back instead of starving later scans.

use std::collections::{HashMap, HashSet};
use std::panic::{self, AssertUnwindSafe};
use std::sync::{mpsc, Arc};
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use rayon::{ThreadPool, ThreadPoolBuilder};
use serde_json::Value;
use tracing::{debug, error, info, warn};

use super::provider::{self, ApiCall, Binding, CloudApi, Connector, Provider};
use super::{scanner, AggregateResult, PartialResult, ScanScope, ScopeStatus, ServiceSet};
use crate::cache::{CacheKey, ResultCache};
use crate::error::{ScanError, ScopeInitError, ServiceCallError};

pub const DEFAULT_MAX_WORKERS: usize = 10;
pub const DEFAULT_SCOPE_TIMEOUT: Duration = Duration::from_secs(120);

/// Extra wait past a scope's deadline so a client that killed its call can
/// still report the failure.
const DEADLINE_GRACE: Duration = Duration::from_millis(500);

/// Everything needed to reach one cloud account.
#[derive(Clone)]
pub struct AccountContext {
    pub provider: &'static dyn Provider,
    pub connector: Arc<dyn Connector>,
    /// AWS profile or Azure subscription; `None` uses the tool's default.
    pub account: Option<String>,
}

impl AccountContext {
    pub fn new(
        provider: &'static dyn Provider,
        connector: Arc<dyn Connector>,
        account: Option<String>,
    ) -> Self {
        AccountContext {
            provider,
            connector,
            account,
        }
    }

    /// Cache label for the account. Computed without any provider call so a
    /// cache hit costs nothing.
    pub fn label(&self) -> &str {
        self.account.as_deref().unwrap_or("default")
    }
}

#[derive(Debug, Clone)]
pub struct ScanOutcome {
    pub result: Arc<AggregateResult>,
    pub cached: bool,
}

/// Account client for one scan. Identical successful calls are answered
/// once, so the account-wide pass and scope enumeration can share a
/// subscription-wide listing.
struct Memoized {
    inner: Arc<dyn CloudApi>,
    answers: Mutex<HashMap<ApiCall, Value>>,
}

impl Memoized {
    fn new(inner: Arc<dyn CloudApi>) -> Self {
        Memoized {
            inner,
            answers: Mutex::new(HashMap::new()),
        }
    }
}

impl CloudApi for Memoized {
    fn call(&self, call: &ApiCall) -> Result<Value, ServiceCallError> {
        if let Some(answer) = self.answers.lock().get(call) {
            return Ok(answer.clone());
        }

        let answer = self.inner.call(call)?;
        self.answers.lock().insert(call.clone(), answer.clone());
        Ok(answer)
    }
}

type TaskResult = (ScanScope, std::thread::Result<Result<PartialResult, ScopeInitError>>);

pub struct Coordinator {
    pool: Arc<ThreadPool>,
    cache: Arc<ResultCache>,
    scope_timeout: Duration,
}

impl Coordinator {
    pub fn new(pool: Arc<ThreadPool>, cache: Arc<ResultCache>, scope_timeout: Duration) -> Self {
        Coordinator {
            pool,
            cache,
            scope_timeout,
        }
    }

    /// Builds the shared worker pool. Call once at startup.
    pub fn build_pool(max_workers: usize) -> Result<Arc<ThreadPool>, rayon::ThreadPoolBuildError> {
        ThreadPoolBuilder::new()
            .num_threads(max_workers.max(1))
            .thread_name(|idx| format!("scope-worker-{idx}"))
            .build()
            .map(Arc::new)
    }

    pub fn cache(&self) -> &ResultCache {
        &self.cache
    }

    /// Scans `account` for `requested` services, serving a live cache entry
    /// when there is one.
    ///
    /// Only unknown service tags and scope discovery failures are errors.
    /// Everything else degrades into failure entries on the aggregate.
    pub fn scan(&self, account: &AccountContext, requested: &[String]) -> Result<ScanOutcome, ScanError> {
        let services = ServiceSet::resolve(account.provider, requested)?;
        let key = CacheKey::new(account.provider.kind(), account.label(), &services);

        let lookup = self
            .cache
            .get_or_try_insert_with(key.clone(), || self.run_scan(account, services))?;

        if lookup.hit {
            info!(%key, "serving cached scan result");
        }

        Ok(ScanOutcome {
            result: lookup.value,
            cached: lookup.hit,
        })
    }

    fn run_scan(&self, account: &AccountContext, services: ServiceSet) -> Result<AggregateResult, ScanError> {
        let started = Instant::now();
        let provider = account.provider;
        let kind = provider.kind();
        let discovery = |reason: String| ScanError::ScopeDiscovery { provider: kind, reason };

        account.connector.probe().map_err(|e| discovery(e.to_string()))?;

        // the account-wide pass gets the same budget as one scope
        let deadline = started.checked_add(self.scope_timeout);

        let api = account
            .connector
            .connect(&Binding::account(account.account.as_deref()).with_deadline(deadline))
            .map_err(|e| discovery(e.to_string()))?;
        let account_id = provider
            .resolve_account(api.as_ref(), account.account.as_deref())
            .map_err(|e| discovery(e.to_string()))?;
        let api = account
            .connector
            .connect(&Binding::account(Some(account_id.as_str())).with_deadline(deadline))
            .map_err(|e| discovery(e.to_string()))?;
        let api = Memoized::new(api);

        info!(provider = %kind, account = %account_id, services = %services.joined(), "starting scan");

        let template = provider::category_names(provider, &services);
        let mut aggregate = AggregateResult::new(kind, account_id.clone(), services.clone(), template);

        let global = scanner::scan_global(provider, &api, &services);
        aggregate.merge(None, global);

        let scopes = provider
            .enumerate_scopes(&api)
            .map_err(|e| discovery(e.to_string()))?;

        self.fan_out(account, &account_id, &services, scopes, &mut aggregate);

        aggregate.duration_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);
        info!(
            provider = %kind,
            resources = aggregate.resource_count(),
            failed_scopes = aggregate.failed_scopes().count(),
            duration_ms = aggregate.duration_ms,
            "scan complete"
        );

        Ok(aggregate)
    }

    fn fan_out(
        &self,
        account: &AccountContext,
        account_id: &str,
        services: &ServiceSet,
        scopes: Vec<ScanScope>,
        aggregate: &mut AggregateResult,
    ) {
        if scopes.is_empty() {
            debug!("no scopes to scan");
            return;
        }

        let workers = scopes.len().min(self.pool.current_num_threads());
        debug!(scopes = scopes.len(), workers, "dispatching scope tasks");

        let (tx, rx) = mpsc::channel::<TaskResult>();

        for scope in &scopes {
            let tx = tx.clone();
            let provider = account.provider;
            let connector = Arc::clone(&account.connector);
            let account_id = account_id.to_string();
            let services = services.clone();
            let scope = scope.clone();
            let scope_timeout = self.scope_timeout;

            self.pool.spawn(move || {
                // measured from when the task starts, not when it was queued
                let deadline = Instant::now().checked_add(scope_timeout);
                let outcome = panic::catch_unwind(AssertUnwindSafe(|| {
                    scanner::scan_scope(provider, connector.as_ref(), &account_id, &scope, &services, deadline)
                }));
                // the receiver is gone once the coordinator gave up on us
                let _ = tx.send((scope, outcome));
            });
        }
        drop(tx);

        let mut pending: HashSet<ScanScope> = scopes.into_iter().collect();

        let wait = self.scope_timeout.saturating_add(DEADLINE_GRACE);

        while !pending.is_empty() {
            match rx.recv_timeout(wait) {
                Ok((scope, outcome)) => {
                    pending.remove(&scope);
                    match outcome {
                        Ok(Ok(partial)) => {
                            aggregate.merge(Some(&scope), partial);
                            aggregate.record_scope(scope, ScopeStatus::Completed);
                        }
                        Ok(Err(e)) => {
                            warn!(scope = %scope, error = %e, "could not open scope");
                            aggregate.record_scope(scope, ScopeStatus::Failed { reason: e.to_string() });
                        }
                        Err(_) => {
                            error!(scope = %scope, "scope task panicked");
                            aggregate.record_scope(
                                scope,
                                ScopeStatus::Failed {
                                    reason: "scope task panicked".to_string(),
                                },
                            );
                        }
                    }
                }
                Err(mpsc::RecvTimeoutError::Timeout) => {
                    let reason = format!(
                        "no result within {}",
                        humantime::format_duration(self.scope_timeout)
                    );
                    for scope in pending.drain() {
                        warn!(scope = %scope, "scope timed out");
                        aggregate.record_scope(scope, ScopeStatus::Failed { reason: reason.clone() });
                    }
                }
                Err(mpsc::RecvTimeoutError::Disconnected) => {
                    for scope in pending.drain() {
                        error!(scope = %scope, "scope task vanished");
                        aggregate.record_scope(
                            scope,
                            ScopeStatus::Failed {
                                reason: "scope task vanished".to_string(),
                            },
                        );
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ServiceCallError;
    use crate::scan::aws::AWS;
    use crate::scan::provider::{ApiCall, CloudApi};
    use serde_json::{json, Value};
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Every region lists two EKS clusters after a short delay; tracks how
    /// many listings run at once.
    struct SlowConnector {
        regions: usize,
        in_flight: AtomicUsize,
        peak: AtomicUsize,
        delay: Duration,
        deadlines: Mutex<Vec<Option<Instant>>>,
    }

    struct SlowApi {
        connector: Arc<SlowConnector>,
        scoped: bool,
    }

    impl CloudApi for SlowApi {
        fn call(&self, call: &ApiCall) -> Result<Value, ServiceCallError> {
            match call.command {
                ["sts", "get-caller-identity"] => Ok(json!({"Account": "111122223333"})),
                ["ec2", "describe-regions"] => Ok(json!({
                    "Regions": (0..self.connector.regions)
                        .map(|i| json!({"RegionName": format!("region-{i}")}))
                        .collect::<Vec<_>>()
                })),
                ["eks", "list-clusters"] if self.scoped => {
                    let now = self.connector.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
                    self.connector.peak.fetch_max(now, Ordering::SeqCst);
                    std::thread::sleep(self.connector.delay);
                    self.connector.in_flight.fetch_sub(1, Ordering::SeqCst);
                    Ok(json!({"clusters": ["a", "b"]}))
                }
                other => Err(ServiceCallError::Malformed(format!("unexpected call {other:?}"))),
            }
        }
    }

    struct Shared(Arc<SlowConnector>);

    impl Connector for Shared {
        fn connect(&self, binding: &Binding<'_>) -> Result<Arc<dyn CloudApi>, ScopeInitError> {
            self.0.deadlines.lock().push(binding.deadline);
            Ok(Arc::new(SlowApi {
                connector: Arc::clone(&self.0),
                scoped: binding.scope.is_some(),
            }))
        }
    }

    fn context(regions: usize, delay: Duration) -> (AccountContext, Arc<SlowConnector>) {
        let inner = Arc::new(SlowConnector {
            regions,
            in_flight: AtomicUsize::new(0),
            peak: AtomicUsize::new(0),
            delay,
            deadlines: Mutex::new(Vec::new()),
        });
        let ctx = AccountContext::new(&AWS, Arc::new(Shared(Arc::clone(&inner))), None);
        (ctx, inner)
    }

    fn coordinator(workers: usize, timeout: Duration) -> Coordinator {
        Coordinator::new(
            Coordinator::build_pool(workers).unwrap(),
            Arc::new(ResultCache::default()),
            timeout,
        )
    }

    #[test]
    fn concurrency_is_bounded_by_pool_size() {
        let (ctx, inner) = context(12, Duration::from_millis(30));
        let coordinator = coordinator(3, DEFAULT_SCOPE_TIMEOUT);

        let outcome = coordinator.scan(&ctx, &["eks".to_string()]).unwrap();

        assert_eq!(outcome.result.records("eks_clusters").len(), 24);
        assert_eq!(outcome.result.scopes.len(), 12);
        assert!(inner.peak.load(Ordering::SeqCst) <= 3);
    }

    #[test]
    fn slow_scopes_are_reported_as_timed_out() {
        let (ctx, _inner) = context(2, Duration::from_secs(2));
        let coordinator = coordinator(2, Duration::from_millis(20));

        let outcome = coordinator.scan(&ctx, &["eks".to_string()]).unwrap();

        assert_eq!(outcome.result.failed_scopes().count(), 2);
        assert!(outcome.result.records("eks_clusters").is_empty());
    }

    #[test]
    fn every_client_is_bound_with_a_deadline() {
        let (ctx, inner) = context(3, Duration::ZERO);
        let timeout = Duration::from_secs(5);
        let coordinator = coordinator(2, timeout);

        let before = Instant::now();
        coordinator.scan(&ctx, &["eks".to_string()]).unwrap();
        let after = Instant::now();

        let deadlines = inner.deadlines.lock();
        // two account clients, then one per region
        assert_eq!(deadlines.len(), 5);
        for deadline in deadlines.iter() {
            let deadline = deadline.expect("client bound without a deadline");
            assert!(deadline >= before + timeout);
            assert!(deadline <= after + timeout);
        }
    }

    struct Counting {
        calls: AtomicUsize,
    }

    impl CloudApi for Counting {
        fn call(&self, call: &ApiCall) -> Result<Value, ServiceCallError> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst);
            match call.command {
                ["resource", "list"] => Ok(json!([{"n": n}])),
                _ => Err(ServiceCallError::Malformed("flaky".into())),
            }
        }
    }

    #[test]
    fn account_client_answers_repeated_calls_once() {
        let inner = Arc::new(Counting { calls: AtomicUsize::new(0) });
        let api = Memoized::new(Arc::clone(&inner) as Arc<dyn CloudApi>);
        let list = ApiCall::new(&["resource", "list"]);

        assert_eq!(api.call(&list).unwrap(), api.call(&list).unwrap());
        assert_eq!(inner.calls.load(Ordering::SeqCst), 1);

        // failures are not remembered
        let groups = ApiCall::new(&["group", "list"]);
        assert!(api.call(&groups).is_err());
        assert!(api.call(&groups).is_err());
        assert_eq!(inner.calls.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn zero_scopes_still_cached() {
        let (ctx, _inner) = context(0, Duration::ZERO);
        let coordinator = coordinator(2, DEFAULT_SCOPE_TIMEOUT);

        let first = coordinator.scan(&ctx, &["eks".to_string()]).unwrap();
        assert!(!first.cached);
        assert!(first.result.categories.contains_key("eks_clusters"));
        assert_eq!(first.result.resource_count(), 0);

        let second = coordinator.scan(&ctx, &["eks".to_string()]).unwrap();
        assert!(second.cached);
        assert!(Arc::ptr_eq(&first.result, &second.result));
    }

    #[test]
    fn label_defaults_when_account_unset() {
        let (ctx, _inner) = context(0, Duration::ZERO);
        assert_eq!(ctx.label(), "default");
    }
}
