//! In-memory result cache with a flat time-to-live.
//!
//! Entries are never evicted proactively: an expired entry is ignored on
//! read and overwritten by the next scan of the same key. Each key has its
//! own slot lock, held across check-scan-write, so two concurrent scans of
//! the same key run the provider calls once.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;

use crate::scan::{AggregateResult, ProviderKind, ServiceSet};

pub const DEFAULT_TTL: Duration = Duration::from_secs(15 * 60);

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    provider: ProviderKind,
    account: String,
    services: String,
}

impl CacheKey {
    pub fn new(provider: ProviderKind, account: &str, services: &ServiceSet) -> Self {
        CacheKey {
            provider,
            account: account.to_string(),
            services: services.joined(),
        }
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}:{}", self.provider, self.account, self.services)
    }
}

struct CacheEntry {
    value: Arc<AggregateResult>,
    created: Instant,
}

impl CacheEntry {
    fn is_live(&self, ttl: Duration, now: Instant) -> bool {
        now.saturating_duration_since(self.created) < ttl
    }
}

type Slot = Arc<Mutex<Option<CacheEntry>>>;

/// Value returned by [`ResultCache::get_or_try_insert_with`].
#[derive(Debug, Clone)]
pub struct Lookup {
    pub value: Arc<AggregateResult>,
    pub hit: bool,
}

pub struct ResultCache {
    ttl: Duration,
    slots: Mutex<HashMap<CacheKey, Slot>>,
}

impl ResultCache {
    pub fn new(ttl: Duration) -> Self {
        ResultCache {
            ttl,
            slots: Mutex::new(HashMap::new()),
        }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    fn slot(&self, key: &CacheKey) -> Slot {
        Arc::clone(self.slots.lock().entry(key.clone()).or_default())
    }

    pub fn get(&self, key: &CacheKey) -> Option<Arc<AggregateResult>> {
        let slot = self.slots.lock().get(key).cloned()?;
        let entry = slot.lock();
        let live = entry
            .as_ref()
            .filter(|e| e.is_live(self.ttl, Instant::now()))
            .map(|e| Arc::clone(&e.value));
        live
    }

    pub fn put(&self, key: CacheKey, value: Arc<AggregateResult>) {
        let slot = self.slot(&key);
        *slot.lock() = Some(CacheEntry {
            value,
            created: Instant::now(),
        });
    }

    /// Returns the live entry for `key`, or runs `scan` and stores its
    /// result. A failing `scan` leaves the slot untouched.
    pub fn get_or_try_insert_with<E>(
        &self,
        key: CacheKey,
        scan: impl FnOnce() -> Result<AggregateResult, E>,
    ) -> Result<Lookup, E> {
        let slot = self.slot(&key);
        let mut entry = slot.lock();

        if let Some(live) = entry.as_ref().filter(|e| e.is_live(self.ttl, Instant::now())) {
            return Ok(Lookup {
                value: Arc::clone(&live.value),
                hit: true,
            });
        }

        let value = Arc::new(scan()?);
        *entry = Some(CacheEntry {
            value: Arc::clone(&value),
            created: Instant::now(),
        });

        Ok(Lookup { value, hit: false })
    }

    /// Number of keys holding an entry, live or expired.
    pub fn len(&self) -> usize {
        let slots: Vec<Slot> = self.slots.lock().values().cloned().collect();
        slots.iter().filter(|slot| slot.lock().is_some()).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for ResultCache {
    fn default() -> Self {
        ResultCache::new(DEFAULT_TTL)
    }
}
