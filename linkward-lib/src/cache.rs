//! Result cache backends.
//!
//! Two interchangeable backends sit behind [`ResultCache`]: a TTL map with
//! a periodic cleanup sweep, and a cost-bounded LRU capped by the byte
//! size of its entries. TTLs are assigned per entry at store time; both
//! backends drop expired entries on read.

use std::fmt::Debug;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use lru::LruCache;

use crate::types::CheckResult;

/// Default TTL of successful results.
pub const DEFAULT_CACHE_EXPIRATION: Duration = Duration::from_secs(24 * 60 * 60);
/// Default interval between cleanup sweeps of the TTL map backend.
pub const DEFAULT_CACHE_CLEANUP: Duration = Duration::from_secs(48 * 60 * 60);
/// Default grace period before a failed URL is re-checked.
pub const DEFAULT_RETRY_FAILED_AFTER: Duration = Duration::from_secs(30);
/// Default byte budget of the cost-bounded backend (1 GiB).
pub const DEFAULT_CACHE_MAX_COST: u64 = 1 << 30;

/// Result cache configuration.
#[derive(Debug, Clone)]
pub struct CacheSettings {
    /// TTL of successful results
    pub expiration: Duration,
    /// Interval between cleanup sweeps of the TTL map backend
    pub cleanup_interval: Duration,
    /// Grace period during which a failed result is reused
    pub retry_failed_after: Duration,
    /// Use the cost-bounded backend instead of the TTL map
    pub use_cost_bounded: bool,
    /// Byte budget of the cost-bounded backend
    pub max_cost_bytes: u64,
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self {
            expiration: DEFAULT_CACHE_EXPIRATION,
            cleanup_interval: DEFAULT_CACHE_CLEANUP,
            retry_failed_after: DEFAULT_RETRY_FAILED_AFTER,
            use_cost_bounded: false,
            max_cost_bytes: DEFAULT_CACHE_MAX_COST,
        }
    }
}

/// The two-operation contract both backends implement.
pub(crate) trait ResultCache: Debug + Send + Sync {
    fn get(&self, key: &str) -> Option<CheckResult>;
    fn set(&self, key: &str, result: &CheckResult, ttl: Duration);
}

/// Selects and builds the configured backend.
///
/// Must run inside a tokio runtime: the TTL map backend spawns its sweep
/// task on creation.
pub(crate) fn build_cache(settings: &CacheSettings) -> Box<dyn ResultCache> {
    if settings.use_cost_bounded {
        log::info!(
            "Using the cost-bounded result cache ({} bytes)",
            settings.max_cost_bytes
        );
        Box::new(CostBoundedCache::new(settings.max_cost_bytes))
    } else {
        Box::new(TtlMapCache::new(settings.cleanup_interval))
    }
}

#[derive(Debug, Clone)]
struct CacheSlot {
    result: CheckResult,
    expires_at: Instant,
}

impl CacheSlot {
    fn expired(&self) -> bool {
        self.expires_at <= Instant::now()
    }
}

/// TTL map backend: entries expire individually, a background sweep
/// removes the leftovers.
#[derive(Debug)]
pub(crate) struct TtlMapCache {
    entries: std::sync::Arc<DashMap<String, CacheSlot>>,
}

impl TtlMapCache {
    pub(crate) fn new(cleanup_interval: Duration) -> Self {
        let entries = std::sync::Arc::new(DashMap::new());
        if !cleanup_interval.is_zero() {
            let sweeper = std::sync::Arc::clone(&entries);
            tokio::spawn(async move {
                let mut tick = tokio::time::interval(cleanup_interval);
                // the first tick fires immediately; nothing to sweep yet
                tick.tick().await;
                loop {
                    tick.tick().await;
                    let before = sweeper.len();
                    sweeper.retain(|_, slot: &mut CacheSlot| !slot.expired());
                    let swept = before - sweeper.len();
                    if swept > 0 {
                        log::debug!("Cache cleanup removed {swept} expired entries");
                    }
                }
            });
        }
        Self { entries }
    }
}

impl ResultCache for TtlMapCache {
    fn get(&self, key: &str) -> Option<CheckResult> {
        let slot = self.entries.get(key)?;
        if slot.expired() {
            drop(slot);
            self.entries.remove(key);
            return None;
        }
        Some(slot.result.clone())
    }

    fn set(&self, key: &str, result: &CheckResult, ttl: Duration) {
        self.entries.insert(
            key.to_owned(),
            CacheSlot {
                result: result.clone(),
                expires_at: Instant::now() + ttl,
            },
        );
    }
}

#[derive(Debug)]
struct CostedSlot {
    slot: CacheSlot,
    cost: u64,
}

#[derive(Debug)]
struct CostBoundedInner {
    entries: LruCache<String, CostedSlot>,
    current_cost: u64,
}

/// Cost-bounded backend: total byte cost of the stored entries (key length
/// plus serialized result) stays under the configured budget, evicting the
/// least recently used entries to make room.
#[derive(Debug)]
pub(crate) struct CostBoundedCache {
    inner: Mutex<CostBoundedInner>,
    max_cost: u64,
}

impl CostBoundedCache {
    pub(crate) fn new(max_cost: u64) -> Self {
        Self {
            inner: Mutex::new(CostBoundedInner {
                entries: LruCache::unbounded(),
                current_cost: 0,
            }),
            max_cost,
        }
    }

    fn cost_of(key: &str, result: &CheckResult) -> u64 {
        let serialized = serde_json::to_vec(result).map(|v| v.len()).unwrap_or(0);
        (key.len() + serialized) as u64
    }

    #[cfg(test)]
    fn current_cost(&self) -> u64 {
        self.inner.lock().unwrap().current_cost
    }
}

impl ResultCache for CostBoundedCache {
    fn get(&self, key: &str) -> Option<CheckResult> {
        let mut inner = self.inner.lock().unwrap();
        let expired = match inner.entries.get(key) {
            Some(costed) => costed.slot.expired(),
            None => return None,
        };
        if expired {
            if let Some(costed) = inner.entries.pop(key) {
                inner.current_cost -= costed.cost;
            }
            return None;
        }
        inner
            .entries
            .get(key)
            .map(|costed| costed.slot.result.clone())
    }

    fn set(&self, key: &str, result: &CheckResult, ttl: Duration) {
        let cost = Self::cost_of(key, result);
        if cost > self.max_cost {
            return;
        }
        let mut inner = self.inner.lock().unwrap();
        if let Some(old) = inner.entries.pop(key) {
            inner.current_cost -= old.cost;
        }
        while inner.current_cost + cost > self.max_cost {
            match inner.entries.pop_lru() {
                Some((_, evicted)) => inner.current_cost -= evicted.cost,
                None => break,
            }
        }
        inner.entries.put(
            key.to_owned(),
            CostedSlot {
                slot: CacheSlot {
                    result: result.clone(),
                    expires_at: Instant::now() + ttl,
                },
                cost,
            },
        );
        inner.current_cost += cost;
    }
}
