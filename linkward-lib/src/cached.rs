//! The cached checker: the full per-URL pipeline behind one entry point.
//!
//! Lookup order per URL: result cache → global concurrency gate →
//! per-domain rate limiter → checker chain. Fresh results are written back
//! with a TTL derived from their status; `Dropped` results are never
//! cached.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use crate::cache::{build_cache, CacheSettings, ResultCache};
use crate::chain::CheckerChain;
use crate::checker::{build_plugins, CheckerSettings};
use crate::limits::{ConcurrencyGate, DomainRateLimiter, LimitSettings};
use crate::stats::global_stats;
use crate::types::{now_epoch_seconds, CheckResult, CheckStatus};
use crate::Result;

/// A write-through cached URL checker. Cheap to clone; clones share the
/// cache, the gate and the rate limiter.
#[derive(Debug, Clone)]
pub struct CachedChecker {
    cache: Arc<dyn ResultCache>,
    settings: CacheSettings,
    gate: ConcurrencyGate,
    limiter: DomainRateLimiter,
}

impl CachedChecker {
    /// Builds the pipeline: plugins, chain, limits and the cache backend.
    ///
    /// Must run inside a tokio runtime. Fails fast on configuration
    /// errors (unknown plugins, invalid patterns, unreachable PAC script).
    pub async fn new(
        checker: CheckerSettings,
        cache: CacheSettings,
        limits: LimitSettings,
    ) -> Result<Self> {
        let plugins = build_plugins(&checker).await?;
        let chain = CheckerChain::new(plugins)?;
        let limiter = DomainRateLimiter::new(limits.requests_per_second_per_domain, chain);
        let gate = ConcurrencyGate::new(limits.max_concurrent_requests);
        Ok(Self {
            cache: Arc::from(build_cache(&cache)),
            settings: cache,
            gate,
            limiter,
        })
    }

    /// Checks one URL, consulting and updating the result cache.
    pub async fn check_url(&self, token: &CancellationToken, url: &str) -> CheckResult {
        if let Some(cached) = self.cache.get(url) {
            // failures could have been temporary: only reuse them within
            // the retry-after grace window
            if self.should_take_cached(&cached) {
                global_stats().on_cache_hit();
                return cached;
            }
        }
        global_stats().on_cache_miss();

        let limiter = self.limiter.clone();
        let worker_token = token.clone();
        let worker_url = url.to_owned();
        let res = self
            .gate
            .run(token, async move {
                limiter.check_url(&worker_token, &worker_url).await
            })
            .await;

        let ttl = match res.status {
            CheckStatus::Ok | CheckStatus::Skipped => self.settings.expiration,
            _ => self.settings.retry_failed_after,
        };
        if res.status != CheckStatus::Dropped {
            self.cache.set(url, &res, ttl);
        }
        res
    }

    fn should_take_cached(&self, res: &CheckResult) -> bool {
        res.status == CheckStatus::Ok
            || res.status == CheckStatus::Skipped
            || now_epoch_seconds()
                <= res.fetched_at + self.settings.retry_failed_after.as_secs() as i64
    }
}
