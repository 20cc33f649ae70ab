//! Per-domain politeness limiter.
//!
//! A token bucket per host, created lazily on first use. Buckets live in a
//! concurrent map; first-use insertion goes through the map's entry API so
//! that two concurrent first-uses for the same host converge on a single
//! bucket. With a configured rate of 0 the limiter is bypassed entirely.

use std::num::NonZeroU32;
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use governor::clock::DefaultClock;
use governor::state::{InMemoryState, NotKeyed};
use governor::{Quota, RateLimiter};
use tokio_util::sync::CancellationToken;

use crate::chain::CheckerChain;
use crate::types::CheckResult;
use crate::uri::domain_of;

type DirectRateLimiter = RateLimiter<NotKeyed, InMemoryState, DefaultClock>;

#[derive(Debug)]
struct Inner {
    buckets: DashMap<String, Arc<DirectRateLimiter>>,
    quota: Option<Quota>,
    chain: CheckerChain,
}

/// Domain-rate-limited wrapper around the checker chain.
#[derive(Debug, Clone)]
pub(crate) struct DomainRateLimiter {
    inner: Arc<Inner>,
}

impl DomainRateLimiter {
    pub(crate) fn new(rate_per_second: f64, chain: CheckerChain) -> Self {
        let quota = if rate_per_second > 0.0 {
            log::info!("Limiting amount of requests per domain to {rate_per_second}/s");
            Quota::with_period(Duration::from_secs_f64(1.0 / rate_per_second))
                .map(|q| q.allow_burst(NonZeroU32::new(1).expect("1 is non-zero")))
        } else {
            None
        };
        Self {
            inner: Arc::new(Inner {
                buckets: DashMap::new(),
                quota,
                chain,
            }),
        }
    }

    /// Waits for the host's token (if limiting is enabled), then runs the
    /// chain. A cancelled wait yields a `Dropped` result.
    pub(crate) async fn check_url(&self, token: &CancellationToken, url: &str) -> CheckResult {
        let Some(quota) = self.inner.quota else {
            return self.inner.chain.check(token, url).await;
        };

        let bucket = self.bucket_for(&domain_of(url), quota);
        tokio::select! {
            () = bucket.until_ready() => {}
            () = token.cancelled() => {
                return CheckResult::dropped("domain rate limiter aborted: cancelled");
            }
        }
        self.inner.chain.check(token, url).await
    }

    fn bucket_for(&self, host: &str, quota: Quota) -> Arc<DirectRateLimiter> {
        if let Some(bucket) = self.inner.buckets.get(host) {
            return Arc::clone(&bucket);
        }
        match self.inner.buckets.entry(host.to_owned()) {
            dashmap::mapref::entry::Entry::Occupied(entry) => Arc::clone(entry.get()),
            dashmap::mapref::entry::Entry::Vacant(entry) => {
                Arc::clone(&entry.insert(Arc::new(RateLimiter::direct(quota))))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chain::CheckerChain;
    use crate::checker::FakeChecker;
    use crate::types::CheckStatus;
    use std::time::Instant;

    fn ok_chain() -> CheckerChain {
        CheckerChain::new(vec![Box::new(FakeChecker::new(
            "_always_ok",
            Duration::ZERO,
            CheckResult::ok(200),
        ))])
        .unwrap()
    }

    #[tokio::test]
    async fn test_zero_rate_bypasses_limiter() {
        let limiter = DomainRateLimiter::new(0.0, ok_chain());
        let started = Instant::now();
        for _ in 0..5 {
            let res = limiter
                .check_url(&CancellationToken::new(), "https://example.com/")
                .await;
            assert_eq!(res.status, CheckStatus::Ok);
        }
        assert!(started.elapsed() < Duration::from_millis(500));
    }

    #[tokio::test]
    async fn test_rate_limits_same_host() {
        let limiter = DomainRateLimiter::new(10.0, ok_chain());
        let started = Instant::now();
        for _ in 0..3 {
            limiter
                .check_url(&CancellationToken::new(), "https://example.com/")
                .await;
        }
        // burst 1, then two waits of ~100ms each
        assert!(started.elapsed() >= Duration::from_millis(180));
    }

    #[tokio::test]
    async fn test_concurrent_first_use_converges_on_one_bucket() {
        let limiter = DomainRateLimiter::new(100.0, ok_chain());
        let quota = limiter.inner.quota.unwrap();
        let mut handles = Vec::new();
        for _ in 0..8 {
            let limiter = limiter.clone();
            handles.push(tokio::spawn(async move {
                limiter.bucket_for("example.com", quota);
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }
        assert_eq!(limiter.inner.buckets.len(), 1);
    }

    #[tokio::test]
    async fn test_cancelled_wait_drops() {
        let limiter = DomainRateLimiter::new(0.001, ok_chain());
        // drain the burst token
        let _ = limiter
            .check_url(&CancellationToken::new(), "https://example.com/")
            .await;
        let token = CancellationToken::new();
        token.cancel();
        let res = limiter
            .check_url(&token, "https://example.com/")
            .await;
        assert_eq!(res.status, CheckStatus::Dropped);
        assert!(res.error.contains("domain rate limiter aborted"));
    }
}
