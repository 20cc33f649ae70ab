use std::time::Duration;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::chain::CheckerPlugin;
use crate::types::{now_epoch_seconds, CheckResult};

/// Deterministic checker for tests: always returns a fixed result, after an
/// optional delay for URLs containing `delay.com`. Aborts the chain.
#[derive(Debug)]
pub(crate) struct FakeChecker {
    name: &'static str,
    delay: Duration,
    result: CheckResult,
}

impl FakeChecker {
    pub(crate) fn new(name: &'static str, delay: Duration, result: CheckResult) -> Self {
        Self {
            name,
            delay,
            result,
        }
    }
}

#[async_trait]
impl CheckerPlugin for FakeChecker {
    fn name(&self) -> &str {
        self.name
    }

    async fn check(
        &self,
        _token: &CancellationToken,
        url: &str,
        _last: Option<CheckResult>,
    ) -> (CheckResult, bool) {
        if !self.delay.is_zero() && url.contains("delay.com") {
            tokio::time::sleep(self.delay).await;
        }
        let mut res = self.result.clone();
        res.fetched_at = now_epoch_seconds();
        (res, true)
    }
}
