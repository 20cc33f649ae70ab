//! Global concurrency gate.
//!
//! A bounded semaphore caps the total number of in-flight outbound checks
//! across all incoming requests. Acquisition blocks but observes
//! cancellation; the guarded call runs in its own task so a cancelled
//! caller can abandon it without leaking the permit: the permit travels
//! with the task and is released when the inner check finishes.

use std::future::Future;
use std::sync::Arc;

use tokio::sync::{oneshot, Semaphore};
use tokio_util::sync::CancellationToken;

use crate::types::CheckResult;

#[derive(Debug, Clone)]
pub(crate) struct ConcurrencyGate {
    semaphore: Arc<Semaphore>,
}

impl ConcurrencyGate {
    pub(crate) fn new(max_concurrent: usize) -> Self {
        log::info!("Using max HTTP concurrency of {max_concurrent}");
        Self {
            semaphore: Arc::new(Semaphore::new(max_concurrent)),
        }
    }

    /// Runs `inner` under a permit. Returns a `Dropped` result if the
    /// caller is cancelled while waiting for a permit or for the inner
    /// result.
    pub(crate) async fn run<F>(&self, token: &CancellationToken, inner: F) -> CheckResult
    where
        F: Future<Output = CheckResult> + Send + 'static,
    {
        let permit = tokio::select! {
            permit = Arc::clone(&self.semaphore).acquire_owned() => {
                // the semaphore is never closed
                permit.expect("concurrency gate semaphore closed")
            }
            () = token.cancelled() => {
                log::debug!("guarded request short circuited");
                return CheckResult::dropped("short circuited request");
            }
        };

        let (tx, rx) = oneshot::channel();
        tokio::spawn(async move {
            let _permit = permit;
            // the receiver may be gone when the caller was cancelled
            let _ = tx.send(inner.await);
        });

        tokio::select! {
            res = rx => res.unwrap_or_else(|_| CheckResult::dropped("cancelled request")),
            () = token.cancelled() => CheckResult::dropped("cancelled request"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{CheckStatus, CUSTOM_HTTP_ERROR_CODE};
    use std::time::Duration;

    #[tokio::test]
    async fn test_gate_runs_inner_check() {
        let gate = ConcurrencyGate::new(2);
        let res = gate
            .run(&CancellationToken::new(), async { CheckResult::ok(204) })
            .await;
        assert_eq!(res.code, 204);
    }

    #[tokio::test]
    async fn test_cancelled_acquisition_drops() {
        let gate = ConcurrencyGate::new(1);
        // occupy the only permit
        let blocker = gate.clone();
        let hold = tokio::spawn(async move {
            blocker
                .run(&CancellationToken::new(), async {
                    tokio::time::sleep(Duration::from_secs(5)).await;
                    CheckResult::ok(200)
                })
                .await
        });
        tokio::time::sleep(Duration::from_millis(50)).await;

        let token = CancellationToken::new();
        token.cancel();
        let res = gate
            .run(&token, async { CheckResult::ok(200) })
            .await;
        assert_eq!(res.status, CheckStatus::Dropped);
        assert_eq!(res.code, CUSTOM_HTTP_ERROR_CODE);
        hold.abort();
    }

    #[tokio::test]
    async fn test_cancelled_wait_for_result_drops() {
        let gate = ConcurrencyGate::new(1);
        let token = CancellationToken::new();
        let cancel = token.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            cancel.cancel();
        });
        let res = gate
            .run(&token, async {
                tokio::time::sleep(Duration::from_secs(5)).await;
                CheckResult::ok(200)
            })
            .await;
        assert_eq!(res.status, CheckStatus::Dropped);
    }

    #[tokio::test]
    async fn test_permit_released_after_inner_result() {
        let gate = ConcurrencyGate::new(1);
        for _ in 0..3 {
            let res = gate
                .run(&CancellationToken::new(), async { CheckResult::ok(200) })
                .await;
            assert_eq!(res.status, CheckStatus::Ok);
        }
    }
}
