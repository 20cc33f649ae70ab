//! Request-level fan-out/fan-in.
//!
//! One task per unique URL publishes its result onto an unbuffered
//! channel; the channel closing (all workers done) is the completion
//! signal. The consumer side multiplexes results against the per-request
//! deadline and the cancellation token; duplicates are answered from the
//! canonical result.

use std::cmp;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use linkward_lib::{
    domain_of, global_stats, sanitize_log_input, CheckResult, CheckStatus,
};

use crate::dedup::Deduplicator;
use crate::routes::AppState;
use crate::serialization::{UrlRequest, UrlStatusResponse};

/// Requests above this many URLs get logged.
const LARGE_REQUEST_LOGGING_THRESHOLD: usize = 200;

/// An in-flight batch: the deduplicator, the fan-in channel and the
/// deadline computed for this request.
pub struct CheckRun {
    /// Partitioned request; answers duplicates from canonical results
    pub dedup: Arc<Deduplicator>,
    /// Per-URL results, in completion order; closes when all workers are
    /// done
    pub results: mpsc::Receiver<UrlStatusResponse>,
    /// The per-request deadline
    pub deadline: Duration,
}

/// Deduplicates the request and fans one worker task out per unique URL.
/// The rate limiter, the gate and the cache do the pacing.
#[must_use]
pub fn start_checks(
    state: Arc<AppState>,
    urls: Vec<UrlRequest>,
    token: &CancellationToken,
) -> CheckRun {
    if urls.len() > LARGE_REQUEST_LOGGING_THRESHOLD {
        log::info!("Large request: {} urls", urls.len());
    }

    let dedup = Arc::new(Deduplicator::partition(urls));
    let count = dedup.to_check().len();
    let duplicates = dedup.duplicate_count();
    if duplicates > 0 {
        log::info!("Duplicate URLs found: {duplicates}");
    }

    let deadline = Duration::from_secs(cmp::max(
        state.deadline_floor_secs,
        state.deadline_per_url_secs.saturating_mul(count as u64),
    ));

    let (tx, results) = mpsc::channel(1);
    for request in dedup.to_check().to_vec() {
        let state = Arc::clone(&state);
        let dedup = Arc::clone(&dedup);
        let token = token.clone();
        let tx = tx.clone();
        tokio::spawn(async move {
            let response = check_url(&state, &token, request).await;
            dedup.on_response(&response);
            // the consumer may already have hit its deadline
            let _ = tx.send(response).await;
        });
    }
    // workers hold the only senders; the channel closes when they finish

    CheckRun {
        dedup,
        results,
        deadline,
    }
}

/// Checks one URL: blacklisted hosts are answered without network I/O,
/// everything else goes through the cached checker. Every outcome is
/// recorded in the per-domain stats.
async fn check_url(
    state: &AppState,
    token: &CancellationToken,
    request: UrlRequest,
) -> UrlStatusResponse {
    let host = domain_of(&request.url);

    let result = if state.is_blacklisted(&host) {
        log::debug!("Blacklisted: {}", sanitize_log_input(&request.url));
        CheckResult::skipped("url was blacklisted")
    } else {
        state.checker.check_url(token, &request.url).await
    };

    global_stats().record_result(&host, &result);
    if result.status == CheckStatus::Dropped {
        log::debug!("Dropped: {}", sanitize_log_input(&request.url));
    }
    UrlStatusResponse::from_result(request, &result)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::options::Config;
    use pretty_assertions::assert_eq;

    fn request(context: &str, url: &str) -> UrlRequest {
        UrlRequest {
            context: context.to_owned(),
            url: url.to_owned(),
        }
    }

    async fn fake_state(config: Config) -> Arc<AppState> {
        Arc::new(AppState::from_config(&config).await.unwrap())
    }

    #[tokio::test]
    async fn test_every_url_yields_exactly_one_result() {
        let config = Config {
            url_checker_plugins: vec!["_always_ok".to_owned()],
            ..Config::default()
        };
        let state = fake_state(config).await;
        let token = CancellationToken::new();
        let mut run = start_checks(
            state,
            vec![
                request("1", "https://a.example.com/"),
                request("2", "https://b.example.com/"),
                request("3", "https://c.example.com/"),
            ],
            &token,
        );

        let mut results = Vec::new();
        while let Some(result) = run.results.recv().await {
            results.push(result);
        }
        assert_eq!(results.len(), 3);
        let mut contexts: Vec<_> = results.iter().map(|r| r.context.clone()).collect();
        contexts.sort();
        assert_eq!(contexts, vec!["1", "2", "3"]);
    }

    #[tokio::test]
    async fn test_deadline_scales_with_unique_urls() {
        let config = Config {
            url_checker_plugins: vec!["_always_ok".to_owned()],
            total_request_deadline_timeout_seconds: 10,
            total_request_deadline_timeout_seconds_per_url: 7,
            ..Config::default()
        };
        let state = fake_state(config).await;
        let token = CancellationToken::new();
        let urls = (0..5)
            .map(|i| request(&i.to_string(), &format!("https://h{i}.example.com/")))
            .collect();
        let run = start_checks(state, urls, &token);
        assert_eq!(run.deadline, Duration::from_secs(35));
    }

    #[tokio::test]
    async fn test_blacklisted_urls_skip_the_checker() {
        let config = Config {
            url_checker_plugins: vec!["_always_ok".to_owned()],
            domain_blacklist_globs: vec!["test?atter*.*".to_owned()],
            ..Config::default()
        };
        let state = fake_state(config).await;
        let token = CancellationToken::new();
        let mut run = start_checks(
            state,
            vec![request("1", "https://testpattern.com")],
            &token,
        );
        let result = run.results.recv().await.unwrap();
        assert_eq!(result.status, "skipped");
        assert_eq!(result.http_status, 528);
        assert!(result.error.contains("blacklisted"));
        assert!(result.check_trace.is_empty());
    }
}
