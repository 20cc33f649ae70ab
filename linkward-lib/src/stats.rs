//! Process-wide statistics.
//!
//! Counters are aggregated behind a reader/writer lock, held only around
//! field updates, never across I/O. Snapshots are value copies; the
//! per-domain map is deep-cloned so callers can never mutate internal
//! state.

use std::collections::HashMap;
use std::sync::{LazyLock, RwLock};

use serde::Serialize;

use crate::types::{CheckResult, CheckStatus, CUSTOM_HTTP_ERROR_CODE};

/// Counters of the link checker service.
#[derive(Debug, Default, Clone, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct Stats {
    /// Batch requests received
    pub incoming_requests: u64,
    /// Chain invocations that performed network I/O
    pub outgoing_requests: u64,
    /// Stream requests received
    pub incoming_stream_requests: u64,
    /// DNS lookups that failed while tracing
    pub dns_resolutions_failed: u64,
    /// Checks that failed below the HTTP layer
    pub link_checks_errored: u64,
    /// Checks that found the URL reachable
    pub link_checks_ok: u64,
    /// Checks that found the URL broken
    pub link_checks_broken: u64,
    /// Checks abandoned by cancellation or a short-circuited stage
    pub link_checks_dropped: u64,
    /// Checks skipped without network I/O
    pub link_checks_skipped: u64,
    /// Lookups answered from the result cache
    pub cache_hits: u64,
    /// Lookups that had to run the pipeline
    pub cache_misses: u64,
}

/// Per-host outcome counters. `broken_because` is keyed by a reason tag:
/// the status-code string for HTTP failures, or one of
/// `dns_resolution_failed`, `dropped`, `skipped`, `errored`.
#[derive(Debug, Default, Clone, Serialize)]
pub struct DomainStats {
    /// Count of successful checks for this host
    #[serde(rename = "Ok")]
    pub ok: u64,
    /// Count of failures for this host, keyed by reason tag
    #[serde(rename = "BrokenBecause")]
    pub broken_because: HashMap<String, u64>,
}

/// The process-wide stats aggregator.
#[derive(Debug, Default)]
pub struct StatsCollector {
    stats: RwLock<Stats>,
    domains: RwLock<HashMap<String, DomainStats>>,
}

static GLOBAL_STATS: LazyLock<StatsCollector> = LazyLock::new(StatsCollector::default);

/// The global stats collector.
#[must_use]
pub fn global_stats() -> &'static StatsCollector {
    &GLOBAL_STATS
}

/// Clears the global stats. Meant for test harnesses only.
pub fn reset_global_stats() {
    global_stats().reset();
}

impl StatsCollector {
    /// Called on an incoming batch request.
    pub fn on_incoming_request(&self) {
        self.stats.write().unwrap().incoming_requests += 1;
    }

    /// Called on an incoming stream request.
    pub fn on_incoming_stream_request(&self) {
        self.stats.write().unwrap().incoming_stream_requests += 1;
    }

    /// Called when a chain invocation goes out to the network.
    pub fn on_outgoing_request(&self) {
        self.stats.write().unwrap().outgoing_requests += 1;
    }

    /// Called on a DNS resolution failure.
    pub fn on_dns_resolution_failed(&self) {
        self.stats.write().unwrap().dns_resolutions_failed += 1;
    }

    /// Called when a result is served from the cache.
    pub fn on_cache_hit(&self) {
        self.stats.write().unwrap().cache_hits += 1;
    }

    /// Called when a URL has to go through the pipeline.
    pub fn on_cache_miss(&self) {
        self.stats.write().unwrap().cache_misses += 1;
    }

    /// Records the outcome of one URL check under its host.
    pub fn record_result(&self, domain: &str, result: &CheckResult) {
        {
            let mut stats = self.stats.write().unwrap();
            match result.status {
                CheckStatus::Ok => stats.link_checks_ok += 1,
                CheckStatus::Broken => stats.link_checks_broken += 1,
                CheckStatus::Dropped => stats.link_checks_dropped += 1,
                CheckStatus::Skipped => stats.link_checks_skipped += 1,
            }
            if is_errored(result) {
                stats.link_checks_errored += 1;
            }
        }

        let mut domains = self.domains.write().unwrap();
        let entry = domains.entry(domain.to_owned()).or_default();
        match result.status {
            CheckStatus::Ok => entry.ok += 1,
            CheckStatus::Skipped => {
                *entry.broken_because.entry("skipped".to_owned()).or_default() += 1;
            }
            CheckStatus::Dropped => {
                *entry.broken_because.entry("dropped".to_owned()).or_default() += 1;
            }
            CheckStatus::Broken => {
                *entry.broken_because.entry(broken_reason(result)).or_default() += 1;
            }
        }
    }

    /// A value copy of the counters.
    #[must_use]
    pub fn get_stats(&self) -> Stats {
        self.stats.read().unwrap().clone()
    }

    /// A deep clone of the per-domain stats.
    #[must_use]
    pub fn get_domain_stats(&self) -> HashMap<String, DomainStats> {
        self.domains.read().unwrap().clone()
    }

    fn reset(&self) {
        *self.stats.write().unwrap() = Stats::default();
        self.domains.write().unwrap().clear();
    }
}

/// Transport-level failures carry the sentinel code and an error message;
/// HTTP-status failures carry their status code instead.
fn is_errored(result: &CheckResult) -> bool {
    result.status == CheckStatus::Broken
        && result.code == CUSTOM_HTTP_ERROR_CODE
        && !result.error.is_empty()
}

fn broken_reason(result: &CheckResult) -> String {
    if result.code == CUSTOM_HTTP_ERROR_CODE {
        if result.error.to_lowercase().contains("dns") {
            "dns_resolution_failed".to_owned()
        } else {
            "errored".to_owned()
        }
    } else {
        result.code.to_string()
    }
}
