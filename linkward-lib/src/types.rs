use std::fmt::Display;
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

/// Marker code for "no HTTP status available": transport errors,
/// cancellations, blacklisted URLs and rate-limiter aborts all carry it.
///
/// 528 is outside the IANA-assigned range, so it cannot collide with a
/// status an upstream server actually returned.
pub const CUSTOM_HTTP_ERROR_CODE: u16 = 528;

/// Outcome class of a single URL check.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CheckStatus {
    /// The check was not performed (e.g. the domain is blacklisted)
    Skipped,
    /// The URL is reachable
    Ok,
    /// The URL cannot be accessed
    Broken,
    /// The check was abandoned for an internal reason (cancellation,
    /// short-circuited concurrency gate); never cached
    Dropped,
}

impl Display for CheckStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            CheckStatus::Skipped => "skipped",
            CheckStatus::Ok => "ok",
            CheckStatus::Broken => "broken",
            CheckStatus::Dropped => "dropped",
        };
        f.write_str(s)
    }
}

/// Execution record of one checker plugin invocation, carried on the final
/// result in invocation order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PluginTrace {
    /// Plugin name as configured
    pub name: String,
    /// HTTP status (or [`CUSTOM_HTTP_ERROR_CODE`]) the plugin settled on
    pub code: u16,
    /// Wall time of this invocation
    pub elapsed_ms: u64,
    /// Serialized error, empty if the invocation produced none
    pub error: String,
}

/// The outcome of one URL validation, independent of caching.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckResult {
    /// Outcome class
    pub status: CheckStatus,
    /// HTTP status, or [`CUSTOM_HTTP_ERROR_CODE`] when none is available
    pub code: u16,
    /// Serialized error, empty when absent
    pub error: String,
    /// Epoch seconds at which the result was produced
    pub fetched_at: i64,
    /// Names of the configured body patterns found in the response body,
    /// in configuration order
    pub body_patterns_found: Vec<String>,
    /// Resolved peer address; empty unless request tracing is enabled
    pub remote_addr: String,
    /// Per-plugin execution records
    pub checker_trace: Vec<PluginTrace>,
    /// Total wall time across the checker chain
    pub elapsed_ms: u64,
}

impl CheckResult {
    fn with_status(status: CheckStatus, code: u16, error: String) -> Self {
        Self {
            status,
            code,
            error,
            fetched_at: now_epoch_seconds(),
            body_patterns_found: Vec::new(),
            remote_addr: String::new(),
            checker_trace: Vec::new(),
            elapsed_ms: 0,
        }
    }

    /// A successful result with the given HTTP status.
    #[must_use]
    pub fn ok(code: u16) -> Self {
        Self::with_status(CheckStatus::Ok, code, String::new())
    }

    /// A failed result with the given HTTP status (or sentinel) and error.
    #[must_use]
    pub fn broken(code: u16, error: impl Into<String>) -> Self {
        Self::with_status(CheckStatus::Broken, code, error.into())
    }

    /// A non-result produced by cancellation or a short-circuited stage.
    #[must_use]
    pub fn dropped(error: impl Into<String>) -> Self {
        Self::with_status(CheckStatus::Dropped, CUSTOM_HTTP_ERROR_CODE, error.into())
    }

    /// A non-result for a URL the service refuses to check.
    #[must_use]
    pub fn skipped(error: impl Into<String>) -> Self {
        Self::with_status(CheckStatus::Skipped, CUSTOM_HTTP_ERROR_CODE, error.into())
    }
}

/// Current UNIX timestamp in seconds.
#[must_use]
pub fn now_epoch_seconds() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or_default()
}
