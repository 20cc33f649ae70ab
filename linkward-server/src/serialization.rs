//! Wire types of the check endpoints.

use linkward_lib::{CheckResult, PluginTrace};
use serde::{Deserialize, Serialize};

/// A single URL check request. `context` is opaque and echoed back so
/// callers can correlate results with their own state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UrlRequest {
    /// Echoed back verbatim in the response entry
    #[serde(default)]
    pub context: String,
    /// The URL to check, as received
    pub url: String,
}

/// A bulk URL check request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckUrlsRequest {
    /// The URLs to check
    #[serde(default)]
    pub urls: Vec<UrlRequest>,
}

/// One checker plugin invocation, as reported to clients.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckTraceResponse {
    /// Plugin name
    pub name: String,
    /// HTTP status (or the 528 sentinel) the plugin settled on
    pub code: u16,
    /// Wall time of the invocation
    pub elapsed_ms: u64,
    /// Serialized error, empty when absent
    #[serde(default)]
    pub error: String,
}

/// The response entry for one requested URL.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UrlStatusResponse {
    /// The request's opaque context, echoed back
    #[serde(default)]
    pub context: String,
    /// The URL as it appeared in the request
    pub url: String,
    /// `ok`, `broken`, `skipped` or `dropped`
    pub status: String,
    /// HTTP status received, or 528 when none is available
    pub http_status: u16,
    /// Serialized error, empty when absent
    #[serde(default)]
    pub error: String,
    /// Epoch seconds at which the check was performed
    #[serde(rename = "timestamp")]
    pub fetched_at_epoch_seconds: i64,
    /// Configured body patterns found in the response body
    #[serde(default)]
    pub body_patterns_found: Vec<String>,
    /// Resolved peer address, present when request tracing is enabled
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub remote_addr: String,
    /// Per-plugin execution trace
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub check_trace: Vec<CheckTraceResponse>,
    /// Total wall time across the checker chain
    #[serde(default)]
    pub elapsed_ms: u64,
}

impl UrlStatusResponse {
    /// Projects an internal check result onto the wire, attaching the
    /// originating request's context and URL.
    pub fn from_result(request: UrlRequest, result: &CheckResult) -> Self {
        Self {
            context: request.context,
            url: request.url,
            status: result.status.to_string(),
            http_status: result.code,
            error: result.error.clone(),
            fetched_at_epoch_seconds: result.fetched_at,
            body_patterns_found: result.body_patterns_found.clone(),
            remote_addr: result.remote_addr.clone(),
            check_trace: result.checker_trace.iter().map(CheckTraceResponse::from).collect(),
            elapsed_ms: result.elapsed_ms,
        }
    }
}

impl From<&PluginTrace> for CheckTraceResponse {
    fn from(trace: &PluginTrace) -> Self {
        Self {
            name: trace.name.clone(),
            code: trace.code,
            elapsed_ms: trace.elapsed_ms,
            error: trace.error.clone(),
        }
    }
}

/// The bulk response: per-URL entries plus the overall outcome,
/// `complete`, `partial` or `aborted`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckUrlsResponse {
    /// Per-URL status entries, in completion order
    pub urls: Vec<UrlStatusResponse>,
    /// `complete`, `partial` (deadline hit) or `aborted` (client gone)
    pub result: String,
}
