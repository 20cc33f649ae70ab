//! `linkward-lib` is the core of the linkward batch link-validation
//! service: given a URL, it reports whether the URL is reachable, with
//! HTTP status, timing, a per-plugin trace and optional body-pattern
//! matches.
//!
//! The pipeline, innermost layer first:
//!
//! 1. [`chain::CheckerPlugin`]s, the configured checkers. The real one
//!    wraps an HTTP client and falls back from HEAD to a browser-agent
//!    HEAD to GET; deterministic fakes exist for testing.
//! 2. [`chain::CheckerChain`] runs the plugins in order, accumulating a
//!    trace, until one aborts or settles on a non-retryable code.
//! 3. A per-domain token bucket and a global concurrency gate keep the
//!    service polite and bounded.
//! 4. [`CachedChecker`] is the entry point: a write-through result cache
//!    with status-dependent TTLs in front of all of the above.
//!
//! Every layer observes a [`tokio_util::sync::CancellationToken`] and
//! resolves promptly to a `Dropped` result when the caller goes away.
//!
//! ```no_run
//! use linkward_lib::{CachedChecker, CacheSettings, CheckerSettings, LimitSettings};
//! use tokio_util::sync::CancellationToken;
//!
//! # #[tokio::main]
//! # async fn main() -> linkward_lib::Result<()> {
//! let checker = CachedChecker::new(
//!     CheckerSettings::default(),
//!     CacheSettings::default(),
//!     LimitSettings::default(),
//! )
//! .await?;
//! let result = checker
//!     .check_url(&CancellationToken::new(), "https://example.com")
//!     .await;
//! println!("{} -> {}", result.code, result.status);
//! # Ok(())
//! # }
//! ```
#![warn(clippy::all, clippy::pedantic)]
#![allow(clippy::module_name_repetitions, clippy::cast_possible_truncation)]
#![deny(missing_docs)]

mod cache;
mod cached;
pub mod chain;
mod checker;
mod error;
mod instance;
mod limits;
mod retry;
mod stats;
mod types;
mod uri;

pub use cache::{
    CacheSettings, DEFAULT_CACHE_CLEANUP, DEFAULT_CACHE_EXPIRATION, DEFAULT_CACHE_MAX_COST,
    DEFAULT_RETRY_FAILED_AFTER,
};
pub use cached::CachedChecker;
pub use checker::{
    BodyPatternConfig, CheckerSettings, DEFAULT_ACCEPT_HEADER, DEFAULT_BROWSER_USER_AGENT,
    DEFAULT_MAX_REDIRECTS, DEFAULT_TIMEOUT_SECS, DEFAULT_USER_AGENT,
};
pub use error::{ErrorKind, Result};
pub use instance::{binary_version, instance_id, running_since_epoch_seconds};
pub use limits::{LimitSettings, DEFAULT_MAX_CONCURRENT_REQUESTS};
pub use stats::{global_stats, reset_global_stats, DomainStats, Stats, StatsCollector};
pub use types::{
    now_epoch_seconds, CheckResult, CheckStatus, PluginTrace, CUSTOM_HTTP_ERROR_CODE,
};
pub use uri::{domain_of, normalized_url, sanitize_log_input};
