//! Concurrency and politeness limits applied around the checker chain.

mod domain;
mod gate;

pub(crate) use domain::DomainRateLimiter;
pub(crate) use gate::ConcurrencyGate;

/// Default capacity of the global concurrency gate.
pub const DEFAULT_MAX_CONCURRENT_REQUESTS: usize = 256;

/// Limits configuration.
#[derive(Debug, Clone)]
pub struct LimitSettings {
    /// Total in-flight outbound requests across all incoming requests
    pub max_concurrent_requests: usize,
    /// Token-bucket rate per host; 0 disables the per-domain limiter
    pub requests_per_second_per_domain: f64,
}

impl Default for LimitSettings {
    fn default() -> Self {
        Self {
            max_concurrent_requests: DEFAULT_MAX_CONCURRENT_REQUESTS,
            requests_per_second_per_domain: 0.0,
        }
    }
}
