//! Optional middlewares around the check endpoints: JWT validation and
//! per-client-IP rate limiting.

use std::net::{IpAddr, SocketAddr};
use std::num::NonZeroU32;
use std::sync::Arc;

use anyhow::{anyhow, Context, Result};
use axum::extract::{ConnectInfo, Request};
use axum::http::{header, StatusCode};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use governor::clock::DefaultClock;
use governor::state::keyed::DefaultKeyedStateStore;
use governor::{Quota, RateLimiter};
use jsonwebtoken::{Algorithm, DecodingKey, Validation};

/// Validates bearer tokens against a configured key and algorithm.
pub struct JwtValidator {
    decoding: DecodingKey,
    validation: Validation,
}

impl std::fmt::Debug for JwtValidator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JwtValidator").finish_non_exhaustive()
    }
}

impl JwtValidator {
    /// Reads the key file and prepares validation for the given
    /// algorithm. HMAC algorithms read the file as the shared secret,
    /// asymmetric ones as a PEM public key.
    pub fn from_files(key_file: &str, algorithm: &str) -> Result<Self> {
        let alg: Algorithm = algorithm
            .parse()
            .map_err(|_| anyhow!("unsupported JWT signing algorithm `{algorithm}`"))?;
        let key_bytes = std::fs::read(key_file)
            .with_context(|| format!("cannot read JWT key file `{key_file}`"))?;
        let decoding = match alg {
            Algorithm::HS256 | Algorithm::HS384 | Algorithm::HS512 => {
                DecodingKey::from_secret(&key_bytes)
            }
            Algorithm::RS256
            | Algorithm::RS384
            | Algorithm::RS512
            | Algorithm::PS256
            | Algorithm::PS384
            | Algorithm::PS512 => DecodingKey::from_rsa_pem(&key_bytes)?,
            Algorithm::ES256 | Algorithm::ES384 => DecodingKey::from_ec_pem(&key_bytes)?,
            Algorithm::EdDSA => DecodingKey::from_ed_pem(&key_bytes)?,
        };
        Ok(Self {
            decoding,
            validation: Validation::new(alg),
        })
    }

    fn validate(&self, token: &str) -> bool {
        jsonwebtoken::decode::<serde_json::Value>(token, &self.decoding, &self.validation).is_ok()
    }
}

/// Rejects requests without a valid bearer token.
pub async fn require_jwt(
    validator: Arc<JwtValidator>,
    request: Request,
    next: Next,
) -> Response {
    let authorized = request
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .map(|value| value.strip_prefix("Bearer ").unwrap_or(value))
        .is_some_and(|token| validator.validate(token));

    if authorized {
        next.run(request).await
    } else {
        log::debug!("Token validation error");
        (
            StatusCode::UNAUTHORIZED,
            "Token validation error: unauthorized",
        )
            .into_response()
    }
}

type KeyedLimiter = RateLimiter<IpAddr, DefaultKeyedStateStore<IpAddr>, DefaultClock>;

/// Per-client-IP token buckets for the check endpoints.
#[derive(Debug)]
pub struct IpRateLimit {
    limiter: KeyedLimiter,
}

/// Builds the IP rate limiter from a `<count>-<S|M|H>` spec; `None` when
/// the spec is empty or invalid.
#[must_use]
pub fn ip_rate_limiter(spec: &str) -> Option<Arc<IpRateLimit>> {
    if spec.is_empty() {
        log::info!("Not using IP rate limiting");
        return None;
    }
    match parse_ip_rate(spec) {
        Some(quota) => {
            log::info!("Using IP rate limiting with a specified rate of {spec}");
            Some(Arc::new(IpRateLimit {
                limiter: RateLimiter::keyed(quota),
            }))
        }
        None => {
            log::warn!("Not using IP rate limiting: invalid rate `{spec}`");
            None
        }
    }
}

fn parse_ip_rate(spec: &str) -> Option<Quota> {
    let (count, period) = spec.split_once('-')?;
    let count: NonZeroU32 = count.trim().parse().ok()?;
    match period.trim().to_uppercase().as_str() {
        "S" => Some(Quota::per_second(count)),
        "M" => Some(Quota::per_minute(count)),
        "H" => Some(Quota::per_hour(count)),
        _ => None,
    }
}

/// Answers 429 when the client's bucket is empty. Requests without peer
/// information (in-process tests) pass through.
pub async fn ip_rate_limit(
    limit: Arc<IpRateLimit>,
    request: Request,
    next: Next,
) -> Response {
    let ip = request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|info| info.0.ip());
    match ip {
        Some(ip) if limit.limiter.check_key(&ip).is_err() => {
            (StatusCode::TOO_MANY_REQUESTS, "Limit exceeded").into_response()
        }
        _ => next.run(request).await,
    }
}
