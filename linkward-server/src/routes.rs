//! Application state and router assembly.

use std::sync::Arc;
use std::time::Instant;

use anyhow::Result;
use axum::extract::Request;
use axum::http::{header, HeaderName, HeaderValue, Method};
use axum::middleware::{from_fn, Next};
use axum::response::Response;
use axum::routing::{get, post};
use axum::Router;
use tower_http::cors::CorsLayer;

use linkward_lib::CachedChecker;

use crate::handlers;
use crate::middleware::{self, JwtValidator};
use crate::options::Config;

/// Shared state of the check endpoints.
#[derive(Debug)]
pub struct AppState {
    /// The URL-check pipeline
    pub checker: CachedChecker,
    /// Compiled blacklist globs, matched against the host without port
    pub blacklist: Vec<glob::Pattern>,
    /// 413 threshold; 0 = unlimited
    pub max_urls_in_request: u64,
    /// Floor of the per-request deadline, in seconds
    pub deadline_floor_secs: u64,
    /// Per-unique-URL contribution to the deadline, in seconds
    pub deadline_per_url_secs: u64,
}

impl AppState {
    /// Builds the pipeline and compiles the blacklist.
    pub async fn from_config(config: &Config) -> Result<Self> {
        let checker = CachedChecker::new(
            config.checker_settings(),
            config.cache_settings(),
            config.limit_settings(),
        )
        .await?;
        Ok(Self {
            checker,
            blacklist: config.blacklist_globs()?,
            max_urls_in_request: config.max_urls_in_request,
            deadline_floor_secs: config.total_request_deadline_timeout_seconds,
            deadline_per_url_secs: config.total_request_deadline_timeout_seconds_per_url,
        })
    }

    /// Whether `host` matches any configured blacklist glob.
    #[must_use]
    pub fn is_blacklisted(&self, host: &str) -> bool {
        self.blacklist.iter().any(|pattern| pattern.matches(host))
    }
}

/// Assembles the service router for the given configuration.
pub async fn build_app(config: &Config) -> Result<Router> {
    let state = Arc::new(AppState::from_config(config).await?);
    build_app_with_state(state, config)
}

/// Assembles the router around an existing state (used by tests that need
/// a handle on the state).
pub fn build_app_with_state(state: Arc<AppState>, config: &Config) -> Result<Router> {
    if state.max_urls_in_request > 0 {
        log::info!("Max URLs per request: {}", state.max_urls_in_request);
    }

    // the check endpoints carry the IP rate limit, stats only the JWT
    let mut check_routes = Router::new()
        .route("/checkUrls", post(handlers::check_urls))
        .route("/checkUrls/stream", post(handlers::check_urls_stream));
    if let Some(limiter) = middleware::ip_rate_limiter(&config.ip_rate_limit) {
        check_routes = check_routes.layer(from_fn(move |request: Request, next: Next| {
            let limiter = Arc::clone(&limiter);
            async move { middleware::ip_rate_limit(limiter, request, next).await }
        }));
    }

    let stats_routes = Router::new()
        .route("/stats", get(handlers::get_stats))
        .route("/stats/domains", get(handlers::get_domain_stats));

    let mut protected = check_routes.merge(stats_routes);
    if !config.jwt_pub_key_file.is_empty() {
        let validator = Arc::new(JwtValidator::from_files(
            &config.jwt_pub_key_file,
            &config.jwt_signing_algorithm,
        )?);
        log::info!("Using JWT Validation");
        log::info!("  PubKeyFile: {}", config.jwt_pub_key_file);
        log::info!("  SigningAlgorithm: {}", config.jwt_signing_algorithm);
        protected = protected.layer(from_fn(move |request: Request, next: Next| {
            let validator = Arc::clone(&validator);
            async move { middleware::require_jwt(validator, request, next).await }
        }));
    }

    let mut app = protected
        .route("/version", get(handlers::get_version))
        .route("/livez", get(handlers::get_health_status))
        .route("/readyz", get(handlers::get_health_status));

    if !config.cors_origins.is_empty() {
        let origins = config
            .cors_origins
            .iter()
            .map(|origin| origin.parse::<HeaderValue>())
            .collect::<std::result::Result<Vec<_>, _>>()?;
        log::info!("Using CORS headers: {:?}", config.cors_origins);
        app = app.layer(
            CorsLayer::new()
                .allow_origin(origins)
                .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
                .allow_headers([
                    header::AUTHORIZATION,
                    HeaderName::from_static("last-event-id"),
                ])
                .allow_credentials(true),
        );
    }

    if !config.disable_request_logging {
        app = app.layer(from_fn(log_request));
    } else {
        log::info!("Disabling request logging");
    }

    Ok(app.with_state(state))
}

async fn log_request(request: Request, next: Next) -> Response {
    let method = request.method().clone();
    let path = request.uri().path().to_owned();
    let started = Instant::now();
    let response = next.run(request).await;
    log::info!(
        "{method} {path} -> {} ({}ms)",
        response.status().as_u16(),
        started.elapsed().as_millis()
    );
    response
}
