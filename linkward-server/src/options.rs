//! Configuration: an optional TOML file merged with command-line flags,
//! flags taking precedence.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::Parser;
use serde::Deserialize;

use linkward_lib::{
    BodyPatternConfig, CacheSettings, CheckerSettings, LimitSettings,
    DEFAULT_MAX_CONCURRENT_REQUESTS, DEFAULT_MAX_REDIRECTS, DEFAULT_TIMEOUT_SECS,
};

/// Default bind address when neither the config nor `PORT` says otherwise.
pub const DEFAULT_BIND_ADDRESS: &str = "0.0.0.0:8080";
/// Default floor of the per-request deadline, in seconds.
pub const DEFAULT_DEADLINE_SECS: u64 = 300;
/// Default per-URL contribution to the request deadline, in seconds.
pub const DEFAULT_DEADLINE_PER_URL_SECS: u64 = 15;

/// Command-line options. Most settings live in the config file; the flags
/// here cover the common overrides.
#[derive(Debug, Parser)]
#[command(
    name = "linkward",
    version,
    about = "Batch link-validation service: POST lists of URLs, get per-URL statuses back"
)]
pub struct ServerOptions {
    /// Path to a TOML configuration file
    #[arg(short, long, env = "LINKWARD_CONFIG")]
    pub config: Option<PathBuf>,

    /// Address to bind, e.g. 0.0.0.0:4444
    #[arg(short, long)]
    pub bind_address: Option<String>,

    /// Checker plugins, in chain order (repeatable)
    #[arg(short = 'p', long = "plugin")]
    pub plugins: Vec<String>,

    /// Proxy URL for outgoing checks
    #[arg(long)]
    pub proxy: Option<String>,

    /// Proxy auto-config script URL
    #[arg(long)]
    pub pac_script_url: Option<String>,

    /// Maximum number of URLs accepted per request (0 = unlimited)
    #[arg(long)]
    pub max_urls_in_request: Option<u64>,

    /// Glob matched against the host of each URL; matches are skipped
    /// (repeatable)
    #[arg(long = "blacklist")]
    pub domain_blacklist_globs: Vec<String>,

    /// Allowed CORS origin (repeatable)
    #[arg(long = "cors-origin")]
    pub cors_origins: Vec<String>,

    /// Per-client-IP rate limit on the check endpoints, e.g. 100-M
    #[arg(long)]
    pub ip_rate_limit: Option<String>,

    /// Public key (or HMAC secret) file enabling JWT validation
    #[arg(long)]
    pub jwt_pub_key_file: Option<String>,

    /// JWT signing algorithm, e.g. HS256, RS256, ES256
    #[arg(long)]
    pub jwt_signing_algorithm: Option<String>,

    /// Turn off per-request logging
    #[arg(long)]
    pub disable_request_logging: bool,
}

impl ServerOptions {
    /// Loads the config file (if any) and applies the flag overrides.
    pub fn load_config(&self) -> Result<Config> {
        let mut config = match &self.config {
            Some(path) => {
                let raw = std::fs::read_to_string(path)
                    .with_context(|| format!("cannot read config file {}", path.display()))?;
                toml::from_str(&raw)
                    .with_context(|| format!("cannot parse config file {}", path.display()))?
            }
            None => Config::default(),
        };

        if let Some(bind_address) = &self.bind_address {
            config.bind_address = bind_address.clone();
        }
        if !self.plugins.is_empty() {
            config.url_checker_plugins = self.plugins.clone();
        }
        if let Some(proxy) = &self.proxy {
            config.proxy = proxy.clone();
        }
        if let Some(pac) = &self.pac_script_url {
            config.pac_script_url = pac.clone();
        }
        if let Some(max) = self.max_urls_in_request {
            config.max_urls_in_request = max;
        }
        if !self.domain_blacklist_globs.is_empty() {
            config.domain_blacklist_globs = self.domain_blacklist_globs.clone();
        }
        if !self.cors_origins.is_empty() {
            config.cors_origins = self.cors_origins.clone();
        }
        if let Some(rate) = &self.ip_rate_limit {
            config.ip_rate_limit = rate.clone();
        }
        if let Some(key_file) = &self.jwt_pub_key_file {
            config.jwt_pub_key_file = key_file.clone();
        }
        if let Some(alg) = &self.jwt_signing_algorithm {
            config.jwt_signing_algorithm = alg.clone();
        }
        if self.disable_request_logging {
            config.disable_request_logging = true;
        }

        Ok(config)
    }
}

/// The service configuration. Key names follow the configuration file
/// format (`camelCase`), see the README for the full list.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct Config {
    /// Address to bind; empty means `0.0.0.0:$PORT` (default port 8080)
    pub bind_address: String,
    /// Allowed CORS origins; empty disables the CORS layer
    pub cors_origins: Vec<String>,
    /// Per-client-IP rate limit, `<count>-<S|M|H>`; empty disables it
    #[serde(rename = "IPRateLimit")]
    pub ip_rate_limit: String,
    /// 413 threshold for URLs per request; 0 = unlimited
    #[serde(rename = "maxURLsInRequest")]
    pub max_urls_in_request: u64,
    /// Globs matched against the host (port stripped) of each URL
    pub domain_blacklist_globs: Vec<String>,
    /// Ordered chain of checker plugin names; empty means `urlcheck`
    pub url_checker_plugins: Vec<String>,
    /// Capacity of the global concurrency gate
    #[serde(rename = "maxConcurrentHTTPRequests")]
    pub max_concurrent_http_requests: usize,
    /// Token-bucket rate per host; 0 disables the per-domain limiter
    pub requests_per_second_per_domain: f64,
    /// TTL of successful results, e.g. `24h`
    pub cache_expiration_interval: String,
    /// Interval between cache cleanup sweeps, e.g. `48h`
    pub cache_cleanup_interval: String,
    /// Grace period before a failed URL is re-checked, e.g. `30s`
    pub retry_failed_after: String,
    /// Use the cost-bounded cache backend instead of the TTL map
    #[serde(rename = "cacheUseCostBounded", alias = "cacheUseRistretto")]
    pub cache_use_cost_bounded: bool,
    /// Byte budget of the cost-bounded backend
    pub cache_max_size: u64,
    /// Scan GET response bodies for the configured patterns
    pub search_for_body_patterns: bool,
    /// Named regex patterns evaluated against response bodies
    pub body_patterns: Vec<BodyPatternEntry>,
    /// Proxy URL for outgoing checks; empty disables proxying
    pub proxy: String,
    /// Proxy auto-config script URL, required by `urlcheck-pac`
    #[serde(rename = "pacScriptURL")]
    pub pac_script_url: String,
    /// HTTP client tuning
    #[serde(rename = "HTTPClient")]
    pub http_client: HttpClientConfig,
    /// Floor of the per-request deadline, in seconds
    pub total_request_deadline_timeout_seconds: u64,
    /// Per-URL contribution to the request deadline, in seconds
    #[serde(rename = "totalRequestDeadlineTimeoutSecondsPerURL")]
    pub total_request_deadline_timeout_seconds_per_url: u64,
    /// Public key (or HMAC secret) file; non-empty enables JWT validation
    pub jwt_pub_key_file: String,
    /// JWT signing algorithm, e.g. HS256, RS256, ES256
    pub jwt_signing_algorithm: String,
    /// Turn off per-request logging
    pub disable_request_logging: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            bind_address: String::new(),
            cors_origins: Vec::new(),
            ip_rate_limit: String::new(),
            max_urls_in_request: 0,
            domain_blacklist_globs: Vec::new(),
            url_checker_plugins: Vec::new(),
            max_concurrent_http_requests: DEFAULT_MAX_CONCURRENT_REQUESTS,
            requests_per_second_per_domain: 0.0,
            cache_expiration_interval: "24h".to_owned(),
            cache_cleanup_interval: "48h".to_owned(),
            retry_failed_after: "30s".to_owned(),
            cache_use_cost_bounded: false,
            cache_max_size: linkward_lib::DEFAULT_CACHE_MAX_COST,
            search_for_body_patterns: false,
            body_patterns: Vec::new(),
            proxy: String::new(),
            pac_script_url: String::new(),
            http_client: HttpClientConfig::default(),
            total_request_deadline_timeout_seconds: DEFAULT_DEADLINE_SECS,
            total_request_deadline_timeout_seconds_per_url: DEFAULT_DEADLINE_PER_URL_SECS,
            jwt_pub_key_file: String::new(),
            jwt_signing_algorithm: "RS256".to_owned(),
            disable_request_logging: false,
        }
    }
}

/// A named body pattern, as written in the config file.
#[derive(Debug, Clone, Deserialize)]
pub struct BodyPatternEntry {
    /// Name reported in `body_patterns_found`
    pub name: String,
    /// The regular expression to search for
    pub regex: String,
}

/// The `HTTPClient` section of the config file.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct HttpClientConfig {
    /// Redirects followed before a request is deemed as failed
    pub max_redirects_count: usize,
    /// Per-request timeout in seconds
    pub timeout_seconds: u64,
    /// Robot user agent; empty selects the built-in default
    pub user_agent: String,
    /// Browser user agent; empty selects the built-in default
    pub browser_user_agent: String,
    /// `Accept` header; empty selects `*/*`
    pub accept_header: String,
    /// Trust invalid TLS certificates. Insecure; off by default.
    pub skip_certificate_check: bool,
    /// Resolve and report remote peer addresses
    pub enable_request_tracing: bool,
    /// Byte cap on response bodies read for pattern scanning; 0 = unlimited
    #[serde(rename = "limitBodyToNBytes")]
    pub limit_body_to_n_bytes: usize,
}

impl Default for HttpClientConfig {
    fn default() -> Self {
        Self {
            max_redirects_count: DEFAULT_MAX_REDIRECTS,
            timeout_seconds: DEFAULT_TIMEOUT_SECS,
            user_agent: String::new(),
            browser_user_agent: String::new(),
            accept_header: String::new(),
            skip_certificate_check: false,
            enable_request_tracing: false,
            limit_body_to_n_bytes: 0,
        }
    }
}

impl Config {
    /// The effective bind address: config value, else `PORT`, else the
    /// default.
    #[must_use]
    pub fn effective_bind_address(&self) -> String {
        if !self.bind_address.is_empty() {
            return self.bind_address.clone();
        }
        match std::env::var("PORT") {
            Ok(port) if !port.is_empty() => format!("0.0.0.0:{port}"),
            _ => DEFAULT_BIND_ADDRESS.to_owned(),
        }
    }

    /// Checker chain settings for the library.
    #[must_use]
    pub fn checker_settings(&self) -> CheckerSettings {
        let defaults = CheckerSettings::default();
        let plugins = if self.url_checker_plugins.is_empty() {
            vec!["urlcheck".to_owned()]
        } else {
            self.url_checker_plugins.clone()
        };
        CheckerSettings {
            proxy_url: non_empty(&self.proxy),
            pac_script_url: non_empty(&self.pac_script_url),
            max_redirects: self.http_client.max_redirects_count,
            timeout: Duration::from_secs(self.http_client.timeout_seconds),
            user_agent: non_empty(&self.http_client.user_agent).unwrap_or(defaults.user_agent),
            browser_user_agent: non_empty(&self.http_client.browser_user_agent)
                .unwrap_or(defaults.browser_user_agent),
            accept_header: non_empty(&self.http_client.accept_header)
                .unwrap_or(defaults.accept_header),
            skip_certificate_check: self.http_client.skip_certificate_check,
            enable_request_tracing: self.http_client.enable_request_tracing,
            search_for_body_patterns: self.search_for_body_patterns,
            body_patterns: self
                .body_patterns
                .iter()
                .map(|p| BodyPatternConfig {
                    name: p.name.clone(),
                    regex: p.regex.clone(),
                })
                .collect(),
            limit_body_bytes: self.http_client.limit_body_to_n_bytes,
            plugins,
        }
    }

    /// Result cache settings for the library. Unparsable durations fall
    /// back to their defaults, with a warning.
    #[must_use]
    pub fn cache_settings(&self) -> CacheSettings {
        let defaults = CacheSettings::default();
        CacheSettings {
            expiration: duration_or(
                &self.cache_expiration_interval,
                "cacheExpirationInterval",
                defaults.expiration,
            ),
            cleanup_interval: duration_or(
                &self.cache_cleanup_interval,
                "cacheCleanupInterval",
                defaults.cleanup_interval,
            ),
            retry_failed_after: duration_or(
                &self.retry_failed_after,
                "retryFailedAfter",
                defaults.retry_failed_after,
            ),
            use_cost_bounded: self.cache_use_cost_bounded,
            max_cost_bytes: self.cache_max_size,
        }
    }

    /// Concurrency limits for the library.
    #[must_use]
    pub fn limit_settings(&self) -> LimitSettings {
        LimitSettings {
            max_concurrent_requests: self.max_concurrent_http_requests,
            requests_per_second_per_domain: self.requests_per_second_per_domain,
        }
    }

    /// Compiles the blacklist globs, failing fast on invalid patterns.
    pub fn blacklist_globs(&self) -> Result<Vec<glob::Pattern>> {
        self.domain_blacklist_globs
            .iter()
            .map(|raw| {
                glob::Pattern::new(raw).with_context(|| format!("invalid blacklist glob `{raw}`"))
            })
            .collect()
    }
}

fn non_empty(value: &str) -> Option<String> {
    if value.is_empty() {
        None
    } else {
        Some(value.to_owned())
    }
}

fn duration_or(value: &str, key: &str, default: Duration) -> Duration {
    match parse_duration(value) {
        Ok(duration) => duration,
        Err(err) => {
            log::warn!("Ignoring {key} `{value}` -> {default:?} ({err})");
            default
        }
    }
}

/// Parses durations in the config file format: `300ms`, `30s`, `5m`,
/// `24h`. A bare number has no unit and is rejected.
pub(crate) fn parse_duration(input: &str) -> Result<Duration> {
    let s = input.trim();
    if let Some(v) = s.strip_suffix("ms") {
        return Ok(Duration::from_millis(v.trim().parse()?));
    }
    if let Some(v) = s.strip_suffix('h') {
        return Ok(Duration::from_secs_f64(v.trim().parse::<f64>()? * 3600.0));
    }
    if let Some(v) = s.strip_suffix('m') {
        return Ok(Duration::from_secs_f64(v.trim().parse::<f64>()? * 60.0));
    }
    if let Some(v) = s.strip_suffix('s') {
        return Ok(Duration::from_secs_f64(v.trim().parse()?));
    }
    bail!("missing time unit in duration `{s}`")
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_parse_duration() {
        assert_eq!(parse_duration("30s").unwrap(), Duration::from_secs(30));
        assert_eq!(parse_duration("0s").unwrap(), Duration::ZERO);
        assert_eq!(parse_duration("24h").unwrap(), Duration::from_secs(86400));
        assert_eq!(parse_duration("5m").unwrap(), Duration::from_secs(300));
        assert_eq!(parse_duration("250ms").unwrap(), Duration::from_millis(250));
        assert!(parse_duration("30").is_err());
        assert!(parse_duration("abc").is_err());
    }

    #[test]
    fn test_config_file_keys() {
        let raw = r#"
            maxConcurrentHTTPRequests = 16
            requestsPerSecondPerDomain = 2.5
            maxURLsInRequest = 100
            retryFailedAfter = "10s"
            urlCheckerPlugins = ["urlcheck", "urlcheck-noproxy"]
            domainBlacklistGlobs = ["*.internal"]
            searchForBodyPatterns = true
            cacheUseRistretto = true

            [[bodyPatterns]]
            name = "login"
            regex = "<form[^>]*login"

            [HTTPClient]
            timeoutSeconds = 5
            limitBodyToNBytes = 1024
        "#;
        let config: Config = toml::from_str(raw).unwrap();
        assert_eq!(config.max_concurrent_http_requests, 16);
        assert!((config.requests_per_second_per_domain - 2.5).abs() < f64::EPSILON);
        assert_eq!(config.max_urls_in_request, 100);
        assert_eq!(config.url_checker_plugins.len(), 2);
        assert!(config.cache_use_cost_bounded);
        assert_eq!(config.body_patterns[0].name, "login");
        assert_eq!(config.http_client.timeout_seconds, 5);
        assert_eq!(config.http_client.limit_body_to_n_bytes, 1024);

        let checker = config.checker_settings();
        assert_eq!(checker.timeout, Duration::from_secs(5));
        assert_eq!(checker.limit_body_bytes, 1024);
        assert!(checker.search_for_body_patterns);

        let cache = config.cache_settings();
        assert_eq!(cache.retry_failed_after, Duration::from_secs(10));
    }

    #[test]
    fn test_default_plugins() {
        let config = Config::default();
        assert_eq!(config.checker_settings().plugins, vec!["urlcheck"]);
    }

    #[test]
    fn test_invalid_blacklist_glob_is_rejected() {
        let config = Config {
            domain_blacklist_globs: vec!["[".to_owned()],
            ..Config::default()
        };
        assert!(config.blacklist_globs().is_err());
    }
}
