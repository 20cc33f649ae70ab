//! The real HTTP checker plugin.
//!
//! One invocation makes up to three attempts against the same URL, all
//! through the same client: a HEAD with the robot user agent, a second
//! HEAD with the browser user agent if the first one came back 403, and a
//! GET with the browser user agent if the current code is still retryable
//! or body-pattern search is enabled. Later attempts overwrite earlier
//! ones.

use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use dashmap::DashMap;
use http::{header, StatusCode};
use regex::Regex;
use tokio_util::sync::CancellationToken;

use crate::cache::{DEFAULT_CACHE_EXPIRATION, DEFAULT_RETRY_FAILED_AFTER};
use crate::chain::CheckerPlugin;
use crate::checker::{CheckerSettings, PacProxySelector};
use crate::retry::RetryExt;
use crate::stats::global_stats;
use crate::types::{CheckResult, CheckStatus, CUSTOM_HTTP_ERROR_CODE};
use crate::uri::{normalize_address_of, sanitize_log_input};
use crate::{ErrorKind, Result};

/// A compiled body pattern.
#[derive(Debug)]
pub(crate) struct BodyPattern {
    name: String,
    pattern: Regex,
}

/// Validated, compiled settings shared by all HTTP checker instances.
#[derive(Debug)]
pub(crate) struct HttpSettings {
    pub(crate) max_redirects: usize,
    pub(crate) timeout: Duration,
    pub(crate) user_agent: String,
    pub(crate) browser_user_agent: String,
    pub(crate) accept_header: String,
    pub(crate) skip_certificate_check: bool,
    pub(crate) enable_request_tracing: bool,
    pub(crate) search_for_body_patterns: bool,
    pub(crate) patterns: Vec<BodyPattern>,
    pub(crate) limit_body_bytes: usize,
}

impl HttpSettings {
    pub(crate) fn compile(settings: &CheckerSettings) -> Result<Self> {
        let mut patterns = Vec::new();
        if settings.search_for_body_patterns {
            log::info!("Will search for regex patterns found in HTTP response bodies");
            for config in &settings.body_patterns {
                let pattern = Regex::new(&config.regex).map_err(|e| {
                    ErrorKind::InvalidBodyPattern(config.name.clone(), e)
                })?;
                log::info!(
                    "Body search pattern found. Name: '{}', Regex: '{}'",
                    config.name,
                    config.regex
                );
                patterns.push(BodyPattern {
                    name: config.name.clone(),
                    pattern,
                });
            }
        }
        Ok(Self {
            max_redirects: settings.max_redirects,
            timeout: settings.timeout,
            user_agent: settings.user_agent.clone(),
            browser_user_agent: settings.browser_user_agent.clone(),
            accept_header: settings.accept_header.clone(),
            skip_certificate_check: settings.skip_certificate_check,
            enable_request_tracing: settings.enable_request_tracing,
            search_for_body_patterns: settings.search_for_body_patterns,
            patterns,
            limit_body_bytes: settings.limit_body_bytes,
        })
    }
}

/// Builds a [`reqwest::Client`] for the given settings.
///
/// `force_no_proxy` disables proxying entirely (including environment
/// proxies), for the `urlcheck-noproxy` plugin.
pub(crate) fn build_client(
    settings: &HttpSettings,
    proxy: Option<&str>,
    force_no_proxy: bool,
) -> Result<reqwest::Client> {
    let mut builder = reqwest::ClientBuilder::new()
        .gzip(true)
        .timeout(settings.timeout)
        .redirect(reqwest::redirect::Policy::limited(settings.max_redirects))
        .danger_accept_invalid_certs(settings.skip_certificate_check);

    if let Some(proxy_url) = proxy {
        let proxy = reqwest::Proxy::all(proxy_url)
            .map_err(|_| ErrorKind::InvalidProxy(proxy_url.to_owned()))?;
        builder = builder.proxy(proxy);
    } else if force_no_proxy {
        builder = builder.no_proxy();
    }

    builder.build().map_err(ErrorKind::BuildRequestClient)
}

#[derive(Debug)]
struct DnsEntry {
    addr: Option<String>,
    expires_at: Instant,
}

/// Per-process cache of resolved peer addresses, keyed by `host:port`.
/// Successes live for the success TTL, failures for the failure TTL.
#[derive(Debug, Default)]
pub(crate) struct DnsCache {
    entries: DashMap<String, DnsEntry>,
}

impl DnsCache {
    /// Fresh resolved address for `key`, if any.
    fn resolved(&self, key: &str) -> Option<String> {
        let entry = self.entries.get(key)?;
        if entry.expires_at <= Instant::now() {
            drop(entry);
            self.entries.remove(key);
            return None;
        }
        entry.addr.clone()
    }

    /// Whether `key` has a fresh entry, resolved or failed.
    fn contains(&self, key: &str) -> bool {
        self.entries
            .get(key)
            .map(|entry| entry.expires_at > Instant::now())
            .unwrap_or(false)
    }

    fn store_resolved(&self, key: &str, addr: String) {
        self.entries.insert(
            key.to_owned(),
            DnsEntry {
                addr: Some(addr),
                expires_at: Instant::now() + DEFAULT_CACHE_EXPIRATION,
            },
        );
    }

    fn store_failed(&self, key: &str) {
        self.entries.insert(
            key.to_owned(),
            DnsEntry {
                addr: None,
                expires_at: Instant::now() + DEFAULT_RETRY_FAILED_AFTER,
            },
        );
    }
}

#[derive(Debug)]
enum ClientMode {
    /// Fixed client (with or without a proxy)
    Fixed(reqwest::Client),
    /// Per-URL client selected through a PAC script
    Pac(Arc<PacProxySelector>),
}

/// The `urlcheck` family of plugins.
#[derive(Debug)]
pub(crate) struct HttpChecker {
    name: &'static str,
    mode: ClientMode,
    settings: Arc<HttpSettings>,
    dns_cache: Arc<DnsCache>,
}

impl HttpChecker {
    pub(crate) fn with_client(
        name: &'static str,
        client: reqwest::Client,
        settings: Arc<HttpSettings>,
        dns_cache: Arc<DnsCache>,
    ) -> Self {
        Self {
            name,
            mode: ClientMode::Fixed(client),
            settings,
            dns_cache,
        }
    }

    pub(crate) fn with_pac(
        name: &'static str,
        selector: Arc<PacProxySelector>,
        settings: Arc<HttpSettings>,
        dns_cache: Arc<DnsCache>,
    ) -> Self {
        Self {
            name,
            mode: ClientMode::Pac(selector),
            settings,
            dns_cache,
        }
    }

    async fn client_for(&self, url: &str) -> Result<reqwest::Client> {
        match &self.mode {
            ClientMode::Fixed(client) => Ok(client.clone()),
            ClientMode::Pac(selector) => selector.client_for(url).await,
        }
    }

    async fn check_with_client(
        &self,
        token: &CancellationToken,
        url: &str,
        client: &reqwest::Client,
    ) -> CheckResult {
        let addr_key = normalize_address_of(url);
        let mut remote_addr = String::new();
        let mut capture_addr = false;
        if self.settings.enable_request_tracing {
            if let Some(cached) = self.dns_cache.resolved(&addr_key) {
                remote_addr = cached;
            }
            // trace only destinations the DNS cache knows nothing about
            capture_addr = remote_addr.is_empty() && !self.dns_cache.contains(&addr_key);
        }

        let (mut res, addr) = self
            .head_request(token, url, client, &self.settings.user_agent)
            .await;
        self.observe_attempt(&addr_key, capture_addr, &mut remote_addr, addr, &res);

        // Some sites don't allow robot user agents
        if res.status != CheckStatus::Dropped && res.code == StatusCode::FORBIDDEN.as_u16() {
            let (browser_res, addr) = self
                .head_request(token, url, client, &self.settings.browser_user_agent)
                .await;
            res = browser_res;
            self.observe_attempt(&addr_key, capture_addr, &mut remote_addr, addr, &res);
        }

        if res.status != CheckStatus::Dropped {
            res = self
                .get_request_and_scan_body(
                    token,
                    url,
                    client,
                    res,
                    &addr_key,
                    capture_addr,
                    &mut remote_addr,
                )
                .await;
        }

        res.remote_addr = remote_addr;
        res
    }

    /// Some sites don't allow HEAD requests, and body patterns need a body:
    /// fall back to a GET and optionally scan the (capped) response body.
    #[allow(clippy::too_many_arguments)]
    async fn get_request_and_scan_body(
        &self,
        token: &CancellationToken,
        url: &str,
        client: &reqwest::Client,
        last: CheckResult,
        addr_key: &str,
        capture_addr: bool,
        remote_addr: &mut String,
    ) -> CheckResult {
        let mut res = last;
        let mut body = None;
        if self.settings.search_for_body_patterns || res.code.should_retry() {
            let (get_res, addr, get_body) = self.get_request(token, url, client).await;
            self.observe_attempt(addr_key, capture_addr, remote_addr, addr, &get_res);
            res = get_res;
            body = get_body;
            if res.status == CheckStatus::Dropped {
                return res;
            }
        }
        if self.settings.search_for_body_patterns {
            res = self.search_body_patterns(res, body.as_deref().unwrap_or(""));
        }
        res
    }

    async fn head_request(
        &self,
        token: &CancellationToken,
        url: &str,
        client: &reqwest::Client,
        user_agent: &str,
    ) -> (CheckResult, Option<String>) {
        let request = client
            .head(url)
            .header(header::ACCEPT, self.settings.accept_header.as_str())
            .header(header::USER_AGENT, user_agent);
        let outcome = tokio::select! {
            outcome = request.send() => outcome,
            () = token.cancelled() => return (CheckResult::dropped("processing aborted"), None),
        };
        match outcome {
            Ok(response) => {
                let addr = response.remote_addr().map(|a| a.to_string());
                (map_status(url, response.status()), addr)
            }
            Err(err) => (map_transport_error(&err), None),
        }
    }

    async fn get_request(
        &self,
        token: &CancellationToken,
        url: &str,
        client: &reqwest::Client,
    ) -> (CheckResult, Option<String>, Option<String>) {
        let request = client
            .get(url)
            .header(header::ACCEPT, self.settings.accept_header.as_str())
            .header(header::USER_AGENT, self.settings.browser_user_agent.as_str());
        let outcome = tokio::select! {
            outcome = request.send() => outcome,
            () = token.cancelled() => {
                return (CheckResult::dropped("processing aborted"), None, None)
            }
        };
        match outcome {
            Ok(response) => {
                let addr = response.remote_addr().map(|a| a.to_string());
                let status = response.status();
                if !self.settings.search_for_body_patterns {
                    return (map_status(url, status), addr, None);
                }
                match self.read_capped_body(token, response).await {
                    Ok(body) => (map_status(url, status), addr, Some(body)),
                    // Browser-optimized CDN sites may cut the body short while
                    // the response itself was fine
                    Err(_) if status == StatusCode::OK => (CheckResult::ok(200), addr, None),
                    Err(err) => (map_transport_error(&err), addr, None),
                }
            }
            Err(err) => (map_transport_error(&err), None, None),
        }
    }

    /// Reads the response body up to `limit_body_bytes` (0 = unlimited).
    async fn read_capped_body(
        &self,
        token: &CancellationToken,
        mut response: reqwest::Response,
    ) -> reqwest::Result<String> {
        let limit = self.settings.limit_body_bytes;
        let mut body: Vec<u8> = Vec::new();
        loop {
            let chunk = tokio::select! {
                chunk = response.chunk() => chunk?,
                () = token.cancelled() => None,
            };
            let Some(chunk) = chunk else { break };
            if limit > 0 && body.len() + chunk.len() >= limit {
                body.extend_from_slice(&chunk[..limit - body.len()]);
                break;
            }
            body.extend_from_slice(&chunk);
        }
        Ok(String::from_utf8_lossy(&body).into_owned())
    }

    fn search_body_patterns(&self, mut res: CheckResult, body: &str) -> CheckResult {
        for pattern in &self.settings.patterns {
            if pattern.pattern.is_match(body) {
                res.body_patterns_found.push(pattern.name.clone());
            }
        }
        res
    }

    /// Records the observed peer address (or a DNS failure) in the DNS
    /// cache when tracing is on and the destination wasn't cached yet.
    /// Repeated observations overwrite: the last attempt wins.
    fn observe_attempt(
        &self,
        addr_key: &str,
        capture_addr: bool,
        remote_addr: &mut String,
        addr: Option<String>,
        res: &CheckResult,
    ) {
        if !capture_addr {
            return;
        }
        if let Some(addr) = addr {
            *remote_addr = addr.clone();
            self.dns_cache.store_resolved(addr_key, addr);
        } else if res.code == CUSTOM_HTTP_ERROR_CODE
            && res.error.to_lowercase().contains("dns")
        {
            self.dns_cache.store_failed(addr_key);
            global_stats().on_dns_resolution_failed();
        }
    }
}

#[async_trait]
impl CheckerPlugin for HttpChecker {
    fn name(&self) -> &str {
        self.name
    }

    async fn check(
        &self,
        token: &CancellationToken,
        url: &str,
        last: Option<CheckResult>,
    ) -> (CheckResult, bool) {
        // a previous plugin already settled on a final verdict
        if let Some(prev) = last {
            if !prev.code.should_retry() {
                return (prev, false);
            }
        }

        if token.is_cancelled() {
            return (CheckResult::dropped("processing aborted"), true);
        }

        let client = match self.client_for(url).await {
            Ok(client) => client,
            Err(err) => {
                log::warn!(
                    "Could not obtain a client for {}: {err}",
                    sanitize_log_input(url)
                );
                return (
                    CheckResult::broken(CUSTOM_HTTP_ERROR_CODE, err.to_string()),
                    false,
                );
            }
        };

        global_stats().on_outgoing_request();
        (self.check_with_client(token, url, &client).await, false)
    }
}

/// Maps an HTTP status to a check result: anything at or above 300 is
/// broken, everything below is ok.
fn map_status(url: &str, status: StatusCode) -> CheckResult {
    let code = status.as_u16();
    if code >= 300 {
        CheckResult::broken(code, format!("{code} status on url '{url}'"))
    } else {
        CheckResult::ok(code)
    }
}

/// Maps a transport-level failure. Gateway and timeout flavors get 502 so
/// that misbehaving proxies are recognizable; everything else gets the
/// sentinel code.
fn map_transport_error(err: &reqwest::Error) -> CheckResult {
    let chain = error_chain(err);
    let msg = chain.to_lowercase();
    let code = if err.is_timeout()
        || msg.contains("bad gateway")
        || msg.contains("timeout")
        || msg.contains("deadline")
    {
        StatusCode::BAD_GATEWAY.as_u16()
    } else {
        CUSTOM_HTTP_ERROR_CODE
    };
    CheckResult::broken(code, chain)
}

/// Flattens an error and its sources into one message; reqwest hides the
/// interesting parts (DNS, connect errors) in the source chain.
fn error_chain(err: &dyn std::error::Error) -> String {
    let mut msg = err.to_string();
    let mut source = err.source();
    while let Some(err) = source {
        msg.push_str(": ");
        msg.push_str(&err.to_string());
        source = err.source();
    }
    msg
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::checker::{CheckerSettings, DEFAULT_BROWSER_USER_AGENT};
    use pretty_assertions::assert_eq;
    use wiremock::matchers::{header, method};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn checker(settings: CheckerSettings) -> HttpChecker {
        let compiled = Arc::new(HttpSettings::compile(&settings).unwrap());
        let client = build_client(&compiled, None, false).unwrap();
        HttpChecker::with_client("urlcheck", client, compiled, Arc::new(DnsCache::default()))
    }

    #[tokio::test]
    async fn test_ok_head() {
        let server = MockServer::start().await;
        Mock::given(method("HEAD"))
            .respond_with(ResponseTemplate::new(200))
            .mount(&server)
            .await;

        let checker = checker(CheckerSettings::default());
        let (res, abort) = checker
            .check(&CancellationToken::new(), &server.uri(), None)
            .await;
        assert!(!abort);
        assert_eq!(res.status, CheckStatus::Ok);
        assert_eq!(res.code, 200);
        assert_eq!(res.error, "");
    }

    #[tokio::test]
    async fn test_not_found_falls_back_to_get() {
        let server = MockServer::start().await;
        Mock::given(method("HEAD"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let checker = checker(CheckerSettings::default());
        let (res, _) = checker
            .check(&CancellationToken::new(), &server.uri(), None)
            .await;
        assert_eq!(res.status, CheckStatus::Broken);
        assert_eq!(res.code, 404);
        assert!(res.error.contains("404 status"));
        // HEAD and the GET fallback
        assert_eq!(server.received_requests().await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_forbidden_retried_with_browser_agent() {
        let server = MockServer::start().await;
        Mock::given(method("HEAD"))
            .and(header("user-agent", DEFAULT_BROWSER_USER_AGENT))
            .respond_with(ResponseTemplate::new(200))
            .mount(&server)
            .await;
        Mock::given(method("HEAD"))
            .respond_with(ResponseTemplate::new(403))
            .mount(&server)
            .await;

        let checker = checker(CheckerSettings::default());
        let (res, _) = checker
            .check(&CancellationToken::new(), &server.uri(), None)
            .await;
        assert_eq!(res.status, CheckStatus::Ok);
        assert_eq!(res.code, 200);
    }

    #[tokio::test]
    async fn test_transport_error_maps_to_sentinel() {
        // nothing listens on this port
        let checker = checker(CheckerSettings::default());
        let (res, _) = checker
            .check(&CancellationToken::new(), "http://127.0.0.1:9/", None)
            .await;
        assert_eq!(res.status, CheckStatus::Broken);
        assert!(res.code == CUSTOM_HTTP_ERROR_CODE || res.code == 502);
        assert!(!res.error.is_empty());
    }

    #[tokio::test]
    async fn test_cancelled_before_start_short_circuits() {
        let checker = checker(CheckerSettings::default());
        let token = CancellationToken::new();
        token.cancel();
        let (res, abort) = checker.check(&token, "https://example.com", None).await;
        assert!(abort);
        assert_eq!(res.status, CheckStatus::Dropped);
        assert_eq!(res.code, CUSTOM_HTTP_ERROR_CODE);
    }

    #[tokio::test]
    async fn test_body_patterns_respect_byte_cap() {
        let body = format!("start-{}{}", "a".repeat(300), "b".repeat(300));
        let server = MockServer::start().await;
        Mock::given(method("HEAD"))
            .respond_with(ResponseTemplate::new(200))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_string(body))
            .mount(&server)
            .await;

        let settings = CheckerSettings {
            search_for_body_patterns: true,
            limit_body_bytes: 100,
            body_patterns: vec![
                crate::checker::BodyPatternConfig {
                    name: "start-a".to_owned(),
                    regex: "start-a".to_owned(),
                },
                crate::checker::BodyPatternConfig {
                    name: "ab".to_owned(),
                    regex: "ab".to_owned(),
                },
            ],
            ..CheckerSettings::default()
        };
        let checker = checker(settings);
        let (res, _) = checker
            .check(&CancellationToken::new(), &server.uri(), None)
            .await;
        assert_eq!(res.status, CheckStatus::Ok);
        assert_eq!(res.body_patterns_found, vec!["start-a".to_owned()]);
    }

    #[tokio::test]
    async fn test_pass_through_when_previous_result_is_final() {
        let checker = checker(CheckerSettings::default());
        let prev = CheckResult::broken(410, "410 status on url 'x'");
        let (res, abort) = checker
            .check(&CancellationToken::new(), "https://example.com", Some(prev))
            .await;
        assert!(!abort);
        assert_eq!(res.code, 410);
    }
}
