//! Checker plugin construction.
//!
//! This module turns a [`CheckerSettings`] into the ordered list of
//! [`CheckerPlugin`]s making up the chain. Recognized plugin names:
//!
//! - `urlcheck`: real HTTP checker with the configured proxy (if any)
//! - `urlcheck-noproxy`: same, with the proxy forcibly disabled
//! - `urlcheck-pac`: selects a proxy per URL through a PAC script
//! - `_always_ok`, `_always_bad`, `_ok_after_1s_on_delay.com`:
//!   deterministic plugins for testing

mod fake;
mod pac;
mod website;

use std::sync::Arc;
use std::time::Duration;

pub(crate) use fake::FakeChecker;
pub(crate) use pac::PacProxySelector;
pub(crate) use website::{build_client, DnsCache, HttpChecker, HttpSettings};

use crate::chain::CheckerPlugin;
use crate::types::CheckResult;
use crate::{ErrorKind, Result};

/// Default number of redirects before a request is deemed as failed.
pub const DEFAULT_MAX_REDIRECTS: usize = 15;
/// Default timeout in seconds before a request is deemed as failed.
pub const DEFAULT_TIMEOUT_SECS: u64 = 10;
/// Default robot user agent, `linkward/<version>`.
pub const DEFAULT_USER_AGENT: &str = concat!("linkward/", env!("CARGO_PKG_VERSION"));
/// Default browser user agent, used when a site rejects robot agents.
pub const DEFAULT_BROWSER_USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/85.0.4183.83 Safari/537.36";
/// Default `Accept` header sent with every request.
pub const DEFAULT_ACCEPT_HEADER: &str = "*/*";

/// A named regular expression searched for in response bodies.
#[derive(Debug, Clone)]
pub struct BodyPatternConfig {
    /// Name reported in `body_patterns_found`
    pub name: String,
    /// The regular expression to search for
    pub regex: String,
}

/// Configuration of the per-URL checker chain and its HTTP clients.
#[derive(Debug, Clone)]
pub struct CheckerSettings {
    /// Proxy for outgoing requests (`urlcheck` and the browser fallback)
    pub proxy_url: Option<String>,
    /// URL of a proxy auto-config script, required by `urlcheck-pac`
    pub pac_script_url: Option<String>,
    /// Redirects followed before a request is deemed as failed
    pub max_redirects: usize,
    /// Per-request timeout
    pub timeout: Duration,
    /// Robot user agent for the default HEAD attempt
    pub user_agent: String,
    /// Browser user agent for the 403 fallback and GET attempts
    pub browser_user_agent: String,
    /// `Accept` header sent with every request
    pub accept_header: String,
    /// Trust invalid TLS certificates. Insecure; off by default.
    pub skip_certificate_check: bool,
    /// Resolve and report the remote peer address of checked URLs
    pub enable_request_tracing: bool,
    /// Scan GET response bodies for the configured patterns
    pub search_for_body_patterns: bool,
    /// Patterns evaluated against response bodies, in order
    pub body_patterns: Vec<BodyPatternConfig>,
    /// Byte cap on response bodies read for pattern scanning; 0 = unlimited
    pub limit_body_bytes: usize,
    /// Ordered chain of plugin names
    pub plugins: Vec<String>,
}

impl Default for CheckerSettings {
    fn default() -> Self {
        Self {
            proxy_url: None,
            pac_script_url: None,
            max_redirects: DEFAULT_MAX_REDIRECTS,
            timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
            user_agent: DEFAULT_USER_AGENT.to_owned(),
            browser_user_agent: DEFAULT_BROWSER_USER_AGENT.to_owned(),
            accept_header: DEFAULT_ACCEPT_HEADER.to_owned(),
            skip_certificate_check: false,
            enable_request_tracing: false,
            search_for_body_patterns: false,
            body_patterns: Vec::new(),
            limit_body_bytes: 0,
            plugins: vec!["urlcheck".to_owned()],
        }
    }
}

/// Builds the configured chain of plugins.
///
/// Fails fast on unknown plugin names, on `urlcheck-noproxy` without a
/// configured proxy, and on `urlcheck-pac` without a PAC script URL.
pub(crate) async fn build_plugins(
    settings: &CheckerSettings,
) -> Result<Vec<Box<dyn CheckerPlugin>>> {
    let http_settings = Arc::new(HttpSettings::compile(settings)?);
    let dns_cache = Arc::new(DnsCache::default());

    let pac = match &settings.pac_script_url {
        Some(script_url) => Some(Arc::new(
            PacProxySelector::fetch(script_url, Arc::clone(&http_settings)).await?,
        )),
        None => None,
    };

    let mut plugins: Vec<Box<dyn CheckerPlugin>> = Vec::new();
    for name in &settings.plugins {
        match name.as_str() {
            "urlcheck" => {
                let client =
                    build_client(&http_settings, settings.proxy_url.as_deref(), false)?;
                plugins.push(Box::new(HttpChecker::with_client(
                    "urlcheck",
                    client,
                    Arc::clone(&http_settings),
                    Arc::clone(&dns_cache),
                )));
                log::info!("Added the default URL checker");
            }
            "urlcheck-noproxy" => {
                if settings.proxy_url.is_none() {
                    return Err(ErrorKind::NoProxyPluginWithoutProxy);
                }
                let client = build_client(&http_settings, None, true)?;
                plugins.push(Box::new(HttpChecker::with_client(
                    "urlcheck-noproxy",
                    client,
                    Arc::clone(&http_settings),
                    Arc::clone(&dns_cache),
                )));
                log::info!("Added the URL checker that doesn't use a proxy");
            }
            "urlcheck-pac" => {
                let selector = pac.clone().ok_or(ErrorKind::PacPluginWithoutScript)?;
                plugins.push(Box::new(HttpChecker::with_pac(
                    "urlcheck-pac",
                    selector,
                    Arc::clone(&http_settings),
                    Arc::clone(&dns_cache),
                )));
                log::info!("Added the PAC file based URL checker");
            }
            "_always_ok" => {
                plugins.push(Box::new(FakeChecker::new(
                    "_always_ok",
                    Duration::ZERO,
                    CheckResult::ok(200),
                )));
                log::info!("Added the _always_ok checker");
            }
            "_always_bad" => {
                plugins.push(Box::new(FakeChecker::new(
                    "_always_bad",
                    Duration::ZERO,
                    CheckResult::broken(500, "bad"),
                )));
                log::info!("Added the _always_bad checker");
            }
            "_ok_after_1s_on_delay.com" => {
                plugins.push(Box::new(FakeChecker::new(
                    "_ok_after_1s_on_delay.com",
                    Duration::from_secs(1),
                    CheckResult::ok(200),
                )));
                log::info!("Added the _ok_after_1s_on_delay.com checker");
            }
            other => return Err(ErrorKind::UnknownPlugin(other.to_owned())),
        }
    }

    if plugins.is_empty() {
        return Err(ErrorKind::EmptyCheckerChain);
    }
    Ok(plugins)
}
