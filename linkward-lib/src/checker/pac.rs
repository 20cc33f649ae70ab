//! Proxy auto-config support for the `urlcheck-pac` plugin.
//!
//! The PAC script is fetched once at startup. Per URL, the script's
//! `FindProxyForURL(url, host)` is evaluated in a QuickJS context on the
//! blocking thread pool; the first `PROXY host:port` entry of the returned
//! directive wins, anything else means a direct connection. Clients are
//! built lazily, one per distinct proxy, and reused.

use std::sync::Arc;

use dashmap::DashMap;

use crate::checker::website::{build_client, HttpSettings};
use crate::uri::domain_of;
use crate::{ErrorKind, Result};

/// PAC helper functions the scripts expect. Time- and network-dependent
/// helpers are stubbed conservatively (no DNS from inside the script).
const PAC_PRELUDE: &str = r#"
    function isPlainHostName(host) { return host.indexOf('.') === -1; }
    function dnsDomainIs(host, domain) {
        return host.length >= domain.length &&
            host.substring(host.length - domain.length) === domain;
    }
    function localHostOrDomainIs(host, hostdom) {
        return host === hostdom || hostdom.lastIndexOf(host + '.', 0) === 0;
    }
    function dnsDomainLevels(host) { return host.split('.').length - 1; }
    function shExpMatch(str, shexp) {
        var re = shexp
            .replace(/[.+^${}()|[\]\\]/g, '\\$&')
            .replace(/\*/g, '.*')
            .replace(/\?/g, '.');
        return new RegExp('^' + re + '$').test(str);
    }
    function isResolvable(host) { return false; }
    function isInNet(host, pattern, mask) { return false; }
    function dnsResolve(host) { return null; }
    function myIpAddress() { return '127.0.0.1'; }
    function weekdayRange() { return false; }
    function dateRange() { return false; }
    function timeRange() { return false; }
"#;

/// Lazily selects a proxy per URL by consulting a parsed PAC script.
#[derive(Debug)]
pub(crate) struct PacProxySelector {
    script: String,
    settings: Arc<HttpSettings>,
    /// One client per proxy directive; the empty key is the direct client
    clients: DashMap<String, reqwest::Client>,
}

impl PacProxySelector {
    /// Fetches and sanity-checks the PAC script.
    pub(crate) async fn fetch(script_url: &str, settings: Arc<HttpSettings>) -> Result<Self> {
        let script = reqwest::Client::new()
            .get(script_url)
            .send()
            .await
            .map_err(|e| ErrorKind::FetchPacScript(script_url.to_owned(), e))?
            .text()
            .await
            .map_err(|e| ErrorKind::FetchPacScript(script_url.to_owned(), e))?;
        log::info!("Read PAC script from {script_url}");

        // fail at startup, not on the first checked URL
        evaluate_find_proxy(&script, "https://example.com/", "example.com")?;

        Ok(Self {
            script,
            settings,
            clients: DashMap::new(),
        })
    }

    /// Returns a client configured with the proxy the PAC script picks for
    /// `url`.
    pub(crate) async fn client_for(&self, url: &str) -> Result<reqwest::Client> {
        let directive = self.find_proxy(url).await?;
        let proxy = first_proxy(&directive);
        let key = proxy.clone().unwrap_or_default();

        if let Some(client) = self.clients.get(&key) {
            return Ok(client.clone());
        }
        let client = build_client(&self.settings, proxy.as_deref(), proxy.is_none())?;
        let entry = self.clients.entry(key).or_insert(client);
        Ok(entry.clone())
    }

    async fn find_proxy(&self, url: &str) -> Result<String> {
        let script = self.script.clone();
        let url = url.to_owned();
        let host = domain_of(&url);
        tokio::task::spawn_blocking(move || evaluate_find_proxy(&script, &url, &host))
            .await
            .map_err(|e| ErrorKind::PacScript(e.to_string()))?
    }
}

/// Runs `FindProxyForURL` in a fresh QuickJS context.
fn evaluate_find_proxy(script: &str, url: &str, host: &str) -> Result<String> {
    let runtime = rquickjs::Runtime::new().map_err(|e| ErrorKind::PacScript(e.to_string()))?;
    let context =
        rquickjs::Context::full(&runtime).map_err(|e| ErrorKind::PacScript(e.to_string()))?;
    context.with(|ctx| {
        ctx.eval::<(), _>(PAC_PRELUDE)
            .map_err(|e| ErrorKind::PacScript(e.to_string()))?;
        ctx.eval::<(), _>(script.as_bytes().to_vec())
            .map_err(|e| ErrorKind::PacScript(e.to_string()))?;
        let call = format!(
            "FindProxyForURL({}, {})",
            serde_json::to_string(url).unwrap_or_default(),
            serde_json::to_string(host).unwrap_or_default(),
        );
        ctx.eval::<String, _>(call.into_bytes())
            .map_err(|e| ErrorKind::PacScript(e.to_string()))
    })
}

/// Picks the first `PROXY host:port` entry of a PAC directive; `DIRECT`
/// and unsupported types (SOCKS) yield `None`.
fn first_proxy(directive: &str) -> Option<String> {
    for part in directive.split(';') {
        let part = part.trim();
        if let Some(rest) = part.strip_prefix("PROXY ") {
            return Some(format!("http://{}", rest.trim()));
        }
    }
    None
}
