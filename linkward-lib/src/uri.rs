//! URL helpers shared by the pipeline and the service layer.

use url::Url;

const BAD_URL_PLACEHOLDER: &str = "<bad url>";
const NO_DOMAIN_PLACEHOLDER: &str = "<no domain or protocol>";

const LOGGING_USER_DATA_MAX_LENGTH: usize = 100;

/// Returns the host of `input` without the port, or a placeholder when the
/// URL cannot be parsed or has no authority. Used as the key for domain
/// rate limiting, blacklisting and per-domain stats.
#[must_use]
pub fn domain_of(input: &str) -> String {
    match Url::parse(input.trim()) {
        Ok(url) => match url.host_str() {
            Some(host) if !host.is_empty() => host.to_owned(),
            _ => NO_DOMAIN_PLACEHOLDER.to_owned(),
        },
        Err(url::ParseError::RelativeUrlWithoutBase | url::ParseError::EmptyHost) => {
            NO_DOMAIN_PLACEHOLDER.to_owned()
        }
        Err(_) => BAD_URL_PLACEHOLDER.to_owned(),
    }
}

/// Canonical form used for deduplication and cache keys: trimmed, parsed
/// and re-serialized. Unparsable input falls back to the trimmed string;
/// the checker will produce the error later.
#[must_use]
pub fn normalized_url(input: &str) -> String {
    let trimmed = input.trim();
    match Url::parse(trimmed) {
        Ok(url) => url.to_string(),
        Err(_) => trimmed.to_owned(),
    }
}

/// `host:port` of a URL with the scheme's default port filled in; the key
/// of the DNS cache.
#[must_use]
pub(crate) fn normalize_address_of(input: &str) -> String {
    let Ok(url) = Url::parse(input) else {
        return BAD_URL_PLACEHOLDER.to_owned();
    };
    let host = url.host_str().unwrap_or_default();
    match url.port() {
        Some(port) => format!("{host}:{port}"),
        None => match url.scheme() {
            "http" => format!("{host}:80"),
            "https" => format!("{host}:443"),
            _ => host.to_owned(),
        },
    }
}

/// Strips newlines from user-supplied data and caps its length so log
/// lines cannot be forged or flooded.
#[must_use]
pub fn sanitize_log_input(input: &str) -> String {
    let cleaned = input.replace(['\n', '\r'], " ");
    if cleaned.chars().count() > LOGGING_USER_DATA_MAX_LENGTH {
        cleaned.chars().take(LOGGING_USER_DATA_MAX_LENGTH).collect()
    } else {
        cleaned
    }
}
