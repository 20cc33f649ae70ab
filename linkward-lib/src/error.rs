use thiserror::Error;

/// Result type alias for checker construction and configuration errors.
pub type Result<T> = std::result::Result<T, ErrorKind>;

/// Kinds of configuration and client-construction errors.
///
/// Note: The error messages can change over time, so don't match on the
/// output. Per-URL failures are not represented here; they travel in-band
/// inside [`crate::CheckResult`].
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum ErrorKind {
    /// The network client required for making requests cannot be created
    #[error("Error creating request client: {0}")]
    BuildRequestClient(#[source] reqwest::Error),

    /// The given proxy URL was rejected by the HTTP client
    #[error("Rejected proxy URL `{0}`")]
    InvalidProxy(String),

    /// The PAC script could not be fetched at startup
    #[error("Could not fetch a PAC script from `{0}`: {1}")]
    FetchPacScript(String, #[source] reqwest::Error),

    /// The PAC script could not be parsed or evaluated
    #[error("Could not evaluate the PAC script: {0}")]
    PacScript(String),

    /// An unrecognized plugin name was configured
    #[error("Unknown checker plugin: `{0}`")]
    UnknownPlugin(String),

    /// The checker chain must contain at least one plugin
    #[error("Found no checker plugins, configure at least one")]
    EmptyCheckerChain,

    /// `urlcheck-noproxy` serves no purpose unless a proxy is configured
    #[error("No point in adding a `urlcheck-noproxy` checker, as no proxy URL is defined")]
    NoProxyPluginWithoutProxy,

    /// `urlcheck-pac` requires a PAC script URL
    #[error("Cannot instantiate a `urlcheck-pac` checker without a proxy auto-config script configured")]
    PacPluginWithoutScript,

    /// A configured body pattern is not a valid regular expression
    #[error("Invalid body pattern `{0}`: {1}")]
    InvalidBodyPattern(String, #[source] regex::Error),
}
