//! Error types for proxy leasing.

use thiserror::Error;

/// Errors that can occur while obtaining a proxy lease.
#[derive(Debug, Error)]
pub enum ProxyError {
    /// The issuing endpoint could not be reached.
    #[error("proxy issuing request to {url} failed: {source}")]
    Request {
        /// The issuing URL (without the auth key).
        url: String,
        /// The underlying network error.
        #[source]
        source: reqwest::Error,
    },

    /// The issuing endpoint answered with a non-200 status.
    #[error("proxy issuing endpoint {url} returned HTTP {status}")]
    Status {
        /// The issuing URL (without the auth key).
        url: String,
        /// The HTTP status code.
        status: u16,
    },

    /// The issuing endpoint's body was not the expected JSON.
    #[error("failed to parse proxy issuing response: {0}")]
    Parse(#[from] serde_json::Error),

    /// The endpoint answered but did not issue an address.
    #[error("no proxy address issued (code {code:?})")]
    NoLease {
        /// The code the endpoint returned instead of `SUCCESS`.
        code: String,
    },

    /// The issued deadline could not be parsed.
    #[error("invalid proxy deadline {value:?}")]
    Deadline {
        /// The raw deadline string.
        value: String,
    },

    /// The configured issuing host is not a valid URL.
    #[error("invalid proxy host {host:?}")]
    InvalidHost {
        /// The configured host.
        host: String,
    },

    /// The configured deadline UTC offset is out of range.
    #[error("invalid proxy deadline UTC offset: {hours} hours")]
    InvalidOffset {
        /// The configured offset.
        hours: i32,
    },

    /// Proxy routing was requested but no proxy cache is configured.
    #[error("proxy routing requested but no proxy is configured")]
    NotConfigured,
}
