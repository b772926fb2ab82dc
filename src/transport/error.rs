//! Error types for the transport module.
//!
//! Every failed page request ends up as a [`FetchError`]. The variants carry
//! enough context (URL, status, business code) for log lines and for
//! [`classify_error`](super::classify_error) to decide whether another attempt
//! is worthwhile.

use thiserror::Error;

use crate::proxy::ProxyError;

/// Errors that can occur while issuing a single platform request.
#[derive(Debug, Error)]
pub enum FetchError {
    /// Network-level error (DNS resolution, connection refused, proxy tunnel, etc.)
    #[error("network error requesting {url}: {source}")]
    Network {
        /// The URL that failed.
        url: String,
        /// The underlying network error.
        #[source]
        source: reqwest::Error,
    },

    /// Request timed out before completion.
    #[error("timeout requesting {url}")]
    Timeout {
        /// The URL that timed out.
        url: String,
    },

    /// HTTP error response (4xx client errors, 5xx server errors).
    #[error("HTTP {status} requesting {url}")]
    HttpStatus {
        /// The URL that returned an error status.
        url: String,
        /// The HTTP status code.
        status: u16,
    },

    /// The platform reported that requests are arriving too fast.
    #[error("rate limited: {message}")]
    RateLimited {
        /// Message reported by the platform.
        message: String,
    },

    /// The session cookie was rejected or has expired.
    #[error("[AUTH] session rejected (code {code}): {message}")]
    Auth {
        /// Business code reported by the platform.
        code: i64,
        /// Message reported by the platform.
        message: String,
    },

    /// Input parameters or a verification challenge blocked the request.
    #[error("validation failed: {message}")]
    Validation {
        /// What was invalid.
        message: String,
    },

    /// The response body was not the JSON shape we expected.
    #[error("failed to parse response from {url}: {source}")]
    Parsing {
        /// The URL whose body failed to decode.
        url: String,
        /// The underlying JSON error.
        #[source]
        source: serde_json::Error,
    },

    /// The platform answered with a non-success business code.
    #[error("API error (code {code}): {message}")]
    Api {
        /// Business code reported by the platform.
        code: i64,
        /// Message reported by the platform.
        message: String,
    },

    /// No proxy lease could be obtained for a proxied attempt.
    #[error("proxy lease unavailable: {0}")]
    Proxy(#[from] ProxyError),

    /// The request path could not be joined onto the base URL.
    #[error("invalid URL: {url}")]
    InvalidUrl {
        /// The invalid URL string.
        url: String,
    },
}

impl FetchError {
    /// Creates a network error from a reqwest error.
    pub fn network(url: impl Into<String>, source: reqwest::Error) -> Self {
        Self::Network {
            url: url.into(),
            source,
        }
    }

    /// Creates a timeout error.
    pub fn timeout(url: impl Into<String>) -> Self {
        Self::Timeout { url: url.into() }
    }

    /// Creates an HTTP status error.
    pub fn http_status(url: impl Into<String>, status: u16) -> Self {
        Self::HttpStatus {
            url: url.into(),
            status,
        }
    }

    /// Creates a rate-limit error.
    pub fn rate_limited(message: impl Into<String>) -> Self {
        Self::RateLimited {
            message: message.into(),
        }
    }

    /// Creates an authentication error.
    pub fn auth(code: i64, message: impl Into<String>) -> Self {
        Self::Auth {
            code,
            message: message.into(),
        }
    }

    /// Creates a validation error.
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation {
            message: message.into(),
        }
    }

    /// Creates a parsing error.
    pub fn parsing(url: impl Into<String>, source: serde_json::Error) -> Self {
        Self::Parsing {
            url: url.into(),
            source,
        }
    }

    /// Creates an API (business code) error.
    pub fn api(code: i64, message: impl Into<String>) -> Self {
        Self::Api {
            code,
            message: message.into(),
        }
    }

    /// Creates an invalid URL error.
    pub fn invalid_url(url: impl Into<String>) -> Self {
        Self::InvalidUrl { url: url.into() }
    }
}

// No `From<reqwest::Error>` or `From<serde_json::Error>`: both variants need
// the request URL, which the source errors don't carry.

/// The final error of a request after the attempt loop gave up.
#[derive(Debug, Error)]
#[error("{error} (after {attempts} attempt(s))")]
pub struct RetryExhausted {
    /// The error returned by the last attempt.
    #[source]
    pub error: FetchError,
    /// How many attempts were made in total.
    pub attempts: u32,
}
