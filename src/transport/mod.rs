//! Request execution: the HTTP transport, retry policy and attempt loop.
//!
//! # Overview
//!
//! - [`HttpTransport`] sends one request once. [`ReqwestTransport`] is the
//!   production implementation.
//! - [`RetryPolicy`] decides whether a failed attempt gets another try.
//! - [`RetryingTransport`] runs the attempt loop, sleeping a fixed delay
//!   between attempts and leasing a proxy per attempt when asked to.

mod client;
mod error;
mod retry;
mod retrying;

pub use client::{
    ApiRequest, BROWSER_USER_AGENT, CONNECT_TIMEOUT_SECS, ClientSettings, HttpTransport,
    QueryParams, REQUEST_TIMEOUT_SECS, RawResponse, ReqwestTransport,
};
pub use error::{FetchError, RetryExhausted};
pub use retry::{
    DEFAULT_MAX_ATTEMPTS, DEFAULT_RETRY_DELAY, FailureType, RetryDecision, RetryMode,
    RetryPolicy, RetryPredicate, classify_error, is_retryable_error,
};
pub use retrying::{RecordingSleeper, RetryingTransport, Sleeper, TokioSleeper};
