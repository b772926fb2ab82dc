//! The platform's common response envelope.
//!
//! Every listing endpoint wraps its payload as
//! `{"code":0,"errcode":0,"message":"","user_message":"","data":{...}}`.
//! The business code and message are checked before `data` is trusted: a
//! 200 response can still be a rate-limit or an expired session.

use serde::Deserialize;
use serde::de::DeserializeOwned;

use crate::transport::{FetchError, RawResponse};

/// Business code for success.
pub const SUCCESS_CODE: i64 = 0;

/// Business code meaning the session token was not found.
pub const TOKEN_NOT_FOUND_CODE: i64 = 2;

/// Message sentinel for a server-side failure.
pub const ERROR_SERVER: &str = "error_server";

/// Message sentinel for a verification-code challenge.
pub const ERROR_NEED_VCODE: &str = "error_need_vcode";

/// Message sentinel for a rejected verification code.
pub const ERROR_INVALID_VCODE: &str = "error_invalid_vcode";

/// Message sentinel for bad credentials.
pub const ERROR_BAD_CREDENTIALS: &str = "error_name_or_password_incorrect";

/// Message sentinel for rate limiting.
pub const RATE_LIMIT_MESSAGE: &str = "requests too frequent";

/// Generic response envelope bound to a concrete payload type.
#[derive(Debug, Clone, Deserialize)]
pub struct Envelope<T> {
    /// Business code; zero on success.
    #[serde(default)]
    pub code: i64,
    /// Alternate business code some endpoints use instead of `code`.
    #[serde(default)]
    pub errcode: i64,
    /// Machine-readable message or sentinel.
    #[serde(default)]
    pub message: String,
    /// Human-readable message.
    #[serde(default)]
    pub user_message: String,
    /// Payload; absent on most failures.
    pub data: Option<T>,
}

impl<T> Envelope<T> {
    /// Checks both business codes, then yields the payload.
    ///
    /// # Errors
    ///
    /// Returns the classified business error, or [`FetchError::Api`] when a
    /// successful envelope carries no payload.
    pub fn into_data(self) -> Result<T, FetchError> {
        check_business(self.code, &self.message)?;
        check_business(self.errcode, &self.message)?;
        self.data
            .ok_or_else(|| FetchError::api(self.code, "response carried no data"))
    }
}

/// Maps a business code and message onto the error taxonomy.
///
/// Known message sentinels take precedence over the code.
///
/// # Errors
///
/// Returns the classified error for any non-success answer.
pub fn check_business(code: i64, message: &str) -> Result<(), FetchError> {
    match message {
        ERROR_SERVER => return Err(FetchError::api(code, message)),
        ERROR_NEED_VCODE => {
            return Err(FetchError::validation("verification code required"));
        }
        ERROR_INVALID_VCODE => {
            return Err(FetchError::validation("verification code rejected"));
        }
        ERROR_BAD_CREDENTIALS => {
            return Err(FetchError::auth(code, "account name or password incorrect"));
        }
        RATE_LIMIT_MESSAGE => return Err(FetchError::rate_limited(message)),
        _ => {}
    }

    match code {
        SUCCESS_CODE => Ok(()),
        TOKEN_NOT_FOUND_CODE => Err(FetchError::auth(code, "session cookie expired, log in again")),
        _ => Err(FetchError::api(code, message)),
    }
}

/// Decodes a raw response as an envelope and returns its checked payload.
///
/// # Errors
///
/// Returns [`FetchError::Parsing`] for malformed JSON, otherwise whatever
/// [`Envelope::into_data`] reports.
pub fn decode_envelope<T: DeserializeOwned>(raw: &RawResponse) -> Result<T, FetchError> {
    let envelope: Envelope<T> =
        serde_json::from_str(&raw.body).map_err(|e| FetchError::parsing(&raw.url, e))?;
    envelope.into_data()
}
