//! The external proxy-issuing endpoint.
//!
//! `GET {host}/get?key={key}` answers
//! `{"code":"SUCCESS","data":[{"server":"1.2.3.4:5678","deadline":"2025-07-20 17:15:37"}]}`.
//! The deadline is wall-clock time in the provider's timezone (UTC+8 by default).

use async_trait::async_trait;
use chrono::{DateTime, FixedOffset, NaiveDateTime, TimeZone, Utc};
use reqwest::Client;
use serde::Deserialize;
use tracing::{debug, instrument};
use url::Url;

use super::{ProxyError, ProxyLease};

/// Format of the issued `deadline` field.
pub const DEADLINE_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Default UTC offset of issued deadlines, in hours.
pub const DEFAULT_DEADLINE_UTC_OFFSET_HOURS: i32 = 8;

const SUCCESS_CODE: &str = "SUCCESS";

/// Issues fresh proxy leases.
#[async_trait]
pub trait LeaseSource: Send + Sync {
    /// Requests a new lease from the provider.
    async fn issue(&self) -> Result<ProxyLease, ProxyError>;
}

#[derive(Debug, Deserialize)]
struct IssueResponse {
    #[serde(default)]
    code: String,
    #[serde(default)]
    data: Vec<IssuedProxy>,
}

#[derive(Debug, Deserialize)]
struct IssuedProxy {
    server: String,
    deadline: String,
}

/// [`LeaseSource`] backed by the provider's HTTP endpoint.
#[derive(Debug, Clone)]
pub struct HttpLeaseSource {
    client: Client,
    endpoint: Url,
    key: String,
    offset: FixedOffset,
}

impl HttpLeaseSource {
    /// Creates a source for `host` authenticated with `key`.
    ///
    /// # Errors
    ///
    /// Returns [`ProxyError::InvalidHost`] if `host` is not a URL, or
    /// [`ProxyError::InvalidOffset`] if `utc_offset_hours` is out of range.
    pub fn new(
        client: Client,
        host: &str,
        key: impl Into<String>,
        utc_offset_hours: i32,
    ) -> Result<Self, ProxyError> {
        let endpoint = Url::parse(&format!("{}/get", host.trim_end_matches('/')))
            .map_err(|_| ProxyError::InvalidHost {
                host: host.to_string(),
            })?;
        let offset = utc_offset_hours
            .checked_mul(3600)
            .and_then(FixedOffset::east_opt)
            .ok_or(ProxyError::InvalidOffset {
                hours: utc_offset_hours,
            })?;
        Ok(Self {
            client,
            endpoint,
            key: key.into(),
            offset,
        })
    }
}

#[async_trait]
impl LeaseSource for HttpLeaseSource {
    #[instrument(skip(self), fields(endpoint = %self.endpoint))]
    async fn issue(&self) -> Result<ProxyLease, ProxyError> {
        let mut url = self.endpoint.clone();
        url.query_pairs_mut().append_pair("key", &self.key);

        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|source| ProxyError::Request {
                url: self.endpoint.to_string(),
                source,
            })?;

        let status = response.status();
        if status != reqwest::StatusCode::OK {
            return Err(ProxyError::Status {
                url: self.endpoint.to_string(),
                status: status.as_u16(),
            });
        }

        let body = response
            .text()
            .await
            .map_err(|source| ProxyError::Request {
                url: self.endpoint.to_string(),
                source,
            })?;
        let parsed: IssueResponse = serde_json::from_str(&body)?;

        let issued = match parsed.data.into_iter().next() {
            Some(issued) if parsed.code == SUCCESS_CODE => issued,
            _ => return Err(ProxyError::NoLease { code: parsed.code }),
        };

        let expires_at = parse_deadline(&issued.deadline, self.offset)?;
        debug!(address = %issued.server, %expires_at, "proxy issued");
        Ok(ProxyLease {
            address: issued.server,
            expires_at,
        })
    }
}

/// Parses a provider deadline written as wall-clock time at `offset`.
///
/// # Errors
///
/// Returns [`ProxyError::Deadline`] if `value` does not match [`DEADLINE_FORMAT`].
pub fn parse_deadline(value: &str, offset: FixedOffset) -> Result<DateTime<Utc>, ProxyError> {
    let invalid = || ProxyError::Deadline {
        value: value.to_string(),
    };
    let naive = NaiveDateTime::parse_from_str(value.trim(), DEADLINE_FORMAT).map_err(|_| invalid())?;
    let local = offset.from_local_datetime(&naive).single().ok_or_else(invalid)?;
    Ok(local.with_timezone(&Utc))
}
