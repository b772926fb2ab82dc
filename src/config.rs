//! Harvest configuration: defaults, config file, environment overrides.
//!
//! Sources, lowest priority first:
//! 1. built-in defaults
//! 2. the `key = value` config file
//! 3. `HARVESTER_<KEY>` environment variables
//!
//! CLI flags are applied on top by the binary, after which
//! [`HarvestConfig::validate`] runs once over the merged result.

use std::env;
use std::ffi::OsString;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use thiserror::Error;
use url::Url;

use crate::harvest::DEFAULT_MAX_PAGES;
use crate::pool::{
    DEFAULT_MAX_BLOCKING_TASKS, DEFAULT_TOPIC_CONCURRENCY, MAX_CONCURRENCY, MIN_CONCURRENCY,
    TOPIC_PRODUCT, TOPIC_SHOP,
};
use crate::proxy::DEFAULT_DEADLINE_UTC_OFFSET_HOURS;
use crate::transport::{
    BROWSER_USER_AGENT, CONNECT_TIMEOUT_SECS, ClientSettings, DEFAULT_MAX_ATTEMPTS,
    REQUEST_TIMEOUT_SECS, RetryMode, RetryPolicy,
};

/// Default seller-center origin.
pub const DEFAULT_BASE_URL: &str = "https://seller.shopee.cn";

/// Prefix of environment overrides.
pub const ENV_PREFIX: &str = "HARVESTER_";

const DEFAULT_RETRY_DELAY_MS: u64 = 2000;
const MAX_RETRY_ATTEMPTS: u32 = 20;
const MAX_DELAY_MS: u64 = 60_000;
const MAX_PAGE_SIZE: u32 = 500;

/// Errors raised while loading or validating configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The config file could not be read.
    #[error("failed to read config file '{}': {source}", path.display())]
    Read {
        /// The file path.
        path: PathBuf,
        /// The underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// A line is not `key = value`.
    #[error("invalid config syntax on line {line}: expected key = value")]
    Syntax {
        /// 1-based line number.
        line: usize,
    },

    /// A key nobody reads.
    #[error("unknown configuration key '{key}' ({origin})")]
    UnknownKey {
        /// The offending key.
        key: String,
        /// Where it came from.
        origin: String,
    },

    /// A value that does not parse or is out of range.
    #[error("invalid value {value:?} for `{key}` ({origin}): expected {expected}")]
    InvalidValue {
        /// The key.
        key: String,
        /// The raw value.
        value: String,
        /// What would have been accepted.
        expected: String,
        /// Where it came from.
        origin: String,
    },
}

impl ConfigError {
    fn invalid(key: &str, value: impl ToString, expected: impl Into<String>, origin: &str) -> Self {
        Self::InvalidValue {
            key: key.to_string(),
            value: value.to_string(),
            expected: expected.into(),
            origin: origin.to_string(),
        }
    }
}

/// How a raw value was written.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Syntax {
    /// Config file: strings must be double-quoted.
    File,
    /// Environment: bare values.
    Env,
}

/// Settings for one process.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HarvestConfig {
    /// Seller-center origin every listing path is resolved against.
    pub base_url: String,
    /// Worker width of every registered topic.
    pub topic_concurrency: usize,
    /// Width override for the `shop` topic.
    pub shop_concurrency: Option<usize>,
    /// Width override for the `product` topic.
    pub product_concurrency: Option<usize>,
    /// Queue limit beyond the running width; 0 disables the limit.
    pub max_blocking_tasks: usize,
    /// Attempts per page, first attempt included.
    pub retry_attempts: u32,
    /// Fixed delay between attempts.
    pub retry_delay_ms: u64,
    /// Upper bound of random jitter added to the delay.
    pub retry_jitter_ms: u64,
    /// Whether terminal errors stop the attempt loop early.
    pub retry_mode: RetryMode,
    /// Overrides every listing's default page size.
    pub page_size: Option<u32>,
    /// Page bound for cursor listings.
    pub max_cursor_pages: u32,
    /// Route requests through leased proxies.
    pub use_proxy: bool,
    /// Proxy issuing host.
    pub proxy_host: Option<String>,
    /// Proxy issuing key.
    pub proxy_key: Option<String>,
    /// UTC offset of the lease deadlines the provider reports.
    pub proxy_deadline_utc_offset_hours: i32,
    /// TCP connect timeout.
    pub connect_timeout_secs: u64,
    /// Whole-request timeout.
    pub request_timeout_secs: u64,
}

impl Default for HarvestConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            topic_concurrency: DEFAULT_TOPIC_CONCURRENCY,
            shop_concurrency: None,
            product_concurrency: None,
            max_blocking_tasks: DEFAULT_MAX_BLOCKING_TASKS,
            retry_attempts: DEFAULT_MAX_ATTEMPTS,
            retry_delay_ms: DEFAULT_RETRY_DELAY_MS,
            retry_jitter_ms: 0,
            retry_mode: RetryMode::ShortCircuit,
            page_size: None,
            max_cursor_pages: DEFAULT_MAX_PAGES,
            use_proxy: false,
            proxy_host: None,
            proxy_key: None,
            proxy_deadline_utc_offset_hours: DEFAULT_DEADLINE_UTC_OFFSET_HOURS,
            connect_timeout_secs: CONNECT_TIMEOUT_SECS,
            request_timeout_secs: REQUEST_TIMEOUT_SECS,
        }
    }
}

/// A config plus the file it was read from, if any.
#[derive(Debug, Clone)]
pub struct LoadedConfig {
    /// Merged defaults, file and environment.
    pub config: HarvestConfig,
    /// The file that was read.
    pub path: Option<PathBuf>,
}

impl HarvestConfig {
    /// Loads defaults, then `explicit` (or the default path if it exists),
    /// then `HARVESTER_*` environment variables. Does not validate.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if the file cannot be read or a value is malformed.
    pub fn load(explicit: Option<&Path>) -> Result<LoadedConfig, ConfigError> {
        let mut config = Self::default();
        let path = match explicit {
            Some(path) => Some(path.to_path_buf()),
            None => resolve_default_config_path().filter(|path| path.exists()),
        };
        if let Some(path) = &path {
            config.apply_file(path)?;
        }
        config.apply_env(
            env::vars_os()
                .filter_map(|(name, value)| Some((name.into_string().ok()?, value.into_string().ok()?))),
        )?;
        Ok(LoadedConfig { config, path })
    }

    /// Applies a config file on top of the current values.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Read`] if the file is unreadable, or a parse error.
    pub fn apply_file(&mut self, path: &Path) -> Result<(), ConfigError> {
        let raw = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        self.apply_str(&raw)
    }

    /// Applies `key = value` lines on top of the current values.
    ///
    /// `#` starts a comment outside of quoted strings; strings must be quoted.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] for bad syntax, unknown keys or bad values.
    pub fn apply_str(&mut self, raw: &str) -> Result<(), ConfigError> {
        for (index, raw_line) in raw.lines().enumerate() {
            let line = strip_inline_comment(raw_line).trim();
            if line.is_empty() {
                continue;
            }
            let Some((key, value)) = line.split_once('=') else {
                return Err(ConfigError::Syntax { line: index + 1 });
            };
            let origin = format!("line {}", index + 1);
            self.set(key.trim(), value.trim(), Syntax::File, &origin)?;
        }
        Ok(())
    }

    /// Applies `HARVESTER_<KEY>` variables from `vars`. Other variables are ignored.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] for unknown `HARVESTER_` keys or bad values.
    pub fn apply_env<I>(&mut self, vars: I) -> Result<(), ConfigError>
    where
        I: IntoIterator<Item = (String, String)>,
    {
        for (name, value) in vars {
            let Some(key) = name.strip_prefix(ENV_PREFIX) else {
                continue;
            };
            let key = key.to_ascii_lowercase();
            self.set(&key, value.trim(), Syntax::Env, &name)?;
        }
        Ok(())
    }

    fn set(&mut self, key: &str, value: &str, syntax: Syntax, origin: &str) -> Result<(), ConfigError> {
        match key {
            "base_url" => self.base_url = parse_string(key, value, syntax, origin)?,
            "topic_concurrency" => self.topic_concurrency = parse_number(key, value, origin)?,
            "shop_concurrency" => self.shop_concurrency = Some(parse_number(key, value, origin)?),
            "product_concurrency" => {
                self.product_concurrency = Some(parse_number(key, value, origin)?);
            }
            "max_blocking_tasks" => self.max_blocking_tasks = parse_number(key, value, origin)?,
            "retry_attempts" => self.retry_attempts = parse_number(key, value, origin)?,
            "retry_delay_ms" => self.retry_delay_ms = parse_number(key, value, origin)?,
            "retry_jitter_ms" => self.retry_jitter_ms = parse_number(key, value, origin)?,
            "retry_mode" => {
                let raw = parse_string(key, value, syntax, origin)?;
                self.retry_mode = parse_retry_mode(&raw)
                    .ok_or_else(|| ConfigError::invalid(key, &raw, "short-circuit or unconditional", origin))?;
            }
            "page_size" => self.page_size = Some(parse_number(key, value, origin)?),
            "max_cursor_pages" => self.max_cursor_pages = parse_number(key, value, origin)?,
            "use_proxy" => self.use_proxy = parse_boolean(key, value, origin)?,
            "proxy_host" => self.proxy_host = Some(parse_string(key, value, syntax, origin)?),
            "proxy_key" => self.proxy_key = Some(parse_string(key, value, syntax, origin)?),
            "proxy_deadline_utc_offset_hours" => {
                self.proxy_deadline_utc_offset_hours = parse_number(key, value, origin)?;
            }
            "connect_timeout_secs" => self.connect_timeout_secs = parse_number(key, value, origin)?,
            "request_timeout_secs" => self.request_timeout_secs = parse_number(key, value, origin)?,
            _ => {
                return Err(ConfigError::UnknownKey {
                    key: key.to_string(),
                    origin: origin.to_string(),
                });
            }
        }
        Ok(())
    }

    /// Checks the merged values.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::InvalidValue`] for the first value out of range.
    pub fn validate(&self) -> Result<(), ConfigError> {
        const ORIGIN: &str = "merged config";

        if Url::parse(&self.base_url).is_err() {
            return Err(ConfigError::invalid("base_url", &self.base_url, "an absolute URL", ORIGIN));
        }

        let width = MIN_CONCURRENCY..=MAX_CONCURRENCY;
        let expected_width = format!("{MIN_CONCURRENCY}..={MAX_CONCURRENCY}");
        for (key, value) in [
            ("topic_concurrency", Some(self.topic_concurrency)),
            ("shop_concurrency", self.shop_concurrency),
            ("product_concurrency", self.product_concurrency),
        ] {
            if let Some(value) = value
                && !width.contains(&value)
            {
                return Err(ConfigError::invalid(key, value, expected_width.as_str(), ORIGIN));
            }
        }

        if !(1..=MAX_RETRY_ATTEMPTS).contains(&self.retry_attempts) {
            return Err(ConfigError::invalid(
                "retry_attempts",
                self.retry_attempts,
                format!("1..={MAX_RETRY_ATTEMPTS}"),
                ORIGIN,
            ));
        }
        for (key, value) in [
            ("retry_delay_ms", self.retry_delay_ms),
            ("retry_jitter_ms", self.retry_jitter_ms),
        ] {
            if value > MAX_DELAY_MS {
                return Err(ConfigError::invalid(key, value, format!("0..={MAX_DELAY_MS}"), ORIGIN));
            }
        }

        if let Some(size) = self.page_size
            && !(1..=MAX_PAGE_SIZE).contains(&size)
        {
            return Err(ConfigError::invalid("page_size", size, format!("1..={MAX_PAGE_SIZE}"), ORIGIN));
        }
        if self.max_cursor_pages == 0 {
            return Err(ConfigError::invalid("max_cursor_pages", 0, "at least 1", ORIGIN));
        }

        for (key, value) in [
            ("connect_timeout_secs", self.connect_timeout_secs),
            ("request_timeout_secs", self.request_timeout_secs),
        ] {
            if !(1..=3600).contains(&value) {
                return Err(ConfigError::invalid(key, value, "1..=3600", ORIGIN));
            }
        }

        if !(-12..=14).contains(&self.proxy_deadline_utc_offset_hours) {
            return Err(ConfigError::invalid(
                "proxy_deadline_utc_offset_hours",
                self.proxy_deadline_utc_offset_hours,
                "-12..=14",
                ORIGIN,
            ));
        }
        if self.use_proxy {
            for (key, value) in [("proxy_host", &self.proxy_host), ("proxy_key", &self.proxy_key)] {
                if value.as_deref().is_none_or(|v| v.trim().is_empty()) {
                    return Err(ConfigError::invalid(key, "", "a non-empty value when use_proxy is set", ORIGIN));
                }
            }
        }
        Ok(())
    }

    /// Width of `topic`, honoring the per-topic overrides.
    #[must_use]
    pub fn concurrency_for(&self, topic: &str) -> usize {
        let width = match topic {
            TOPIC_SHOP => self.shop_concurrency,
            TOPIC_PRODUCT => self.product_concurrency,
            _ => None,
        };
        width.unwrap_or(self.topic_concurrency)
    }

    /// The retry policy these settings describe.
    #[must_use]
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(self.retry_attempts, Duration::from_millis(self.retry_delay_ms))
            .with_jitter(Duration::from_millis(self.retry_jitter_ms))
            .with_mode(self.retry_mode)
    }

    /// The HTTP client settings these values describe.
    #[must_use]
    pub fn client_settings(&self) -> ClientSettings {
        ClientSettings {
            connect_timeout: Duration::from_secs(self.connect_timeout_secs),
            request_timeout: Duration::from_secs(self.request_timeout_secs),
            user_agent: BROWSER_USER_AGENT.to_string(),
        }
    }
}

/// Resolves the default config path.
///
/// Priority:
/// 1. `$XDG_CONFIG_HOME/harvester/config.toml`
/// 2. `$HOME/.config/harvester/config.toml`
#[must_use]
pub fn resolve_default_config_path() -> Option<PathBuf> {
    if let Some(xdg_config_home) = env_var_non_empty_os("XDG_CONFIG_HOME") {
        return Some(PathBuf::from(xdg_config_home).join("harvester").join("config.toml"));
    }
    let home = env_var_non_empty_os("HOME")?;
    Some(PathBuf::from(home).join(".config").join("harvester").join("config.toml"))
}

fn env_var_non_empty_os(name: &str) -> Option<OsString> {
    let value = env::var_os(name)?;
    if value.is_empty() { None } else { Some(value) }
}

fn strip_inline_comment(line: &str) -> &str {
    let mut in_string = false;
    for (index, ch) in line.char_indices() {
        match ch {
            '"' => in_string = !in_string,
            '#' if !in_string => return &line[..index],
            _ => {}
        }
    }
    line
}

fn parse_string(key: &str, raw: &str, syntax: Syntax, origin: &str) -> Result<String, ConfigError> {
    match syntax {
        Syntax::Env => Ok(raw.to_string()),
        Syntax::File => {
            if raw.len() < 2 || !raw.starts_with('"') || !raw.ends_with('"') {
                return Err(ConfigError::invalid(key, raw, "a double-quoted string", origin));
            }
            Ok(raw[1..raw.len() - 1].to_string())
        }
    }
}

fn parse_number<T: std::str::FromStr>(key: &str, raw: &str, origin: &str) -> Result<T, ConfigError> {
    raw.parse::<T>()
        .map_err(|_| ConfigError::invalid(key, raw, "an integer in range", origin))
}

fn parse_boolean(key: &str, raw: &str, origin: &str) -> Result<bool, ConfigError> {
    match raw {
        "true" => Ok(true),
        "false" => Ok(false),
        _ => Err(ConfigError::invalid(key, raw, "true or false", origin)),
    }
}

/// Parses `short-circuit` / `short_circuit` / `unconditional`.
#[must_use]
pub fn parse_retry_mode(raw: &str) -> Option<RetryMode> {
    match raw.trim().to_ascii_lowercase().replace('_', "-").as_str() {
        "short-circuit" => Some(RetryMode::ShortCircuit),
        "unconditional" => Some(RetryMode::Unconditional),
        _ => None,
    }
}
