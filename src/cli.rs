//! CLI argument definitions using clap derive macros.

use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};

use harvester_core::HarvestConfig;
use harvester_core::listings::{INACTIVE_BATCH, ListingQuery};
use harvester_core::transport::RetryMode;

/// Harvest paginated seller-platform listings.
///
/// Fetches the first page, plans the rest, runs them concurrently with
/// retries (optionally through rotating proxies) and prints the merged,
/// deduplicated records as JSON.
#[derive(Parser, Debug)]
#[command(name = "harvester")]
#[command(author, version, about)]
pub struct Args {
    /// What to harvest
    #[command(subcommand)]
    pub command: Command,

    /// Increase output verbosity (-v for debug, -vv for trace)
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Suppress non-error output
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Config file (default: $XDG_CONFIG_HOME/harvester/config.toml)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Session cookie header
    #[arg(long, global = true, default_value = "")]
    pub cookies: String,

    /// Shop ID
    #[arg(long, global = true, default_value = "")]
    pub shop_id: String,

    /// Shop region code
    #[arg(long, global = true, default_value = "")]
    pub region: String,

    /// Listing filter
    #[arg(long, global = true, default_value = "live_all")]
    pub list_type: String,

    /// Seller-center origin
    #[arg(long, global = true)]
    pub base_url: Option<String>,

    /// Worker width of every topic (1-1000)
    #[arg(short = 'c', long, global = true, value_parser = clap::value_parser!(u16).range(1..=1000))]
    pub concurrency: Option<u16>,

    /// Attempts per page, first attempt included (1-20)
    #[arg(short = 'r', long, global = true, value_parser = clap::value_parser!(u32).range(1..=20))]
    pub retries: Option<u32>,

    /// Delay between attempts in milliseconds (max 60000)
    #[arg(long, global = true, value_parser = clap::value_parser!(u64).range(0..=60000))]
    pub retry_delay_ms: Option<u64>,

    /// How terminal errors are treated by the attempt loop
    #[arg(long, global = true, value_enum)]
    pub retry_mode: Option<RetryModeArg>,

    /// Records per page (1-500)
    #[arg(long, global = true, value_parser = clap::value_parser!(u32).range(1..=500))]
    pub page_size: Option<u32>,

    /// Page bound for cursor listings
    #[arg(long, global = true, value_parser = clap::value_parser!(u32).range(1..))]
    pub max_pages: Option<u32>,

    /// Route requests through leased proxies
    #[arg(long, global = true)]
    pub proxy: bool,

    /// Proxy issuing host
    #[arg(long, global = true)]
    pub proxy_host: Option<String>,

    /// Proxy issuing key
    #[arg(long, global = true)]
    pub proxy_key: Option<String>,

    /// Stop starting new pages after this many seconds
    #[arg(long, global = true)]
    pub deadline_secs: Option<u64>,

    /// Write JSON here instead of stdout
    #[arg(short, long, global = true)]
    pub output: Option<PathBuf>,
}

/// Listings the CLI can harvest.
#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Distinct product IDs, including ongoing-campaign products
    ProductIds,
    /// Full products, deduplicated by ID
    Products,
    /// IDs of the oldest products with no likes, sales or views
    InactiveProducts {
        /// Number of IDs to return
        #[arg(long, default_value_t = INACTIVE_BATCH)]
        limit: usize,
    },
    /// Products whose days-to-ship differs from a target
    ShippingDays {
        /// Target days-to-ship; products already at it are skipped
        #[arg(long)]
        days_to_ship: i64,
    },
    /// Active seller discounts, deduplicated by discount ID
    Discounts,
}

/// CLI spelling of [`RetryMode`].
#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryModeArg {
    /// Stop at the first non-retryable error
    ShortCircuit,
    /// Always use every attempt
    Unconditional,
}

impl From<RetryModeArg> for RetryMode {
    fn from(value: RetryModeArg) -> Self {
        match value {
            RetryModeArg::ShortCircuit => Self::ShortCircuit,
            RetryModeArg::Unconditional => Self::Unconditional,
        }
    }
}

impl Args {
    /// Applies flags that were given on top of file and environment values.
    pub fn apply_overrides(&self, config: &mut HarvestConfig) {
        if let Some(base_url) = &self.base_url {
            config.base_url.clone_from(base_url);
        }
        if let Some(width) = self.concurrency {
            config.topic_concurrency = usize::from(width);
            config.shop_concurrency = None;
            config.product_concurrency = None;
        }
        if let Some(retries) = self.retries {
            config.retry_attempts = retries;
        }
        if let Some(delay) = self.retry_delay_ms {
            config.retry_delay_ms = delay;
        }
        if let Some(mode) = self.retry_mode {
            config.retry_mode = mode.into();
        }
        if self.page_size.is_some() {
            config.page_size = self.page_size;
        }
        if let Some(max_pages) = self.max_pages {
            config.max_cursor_pages = max_pages;
        }
        if self.proxy {
            config.use_proxy = true;
        }
        if self.proxy_host.is_some() {
            config.proxy_host.clone_from(&self.proxy_host);
        }
        if self.proxy_key.is_some() {
            config.proxy_key.clone_from(&self.proxy_key);
        }
    }

    /// The listing inputs.
    #[must_use]
    pub fn query(&self, config: &HarvestConfig) -> ListingQuery {
        ListingQuery {
            page_size: config.page_size,
            ..ListingQuery::new(
                self.cookies.as_str(),
                self.shop_id.as_str(),
                self.region.as_str(),
                self.list_type.as_str(),
            )
        }
    }
}
