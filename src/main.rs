//! CLI entry point for the harvester tool.

use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use harvester_core::harvest::{HarvestOutcome, HarvestReport, HarvestRequest};
use harvester_core::listings::inactive_product_ids;
use harvester_core::{
    DiscountListing, HarvestConfig, HarvestContext, ProductIdListing, ProductListing,
    ShippingDaysListing,
};
use serde::Serialize;
use tokio::time::Instant;
use tracing::{debug, info, warn};

mod cli;

use cli::{Args, Command};

#[derive(Serialize)]
struct Output<T: Serialize> {
    records: Vec<T>,
    report: HarvestReport,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Parse CLI arguments first (before tracing, so --help works without logs)
    let args = Args::parse();

    // Priority: RUST_LOG env var > quiet flag > verbose flag > default (info)
    let default_level = if args.quiet {
        "error"
    } else {
        match args.verbose {
            0 => "info",
            1 => "debug",
            _ => "trace",
        }
    };

    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .init();

    debug!(?args, "CLI arguments parsed");

    let loaded = HarvestConfig::load(args.config.as_deref()).context("Failed to load configuration")?;
    if let Some(path) = &loaded.path {
        debug!(path = %path.display(), "configuration file loaded");
    }
    let mut config = loaded.config;
    args.apply_overrides(&mut config);
    config.validate().context("Invalid configuration")?;

    let query = args.query(&config);
    query.validate()?;

    let deadline = args
        .deadline_secs
        .map(|secs| Instant::now() + Duration::from_secs(secs));
    let finish = |request: HarvestRequest| match deadline {
        Some(deadline) => request.with_deadline(deadline),
        None => request,
    };

    let context = HarvestContext::from_config(&config).context("Failed to initialize harvester")?;
    info!(command = ?args.command, shop_id = %query.shop_id, "harvester starting");

    let json = match &args.command {
        Command::ProductIds => {
            let request = finish(ProductIdListing::request(&query)?);
            let outcome = context.harvest(ProductIdListing, &request).await?;
            render(&keys_only(outcome))?
        }
        Command::Products => {
            let request = finish(ProductListing::request(&query)?);
            render(&values_only(context.harvest(ProductListing, &request).await?))?
        }
        Command::InactiveProducts { limit } => {
            let request = finish(ProductListing::request(&query)?);
            let outcome = context.harvest(ProductListing, &request).await?;
            let products = outcome.records.into_iter().map(|(_, product)| product);
            render(&Output {
                records: inactive_product_ids(products, *limit),
                report: outcome.report,
            })?
        }
        Command::ShippingDays { days_to_ship } => {
            let request = finish(ShippingDaysListing::request(&query)?)
                .with_max_pages(config.max_cursor_pages);
            let listing = ShippingDaysListing::new(*days_to_ship);
            render(&values_only(context.harvest(listing, &request).await?))?
        }
        Command::Discounts => {
            let request = finish(DiscountListing::request(&query)?);
            let outcome = context.harvest(DiscountListing, &request).await?;
            let missing = DiscountListing::shortfall(&outcome.report);
            if missing > 0 {
                warn!(
                    missing,
                    total_count = outcome.report.total_reported,
                    "fewer distinct discounts than the endpoint reported"
                );
            }
            render(&values_only(outcome))?
        }
    };

    context.release().await?;

    match &args.output {
        Some(path) => {
            let mut file = BufWriter::new(
                File::create(path)
                    .with_context(|| format!("Failed to create output file '{}'", path.display()))?,
            );
            file.write_all(json.as_bytes())?;
            file.flush()?;
            info!(path = %path.display(), "results written");
        }
        None => {
            let mut stdout = io::stdout().lock();
            stdout.write_all(json.as_bytes())?;
            stdout.write_all(b"\n")?;
        }
    }

    Ok(())
}

fn keys_only<K, V>(outcome: HarvestOutcome<K, V>) -> Output<K>
where
    K: Serialize,
{
    Output {
        records: outcome.records.into_iter().map(|(key, _)| key).collect(),
        report: outcome.report,
    }
}

fn values_only<K, V>(outcome: HarvestOutcome<K, V>) -> Output<V>
where
    V: Serialize,
{
    Output {
        records: outcome.records.into_iter().map(|(_, value)| value).collect(),
        report: outcome.report,
    }
}

fn render<T: Serialize>(output: &Output<T>) -> Result<String> {
    if !output.report.is_complete() {
        warn!(
            failed = output.report.failed.len(),
            skipped = output.report.skipped.len(),
            "harvest finished with missing pages"
        );
    }
    info!(
        records = output.records.len(),
        total_reported = output.report.total_reported,
        "harvest complete"
    );
    serde_json::to_string_pretty(output).context("Failed to serialize results")
}
