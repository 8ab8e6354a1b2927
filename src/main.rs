//! # Sitemap News Crawler
//!
//! Walks a news site's monthly sitemaps, fetches every listed article, pulls
//! structured metadata and body text out of the HTML, and writes one JSON
//! record per article.
//!
//! ## Features
//!
//! - Period sitemaps from a URL template or discovered from a sitemap index
//! - Bounded concurrency, per-host rate limiting, retries with backoff
//! - Metadata cascade: embedded site script, JSON-LD, then `<meta>` tags
//! - Atomic, idempotent writes keyed by period and post id
//! - A run report listing every failure, replayable with `recrawl`
//!
//! ## Usage
//!
//! ```sh
//! sitemap_news_crawler --start-year 2023 --end-year 2024 -n 500 -o ./data
//! sitemap_news_crawler recrawl --report ./data/_runs/run-20240301T120000Z-3f2a9c1e.json
//! ```
//!
//! ## Architecture
//!
//! 1. **Resolution**: turn the year range into period sitemap URLs
//! 2. **Listing**: fetch each period sitemap and collect article URLs
//! 3. **Processing**: fetch, extract and build records (`concurrency` at a time)
//! 4. **Output**: write article records and the run report

use clap::Parser;
use std::error::Error;
use tracing::{debug, error, info, instrument, warn};
use tracing_subscriber::{EnvFilter, fmt as tfmt};

mod builder;
mod cli;
mod config;
mod crawl;
mod errors;
mod extract;
mod fetcher;
mod models;
mod outputs;
mod ratelimit;
mod sitemaps;
mod utils;

use cli::{Cli, Command};
use config::CrawlConfig;
use crawl::{CancelFlag, CrawlOrchestrator, DispatchSettings};
use fetcher::build_fetcher;
use outputs::json::JsonSink;
use outputs::report::{read_report, recrawl_batches, write_report};
use ratelimit::HostRateLimiter;
use utils::ensure_writable_dir;

#[tokio::main]
#[instrument]
async fn main() -> Result<(), Box<dyn Error>> {
    // --- Tracing init ---
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tfmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_file(false)
        .with_line_number(false)
        .with_timer(tracing_subscriber::fmt::time::UtcTime::rfc_3339())
        .init();

    let start_time = std::time::Instant::now();
    info!("sitemap_news_crawler starting up");

    let args = Cli::parse();
    debug!(?args.command, ?args.config, "Parsed CLI arguments");

    let config = CrawlConfig::load(&args).await?;
    info!(
        start_year = config.start_year,
        end_year = config.end_year,
        max_articles = config.max_articles,
        concurrency = config.concurrency,
        output_dir = %config.output_dir.display(),
        "Effective configuration"
    );

    // Early check: the output root must accept writes before any fetch
    if let Err(e) = ensure_writable_dir(&config.output_dir).await {
        error!(
            path = %config.output_dir.display(),
            error = %e,
            "Output directory is not writable (fix perms or choose a different path)"
        );
        return Err(e);
    }

    let limiter = HostRateLimiter::per_second(config.requests_per_second);
    debug!(requests_per_second = limiter.rate(), "Per-host rate limiter ready");
    let fetcher = build_fetcher(&config, limiter)?;

    let cancel = CancelFlag::default();
    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                warn!("Interrupt received; finishing in-flight articles");
                cancel.cancel();
            }
        });
    }

    let orchestrator = CrawlOrchestrator::new(
        fetcher,
        JsonSink::new(&config.output_dir),
        DispatchSettings::from(&config),
    )
    .with_cancel_flag(cancel);

    let outcome = match args.command {
        Some(Command::Recrawl { ref report }) => {
            let previous = read_report(report).await?;
            let batches = recrawl_batches(&previous);
            info!(
                report = %report.display(),
                urls = batches.iter().map(|(_, urls)| urls.len()).sum::<usize>(),
                periods = batches.len(),
                "Re-dispatching failures from previous run"
            );
            orchestrator.run_batches(batches).await
        }
        Some(Command::Crawl) | None => {
            let periods = match sitemaps::resolver::resolve(&config, orchestrator.fetcher()).await {
                Ok(periods) => periods,
                Err(e) => {
                    error!(error = %e, "Could not resolve period sitemaps");
                    return Err(e.into());
                }
            };
            orchestrator.run(periods).await
        }
    };

    let report = outcome.into_report();
    match write_report(&config.output_dir, &report).await {
        Ok(path) => info!(path = %path.display(), "Run report written"),
        Err(e) => error!(error = %e, "Failed to write run report"),
    }

    let elapsed = start_time.elapsed();
    info!(
        processed = report.processed_count,
        failures = report.failure_count,
        elapsed_secs = elapsed.as_secs_f64(),
        "sitemap_news_crawler finished"
    );

    Ok(())
}
