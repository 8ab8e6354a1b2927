//! Command-line interface definitions.
//!
//! Every flag is optional and overrides the matching key of the YAML config.
//! Without a subcommand the crawler performs a full sitemap crawl.

use crate::config::PeriodOrder;
use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// Command-line arguments for the sitemap news crawler.
///
/// # Examples
///
/// ```sh
/// # Crawl 2020-2024 with defaults
/// sitemap_news_crawler
///
/// # Crawl a single year, capped at 500 articles
/// sitemap_news_crawler --start-year 2023 --end-year 2023 --max-articles 500
///
/// # Re-dispatch the failed URLs of an earlier run
/// sitemap_news_crawler recrawl --report ./data/_runs/run-20240301T120000Z-3f2a9c1e.json
/// ```
#[derive(Parser, Debug)]
#[command(author, version, about)]
pub struct Cli {
    /// Optional path to a YAML config file
    #[arg(short, long, env = "CRAWLER_CONFIG")]
    pub config: Option<String>,

    /// Site host substituted into the sitemap template
    #[arg(long)]
    pub host: Option<String>,

    /// Period sitemap URL template with {host}, {year} and {month}
    #[arg(long)]
    pub sitemap_template: Option<String>,

    /// Discover period sitemaps from this sitemap index instead of the template
    #[arg(long)]
    pub root_index_url: Option<String>,

    /// First year to crawl (inclusive)
    #[arg(long)]
    pub start_year: Option<i32>,

    /// Last year to crawl (inclusive)
    #[arg(long)]
    pub end_year: Option<i32>,

    /// Period visiting order
    #[arg(long, value_enum)]
    pub order: Option<PeriodOrder>,

    /// Stop after this many articles have been persisted
    #[arg(short = 'n', long)]
    pub max_articles: Option<usize>,

    /// Concurrent article fetches
    #[arg(short = 'j', long)]
    pub concurrency: Option<usize>,

    /// Request rate ceiling per host
    #[arg(long)]
    pub requests_per_second: Option<u32>,

    /// Root directory for persisted records
    #[arg(short, long)]
    pub output_dir: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Crawl every period sitemap in the configured range (default)
    Crawl,
    /// Re-dispatch fetch and write failures listed in a previous run report
    Recrawl {
        /// Path to a run report JSON file
        #[arg(long)]
        report: PathBuf,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_defaults_to_no_overrides() {
        let cli = Cli::parse_from(["sitemap_news_crawler"]);
        assert!(cli.config.is_none());
        assert!(cli.max_articles.is_none());
        assert!(cli.command.is_none());
    }

    #[test]
    fn test_cli_short_flags() {
        let cli = Cli::parse_from([
            "sitemap_news_crawler",
            "-n",
            "100",
            "-j",
            "4",
            "-o",
            "/tmp/data",
        ]);
        assert_eq!(cli.max_articles, Some(100));
        assert_eq!(cli.concurrency, Some(4));
        assert_eq!(cli.output_dir, Some(PathBuf::from("/tmp/data")));
    }

    #[test]
    fn test_cli_recrawl_subcommand() {
        let cli = Cli::parse_from([
            "sitemap_news_crawler",
            "recrawl",
            "--report",
            "run.json",
        ]);
        match cli.command {
            Some(Command::Recrawl { report }) => assert_eq!(report, PathBuf::from("run.json")),
            other => panic!("unexpected command: {other:?}"),
        }
    }
}
