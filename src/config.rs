//! Run configuration.
//!
//! Values come from an optional YAML file and are then overridden by any
//! command-line flags that were given. Every field has a default, so an
//! empty file (or no file) is a valid configuration.

use crate::cli::Cli;
use crate::errors::ConfigError;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;
use tracing::{info, instrument};

pub const DEFAULT_HOST: &str = "www.almayadeen.net";
pub const DEFAULT_TEMPLATE: &str = "https://{host}/sitemaps/all/sitemap-{year}-{month}.xml";

/// Direction in which periods are visited.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "snake_case")]
pub enum PeriodOrder {
    NewestFirst,
    OldestFirst,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CrawlConfig {
    /// Host substituted into `sitemap_template`.
    pub host: String,
    /// Period sitemap URL with `{host}`, `{year}` and `{month}` placeholders.
    pub sitemap_template: String,
    /// When set, period sitemaps are discovered from this index instead of
    /// being generated from the template.
    pub root_index_url: Option<String>,
    pub start_year: i32,
    pub end_year: i32,
    pub order: PeriodOrder,
    /// Stop dispatching once this many articles have been persisted.
    pub max_articles: usize,
    /// Concurrent article workers per period.
    pub concurrency: usize,
    pub request_timeout_secs: u64,
    /// Total attempts per request, first try included.
    pub max_attempts: usize,
    pub base_backoff_ms: u64,
    pub max_backoff_ms: u64,
    /// Token bucket refill rate per host.
    pub requests_per_second: u32,
    pub output_dir: PathBuf,
    pub user_agent: String,
    /// Drop URLs already seen in an earlier period of the same run.
    pub cross_period_dedup: bool,
}

impl Default for CrawlConfig {
    fn default() -> Self {
        Self {
            host: DEFAULT_HOST.to_string(),
            sitemap_template: DEFAULT_TEMPLATE.to_string(),
            root_index_url: None,
            start_year: 2020,
            end_year: 2024,
            order: PeriodOrder::NewestFirst,
            max_articles: 10_000,
            concurrency: 8,
            request_timeout_secs: 30,
            max_attempts: 3,
            base_backoff_ms: 500,
            max_backoff_ms: 10_000,
            requests_per_second: 5,
            output_dir: PathBuf::from("./data"),
            user_agent: concat!("sitemap_news_crawler/", env!("CARGO_PKG_VERSION")).to_string(),
            cross_period_dedup: true,
        }
    }
}

impl CrawlConfig {
    /// Parse a YAML document. Missing keys fall back to defaults.
    pub fn from_yaml(yaml: &str, origin: &str) -> Result<Self, ConfigError> {
        serde_yaml::from_str(yaml).map_err(|source| ConfigError::Parse {
            path: origin.to_string(),
            source,
        })
    }

    /// Build the effective configuration from the CLI: file first, flags on top.
    #[instrument(level = "info", skip_all)]
    pub async fn load(cli: &Cli) -> Result<Self, ConfigError> {
        let mut config = match &cli.config {
            Some(path) => {
                let yaml = tokio::fs::read_to_string(path)
                    .await
                    .map_err(|source| ConfigError::Read {
                        path: path.clone(),
                        source,
                    })?;
                let config = Self::from_yaml(&yaml, path)?;
                info!(config_path = %path, "Loaded configuration file");
                config
            }
            None => Self::default(),
        };
        config.apply_overrides(cli);
        config.validate()?;
        Ok(config)
    }

    pub fn apply_overrides(&mut self, cli: &Cli) {
        if let Some(host) = &cli.host {
            self.host = host.clone();
        }
        if let Some(template) = &cli.sitemap_template {
            self.sitemap_template = template.clone();
        }
        if let Some(root) = &cli.root_index_url {
            self.root_index_url = Some(root.clone());
        }
        if let Some(y) = cli.start_year {
            self.start_year = y;
        }
        if let Some(y) = cli.end_year {
            self.end_year = y;
        }
        if let Some(order) = cli.order {
            self.order = order;
        }
        if let Some(n) = cli.max_articles {
            self.max_articles = n;
        }
        if let Some(n) = cli.concurrency {
            self.concurrency = n;
        }
        if let Some(rps) = cli.requests_per_second {
            self.requests_per_second = rps;
        }
        if let Some(dir) = &cli.output_dir {
            self.output_dir = dir.clone();
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.start_year > self.end_year {
            return Err(ConfigError::Invalid(format!(
                "start_year {} is after end_year {}",
                self.start_year, self.end_year
            )));
        }
        if self.concurrency == 0 {
            return Err(ConfigError::Invalid("concurrency must be at least 1".into()));
        }
        if self.requests_per_second == 0 {
            return Err(ConfigError::Invalid(
                "requests_per_second must be at least 1".into(),
            ));
        }
        if self.max_attempts == 0 {
            return Err(ConfigError::Invalid("max_attempts must be at least 1".into()));
        }
        for placeholder in ["{year}", "{month}"] {
            if self.root_index_url.is_none() && !self.sitemap_template.contains(placeholder) {
                return Err(ConfigError::Invalid(format!(
                    "sitemap_template is missing {placeholder}"
                )));
            }
        }
        Ok(())
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn base_backoff(&self) -> Duration {
        Duration::from_millis(self.base_backoff_ms)
    }

    pub fn max_backoff(&self) -> Duration {
        Duration::from_millis(self.max_backoff_ms)
    }
}
