//! Period sitemap resolution.
//!
//! Two sources are supported:
//!
//! - **Template**: one URL per calendar month of the year range, rendered
//!   from a host-specific template such as
//!   `https://{host}/sitemaps/all/sitemap-{year}-{month}.xml`
//! - **Root index**: a `<sitemapindex>` document whose entries carry a
//!   `<year>-<MM>` pair in their URL
//!
//! A root index that cannot be fetched, parsed, or that lists no period in
//! range is a [`DiscoveryError`] and ends the run.

use super::parse_locs;
use crate::config::{CrawlConfig, PeriodOrder};
use crate::errors::DiscoveryError;
use crate::fetcher::PageFetch;
use crate::models::{Period, SitemapReference};
use itertools::{Either, Itertools};
use once_cell::sync::Lazy;
use regex::Regex;
use tracing::{info, instrument, warn};

static PERIOD_IN_URL: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(\d{4})-(\d{1,2})(?:\D|$)").expect("static regex"));

/// Substitute `{host}`, `{year}` and zero-padded `{month}` into `template`.
pub fn render_template(template: &str, host: &str, period: Period) -> String {
    template
        .replace("{host}", host)
        .replace("{year}", &period.year.to_string())
        .replace("{month}", &format!("{:02}", period.month))
}

/// Every month of `start_year..=end_year` in the requested order.
pub fn periods_in_range(
    start_year: i32,
    end_year: i32,
    order: PeriodOrder,
) -> impl Iterator<Item = Period> {
    let ascending = (start_year..=end_year)
        .flat_map(|year| (1..=12u32).map(move |month| Period { year, month }));
    match order {
        PeriodOrder::OldestFirst => Either::Left(ascending),
        PeriodOrder::NewestFirst => Either::Right(ascending.collect::<Vec<_>>().into_iter().rev()),
    }
}

/// Lazily render one pending [`SitemapReference`] per month of the range.
pub fn template_sitemaps<'a>(
    template: &'a str,
    host: &'a str,
    start_year: i32,
    end_year: i32,
    order: PeriodOrder,
) -> impl Iterator<Item = SitemapReference> + 'a {
    periods_in_range(start_year, end_year, order)
        .map(move |period| SitemapReference::pending(period, render_template(template, host, period)))
}

/// Pull the `(year, month)` pair out of a period sitemap URL.
///
/// The last `<4 digits>-<1 or 2 digits>` group wins, so hosts containing
/// digits do not confuse the match.
pub fn period_from_url(url: &str) -> Option<Period> {
    PERIOD_IN_URL
        .captures_iter(url)
        .last()
        .and_then(|caps| Period::new(caps[1].parse().ok()?, caps[2].parse().ok()?))
}

/// Fetch a root sitemap index and keep the period sitemaps inside the range.
#[instrument(level = "info", skip(fetcher))]
pub async fn discover_from_index<F: PageFetch>(
    fetcher: &F,
    index_url: &str,
    start_year: i32,
    end_year: i32,
    order: PeriodOrder,
) -> Result<Vec<SitemapReference>, DiscoveryError> {
    let body = fetcher
        .fetch(index_url)
        .await
        .map_err(|source| DiscoveryError::Unreachable {
            url: index_url.to_string(),
            source,
        })?;

    let locs = parse_locs(&body).map_err(|reason| DiscoveryError::Malformed {
        url: index_url.to_string(),
        reason: reason.to_string(),
    })?;

    let total = locs.len();
    let mut refs: Vec<SitemapReference> = locs
        .into_iter()
        .filter_map(|loc| period_from_url(&loc).map(|period| SitemapReference::pending(period, loc)))
        .filter(|r| (start_year..=end_year).contains(&r.period.year))
        .unique_by(|r| r.url.clone())
        .collect();

    match order {
        PeriodOrder::OldestFirst => refs.sort_by_key(|r| r.period),
        PeriodOrder::NewestFirst => refs.sort_by(|a, b| b.period.cmp(&a.period)),
    }

    if refs.is_empty() {
        warn!(entries = total, "Sitemap index has no period sitemaps in range");
        return Err(DiscoveryError::Empty {
            url: index_url.to_string(),
            start_year,
            end_year,
        });
    }

    info!(entries = total, periods = refs.len(), "Discovered period sitemaps");
    Ok(refs)
}

/// Resolve the periods for a run from the configuration.
pub async fn resolve<F: PageFetch>(
    config: &CrawlConfig,
    fetcher: &F,
) -> Result<Vec<SitemapReference>, DiscoveryError> {
    match &config.root_index_url {
        Some(index_url) => {
            discover_from_index(
                fetcher,
                index_url,
                config.start_year,
                config.end_year,
                config.order,
            )
            .await
        }
        None => {
            let refs: Vec<_> = template_sitemaps(
                &config.sitemap_template,
                &config.host,
                config.start_year,
                config.end_year,
                config.order,
            )
            .collect();
            info!(periods = refs.len(), "Generated period sitemaps from template");
            Ok(refs)
        }
    }
}
