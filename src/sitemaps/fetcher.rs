//! Period sitemap fetching.

use super::parse_locs;
use crate::errors::SitemapError;
use crate::fetcher::PageFetch;
use crate::models::{SitemapReference, SitemapStatus};
use crate::utils::truncate_for_log;
use tracing::{debug, info, instrument, warn};

/// Fetch one period sitemap and list its article URLs in document order.
///
/// Duplicates are preserved. On failure the reference is marked
/// [`SitemapStatus::Failed`] and the caller skips the period.
#[instrument(level = "info", skip_all, fields(period = %reference.period, url = %reference.url))]
pub async fn fetch_article_urls<F: PageFetch>(
    fetcher: &F,
    reference: &mut SitemapReference,
) -> Result<Vec<String>, SitemapError> {
    let body = match fetcher.fetch(&reference.url).await {
        Ok(body) => body,
        Err(source) => {
            reference.status = SitemapStatus::Failed;
            warn!(error = %source, "Sitemap fetch failed");
            return Err(SitemapError::Fetch {
                url: reference.url.clone(),
                source,
            });
        }
    };

    match parse_locs(&body) {
        Ok(urls) => {
            reference.status = SitemapStatus::Fetched;
            info!(count = urls.len(), "Listed article URLs");
            debug!(urls = ?urls.iter().take(5).collect::<Vec<_>>(), "First sitemap entries");
            Ok(urls)
        }
        Err(reason) => {
            reference.status = SitemapStatus::Failed;
            warn!(
                %reason,
                body_preview = %truncate_for_log(&body, 200),
                "Sitemap body is not a sitemap"
            );
            Err(SitemapError::Parse {
                url: reference.url.clone(),
                reason: reason.to_string(),
            })
        }
    }
}
