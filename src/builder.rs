//! Turn extraction output into an [`Article`] record.
//!
//! A page with no `<p>` elements and no metadata from any strategy is not an
//! article; nothing is built for it. Otherwise every page yields a record.

use crate::extract::ExtractedPage;
use crate::models::{Article, ArticleFields, Period};
use crate::utils::sanitize_key;
use url::Url;

/// Result of classifying one fetched page.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BuildOutcome {
    Article(Box<Article>),
    NonArticle,
}

/// Identifier derived from the URL alone.
///
/// The last path segment is split on `-` and its final piece is used, so
/// `https://host/news/some-story-slug-78123` yields `78123`. Query strings,
/// fragments, a trailing `/` and an `.html`-style extension are ignored.
/// Percent-encoded segments are decoded first, so non-ASCII slugs keep
/// readable keys.
/// If that leaves nothing usable, the sanitized path segments are joined with
/// `_`, and a bare host falls back to the sanitized host.
pub fn post_id_from_url(url: &str) -> String {
    let (host, segments): (String, Vec<String>) = match Url::parse(url) {
        Ok(u) => (
            u.host_str().unwrap_or_default().to_string(),
            u.path_segments()
                .map(|s| s.filter(|seg| !seg.is_empty()).map(decode_segment).collect())
                .unwrap_or_default(),
        ),
        Err(_) => (
            String::new(),
            url.split(['?', '#'])
                .next()
                .unwrap_or_default()
                .split('/')
                .filter(|seg| !seg.is_empty())
                .map(str::to_string)
                .collect(),
        ),
    };

    if let Some(last) = segments.last() {
        let stem = last.rsplit_once('.').map_or(last.as_str(), |(stem, _)| stem);
        let tail = stem.rsplit('-').next().unwrap_or(stem);
        let id = sanitize_key(tail);
        if !id.is_empty() {
            return id;
        }
        let joined = segments
            .iter()
            .map(|s| sanitize_key(s))
            .filter(|s| !s.is_empty())
            .collect::<Vec<_>>()
            .join("_");
        if !joined.is_empty() {
            return joined;
        }
    }
    sanitize_key(&host)
}

/// Undo the percent-encoding `Url` applies to non-ASCII path segments.
fn decode_segment(segment: &str) -> String {
    urlencoding::decode(segment)
        .map(|s| s.into_owned())
        .unwrap_or_else(|_| segment.to_string())
}

/// Build the record for `url` in `period`, or classify the page as a non-article.
///
/// The page's own identifier is preferred for `post_id`; the URL-derived one
/// is used when the page declares none.
pub fn build_article(url: &str, period: Period, page: ExtractedPage) -> BuildOutcome {
    let ExtractedPage { metadata, content } = page;

    if content.paragraph_count == 0 && metadata.is_none() {
        return BuildOutcome::NonArticle;
    }

    let meta = metadata.map(|(_, m)| m).unwrap_or_default();
    let post_id = meta
        .post_id
        .as_deref()
        .map(sanitize_key)
        .filter(|id| !id.is_empty())
        .unwrap_or_else(|| post_id_from_url(url));

    let article = Article::from_fields(
        ArticleFields {
            url: url.to_string(),
            post_id,
            title: meta.title,
            author: meta.author,
            thumbnail_url: meta.thumbnail_url,
            publication_date: meta.publication_date,
            last_updated_date: meta.last_updated_date,
            keywords: meta.keywords,
            classes: meta.classes,
            content: content.content,
            video_duration: meta.video_duration,
        },
        period,
    );
    BuildOutcome::Article(Box::new(article))
}
