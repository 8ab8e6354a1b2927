//! Data models for crawled articles and the bookkeeping around a run.
//!
//! - [`Article`]: one persisted record per crawled page
//! - [`Period`]: the `(year, month)` partition a sitemap belongs to
//! - [`SitemapReference`]: a period sitemap and its processing status
//! - [`RunReport`]: the summary written at the end of every run
//!
//! Sentinel strings stand in for missing fields so downstream consumers never
//! see `null` for the scalar metadata.

use crate::errors::FailureKind;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

pub const NO_TITLE: &str = "No Title";
pub const NO_AUTHOR: &str = "No Author";
pub const NO_THUMBNAIL: &str = "No Thumbnail";
pub const NO_DATE: &str = "No Date";

/// A calendar month partition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Period {
    pub year: i32,
    pub month: u32,
}

impl Period {
    /// Returns `None` unless `month` is in `1..=12`.
    pub fn new(year: i32, month: u32) -> Option<Self> {
        (1..=12).contains(&month).then_some(Self { year, month })
    }

    /// Directory name used for persisted records, e.g. `2024_03`.
    pub fn dir_name(&self) -> String {
        format!("{}_{:02}", self.year, self.month)
    }
}

impl fmt::Display for Period {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{:02}", self.year, self.month)
    }
}

/// A taxonomy tag attached to an article (section, category, coverage tag).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArticleClass {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key: Option<String>,
    pub value: String,
}

impl ArticleClass {
    pub fn new(value: impl Into<String>) -> Self {
        Self {
            key: None,
            value: value.into(),
        }
    }
}

/// A crawled article.
///
/// Fields are private so a record can only come out of
/// [`crate::builder::build_article`] or deserialization; `word_count` always
/// matches `content`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Article {
    /// Canonical URL as listed in the period sitemap
    url: String,
    /// Filename-safe identifier, unique within a period
    post_id: String,
    title: String,
    author: String,
    thumbnail_url: String,
    /// Publication timestamp as the site declares it, or [`NO_DATE`]
    publication_date: String,
    last_updated_date: String,
    keywords: Vec<String>,
    /// Section and tag taxonomy, in page order
    classes: Vec<ArticleClass>,
    /// Paragraph text joined by single spaces
    content: String,
    /// Whitespace-separated tokens in `content`
    word_count: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    video_duration: Option<String>,
    #[serde(flatten)]
    period: Period,
}

/// Owned field values handed to [`Article::from_fields`].
#[derive(Debug, Default)]
pub struct ArticleFields {
    pub url: String,
    pub post_id: String,
    pub title: Option<String>,
    pub author: Option<String>,
    pub thumbnail_url: Option<String>,
    pub publication_date: Option<String>,
    pub last_updated_date: Option<String>,
    pub keywords: Vec<String>,
    pub classes: Vec<ArticleClass>,
    pub content: String,
    pub video_duration: Option<String>,
}

impl Article {
    /// Assemble a record, substituting sentinels for missing scalars and
    /// deriving `word_count` from `content`.
    ///
    /// # Arguments
    ///
    /// * `fields` - Values gathered from the page; blank strings count as missing
    /// * `period` - The sitemap period the URL was listed under
    ///
    /// # Returns
    ///
    /// An `Article` whose scalar fields are never empty.
    pub fn from_fields(fields: ArticleFields, period: Period) -> Self {
        let word_count = crate::utils::count_words(&fields.content);
        Self {
            url: fields.url,
            post_id: fields.post_id,
            title: or_sentinel(fields.title, NO_TITLE),
            author: or_sentinel(fields.author, NO_AUTHOR),
            thumbnail_url: or_sentinel(fields.thumbnail_url, NO_THUMBNAIL),
            publication_date: or_sentinel(fields.publication_date, NO_DATE),
            last_updated_date: or_sentinel(fields.last_updated_date, NO_DATE),
            keywords: fields.keywords,
            classes: fields.classes,
            content: fields.content,
            word_count,
            video_duration: fields.video_duration.filter(|d| !d.trim().is_empty()),
            period,
        }
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    /// Key used in the record's file name.
    pub fn post_id(&self) -> &str {
        &self.post_id
    }

    pub fn title(&self) -> &str {
        &self.title
    }

    pub fn author(&self) -> &str {
        &self.author
    }

    pub fn thumbnail_url(&self) -> &str {
        &self.thumbnail_url
    }

    pub fn publication_date(&self) -> &str {
        &self.publication_date
    }

    pub fn last_updated_date(&self) -> &str {
        &self.last_updated_date
    }

    pub fn keywords(&self) -> &[String] {
        &self.keywords
    }

    /// Section and tag taxonomy attached by the metadata strategy.
    pub fn classes(&self) -> &[ArticleClass] {
        &self.classes
    }

    pub fn content(&self) -> &str {
        &self.content
    }

    pub fn word_count(&self) -> usize {
        self.word_count
    }

    pub fn video_duration(&self) -> Option<&str> {
        self.video_duration.as_deref()
    }

    pub fn period(&self) -> Period {
        self.period
    }
}

fn or_sentinel(value: Option<String>, sentinel: &str) -> String {
    match value {
        Some(v) if !v.trim().is_empty() => v.trim().to_string(),
        _ => sentinel.to_string(),
    }
}

/// Processing state of a period sitemap within a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SitemapStatus {
    Pending,
    Fetched,
    Failed,
}

/// A period sitemap scheduled for the current run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SitemapReference {
    pub period: Period,
    pub url: String,
    pub status: SitemapStatus,
}

impl SitemapReference {
    /// A sitemap that has not been fetched yet.
    pub fn pending(period: Period, url: String) -> Self {
        Self {
            period,
            url,
            status: SitemapStatus::Pending,
        }
    }
}

/// One failed article or period, kept so it can be re-crawled later.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailureRecord {
    pub period: Period,
    /// Article URL, or the sitemap URL for [`FailureKind::SitemapError`]
    pub url: String,
    pub kind: FailureKind,
    /// Human-readable cause, usually the error's `Display` output
    pub reason: String,
}

/// Summary of a finished run, persisted under `<output_dir>/_runs/`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunReport {
    /// RFC 3339 UTC timestamps
    pub started_at: String,
    pub finished_at: String,
    /// Articles persisted in this run
    pub processed_count: usize,
    /// Failures of every kind, sitemap errors included
    pub failure_count: usize,
    pub cap: usize,
    pub cap_reached: bool,
    /// Stopped early by an interrupt
    pub cancelled: bool,
    /// Failure count per kind; sums to `failure_count`
    pub breakdown: BTreeMap<FailureKind, usize>,
    /// Periods whose articles were dispatched
    pub periods_visited: Vec<Period>,
    /// Periods with an empty or failed sitemap
    pub periods_skipped: Vec<Period>,
    pub failures: Vec<FailureRecord>,
}
