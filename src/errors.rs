//! Error taxonomy for a crawl run.
//!
//! Only [`DiscoveryError`] and [`ConfigError`] stop a run. Everything else is
//! caught at the article or period boundary and tallied as a [`FailureKind`].

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use thiserror::Error;

/// No period sitemaps could be resolved.
#[derive(Debug, Error)]
pub enum DiscoveryError {
    #[error("sitemap index {url} is unreachable: {source}")]
    Unreachable {
        url: String,
        #[source]
        source: FetchError,
    },
    #[error("sitemap index {url} is malformed: {reason}")]
    Malformed { url: String, reason: String },
    #[error("sitemap index {url} lists no period sitemaps in {start_year}..={end_year}")]
    Empty {
        url: String,
        start_year: i32,
        end_year: i32,
    },
}

/// A single period sitemap could not be used. The period is skipped.
#[derive(Debug, Error)]
pub enum SitemapError {
    #[error("failed to fetch sitemap {url}: {source}")]
    Fetch {
        url: String,
        #[source]
        source: FetchError,
    },
    #[error("failed to parse sitemap {url}: {reason}")]
    Parse { url: String, reason: String },
}

/// Outcome of a failed HTTP fetch.
///
/// `Transient` failures are retried by [`crate::fetcher::RetryFetch`];
/// once retries run out they are escalated to `Permanent`.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum FetchError {
    #[error("transient failure for {url}: {reason}")]
    Transient { url: String, reason: String },
    #[error("permanent failure for {url}: {reason}")]
    Permanent {
        url: String,
        status: Option<u16>,
        reason: String,
    },
}

impl FetchError {
    pub fn is_transient(&self) -> bool {
        matches!(self, FetchError::Transient { .. })
    }

    pub fn url(&self) -> &str {
        match self {
            FetchError::Transient { url, .. } | FetchError::Permanent { url, .. } => url,
        }
    }
}

/// A metadata strategy found its block but could not decode it.
#[derive(Debug, Error)]
#[error("{strategy} metadata could not be decoded: {source}")]
pub struct MetadataParseError {
    pub strategy: &'static str,
    #[source]
    pub source: serde_json::Error,
}

#[derive(Debug, Error)]
pub enum PersistenceError {
    #[error("failed to create directory {path}: {source}")]
    CreateDir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to serialize record for {post_id}: {source}")]
    Serialize {
        post_id: String,
        #[source]
        source: serde_json::Error,
    },
    #[error("failed to write {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("record key for {url} is empty after sanitization")]
    EmptyKey { url: String },
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse config {path}: {source}")]
    Parse {
        path: String,
        #[source]
        source: serde_yaml::Error,
    },
    #[error("invalid config: {0}")]
    Invalid(String),
}

/// Buckets used for the run summary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    SitemapError,
    PermanentFailure,
    SkippedNonArticle,
    PersistenceError,
}

impl FailureKind {
    /// Kinds worth dispatching again in a re-crawl.
    pub fn is_retryable(self) -> bool {
        matches!(self, FailureKind::PermanentFailure | FailureKind::PersistenceError)
    }
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            FailureKind::SitemapError => "sitemap_error",
            FailureKind::PermanentFailure => "permanent_failure",
            FailureKind::SkippedNonArticle => "skipped_non_article",
            FailureKind::PersistenceError => "persistence_error",
        };
        f.write_str(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fetch_error_classification() {
        let t = FetchError::Transient {
            url: "https://example.com/a".to_string(),
            reason: "timed out".to_string(),
        };
        let p = FetchError::Permanent {
            url: "https://example.com/b".to_string(),
            status: Some(404),
            reason: "not found".to_string(),
        };
        assert!(t.is_transient());
        assert!(!p.is_transient());
        assert_eq!(t.url(), "https://example.com/a");
        assert_eq!(p.url(), "https://example.com/b");
    }

    #[test]
    fn test_failure_kind_serializes_snake_case() {
        let json = serde_json::to_string(&FailureKind::SkippedNonArticle).unwrap();
        assert_eq!(json, "\"skipped_non_article\"");
        assert_eq!(FailureKind::PermanentFailure.to_string(), "permanent_failure");
    }

    #[test]
    fn test_only_fetch_and_write_failures_are_retryable() {
        assert!(FailureKind::PermanentFailure.is_retryable());
        assert!(FailureKind::PersistenceError.is_retryable());
        assert!(!FailureKind::SkippedNonArticle.is_retryable());
        assert!(!FailureKind::SitemapError.is_retryable());
    }
}
