//! JSON persistence for article records.
//!
//! # Output Structure
//!
//! ```text
//! output_dir/
//! ├── 2024_03/
//! │   ├── article_78123.json
//! │   └── article_78124.json
//! └── 2024_04/
//!     └── article_79001.json
//! ```
//!
//! Each file is written to a temporary sibling and renamed into place, so a
//! reader never observes a partial record. Writing the same key again
//! replaces the previous file.

use crate::errors::PersistenceError;
use crate::models::{Article, Period};
use crate::utils::sanitize_key;
use rand::{Rng, rng};
use serde::Serialize;
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::{debug, instrument, warn};

/// Writes one JSON document per article under `root/<year>_<month>/`.
#[derive(Debug, Clone)]
pub struct JsonSink {
    root: PathBuf,
}

impl JsonSink {
    /// Create a sink rooted at `root`.
    ///
    /// # Arguments
    ///
    /// * `root` - Output directory; period directories are created on demand
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Where the record keyed by `(period, post_id)` lives.
    ///
    /// # Returns
    ///
    /// `None` if `post_id` has no filename-safe characters left after
    /// sanitizing.
    pub fn record_path(&self, period: Period, post_id: &str) -> Option<PathBuf> {
        let key = sanitize_key(post_id);
        if key.is_empty() {
            return None;
        }
        Some(
            self.root
                .join(period.dir_name())
                .join(format!("article_{key}.json")),
        )
    }

    /// Write `article`, replacing any earlier record with the same key.
    ///
    /// # Returns
    ///
    /// The path of the record on success.
    ///
    /// # Errors
    ///
    /// * [`PersistenceError::EmptyKey`] if the post id sanitizes to nothing
    /// * [`PersistenceError::CreateDir`] or [`PersistenceError::Write`] on I/O failure
    #[instrument(
        level = "debug",
        skip_all,
        fields(post_id = %article.post_id(), period = %article.period())
    )]
    pub async fn persist(&self, article: &Article) -> Result<PathBuf, PersistenceError> {
        let path = self
            .record_path(article.period(), article.post_id())
            .ok_or_else(|| PersistenceError::EmptyKey {
                url: article.url().to_string(),
            })?;
        let json = serde_json::to_vec_pretty(article).map_err(|source| {
            PersistenceError::Serialize {
                post_id: article.post_id().to_string(),
                source,
            }
        })?;
        write_atomic(&path, &json).await?;
        debug!(path = %path.display(), bytes = json.len(), "Persisted article");
        Ok(path)
    }

    /// [`persist`](Self::persist) with exactly one retry.
    ///
    /// An empty key is not retried since a second attempt cannot succeed.
    pub async fn persist_with_retry(&self, article: &Article) -> Result<PathBuf, PersistenceError> {
        match self.persist(article).await {
            Ok(path) => Ok(path),
            Err(PersistenceError::EmptyKey { url }) => Err(PersistenceError::EmptyKey { url }),
            Err(e) => {
                warn!(error = %e, url = %article.url(), "Write failed; retrying once");
                self.persist(article).await
            }
        }
    }
}

/// Serialize `value` as pretty JSON and write it atomically to `path`.
pub async fn write_json_atomic<T: Serialize>(
    path: &Path,
    value: &T,
    key: &str,
) -> Result<(), PersistenceError> {
    let json = serde_json::to_vec_pretty(value).map_err(|source| PersistenceError::Serialize {
        post_id: key.to_string(),
        source,
    })?;
    write_atomic(path, &json).await
}

/// Write to a unique temporary sibling, then rename over `path`.
pub async fn write_atomic(path: &Path, bytes: &[u8]) -> Result<(), PersistenceError> {
    let dir = path.parent().unwrap_or_else(|| Path::new("."));
    fs::create_dir_all(dir)
        .await
        .map_err(|source| PersistenceError::CreateDir {
            path: dir.to_path_buf(),
            source,
        })?;

    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let nonce: u32 = rng().random();
    let tmp = dir.join(format!(".{file_name}.{nonce:08x}.tmp"));

    if let Err(source) = fs::write(&tmp, bytes).await {
        let _ = fs::remove_file(&tmp).await;
        return Err(PersistenceError::Write { path: tmp, source });
    }
    if let Err(source) = fs::rename(&tmp, path).await {
        let _ = fs::remove_file(&tmp).await;
        return Err(PersistenceError::Write {
            path: path.to_path_buf(),
            source,
        });
    }
    Ok(())
}
