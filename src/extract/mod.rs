//! Page extraction: structured metadata and body text.
//!
//! Both extractors work on one parsed [`Html`] document and are synchronous;
//! the document never crosses an `.await`.

pub mod content;
pub mod metadata;

use crate::models::ArticleClass;
use scraper::Html;

pub use content::{ExtractedContent, extract_content};
pub use metadata::MetadataExtractor;

/// Normalised metadata produced by one strategy. Unset fields stay `None`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PageMetadata {
    pub post_id: Option<String>,
    pub title: Option<String>,
    pub author: Option<String>,
    pub thumbnail_url: Option<String>,
    pub publication_date: Option<String>,
    pub last_updated_date: Option<String>,
    pub keywords: Vec<String>,
    pub classes: Vec<ArticleClass>,
    pub video_duration: Option<String>,
}

impl PageMetadata {
    pub fn is_empty(&self) -> bool {
        self.post_id.is_none()
            && self.title.is_none()
            && self.author.is_none()
            && self.thumbnail_url.is_none()
            && self.publication_date.is_none()
            && self.last_updated_date.is_none()
            && self.keywords.is_empty()
            && self.classes.is_empty()
            && self.video_duration.is_none()
    }
}

/// Everything pulled out of one fetched page.
#[derive(Debug, Clone)]
pub struct ExtractedPage {
    /// `None` when no strategy found anything.
    pub metadata: Option<(&'static str, PageMetadata)>,
    pub content: ExtractedContent,
}

/// Parse `html` once and run both extractors over it.
pub fn extract_page(extractor: &MetadataExtractor, html: &str) -> ExtractedPage {
    let document = Html::parse_document(html);
    ExtractedPage {
        metadata: extractor.extract(&document),
        content: extract_content(&document),
    }
}
