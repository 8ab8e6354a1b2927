//! Metadata extraction through an ordered cascade of strategies.
//!
//! | Order | Strategy | Source |
//! |-------|----------|--------|
//! | 1 | [`EmbeddedScriptStrategy`] | site-specific `tawsiyat` JSON script |
//! | 2 | [`JsonLdStrategy`] | `application/ld+json` blocks |
//! | 3 | [`MetaTagStrategy`] | Open Graph / `article:*` / `name=` meta tags |
//!
//! The first strategy returning a non-empty [`PageMetadata`] wins; results are
//! never merged. A block that fails to decode is logged and the cascade moves
//! on.

use super::PageMetadata;
use crate::errors::MetadataParseError;
use crate::models::ArticleClass;
use once_cell::sync::Lazy;
use scraper::{Html, Selector};
use serde_json::Value;
use tracing::debug;

static SCRIPT: Lazy<Selector> = Lazy::new(|| Selector::parse("script").expect("static selector"));
static JSON_LD: Lazy<Selector> = Lazy::new(|| {
    Selector::parse(r#"script[type="application/ld+json"]"#).expect("static selector")
});
static META: Lazy<Selector> = Lazy::new(|| Selector::parse("meta").expect("static selector"));

const EMBEDDED_MARKER: &str = "tawsiyat";

/// One way of reading metadata out of a page.
pub trait MetadataStrategy: Send + Sync {
    fn name(&self) -> &'static str;

    /// `Ok(None)` when the page has nothing this strategy understands.
    fn extract(&self, document: &Html) -> Result<Option<PageMetadata>, MetadataParseError>;
}

/// Runs strategies in order and keeps the first non-empty result.
pub struct MetadataExtractor {
    strategies: Vec<Box<dyn MetadataStrategy>>,
}

impl MetadataExtractor {
    pub fn new(strategies: Vec<Box<dyn MetadataStrategy>>) -> Self {
        Self { strategies }
    }

    /// Embedded script, then JSON-LD, then meta tags.
    pub fn standard() -> Self {
        Self::new(vec![
            Box::new(EmbeddedScriptStrategy),
            Box::new(JsonLdStrategy),
            Box::new(MetaTagStrategy),
        ])
    }

    /// Name of the winning strategy and its metadata, or `None`.
    pub fn extract(&self, document: &Html) -> Option<(&'static str, PageMetadata)> {
        for strategy in &self.strategies {
            match strategy.extract(document) {
                Ok(Some(meta)) if !meta.is_empty() => return Some((strategy.name(), meta)),
                Ok(_) => {}
                Err(e) => debug!(error = %e, "Metadata strategy failed; trying next"),
            }
        }
        None
    }
}

impl std::fmt::Debug for MetadataExtractor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list()
            .entries(self.strategies.iter().map(|s| s.name()))
            .finish()
    }
}

/// The site's own inline JSON block, tagged `text/tawsiyat`.
#[derive(Debug, Clone, Copy)]
pub struct EmbeddedScriptStrategy;

impl MetadataStrategy for EmbeddedScriptStrategy {
    fn name(&self) -> &'static str {
        "embedded_script"
    }

    fn extract(&self, document: &Html) -> Result<Option<PageMetadata>, MetadataParseError> {
        let script = document.select(&SCRIPT).find(|s| {
            s.value()
                .attr("type")
                .is_some_and(|t| t.contains(EMBEDDED_MARKER))
                || s.text().any(|t| t.contains(EMBEDDED_MARKER))
        });
        let Some(script) = script else {
            return Ok(None);
        };

        let raw = script.text().collect::<String>();
        let value: Value =
            serde_json::from_str(raw.trim()).map_err(|source| MetadataParseError {
                strategy: self.name(),
                source,
            })?;

        Ok(Some(PageMetadata {
            post_id: string_at(&value, &["postid", "post_id", "postId", "id"]),
            title: string_at(&value, &["title"]),
            author: value.get("author").and_then(person_names),
            thumbnail_url: string_at(&value, &["thumbnail", "thumbnail_url", "image"]),
            publication_date: string_at(&value, &["publication_date", "published_time", "published_date"]),
            last_updated_date: string_at(&value, &["last_updated_date", "last_updated", "modified_time"]),
            keywords: value.get("keywords").map(string_list).unwrap_or_default(),
            classes: value.get("classes").map(class_list).unwrap_or_default(),
            video_duration: string_at(&value, &["video_duration", "duration"]),
        }))
    }
}

/// schema.org JSON-LD blocks.
#[derive(Debug, Clone, Copy)]
pub struct JsonLdStrategy;

impl MetadataStrategy for JsonLdStrategy {
    fn name(&self) -> &'static str {
        "json_ld"
    }

    fn extract(&self, document: &Html) -> Result<Option<PageMetadata>, MetadataParseError> {
        let mut first_error = None;
        let mut objects = Vec::new();

        for script in document.select(&JSON_LD) {
            let raw = script.text().collect::<String>();
            match serde_json::from_str::<Value>(raw.trim()) {
                Ok(value) => flatten_ld(value, &mut objects),
                Err(source) if first_error.is_none() => {
                    first_error = Some(MetadataParseError {
                        strategy: self.name(),
                        source,
                    });
                }
                Err(_) => {}
            }
        }

        let Some(node) = objects.iter().find(|o| is_article_node(o)) else {
            return match first_error {
                Some(e) => Err(e),
                None => Ok(None),
            };
        };

        Ok(Some(PageMetadata {
            post_id: string_at(node, &["identifier"]),
            title: string_at(node, &["headline", "name"]),
            author: node.get("author").and_then(person_names),
            thumbnail_url: node
                .get("image")
                .or_else(|| node.get("thumbnailUrl"))
                .and_then(image_url),
            publication_date: string_at(node, &["datePublished", "uploadDate"]),
            last_updated_date: string_at(node, &["dateModified"]),
            keywords: node.get("keywords").map(string_list).unwrap_or_default(),
            classes: node
                .get("articleSection")
                .map(string_list)
                .unwrap_or_default()
                .into_iter()
                .map(ArticleClass::new)
                .collect(),
            video_duration: string_at(node, &["duration"]),
        }))
    }
}

/// Open Graph and plain `<meta>` tags.
#[derive(Debug, Clone, Copy)]
pub struct MetaTagStrategy;

impl MetadataStrategy for MetaTagStrategy {
    fn name(&self) -> &'static str {
        "meta_tags"
    }

    fn extract(&self, document: &Html) -> Result<Option<PageMetadata>, MetadataParseError> {
        let mut meta = PageMetadata::default();

        for tag in document.select(&META) {
            let el = tag.value();
            let Some(key) = el.attr("property").or_else(|| el.attr("name")) else {
                continue;
            };
            let Some(content) = el.attr("content").map(str::trim).filter(|c| !c.is_empty()) else {
                continue;
            };

            match key.to_ascii_lowercase().as_str() {
                "og:title" => set_once(&mut meta.title, content),
                "og:image" => set_once(&mut meta.thumbnail_url, content),
                "article:published_time" => set_once(&mut meta.publication_date, content),
                "article:modified_time" | "og:updated_time" => {
                    set_once(&mut meta.last_updated_date, content)
                }
                "author" => set_once(&mut meta.author, content),
                "keywords" if meta.keywords.is_empty() => meta.keywords = split_commas(content),
                "article:section" => meta.classes.push(ArticleClass {
                    key: Some("section".to_string()),
                    value: content.to_string(),
                }),
                "article:tag" => meta.classes.push(ArticleClass {
                    key: Some("tag".to_string()),
                    value: content.to_string(),
                }),
                "video:duration" => set_once(&mut meta.video_duration, content),
                _ => {}
            }
        }

        Ok((!meta.is_empty()).then_some(meta))
    }
}

fn set_once(slot: &mut Option<String>, value: &str) {
    if slot.is_none() {
        *slot = Some(value.to_string());
    }
}

fn split_commas(s: &str) -> Vec<String> {
    s.split([',', '،'])
        .map(str::trim)
        .filter(|k| !k.is_empty())
        .map(str::to_string)
        .collect()
}

/// Scalar JSON value as a trimmed, non-empty string.
fn scalar(value: &Value) -> Option<String> {
    let s = match value {
        Value::String(s) => s.trim().to_string(),
        Value::Number(n) => n.to_string(),
        _ => return None,
    };
    (!s.is_empty()).then_some(s)
}

/// First key of `keys` holding a usable scalar.
fn string_at(value: &Value, keys: &[&str]) -> Option<String> {
    keys.iter().find_map(|k| {
        let v = value.get(*k)?;
        scalar(v).or_else(|| v.get("value").and_then(scalar))
    })
}

/// Array of scalars or a comma separated string.
fn string_list(value: &Value) -> Vec<String> {
    match value {
        Value::Array(items) => items.iter().filter_map(scalar).collect(),
        Value::String(s) => split_commas(s),
        _ => Vec::new(),
    }
}

fn class_list(value: &Value) -> Vec<ArticleClass> {
    let Value::Array(items) = value else {
        return Vec::new();
    };
    items
        .iter()
        .filter_map(|item| match item {
            Value::Object(_) => Some(ArticleClass {
                key: string_at(item, &["key"]),
                value: string_at(item, &["value", "name"])?,
            }),
            other => scalar(other).map(ArticleClass::new),
        })
        .collect()
}

/// `"Name"`, `{"name": ..}` or a list of either, joined with `", "`.
fn person_names(value: &Value) -> Option<String> {
    let names: Vec<String> = match value {
        Value::Array(items) => items.iter().filter_map(person_names).collect(),
        Value::Object(_) => string_at(value, &["name"]).into_iter().collect(),
        other => scalar(other).into_iter().collect(),
    };
    (!names.is_empty()).then(|| names.join(", "))
}

fn image_url(value: &Value) -> Option<String> {
    match value {
        Value::Array(items) => items.iter().find_map(image_url),
        Value::Object(_) => string_at(value, &["url", "contentUrl"]),
        other => scalar(other),
    }
}

/// Collect objects from a JSON-LD value, descending into arrays and `@graph`.
fn flatten_ld(value: Value, out: &mut Vec<Value>) {
    match value {
        Value::Array(items) => items.into_iter().for_each(|v| flatten_ld(v, out)),
        Value::Object(mut map) => {
            if let Some(graph) = map.remove("@graph") {
                flatten_ld(graph, out);
            }
            out.push(Value::Object(map));
        }
        _ => {}
    }
}

fn is_article_type(t: &str) -> bool {
    t.ends_with("Article") || t == "VideoObject" || t == "BlogPosting"
}

fn is_article_node(node: &Value) -> bool {
    let typed = match node.get("@type") {
        Some(Value::String(t)) => is_article_type(t),
        Some(Value::Array(ts)) => ts.iter().filter_map(Value::as_str).any(is_article_type),
        _ => false,
    };
    typed || node.get("headline").is_some()
}
