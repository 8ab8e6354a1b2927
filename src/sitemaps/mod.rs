//! Sitemap discovery and parsing.
//!
//! - [`resolver`]: turns a year range (or a root sitemap index) into the
//!   ordered list of period sitemaps to visit
//! - [`fetcher`]: downloads one period sitemap and lists its article URLs
//!
//! Both read documents through [`parse_locs`], which only cares about the
//! text of `<loc>` elements under a `<urlset>` or `<sitemapindex>` root.

pub mod fetcher;
pub mod resolver;

use quick_xml::events::Event;
use quick_xml::reader::Reader;

/// Why a sitemap body could not be read.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseFailure(pub String);

impl std::fmt::Display for ParseFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Collect the text of every `<loc>` element, in document order.
///
/// Only `<loc>` children of `<url>` or `<sitemap>` entries count, so
/// extension elements such as `<image:loc>` are skipped. Namespace prefixes
/// are ignored and duplicates are kept.
/// A document without a `<urlset>` or `<sitemapindex>` root, or one the XML
/// reader rejects, is a [`ParseFailure`].
pub fn parse_locs(xml: &str) -> Result<Vec<String>, ParseFailure> {
    let mut reader = Reader::from_str(xml);
    let mut locs = Vec::new();
    let mut current: Option<String> = None;
    let mut saw_root = false;
    // Local names of the open elements
    let mut stack: Vec<Vec<u8>> = Vec::new();

    loop {
        match reader.read_event() {
            Ok(Event::Start(e)) => {
                let name = e.local_name().as_ref().to_vec();
                match name.as_slice() {
                    b"urlset" | b"sitemapindex" => saw_root = true,
                    b"loc" if matches!(stack.last().map(Vec::as_slice), Some(b"url" | b"sitemap")) => {
                        current = Some(String::new())
                    }
                    _ => {}
                }
                stack.push(name);
            }
            Ok(Event::Empty(e)) => {
                if matches!(e.local_name().as_ref(), b"urlset" | b"sitemapindex") {
                    saw_root = true;
                }
            }
            Ok(Event::Text(t)) => {
                if let Some(buf) = current.as_mut() {
                    let text = std::str::from_utf8(&t)
                        .map_err(|e| ParseFailure(format!("invalid utf-8 in <loc>: {e}")))?;
                    buf.push_str(text);
                }
            }
            Ok(Event::CData(t)) => {
                if let Some(buf) = current.as_mut() {
                    buf.push_str(&String::from_utf8_lossy(&t));
                }
            }
            Ok(Event::GeneralRef(r)) => {
                if let Some(buf) = current.as_mut() {
                    let name = String::from_utf8_lossy(&r).into_owned();
                    let resolved = resolve_entity(&name)
                        .ok_or_else(|| ParseFailure(format!("unknown entity &{name};")))?;
                    buf.push(resolved);
                }
            }
            Ok(Event::End(e)) => {
                stack.pop();
                if e.local_name().as_ref() == b"loc" {
                    if let Some(loc) = current.take() {
                        let loc = loc.trim();
                        if !loc.is_empty() {
                            locs.push(loc.to_string());
                        }
                    }
                }
            }
            Ok(Event::Eof) => break,
            Ok(_) => {}
            Err(e) => {
                return Err(ParseFailure(format!(
                    "xml error at byte {}: {e}",
                    reader.buffer_position()
                )));
            }
        }
    }

    if !saw_root {
        return Err(ParseFailure(
            "document has no <urlset> or <sitemapindex> root".to_string(),
        ));
    }
    Ok(locs)
}

fn resolve_entity(name: &str) -> Option<char> {
    match name {
        "amp" => Some('&'),
        "lt" => Some('<'),
        "gt" => Some('>'),
        "quot" => Some('"'),
        "apos" => Some('\''),
        _ => {
            let num = name.strip_prefix('#')?;
            let code = match num.strip_prefix('x').or_else(|| num.strip_prefix('X')) {
                Some(hex) => u32::from_str_radix(hex, 16).ok()?,
                None => num.parse().ok()?,
            };
            char::from_u32(code)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_urlset() {
        let xml = r#"<?xml version="1.0" encoding="UTF-8"?>
<urlset xmlns="http://www.sitemaps.org/schemas/sitemap/0.9"
        xmlns:image="http://www.google.com/schemas/sitemap-image/1.1">
  <url>
    <loc>https://example.com/news/first-story-101</loc>
    <lastmod>2024-03-01</lastmod>
    <image:image><image:loc>https://cdn.example.com/1.jpg</image:loc></image:image>
  </url>
  <url><loc> https://example.com/news/second-story-102 </loc></url>
  <url><loc>https://example.com/news/first-story-101</loc></url>
</urlset>"#;

        let locs = parse_locs(xml).unwrap();
        assert_eq!(
            locs,
            vec![
                "https://example.com/news/first-story-101",
                "https://example.com/news/second-story-102",
                "https://example.com/news/first-story-101",
            ]
        );
    }

    #[test]
    fn test_parse_sitemapindex() {
        let xml = r#"<sitemapindex xmlns="http://www.sitemaps.org/schemas/sitemap/0.9">
  <sitemap><loc>https://example.com/sitemaps/all/sitemap-2024-01.xml</loc></sitemap>
  <sitemap><loc>https://example.com/sitemaps/all/sitemap-2024-02.xml</loc></sitemap>
</sitemapindex>"#;
        let locs = parse_locs(xml).unwrap();
        assert_eq!(locs.len(), 2);
        assert!(locs[1].ends_with("2024-02.xml"));
    }

    #[test]
    fn test_entities_in_loc_are_resolved() {
        let xml = "<urlset><url><loc>https://example.com/a?x=1&amp;y=2&#38;z=3</loc></url></urlset>";
        assert_eq!(
            parse_locs(xml).unwrap(),
            vec!["https://example.com/a?x=1&y=2&z=3"]
        );
    }

    #[test]
    fn test_prefixed_sitemap_elements() {
        let xml = r#"<sm:urlset xmlns:sm="http://www.sitemaps.org/schemas/sitemap/0.9">
  <sm:url><sm:loc>https://example.com/a-1</sm:loc></sm:url>
</sm:urlset>"#;
        assert_eq!(parse_locs(xml).unwrap(), vec!["https://example.com/a-1"]);
    }

    #[test]
    fn test_empty_urlset_is_ok() {
        assert!(parse_locs("<urlset></urlset>").unwrap().is_empty());
        assert!(parse_locs("<urlset/>").unwrap().is_empty());
    }

    #[test]
    fn test_html_body_is_rejected() {
        let html = "<html><body><p>Not found</p></body></html>";
        assert!(parse_locs(html).is_err());
    }

    #[test]
    fn test_mismatched_tags_are_rejected() {
        assert!(parse_locs("<urlset><url><loc>x</url></urlset>").is_err());
    }
}
