//! Body text extraction from paragraph elements.

use crate::utils::{collapse_whitespace, count_words};
use once_cell::sync::Lazy;
use scraper::{Html, Selector};

static PARAGRAPH: Lazy<Selector> = Lazy::new(|| Selector::parse("p").expect("static selector"));

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExtractedContent {
    /// Paragraph texts joined by single spaces.
    pub content: String,
    pub word_count: usize,
    /// Number of `<p>` elements in the page, empty ones included.
    pub paragraph_count: usize,
}

pub fn extract_content(document: &Html) -> ExtractedContent {
    let mut paragraph_count = 0;
    let mut parts = Vec::new();

    for p in document.select(&PARAGRAPH) {
        paragraph_count += 1;
        let text = collapse_whitespace(&p.text().collect::<String>());
        if !text.is_empty() {
            parts.push(text);
        }
    }

    let content = parts.join(" ");
    let word_count = count_words(&content);
    ExtractedContent {
        content,
        word_count,
        paragraph_count,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn extract(html: &str) -> ExtractedContent {
        extract_content(&Html::parse_document(html))
    }

    #[test]
    fn test_joins_paragraphs_with_single_spaces() {
        let c = extract(
            "<article><p>One   two</p><div>skip me</div><p>\n three <b>four</b>\n</p></article>",
        );
        assert_eq!(c.content, "One two three four");
        assert_eq!(c.word_count, 4);
        assert_eq!(c.paragraph_count, 2);
    }

    #[test]
    fn test_no_paragraphs_means_empty_content() {
        let c = extract("<html><body><div>Only a div</div></body></html>");
        assert_eq!(c.content, "");
        assert_eq!(c.word_count, 0);
        assert_eq!(c.paragraph_count, 0);
    }

    #[test]
    fn test_empty_paragraphs_are_counted_but_not_joined() {
        let c = extract("<p></p><p>text</p><p>   </p>");
        assert_eq!(c.content, "text");
        assert_eq!(c.paragraph_count, 3);
    }

    #[test]
    fn test_word_count_matches_content_tokens() {
        let c = extract("<p>مرحبا بكم</p><p>في الموقع الإخباري</p>");
        assert_eq!(c.word_count, c.content.split_whitespace().count());
        assert_eq!(c.word_count, 5);
    }
}
