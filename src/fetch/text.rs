//! Page text normalization: reduce fetched markup to a bounded plain-text
//! representation before it goes downstream.
//!
//! Boilerplate stripping is best-effort, not an invariant, so it lives behind
//! a replaceable strategy trait and can be swapped without touching the
//! scheduler.

use lazy_static::lazy_static;
use regex::Regex;
use std::io::Cursor;
use tracing::debug;
use url::Url;

use crate::models::truncate_chars;
use crate::TARGET_WEB_REQUEST;

/// Strategy for reducing raw HTML to plain text.
pub trait TextExtractor: Send + Sync {
    fn extract_text(&self, html: &str, url: &Url) -> String;
}

lazy_static! {
    // Chrome and navigation blocks contribute noise, not leads.
    static ref BOILERPLATE_BLOCKS: Regex = Regex::new(
        r"(?is)<(script|style|noscript|nav|footer|header|aside)[^>]*>.*?</(script|style|noscript|nav|footer|header|aside)>"
    )
    .unwrap();
    static ref TAGS: Regex = Regex::new(r"(?s)<[^>]+>").unwrap();
    static ref BLANK_RUNS: Regex = Regex::new(r"\n{2,}").unwrap();
}

/// Default strategy: readability-based article extraction with a plain
/// tag-stripping fallback, followed by the hard length cap.
pub struct ReadabilityExtractor {
    max_len: usize,
}

impl ReadabilityExtractor {
    pub fn new(max_len: usize) -> Self {
        ReadabilityExtractor { max_len }
    }
}

impl TextExtractor for ReadabilityExtractor {
    fn extract_text(&self, html: &str, url: &Url) -> String {
        let mut cursor = Cursor::new(html.as_bytes());
        let text = match readability::extractor::extract(&mut cursor, url) {
            Ok(product) if !product.text.trim().is_empty() => {
                format!("Title: {}\n{}", product.title, product.text)
            }
            Ok(_) | Err(_) => {
                debug!(target: TARGET_WEB_REQUEST, "Readability produced no text for {}, falling back to tag stripping", url);
                strip_tags(html)
            }
        };
        truncate_chars(normalize_whitespace(&text).trim(), self.max_len)
    }
}

/// Crude fallback: drop boilerplate blocks and tags, decode the common
/// entities, keep whatever text remains.
pub fn strip_tags(html: &str) -> String {
    let without_blocks = BOILERPLATE_BLOCKS.replace_all(html, "\n");
    let without_tags = TAGS.replace_all(&without_blocks, "\n");
    decode_entities(&without_tags)
}

fn decode_entities(text: &str) -> String {
    text.replace("&amp;", "&")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&#39;", "'")
        .replace("&nbsp;", " ")
}

fn normalize_whitespace(text: &str) -> String {
    let lines: Vec<&str> = text
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .collect();
    BLANK_RUNS.replace_all(&lines.join("\n"), "\n").to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_strip_tags_removes_boilerplate() {
        let html = "<html><head><style>.a{}</style></head><body>\
                    <nav>Home | About</nav>\
                    <p>Acme Windows manufactures windows.</p>\
                    <script>track();</script>\
                    <footer>© Acme</footer></body></html>";
        let text = strip_tags(html);
        assert!(text.contains("Acme Windows manufactures windows."));
        assert!(!text.contains("track()"));
        assert!(!text.contains("Home | About"));
        assert!(!text.contains("© Acme"));
    }

    #[test]
    fn test_entities_decoded() {
        let text = strip_tags("<p>Smith &amp; Sons &quot;Ltd&quot;</p>");
        assert!(text.contains("Smith & Sons \"Ltd\""));
    }

    #[test]
    fn test_hard_length_cap() {
        let url = Url::parse("https://example.com/").unwrap();
        let body = format!("<html><body><p>{}</p></body></html>", "word ".repeat(5000));
        let extractor = ReadabilityExtractor::new(100);
        let text = extractor.extract_text(&body, &url);
        assert!(text.chars().count() <= 100);
        assert!(!text.is_empty());
    }

    #[test]
    fn test_fallback_on_unreadable_markup() {
        let url = Url::parse("https://example.com/").unwrap();
        let extractor = ReadabilityExtractor::new(8000);
        let text = extractor.extract_text("<div>Contact: sales@acme.example</div>", &url);
        assert!(text.contains("sales@acme.example"));
    }
}
