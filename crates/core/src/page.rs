//! Retained page content for lazily loaded entities.
//!
//! A [`Page`] keeps both the raw HTML of a fetched document and its parsed
//! form, plus the handful of lookups shared by every entity: the CSRF
//! token, the archive's "not found" marker, and the pagination control.
//!
//! Pages serialize as their raw HTML, which is what makes entity snapshots
//! possible: a restored page re-parses to exactly the state a fresh fetch
//! would have produced.

use scraper::{ElementRef, Html, Selector};
use serde::de::{self, Deserializer, Visitor};
use serde::{Deserialize, Serialize, Serializer};

/// A fetched document: raw HTML plus its parsed DOM.
#[derive(Debug, Clone)]
pub struct Page {
    raw: String,
    doc: Html,
}

impl Page {
    /// Parses raw HTML into a page. Parsing never fails; malformed markup
    /// simply yields a best-effort DOM.
    pub fn parse(raw: impl Into<String>) -> Self {
        let raw = raw.into();
        let doc = Html::parse_document(&raw);
        Self { raw, doc }
    }

    /// The raw HTML this page was parsed from.
    pub fn raw(&self) -> &str {
        &self.raw
    }

    /// The parsed document.
    pub fn html(&self) -> &Html {
        &self.doc
    }

    /// First element matching a CSS selector.
    pub(crate) fn select_first(&self, selector: &str) -> Option<ElementRef<'_>> {
        let sel = Selector::parse(selector).ok()?;
        self.doc.select(&sel).next()
    }

    /// All elements matching a CSS selector, in document order.
    pub(crate) fn select_all(&self, selector: &str) -> Vec<ElementRef<'_>> {
        match Selector::parse(selector) {
            Ok(sel) => self.doc.select(&sel).collect(),
            Err(_) => Vec::new(),
        }
    }

    /// Trimmed text content of the first match, if any.
    pub(crate) fn text_of(&self, selector: &str) -> Option<String> {
        self.select_first(selector).map(|el| element_text(el))
    }

    /// Attribute value of the first match, if any.
    pub(crate) fn attr_of(&self, selector: &str, attr: &str) -> Option<String> {
        self.select_first(selector)
            .and_then(|el| el.value().attr(attr))
            .map(str::to_string)
    }

    /// The page's CSRF token, from the `csrf-token` meta tag or a hidden
    /// `authenticity_token` form input.
    pub fn csrf_token(&self) -> Option<String> {
        self.attr_of(r#"meta[name="csrf-token"]"#, "content")
            .or_else(|| self.attr_of(r#"input[name="authenticity_token"]"#, "value"))
    }

    /// Whether this page carries the archive's "not found" marker.
    pub fn is_not_found(&self) -> bool {
        self.select_all("h2.heading")
            .iter()
            .any(|el| element_text(*el).contains("Error 404"))
    }

    /// Total page count read from the pagination control; a missing control
    /// means a single page.
    pub fn page_count(&self) -> u32 {
        for selector in [r#"ol[title="pagination"]"#, "ol.pagination"] {
            if let Some(ol) = self.select_first(selector) {
                return pagination_pages(ol);
            }
        }
        1
    }

    /// Page count of a pagination control nested under `container`, for
    /// listings embedded in a larger page (comment placeholders).
    pub(crate) fn page_count_within(&self, container: &str) -> u32 {
        let selector = format!("{container} ol.pagination");
        match self.select_first(&selector) {
            Some(ol) => pagination_pages(ol),
            None => 1,
        }
    }
}

/// Highest numeric entry in a pagination list, defaulting to 1.
fn pagination_pages(ol: ElementRef<'_>) -> u32 {
    let mut pages = 1;
    if let Ok(sel) = Selector::parse("li") {
        for li in ol.select(&sel) {
            if let Ok(n) = element_text(li).parse::<u32>() {
                pages = pages.max(n);
            }
        }
    }
    pages
}

/// Concatenated, trimmed text content of an element.
pub(crate) fn element_text(el: ElementRef<'_>) -> String {
    el.text().collect::<String>().trim().to_string()
}

/// Parses a count like `"1,234"` with thousands separators dropped.
pub(crate) fn parse_count(text: &str) -> Option<u64> {
    let cleaned = text.trim().replace(',', "");
    cleaned.parse().ok()
}

impl Serialize for Page {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.raw)
    }
}

impl<'de> Deserialize<'de> for Page {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        struct PageVisitor;

        impl Visitor<'_> for PageVisitor {
            type Value = Page;

            fn expecting(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
                f.write_str("an HTML string")
            }

            fn visit_str<E: de::Error>(self, v: &str) -> std::result::Result<Page, E> {
                Ok(Page::parse(v))
            }
        }

        deserializer.deserialize_str(PageVisitor)
    }
}
