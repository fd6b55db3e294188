//! Listing-row ("blurb") parsing.
//!
//! Listing pages describe each entry with a compact banner: a heading link
//! to the work, author links, fandom links, and a stats block. This module
//! decodes those banners into plain row structs that are cheap to move
//! across the fan-out task boundary; callers turn rows into partial entity
//! projections (stubs) afterwards.

use scraper::{ElementRef, Selector};

use crate::page::{Page, element_text, parse_count};

/// One work banner from a listing page.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct WorkRow {
    pub id: u64,
    pub title: String,
    pub authors: Vec<String>,
    pub fandoms: Vec<String>,
    pub summary: Option<String>,
    pub words: Option<u64>,
}

/// One entry from a subscription listing; the archive mixes works, series
/// and users in the same list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum SubscriptionRow {
    Work { id: u64, title: String, authors: Vec<String> },
    Series { id: u64, name: String, authors: Vec<String> },
    User { username: String },
}

/// Decodes every work banner on a listing page, skipping rows without a
/// work link (deleted or external entries).
pub(crate) fn work_rows(page: &Page) -> Vec<WorkRow> {
    page.select_all("li.blurb")
        .into_iter()
        .filter_map(work_row)
        .collect()
}

fn work_row(banner: ElementRef<'_>) -> Option<WorkRow> {
    let heading_links = select(banner, "h4.heading a");

    let mut id = None;
    let mut title = None;
    let mut authors = Vec::new();
    for link in &heading_links {
        let href = link.value().attr("href").unwrap_or_default();
        if link.value().attr("rel").is_some_and(|rel| rel.contains("author")) {
            authors.push(element_text(*link));
        } else if href.starts_with("/works") || href.contains("/works/") {
            id = work_id_from_href(href);
            title = Some(element_text(*link));
        }
    }

    let fandoms = select(banner, "h5.fandoms a")
        .into_iter()
        .map(element_text)
        .collect();
    let summary = select(banner, "blockquote.userstuff.summary")
        .first()
        .map(|el| element_text(*el));
    let words = select(banner, "dd.words")
        .first()
        .and_then(|el| parse_count(&element_text(*el)));

    Some(WorkRow { id: id?, title: title?, authors, fandoms, summary, words })
}

/// Decodes every entry of a subscription listing.
pub(crate) fn subscription_rows(page: &Page) -> Vec<SubscriptionRow> {
    let mut rows = Vec::new();
    for entry in page.select_all("dl.subscription dt") {
        let mut authors = Vec::new();
        let mut work = None;
        let mut series = None;
        let mut user = None;
        for link in select(entry, "a") {
            let href = link.value().attr("href").unwrap_or_default();
            if link.value().attr("rel").is_some_and(|rel| rel.contains("author")) {
                authors.push(element_text(link));
            } else if href.starts_with("/works") {
                work = work_id_from_href(href).map(|id| (id, element_text(link)));
            } else if href.starts_with("/users") {
                user = Some(element_text(link));
            } else if let Some(id) = last_segment_id(href) {
                series = Some((id, element_text(link)));
            }
        }
        if let Some((id, title)) = work {
            rows.push(SubscriptionRow::Work { id, title, authors });
        } else if let Some(username) = user {
            rows.push(SubscriptionRow::User { username });
        } else if let Some((id, name)) = series {
            rows.push(SubscriptionRow::Series { id, name, authors });
        }
    }
    rows
}

/// Extracts the work id from a work URL or relative href.
pub(crate) fn work_id_from_href(href: &str) -> Option<u64> {
    let mut segments = href.split('/');
    segments.find(|segment| *segment == "works")?;
    let id = segments.next()?.split('?').next()?;
    id.parse().ok()
}

/// Numeric trailing path segment, for series and subscription hrefs.
pub(crate) fn last_segment_id(href: &str) -> Option<u64> {
    let last = href.split('/').next_back()?;
    last.split('?').next()?.parse().ok()
}

fn select<'a>(el: ElementRef<'a>, selector: &str) -> Vec<ElementRef<'a>> {
    match Selector::parse(selector) {
        Ok(sel) => el.select(&sel).collect(),
        Err(_) => Vec::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    const LISTING: &str = r#"<html><body>
    <ol class="work index group">
      <li class="work blurb group" role="article">
        <h4 class="heading">
          <a href="/works/100">First Work</a>
          <a rel="author" href="/users/alice">alice</a>
        </h4>
        <h5 class="fandoms heading"><a href="/tags/F1">Fandom One</a></h5>
        <blockquote class="userstuff summary"><p>A summary.</p></blockquote>
        <dl class="stats"><dd class="words">12,345</dd></dl>
      </li>
      <li class="work blurb group" role="article">
        <h4 class="heading">
          <a href="/works/200?view_adult=true">Second Work</a>
          <a rel="author" href="/users/bob">bob</a>
          <a rel="author" href="/users/carol">carol</a>
        </h4>
      </li>
      <li class="work blurb group" role="article">
        <h4 class="heading"><a href="/external_works/7">External</a></h4>
      </li>
    </ol>
    </body></html>"#;

    #[test]
    fn test_work_rows_decoded_in_order() {
        let page = Page::parse(LISTING);
        let rows = work_rows(&page);
        assert_eq!(rows.len(), 2);

        assert_eq!(rows[0].id, 100);
        assert_eq!(rows[0].title, "First Work");
        assert_eq!(rows[0].authors, vec!["alice"]);
        assert_eq!(rows[0].fandoms, vec!["Fandom One"]);
        assert_eq!(rows[0].summary.as_deref(), Some("A summary."));
        assert_eq!(rows[0].words, Some(12345));

        assert_eq!(rows[1].id, 200);
        assert_eq!(rows[1].authors, vec!["bob", "carol"]);
        assert_eq!(rows[1].words, None);
    }

    #[test]
    fn test_subscription_rows_mixed_kinds() {
        let page = Page::parse(
            r#"<html><body>
            <dl class="subscription index group">
              <dt>
                <a href="/works/300">Some Work</a>
                <a rel="author" href="/users/dan">dan</a>
              </dt>
              <dt><a href="/users/erin">erin</a></dt>
              <dt>
                <a href="/series/42">A Series</a>
                <a rel="author" href="/users/faye">faye</a>
              </dt>
            </dl>
            </body></html>"#,
        );
        let rows = subscription_rows(&page);
        assert_eq!(rows.len(), 3);
        assert_eq!(
            rows[0],
            SubscriptionRow::Work { id: 300, title: "Some Work".into(), authors: vec!["dan".into()] }
        );
        assert_eq!(rows[1], SubscriptionRow::User { username: "erin".into() });
        assert_eq!(
            rows[2],
            SubscriptionRow::Series { id: 42, name: "A Series".into(), authors: vec!["faye".into()] }
        );
    }

    #[rstest]
    #[case("/works/123", Some(123))]
    #[case("/works/123?view_adult=true", Some(123))]
    #[case("https://archiveofourown.org/works/456/chapters/7", Some(456))]
    #[case("/series/99", None)]
    #[case("/works/not-a-number", None)]
    fn test_work_id_from_href(#[case] href: &str, #[case] expected: Option<u64>) {
        assert_eq!(work_id_from_href(href), expected);
    }

    #[test]
    fn test_last_segment_id() {
        assert_eq!(last_segment_id("/series/42"), Some(42));
        assert_eq!(last_segment_id("/series/oops"), None);
    }
}
