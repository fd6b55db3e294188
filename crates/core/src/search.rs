//! Work search.
//!
//! [`SearchQuery`] mirrors the archive's work-search form: every field is
//! optional and an empty query still matches everything. [`search_works`]
//! submits one result page and decodes it into [`SearchResults`], whose
//! works are partial stubs built from the listing banners; call
//! [`Work::reload`] on a hit to get the rest.

use url::Url;

use crate::blurb;
use crate::error::{ArchiveError, Result};
use crate::page::{Page, parse_count};
use crate::session::Session;
use crate::transport::{BASE_URL, Transport};
use crate::work::Work;

/// Results per page, fixed by the archive.
const PAGE_SIZE: u64 = 20;

/// A numeric range filter, rendered in the archive's shorthand
/// (`>100`, `<100`, `100`, `100-200`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CountBound {
    AtLeast(u64),
    AtMost(u64),
    Exactly(u64),
    Between(u64, u64),
}

impl CountBound {
    fn render(self) -> String {
        match self {
            Self::AtLeast(n) => format!(">{n}"),
            Self::AtMost(n) => format!("<{n}"),
            Self::Exactly(n) => n.to_string(),
            Self::Between(low, high) => format!("{low}-{high}"),
        }
    }
}

/// Audience ratings, keyed by the archive's internal tag ids.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Rating {
    NotRated,
    General,
    Teen,
    Mature,
    Explicit,
}

impl Rating {
    fn id(self) -> u8 {
        match self {
            Self::NotRated => 9,
            Self::General => 10,
            Self::Teen => 11,
            Self::Mature => 12,
            Self::Explicit => 13,
        }
    }
}

/// Sort orders offered by the search form.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortColumn {
    BestMatch,
    Author,
    Title,
    DatePosted,
    DateUpdated,
    WordCount,
    Rating,
    Hits,
    Bookmarks,
    Comments,
    Kudos,
}

impl SortColumn {
    fn as_param(self) -> &'static str {
        match self {
            Self::BestMatch => "_score",
            Self::Author => "authors_to_sort_on",
            Self::Title => "title_to_sort_on",
            Self::DatePosted => "created_at",
            Self::DateUpdated => "revised_at",
            Self::WordCount => "word_count",
            Self::Rating => "rating_ids",
            Self::Hits => "hits",
            Self::Bookmarks => "bookmarks_count",
            Self::Comments => "comments_count",
            Self::Kudos => "kudos_count",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortDirection {
    Ascending,
    Descending,
}

impl SortDirection {
    fn as_param(self) -> &'static str {
        match self {
            Self::Ascending => "asc",
            Self::Descending => "desc",
        }
    }
}

/// One work-search form submission. `Default` is the empty form.
///
/// String fields are skipped when empty; tag-name fields (`fandoms`,
/// `characters`, `relationships`, `tags`) take comma-separated names the
/// way the form does.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SearchQuery {
    /// Free-text query matched against any field.
    pub any_field: String,
    pub title: String,
    pub author: String,
    /// Restrict to single-chapter works.
    pub single_chapter: bool,
    pub word_count: Option<CountBound>,
    /// Language id as the form encodes it (e.g. `"en"`).
    pub language: String,
    pub fandoms: String,
    pub characters: String,
    pub relationships: String,
    /// Additional ("freeform") tag names.
    pub tags: String,
    pub rating: Option<Rating>,
    pub hits: Option<CountBound>,
    pub kudos: Option<CountBound>,
    pub bookmarks: Option<CountBound>,
    pub comments: Option<CountBound>,
    /// `Some(true)` restricts to crossovers, `Some(false)` excludes them.
    pub crossovers: Option<bool>,
    /// `Some(true)` restricts to complete works, `Some(false)` to WIPs.
    pub completion_status: Option<bool>,
    pub sort_column: Option<SortColumn>,
    pub sort_direction: Option<SortDirection>,
    /// Last-updated filter, e.g. `"1 week ago"` or a date range.
    pub revised_at: String,
}

impl SearchQuery {
    /// The search URL for one result page.
    ///
    /// The form always submits a `query` value; when no free text was given
    /// a single space stands in so the other filters still apply.
    pub fn url(&self, page: u32) -> Result<String> {
        let mut url = Url::parse(BASE_URL)
            .and_then(|base| base.join("/works/search"))
            .map_err(|e| ArchiveError::InvalidUrl(e.to_string()))?;
        {
            let mut pairs = url.query_pairs_mut();
            let query = if self.any_field.is_empty() { " " } else { &self.any_field };
            pairs.append_pair("work_search[query]", query);
            if page != 1 {
                pairs.append_pair("page", &page.to_string());
            }
            if !self.title.is_empty() {
                pairs.append_pair("work_search[title]", &self.title);
            }
            if !self.author.is_empty() {
                pairs.append_pair("work_search[creators]", &self.author);
            }
            if self.single_chapter {
                pairs.append_pair("work_search[single_chapter]", "1");
            }
            if let Some(bound) = self.word_count {
                pairs.append_pair("work_search[word_count]", &bound.render());
            }
            if !self.language.is_empty() {
                pairs.append_pair("work_search[language_id]", &self.language);
            }
            if !self.fandoms.is_empty() {
                pairs.append_pair("work_search[fandom_names]", &self.fandoms);
            }
            if !self.characters.is_empty() {
                pairs.append_pair("work_search[character_names]", &self.characters);
            }
            if !self.relationships.is_empty() {
                pairs.append_pair("work_search[relationship_names]", &self.relationships);
            }
            if !self.tags.is_empty() {
                pairs.append_pair("work_search[freeform_names]", &self.tags);
            }
            if let Some(rating) = self.rating {
                pairs.append_pair("work_search[rating_ids]", &rating.id().to_string());
            }
            if let Some(bound) = self.hits {
                pairs.append_pair("work_search[hits]", &bound.render());
            }
            if let Some(bound) = self.kudos {
                pairs.append_pair("work_search[kudos_count]", &bound.render());
            }
            if let Some(bound) = self.bookmarks {
                pairs.append_pair("work_search[bookmarks_count]", &bound.render());
            }
            if let Some(bound) = self.comments {
                pairs.append_pair("work_search[comments_count]", &bound.render());
            }
            if let Some(crossovers) = self.crossovers {
                pairs.append_pair("work_search[crossover]", if crossovers { "T" } else { "F" });
            }
            if let Some(complete) = self.completion_status {
                pairs.append_pair("work_search[complete]", if complete { "T" } else { "F" });
            }
            if let Some(column) = self.sort_column {
                pairs.append_pair("work_search[sort_column]", column.as_param());
            }
            if let Some(direction) = self.sort_direction {
                pairs.append_pair("work_search[sort_direction]", direction.as_param());
            }
            if !self.revised_at.is_empty() {
                pairs.append_pair("work_search[revised_at]", &self.revised_at);
            }
        }
        Ok(url.into())
    }
}

/// One decoded page of search results.
#[derive(Debug, Clone)]
pub struct SearchResults {
    /// Total matches across all pages, as reported by the results heading.
    pub total: u64,
    /// Total result pages.
    pub pages: u32,
    /// The page these works came from, 1-based.
    pub page: u32,
    /// Work stubs from this page's banners, in result order.
    pub works: Vec<Work>,
}

impl SearchResults {
    /// Decodes a fetched results page.
    ///
    /// A page with no results heading (the archive renders a "No results
    /// found" paragraph instead) decodes as zero matches.
    pub fn from_page(page: &Page, page_number: u32) -> Self {
        let total = page
            .text_of("div#main h3.heading")
            .and_then(|heading| heading.split_whitespace().next().and_then(parse_count))
            .unwrap_or(0);
        let works = blurb::work_rows(page).into_iter().map(Work::from_row).collect();
        Self {
            total,
            pages: total.div_ceil(PAGE_SIZE) as u32,
            page: page_number,
            works,
        }
    }
}

/// Runs a work search and decodes one page of results.
pub fn search_works(
    transport: &Transport,
    session: Option<&Session>,
    query: &SearchQuery,
    page: u32,
) -> Result<SearchResults> {
    let url = query.url(page)?;
    tracing::debug!(%url, page, "searching works");
    let doc = transport.get_page(&url, session)?;
    Ok(SearchResults::from_page(&doc, page))
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use rstest::rstest;

    use super::*;

    fn query_params(url: &str) -> HashMap<String, String> {
        let parsed = Url::parse(url).unwrap();
        parsed.query_pairs().into_owned().collect()
    }

    #[rstest]
    #[case(CountBound::AtLeast(100), ">100")]
    #[case(CountBound::AtMost(5), "<5")]
    #[case(CountBound::Exactly(7), "7")]
    #[case(CountBound::Between(10, 20), "10-20")]
    fn test_count_bound_rendering(#[case] bound: CountBound, #[case] expected: &str) {
        assert_eq!(bound.render(), expected);
    }

    #[test]
    fn test_empty_query_submits_blank_query_only() {
        let url = SearchQuery::default().url(1).unwrap();
        assert!(url.starts_with("https://archiveofourown.org/works/search?"));

        let params = query_params(&url);
        assert_eq!(params.len(), 1);
        assert_eq!(params["work_search[query]"], " ");
    }

    #[test]
    fn test_page_param_only_past_the_first() {
        let query = SearchQuery { any_field: "watch".into(), ..Default::default() };
        assert!(!query_params(&query.url(1).unwrap()).contains_key("page"));
        assert_eq!(query_params(&query.url(3).unwrap())["page"], "3");
    }

    #[test]
    fn test_filters_map_to_form_fields() {
        let query = SearchQuery {
            any_field: "night".into(),
            title: "watch".into(),
            author: "alice".into(),
            single_chapter: true,
            word_count: Some(CountBound::AtLeast(1000)),
            language: "en".into(),
            fandoms: "Fandom One".into(),
            rating: Some(Rating::Teen),
            kudos: Some(CountBound::Between(10, 20)),
            crossovers: Some(false),
            completion_status: Some(true),
            sort_column: Some(SortColumn::Kudos),
            sort_direction: Some(SortDirection::Descending),
            revised_at: "1 week ago".into(),
            ..Default::default()
        };
        let params = query_params(&query.url(1).unwrap());

        assert_eq!(params["work_search[query]"], "night");
        assert_eq!(params["work_search[title]"], "watch");
        assert_eq!(params["work_search[creators]"], "alice");
        assert_eq!(params["work_search[single_chapter]"], "1");
        assert_eq!(params["work_search[word_count]"], ">1000");
        assert_eq!(params["work_search[language_id]"], "en");
        assert_eq!(params["work_search[fandom_names]"], "Fandom One");
        assert_eq!(params["work_search[rating_ids]"], "11");
        assert_eq!(params["work_search[kudos_count]"], "10-20");
        assert_eq!(params["work_search[crossover]"], "F");
        assert_eq!(params["work_search[complete]"], "T");
        assert_eq!(params["work_search[sort_column]"], "kudos_count");
        assert_eq!(params["work_search[sort_direction]"], "desc");
        assert_eq!(params["work_search[revised_at]"], "1 week ago");
        assert!(!params.contains_key("work_search[character_names]"));
    }

    const RESULTS: &str = r#"<html><body>
    <div id="main" class="works-search region">
      <h3 class="heading">1,234 Found</h3>
      <ol class="work index group">
        <li class="work blurb group" id="work_900" role="article">
          <h4 class="heading">
            <a href="/works/900">Found Work</a>
            <a rel="author" href="/users/alice">alice</a>
          </h4>
          <dl class="stats"><dd class="words">2,000</dd></dl>
        </li>
        <li class="work blurb group" id="work_901" role="article">
          <h4 class="heading">
            <a href="/works/901">Other Hit</a>
            <a rel="author" href="/users/bob">bob</a>
          </h4>
        </li>
      </ol>
    </div>
    </body></html>"#;

    #[test]
    fn test_results_decode_total_pages_and_stubs() {
        let results = SearchResults::from_page(&Page::parse(RESULTS), 2);
        assert_eq!(results.total, 1234);
        assert_eq!(results.pages, 62);
        assert_eq!(results.page, 2);
        assert_eq!(results.works.len(), 2);

        let first = &results.works[0];
        assert_eq!(first.id(), 900);
        assert_eq!(first.title().unwrap(), "Found Work");
        assert_eq!(first.authors().unwrap()[0].username(), "alice");
        assert_eq!(first.words().unwrap(), 2000);
        assert!(!first.is_loaded());
    }

    #[test]
    fn test_no_results_page_decodes_empty() {
        let page = Page::parse(
            r#"<html><body>
            <div id="main" class="works-search region">
              <p>No results found. You may want to edit your search to make it less specific.</p>
            </div>
            </body></html>"#,
        );
        let results = SearchResults::from_page(&page, 1);
        assert_eq!(results.total, 0);
        assert_eq!(results.pages, 0);
        assert!(results.works.is_empty());
    }
}
