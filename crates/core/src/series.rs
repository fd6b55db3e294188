//! Series: ordered groupings of works.
//!
//! The series page renders its metadata as a definition list whose labels
//! are printed text ("Series Begun:", "Words:", ...), so fields are read
//! by walking dt/dd pairs rather than by class. The work list is the same
//! blurb markup as every other listing and paginates for large series.

use std::cell::{OnceCell, RefCell};
use std::hash::{Hash, Hasher};

use serde::{Deserialize, Serialize};

use crate::actions;
use crate::blurb::{self, WorkRow};
use crate::page::{Page, element_text, parse_count};
use crate::pagination::{self, FetchMode};
use crate::session::Session;
use crate::transport::{BASE_URL, Transport};
use crate::work::Work;
use crate::{ArchiveError, Result};

/// A series on the archive, identified by its numeric id.
#[derive(Debug, Clone)]
pub struct Series {
    id: u64,
    state: SeriesState,
    works_cache: RefCell<Option<Vec<WorkRow>>>,
}

#[derive(Debug, Clone)]
enum SeriesState {
    Unloaded,
    Stub { name: Option<String>, creators: Option<Vec<String>> },
    Loaded(Box<LoadedSeries>),
}

#[derive(Debug, Clone)]
struct LoadedSeries {
    page: Page,
    fields: SeriesFields,
}

#[derive(Debug, Default, Clone)]
struct SeriesFields {
    name: OnceCell<String>,
    creators: OnceCell<Vec<String>>,
    begun: OnceCell<Option<String>>,
    updated: OnceCell<Option<String>>,
    description: OnceCell<String>,
    notes: OnceCell<String>,
    words: OnceCell<u64>,
    nworks: OnceCell<u64>,
    bookmark_count: OnceCell<u64>,
    complete: OnceCell<bool>,
}

/// Serializable image of a series.
#[derive(Debug, Serialize, Deserialize)]
pub struct SeriesSnapshot {
    id: u64,
    page: Option<Page>,
}

impl Series {
    /// A series known only by id.
    pub fn new(id: u64) -> Self {
        Self { id, state: SeriesState::Unloaded, works_cache: RefCell::new(None) }
    }

    pub(crate) fn stub(id: u64, name: String, creators: Vec<String>) -> Self {
        Self {
            id,
            state: SeriesState::Stub {
                name: Some(name),
                creators: (!creators.is_empty()).then_some(creators),
            },
            works_cache: RefCell::new(None),
        }
    }

    /// The series' id.
    pub fn id(&self) -> u64 {
        self.id
    }

    /// The series' canonical URL.
    pub fn url(&self) -> String {
        format!("{BASE_URL}/series/{}", self.id)
    }

    /// Whether a reload (or snapshot restore) has completed.
    pub fn is_loaded(&self) -> bool {
        matches!(self.state, SeriesState::Loaded(_))
    }

    /// Fetches the series page and replaces this series' state with it.
    /// A failed reload leaves the previous state untouched.
    pub fn reload(&mut self, transport: &Transport, session: Option<&Session>) -> Result<()> {
        let page = transport.get_page(&self.url(), session)?;
        if page.is_not_found() {
            return Err(ArchiveError::InvalidId { kind: "series", id: self.id.to_string() });
        }
        self.state =
            SeriesState::Loaded(Box::new(LoadedSeries { page, fields: SeriesFields::default() }));
        self.works_cache.replace(None);
        tracing::debug!(series = self.id, "series loaded");
        Ok(())
    }

    /// Serializes the series' cached page.
    pub fn snapshot(&self) -> SeriesSnapshot {
        let page = match &self.state {
            SeriesState::Loaded(loaded) => Some(loaded.page.clone()),
            _ => None,
        };
        SeriesSnapshot { id: self.id, page }
    }

    /// Rebuilds a series from a snapshot.
    pub fn restore(snapshot: SeriesSnapshot) -> Self {
        let state = match snapshot.page {
            Some(page) => {
                SeriesState::Loaded(Box::new(LoadedSeries { page, fields: SeriesFields::default() }))
            }
            None => SeriesState::Unloaded,
        };
        Self { id: snapshot.id, state, works_cache: RefCell::new(None) }
    }

    fn loaded(&self) -> Result<&LoadedSeries> {
        match &self.state {
            SeriesState::Loaded(loaded) => Ok(loaded),
            _ => Err(ArchiveError::Unloaded { kind: "series" }),
        }
    }

    /// The series' name.
    pub fn name(&self) -> Result<String> {
        match &self.state {
            SeriesState::Stub { name, .. } => {
                name.clone().ok_or(ArchiveError::Unloaded { kind: "series" })
            }
            SeriesState::Loaded(loaded) => Ok(loaded
                .fields
                .name
                .get_or_init(|| loaded.page.text_of("div.series-show h2.heading").unwrap_or_default())
                .clone()),
            SeriesState::Unloaded => Err(ArchiveError::Unloaded { kind: "series" }),
        }
    }

    /// Usernames of the series' creators.
    pub fn creators(&self) -> Result<Vec<String>> {
        match &self.state {
            SeriesState::Stub { creators, .. } => {
                creators.clone().ok_or(ArchiveError::Unloaded { kind: "series" })
            }
            SeriesState::Loaded(loaded) => Ok(loaded
                .fields
                .creators
                .get_or_init(|| {
                    loaded
                        .page
                        .select_all(r#"dl.series.meta a[rel="author"]"#)
                        .into_iter()
                        .map(element_text)
                        .collect()
                })
                .clone()),
            SeriesState::Unloaded => Err(ArchiveError::Unloaded { kind: "series" }),
        }
    }

    /// Date the series was begun (`YYYY-MM-DD`).
    pub fn series_begun(&self) -> Result<Option<String>> {
        let loaded = self.loaded()?;
        Ok(loaded
            .fields
            .begun
            .get_or_init(|| labeled_value(&loaded.page, "dl.series.meta", "Series Begun:"))
            .clone())
    }

    /// Date the series was last updated.
    pub fn series_updated(&self) -> Result<Option<String>> {
        let loaded = self.loaded()?;
        Ok(loaded
            .fields
            .updated
            .get_or_init(|| labeled_value(&loaded.page, "dl.series.meta", "Series Updated:"))
            .clone())
    }

    /// The series' description, empty when absent.
    pub fn description(&self) -> Result<String> {
        let loaded = self.loaded()?;
        Ok(loaded
            .fields
            .description
            .get_or_init(|| {
                labeled_value(&loaded.page, "dl.series.meta", "Description:").unwrap_or_default()
            })
            .clone())
    }

    /// The series' notes, empty when absent.
    pub fn notes(&self) -> Result<String> {
        let loaded = self.loaded()?;
        Ok(loaded
            .fields
            .notes
            .get_or_init(|| {
                labeled_value(&loaded.page, "dl.series.meta", "Notes:").unwrap_or_default()
            })
            .clone())
    }

    /// Total word count across the series.
    pub fn words(&self) -> Result<u64> {
        let loaded = self.loaded()?;
        Ok(*loaded.fields.words.get_or_init(|| {
            labeled_value(&loaded.page, "dl.series.meta dl.stats", "Words:")
                .and_then(|text| parse_count(&text))
                .unwrap_or(0)
        }))
    }

    /// Number of works in the series.
    pub fn nworks(&self) -> Result<u64> {
        let loaded = self.loaded()?;
        Ok(*loaded.fields.nworks.get_or_init(|| {
            labeled_value(&loaded.page, "dl.series.meta dl.stats", "Works:")
                .and_then(|text| parse_count(&text))
                .unwrap_or(0)
        }))
    }

    /// Number of bookmarks of the series itself.
    pub fn bookmark_count(&self) -> Result<u64> {
        let loaded = self.loaded()?;
        Ok(*loaded.fields.bookmark_count.get_or_init(|| {
            labeled_value(&loaded.page, "dl.series.meta dl.stats", "Bookmarks:")
                .and_then(|text| parse_count(&text))
                .unwrap_or(0)
        }))
    }

    /// Whether the creator marked the series complete.
    pub fn complete(&self) -> Result<bool> {
        let loaded = self.loaded()?;
        Ok(*loaded.fields.complete.get_or_init(|| {
            labeled_value(&loaded.page, "dl.series.meta dl.stats", "Complete:")
                .is_some_and(|text| text == "Yes")
        }))
    }

    /// Whether the loading session is subscribed to this series.
    pub fn is_subscribed(&self) -> Result<bool> {
        let loaded = self.loaded()?;
        Ok(loaded
            .page
            .select_first(
                r#"form[data-create-value="Subscribe"] input[name="commit"][value="Unsubscribe"]"#,
            )
            .is_some())
    }

    pub(crate) fn sub_id(&self) -> Result<Option<u64>> {
        let loaded = self.loaded()?;
        Ok(loaded
            .page
            .attr_of(r#"form[data-create-value="Subscribe"]"#, "action")
            .and_then(|action| blurb::last_segment_id(&action)))
    }

    /// The CSRF token from the series page, if any.
    pub fn authenticity_token(&self) -> Result<Option<String>> {
        Ok(self.loaded()?.page.csrf_token())
    }

    /// The works in this series as stubs, in series order, walking every
    /// listing page. Cached until `refresh = true` or the next reload.
    pub fn work_list(
        &self,
        transport: &Transport,
        session: Option<&Session>,
        refresh: bool,
        mode: FetchMode,
    ) -> Result<Vec<Work>> {
        let loaded = self.loaded()?;
        if !refresh
            && let Some(rows) = self.works_cache.borrow().clone()
        {
            return Ok(rows.into_iter().map(Work::from_row).collect());
        }

        let total = loaded.page.page_count();
        let id = self.id;
        let rows = pagination::walk_pages(total, mode, |page| {
            let url = format!("{BASE_URL}/series/{id}?page={page}");
            let listing = transport.get_page(&url, session)?;
            Ok(blurb::work_rows(&listing))
        })?;
        let rows = pagination::dedup_by_key(rows, |row| row.id);

        self.works_cache.replace(Some(rows.clone()));
        Ok(rows.into_iter().map(Work::from_row).collect())
    }

    /// Subscribes the session's account to this series.
    pub fn subscribe(&self, transport: &Transport, session: &Session) -> Result<()> {
        let token = self.action_token(transport, session)?;
        actions::subscribe(transport, session, "Series", &self.id.to_string(), &token)
    }

    /// Removes the session's subscription to this series.
    pub fn unsubscribe(&self, transport: &Transport, session: &Session) -> Result<()> {
        let sub_id = self.sub_id()?.ok_or_else(|| ArchiveError::MissingCapability {
            what: "no subscription id on the loaded page; reload through the subscribed session"
                .to_string(),
        })?;
        let token = self.action_token(transport, session)?;
        actions::unsubscribe(transport, session, "Series", &self.id.to_string(), sub_id, &token)
    }

    fn action_token(&self, transport: &Transport, session: &Session) -> Result<String> {
        if let SeriesState::Loaded(loaded) = &self.state
            && let Some(token) = loaded.page.csrf_token()
        {
            return Ok(token);
        }
        session.ensure_token(transport)
    }
}

/// Walks dt/dd pairs under `container` and returns the dd following the
/// dt whose text equals `label`.
fn labeled_value(page: &Page, container: &str, label: &str) -> Option<String> {
    let dts = page.select_all(&format!("{container} dt"));
    let dds = page.select_all(&format!("{container} dd"));
    dts.iter()
        .position(|dt| element_text(*dt) == label)
        .and_then(|index| dds.get(index))
        .map(|dd| element_text(*dd))
}

impl PartialEq for Series {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for Series {}

impl Hash for Series {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.id.hash(state);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SERIES_PAGE: &str = r#"<html>
    <head><meta name="csrf-token" content="stok"></head>
    <body>
      <div class="series-show region">
        <h2 class="heading">Night Shifts</h2>
      </div>
      <dl class="series meta group">
        <dt>Creators:</dt><dd><a rel="author" href="/users/alice">alice</a></dd>
        <dt>Series Begun:</dt><dd>2023-11-02</dd>
        <dt>Series Updated:</dt><dd>2024-03-01</dd>
        <dt>Description:</dt><dd><blockquote class="userstuff">Linked one-shots.</blockquote></dd>
        <dt>Stats:</dt>
        <dd>
          <dl class="stats">
            <dt>Words:</dt><dd>45,678</dd>
            <dt>Works:</dt><dd>4</dd>
            <dt>Complete:</dt><dd>No</dd>
            <dt>Bookmarks:</dt><dd>21</dd>
          </dl>
        </dd>
      </dl>
      <form data-create-value="Subscribe" action="/users/bob/subscriptions/999">
        <input name="commit" value="Unsubscribe">
      </form>
    </body></html>"#;

    fn loaded_series() -> Series {
        let mut series = Series::new(42);
        series.state = SeriesState::Loaded(Box::new(LoadedSeries {
            page: Page::parse(SERIES_PAGE),
            fields: SeriesFields::default(),
        }));
        series
    }

    #[test]
    fn test_unloaded_series_errs() {
        let series = Series::new(42);
        assert!(matches!(series.name(), Err(ArchiveError::Unloaded { kind: "series" })));
        assert_eq!(series.url(), "https://archiveofourown.org/series/42");
    }

    #[test]
    fn test_meta_label_walk() {
        let series = loaded_series();
        assert_eq!(series.name().unwrap(), "Night Shifts");
        assert_eq!(series.creators().unwrap(), vec!["alice"]);
        assert_eq!(series.series_begun().unwrap().as_deref(), Some("2023-11-02"));
        assert_eq!(series.series_updated().unwrap().as_deref(), Some("2024-03-01"));
        assert_eq!(series.description().unwrap(), "Linked one-shots.");
        assert_eq!(series.words().unwrap(), 45678);
        assert_eq!(series.nworks().unwrap(), 4);
        assert_eq!(series.bookmark_count().unwrap(), 21);
        assert!(!series.complete().unwrap());
        assert_eq!(series.notes().unwrap(), "");
    }

    #[test]
    fn test_subscription_state() {
        let series = loaded_series();
        assert!(series.is_subscribed().unwrap());
        assert_eq!(series.sub_id().unwrap(), Some(999));
        assert_eq!(series.authenticity_token().unwrap().as_deref(), Some("stok"));
    }

    #[test]
    fn test_stub_knows_name_only() {
        let series = Series::stub(42, "Night Shifts".to_string(), vec!["alice".to_string()]);
        assert_eq!(series.name().unwrap(), "Night Shifts");
        assert_eq!(series.creators().unwrap(), vec!["alice"]);
        assert!(matches!(series.words(), Err(ArchiveError::Unloaded { .. })));
    }

    #[test]
    fn test_snapshot_round_trip() {
        let series = loaded_series();
        let json = serde_json::to_string(&series.snapshot()).unwrap();
        let restored = Series::restore(serde_json::from_str(&json).unwrap());
        assert!(restored.is_loaded());
        assert_eq!(restored.name().unwrap(), "Night Shifts");
        assert_eq!(restored, series);
    }

    #[test]
    fn test_equality_by_id() {
        assert_eq!(Series::new(1), Series::stub(1, "x".into(), Vec::new()));
        assert_ne!(Series::new(1), Series::new(2));
    }
}
