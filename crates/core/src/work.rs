//! Works: the archive's central entity.
//!
//! A [`Work`] starts as a bare id and stays cheap until [`Work::reload`]
//! fetches its canonical page. Metadata-only loads fetch the first-chapter
//! view; full loads fetch the entire work in one page and inline its
//! chapters. Derived fields are parsed lazily out of the retained page and
//! memoized until the next reload, which starts from a fresh set of slots.
//!
//! Listing pages produce work stubs instead: partial projections whose
//! known fields answer normally and whose missing fields report
//! [`ArchiveError::Unloaded`].

use std::cell::OnceCell;
use std::hash::{Hash, Hasher};

use serde::{Deserialize, Serialize};

use crate::actions::{self, BookmarkOptions, CommentTarget, Commenter};
use crate::blurb::{self, WorkRow};
use crate::chapter::Chapter;
use crate::comment::{self, Comment};
use crate::page::{Page, element_text, parse_count};
use crate::series::Series;
use crate::session::Session;
use crate::transport::{BASE_URL, Transport};
use crate::user::User;
use crate::{ArchiveError, Result};

/// A work on the archive, identified by its numeric id.
#[derive(Debug, Clone)]
pub struct Work {
    id: u64,
    state: WorkState,
}

#[derive(Debug, Clone)]
enum WorkState {
    Unloaded,
    Stub(WorkStub),
    Loaded(Box<LoadedWork>),
}

/// Fields a listing row can populate.
#[derive(Debug, Default, Clone)]
struct WorkStub {
    title: Option<String>,
    authors: Option<Vec<String>>,
    fandoms: Option<Vec<String>>,
    summary: Option<String>,
    words: Option<u64>,
}

#[derive(Debug, Clone)]
struct LoadedWork {
    page: Page,
    full: bool,
    chapters: Option<Vec<Chapter>>,
    fields: WorkFields,
}

/// Per-load memoization slots; a reload replaces the whole set.
#[derive(Debug, Default, Clone)]
struct WorkFields {
    title: OnceCell<String>,
    summary: OnceCell<String>,
    language: OnceCell<String>,
    authors: OnceCell<Vec<String>>,
    series: OnceCell<Vec<(u64, String)>>,
    nchapters: OnceCell<u64>,
    expected_chapters: OnceCell<Option<u64>>,
    words: OnceCell<u64>,
    hits: OnceCell<u64>,
    kudos: OnceCell<u64>,
    comment_count: OnceCell<u64>,
    bookmark_count: OnceCell<u64>,
    restricted: OnceCell<bool>,
    complete: OnceCell<bool>,
    date_published: OnceCell<Option<String>>,
    date_updated: OnceCell<Option<String>>,
    tags: OnceCell<Vec<String>>,
    characters: OnceCell<Vec<String>>,
    relationships: OnceCell<Vec<String>>,
    fandoms: OnceCell<Vec<String>>,
    categories: OnceCell<Vec<String>>,
    warnings: OnceCell<Vec<String>>,
    ratings: OnceCell<Vec<String>>,
    start_notes: OnceCell<String>,
    end_notes: OnceCell<String>,
}

/// Serializable image of a work: its id plus the raw cached page.
#[derive(Debug, Serialize, Deserialize)]
pub struct WorkSnapshot {
    id: u64,
    full: bool,
    page: Option<Page>,
}

impl Work {
    /// A work known only by id; every derived field reports `Unloaded`
    /// until the first [`reload`](Self::reload).
    pub fn new(id: u64) -> Self {
        Self { id, state: WorkState::Unloaded }
    }

    /// Extracts the work id from an archive URL, if it names one.
    pub fn id_from_url(url: &str) -> Option<u64> {
        blurb::work_id_from_href(url)
    }

    pub(crate) fn from_row(row: WorkRow) -> Self {
        Self {
            id: row.id,
            state: WorkState::Stub(WorkStub {
                title: Some(row.title),
                authors: Some(row.authors),
                fandoms: Some(row.fandoms),
                summary: row.summary,
                words: row.words,
            }),
        }
    }

    pub(crate) fn subscription_stub(id: u64, title: String, authors: Vec<String>) -> Self {
        Self {
            id,
            state: WorkState::Stub(WorkStub {
                title: Some(title),
                authors: Some(authors),
                ..WorkStub::default()
            }),
        }
    }

    /// The work's id.
    pub fn id(&self) -> u64 {
        self.id
    }

    /// The work's canonical URL.
    pub fn url(&self) -> String {
        format!("{BASE_URL}/works/{}", self.id)
    }

    /// Whether a reload (or snapshot restore) has completed.
    pub fn is_loaded(&self) -> bool {
        matches!(self.state, WorkState::Loaded(_))
    }

    /// Whether the entire work, chapters included, has been loaded.
    pub fn is_fully_loaded(&self) -> bool {
        matches!(&self.state, WorkState::Loaded(loaded) if loaded.full)
    }

    /// Fetches the work's page and replaces this work's state with it.
    ///
    /// With `metadata_only` the first-chapter view is fetched, which covers
    /// every derived field but not the chapter contents; otherwise the full
    /// work is fetched and its chapters inlined. A failed reload leaves the
    /// previous state untouched.
    pub fn reload(
        &mut self,
        transport: &Transport,
        session: Option<&Session>,
        metadata_only: bool,
    ) -> Result<()> {
        let url = format!(
            "{BASE_URL}/works/{}?view_adult=true&view_full_work={}",
            self.id,
            if metadata_only { "false" } else { "true" }
        );
        let page = transport.get_page(&url, session)?;
        if page.is_not_found() {
            return Err(ArchiveError::InvalidId { kind: "work", id: self.id.to_string() });
        }

        let mut loaded = LoadedWork {
            page,
            full: !metadata_only,
            chapters: None,
            fields: WorkFields::default(),
        };
        if !metadata_only {
            loaded.chapters = Some(build_chapters(self.id, &loaded)?);
        }
        self.state = WorkState::Loaded(Box::new(loaded));
        tracing::debug!(work = self.id, full = !metadata_only, "work loaded");
        Ok(())
    }

    /// Serializes the work's current page cache.
    pub fn snapshot(&self) -> WorkSnapshot {
        match &self.state {
            WorkState::Loaded(loaded) => WorkSnapshot {
                id: self.id,
                full: loaded.full,
                page: Some(loaded.page.clone()),
            },
            _ => WorkSnapshot { id: self.id, full: false, page: None },
        }
    }

    /// Rebuilds a work from a snapshot; equivalent to a fresh reload of the
    /// same page.
    pub fn restore(snapshot: WorkSnapshot) -> Result<Self> {
        let mut work = Self::new(snapshot.id);
        if let Some(page) = snapshot.page {
            let mut loaded = LoadedWork {
                page,
                full: snapshot.full,
                chapters: None,
                fields: WorkFields::default(),
            };
            if snapshot.full {
                loaded.chapters = Some(build_chapters(work.id, &loaded)?);
            }
            work.state = WorkState::Loaded(Box::new(loaded));
        }
        Ok(work)
    }

    fn loaded(&self) -> Result<&LoadedWork> {
        match &self.state {
            WorkState::Loaded(loaded) => Ok(loaded),
            _ => Err(ArchiveError::Unloaded { kind: "work" }),
        }
    }

    fn unloaded(&self) -> ArchiveError {
        ArchiveError::Unloaded { kind: "work" }
    }

    /// The work's title.
    pub fn title(&self) -> Result<String> {
        match &self.state {
            WorkState::Stub(stub) => stub.title.clone().ok_or_else(|| self.unloaded()),
            WorkState::Loaded(loaded) => Ok(loaded
                .fields
                .title
                .get_or_init(|| loaded.page.text_of("div.preface h2.title").unwrap_or_default())
                .clone()),
            WorkState::Unloaded => Err(self.unloaded()),
        }
    }

    /// The work's summary text.
    pub fn summary(&self) -> Result<String> {
        match &self.state {
            WorkState::Stub(stub) => stub.summary.clone().ok_or_else(|| self.unloaded()),
            WorkState::Loaded(loaded) => Ok(loaded
                .fields
                .summary
                .get_or_init(|| {
                    loaded.page.text_of("div.preface blockquote.userstuff").unwrap_or_default()
                })
                .clone()),
            WorkState::Unloaded => Err(self.unloaded()),
        }
    }

    /// The authors, as unloaded user projections.
    pub fn authors(&self) -> Result<Vec<User>> {
        let usernames = match &self.state {
            WorkState::Stub(stub) => stub.authors.clone().ok_or_else(|| self.unloaded())?,
            WorkState::Loaded(loaded) => loaded
                .fields
                .authors
                .get_or_init(|| {
                    loaded
                        .page
                        .select_all("h3.byline a")
                        .into_iter()
                        .map(element_text)
                        .collect()
                })
                .clone(),
            WorkState::Unloaded => return Err(self.unloaded()),
        };
        Ok(usernames.into_iter().map(User::new).collect())
    }

    /// The fandoms this work is tagged with.
    pub fn fandoms(&self) -> Result<Vec<String>> {
        if let WorkState::Stub(stub) = &self.state {
            return stub.fandoms.clone().ok_or_else(|| self.unloaded());
        }
        self.tag_list(|f| &f.fandoms, "dd.fandom.tags li a")
    }

    /// Total word count.
    pub fn words(&self) -> Result<u64> {
        if let WorkState::Stub(stub) = &self.state {
            return stub.words.ok_or_else(|| self.unloaded());
        }
        let loaded = self.loaded()?;
        Ok(*loaded.fields.words.get_or_init(|| stat(&loaded.page, "words").unwrap_or(0)))
    }

    /// Number of published chapters.
    pub fn nchapters(&self) -> Result<u64> {
        let loaded = self.loaded()?;
        Ok(*loaded.fields.nchapters.get_or_init(|| {
            loaded
                .page
                .text_of("dd.chapters")
                .and_then(|text| parse_count(text.split('/').next().unwrap_or_default()))
                .unwrap_or(0)
        }))
    }

    /// Number of planned chapters; `None` when the author left it open.
    pub fn expected_chapters(&self) -> Result<Option<u64>> {
        let loaded = self.loaded()?;
        Ok(*loaded.fields.expected_chapters.get_or_init(|| {
            loaded
                .page
                .text_of("dd.chapters")
                .and_then(|text| parse_count(text.split('/').next_back().unwrap_or_default()))
        }))
    }

    /// Whether the published chapter count matches the planned one.
    pub fn complete(&self) -> Result<bool> {
        let loaded = self.loaded()?;
        Ok(*loaded.fields.complete.get_or_init(|| {
            loaded
                .page
                .text_of("dd.chapters")
                .map(|text| {
                    let mut parts = text.split('/');
                    parts.next() == parts.next()
                })
                .unwrap_or(false)
        }))
    }

    /// `"Completed"` or `"Work in Progress"`.
    pub fn status(&self) -> Result<&'static str> {
        Ok(if self.complete()? { "Completed" } else { "Work in Progress" })
    }

    /// Whether this work has a single chapter.
    pub fn oneshot(&self) -> Result<bool> {
        Ok(self.nchapters()? == 1)
    }

    /// Hit count.
    pub fn hits(&self) -> Result<u64> {
        let loaded = self.loaded()?;
        Ok(*loaded.fields.hits.get_or_init(|| stat(&loaded.page, "hits").unwrap_or(0)))
    }

    /// Kudos count.
    pub fn kudos(&self) -> Result<u64> {
        let loaded = self.loaded()?;
        Ok(*loaded.fields.kudos.get_or_init(|| stat(&loaded.page, "kudos").unwrap_or(0)))
    }

    /// Comment count.
    pub fn comment_count(&self) -> Result<u64> {
        let loaded = self.loaded()?;
        Ok(*loaded
            .fields
            .comment_count
            .get_or_init(|| stat(&loaded.page, "comments").unwrap_or(0)))
    }

    /// Bookmark count.
    pub fn bookmark_count(&self) -> Result<u64> {
        let loaded = self.loaded()?;
        Ok(*loaded
            .fields
            .bookmark_count
            .get_or_init(|| stat(&loaded.page, "bookmarks").unwrap_or(0)))
    }

    /// Whether the work is restricted to logged-in users.
    pub fn restricted(&self) -> Result<bool> {
        let loaded = self.loaded()?;
        Ok(*loaded
            .fields
            .restricted
            .get_or_init(|| loaded.page.select_first(r#"img[title="Restricted"]"#).is_some()))
    }

    /// The work's language.
    pub fn language(&self) -> Result<String> {
        let loaded = self.loaded()?;
        Ok(loaded
            .fields
            .language
            .get_or_init(|| loaded.page.text_of("dd.language").unwrap_or_default())
            .clone())
    }

    /// Publication date as printed on the page (`YYYY-MM-DD`).
    pub fn date_published(&self) -> Result<Option<String>> {
        let loaded = self.loaded()?;
        Ok(loaded
            .fields
            .date_published
            .get_or_init(|| loaded.page.text_of("dd.published"))
            .clone())
    }

    /// Last update date; falls back to the publication date.
    pub fn date_updated(&self) -> Result<Option<String>> {
        let loaded = self.loaded()?;
        Ok(loaded
            .fields
            .date_updated
            .get_or_init(|| {
                loaded.page.text_of("dd.status").or_else(|| loaded.page.text_of("dd.published"))
            })
            .clone())
    }

    /// Freeform ("additional") tags.
    pub fn tags(&self) -> Result<Vec<String>> {
        self.tag_list(|f| &f.tags, "dd.freeform.tags li a")
    }

    /// Character tags.
    pub fn characters(&self) -> Result<Vec<String>> {
        self.tag_list(|f| &f.characters, "dd.character.tags li a")
    }

    /// Relationship tags.
    pub fn relationships(&self) -> Result<Vec<String>> {
        self.tag_list(|f| &f.relationships, "dd.relationship.tags li a")
    }

    /// Category tags.
    pub fn categories(&self) -> Result<Vec<String>> {
        self.tag_list(|f| &f.categories, "dd.category.tags li a")
    }

    /// Archive warning tags.
    pub fn warnings(&self) -> Result<Vec<String>> {
        self.tag_list(|f| &f.warnings, "dd.warning.tags li a")
    }

    /// Rating tags.
    pub fn ratings(&self) -> Result<Vec<String>> {
        self.tag_list(|f| &f.ratings, "dd.rating.tags li a")
    }

    fn tag_list(
        &self,
        slot: impl Fn(&WorkFields) -> &OnceCell<Vec<String>>,
        selector: &str,
    ) -> Result<Vec<String>> {
        let loaded = self.loaded()?;
        Ok(slot(&loaded.fields)
            .get_or_init(|| loaded.page.select_all(selector).into_iter().map(element_text).collect())
            .clone())
    }

    /// The series this work belongs to, as partial projections.
    pub fn series(&self) -> Result<Vec<Series>> {
        let loaded = self.loaded()?;
        let pairs = loaded.fields.series.get_or_init(|| {
            loaded
                .page
                .select_all("dd.series span.position a")
                .into_iter()
                .filter_map(|a| {
                    let id = blurb::last_segment_id(a.value().attr("href")?)?;
                    Some((id, element_text(a)))
                })
                .collect()
        });
        Ok(pairs
            .iter()
            .map(|(id, name)| Series::stub(*id, name.clone(), Vec::new()))
            .collect())
    }

    /// Notes the author placed before the work.
    pub fn start_notes(&self) -> Result<String> {
        let loaded = self.loaded()?;
        Ok(loaded
            .fields
            .start_notes
            .get_or_init(|| paragraphs(&loaded.page, "div.notes.module p"))
            .clone())
    }

    /// Notes the author placed after the work.
    pub fn end_notes(&self) -> Result<String> {
        let loaded = self.loaded()?;
        Ok(loaded
            .fields
            .end_notes
            .get_or_init(|| paragraphs(&loaded.page, "div#work_endnotes p"))
            .clone())
    }

    /// The CSRF token rendered into the work's page, if any.
    pub fn authenticity_token(&self) -> Result<Option<String>> {
        Ok(self.loaded()?.page.csrf_token())
    }

    /// Whether the loading session is subscribed to this work. Only
    /// meaningful when the page was fetched through a logged-in session.
    pub fn is_subscribed(&self) -> Result<bool> {
        let loaded = self.loaded()?;
        Ok(loaded
            .page
            .select_first(r#"li.subscribe input[name="commit"][value="Unsubscribe"]"#)
            .is_some())
    }

    /// The subscription id of the loading session's subscription, parsed
    /// from the unsubscribe form.
    pub(crate) fn sub_id(&self) -> Result<Option<u64>> {
        let loaded = self.loaded()?;
        Ok(loaded
            .page
            .attr_of("li.subscribe form", "action")
            .and_then(|action| blurb::last_segment_id(&action)))
    }

    /// The inlined chapters; requires a full (not metadata-only) load.
    pub fn chapters(&self) -> Result<&[Chapter]> {
        match self.loaded()?.chapters.as_deref() {
            Some(chapters) => Ok(chapters),
            None => Err(self.unloaded()),
        }
    }

    /// The work's complete text, chapters concatenated in order.
    pub fn text(&self) -> Result<String> {
        let mut text = String::new();
        for chapter in self.chapters()? {
            text.push_str(&chapter.text()?);
            text.push('\n');
        }
        Ok(text)
    }

    /// A JSON view of every derived field currently available, in the shape
    /// of a search-result entry.
    pub fn metadata(&self) -> Result<serde_json::Value> {
        self.loaded()?;
        let mut map = serde_json::Map::new();
        map.insert("id".into(), self.id.into());

        macro_rules! put {
            ($key:literal, $value:expr) => {
                if let Ok(value) = $value {
                    map.insert($key.into(), serde_json::json!(value));
                }
            };
        }
        put!("title", self.title());
        put!("summary", self.summary());
        put!("language", self.language());
        put!("words", self.words());
        put!("nchapters", self.nchapters());
        put!("expected_chapters", self.expected_chapters());
        put!("complete", self.complete());
        put!("status", self.status());
        put!("restricted", self.restricted());
        put!("hits", self.hits());
        put!("kudos", self.kudos());
        put!("comments", self.comment_count());
        put!("bookmarks", self.bookmark_count());
        put!("date_published", self.date_published());
        put!("date_updated", self.date_updated());
        put!("tags", self.tags());
        put!("characters", self.characters());
        put!("relationships", self.relationships());
        put!("fandoms", self.fandoms());
        put!("categories", self.categories());
        put!("warnings", self.warnings());
        put!("ratings", self.ratings());
        if let Ok(authors) = self.authors() {
            let names: Vec<String> = authors.iter().map(|a| a.username().to_string()).collect();
            map.insert("authors".into(), serde_json::json!(names));
        }
        if let Ok(series) = self.series() {
            let names: Result<Vec<String>> = series.iter().map(Series::name).collect();
            if let Ok(names) = names {
                map.insert("series".into(), serde_json::json!(names));
            }
        }
        if let Ok(chapters) = self.chapters() {
            let titles: Vec<String> =
                chapters.iter().filter_map(|c| c.title().ok()).collect();
            map.insert("chapter_titles".into(), serde_json::json!(titles));
        }
        Ok(serde_json::Value::Object(map))
    }

    /// Walks the work's comment listing into comment stubs, at most
    /// `maximum` of them when set.
    pub fn get_comments(
        &self,
        transport: &Transport,
        session: Option<&Session>,
        maximum: Option<usize>,
    ) -> Result<Vec<Comment>> {
        self.loaded()?;
        comment::listing(
            transport,
            session,
            CommentTarget::Work(self.id),
            &format!(
                "{BASE_URL}/works/{}?page={{}}&show_comments=true&view_adult=true&view_full_work=true",
                self.id
            ),
            maximum,
        )
    }

    /// Leaves kudos. `Ok(false)` means kudos was already left here.
    pub fn leave_kudos(&self, transport: &Transport, session: &Session) -> Result<bool> {
        let token = self.action_token(transport, session)?;
        actions::kudos(transport, session, self.id, &token)
    }

    /// Comments on the work as the session's account.
    pub fn comment(&self, transport: &Transport, session: &Session, text: &str) -> Result<()> {
        let token = self.action_token(transport, session)?;
        actions::post_comment(
            transport,
            session,
            CommentTarget::Work(self.id),
            text,
            None,
            Commenter::Account,
            &token,
        )
    }

    /// Comments on the work as a guest; the archive requires a name and an
    /// email address.
    pub fn comment_as_guest(
        &self,
        transport: &Transport,
        session: &Session,
        text: &str,
        name: &str,
        email: &str,
    ) -> Result<()> {
        let token = self.action_token(transport, session)?;
        actions::post_comment(
            transport,
            session,
            CommentTarget::Work(self.id),
            text,
            None,
            Commenter::Guest { name: name.to_string(), email: email.to_string() },
            &token,
        )
    }

    /// Subscribes the session's account to this work.
    pub fn subscribe(&self, transport: &Transport, session: &Session) -> Result<()> {
        let token = self.action_token(transport, session)?;
        actions::subscribe(transport, session, "Work", &self.id.to_string(), &token)
    }

    /// Removes the session's subscription; the work must have been loaded
    /// through that session so the subscription id is known.
    pub fn unsubscribe(&self, transport: &Transport, session: &Session) -> Result<()> {
        let sub_id = self.sub_id()?.ok_or_else(|| ArchiveError::MissingCapability {
            what: "no subscription id on the loaded page; reload through the subscribed session"
                .to_string(),
        })?;
        let token = self.action_token(transport, session)?;
        actions::unsubscribe(transport, session, "Work", &self.id.to_string(), sub_id, &token)
    }

    /// Bookmarks this work.
    pub fn bookmark(
        &self,
        transport: &Transport,
        session: &Session,
        options: &BookmarkOptions,
    ) -> Result<()> {
        let token = self.action_token(transport, session)?;
        actions::bookmark(transport, session, self.id, options, &token)
    }

    /// Deletes the session's bookmark of this work; the bookmark id is read
    /// off the loaded page's bookmark form.
    pub fn delete_bookmark(&self, transport: &Transport, session: &Session) -> Result<()> {
        let bookmark_id = self.bookmark_id()?.ok_or_else(|| ArchiveError::MissingCapability {
            what: "no bookmark on the loaded page".to_string(),
        })?;
        let token = self.action_token(transport, session)?;
        actions::delete_bookmark(transport, session, bookmark_id, &token)
    }

    /// The session's bookmark id for this work, from the bookmark form's
    /// action when the form edits an existing bookmark.
    pub(crate) fn bookmark_id(&self) -> Result<Option<u64>> {
        let loaded = self.loaded()?;
        Ok(loaded
            .page
            .attr_of("div#bookmark-form form", "action")
            .filter(|action| action.starts_with("/bookmarks/"))
            .and_then(|action| blurb::last_segment_id(&action)))
    }

    /// The work page's token when loaded, the session's otherwise.
    fn action_token(&self, transport: &Transport, session: &Session) -> Result<String> {
        if let Ok(Some(token)) = self.authenticity_token() {
            return Ok(token);
        }
        session.ensure_token(transport)
    }
}

impl PartialEq for Work {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for Work {}

impl Hash for Work {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.id.hash(state);
    }
}

/// `dd.<class>` stat entry of the work's stats block.
fn stat(page: &Page, class: &str) -> Option<u64> {
    page.text_of(&format!("dd.{class}")).and_then(|text| parse_count(&text))
}

/// Joined paragraph text under a selector, one line per paragraph.
fn paragraphs(page: &Page, selector: &str) -> String {
    let mut text = String::new();
    for p in page.select_all(selector) {
        text.push_str(element_text(p).as_str());
        text.push('\n');
    }
    text
}

/// Builds chapter entities out of the full-work page's `#chapters` region.
fn build_chapters(work_id: u64, loaded: &LoadedWork) -> Result<Vec<Chapter>> {
    let Some(region) = loaded.page.select_first("div#chapters") else {
        return Ok(Vec::new());
    };
    let title = loaded.page.text_of("div.preface h2.title").unwrap_or_default();
    let chapter_divs = loaded.page.select_all(r#"div.chapter[id^="chapter-"]"#);
    if chapter_divs.is_empty() {
        // Single-chapter works render the text directly under #chapters.
        return Ok(vec![Chapter::embedded(None, work_id, title, Page::parse(region.html()))]);
    }

    let mut chapters = Vec::new();
    for div in chapter_divs {
        let Some(id) = chapter_id_of(div) else { continue };
        chapters.push(Chapter::embedded(Some(id), work_id, title.clone(), Page::parse(div.html())));
    }
    Ok(chapters)
}

fn chapter_id_of(div: scraper::ElementRef<'_>) -> Option<u64> {
    let sel = scraper::Selector::parse("h3.title a").ok()?;
    let a = div.select(&sel).next()?;
    blurb::last_segment_id(a.value().attr("href")?)
}

#[cfg(test)]
mod tests {
    use super::*;

    const WORK_PAGE: &str = r#"<html>
    <head><meta name="csrf-token" content="tok123"></head>
    <body>
      <div class="preface group">
        <h2 class="title heading">The Long Watch</h2>
        <h3 class="byline heading"><a rel="author" href="/users/alice">alice</a></h3>
        <blockquote class="userstuff"><p>A summary of sorts.</p></blockquote>
      </div>
      <dl class="work meta group">
        <dd class="rating tags"><ul><li><a>Teen And Up Audiences</a></li></ul></dd>
        <dd class="warning tags"><ul><li><a>No Archive Warnings Apply</a></li></ul></dd>
        <dd class="category tags"><ul><li><a>Gen</a></li></ul></dd>
        <dd class="fandom tags"><ul><li><a>Fandom One</a></li></ul></dd>
        <dd class="relationship tags"><ul><li><a>A &amp; B</a></li></ul></dd>
        <dd class="character tags"><ul><li><a>Alice</a></li><li><a>Bob</a></li></ul></dd>
        <dd class="freeform tags"><ul><li><a>Slow Burn</a></li></ul></dd>
        <dd class="language">English</dd>
        <dd class="series"><span class="position">Part 2 of <a href="/series/42">Night Shifts</a></span></dd>
        <dl class="stats">
          <dd class="published">2024-01-15</dd>
          <dd class="status">2024-03-01</dd>
          <dd class="words">12,345</dd>
          <dd class="chapters">3/5</dd>
          <dd class="comments">12</dd>
          <dd class="kudos">345</dd>
          <dd class="bookmarks">67</dd>
          <dd class="hits">8,910</dd>
        </dl>
      </dl>
      <div id="chapters">
        <div id="chapter-1" class="chapter">
          <div class="chapter preface group"><h3 class="title">
            <a href="/works/777/chapters/1001">Chapter 1</a>: First Light
          </h3></div>
          <div class="userstuff module" role="article"><p>Opening words.</p></div>
        </div>
        <div id="chapter-2" class="chapter">
          <div class="chapter preface group"><h3 class="title">
            <a href="/works/777/chapters/1002">Chapter 2</a>: Second Watch
          </h3></div>
          <div class="userstuff module" role="article"><p>More words here.</p></div>
        </div>
      </div>
    </body></html>"#;

    fn loaded_work(full: bool) -> Work {
        let mut work = Work::new(777);
        let mut loaded = LoadedWork {
            page: Page::parse(WORK_PAGE),
            full,
            chapters: None,
            fields: WorkFields::default(),
        };
        if full {
            loaded.chapters = Some(build_chapters(777, &loaded).unwrap());
        }
        work.state = WorkState::Loaded(Box::new(loaded));
        work
    }

    #[test]
    fn test_unloaded_fields_err() {
        let work = Work::new(1);
        assert!(matches!(work.title(), Err(ArchiveError::Unloaded { kind: "work" })));
        assert!(matches!(work.words(), Err(ArchiveError::Unloaded { .. })));
        assert!(!work.is_loaded());
    }

    #[test]
    fn test_derived_fields_parse() {
        let work = loaded_work(false);
        assert_eq!(work.title().unwrap(), "The Long Watch");
        assert_eq!(work.summary().unwrap(), "A summary of sorts.");
        assert_eq!(work.language().unwrap(), "English");
        assert_eq!(work.words().unwrap(), 12345);
        assert_eq!(work.nchapters().unwrap(), 3);
        assert_eq!(work.expected_chapters().unwrap(), Some(5));
        assert!(!work.complete().unwrap());
        assert_eq!(work.status().unwrap(), "Work in Progress");
        assert_eq!(work.hits().unwrap(), 8910);
        assert_eq!(work.kudos().unwrap(), 345);
        assert_eq!(work.comment_count().unwrap(), 12);
        assert_eq!(work.bookmark_count().unwrap(), 67);
        assert!(!work.restricted().unwrap());
        assert_eq!(work.date_published().unwrap().as_deref(), Some("2024-01-15"));
        assert_eq!(work.date_updated().unwrap().as_deref(), Some("2024-03-01"));
        assert_eq!(work.characters().unwrap(), vec!["Alice", "Bob"]);
        assert_eq!(work.tags().unwrap(), vec!["Slow Burn"]);
        assert_eq!(work.fandoms().unwrap(), vec!["Fandom One"]);
        assert_eq!(work.authenticity_token().unwrap().as_deref(), Some("tok123"));
    }

    #[test]
    fn test_authors_and_series_are_projections() {
        let work = loaded_work(false);
        let authors = work.authors().unwrap();
        assert_eq!(authors.len(), 1);
        assert_eq!(authors[0].username(), "alice");

        let series = work.series().unwrap();
        assert_eq!(series.len(), 1);
        assert_eq!(series[0].id(), 42);
        assert_eq!(series[0].name().unwrap(), "Night Shifts");
    }

    #[test]
    fn test_chapters_need_full_load() {
        let metadata_only = loaded_work(false);
        assert!(matches!(metadata_only.chapters(), Err(ArchiveError::Unloaded { .. })));

        let full = loaded_work(true);
        let chapters = full.chapters().unwrap();
        assert_eq!(chapters.len(), 2);
        assert_eq!(chapters[0].id(), Some(1001));
        assert_eq!(chapters[1].id(), Some(1002));
        assert!(full.text().unwrap().contains("Opening words."));
    }

    #[test]
    fn test_stub_answers_known_fields_only() {
        let work = Work::from_row(WorkRow {
            id: 9,
            title: "Stubbed".to_string(),
            authors: vec!["zed".to_string()],
            fandoms: vec!["F".to_string()],
            summary: None,
            words: Some(10),
        });
        assert_eq!(work.title().unwrap(), "Stubbed");
        assert_eq!(work.words().unwrap(), 10);
        assert!(matches!(work.summary(), Err(ArchiveError::Unloaded { .. })));
        assert!(matches!(work.kudos(), Err(ArchiveError::Unloaded { .. })));
        assert!(!work.is_loaded());
    }

    #[test]
    fn test_equality_is_by_id() {
        let mut a = Work::new(5);
        let b = Work::new(5);
        assert_eq!(a, b);
        a.state = WorkState::Stub(WorkStub::default());
        assert_eq!(a, b);
        assert_ne!(Work::new(5), Work::new(6));
    }

    #[test]
    fn test_snapshot_restores_to_loaded() {
        let work = loaded_work(true);
        let json = serde_json::to_string(&work.snapshot()).unwrap();
        let snapshot: WorkSnapshot = serde_json::from_str(&json).unwrap();
        let restored = Work::restore(snapshot).unwrap();
        assert!(restored.is_fully_loaded());
        assert_eq!(restored.title().unwrap(), work.title().unwrap());
        assert_eq!(restored.chapters().unwrap().len(), 2);
    }

    #[test]
    fn test_metadata_reports_available_fields() {
        let work = loaded_work(false);
        let metadata = work.metadata().unwrap();
        assert_eq!(metadata["id"], 777);
        assert_eq!(metadata["title"], "The Long Watch");
        assert_eq!(metadata["authors"][0], "alice");
        assert_eq!(metadata["series"][0], "Night Shifts");
        assert!(metadata.get("chapter_titles").is_none());
    }

    #[test]
    fn test_id_from_url() {
        assert_eq!(Work::id_from_url("https://archiveofourown.org/works/123"), Some(123));
        assert_eq!(Work::id_from_url("/users/someone"), None);
    }
}
