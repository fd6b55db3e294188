//! Chapters, embedded or standalone.
//!
//! A chapter's id is `Option<u64>`: `None` marks the sole chapter of a
//! oneshot, which has no page of its own. Oneshot chapters take their
//! content from the parent work's page and their title from the work
//! title. Chapters built by a full work load arrive already populated;
//! a standalone chapter fetches `/chapters/{id}` itself.

use std::cell::OnceCell;
use std::hash::{Hash, Hasher};

use serde::{Deserialize, Serialize};

use crate::actions::{self, CommentTarget, Commenter};
use crate::blurb;
use crate::comment::{self, Comment};
use crate::page::{Page, element_text};
use crate::session::Session;
use crate::transport::{BASE_URL, Transport};
use crate::{ArchiveError, Result};

/// One chapter of a work.
#[derive(Debug, Clone)]
pub struct Chapter {
    id: Option<u64>,
    work_id: Option<u64>,
    work_title: Option<String>,
    content: Option<ChapterContent>,
}

#[derive(Debug, Clone)]
struct ChapterContent {
    page: Page,
    fields: ChapterFields,
}

#[derive(Debug, Default, Clone)]
struct ChapterFields {
    title: OnceCell<String>,
    number: OnceCell<u64>,
    text: OnceCell<String>,
    words: OnceCell<u64>,
    summary: OnceCell<String>,
    start_notes: OnceCell<String>,
    end_notes: OnceCell<String>,
}

/// Serializable image of a chapter.
#[derive(Debug, Serialize, Deserialize)]
pub struct ChapterSnapshot {
    id: Option<u64>,
    work_id: Option<u64>,
    work_title: Option<String>,
    page: Option<Page>,
}

impl Chapter {
    /// A standalone chapter known only by id.
    pub fn new(id: u64) -> Self {
        Self { id: Some(id), work_id: None, work_title: None, content: None }
    }

    /// The sole chapter of a oneshot; content comes from the work's page.
    pub fn oneshot(work_id: u64) -> Self {
        Self { id: None, work_id: Some(work_id), work_title: None, content: None }
    }

    /// A chapter cut out of a full work load, already populated.
    pub(crate) fn embedded(
        id: Option<u64>,
        work_id: u64,
        work_title: String,
        page: Page,
    ) -> Self {
        Self {
            id,
            work_id: Some(work_id),
            work_title: Some(work_title),
            content: Some(ChapterContent { page, fields: ChapterFields::default() }),
        }
    }

    /// The chapter's id; `None` for the sole chapter of a oneshot.
    pub fn id(&self) -> Option<u64> {
        self.id
    }

    /// The id of the work this chapter belongs to, once known.
    pub fn work_id(&self) -> Option<u64> {
        self.work_id
    }

    /// The chapter's URL, when both ids are known.
    pub fn url(&self) -> Option<String> {
        Some(format!("{BASE_URL}/works/{}/chapters/{}", self.work_id?, self.id?))
    }

    /// Whether content has been attached.
    pub fn is_loaded(&self) -> bool {
        self.content.is_some()
    }

    /// Fetches this chapter's content.
    ///
    /// Standalone chapters fetch their own page; a oneshot chapter goes
    /// through the parent work's page instead. A failed reload leaves the
    /// previous content untouched.
    pub fn reload(&mut self, transport: &Transport, session: Option<&Session>) -> Result<()> {
        match self.id {
            Some(id) => {
                let url = format!("{BASE_URL}/chapters/{id}?view_adult=true");
                let page = transport.get_page(&url, session)?;
                if page.is_not_found() {
                    return Err(ArchiveError::InvalidId { kind: "chapter", id: id.to_string() });
                }
                // The chapter page links back to its work.
                self.work_id = page
                    .attr_of("li.chapter.entire a", "href")
                    .as_deref()
                    .and_then(blurb::work_id_from_href)
                    .or(self.work_id);
                self.work_title = page.text_of("div.preface h2.title").or(self.work_title.take());
                self.content = Some(ChapterContent { page, fields: ChapterFields::default() });
            }
            None => {
                let work_id = self.work_id.ok_or_else(|| ArchiveError::MissingCapability {
                    what: "oneshot chapter has no known parent work".to_string(),
                })?;
                let url = format!("{BASE_URL}/works/{work_id}?view_adult=true&view_full_work=true");
                let page = transport.get_page(&url, session)?;
                if page.is_not_found() {
                    return Err(ArchiveError::InvalidId {
                        kind: "work",
                        id: work_id.to_string(),
                    });
                }
                let region =
                    page.select_first("div#chapters").ok_or_else(|| {
                        ArchiveError::UnexpectedResponse {
                            status: 200,
                            body: "work page carries no chapter content".to_string(),
                        }
                    })?;
                self.work_title = page.text_of("div.preface h2.title").or(self.work_title.take());
                self.content = Some(ChapterContent {
                    page: Page::parse(region.html()),
                    fields: ChapterFields::default(),
                });
            }
        }
        Ok(())
    }

    /// Serializes the chapter's cached content.
    pub fn snapshot(&self) -> ChapterSnapshot {
        ChapterSnapshot {
            id: self.id,
            work_id: self.work_id,
            work_title: self.work_title.clone(),
            page: self.content.as_ref().map(|content| content.page.clone()),
        }
    }

    /// Rebuilds a chapter from a snapshot.
    pub fn restore(snapshot: ChapterSnapshot) -> Self {
        Self {
            id: snapshot.id,
            work_id: snapshot.work_id,
            work_title: snapshot.work_title,
            content: snapshot
                .page
                .map(|page| ChapterContent { page, fields: ChapterFields::default() }),
        }
    }

    fn content(&self) -> Result<&ChapterContent> {
        self.content.as_ref().ok_or(ArchiveError::Unloaded { kind: "chapter" })
    }

    /// The chapter's title; oneshots fall back to the work title, untitled
    /// chapters to their number.
    pub fn title(&self) -> Result<String> {
        if self.id.is_none() {
            if let Some(title) = &self.work_title {
                return Ok(title.clone());
            }
        }
        let content = self.content()?;
        Ok(content
            .fields
            .title
            .get_or_init(|| {
                content
                    .page
                    .select_first("h3.title")
                    .and_then(|el| {
                        // Heading text reads "Chapter N: Title"; the title
                        // is the text after the chapter link, so only the
                        // heading's own text nodes count.
                        let after: String = el
                            .children()
                            .filter_map(|node| node.value().as_text().map(|text| text.to_string()))
                            .collect();
                        let after = after.trim().trim_start_matches(':').trim();
                        (!after.is_empty()).then(|| after.to_string())
                    })
                    .unwrap_or_else(|| self.number().map(|n| n.to_string()).unwrap_or_default())
            })
            .clone())
    }

    /// The chapter's position in the work, starting at 1.
    pub fn number(&self) -> Result<u64> {
        if self.id.is_none() {
            self.content()?;
            return Ok(1);
        }
        let content = self.content()?;
        Ok(*content.fields.number.get_or_init(|| {
            content
                .page
                .attr_of(r#"div[id^="chapter-"]"#, "id")
                .and_then(|id| id.rsplit('-').next()?.parse().ok())
                .unwrap_or(1)
        }))
    }

    /// The chapter's text, one line per paragraph.
    pub fn text(&self) -> Result<String> {
        let content = self.content()?;
        Ok(content
            .fields
            .text
            .get_or_init(|| {
                let mut paragraphs = content.page.select_all(r#"div[role="article"] p"#);
                if paragraphs.is_empty() {
                    paragraphs = content.page.select_all("div.userstuff p");
                }
                let mut text = String::new();
                for p in paragraphs {
                    text.push_str(&element_text(p));
                    text.push('\n');
                }
                text
            })
            .clone())
    }

    /// Word count of the chapter text.
    pub fn words(&self) -> Result<u64> {
        let content = self.content()?;
        let text = self.text()?;
        Ok(*content
            .fields
            .words
            .get_or_init(|| text.split_whitespace().count() as u64))
    }

    /// The chapter's summary.
    pub fn summary(&self) -> Result<String> {
        self.note_block(|f| &f.summary, "div#summary p".to_string())
    }

    /// Notes before the chapter.
    pub fn start_notes(&self) -> Result<String> {
        self.note_block(|f| &f.start_notes, "div#notes p".to_string())
    }

    /// Notes after the chapter.
    pub fn end_notes(&self) -> Result<String> {
        let number = self.number()?;
        self.note_block(|f| &f.end_notes, format!("div#chapter_{number}_endnotes p"))
    }

    fn note_block(
        &self,
        slot: impl Fn(&ChapterFields) -> &OnceCell<String>,
        selector: String,
    ) -> Result<String> {
        let content = self.content()?;
        Ok(slot(&content.fields)
            .get_or_init(|| {
                let mut text = String::new();
                for p in content.page.select_all(&selector) {
                    text.push_str(&element_text(p));
                    text.push('\n');
                }
                text
            })
            .clone())
    }

    /// Walks this chapter's comment listing into comment stubs.
    pub fn get_comments(
        &self,
        transport: &Transport,
        session: Option<&Session>,
        maximum: Option<usize>,
    ) -> Result<Vec<Comment>> {
        let target = self.comment_target()?;
        let template = match target {
            CommentTarget::Work(work_id) => format!(
                "{BASE_URL}/works/{work_id}?page={{}}&show_comments=true&view_adult=true&view_full_work=true"
            ),
            CommentTarget::Chapter(id) => {
                format!("{BASE_URL}/chapters/{id}?page={{}}&show_comments=true&view_adult=true")
            }
        };
        comment::listing(transport, session, target, &template, maximum)
    }

    /// Comments on this chapter as the session's account. Oneshot chapters
    /// post on the work instead.
    pub fn comment(&self, transport: &Transport, session: &Session, text: &str) -> Result<()> {
        let target = self.comment_target()?;
        let token = self.action_token(transport, session)?;
        actions::post_comment(transport, session, target, text, None, Commenter::Account, &token)
    }

    /// Comments on this chapter as a guest.
    pub fn comment_as_guest(
        &self,
        transport: &Transport,
        session: &Session,
        text: &str,
        name: &str,
        email: &str,
    ) -> Result<()> {
        let target = self.comment_target()?;
        let token = self.action_token(transport, session)?;
        actions::post_comment(
            transport,
            session,
            target,
            text,
            None,
            Commenter::Guest { name: name.to_string(), email: email.to_string() },
            &token,
        )
    }

    fn comment_target(&self) -> Result<CommentTarget> {
        match (self.id, self.work_id) {
            (Some(id), _) => Ok(CommentTarget::Chapter(id)),
            (None, Some(work_id)) => Ok(CommentTarget::Work(work_id)),
            (None, None) => Err(ArchiveError::MissingCapability {
                what: "oneshot chapter has no known parent work".to_string(),
            }),
        }
    }

    fn action_token(&self, transport: &Transport, session: &Session) -> Result<String> {
        if let Some(content) = &self.content
            && let Some(token) = content.page.csrf_token()
        {
            return Ok(token);
        }
        session.ensure_token(transport)
    }
}

impl PartialEq for Chapter {
    fn eq(&self, other: &Self) -> bool {
        match (self.id, other.id) {
            // Oneshot chapters are identified by their work.
            (None, None) => self.work_id == other.work_id,
            (a, b) => a == b,
        }
    }
}

impl Eq for Chapter {}

impl Hash for Chapter {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.id.hash(state);
        if self.id.is_none() {
            self.work_id.hash(state);
        }
    }
}
