//! Comments and reply threads.
//!
//! Comment listings yield stubs carrying the text and author visible in
//! the listing; a standalone reload fetches `/comments/{id}` and retains
//! the page. [`Comment::get_thread`] builds an immutable reply tree out of
//! the nested thread markup: every node owns its replies, and parent
//! linkage is an id back-reference rather than a second ownership edge, so
//! the tree is cycle-free by construction.

use std::hash::{Hash, Hasher};

use scraper::ElementRef;
use serde::{Deserialize, Serialize};

use crate::actions::{self, CommentTarget, Commenter};
use crate::page::{Page, element_text};
use crate::session::Session;
use crate::transport::{BASE_URL, Transport};
use crate::user::User;
use crate::{ArchiveError, Result};

/// A single comment, identified by its numeric id.
#[derive(Debug)]
pub struct Comment {
    id: u64,
    work_id: Option<u64>,
    chapter_id: Option<u64>,
    state: CommentState,
}

#[derive(Debug)]
enum CommentState {
    Unloaded,
    Stub { text: String, author: Option<String> },
    Loaded(Page),
}

/// One node of a reply tree: a comment and the replies below it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommentThread {
    /// The comment's id.
    pub id: u64,
    /// The author's username; `None` for deleted or hidden bylines.
    pub author: Option<String>,
    /// The comment's text.
    pub text: String,
    /// Id of the comment this one replies to; `None` at thread roots.
    pub parent_id: Option<u64>,
    /// Replies, in page order.
    pub replies: Vec<CommentThread>,
}

impl CommentThread {
    /// Number of comments in this subtree, itself included.
    pub fn len(&self) -> usize {
        1 + self.replies.iter().map(CommentThread::len).sum::<usize>()
    }

    /// Always false; a thread holds at least its own comment.
    pub fn is_empty(&self) -> bool {
        false
    }

    /// Finds a node by comment id anywhere in this subtree.
    pub fn find(&self, id: u64) -> Option<&CommentThread> {
        if self.id == id {
            return Some(self);
        }
        self.replies.iter().find_map(|reply| reply.find(id))
    }
}

/// Serializable image of a comment.
#[derive(Debug, Serialize, Deserialize)]
pub struct CommentSnapshot {
    id: u64,
    work_id: Option<u64>,
    chapter_id: Option<u64>,
    page: Option<Page>,
}

impl Comment {
    /// A comment known only by id.
    pub fn new(id: u64) -> Self {
        Self { id, work_id: None, chapter_id: None, state: CommentState::Unloaded }
    }

    pub(crate) fn stub(
        id: u64,
        target: CommentTarget,
        text: String,
        author: Option<String>,
    ) -> Self {
        let (work_id, chapter_id) = match target {
            CommentTarget::Work(work_id) => (Some(work_id), None),
            CommentTarget::Chapter(chapter_id) => (None, Some(chapter_id)),
        };
        Self { id, work_id, chapter_id, state: CommentState::Stub { text, author } }
    }

    /// The comment's id.
    pub fn id(&self) -> u64 {
        self.id
    }

    /// The comment's URL.
    pub fn url(&self) -> String {
        format!("{BASE_URL}/comments/{}", self.id)
    }

    /// Whether a reload (or snapshot restore) has completed.
    pub fn is_loaded(&self) -> bool {
        matches!(self.state, CommentState::Loaded(_))
    }

    /// Fetches the comment's page and replaces this comment's state.
    /// A failed reload leaves the previous state untouched.
    pub fn reload(&mut self, transport: &Transport, session: Option<&Session>) -> Result<()> {
        let page = transport.get_page(&self.url(), session)?;
        if page.is_not_found()
            || page.select_first(&format!("li#comment_{}", self.id)).is_none()
        {
            return Err(ArchiveError::InvalidId { kind: "comment", id: self.id.to_string() });
        }

        // The reply link's query names the chapter this comment sits on.
        if self.chapter_id.is_none() && self.work_id.is_none() {
            self.chapter_id = page
                .attr_of(&format!("li#add_comment_reply_link_{} a", self.id), "href")
                .or_else(|| page.attr_of(&format!("#add_comment_reply_link_{}", self.id), "href"))
                .and_then(|href| {
                    href.split(['?', '&'])
                        .find_map(|pair| pair.strip_prefix("chapter_id="))
                        .and_then(|value| value.parse().ok())
                });
        }
        self.state = CommentState::Loaded(page);
        Ok(())
    }

    /// Serializes the comment's cached page.
    pub fn snapshot(&self) -> CommentSnapshot {
        let page = match &self.state {
            CommentState::Loaded(page) => Some(page.clone()),
            _ => None,
        };
        CommentSnapshot { id: self.id, work_id: self.work_id, chapter_id: self.chapter_id, page }
    }

    /// Rebuilds a comment from a snapshot.
    pub fn restore(snapshot: CommentSnapshot) -> Self {
        Self {
            id: snapshot.id,
            work_id: snapshot.work_id,
            chapter_id: snapshot.chapter_id,
            state: match snapshot.page {
                Some(page) => CommentState::Loaded(page),
                None => CommentState::Unloaded,
            },
        }
    }

    /// The comment's text.
    pub fn text(&self) -> Result<String> {
        match &self.state {
            CommentState::Stub { text, .. } => Ok(text.clone()),
            CommentState::Loaded(page) => Ok(page
                .text_of(&format!("li#comment_{} blockquote", self.id))
                .unwrap_or_default()),
            CommentState::Unloaded => Err(ArchiveError::Unloaded { kind: "comment" }),
        }
    }

    /// The comment's author, as an unloaded user projection.
    pub fn author(&self) -> Result<Option<User>> {
        match &self.state {
            CommentState::Stub { author, .. } => Ok(author.clone().map(User::new)),
            CommentState::Loaded(page) => Ok(page
                .text_of(&format!("li#comment_{} h4.heading.byline a", self.id))
                .map(User::new)),
            CommentState::Unloaded => Err(ArchiveError::Unloaded { kind: "comment" }),
        }
    }

    /// The CSRF token from the comment's page, if any.
    pub fn authenticity_token(&self) -> Result<Option<String>> {
        match &self.state {
            CommentState::Loaded(page) => Ok(page.csrf_token()),
            _ => Err(ArchiveError::Unloaded { kind: "comment" }),
        }
    }

    /// Builds the reply tree this comment belongs to.
    ///
    /// When the comment's page links to a parent thread, that ancestor is
    /// fetched first, so the returned tree is rooted at the thread's top
    /// and this comment appears somewhere below ([`CommentThread::find`]).
    /// `maximum` caps the number of nodes attached.
    pub fn get_thread(
        &mut self,
        transport: &Transport,
        session: Option<&Session>,
        maximum: Option<usize>,
    ) -> Result<CommentThread> {
        if !self.is_loaded() {
            self.reload(transport, session)?;
        }
        let CommentState::Loaded(page) = &self.state else {
            return Err(ArchiveError::Unloaded { kind: "comment" });
        };

        // Follow the "Parent Thread" link so ancestors are attached.
        let root_page;
        let (page, root_id) = match parent_thread_id(page, self.id) {
            Some(root_id) => {
                let url = format!("{BASE_URL}/comments/{root_id}");
                root_page = transport.get_page(&url, session)?;
                if root_page.is_not_found() {
                    return Err(ArchiveError::InvalidId {
                        kind: "comment",
                        id: root_id.to_string(),
                    });
                }
                (&root_page, root_id)
            }
            None => (page, self.id),
        };

        let thread_ol = page.select_first("ol.thread").ok_or(ArchiveError::UnexpectedResponse {
            status: 200,
            body: "comment page carries no thread".to_string(),
        })?;

        let mut budget = maximum.unwrap_or(usize::MAX);
        let nodes = build_thread(thread_ol, None, &mut budget);
        nodes
            .into_iter()
            .find(|node| node.id == root_id || node.find(root_id).is_some())
            .ok_or(ArchiveError::InvalidId { kind: "comment", id: root_id.to_string() })
    }

    /// Replies to this comment as the session's account.
    pub fn reply(&self, transport: &Transport, session: &Session, text: &str) -> Result<()> {
        let target = self.target()?;
        let token = self.action_token(transport, session)?;
        actions::post_comment(
            transport,
            session,
            target,
            text,
            Some(self.id),
            Commenter::Account,
            &token,
        )
    }

    /// Replies to this comment as a guest.
    pub fn reply_as_guest(
        &self,
        transport: &Transport,
        session: &Session,
        text: &str,
        name: &str,
        email: &str,
    ) -> Result<()> {
        let target = self.target()?;
        let token = self.action_token(transport, session)?;
        actions::post_comment(
            transport,
            session,
            target,
            text,
            Some(self.id),
            Commenter::Guest { name: name.to_string(), email: email.to_string() },
            &token,
        )
    }

    /// Deletes this comment.
    pub fn delete(&self, transport: &Transport, session: &Session) -> Result<()> {
        let token = self.action_token(transport, session)?;
        actions::delete_comment(transport, session, self.id, &token)
    }

    fn target(&self) -> Result<CommentTarget> {
        match (self.chapter_id, self.work_id) {
            (Some(chapter_id), _) => Ok(CommentTarget::Chapter(chapter_id)),
            (None, Some(work_id)) => Ok(CommentTarget::Work(work_id)),
            (None, None) => Err(ArchiveError::MissingCapability {
                what: "comment has no known parent work or chapter; call reload() first"
                    .to_string(),
            }),
        }
    }

    fn action_token(&self, transport: &Transport, session: &Session) -> Result<String> {
        if let CommentState::Loaded(page) = &self.state
            && let Some(token) = page.csrf_token()
        {
            return Ok(token);
        }
        session.ensure_token(transport)
    }
}

impl PartialEq for Comment {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for Comment {}

impl Hash for Comment {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.id.hash(state);
    }
}

/// Id behind the "Parent Thread" navigation entry, when this comment is a
/// reply somewhere below the thread root.
fn parent_thread_id(page: &Page, comment_id: u64) -> Option<u64> {
    let nav = page.select_first(&format!("ul#navigation_for_comment_{comment_id}"))?;
    let sel = scraper::Selector::parse("li a").ok()?;
    for a in nav.select(&sel) {
        if element_text(a) == "Parent Thread" {
            let href = a.value().attr("href")?;
            return href.rsplit('/').next()?.parse().ok();
        }
    }
    None
}

/// Recursively decodes a thread `<ol>`: article `<li>`s are comments, the
/// non-article `<li>` that follows one holds the `<ol>` of its replies.
fn build_thread(
    ol: ElementRef<'_>,
    parent_id: Option<u64>,
    budget: &mut usize,
) -> Vec<CommentThread> {
    let mut nodes: Vec<CommentThread> = Vec::new();
    for child in ol.children().filter_map(ElementRef::wrap) {
        if child.value().name() != "li" {
            continue;
        }
        if child.value().attr("role") == Some("article") {
            if *budget == 0 {
                break;
            }
            let Some(id) = comment_li_id(child) else { continue };
            *budget -= 1;
            nodes.push(CommentThread {
                id,
                author: byline_author(child),
                text: blockquote_text(child).unwrap_or_default(),
                parent_id,
                replies: Vec::new(),
            });
        } else if let Some(last) = nodes.last_mut() {
            let sel = match scraper::Selector::parse("ol") {
                Ok(sel) => sel,
                Err(_) => continue,
            };
            if let Some(replies_ol) = child.select(&sel).next() {
                last.replies = build_thread(replies_ol, Some(last.id), budget);
            }
        }
    }
    nodes
}

fn comment_li_id(li: ElementRef<'_>) -> Option<u64> {
    li.value().attr("id")?.strip_prefix("comment_")?.parse().ok()
}

fn byline_author(li: ElementRef<'_>) -> Option<String> {
    let sel = scraper::Selector::parse("h4.heading.byline a").ok()?;
    li.select(&sel).next().map(element_text)
}

fn blockquote_text(li: ElementRef<'_>) -> Option<String> {
    let sel = scraper::Selector::parse("blockquote").ok()?;
    li.select(&sel).next().map(element_text)
}

/// Walks a paginated comment listing into comment stubs.
///
/// `url_template` carries a `{}` placeholder for the page number. Only
/// top-level comments of each page are returned, matching the listing's
/// own presentation; `maximum` caps the total.
pub(crate) fn listing(
    transport: &Transport,
    session: Option<&Session>,
    target: CommentTarget,
    url_template: &str,
    maximum: Option<usize>,
) -> Result<Vec<Comment>> {
    let first = transport.get_page(&url_template.replace("{}", "1"), session)?;
    let pages = first.page_count_within("div#comments_placeholder");

    let mut comments = Vec::new();
    for page_number in 1..=pages {
        let page;
        let current = if page_number == 1 {
            &first
        } else {
            page = transport.get_page(&url_template.replace("{}", &page_number.to_string()), session)?;
            &page
        };
        let Some(thread_ol) = current.select_first("ol.thread") else {
            continue;
        };
        for li in thread_ol.children().filter_map(ElementRef::wrap) {
            if li.value().name() != "li" || li.value().attr("role") != Some("article") {
                continue;
            }
            if let Some(max) = maximum
                && comments.len() >= max
            {
                return Ok(comments);
            }
            let Some(id) = comment_li_id(li) else { continue };
            comments.push(Comment::stub(
                id,
                target,
                blockquote_text(li).unwrap_or_default(),
                byline_author(li),
            ));
        }
    }
    Ok(comments)
}

#[cfg(test)]
mod tests {
    use super::*;

    const THREAD_PAGE: &str = r#"<html><body>
    <ol class="thread">
      <li id="comment_100" role="article">
        <h4 class="heading byline"><a href="/users/alice">alice</a></h4>
        <blockquote class="userstuff"><p>Root comment.</p></blockquote>
      </li>
      <li>
        <ol class="thread">
          <li id="comment_101" role="article">
            <h4 class="heading byline"><a href="/users/bob">bob</a></h4>
            <blockquote class="userstuff"><p>First reply.</p></blockquote>
          </li>
          <li>
            <ol class="thread">
              <li id="comment_102" role="article">
                <blockquote class="userstuff"><p>Nested reply.</p></blockquote>
              </li>
            </ol>
          </li>
          <li id="comment_103" role="article">
            <h4 class="heading byline"><a href="/users/carol">carol</a></h4>
            <blockquote class="userstuff"><p>Second reply.</p></blockquote>
          </li>
        </ol>
      </li>
    </ol>
    </body></html>"#;

    fn thread_from_fixture(maximum: Option<usize>) -> Vec<CommentThread> {
        let page = Page::parse(THREAD_PAGE);
        let ol = page.select_first("ol.thread").unwrap();
        let mut budget = maximum.unwrap_or(usize::MAX);
        build_thread(ol, None, &mut budget)
    }

    #[test]
    fn test_thread_tree_shape() {
        let nodes = thread_from_fixture(None);
        assert_eq!(nodes.len(), 1);
        let root = &nodes[0];
        assert_eq!(root.id, 100);
        assert_eq!(root.author.as_deref(), Some("alice"));
        assert_eq!(root.parent_id, None);
        assert_eq!(root.replies.len(), 2);

        let first = &root.replies[0];
        assert_eq!(first.id, 101);
        assert_eq!(first.parent_id, Some(100));
        assert_eq!(first.replies.len(), 1);
        assert_eq!(first.replies[0].id, 102);
        assert_eq!(first.replies[0].parent_id, Some(101));
        assert_eq!(first.replies[0].author, None);

        assert_eq!(root.replies[1].id, 103);
        assert_eq!(root.len(), 4);
    }

    #[test]
    fn test_thread_find_descends() {
        let nodes = thread_from_fixture(None);
        let root = &nodes[0];
        assert_eq!(root.find(102).unwrap().text, "Nested reply.");
        assert!(root.find(999).is_none());
    }

    #[test]
    fn test_maximum_caps_nodes() {
        let nodes = thread_from_fixture(Some(2));
        let root = &nodes[0];
        assert_eq!(root.len(), 2);
        assert_eq!(root.replies[0].id, 101);
        assert!(root.replies[0].replies.is_empty());
    }

    #[test]
    fn test_stub_text_and_author() {
        let comment =
            Comment::stub(7, CommentTarget::Work(1), "Hi".to_string(), Some("dan".to_string()));
        assert_eq!(comment.text().unwrap(), "Hi");
        assert_eq!(comment.author().unwrap().unwrap().username(), "dan");
        assert!(!comment.is_loaded());
    }

    #[test]
    fn test_unloaded_comment_errs() {
        let comment = Comment::new(7);
        assert!(matches!(comment.text(), Err(ArchiveError::Unloaded { kind: "comment" })));
        assert!(matches!(comment.author(), Err(ArchiveError::Unloaded { .. })));
    }

    #[test]
    fn test_snapshot_round_trip() {
        let mut comment = Comment::new(100);
        comment.state = CommentState::Loaded(Page::parse(THREAD_PAGE));
        let json = serde_json::to_string(&comment.snapshot()).unwrap();
        let restored = Comment::restore(serde_json::from_str(&json).unwrap());
        assert!(restored.is_loaded());
        assert_eq!(restored.text().unwrap(), "Root comment.");
        assert_eq!(restored.author().unwrap().unwrap().username(), "alice");
    }
}
