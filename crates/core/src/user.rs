//! Archive users.
//!
//! Users are keyed by username, which is known at construction; everything
//! else comes from three pages (profile, works listing, bookmarks listing)
//! fetched concurrently by [`User::reload`]. Works and bookmarks are
//! paginated collections of work stubs, cached after the first walk.

use std::cell::{OnceCell, RefCell};
use std::hash::{Hash, Hasher};

use serde::{Deserialize, Serialize};

use crate::actions;
use crate::blurb::{self, WorkRow};
use crate::page::{Page, parse_count};
use crate::pagination::{self, FetchMode};
use crate::session::Session;
use crate::task::Task;
use crate::transport::{BASE_URL, Transport};
use crate::work::Work;
use crate::{ArchiveError, Result};

/// A user on the archive, keyed by username.
#[derive(Debug, Clone)]
pub struct User {
    username: String,
    pages: Option<UserPages>,
    works_cache: RefCell<Option<Vec<WorkRow>>>,
    bookmarks_cache: RefCell<Option<Vec<WorkRow>>>,
}

#[derive(Debug, Clone)]
struct UserPages {
    profile: Page,
    works: Page,
    bookmarks: Page,
    fields: UserFields,
}

#[derive(Debug, Default, Clone)]
struct UserFields {
    user_id: OnceCell<Option<u64>>,
    bio: OnceCell<String>,
    n_works: OnceCell<Option<u64>>,
    n_bookmarks: OnceCell<Option<u64>>,
}

/// Serializable image of a user: username plus the three cached pages.
#[derive(Debug, Serialize, Deserialize)]
pub struct UserSnapshot {
    username: String,
    profile: Option<Page>,
    works: Option<Page>,
    bookmarks: Option<Page>,
}

impl User {
    /// A user known only by username. The username itself always reads
    /// fine; derived fields report `Unloaded` until a reload.
    pub fn new(username: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            pages: None,
            works_cache: RefCell::new(None),
            bookmarks_cache: RefCell::new(None),
        }
    }

    /// The username this user is keyed by.
    pub fn username(&self) -> &str {
        &self.username
    }

    /// The user's profile URL.
    pub fn url(&self) -> String {
        format!("{BASE_URL}/users/{}", self.username)
    }

    /// Whether a reload (or snapshot restore) has completed.
    pub fn is_loaded(&self) -> bool {
        self.pages.is_some()
    }

    /// Fetches the user's profile, works and bookmarks pages, one task
    /// each, and replaces this user's state with them.
    ///
    /// A failed reload leaves the previous state untouched.
    pub fn reload(&mut self, transport: &Transport, session: Option<&Session>) -> Result<()> {
        let fetch = |suffix: &str| {
            let transport = transport.clone();
            let session = session.cloned();
            let url = format!("{BASE_URL}/users/{}{suffix}", self.username);
            Task::spawn(move || -> Result<String> {
                let response = transport.get(&url, session.as_ref())?;
                Ok(response.text()?)
            })
        };
        let profile_task = fetch("/profile");
        let works_task = fetch("/works");
        let bookmarks_task = fetch("/bookmarks");

        let profile = Page::parse(profile_task.join()?);
        let works = Page::parse(works_task.join()?);
        let bookmarks = Page::parse(bookmarks_task.join()?);
        if profile.is_not_found() {
            return Err(ArchiveError::InvalidId { kind: "user", id: self.username.clone() });
        }

        self.pages = Some(UserPages { profile, works, bookmarks, fields: UserFields::default() });
        self.works_cache.replace(None);
        self.bookmarks_cache.replace(None);
        tracing::debug!(username = %self.username, "user loaded");
        Ok(())
    }

    /// Serializes the user's cached pages.
    pub fn snapshot(&self) -> UserSnapshot {
        UserSnapshot {
            username: self.username.clone(),
            profile: self.pages.as_ref().map(|p| p.profile.clone()),
            works: self.pages.as_ref().map(|p| p.works.clone()),
            bookmarks: self.pages.as_ref().map(|p| p.bookmarks.clone()),
        }
    }

    /// Rebuilds a user from a snapshot.
    pub fn restore(snapshot: UserSnapshot) -> Self {
        let pages = match (snapshot.profile, snapshot.works, snapshot.bookmarks) {
            (Some(profile), Some(works), Some(bookmarks)) => {
                Some(UserPages { profile, works, bookmarks, fields: UserFields::default() })
            }
            _ => None,
        };
        Self {
            username: snapshot.username,
            pages,
            works_cache: RefCell::new(None),
            bookmarks_cache: RefCell::new(None),
        }
    }

    fn pages(&self) -> Result<&UserPages> {
        self.pages.as_ref().ok_or(ArchiveError::Unloaded { kind: "user" })
    }

    /// The user's numeric id, from the subscription form on the profile.
    /// Only rendered for logged-in viewers.
    pub fn user_id(&self) -> Result<Option<u64>> {
        let pages = self.pages()?;
        Ok(*pages.fields.user_id.get_or_init(|| {
            pages
                .profile
                .attr_of(r#"input[name="subscription[subscribable_id]"]"#, "value")
                .and_then(|value| value.parse().ok())
        }))
    }

    /// The user's bio text, empty when absent.
    pub fn bio(&self) -> Result<String> {
        let pages = self.pages()?;
        Ok(pages
            .fields
            .bio
            .get_or_init(|| {
                pages.profile.text_of("div.bio blockquote.userstuff").unwrap_or_default()
            })
            .clone())
    }

    /// Number of works this user has authored, from the listing header.
    pub fn n_works(&self) -> Result<u64> {
        let pages = self.pages()?;
        (*pages.fields.n_works.get_or_init(|| listing_count(&pages.works)))
            .ok_or(ArchiveError::Unloaded { kind: "user" })
    }

    /// Number of works this user has bookmarked.
    pub fn n_bookmarks(&self) -> Result<u64> {
        let pages = self.pages()?;
        (*pages.fields.n_bookmarks.get_or_init(|| listing_count(&pages.bookmarks)))
            .ok_or(ArchiveError::Unloaded { kind: "user" })
    }

    /// Page count of the works listing.
    pub fn works_pages(&self) -> Result<u32> {
        Ok(self.pages()?.works.page_count())
    }

    /// Page count of the bookmarks listing.
    pub fn bookmarks_pages(&self) -> Result<u32> {
        Ok(self.pages()?.bookmarks.page_count())
    }

    /// Whether the loading session is subscribed to this user.
    pub fn is_subscribed(&self) -> Result<bool> {
        let pages = self.pages()?;
        Ok(pages
            .profile
            .select_first(r#"div.primary.header input[name="commit"][value="Unsubscribe"]"#)
            .is_some())
    }

    pub(crate) fn sub_id(&self) -> Result<Option<u64>> {
        let pages = self.pages()?;
        Ok(pages
            .profile
            .attr_of("div.primary.header form", "action")
            .and_then(|action| blurb::last_segment_id(&action)))
    }

    /// The CSRF token from the profile page, if any.
    pub fn authenticity_token(&self) -> Result<Option<String>> {
        Ok(self.pages()?.profile.csrf_token())
    }

    /// The user's works as stubs, walking every listing page. Cached until
    /// `refresh = true` or the next reload.
    pub fn get_works(
        &self,
        transport: &Transport,
        session: Option<&Session>,
        refresh: bool,
        mode: FetchMode,
    ) -> Result<Vec<Work>> {
        self.listing(transport, session, refresh, mode, &self.works_cache, "works", self.works_pages()?)
    }

    /// The user's bookmarked works as stubs, deduplicated. Cached until
    /// `refresh = true` or the next reload.
    pub fn get_bookmarks(
        &self,
        transport: &Transport,
        session: Option<&Session>,
        refresh: bool,
        mode: FetchMode,
    ) -> Result<Vec<Work>> {
        self.listing(
            transport,
            session,
            refresh,
            mode,
            &self.bookmarks_cache,
            "bookmarks",
            self.bookmarks_pages()?,
        )
    }

    fn listing(
        &self,
        transport: &Transport,
        session: Option<&Session>,
        refresh: bool,
        mode: FetchMode,
        cache: &RefCell<Option<Vec<WorkRow>>>,
        segment: &str,
        total: u32,
    ) -> Result<Vec<Work>> {
        if !refresh
            && let Some(rows) = cache.borrow().clone()
        {
            return Ok(rows.into_iter().map(Work::from_row).collect());
        }

        let username = self.username.as_str();
        let rows = pagination::walk_pages(total, mode, |page| {
            let url = format!("{BASE_URL}/users/{username}/{segment}?page={page}");
            let listing = transport.get_page(&url, session)?;
            Ok(blurb::work_rows(&listing))
        })?;
        let rows = pagination::dedup_by_key(rows, |row| row.id);

        cache.replace(Some(rows.clone()));
        Ok(rows.into_iter().map(Work::from_row).collect())
    }

    /// Subscribes the session's account to this user. The user must be
    /// loaded through a logged-in session so the numeric id is known.
    pub fn subscribe(&self, transport: &Transport, session: &Session) -> Result<()> {
        let id = self.user_id()?.ok_or_else(|| ArchiveError::MissingCapability {
            what: "no user id on the loaded profile; reload through a logged-in session"
                .to_string(),
        })?;
        let token = self.action_token(transport, session)?;
        actions::subscribe(transport, session, "User", &id.to_string(), &token)
    }

    /// Removes the session's subscription to this user.
    pub fn unsubscribe(&self, transport: &Transport, session: &Session) -> Result<()> {
        let id = self.user_id()?.ok_or_else(|| ArchiveError::MissingCapability {
            what: "no user id on the loaded profile; reload through a logged-in session"
                .to_string(),
        })?;
        let sub_id = self.sub_id()?.ok_or_else(|| ArchiveError::MissingCapability {
            what: "no subscription id on the loaded profile".to_string(),
        })?;
        let token = self.action_token(transport, session)?;
        actions::unsubscribe(transport, session, "User", &id.to_string(), sub_id, &token)
    }

    fn action_token(&self, transport: &Transport, session: &Session) -> Result<String> {
        if let Ok(Some(token)) = self.authenticity_token() {
            return Ok(token);
        }
        session.ensure_token(transport)
    }
}

/// Count out of a listing header like "Works (42)".
fn listing_count(page: &Page) -> Option<u64> {
    let text = page.text_of("div#inner span.current")?;
    let last = text.split_whitespace().next_back()?;
    parse_count(last.trim_matches(['(', ')']))
}

impl PartialEq for User {
    fn eq(&self, other: &Self) -> bool {
        self.username == other.username
    }
}

impl Eq for User {}

impl Hash for User {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.username.hash(state);
    }
}
