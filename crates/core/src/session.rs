//! Authenticated and guest sessions.
//!
//! A [`Session`] owns a cookie jar shared by two HTTP channels (one that
//! follows redirects, one that does not) plus the authentication state the
//! archive hands back at login: the logged-in username and the CSRF
//! authenticity token. Requests made through a [`Transport`](crate::Transport)
//! with a session attached are carried over the session's channels, so the
//! archive sees its cookies.
//!
//! Authenticated sessions also expose the account's subscription and
//! bookmark listings. Both are cached after the first fetch; pass
//! `refresh = true` to discard the cache and refetch.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use reqwest::StatusCode;
use reqwest::blocking::Client;

use crate::blurb::{self, SubscriptionRow, WorkRow};
use crate::pagination::{self, FetchMode};
use crate::page::parse_count;
use crate::series::Series;
use crate::transport::{BASE_URL, Transport, build_client};
use crate::user::User;
use crate::work::Work;
use crate::{ArchiveError, Result};

/// One entry of the account's subscription listing.
#[derive(Debug, Clone)]
pub enum Subscription {
    /// A subscribed work, as a partial projection.
    Work(Work),
    /// A subscribed series, as a partial projection.
    Series(Series),
    /// A subscribed user.
    User(User),
}

#[derive(Debug, Default)]
struct AuthState {
    authenticated: bool,
    username: Option<String>,
    token: Option<String>,
}

#[derive(Debug, Default)]
struct SessionCaches {
    subscriptions: HashMap<&'static str, Vec<SubscriptionRow>>,
    bookmarks: Option<Vec<WorkRow>>,
    n_bookmarks: Option<u64>,
}

#[derive(Debug)]
struct SessionInner {
    client: Client,
    raw_client: Client,
    auth: Mutex<AuthState>,
    caches: Mutex<SessionCaches>,
}

/// A cookie-bearing identity on the archive.
///
/// Cheap to clone; clones share cookies, authentication state and caches.
/// Guest sessions carry cookies but no account.
#[derive(Debug, Clone)]
pub struct Session {
    inner: Arc<SessionInner>,
}

impl Session {
    /// Creates a guest session: cookies, no account.
    pub fn guest(transport: &Transport) -> Result<Self> {
        let jar = Arc::new(reqwest::cookie::Jar::default());
        let client = build_client(transport.config(), true, Some(Arc::clone(&jar)))?;
        let raw_client = build_client(transport.config(), false, Some(jar))?;
        Ok(Self {
            inner: Arc::new(SessionInner {
                client,
                raw_client,
                auth: Mutex::new(AuthState::default()),
                caches: Mutex::new(SessionCaches::default()),
            }),
        })
    }

    /// Logs in and returns an authenticated session.
    ///
    /// Fetches the login form for a fresh authenticity token, submits the
    /// credentials, and treats anything but a redirect as a rejected login.
    pub fn login(transport: &Transport, username: &str, password: &str) -> Result<Self> {
        let session = Self::guest(transport)?;

        let login_url = format!("{BASE_URL}/users/login");
        let page = transport.get_page(&login_url, Some(&session))?;
        let token = page.csrf_token().ok_or_else(|| ArchiveError::UnexpectedResponse {
            status: 200,
            body: "login page carries no authenticity token".to_string(),
        })?;

        let form = [
            ("user[login]", username.to_string()),
            ("user[password]", password.to_string()),
            ("authenticity_token", token.clone()),
        ];
        let response = transport.post_form(&login_url, Some(&session), &form, &[], false)?;
        Self::login_outcome(response.status(), username)?;

        {
            let mut auth = session.lock_auth();
            auth.authenticated = true;
            auth.username = Some(username.to_string());
            auth.token = Some(token);
        }
        tracing::debug!(username, "logged in");
        Ok(session)
    }

    /// Whether this session belongs to a logged-in account.
    pub fn is_authenticated(&self) -> bool {
        self.lock_auth().authenticated
    }

    /// The logged-in username, if any.
    pub fn username(&self) -> Option<String> {
        self.lock_auth().username.clone()
    }

    /// The most recently seen authenticity token, if any.
    pub fn authenticity_token(&self) -> Option<String> {
        self.lock_auth().token.clone()
    }

    /// Refetches the authenticity token.
    ///
    /// Authenticated sessions read it from their own profile page, guests
    /// from the landing page. Call this after [`ArchiveError::StaleToken`]
    /// before retrying an action.
    pub fn refresh_auth_token(&self, transport: &Transport) -> Result<()> {
        let url = match self.username() {
            Some(username) => format!("{BASE_URL}/users/{username}"),
            None => BASE_URL.to_string(),
        };
        let page = transport.get_page(&url, Some(self))?;
        let token = page.csrf_token().ok_or_else(|| ArchiveError::UnexpectedResponse {
            status: 200,
            body: "page carries no authenticity token".to_string(),
        })?;
        self.lock_auth().token = Some(token);
        Ok(())
    }

    /// Returns a usable authenticity token, refreshing it if none is held.
    pub(crate) fn ensure_token(&self, transport: &Transport) -> Result<String> {
        if let Some(token) = self.authenticity_token() {
            return Ok(token);
        }
        self.refresh_auth_token(transport)?;
        self.authenticity_token().ok_or_else(|| ArchiveError::MissingCapability {
            what: "no authenticity token available".to_string(),
        })
    }

    /// The channel carrying this session's cookies.
    pub(crate) fn client(&self, follow_redirects: bool) -> &Client {
        if follow_redirects { &self.inner.client } else { &self.inner.raw_client }
    }

    /// The account's subscriptions, works, series and users mixed.
    pub fn get_subscriptions(
        &self,
        transport: &Transport,
        refresh: bool,
        mode: FetchMode,
    ) -> Result<Vec<Subscription>> {
        let rows = self.subscription_rows(transport, "", "all", refresh, mode)?;
        Ok(rows.into_iter().map(Subscription::from_row).collect())
    }

    /// The account's work subscriptions, as partial projections.
    pub fn get_work_subscriptions(
        &self,
        transport: &Transport,
        refresh: bool,
        mode: FetchMode,
    ) -> Result<Vec<Work>> {
        let rows = self.subscription_rows(transport, "&type=works", "works", refresh, mode)?;
        Ok(rows
            .into_iter()
            .filter_map(|row| match Subscription::from_row(row) {
                Subscription::Work(work) => Some(work),
                _ => None,
            })
            .collect())
    }

    /// The account's series subscriptions, as partial projections.
    pub fn get_series_subscriptions(
        &self,
        transport: &Transport,
        refresh: bool,
        mode: FetchMode,
    ) -> Result<Vec<Series>> {
        let rows = self.subscription_rows(transport, "&type=series", "series", refresh, mode)?;
        Ok(rows
            .into_iter()
            .filter_map(|row| match Subscription::from_row(row) {
                Subscription::Series(series) => Some(series),
                _ => None,
            })
            .collect())
    }

    /// The users the account is subscribed to.
    pub fn get_user_subscriptions(
        &self,
        transport: &Transport,
        refresh: bool,
        mode: FetchMode,
    ) -> Result<Vec<User>> {
        let rows = self.subscription_rows(transport, "&type=users", "users", refresh, mode)?;
        Ok(rows
            .into_iter()
            .filter_map(|row| match Subscription::from_row(row) {
                Subscription::User(user) => Some(user),
                _ => None,
            })
            .collect())
    }

    fn subscription_rows(
        &self,
        transport: &Transport,
        filter: &str,
        cache_key: &'static str,
        refresh: bool,
        mode: FetchMode,
    ) -> Result<Vec<SubscriptionRow>> {
        if !refresh
            && let Some(rows) = self.lock_caches().subscriptions.get(cache_key)
        {
            return Ok(rows.clone());
        }
        let username = self.require_username()?;

        let url = |page: u32| {
            format!("{BASE_URL}/users/{username}/subscriptions?page={page}{filter}")
        };
        let first = transport.get_page(&url(1), Some(self))?;
        let total = first.page_count();
        let rows =
            pagination::walk_pages_with_first(blurb::subscription_rows(&first), total, mode, |page| {
                let listing = transport.get_page(&url(page), Some(self))?;
                Ok(blurb::subscription_rows(&listing))
            })?;

        self.lock_caches().subscriptions.insert(cache_key, rows.clone());
        Ok(rows)
    }

    /// The account's bookmarked works, as partial projections.
    ///
    /// A work bookmarked more than once appears only once.
    pub fn get_bookmarks(
        &self,
        transport: &Transport,
        refresh: bool,
        mode: FetchMode,
    ) -> Result<Vec<Work>> {
        if !refresh
            && let Some(rows) = self.lock_caches().bookmarks.clone()
        {
            return Ok(rows.into_iter().map(Work::from_row).collect());
        }
        let username = self.require_username()?;

        let url = |page: u32| format!("{BASE_URL}/users/{username}/bookmarks?page={page}");
        let first = transport.get_page(&url(1), Some(self))?;
        let total = first.page_count();
        let rows = pagination::walk_pages_with_first(blurb::work_rows(&first), total, mode, |page| {
            let listing = transport.get_page(&url(page), Some(self))?;
            Ok(blurb::work_rows(&listing))
        })?;
        let rows = pagination::dedup_by_key(rows, |row| row.id);

        self.lock_caches().bookmarks = Some(rows.clone());
        Ok(rows.into_iter().map(Work::from_row).collect())
    }

    /// Number of bookmarks on the account, read from the listing header.
    pub fn n_bookmarks(&self, transport: &Transport, refresh: bool) -> Result<u64> {
        if !refresh
            && let Some(n) = self.lock_caches().n_bookmarks
        {
            return Ok(n);
        }
        let username = self.require_username()?;

        let url = format!("{BASE_URL}/users/{username}/bookmarks?page=1");
        let page = transport.get_page(&url, Some(self))?;
        // The listing header reads like "Bookmarks (1,234)".
        let count = page
            .text_of("div#inner span.current")
            .and_then(|text| {
                let last = text.split_whitespace().next_back()?;
                parse_count(last.trim_matches(['(', ')']))
            })
            .ok_or_else(|| ArchiveError::UnexpectedResponse {
                status: 200,
                body: "bookmark listing carries no count".to_string(),
            })?;

        self.lock_caches().n_bookmarks = Some(count);
        Ok(count)
    }

    /// Drops every cached listing; the next fetch goes back to the archive.
    pub fn clear_cache(&self) {
        let mut caches = self.lock_caches();
        caches.subscriptions.clear();
        caches.bookmarks = None;
        caches.n_bookmarks = None;
    }

    /// A successful login answers with a redirect to the account page; a
    /// re-rendered form (200) means the credentials were rejected.
    fn login_outcome(status: StatusCode, username: &str) -> Result<()> {
        if status != StatusCode::FOUND {
            return Err(ArchiveError::LoginFailed { username: username.to_string() });
        }
        Ok(())
    }

    fn require_username(&self) -> Result<String> {
        self.username().ok_or(ArchiveError::AuthRequired)
    }

    fn lock_auth(&self) -> MutexGuard<'_, AuthState> {
        self.inner.auth.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn lock_caches(&self) -> MutexGuard<'_, SessionCaches> {
        self.inner.caches.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Subscription {
    fn from_row(row: SubscriptionRow) -> Self {
        match row {
            SubscriptionRow::Work { id, title, authors } => {
                Self::Work(Work::subscription_stub(id, title, authors))
            }
            SubscriptionRow::Series { id, name, authors } => {
                Self::Series(Series::stub(id, name, authors))
            }
            SubscriptionRow::User { username } => Self::User(User::new(username)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gate::{GateConfig, RateGate};

    fn transport() -> Transport {
        Transport::new(Arc::new(RateGate::new(GateConfig::default()))).unwrap()
    }

    #[test]
    fn test_guest_session_has_no_account() {
        let session = Session::guest(&transport()).unwrap();
        assert!(!session.is_authenticated());
        assert_eq!(session.username(), None);
        assert_eq!(session.authenticity_token(), None);
    }

    #[test]
    fn test_listings_require_an_account() {
        let session = Session::guest(&transport()).unwrap();
        let result = session.get_bookmarks(&transport(), false, FetchMode::Sequential);
        assert!(matches!(result, Err(ArchiveError::AuthRequired)));
    }

    #[test]
    fn test_rejected_login_maps_to_login_failed() {
        let result = Session::login_outcome(StatusCode::OK, "alice");
        assert!(matches!(result, Err(ArchiveError::LoginFailed { username }) if username == "alice"));
        assert!(Session::login_outcome(StatusCode::FOUND, "alice").is_ok());
    }

    #[test]
    fn test_clones_share_state() {
        let session = Session::guest(&transport()).unwrap();
        let clone = session.clone();
        session.lock_auth().token = Some("tok".to_string());
        assert_eq!(clone.authenticity_token(), Some("tok".to_string()));
    }
}
