//! Error types for archive client operations.
//!
//! This module defines the main error type [`ArchiveError`] which represents
//! all possible errors that can occur while fetching pages, managing a
//! session, loading entities, and replaying form submissions.
//!
//! # Example
//!
//! ```rust
//! use fanarchive_core::{ArchiveError, Result};
//!
//! fn require_loaded(loaded: bool) -> Result<()> {
//!     if !loaded {
//!         return Err(ArchiveError::Unloaded { kind: "work" });
//!     }
//!     Ok(())
//! }
//! ```

use thiserror::Error;

/// Main error type for archive client operations.
///
/// This enum represents all possible errors that can occur during HTTP
/// fetching, login, lazy entity loading, and mutating actions (kudos,
/// comments, subscriptions, bookmarks).
#[derive(Error, Debug)]
pub enum ArchiveError {
    /// HTTP request errors from reqwest.
    ///
    /// This variant wraps network errors, DNS failures, connection issues,
    /// and other HTTP-related problems.
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// Invalid URL provided.
    #[error("Invalid URL: {0}")]
    InvalidUrl(String),

    /// The archive answered with HTTP 429.
    ///
    /// The client never retries this on its own; reduce the request rate or
    /// configure a stricter [`RateGate`](crate::RateGate).
    #[error("Rate limited by the archive (HTTP 429); try again later or reduce the request rate")]
    RateLimited,

    /// The requested entity does not exist.
    ///
    /// Returned when the canonical page for an id carries the archive's
    /// "not found" marker, or when an action names a missing target.
    #[error("Cannot find {kind} with id {id}")]
    InvalidId { kind: &'static str, id: String },

    /// A derived field was read before the entity was loaded.
    ///
    /// Every field accessor fails with this until the first successful
    /// `reload()` (or snapshot restore) completes.
    #[error("{kind} isn't loaded; have you tried calling reload()?")]
    Unloaded { kind: &'static str },

    /// The action requires an authenticated session.
    #[error("This action can only be performed with an authenticated session")]
    AuthRequired,

    /// Login was rejected (wrong username or password).
    #[error("Invalid username or password for {username}")]
    LoginFailed { username: String },

    /// The authenticity token was rejected as stale.
    ///
    /// Callers are expected to call `Session::refresh_auth_token()` and may
    /// retry the action once.
    #[error("Invalid authenticity token; try calling Session::refresh_auth_token()")]
    StaleToken,

    /// The comment was already posted.
    #[error("You have already left this comment here")]
    DuplicateComment,

    /// The action cannot proceed structurally.
    ///
    /// For example, no pseudonym could be found to post under, or a reply
    /// target has no known parent work or chapter.
    #[error("Missing capability: {what}")]
    MissingCapability { what: String },

    /// The archive refused the action for lack of permission.
    #[error("You don't have permission to do this")]
    PermissionDenied,

    /// Fallback for any response status or shape not covered above.
    ///
    /// Always carries the raw status and body for diagnosis.
    #[error("Unexpected response from the archive (HTTP {status})")]
    UnexpectedResponse { status: u16, body: String },
}

/// Result type alias for ArchiveError.
///
/// This is a convenience alias for `std::result::Result<T, ArchiveError>`.
pub type Result<T> = std::result::Result<T, ArchiveError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_invalid_id_display() {
        let err = ArchiveError::InvalidId { kind: "work", id: "123".to_string() };
        assert!(err.to_string().contains("work"));
        assert!(err.to_string().contains("123"));
    }

    #[test]
    fn test_unloaded_display() {
        let err = ArchiveError::Unloaded { kind: "series" };
        assert!(err.to_string().contains("series"));
        assert!(err.to_string().contains("reload"));
    }

    #[test]
    fn test_unexpected_response_carries_status() {
        let err = ArchiveError::UnexpectedResponse { status: 451, body: String::new() };
        assert!(err.to_string().contains("451"));
    }
}
