//! Form replays for the archive's mutating endpoints.
//!
//! The archive has no JSON API for kudos, comments, subscriptions or
//! bookmarks; each of these is a form submission whose outcome is encoded
//! in the HTTP status, a small JSON error object, a redirect target, or
//! the body of an error page. This module centralizes those submissions
//! and their status decoding; entity methods are thin wrappers over it.
//!
//! Submissions whose outcome rides on the redirect (subscriptions,
//! bookmarks) are sent over the non-following channel so the 302 is
//! observable.

use reqwest::StatusCode;
use reqwest::blocking::Response;

use crate::page::Page;
use crate::session::Session;
use crate::transport::{BASE_URL, Transport};
use crate::{ArchiveError, Result};

/// What a comment is attached to.
#[derive(Debug, Clone, Copy)]
pub(crate) enum CommentTarget {
    /// Comment on the work as a whole (single-chapter works, or full-work
    /// comments).
    Work(u64),
    /// Comment on one chapter of a multi-chapter work.
    Chapter(u64),
}

impl CommentTarget {
    fn id(self) -> u64 {
        match self {
            Self::Work(id) | Self::Chapter(id) => id,
        }
    }

    fn id_field(self) -> &'static str {
        match self {
            Self::Work(_) => "work_id",
            Self::Chapter(_) => "chapter_id",
        }
    }

    fn referer(self) -> String {
        match self {
            Self::Work(id) => format!("{BASE_URL}/works/{id}"),
            Self::Chapter(id) => format!("{BASE_URL}/chapters/{id}"),
        }
    }
}

/// Who a comment is posted as.
#[derive(Debug, Clone)]
pub(crate) enum Commenter {
    /// The session's account, under its default pseudonym.
    Account,
    /// An unauthenticated commenter; the archive requires both fields.
    Guest { name: String, email: String },
}

/// Options for creating a bookmark.
#[derive(Debug, Clone, Default)]
pub struct BookmarkOptions {
    /// Free-form bookmarker notes.
    pub notes: String,
    /// Bookmarker's tags.
    pub tags: Vec<String>,
    /// Names of collections to file the bookmark under.
    pub collections: Vec<String>,
    /// Hide the bookmark from other users.
    pub private: bool,
    /// Mark the bookmark as a recommendation.
    pub recommend: bool,
}

/// Leaves kudos on a work. `Ok(true)` means the kudos was recorded,
/// `Ok(false)` that this account already left kudos there.
pub(crate) fn kudos(
    transport: &Transport,
    session: &Session,
    work_id: u64,
    token: &str,
) -> Result<bool> {
    if !session.is_authenticated() {
        return Err(ArchiveError::AuthRequired);
    }

    let referer = format!("{BASE_URL}/works/{work_id}");
    let form = [
        ("authenticity_token", token.to_string()),
        ("kudo[commentable_id]", work_id.to_string()),
        ("kudo[commentable_type]", "Work".to_string()),
    ];
    let headers = [
        ("x-csrf-token", token.to_string()),
        ("x-requested-with", "XMLHttpRequest".to_string()),
        ("referer", referer),
    ];
    let response =
        transport.post_form(&format!("{BASE_URL}/kudos.js"), Some(session), &form, &headers, true)?;

    let status = response.status().as_u16();
    let body = response.text()?;
    kudos_outcome(status, &body, work_id)
}

/// Interprets the kudos endpoint's reply: 201 records the kudos, a 422
/// carries a JSON error object naming the reason.
fn kudos_outcome(status: u16, body: &str, work_id: u64) -> Result<bool> {
    match status {
        201 => Ok(true),
        422 => match error_keys(body) {
            keys if keys.iter().any(|k| k == "auth_error") => Err(ArchiveError::StaleToken),
            keys if keys.iter().any(|k| k == "user_id" || k == "ip_address") => Ok(false),
            keys if keys.iter().any(|k| k == "no_commentable") => {
                Err(ArchiveError::InvalidId { kind: "work", id: work_id.to_string() })
            }
            _ => Err(ArchiveError::UnexpectedResponse { status: 422, body: body.to_string() }),
        },
        _ => Err(ArchiveError::UnexpectedResponse { status, body: body.to_string() }),
    }
}

/// Posts a comment (or a reply when `reply_to` is set).
pub(crate) fn post_comment(
    transport: &Transport,
    session: &Session,
    target: CommentTarget,
    text: &str,
    reply_to: Option<u64>,
    commenter: Commenter,
    token: &str,
) -> Result<()> {
    let mut form = vec![
        (target.id_field(), target.id().to_string()),
        ("authenticity_token", token.to_string()),
        ("comment[comment_content]", text.to_string()),
    ];
    if let Some(parent) = reply_to {
        form.push(("comment_id", parent.to_string()));
    }
    match commenter {
        Commenter::Account => {
            if !session.is_authenticated() {
                return Err(ArchiveError::AuthRequired);
            }
            let pseud = resolve_pseud(transport, session, &target.referer(), "comment[pseud_id]")?;
            form.push(("comment[pseud_id]", pseud));
        }
        Commenter::Guest { name, email } => {
            if name.is_empty() || email.is_empty() {
                return Err(ArchiveError::MissingCapability {
                    what: "guest comments need both a name and an email".to_string(),
                });
            }
            form.push(("comment[name]", name));
            form.push(("comment[email]", email));
        }
    }

    let headers = [
        ("x-csrf-token", token.to_string()),
        ("x-requested-with", "XMLHttpRequest".to_string()),
    ];
    let response = transport.post_form(
        &format!("{BASE_URL}/comments.js"),
        Some(session),
        &form,
        &headers,
        true,
    )?;

    match response.status() {
        StatusCode::CREATED => Ok(()),
        // The archive answers the XHR with a 404 carrying the rendered
        // comment when the post succeeded on a threaded target; an empty
        // 404 means the target id is wrong.
        StatusCode::NOT_FOUND => {
            let body = response.text()?;
            if body.is_empty() {
                Err(ArchiveError::InvalidId {
                    kind: match target {
                        CommentTarget::Work(_) => "work",
                        CommentTarget::Chapter(_) => "chapter",
                    },
                    id: target.id().to_string(),
                })
            } else {
                Ok(())
            }
        }
        StatusCode::OK => Err(ArchiveError::DuplicateComment),
        StatusCode::UNPROCESSABLE_ENTITY => {
            let body = response.text()?;
            if error_keys(&body).iter().any(|k| k == "auth_error") {
                Err(ArchiveError::StaleToken)
            } else {
                Err(ArchiveError::UnexpectedResponse { status: 422, body })
            }
        }
        _ => unexpected(response),
    }
}

/// Deletes a comment owned by (or moderated by) the session's account.
///
/// The endpoint answers 200 both on success and on failure; the outcome is
/// read from the rendered page.
pub(crate) fn delete_comment(
    transport: &Transport,
    session: &Session,
    comment_id: u64,
    token: &str,
) -> Result<()> {
    if !session.is_authenticated() {
        return Err(ArchiveError::PermissionDenied);
    }

    let form = [
        ("authenticity_token", token.to_string()),
        ("_method", "delete".to_string()),
    ];
    let response = transport.post_form(
        &format!("{BASE_URL}/comments/{comment_id}"),
        Some(session),
        &form,
        &[],
        true,
    )?;
    let page = Page::parse(response.text()?);

    if page
        .text_of("title")
        .is_some_and(|title| title.to_lowercase().contains("auth error"))
    {
        return Err(ArchiveError::StaleToken);
    }
    if page
        .text_of("div#main")
        .is_some_and(|text| text.to_lowercase().contains("you don't have permission"))
    {
        return Err(ArchiveError::PermissionDenied);
    }
    Ok(())
}

/// Subscribes the session's account to a work, series or user.
///
/// `kind` is the archive's subscribable type name (`Work`, `Series`,
/// `User`); `target` is the work/series id or the username.
pub(crate) fn subscribe(
    transport: &Transport,
    session: &Session,
    kind: &'static str,
    target: &str,
    token: &str,
) -> Result<()> {
    let username = require_account(session)?;
    let url = format!("{BASE_URL}/users/{username}/subscriptions");
    let form = [
        ("authenticity_token", token.to_string()),
        ("subscription[subscribable_id]", target.to_string()),
        ("subscription[subscribable_type]", kind.to_string()),
    ];
    let response = transport.post_form(&url, Some(session), &form, &[], false)?;
    decode_redirect_outcome(response, kind, target)
}

/// Removes a subscription by its subscription id.
pub(crate) fn unsubscribe(
    transport: &Transport,
    session: &Session,
    kind: &'static str,
    target: &str,
    subscription_id: u64,
    token: &str,
) -> Result<()> {
    let username = require_account(session)?;
    let url = format!("{BASE_URL}/users/{username}/subscriptions/{subscription_id}");
    let form = [
        ("authenticity_token", token.to_string()),
        ("subscription[subscribable_id]", target.to_string()),
        ("subscription[subscribable_type]", kind.to_string()),
        ("_method", "delete".to_string()),
    ];
    let response = transport.post_form(&url, Some(session), &form, &[], false)?;
    decode_redirect_outcome(response, kind, target)
}

/// Bookmarks a work under the account's pseudonym.
pub(crate) fn bookmark(
    transport: &Transport,
    session: &Session,
    work_id: u64,
    options: &BookmarkOptions,
    token: &str,
) -> Result<()> {
    require_account(session)?;
    let referer = format!("{BASE_URL}/works/{work_id}");
    let pseud = resolve_pseud(transport, session, &referer, "bookmark[pseud_id]")?;

    let form = [
        ("authenticity_token", token.to_string()),
        ("bookmark[pseud_id]", pseud),
        ("bookmark[bookmarker_notes]", options.notes.clone()),
        ("bookmark[tag_string]", options.tags.join(",")),
        ("bookmark[collection_names]", options.collections.join(",")),
        ("bookmark[private]", u8::from(options.private).to_string()),
        ("bookmark[rec]", u8::from(options.recommend).to_string()),
        ("commit", "Create".to_string()),
    ];
    let url = format!("{BASE_URL}/works/{work_id}/bookmarks");
    let response = transport.post_form(&url, Some(session), &form, &[], false)?;
    decode_redirect_outcome(response, "work", &work_id.to_string())
}

/// Deletes a bookmark by its bookmark id.
pub(crate) fn delete_bookmark(
    transport: &Transport,
    session: &Session,
    bookmark_id: u64,
    token: &str,
) -> Result<()> {
    require_account(session)?;
    let form = [
        ("authenticity_token", token.to_string()),
        ("_method", "delete".to_string()),
    ];
    let url = format!("{BASE_URL}/bookmarks/{bookmark_id}");
    let response = transport.post_form(&url, Some(session), &form, &[], false)?;
    decode_redirect_outcome(response, "bookmark", &bookmark_id.to_string())
}

/// Reads the account's pseudonym id off a form on the referer page.
///
/// The archive renders it either as a hidden input (single pseud) or as a
/// select with the default pseud marked selected.
pub(crate) fn resolve_pseud(
    transport: &Transport,
    session: &Session,
    referer: &str,
    field: &str,
) -> Result<String> {
    let page = transport.get_page(referer, Some(session))?;
    if let Some(value) = page.attr_of(&format!(r#"input[name="{field}"]"#), "value") {
        return Ok(value);
    }

    let options = page.select_all(&format!(r#"select[name="{field}"] option"#));
    let selected = options
        .iter()
        .find(|option| option.value().attr("selected").is_some())
        .or_else(|| options.first());
    selected
        .and_then(|option| option.value().attr("value"))
        .map(str::to_string)
        .ok_or_else(|| ArchiveError::MissingCapability {
            what: "could not find a pseudonym id to post under".to_string(),
        })
}

fn require_account(session: &Session) -> Result<String> {
    if !session.is_authenticated() {
        return Err(ArchiveError::AuthRequired);
    }
    session.username().ok_or(ArchiveError::AuthRequired)
}

/// Subscription and bookmark posts answer with a redirect on success; a
/// redirect to the auth error page means the token went stale, anything
/// other than a redirect means the target id was wrong.
fn decode_redirect_outcome(response: Response, kind: &'static str, id: &str) -> Result<()> {
    let status = response.status().as_u16();
    let location = response
        .headers()
        .get(reqwest::header::LOCATION)
        .and_then(|value| value.to_str().ok());
    redirect_outcome(status, location, kind, id)
}

fn redirect_outcome(
    status: u16,
    location: Option<&str>,
    kind: &'static str,
    id: &str,
) -> Result<()> {
    if status != 302 {
        return Err(ArchiveError::InvalidId { kind, id: id.to_string() });
    }
    if location.unwrap_or_default().ends_with("/auth_error") {
        return Err(ArchiveError::StaleToken);
    }
    Ok(())
}

/// Keys of the `errors` object in a 422 response body.
fn error_keys(body: &str) -> Vec<String> {
    serde_json::from_str::<serde_json::Value>(body)
        .ok()
        .and_then(|json| {
            json.get("errors").and_then(|errors| {
                errors
                    .as_object()
                    .map(|map| map.keys().cloned().collect())
            })
        })
        .unwrap_or_default()
}

fn unexpected<T>(response: Response) -> Result<T> {
    let status = response.status().as_u16();
    let body = response.text().unwrap_or_default();
    Err(ArchiveError::UnexpectedResponse { status, body })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_keys_from_422_body() {
        let body = r#"{"errors":{"user_id":["has already left kudos here :)"]}}"#;
        assert_eq!(error_keys(body), vec!["user_id"]);
        assert!(error_keys("not json").is_empty());
        assert!(error_keys(r#"{"errors":[]}"#).is_empty());
    }

    #[test]
    fn test_kudos_outcome_mapping() {
        use crate::ArchiveError;

        assert!(kudos_outcome(201, "", 7).unwrap());

        let duplicate = r#"{"errors":{"user_id":["has already left kudos here :)"]}}"#;
        assert!(!kudos_outcome(422, duplicate, 7).unwrap());
        let by_ip = r#"{"errors":{"ip_address":["has already left kudos here :)"]}}"#;
        assert!(!kudos_outcome(422, by_ip, 7).unwrap());

        let stale = r#"{"errors":{"auth_error":["invalid token"]}}"#;
        assert!(matches!(kudos_outcome(422, stale, 7), Err(ArchiveError::StaleToken)));

        let gone = r#"{"errors":{"no_commentable":["what?"]}}"#;
        assert!(matches!(
            kudos_outcome(422, gone, 7),
            Err(ArchiveError::InvalidId { kind: "work", .. })
        ));

        assert!(matches!(
            kudos_outcome(500, "", 7),
            Err(ArchiveError::UnexpectedResponse { status: 500, .. })
        ));
    }

    #[test]
    fn test_redirect_outcome_mapping() {
        use crate::ArchiveError;

        assert!(redirect_outcome(302, Some("/users/alice"), "work", "7").is_ok());
        assert!(redirect_outcome(302, None, "work", "7").is_ok());
        assert!(matches!(
            redirect_outcome(302, Some("/auth_error"), "work", "7"),
            Err(ArchiveError::StaleToken)
        ));
        assert!(matches!(
            redirect_outcome(302, Some("https://example.org/auth_error"), "work", "7"),
            Err(ArchiveError::StaleToken)
        ));
        assert!(matches!(
            redirect_outcome(200, None, "series", "9"),
            Err(ArchiveError::InvalidId { kind: "series", .. })
        ));
    }

    #[test]
    fn test_comment_target_fields() {
        let work = CommentTarget::Work(7);
        assert_eq!(work.id_field(), "work_id");
        assert!(work.referer().ends_with("/works/7"));

        let chapter = CommentTarget::Chapter(9);
        assert_eq!(chapter.id_field(), "chapter_id");
        assert!(chapter.referer().ends_with("/chapters/9"));
    }

    #[test]
    fn test_bookmark_options_default_to_public() {
        let options = BookmarkOptions::default();
        assert!(!options.private);
        assert!(!options.recommend);
        assert!(options.tags.is_empty());
    }
}
