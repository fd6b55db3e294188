//! HTTP dispatch through the rate gate.
//!
//! The [`Transport`] owns the anonymous HTTP channel and the shared
//! [`RateGate`]; every outbound request this crate makes goes through
//! [`Transport::send`] (or one of its wrappers), which clears the call
//! through the gate first. When a [`Session`] is supplied, the request is
//! carried over that session's cookie-bearing channel instead of the
//! anonymous one.
//!
//! A 429 response is converted to [`ArchiveError::RateLimited`] here and
//! never retried; every other status is handed back for the caller to
//! interpret.

use std::sync::Arc;
use std::time::Duration;

use reqwest::blocking::{Client, Response};
use reqwest::{Method, StatusCode, header, redirect};
use url::Url;

use crate::gate::RateGate;
use crate::page::Page;
use crate::session::Session;
use crate::{ArchiveError, Result};

/// Root of the archive's URL space.
pub const BASE_URL: &str = "https://archiveofourown.org";

/// HTTP client configuration.
///
/// This struct controls timeout and user agent settings for all requests
/// made through a [`Transport`] and through sessions derived from it.
#[derive(Debug, Clone)]
pub struct TransportConfig {
    /// Request timeout in seconds.
    pub timeout: u64,
    /// Custom User-Agent string.
    pub user_agent: String,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            timeout: 30,
            user_agent: "fanarchive/0.1 (+https://github.com/fanarchive/fanarchive)".to_string(),
        }
    }
}

/// Rate-gated HTTP dispatcher.
///
/// Cheap to clone; clones share the same gate and anonymous channel.
#[derive(Debug, Clone)]
pub struct Transport {
    client: Client,
    raw_client: Client,
    gate: Arc<RateGate>,
    config: TransportConfig,
}

impl Transport {
    /// Creates a transport with default configuration over `gate`.
    pub fn new(gate: Arc<RateGate>) -> Result<Self> {
        Self::with_config(gate, TransportConfig::default())
    }

    /// Creates a transport with explicit configuration.
    pub fn with_config(gate: Arc<RateGate>, config: TransportConfig) -> Result<Self> {
        let client = build_client(&config, true, None)?;
        let raw_client = build_client(&config, false, None)?;
        Ok(Self { client, raw_client, gate, config })
    }

    /// The gate every request on this transport passes through.
    pub fn gate(&self) -> &RateGate {
        &self.gate
    }

    /// The configuration used for this transport and its sessions.
    pub fn config(&self) -> &TransportConfig {
        &self.config
    }

    /// Performs a GET, optionally over a session's channel.
    pub fn get(&self, url: &str, session: Option<&Session>) -> Result<Response> {
        self.send(Method::GET, url, session, None, &[], true)
    }

    /// Performs a GET and parses the body into a [`Page`].
    pub fn get_page(&self, url: &str, session: Option<&Session>) -> Result<Page> {
        let response = self.get(url, session)?;
        let body = response.text()?;
        Ok(Page::parse(body))
    }

    /// Submits a form POST. `follow_redirects` is off for the submissions
    /// whose redirect status carries the outcome (login, subscriptions,
    /// bookmarks).
    pub(crate) fn post_form(
        &self,
        url: &str,
        session: Option<&Session>,
        form: &[(&str, String)],
        headers: &[(&str, String)],
        follow_redirects: bool,
    ) -> Result<Response> {
        self.send(Method::POST, url, session, Some(form), headers, follow_redirects)
    }

    /// Clears the call through the rate gate, dispatches it over the right
    /// channel, and surfaces 429 as [`ArchiveError::RateLimited`].
    pub(crate) fn send(
        &self,
        method: Method,
        url: &str,
        session: Option<&Session>,
        form: Option<&[(&str, String)]>,
        headers: &[(&str, String)],
        follow_redirects: bool,
    ) -> Result<Response> {
        let parsed = Url::parse(url).map_err(|e| ArchiveError::InvalidUrl(e.to_string()))?;

        self.gate.admit();

        let client = match session {
            Some(session) => session.client(follow_redirects),
            None if follow_redirects => &self.client,
            None => &self.raw_client,
        };

        let mut request = client
            .request(method.clone(), parsed)
            .header(header::USER_AGENT, &self.config.user_agent);
        for (name, value) in headers {
            request = request.header(*name, value);
        }
        if let Some(form) = form {
            request = request.form(form);
        }

        let response = request.send()?;
        tracing::debug!(%method, %url, status = response.status().as_u16(), "request completed");

        if response.status() == StatusCode::TOO_MANY_REQUESTS {
            return Err(ArchiveError::RateLimited);
        }
        Ok(response)
    }
}

/// Builds a reqwest client for this crate.
///
/// `jar` attaches a shared cookie store (session channels); `follow`
/// selects the redirect policy.
pub(crate) fn build_client(
    config: &TransportConfig,
    follow: bool,
    jar: Option<Arc<reqwest::cookie::Jar>>,
) -> Result<Client> {
    let mut builder = Client::builder().timeout(Duration::from_secs(config.timeout));
    if !follow {
        builder = builder.redirect(redirect::Policy::none());
    }
    if let Some(jar) = jar {
        builder = builder.cookie_provider(jar);
    }
    builder.build().map_err(ArchiveError::Http)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gate::GateConfig;

    #[test]
    fn test_config_defaults() {
        let config = TransportConfig::default();
        assert_eq!(config.timeout, 30);
        assert!(config.user_agent.contains("fanarchive"));
    }

    #[test]
    fn test_invalid_url_rejected_before_dispatch() {
        let gate = Arc::new(RateGate::new(GateConfig::default()));
        let transport = Transport::new(Arc::clone(&gate)).unwrap();
        let result = transport.get("not-a-url", None);
        assert!(matches!(result, Err(ArchiveError::InvalidUrl(_))));
        // The gate is only consulted for requests that actually dispatch.
        assert_eq!(gate.total_requests(), 0);
    }

    #[test]
    fn test_clones_share_the_gate() {
        let gate = Arc::new(RateGate::new(GateConfig::default()));
        let transport = Transport::new(Arc::clone(&gate)).unwrap();
        let clone = transport.clone();
        assert!(std::ptr::eq(transport.gate(), clone.gate()));
    }
}
