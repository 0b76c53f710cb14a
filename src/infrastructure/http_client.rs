//! HTTP client for the back-office site
//!
//! Every request is authenticated with a session token carried as a cookie
//! (`<cookie_name>=<token>`). Rate limiting is not done here: callers wait
//! on the shared limiter before fetching, so probes and page fetches draw
//! from the same budget.

use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::{
    Client,
    header::{COOKIE, HeaderMap, HeaderValue, USER_AGENT},
};
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use url::Url;

use crate::infrastructure::config::{HttpClientConfig, SiteConfig};

#[derive(Error, Debug, Clone, PartialEq)]
pub enum FetchCause {
    #[error("HTTP status {0}")]
    Status(u16),

    #[error("transport error: {0}")]
    Transport(String),

    #[error("token cannot be sent as a cookie")]
    InvalidCredential,

    #[error("request cancelled")]
    Cancelled,
}

/// A page could not be fetched
#[derive(Error, Debug, Clone, PartialEq)]
#[error("failed to fetch {url}: {cause}")]
pub struct FetchError {
    pub url: String,
    pub cause: FetchCause,
}

impl FetchError {
    pub fn new(url: &str, cause: FetchCause) -> Self {
        Self {
            url: url.to_string(),
            cause,
        }
    }
}

/// `GET(url, token) -> body`, as seen by the crawler and token manager
#[async_trait]
pub trait PageFetcher: Send + Sync {
    async fn fetch(
        &self,
        url: &str,
        token: &str,
        cancel: &CancellationToken,
    ) -> Result<String, FetchError>;
}

pub struct HttpClient {
    client: Client,
    cookie_name: String,
    base_url: Url,
}

impl HttpClient {
    pub fn new(config: &HttpClientConfig, site: &SiteConfig) -> Result<Self> {
        let mut headers = HeaderMap::new();
        headers.insert(
            USER_AGENT,
            HeaderValue::from_str(&config.user_agent).context("Invalid user agent")?,
        );

        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_seconds))
            .default_headers(headers)
            .redirect(if config.follow_redirects {
                reqwest::redirect::Policy::limited(10)
            } else {
                reqwest::redirect::Policy::none()
            })
            .build()
            .context("Failed to create HTTP client")?;

        let base_url = Url::parse(&site.base_url)
            .with_context(|| format!("Invalid site base URL: {}", site.base_url))?;

        Ok(Self {
            client,
            cookie_name: site.cookie_name.clone(),
            base_url,
        })
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    fn credential(&self, token: &str) -> Option<HeaderValue> {
        HeaderValue::from_str(&format!("{}={token}", self.cookie_name)).ok()
    }
}

#[async_trait]
impl PageFetcher for HttpClient {
    async fn fetch(
        &self,
        url: &str,
        token: &str,
        cancel: &CancellationToken,
    ) -> Result<String, FetchError> {
        if cancel.is_cancelled() {
            return Err(FetchError::new(url, FetchCause::Cancelled));
        }

        let credential = self
            .credential(token)
            .ok_or_else(|| FetchError::new(url, FetchCause::InvalidCredential))?;

        tracing::debug!("Fetching URL: {}", url);

        // Cancellation only gates the start; a request on the wire runs to
        // completion or to the client timeout.
        let response = self
            .client
            .get(url)
            .header(COOKIE, credential)
            .send()
            .await
            .map_err(|e| FetchError::new(url, FetchCause::Transport(e.to_string())))?;

        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::new(url, FetchCause::Status(status.as_u16())));
        }

        let text = response
            .text()
            .await
            .map_err(|e| FetchError::new(url, FetchCause::Transport(e.to_string())))?;

        tracing::debug!("Successfully fetched: {} ({} chars)", url, text.len());
        Ok(text)
    }
}
