//! Page retrieval and HTML extraction for the station directory.
//!
//! Fetching is behind the [`PageSource`] trait so the pipeline can run against
//! canned pages. Extraction functions take raw HTML and parse it themselves.

mod index;
mod stations;

pub use index::extract_prefectures;
pub use stations::{
    RawStation, StationListing, extract_listing, extract_station, station_id_from_locator,
};

use crate::error::ScraperError;
use async_trait::async_trait;
use std::time::Duration;
use url::Url;

/// Source of HTML documents.
#[async_trait]
pub trait PageSource: Send + Sync {
    /// Fetches the document at an absolute URL and returns its body.
    async fn fetch(&self, locator: &str) -> Result<String, ScraperError>;
}

/// [`PageSource`] backed by HTTP.
pub struct HttpPageSource {
    client: reqwest::Client,
}

impl HttpPageSource {
    /// Wraps a client from [`create_http_client`], usually shared with the geocoder.
    pub fn new(client: reqwest::Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl PageSource for HttpPageSource {
    async fn fetch(&self, locator: &str) -> Result<String, ScraperError> {
        let response = self.client.get(locator).send().await?;

        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Err(ScraperError::NotFound(locator.to_string()));
        }

        let response = response.error_for_status()?;
        Ok(response.text().await?)
    }
}

/// Common HTTP client configuration.
pub fn create_http_client() -> Result<reqwest::Client, reqwest::Error> {
    reqwest::Client::builder()
        .user_agent("Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36")
        .cookie_store(true)
        .timeout(Duration::from_secs(30))
        .build()
}

/// Applies rate limiting delay.
pub async fn rate_limit(delay_sec: f64) {
    match Duration::try_from_secs_f64(delay_sec) {
        Ok(delay) if !delay.is_zero() => tokio::time::sleep(delay).await,
        _ => {}
    }
}

/// Resolves a link found on a page against the page's URL.
pub fn resolve_url(base: &str, relative: &str) -> Result<String, ScraperError> {
    if relative.starts_with("http://") || relative.starts_with("https://") {
        return Ok(relative.to_string());
    }

    let base_url =
        Url::parse(base).map_err(|e| ScraperError::InvalidUrl(format!("{}: {}", base, e)))?;
    base_url
        .join(relative)
        .map(|u| u.to_string())
        .map_err(|e| ScraperError::InvalidUrl(format!("{}: {}", relative, e)))
}

/// Last non-empty path segment of an absolute URL.
pub(crate) fn trailing_segment(locator: &str) -> Option<String> {
    let url = Url::parse(locator).ok()?;
    url.path_segments()?
        .filter(|s| !s.is_empty())
        .last()
        .map(str::to_string)
}

/// Path segment following the first `marker` segment of an absolute URL.
pub(crate) fn segment_after(locator: &str, marker: &str) -> Option<String> {
    let url = Url::parse(locator).ok()?;
    let mut segments = url.path_segments()?;
    segments.find(|s| *s == marker)?;
    segments
        .next()
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}
