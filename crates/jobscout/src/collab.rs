//! Collaborator traits: how the crawl core reaches the outside world.
//!
//! The core never performs I/O itself. Fetching pages, finding post URLs and
//! persisting results all go through these traits, so the orchestrator can be
//! driven by real HTTP adapters or by in-memory doubles.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::ScoutResult;
use crate::types::{DateWindow, DiscoveredPost, ExtractedRecord};
use crate::world_model::SiteObservation;

/// A fetched page.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchResponse {
    pub status: u16,
    pub body: String,
    /// URL after redirects.
    pub final_url: String,
}

impl FetchResponse {
    pub fn ok(url: impl Into<String>, body: impl Into<String>) -> Self {
        Self {
            status: 200,
            body: body.into(),
            final_url: url.into(),
        }
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// Polite page fetching.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Fetch a URL. Non-2xx statuses are returned, not raised; only failures
    /// to get any response are errors.
    async fn fetch(&self, url: &str, referer: Option<&str>) -> ScoutResult<FetchResponse>;

    /// Switch to a different client identity for subsequent requests.
    fn rotate_identity(&self);
}

/// How a discovery collaborator should look for posts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum DiscoveryMode {
    /// Read a sitemap (XML or HTML table).
    Sitemap,
    /// Walk a paginated listing.
    Pagination { max_pages: u32 },
    /// Query a content API endpoint.
    Api,
    /// Scan a mirrored copy of a listing page.
    Mirror,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiscoveryRequest {
    pub mode: DiscoveryMode,
    pub url: String,
    pub window: DateWindow,
    pub max_urls: u32,
}

/// Posts found plus whatever was learned about the site along the way.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Discovery {
    pub posts: Vec<DiscoveredPost>,
    pub observations: Vec<SiteObservation>,
    pub requests_made: u32,
}

/// Finds candidate post URLs inside a date window.
#[async_trait]
pub trait PostDiscovery: Send + Sync {
    /// Every request goes through `transport`, which the caller paces.
    async fn discover_posts(
        &self,
        request: &DiscoveryRequest,
        transport: &dyn Transport,
    ) -> ScoutResult<Discovery>;
}

/// Identifies a result set for naming its artifact.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunLabel {
    pub run_id: String,
    pub target: String,
    pub window: DateWindow,
}

/// Persists extracted records.
#[async_trait]
pub trait ResultSink: Send + Sync {
    /// Save the records and return where they went.
    async fn save(&self, records: &[ExtractedRecord], label: &RunLabel) -> ScoutResult<String>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fetch_response_success_range() {
        assert!(FetchResponse::ok("u", "b").is_success());
        let redirect = FetchResponse {
            status: 301,
            body: String::new(),
            final_url: "u".into(),
        };
        assert!(!redirect.is_success());
    }

    #[test]
    fn test_discovery_mode_serialization() {
        let json = serde_json::to_string(&DiscoveryMode::Pagination { max_pages: 30 }).unwrap();
        assert_eq!(json, r#"{"mode":"pagination","max_pages":30}"#);
    }
}
