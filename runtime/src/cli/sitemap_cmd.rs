//! `jobscout sitemap <url>`: show which posts a sitemap yields for a window.

use anyhow::{Context, Result};
use jobscout::{
    DateWindow, DiscoveryMode, DiscoveryRequest, DomainLeases, LeasedTransport, PostDiscovery,
    ThreatLevel,
};
use std::sync::Arc;

use crate::acquisition::http_client::{HttpClient, HttpClientConfig};
use crate::cartography::discovery::SiteDiscovery;
use crate::cli::output;

pub async fn run(url: &str, window: DateWindow, limit: usize, http: HttpClientConfig) -> Result<()> {
    let client = Arc::new(HttpClient::new(http).context("failed to create HTTP client")?);
    let transport = LeasedTransport::new(
        client,
        Arc::new(DomainLeases::new()),
        ThreatLevel::None.floor_delay(),
    );
    let request = DiscoveryRequest {
        mode: DiscoveryMode::Sitemap,
        url: url.to_string(),
        window,
        max_urls: u32::MAX,
    };

    let found = SiteDiscovery::new()
        .discover_posts(&request, &transport)
        .await
        .with_context(|| format!("failed to read sitemap {url}"))?;

    if output::is_json() {
        output::print_json(&serde_json::json!({
            "sitemap": url,
            "window": window,
            "requests": found.requests_made,
            "observations": found.observations,
            "posts": found.posts,
        }));
        return Ok(());
    }

    output::say(format!("  Sitemap:  {url}"));
    output::say(format!("  Window:   {window}"));
    for observation in &found.observations {
        output::say(format!("  Learned:  {}", serde_json::to_string(observation)?));
    }
    output::say(format!(
        "  Found {} posts in {} requests",
        found.posts.len(),
        found.requests_made
    ));
    for post in found.posts.iter().take(limit) {
        let date = post
            .published
            .map(|d| d.to_string())
            .unwrap_or_else(|| "----------".to_string());
        output::say(format!("    {date}  {}", post.url));
    }
    if found.posts.len() > limit {
        output::say(format!("    ... and {} more", found.posts.len() - limit));
    }
    Ok(())
}
