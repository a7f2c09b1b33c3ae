//! Post discovery over HTTP: sitemaps, paginated listings, the WordPress
//! REST API, and mirrored listing pages.

use async_trait::async_trait;
use jobscout::{
    DateWindow, DiscoveredPost, Discovery, DiscoveryMode, DiscoveryRequest, FetchResponse,
    PostDiscovery, ScoutError, ScoutResult, SiteCapability, SiteObservation, SitemapKind,
    Transport,
};
use regex::Regex;
use std::collections::{HashSet, VecDeque};
use std::sync::OnceLock;

use super::{api, pagination, sitemap};

/// Child sitemaps followed from one sitemap index.
const MAX_CHILD_SITEMAPS: usize = 10;

/// Sitemap index nesting followed before giving up.
const MAX_SITEMAP_DEPTH: u32 = 2;

/// Pages of API results requested per discovery.
const MAX_API_PAGES: u32 = 5;

/// Markers of an interstitial challenge page.
const CHALLENGE_MARKERS: &[&str] = &[
    "cf-challenge",
    "challenge-platform",
    "cf_chl_",
    "just a moment...",
    "g-recaptcha",
    "h-captcha",
    "captcha",
];

/// Markers of a login wall.
const LOGIN_MARKERS: &[&str] = &["wp-login.php", "please log in", "sign in to continue"];

/// Statuses that describe the site's attitude toward us rather than the page.
fn is_hostile(status: u16) -> bool {
    matches!(status, 403 | 429) || status >= 500
}

/// Challenge and login markers found in a page body.
pub fn detect_protection(body: &str) -> Vec<SiteCapability> {
    let lower = body.to_lowercase();
    let mut found = Vec::new();
    if CHALLENGE_MARKERS.iter().any(|m| lower.contains(m)) {
        found.push(SiteCapability::CaptchaPresent);
        if ["cloudflare", "cf-challenge", "cf_chl_", "challenge-platform"]
            .iter()
            .any(|m| lower.contains(m))
        {
            found.push(SiteCapability::EdgeProtected);
        }
    }
    if LOGIN_MARKERS.iter().any(|m| lower.contains(m)) {
        found.push(SiteCapability::AuthenticatedOnly);
    }
    found
}

fn mirror_prefix_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?:https?://web\.archive\.org)?/web/\d+[a-z_]*/").expect("mirror prefix regex is valid")
    })
}

/// The original page behind a cache or archive URL.
pub fn unwrap_mirror(url: &str) -> String {
    if let Some(rest) = url.split_once("cache:").map(|(_, rest)| rest) {
        return rest.to_string();
    }
    if let Some((_, rest)) = url.split_once("web.archive.org/web/") {
        return match rest.find("http") {
            Some(idx) => rest[idx..].to_string(),
            None => rest.to_string(),
        };
    }
    url.to_string()
}

/// [`PostDiscovery`] over whatever [`Transport`] the caller hands in.
#[derive(Debug, Default, Clone, Copy)]
pub struct SiteDiscovery;

impl SiteDiscovery {
    pub fn new() -> Self {
        Self
    }

    async fn get(
        transport: &dyn Transport,
        url: &str,
        out: &mut Discovery,
    ) -> ScoutResult<FetchResponse> {
        out.requests_made += 1;
        let response = transport.fetch(url, None).await?;
        if is_hostile(response.status) {
            return Err(ScoutError::HttpStatus {
                status: response.status,
                url: url.to_string(),
            });
        }
        if response.is_success() {
            for capability in detect_protection(&response.body) {
                out.observations.push(SiteObservation::Capability { capability });
            }
        }
        Ok(response)
    }

    fn note_api_root(body: &str, page_url: &str, out: &mut Discovery) {
        if let Some(url) = api::detect_api_root(body, page_url) {
            out.observations.push(SiteObservation::ApiEndpoint { url });
        }
    }

    /// Entries come back in document order, child sitemaps in index order.
    async fn from_sitemap(
        transport: &dyn Transport,
        url: &str,
        window: &DateWindow,
        out: &mut Discovery,
    ) -> ScoutResult<()> {
        let mut entries = Vec::new();
        let mut queue = VecDeque::from([(url.to_string(), 0u32)]);
        let mut seen = HashSet::new();

        while let Some((sitemap_url, depth)) = queue.pop_front() {
            if !seen.insert(sitemap_url.clone()) {
                continue;
            }
            let response = match Self::get(transport, &sitemap_url, out).await {
                Ok(r) => r,
                // a broken child sitemap should not sink the others
                Err(e) if depth > 0 && e.status().is_none() => {
                    tracing::warn!("skipping child sitemap {sitemap_url}: {e}");
                    continue;
                }
                Err(e) => return Err(e),
            };
            if !response.is_success() {
                tracing::debug!("sitemap {sitemap_url} answered {}", response.status);
                continue;
            }

            match sitemap::parse_sitemap(&response.body) {
                Ok(parsed) if !parsed.is_empty() => {
                    if depth == 0 {
                        out.observations.push(SiteObservation::SitemapFound {
                            url: sitemap_url.clone(),
                            kind: SitemapKind::Xml,
                        });
                    }
                    entries.extend(parsed.entries);
                    if depth < MAX_SITEMAP_DEPTH {
                        let post_like: Vec<_> = parsed
                            .children
                            .iter()
                            .filter(|c| sitemap::is_post_sitemap(c))
                            .cloned()
                            .collect();
                        let children = if post_like.is_empty() {
                            parsed.children
                        } else {
                            post_like
                        };
                        queue.extend(
                            children
                                .into_iter()
                                .take(MAX_CHILD_SITEMAPS)
                                .map(|child| (child, depth + 1)),
                        );
                    }
                }
                _ => {
                    let rows = sitemap::parse_html_sitemap(&response.body, &sitemap_url);
                    if !rows.is_empty() && depth == 0 {
                        out.observations.push(SiteObservation::SitemapFound {
                            url: sitemap_url.clone(),
                            kind: SitemapKind::Html,
                        });
                    }
                    if depth == 0 {
                        Self::note_api_root(&response.body, &sitemap_url, out);
                    }
                    entries.extend(rows);
                }
            }
        }

        out.posts.extend(entries.into_iter().filter_map(|entry| {
            let day = entry.lastmod?;
            window
                .contains(day)
                .then(|| DiscoveredPost::new(entry.url, Some(day)))
        }));
        Ok(())
    }

    async fn from_listing(
        transport: &dyn Transport,
        url: &str,
        window: &DateWindow,
        max_pages: u32,
        max_urls: u32,
        out: &mut Discovery,
    ) -> ScoutResult<()> {
        let mut current = Some(url.to_string());
        let mut visited = HashSet::new();
        let mut page = 0;

        while let Some(page_url) = current.take() {
            if page >= max_pages || out.posts.len() >= max_urls as usize {
                break;
            }
            if !visited.insert(page_url.clone()) {
                break;
            }
            page += 1;

            let response = match Self::get(transport, &page_url, out).await {
                Ok(r) => r,
                Err(e) if page == 1 => return Err(e),
                Err(e) => {
                    tracing::warn!("stopping pagination at {page_url}: {e}");
                    break;
                }
            };
            if !response.is_success() {
                break;
            }
            let base = if response.final_url.is_empty() {
                page_url.clone()
            } else {
                response.final_url.clone()
            };
            if page == 1 {
                Self::note_api_root(&response.body, &base, out);
            }

            let mut reached_old = false;
            for post in pagination::find_article_links(&response.body, &base) {
                match post.published {
                    Some(day) if day < window.start => {
                        reached_old = true;
                        break;
                    }
                    Some(day) if day > window.end => continue,
                    _ => {}
                }
                if !out.posts.iter().any(|p| p.url == post.url) {
                    out.posts.push(post);
                }
            }
            if reached_old {
                tracing::debug!("reached posts older than {} on {page_url}", window.start);
                break;
            }

            current = pagination::find_next_page(&response.body, &base);
            if current.is_some() && page == 1 {
                out.observations.push(SiteObservation::Capability {
                    capability: SiteCapability::PaginationDetected,
                });
            }
        }
        Ok(())
    }

    async fn from_api(
        transport: &dyn Transport,
        url: &str,
        window: &DateWindow,
        out: &mut Discovery,
    ) -> ScoutResult<()> {
        for page in 1..=MAX_API_PAGES {
            let request_url = api::posts_url(url, window, page);
            let response = Self::get(transport, &request_url, out).await?;
            if !response.is_success() {
                // WordPress answers 400 past the last page
                if page > 1 {
                    break;
                }
                return Err(ScoutError::NoContent(request_url));
            }
            let posts = api::parse_posts(&response.body)
                .map_err(|_| ScoutError::Layout(format!("post list expected from {request_url}")))?;
            let count = posts.len();
            out.posts.extend(
                posts
                    .into_iter()
                    .filter(|p| p.published.map_or(true, |d| window.contains(d))),
            );
            if count < api::PER_PAGE as usize {
                break;
            }
        }
        if !out.posts.is_empty() {
            out.observations.push(SiteObservation::ApiEndpoint { url: url.to_string() });
        }
        Ok(())
    }

    async fn from_mirror(
        transport: &dyn Transport,
        url: &str,
        window: &DateWindow,
        out: &mut Discovery,
    ) -> ScoutResult<()> {
        let response = Self::get(transport, url, out).await?;
        if !response.is_success() {
            return Err(ScoutError::NoContent(url.to_string()));
        }
        let original = unwrap_mirror(url);
        let body = mirror_prefix_regex().replace_all(&response.body, "");
        out.posts.extend(
            pagination::find_article_links(&body, &original)
                .into_iter()
                .filter(|p| p.published.map_or(true, |d| window.contains(d))),
        );
        Ok(())
    }
}

#[async_trait]
impl PostDiscovery for SiteDiscovery {
    async fn discover_posts(
        &self,
        request: &DiscoveryRequest,
        transport: &dyn Transport,
    ) -> ScoutResult<Discovery> {
        let mut out = Discovery::default();
        let window = &request.window;
        let url = request.url.as_str();
        match request.mode {
            DiscoveryMode::Sitemap => Self::from_sitemap(transport, url, window, &mut out).await?,
            DiscoveryMode::Pagination { max_pages } => {
                Self::from_listing(transport, url, window, max_pages, request.max_urls, &mut out)
                    .await?
            }
            DiscoveryMode::Api => Self::from_api(transport, url, window, &mut out).await?,
            DiscoveryMode::Mirror => Self::from_mirror(transport, url, window, &mut out).await?,
        }
        tracing::debug!(
            "{:?} discovery on {} found {} posts in {} requests",
            request.mode,
            request.url,
            out.posts.len(),
            out.requests_made
        );
        Ok(out)
    }
}
