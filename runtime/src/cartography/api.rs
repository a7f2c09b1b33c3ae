//! WordPress REST API discovery.
//!
//! Many job boards run on WordPress, which advertises its REST root with
//! `<link rel="https://api.w.org/">` and lists posts in a date range at
//! `wp/v2/posts?after=&before=`.

use chrono::NaiveDate;
use jobscout::{DateWindow, DiscoveredPost};
use scraper::{Html, Selector};
use serde::Deserialize;

pub const PER_PAGE: u32 = 100;

/// Minimal projection of a `wp/v2/posts` item.
#[derive(Debug, Clone, Deserialize)]
pub struct WpPost {
    pub link: String,
    #[serde(default)]
    pub date: Option<String>,
}

/// REST root advertised by a WordPress page, if any.
pub fn detect_api_root(html: &str, page_url: &str) -> Option<String> {
    let document = Html::parse_document(html);
    let selector = Selector::parse(r#"link[rel="https://api.w.org/"][href]"#).ok()?;
    let href = document.select(&selector).next()?.value().attr("href")?;
    let base = url::Url::parse(page_url).ok()?;
    base.join(href.trim()).ok().map(|u| u.to_string())
}

/// Posts query for `window` against a REST root (or a posts endpoint).
pub fn posts_url(api_root: &str, window: &DateWindow, page: u32) -> String {
    let endpoint = if api_root.contains("/wp/v2/posts") {
        api_root.split('?').next().unwrap_or(api_root).to_string()
    } else if api_root.contains("rest_route=") {
        return format!(
            "{}/wp/v2/posts&after={}T00:00:00&before={}T23:59:59&per_page={PER_PAGE}&page={page}&_fields=link,date",
            api_root.trim_end_matches('/'),
            window.start,
            window.end
        );
    } else {
        format!("{}/wp/v2/posts", api_root.trim_end_matches('/'))
    };
    format!(
        "{endpoint}?after={}T00:00:00&before={}T23:59:59&per_page={PER_PAGE}&page={page}&_fields=link,date",
        window.start, window.end
    )
}

/// Parse a posts response into discovered posts.
pub fn parse_posts(body: &str) -> serde_json::Result<Vec<DiscoveredPost>> {
    let posts: Vec<WpPost> = serde_json::from_str(body)?;
    Ok(posts
        .into_iter()
        .map(|p| {
            let published = p
                .date
                .as_deref()
                .and_then(|d| NaiveDate::parse_from_str(d.get(..10).unwrap_or(d), "%Y-%m-%d").ok());
            DiscoveredPost::new(p.link, published)
        })
        .collect())
}
