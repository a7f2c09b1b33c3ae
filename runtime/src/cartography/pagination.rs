//! Listing-page heuristics: which links are posts, when they were
//! published, and where the next page is.

use chrono::NaiveDate;
use jobscout::DiscoveredPost;
use regex::Regex;
use scraper::{ElementRef, Html, Selector};
use std::collections::HashSet;
use std::sync::OnceLock;

/// Class fragments of elements that wrap a single post on a listing page.
const CONTAINER_CLASSES: &[&str] = &["post", "entry", "blog", "job"];

/// URL fragments of navigation links that are never posts.
const NAVIGATION_JUNK: &[&str] = &[
    "/tag/",
    "/category/",
    "/author/",
    "#",
    "wp-content",
    "wp-includes",
    "/page/",
];

/// Posts are linked by their title; shorter link text is navigation.
const MIN_TITLE_CHARS: usize = 10;

const NEXT_TEXTS: &[&str] = &["next", "next page", "older posts", "older entries", "›", "»", ">"];

fn url_date_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"/(\d{4})/(\d{2})/(\d{2})/").expect("url date regex is valid"))
}

/// Publish date encoded in a `/YYYY/MM/DD/` URL path.
pub fn date_from_url(url: &str) -> Option<NaiveDate> {
    let caps = url_date_regex().captures(url)?;
    NaiveDate::from_ymd_opt(
        caps[1].parse().ok()?,
        caps[2].parse().ok()?,
        caps[3].parse().ok()?,
    )
}

/// Post links on a listing page, in page order, with whatever publish date
/// the URL or the post's container reveals.
pub fn find_article_links(html: &str, base_url: &str) -> Vec<DiscoveredPost> {
    let document = Html::parse_document(html);
    let Ok(base) = url::Url::parse(base_url) else {
        return Vec::new();
    };
    let Ok(anchors) = Selector::parse("a[href]") else {
        return Vec::new();
    };

    // each link takes the date of its innermost post container
    let mut found: Vec<(ElementRef<'_>, Option<NaiveDate>)> = document
        .select(&anchors)
        .filter_map(|link| {
            let container = link
                .ancestors()
                .filter_map(ElementRef::wrap)
                .find(is_post_container)?;
            Some((link, container_date(&container)))
        })
        .collect();
    if found.is_empty() {
        found = document.select(&anchors).map(|a| (a, None)).collect();
    }

    let base_host = base.host_str().unwrap_or_default().to_string();
    let page_root = base.as_str().trim_end_matches('/').to_string();
    let mut seen = HashSet::new();
    let mut posts = Vec::new();
    for (link, container_date) in found {
        let Some(href) = link.value().attr("href") else {
            continue;
        };
        let Ok(full) = base.join(href.trim()) else {
            continue;
        };
        if full.host_str() != Some(base_host.as_str()) {
            continue;
        }
        let full = full.to_string();
        let lower = full.to_lowercase();
        if NAVIGATION_JUNK.iter().any(|j| lower.contains(j)) {
            continue;
        }
        if full.trim_end_matches('/') == page_root {
            continue;
        }
        let text: String = link.text().collect::<String>().trim().to_string();
        if text.chars().count() < MIN_TITLE_CHARS {
            continue;
        }
        if seen.insert(full.clone()) {
            let published = date_from_url(&full).or(container_date);
            posts.push(DiscoveredPost::new(full, published));
        }
    }
    posts
}

fn is_post_container(element: &ElementRef<'_>) -> bool {
    let value = element.value();
    value.name() == "article"
        || (value.name() == "div"
            && value.attr("class").is_some_and(|class| {
                let class = class.to_lowercase();
                CONTAINER_CLASSES.iter().any(|c| class.contains(c))
            }))
}

/// Date from `<time datetime>` or `itemprop="datePublished"` inside a post container.
fn container_date(container: &ElementRef<'_>) -> Option<NaiveDate> {
    let selector = Selector::parse("time[datetime], [itemprop=datePublished]").ok()?;
    container.select(&selector).find_map(|el| {
        let raw = el
            .value()
            .attr("datetime")
            .or_else(|| el.value().attr("content"))?;
        crate::cartography::sitemap::parse_day(raw)
    })
}

/// URL of the next listing page, if the page links one.
pub fn find_next_page(html: &str, current_url: &str) -> Option<String> {
    let document = Html::parse_document(html);
    let base = url::Url::parse(current_url).ok()?;
    let resolve = |href: &str| base.join(href.trim()).ok().map(|u| u.to_string());

    for rel_next in ["link[rel=next][href]", "a[rel~=next][href]"] {
        if let Ok(selector) = Selector::parse(rel_next) {
            if let Some(href) = document
                .select(&selector)
                .next()
                .and_then(|el| el.value().attr("href"))
            {
                return resolve(href);
            }
        }
    }

    let anchors = Selector::parse("a[href]").ok()?;
    document.select(&anchors).find_map(|a| {
        let text = a.text().collect::<String>().trim().to_lowercase();
        let href = a.value().attr("href")?;
        let looks_next = NEXT_TEXTS.contains(&text.as_str()) || text.contains("next page");
        let paginated = href.contains("/page/") || href.contains("paged=");
        if looks_next && paginated {
            resolve(href)
        } else {
            None
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    const LISTING: &str = r#"<html><body>
        <nav><a href="/">Home</a><a href="/category/it-jobs/">IT Jobs Category Archive</a></nav>
        <article class="post">
          <h2><a href="/2025/03/05/acme-hiring-freshers/">Acme Hiring Freshers 2025</a></h2>
          <a href="/2025/03/05/acme-hiring-freshers/#comments">12 comments on this post</a>
        </article>
        <div class="entry-card">
          <time datetime="2025-03-02T09:00:00+05:30">March 2</time>
          <a href="https://jobs.example.com/globex-off-campus/">Globex Off Campus Drive</a>
          <a href="https://jobs.example.com/tag/globex/">More Globex openings</a>
        </div>
        <div class="sidebar"><a href="https://other.org/some-long-title/">Partner site long title</a></div>
        <a class="next page-numbers" href="/page/2/">Next</a>
    </body></html>"#;

    #[test]
    fn test_find_article_links_filters_navigation() {
        let posts = find_article_links(LISTING, "https://jobs.example.com/");
        let urls: Vec<_> = posts.iter().map(|p| p.url.as_str()).collect();
        assert_eq!(
            urls,
            vec![
                "https://jobs.example.com/2025/03/05/acme-hiring-freshers/",
                "https://jobs.example.com/globex-off-campus/",
            ]
        );
        assert_eq!(posts[0].published, NaiveDate::from_ymd_opt(2025, 3, 5));
        assert_eq!(posts[1].published, NaiveDate::from_ymd_opt(2025, 3, 2));
    }

    #[test]
    fn test_find_article_links_falls_back_to_all_anchors() {
        let html = r#"<body><a href="/acme-careers-open-now/">Acme careers open now</a>
            <a href="/about/">About</a></body>"#;
        let posts = find_article_links(html, "https://jobs.example.com/");
        assert_eq!(posts.len(), 1);
        assert_eq!(posts[0].published, None);
    }

    #[test]
    fn test_find_next_page_variants() {
        assert_eq!(
            find_next_page(LISTING, "https://jobs.example.com/").as_deref(),
            Some("https://jobs.example.com/page/2/")
        );
        let rel = r#"<head><link rel="next" href="https://jobs.example.com/?paged=3"></head>"#;
        assert_eq!(
            find_next_page(rel, "https://jobs.example.com/?paged=2").as_deref(),
            Some("https://jobs.example.com/?paged=3")
        );
        let single_post = r#"<a href="/next-post-title/">Next</a>"#;
        assert_eq!(find_next_page(single_post, "https://jobs.example.com/x/"), None);
    }

    #[test]
    fn test_date_from_url() {
        assert_eq!(
            date_from_url("https://x.com/2024/12/31/title/"),
            NaiveDate::from_ymd_opt(2024, 12, 31)
        );
        assert_eq!(date_from_url("https://x.com/2024/13/31/title/"), None);
        assert_eq!(date_from_url("https://x.com/title/"), None);
    }
}
