//! Parse sitemap.xml, sitemap index files, and HTML sitemap tables.

use anyhow::Result;
use chrono::NaiveDate;
use quick_xml::events::Event;
use quick_xml::Reader;
use scraper::{Html, Selector};

/// An entry from a sitemap.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SitemapEntry {
    pub url: String,
    pub lastmod: Option<NaiveDate>,
}

/// A parsed XML sitemap: page entries from a `urlset`, child sitemaps from
/// a `sitemapindex`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ParsedSitemap {
    pub entries: Vec<SitemapEntry>,
    pub children: Vec<String>,
}

impl ParsedSitemap {
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty() && self.children.is_empty()
    }
}

/// Parse a sitemap XML string. Handles both urlset and sitemap index.
pub fn parse_sitemap(xml: &str) -> Result<ParsedSitemap> {
    let mut reader = Reader::from_str(xml);
    reader.config_mut().trim_text(true);
    let mut parsed = ParsedSitemap::default();
    let mut buf = Vec::new();

    let mut in_url = false;
    let mut in_sitemap = false;
    let mut current_tag = String::new();
    let mut current_loc = String::new();
    let mut current_lastmod = String::new();

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) => {
                let name = String::from_utf8_lossy(e.local_name().as_ref()).to_string();
                match name.as_str() {
                    "url" => {
                        in_url = true;
                        current_loc.clear();
                        current_lastmod.clear();
                    }
                    "sitemap" => {
                        in_sitemap = true;
                        current_loc.clear();
                    }
                    _ => current_tag = name,
                }
            }
            Ok(Event::End(e)) => {
                let name = String::from_utf8_lossy(e.local_name().as_ref()).to_string();
                match name.as_str() {
                    "url" if in_url => {
                        if !current_loc.is_empty() {
                            parsed.entries.push(SitemapEntry {
                                url: current_loc.clone(),
                                lastmod: parse_day(&current_lastmod),
                            });
                        }
                        in_url = false;
                    }
                    "sitemap" if in_sitemap => {
                        if !current_loc.is_empty() {
                            parsed.children.push(current_loc.clone());
                        }
                        in_sitemap = false;
                    }
                    _ => {}
                }
                current_tag.clear();
            }
            Ok(Event::Text(e)) => {
                let text = e.unescape().unwrap_or_default();
                let text = text.trim();
                if (in_url || in_sitemap) && current_tag == "loc" {
                    current_loc = text.to_string();
                } else if in_url && current_tag == "lastmod" {
                    current_lastmod = text.to_string();
                }
            }
            Ok(Event::CData(e)) => {
                if (in_url || in_sitemap) && current_tag == "loc" {
                    current_loc = String::from_utf8_lossy(&e.into_inner()).trim().to_string();
                }
            }
            Ok(Event::Eof) => break,
            Err(e) => return Err(anyhow::anyhow!("XML parse error: {e}")),
            _ => {}
        }
        buf.clear();
    }

    Ok(parsed)
}

/// Rows of an HTML sitemap table (`table#sitemap tbody tr`): link from the
/// first cell, date from the last.
pub fn parse_html_sitemap(html: &str, base_url: &str) -> Vec<SitemapEntry> {
    let document = Html::parse_document(html);
    let (Ok(rows), Ok(cells), Ok(anchors)) = (
        Selector::parse("table#sitemap tbody tr"),
        Selector::parse("td"),
        Selector::parse("a[href]"),
    ) else {
        return Vec::new();
    };
    let base = url::Url::parse(base_url).ok();

    let mut entries = Vec::new();
    for row in document.select(&rows) {
        let tds: Vec<_> = row.select(&cells).collect();
        let (Some(first), Some(last)) = (tds.first(), tds.last()) else {
            continue;
        };
        let Some(href) = first
            .select(&anchors)
            .next()
            .and_then(|a| a.value().attr("href"))
        else {
            continue;
        };
        let url = match &base {
            Some(base) => base.join(href).map(|u| u.to_string()).unwrap_or_else(|_| href.to_string()),
            None => href.to_string(),
        };
        let date_text = last.text().collect::<String>();
        entries.push(SitemapEntry {
            url,
            lastmod: parse_day(&date_text),
        });
    }
    entries
}

/// Whether a child sitemap likely lists posts rather than pages or taxonomies.
pub fn is_post_sitemap(url: &str) -> bool {
    let lower = url.to_lowercase();
    let name = lower.rsplit('/').next().unwrap_or(&lower);
    name.contains("post") || name.contains("job") || name.contains("article")
}

/// Calendar day of a sitemap date: the first ten characters as `YYYY-MM-DD`.
pub fn parse_day(s: &str) -> Option<NaiveDate> {
    let s = s.trim();
    let day = s.get(..10).unwrap_or(s);
    NaiveDate::parse_from_str(day, "%Y-%m-%d").ok()
}
