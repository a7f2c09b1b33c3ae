//! Apply-link scoring for a fetched job post.
//!
//! Candidates come from three scans of decreasing context strength:
//! 1. Table rows whose text mentions applying.
//! 2. Anchors wrapping or following a short "Apply Link"-style label.
//! 3. Every off-site anchor, when the title yields company keywords.
//!
//! Each candidate starts from its scan's base weight and is boosted when the
//! URL carries a company keyword or a careers term. The highest score wins if
//! it clears the policy threshold.

use scraper::{ElementRef, Html, Node, Selector};
use serde::{Deserialize, Serialize};

use crate::world_model::normalize_domain;

/// Words in a post title that never identify the hiring company.
const TITLE_STOPWORDS: &[&str] = &[
    "off", "campus", "hiring", "recruitment", "job", "vacancy", "careers", "freshers", "apply",
    "online", "drive", "engineer", "developer", "analyst", "manager", "specialist",
];

/// Social networks and link shorteners never accepted as apply links.
const BLACKLISTED_DOMAINS: &[&str] = &[
    "telegram.org", "telegram.me", "t.me", "whatsapp.com", "wa.me", "facebook.com", "fb.com",
    "fb.me", "instagram.com", "youtube.com", "youtu.be", "linkedin.com", "lnkd.in",
    "twitter.com", "x.com", "discord.com", "discord.gg", "pinterest.com", "reddit.com",
    "tiktok.com", "snapchat.com", "openinapp.co", "openinapp.link", "linktr.ee", "bit.ly",
    "goo.gl", "tinyurl.com", "cutt.ly",
];

/// Labels that usually sit right next to the apply link.
const CONTEXT_LABELS: &[&str] = &[
    "Apply Link",
    "Click Here",
    "Official Notification",
    "Apply Online",
    "Registration Link",
];

const ROW_TERMS: &[&str] = &["apply", "link", "click here"];
const CAREER_TERMS: &[&str] = &["career", "jobs", "recruitment"];
const MAX_LABEL_CHARS: usize = 100;

/// Named weights for the scans and boosts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoringPolicy {
    pub table_context: f64,
    pub keyword_context: f64,
    pub global_scan: f64,
    pub company_boost: f64,
    pub career_boost: f64,
    /// Minimum winning score.
    pub threshold: f64,
}

impl Default for ScoringPolicy {
    fn default() -> Self {
        Self {
            table_context: 90.0,
            keyword_context: 90.0,
            global_scan: 10.0,
            company_boost: 50.0,
            career_boost: 20.0,
            threshold: 30.0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Candidate {
    pub link: String,
    pub text: String,
    pub score: f64,
    pub context: String,
}

/// The accepted apply link of a post.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LinkMatch {
    pub title: String,
    pub link: String,
    pub text: String,
    pub context: String,
    pub score: f64,
}

/// Everything the scorer learned about one page.
#[derive(Debug, Clone)]
pub struct PageAnalysis {
    pub title: String,
    pub keywords: Vec<String>,
    /// Sorted by score, highest first; ties keep discovery order.
    pub candidates: Vec<Candidate>,
}

#[derive(Debug, Clone, Default)]
pub struct LinkScorer {
    policy: ScoringPolicy,
}

impl LinkScorer {
    pub fn new(policy: ScoringPolicy) -> Self {
        Self { policy }
    }

    pub fn policy(&self) -> &ScoringPolicy {
        &self.policy
    }

    pub fn best_link(&self, html: &str, post_url: &str) -> Option<LinkMatch> {
        let analysis = self.analyze(html, post_url);
        let winner = analysis.candidates.into_iter().next()?;
        if winner.score < self.policy.threshold {
            return None;
        }
        Some(LinkMatch {
            title: analysis.title,
            link: winner.link,
            text: winner.text,
            context: winner.context,
            score: winner.score,
        })
    }

    pub fn analyze(&self, html: &str, post_url: &str) -> PageAnalysis {
        let document = Html::parse_document(html);
        let title = page_title(&document);
        let keywords = company_keywords(&title);
        let post_domain = normalize_domain(post_url);

        let mut scan = Scan {
            policy: &self.policy,
            keywords: &keywords,
            post_domain: &post_domain,
            candidates: Vec::new(),
        };

        // 1. table rows
        if let (Ok(rows), Ok(anchors)) = (Selector::parse("tr"), Selector::parse("a")) {
            for row in document.select(&rows) {
                let row_text = element_text(&row, " ").to_lowercase();
                if ROW_TERMS.iter().any(|t| row_text.contains(t)) {
                    for link in row.select(&anchors) {
                        scan.add(link, "Table Context", self.policy.table_context);
                    }
                }
            }
        }

        // 2. anchors wrapping or following a context label
        let nodes: Vec<_> = document.tree.root().descendants().collect();
        for label in CONTEXT_LABELS {
            let needle = label.to_lowercase();
            for (pos, node) in nodes.iter().enumerate() {
                let Node::Text(text) = node.value() else {
                    continue;
                };
                let text: &str = text;
                if !text.to_lowercase().contains(&needle) || text.chars().count() > MAX_LABEL_CHARS {
                    continue;
                }
                if let Some(parent) = node
                    .ancestors()
                    .filter_map(ElementRef::wrap)
                    .find(|el| el.value().name() == "a")
                {
                    scan.add(parent, &format!("Keyword ({label})"), self.policy.keyword_context);
                }
                if let Some(next) = nodes[pos + 1..]
                    .iter()
                    .filter_map(|n| ElementRef::wrap(*n))
                    .find(|el| el.value().name() == "a")
                {
                    scan.add(next, &format!("Next to ({label})"), self.policy.keyword_context);
                }
            }
        }

        // 3. global scan
        if !keywords.is_empty() {
            if let Ok(anchors) = Selector::parse("a[href]") {
                for link in document.select(&anchors) {
                    scan.add(link, "Global Smart Scan", self.policy.global_scan);
                }
            }
        }

        let mut candidates = scan.candidates;
        candidates.sort_by(|a, b| b.score.total_cmp(&a.score));
        PageAnalysis {
            title,
            keywords,
            candidates,
        }
    }
}

struct Scan<'a> {
    policy: &'a ScoringPolicy,
    keywords: &'a [String],
    post_domain: &'a str,
    candidates: Vec<Candidate>,
}

impl Scan<'_> {
    fn add(&mut self, link: ElementRef<'_>, context: &str, base: f64) {
        let Some(href) = link.value().attr("href").map(str::trim) else {
            return;
        };
        let Some(host) = external_host(href) else {
            return;
        };
        if is_same_site(&host, self.post_domain) || is_blacklisted(&host) {
            return;
        }

        let lower = href.to_lowercase();
        let mut score = base;
        let mut boosts = Vec::new();
        if self.keywords.iter().any(|k| lower.contains(k.as_str())) {
            score += self.policy.company_boost;
            boosts.push("CompanyURL");
        }
        if CAREER_TERMS.iter().any(|t| lower.contains(t)) {
            score += self.policy.career_boost;
            boosts.push("CareerTerm");
        }
        let context = if boosts.is_empty() {
            context.to_string()
        } else {
            format!("{context} ({})", boosts.join(", "))
        };

        self.candidates.push(Candidate {
            link: href.to_string(),
            text: element_text(&link, " "),
            score,
            context,
        });
    }
}

/// Host of an absolute http(s) URL.
fn external_host(href: &str) -> Option<String> {
    let parsed = url::Url::parse(href).ok()?;
    if !matches!(parsed.scheme(), "http" | "https") {
        return None;
    }
    parsed.host_str().map(str::to_lowercase)
}

/// `host` is the post's own domain or one of its subdomains.
fn is_same_site(host: &str, post_domain: &str) -> bool {
    let host = host.strip_prefix("www.").unwrap_or(host);
    let post_host = post_domain.split(':').next().unwrap_or(post_domain);
    !post_host.is_empty() && (host == post_host || host.ends_with(&format!(".{post_host}")))
}

fn is_blacklisted(host: &str) -> bool {
    BLACKLISTED_DOMAINS
        .iter()
        .any(|b| host == *b || host.ends_with(&format!(".{b}")))
}

/// First `h1`, then `<title>`, then a placeholder.
pub fn page_title(document: &Html) -> String {
    for selector in ["h1", "title"] {
        if let Ok(sel) = Selector::parse(selector) {
            if let Some(el) = document.select(&sel).next() {
                let text = element_text(&el, " ");
                if !text.is_empty() {
                    return text;
                }
            }
        }
    }
    "Unknown Title".to_string()
}

/// Words from a post title that likely name the hiring company.
pub fn company_keywords(title: &str) -> Vec<String> {
    let cleaned: String = title
        .to_lowercase()
        .chars()
        .filter(|c| c.is_ascii_alphanumeric() || c.is_whitespace())
        .collect();
    let mut keywords: Vec<String> = Vec::new();
    for word in cleaned.split_whitespace() {
        let is_year = word.len() == 4 && word.chars().all(|c| c.is_ascii_digit());
        if word.len() > 3
            && !is_year
            && !TITLE_STOPWORDS.contains(&word)
            && !keywords.iter().any(|k| k == word)
        {
            keywords.push(word.to_string());
        }
    }
    keywords
}

fn element_text(el: &ElementRef<'_>, sep: &str) -> String {
    el.text()
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .collect::<Vec<_>>()
        .join(sep)
}

#[cfg(test)]
mod tests {
    use super::*;

    const POST: &str = "https://jobnews.example/acme-off-campus-2025/";

    fn page(title: &str, body: &str) -> String {
        format!("<html><head><title>ignored</title></head><body><h1>{title}</h1>{body}</body></html>")
    }

    #[test]
    fn test_company_keywords() {
        assert_eq!(
            company_keywords("Acme Corp Off Campus Drive 2025 | Freshers!"),
            vec!["acme", "corp"]
        );
        assert_eq!(company_keywords("Hiring 2031 Job"), Vec::<String>::new());
        assert_eq!(company_keywords("Globex Globex Labs"), vec!["globex", "labs"]);
    }

    #[test]
    fn test_table_row_with_company_keyword_wins() {
        let html = page(
            "Acme Off Campus Drive 2025",
            r#"<p>Some intro <a href="https://partner.example/offer">offer</a></p>
               <table><tr><td>Apply Link</td>
               <td><a href="https://acme.com/apply">Click</a></td></tr></table>"#,
        );
        let analysis = LinkScorer::default().analyze(&html, POST);
        let top = &analysis.candidates[0];
        assert_eq!(top.link, "https://acme.com/apply");
        assert_eq!(top.score, 140.0);
        assert_eq!(top.context, "Table Context (CompanyURL)");

        let global_other = analysis
            .candidates
            .iter()
            .find(|c| c.link == "https://partner.example/offer")
            .unwrap();
        assert_eq!(global_other.score, 10.0);

        let winner = LinkScorer::default().best_link(&html, POST).unwrap();
        assert_eq!(winner.title, "Acme Off Campus Drive 2025");
        assert_eq!(winner.text, "Click");
    }

    #[test]
    fn test_low_score_returns_none() {
        let html = page(
            "Globex Recruitment",
            r#"<p><a href="https://example.org/page">read more</a></p>"#,
        );
        let scorer = LinkScorer::default();
        let analysis = scorer.analyze(&html, POST);
        assert_eq!(analysis.candidates.len(), 1);
        assert_eq!(analysis.candidates[0].score, 10.0);
        assert!(scorer.best_link(&html, POST).is_none());
    }

    #[test]
    fn test_keyword_parent_and_next_anchor() {
        let html = page(
            "Initech Hiring",
            r#"<p><a href="https://portal.initech.io/register">Registration Link</a></p>
               <p>Official Notification:</p><p><a href="https://files.example/notice.pdf">PDF</a></p>"#,
        );
        let analysis = LinkScorer::default().analyze(&html, POST);
        let contexts: Vec<&str> = analysis.candidates.iter().map(|c| c.context.as_str()).collect();
        assert!(contexts.contains(&"Keyword (Registration Link) (CompanyURL)"));
        assert!(contexts.contains(&"Next to (Official Notification)"));
        assert_eq!(analysis.candidates[0].score, 140.0);
    }

    #[test]
    fn test_internal_and_blacklisted_links_are_ignored() {
        let html = page(
            "Umbrella Careers Drive",
            r#"<table><tr><td>Apply here</td><td>
               <a href="https://jobnews.example/other-post">internal</a>
               <a href="https://cdn.jobnews.example/x">subdomain</a>
               <a href="https://t.me/umbrella">telegram</a>
               <a href="https://www.linkedin.com/company/umbrella">linkedin</a>
               <a href="/relative">relative</a>
               <a href="mailto:hr@umbrella.com">mail</a>
               </td></tr></table>"#,
        );
        let analysis = LinkScorer::default().analyze(&html, "https://www.jobnews.example/post");
        assert!(analysis.candidates.is_empty());
        assert!(LinkScorer::default()
            .best_link(&html, "https://www.jobnews.example/post")
            .is_none());
    }

    #[test]
    fn test_career_boost_without_keywords() {
        let html = page(
            "Hiring 2025",
            r#"<table><tr><td>Click here</td><td><a href="https://example.com/jobs/42">Open</a></td></tr></table>"#,
        );
        let winner = LinkScorer::default().best_link(&html, POST).unwrap();
        assert_eq!(winner.score, 110.0);
        assert_eq!(winner.context, "Table Context (CareerTerm)");
    }

    #[test]
    fn test_long_labels_are_not_context() {
        let long = format!("Apply Link {}", "x".repeat(120));
        let html = page(
            "Hiring",
            &format!(r#"<p>{long}</p><a href="https://example.com/a">a</a>"#),
        );
        assert!(LinkScorer::default().analyze(&html, POST).candidates.is_empty());
    }

    #[test]
    fn test_title_fallbacks() {
        let doc = Html::parse_document("<html><head><title> Only Title </title></head></html>");
        assert_eq!(page_title(&doc), "Only Title");
        let doc = Html::parse_document("<p>nothing</p>");
        assert_eq!(page_title(&doc), "Unknown Title");
    }

    #[test]
    fn test_custom_threshold() {
        let html = page(
            "Globex Recruitment",
            r#"<p><a href="https://example.org/page">read more</a></p>"#,
        );
        let scorer = LinkScorer::new(ScoringPolicy {
            threshold: 5.0,
            ..ScoringPolicy::default()
        });
        assert_eq!(scorer.best_link(&html, POST).unwrap().score, 10.0);
    }
}
