//! Strategy planning: turn a target URL and site beliefs into a ranked plan.
//!
//! Each candidate strategy gets an estimated yield and a risk in `[0, 1]`,
//! from the site's recorded performance when the strategy has been tried,
//! otherwise from fixed priors. Strategies are ranked by
//! `yield × (1 − risk) / priority`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::world_model::{SiteBelief, SiteCapability, ThreatLevel};

/// The closed set of ways to find posts on a site.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StrategyKind {
    SitemapCrawl,
    AutoDiscovery,
    ApiExtraction,
    GoogleCache,
    WaybackMachine,
}

impl StrategyKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::SitemapCrawl => "sitemap_crawl",
            Self::AutoDiscovery => "auto_discovery",
            Self::ApiExtraction => "api_extraction",
            Self::GoogleCache => "google_cache",
            Self::WaybackMachine => "wayback_machine",
        }
    }

    /// Third-party copies of the site rather than the site itself.
    pub fn is_mirror(self) -> bool {
        matches!(self, Self::GoogleCache | Self::WaybackMachine)
    }

    /// Prior `(yield, risk)` for a strategy with no history.
    pub fn prior(self) -> (f64, f64) {
        match self {
            Self::SitemapCrawl => (30.0, 0.1),
            Self::AutoDiscovery => (20.0, 0.3),
            Self::ApiExtraction => (50.0, 0.15),
            Self::GoogleCache => (5.0, 0.4),
            Self::WaybackMachine => (3.0, 0.3),
        }
    }

    fn base_priority(self) -> u32 {
        match self {
            Self::SitemapCrawl | Self::ApiExtraction => 1,
            Self::AutoDiscovery => 2,
            Self::GoogleCache => 10,
            Self::WaybackMachine => 11,
        }
    }

    /// Risk added per threat-level step.
    fn threat_weight(self) -> f64 {
        match self {
            Self::SitemapCrawl | Self::ApiExtraction => 0.1,
            Self::AutoDiscovery => 0.15,
            Self::GoogleCache | Self::WaybackMachine => 0.0,
        }
    }
}

impl std::fmt::Display for StrategyKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Per-strategy execution knobs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StrategyConfig {
    pub max_pages: u32,
    pub max_urls: u32,
    pub timeout_secs: u64,
    pub retry_count: u32,
    pub delay_secs: f64,
}

impl Default for StrategyConfig {
    fn default() -> Self {
        Self {
            max_pages: 50,
            max_urls: 100,
            timeout_secs: 30,
            retry_count: 3,
            delay_secs: 3.0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum StrategyOutcome {
    Completed { records: u32 },
    Failed { reason: String },
}

/// One ranked entry in a plan.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Strategy {
    pub kind: StrategyKind,
    pub target_url: String,
    pub priority: u32,
    pub estimated_yield: f64,
    pub risk: f64,
    pub config: StrategyConfig,
    pub attempts: u32,
    pub records: u32,
    pub last_outcome: Option<StrategyOutcome>,
}

impl Strategy {
    pub fn new(kind: StrategyKind, target_url: impl Into<String>) -> Self {
        let (estimated_yield, risk) = kind.prior();
        Self {
            kind,
            target_url: target_url.into(),
            priority: kind.base_priority(),
            estimated_yield,
            risk,
            config: StrategyConfig::default(),
            attempts: 0,
            records: 0,
            last_outcome: None,
        }
    }

    pub fn effectiveness(&self) -> f64 {
        let priority = f64::from(self.priority.max(1));
        self.estimated_yield * (1.0 - self.risk) / priority
    }
}

/// Ordered strategies plus a cursor.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Plan {
    strategies: Vec<Strategy>,
    cursor: usize,
    pub created_at: DateTime<Utc>,
}

impl Plan {
    pub fn new(strategies: Vec<Strategy>) -> Self {
        Self {
            strategies,
            cursor: 0,
            created_at: Utc::now(),
        }
    }

    pub fn empty() -> Self {
        Self::new(Vec::new())
    }

    pub fn current(&self) -> Option<&Strategy> {
        self.strategies.get(self.cursor)
    }

    pub fn current_mut(&mut self) -> Option<&mut Strategy> {
        self.strategies.get_mut(self.cursor)
    }

    /// Move past the current strategy. Returns whether one remains.
    pub fn advance(&mut self) -> bool {
        if self.cursor < self.strategies.len() {
            self.cursor += 1;
        }
        self.has_more()
    }

    pub fn has_more(&self) -> bool {
        self.cursor < self.strategies.len()
    }

    pub fn is_exhausted(&self) -> bool {
        !self.has_more()
    }

    /// The current strategy and everything after it.
    pub fn remaining(&self) -> &[Strategy] {
        &self.strategies[self.cursor..]
    }

    pub fn strategies(&self) -> &[Strategy] {
        &self.strategies
    }

    pub fn cursor(&self) -> usize {
        self.cursor
    }

    pub fn len(&self) -> usize {
        self.strategies.len()
    }

    pub fn is_empty(&self) -> bool {
        self.strategies.is_empty()
    }

    pub fn total_expected_yield(&self) -> f64 {
        self.remaining().iter().map(|s| s.estimated_yield).sum()
    }

    /// Comma-separated strategy names, for log lines.
    pub fn describe(&self) -> String {
        self.remaining()
            .iter()
            .map(|s| s.kind.as_str())
            .collect::<Vec<_>>()
            .join(", ")
    }
}

/// Generates and re-ranks plans. Holds no state of its own.
#[derive(Debug, Clone, Copy, Default)]
pub struct Planner;

impl Planner {
    pub fn new() -> Self {
        Self
    }

    pub fn generate_plan(&self, target_url: &str, site: &SiteBelief) -> Plan {
        let (sitemap_url, listing_url) = if looks_like_sitemap(target_url) {
            (target_url.to_string(), site_root(target_url))
        } else {
            let sitemap = site
                .sitemap_url
                .clone()
                .unwrap_or_else(|| format!("{}sitemap.xml", site_root(target_url)));
            (sitemap, target_url.to_string())
        };

        let mut candidates = vec![
            self.build(StrategyKind::SitemapCrawl, &sitemap_url, site),
            self.build(StrategyKind::AutoDiscovery, &listing_url, site),
        ];
        if let Some(endpoint) = site.api_endpoints.first() {
            candidates.push(self.build(StrategyKind::ApiExtraction, endpoint, site));
        }
        if site.threat == ThreatLevel::Blocked {
            candidates.push(self.build(StrategyKind::GoogleCache, &listing_url, site));
        }

        rank(&mut candidates);
        for (i, strategy) in candidates.iter_mut().enumerate() {
            strategy.priority = i as u32 + 1;
        }
        Plan::new(candidates)
    }

    /// Re-rank what is left of `plan` after a failure described by `reason`.
    pub fn replan_after_failure(&self, plan: &Plan, reason: &str, site: &SiteBelief) -> Plan {
        let mut remaining = plan.remaining().to_vec();
        if remaining.is_empty() {
            return self.fallback_plan(plan, site);
        }

        let reason = reason.to_lowercase();
        if reason.contains("429") || reason.contains("rate limit") {
            for strategy in &mut remaining {
                strategy.risk = (strategy.risk + 0.2).min(1.0);
                strategy.config.delay_secs *= 2.0;
            }
        } else if reason.contains("403") || reason.contains("blocked") {
            let has_cache = remaining
                .iter()
                .any(|s| s.kind == StrategyKind::GoogleCache);
            if !has_cache {
                let listing = listing_url_of(&remaining[0]);
                remaining.push(self.build(StrategyKind::GoogleCache, &listing, site));
            }
        }

        rank(&mut remaining);
        Plan::new(remaining)
    }

    /// Mirror-only plan used once every direct strategy is spent. Empty when
    /// `failed` was itself mirror-only.
    pub fn fallback_plan(&self, failed: &Plan, site: &SiteBelief) -> Plan {
        if failed.strategies().iter().all(|s| s.kind.is_mirror()) {
            return Plan::empty();
        }
        let listing = failed
            .strategies()
            .iter()
            .find(|s| s.kind == StrategyKind::AutoDiscovery)
            .or_else(|| failed.strategies().first())
            .map(listing_url_of)
            .unwrap_or_default();

        let mut cache = Strategy::new(StrategyKind::GoogleCache, mirror_url(StrategyKind::GoogleCache, &listing));
        cache.config.delay_secs = site.recommended_delay().as_secs_f64();
        cache.config.max_urls = 10;
        let mut wayback = Strategy::new(
            StrategyKind::WaybackMachine,
            mirror_url(StrategyKind::WaybackMachine, &listing),
        );
        wayback.config.delay_secs = site.recommended_delay().as_secs_f64();
        Plan::new(vec![cache, wayback])
    }

    fn build(&self, kind: StrategyKind, url: &str, site: &SiteBelief) -> Strategy {
        let target = if kind.is_mirror() {
            mirror_url(kind, url)
        } else {
            url.to_string()
        };
        let mut strategy = Strategy::new(kind, target);

        if let Some(perf) = site.performance_of(kind.as_str()) {
            if perf.attempts > 0 {
                strategy.estimated_yield = perf.average_yield();
                strategy.risk = 1.0 - perf.success_rate();
            }
        }

        let mut risk = strategy.risk + f64::from(site.threat.ordinal()) * kind.threat_weight();
        if kind == StrategyKind::AutoDiscovery && site.has(SiteCapability::EdgeProtected) {
            risk += 0.3;
        }
        strategy.risk = risk.clamp(0.0, 1.0);

        strategy.config.delay_secs = site.recommended_delay().as_secs_f64();
        match kind {
            StrategyKind::AutoDiscovery => strategy.config.max_pages = 30,
            StrategyKind::ApiExtraction => strategy.config.delay_secs = 1.0,
            StrategyKind::GoogleCache => strategy.config.max_urls = 10,
            StrategyKind::SitemapCrawl | StrategyKind::WaybackMachine => {}
        }
        strategy
    }
}

/// Stable sort, most effective first.
fn rank(strategies: &mut [Strategy]) {
    strategies.sort_by(|a, b| b.effectiveness().total_cmp(&a.effectiveness()));
}

pub fn mirror_url(kind: StrategyKind, url: &str) -> String {
    match kind {
        StrategyKind::GoogleCache => {
            format!("https://webcache.googleusercontent.com/search?q=cache:{url}")
        }
        StrategyKind::WaybackMachine => format!("https://web.archive.org/web/{url}"),
        _ => url.to_string(),
    }
}

/// The page a mirror strategy would have been built from.
fn listing_url_of(strategy: &Strategy) -> String {
    let url = strategy.target_url.as_str();
    if let Some(rest) = url.strip_prefix("https://webcache.googleusercontent.com/search?q=cache:") {
        return rest.to_string();
    }
    if let Some(rest) = url.strip_prefix("https://web.archive.org/web/") {
        return rest.to_string();
    }
    if strategy.kind == StrategyKind::SitemapCrawl || looks_like_sitemap(url) {
        return site_root(url);
    }
    url.to_string()
}

/// Whether a URL names a sitemap rather than a listing page.
pub fn looks_like_sitemap(url: &str) -> bool {
    let path = url::Url::parse(url)
        .map(|u| u.path().to_lowercase())
        .unwrap_or_else(|_| url.to_lowercase());
    path.ends_with(".xml") || path.contains("sitemap")
}

/// `scheme://host[:port]/` of a URL, or an https root for a bare domain.
pub fn site_root(url: &str) -> String {
    match url::Url::parse(url) {
        Ok(u) => match u.host_str() {
            Some(host) => match u.port() {
                Some(port) => format!("{}://{host}:{port}/", u.scheme()),
                None => format!("{}://{host}/", u.scheme()),
            },
            None => url.to_string(),
        },
        Err(_) => format!("https://{}/", url.trim_end_matches('/')),
    }
}
