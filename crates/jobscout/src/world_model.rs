//! Durable beliefs about target sites and previously seen results.
//!
//! One [`SiteBelief`] per normalized domain tracks how tolerant the site is of
//! automated traffic (the threat level), what it is known to offer (sitemaps,
//! APIs, pagination), and how each strategy has performed against it. The
//! model also holds the in-memory duplicate ledger and the set of post URLs
//! already processed this run.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::path::Path;
use std::time::Duration;

use crate::error::ScoutResult;
use crate::ledger::{normalize_link, LedgerStore};

/// How hostile a site currently is toward our traffic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ThreatLevel {
    None,
    Low,
    Medium,
    High,
    Blocked,
}

impl ThreatLevel {
    /// Ordinal used for risk inflation (none = 0 … blocked = 4).
    pub fn ordinal(self) -> u8 {
        self as u8
    }

    /// Minimum delay between requests at this level.
    pub fn floor_delay(self) -> Duration {
        Duration::from_secs(match self {
            Self::None => 3,
            Self::Low => 5,
            Self::Medium => 10,
            Self::High => 30,
            Self::Blocked => 60,
        })
    }
}

impl std::fmt::Display for ThreatLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::None => write!(f, "none"),
            Self::Low => write!(f, "low"),
            Self::Medium => write!(f, "medium"),
            Self::High => write!(f, "high"),
            Self::Blocked => write!(f, "blocked"),
        }
    }
}

/// Things a site has been observed to offer or require.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SiteCapability {
    SitemapXml,
    SitemapHtml,
    PaginationDetected,
    ApiAvailable,
    JavascriptRequired,
    AuthenticatedOnly,
    EdgeProtected,
    CaptchaPresent,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SitemapKind {
    Xml,
    Html,
}

/// A fact learned about a site while discovering posts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SiteObservation {
    SitemapFound { url: String, kind: SitemapKind },
    ApiEndpoint { url: String },
    Capability { capability: SiteCapability },
}

/// Running record of one strategy against one site.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StrategyPerformance {
    pub attempts: u32,
    pub successes: u32,
    pub failures: u32,
    pub total_yield: u32,
    pub total_duration_secs: f64,
    pub last_attempt: Option<DateTime<Utc>>,
    pub last_success: Option<DateTime<Utc>>,
}

impl StrategyPerformance {
    /// Success rate, or the neutral 0.5 for an untried strategy.
    pub fn success_rate(&self) -> f64 {
        if self.attempts == 0 {
            return 0.5;
        }
        f64::from(self.successes) / f64::from(self.attempts)
    }

    pub fn average_yield(&self) -> f64 {
        if self.attempts == 0 {
            return 0.0;
        }
        f64::from(self.total_yield) / f64::from(self.attempts)
    }

    pub fn record(&mut self, success: bool, yield_count: u32, duration: Duration) {
        let now = Utc::now();
        self.attempts += 1;
        if success {
            self.successes += 1;
            self.last_success = Some(now);
        } else {
            self.failures += 1;
        }
        self.total_yield += yield_count;
        self.total_duration_secs += duration.as_secs_f64();
        self.last_attempt = Some(now);
    }
}

/// Everything we believe about one domain.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SiteBelief {
    pub domain: String,
    pub threat: ThreatLevel,
    pub consecutive_429: u32,
    pub consecutive_403: u32,
    pub total_blocks: u32,
    pub recommended_delay_secs: f64,
    pub capabilities: BTreeSet<SiteCapability>,
    pub sitemap_url: Option<String>,
    pub sitemap_kind: Option<SitemapKind>,
    pub api_endpoints: Vec<String>,
    pub first_seen: DateTime<Utc>,
    pub last_accessed: Option<DateTime<Utc>>,
    /// Keyed by strategy name.
    pub performance: BTreeMap<String, StrategyPerformance>,
}

impl SiteBelief {
    pub fn new(domain: impl Into<String>) -> Self {
        Self {
            domain: domain.into(),
            threat: ThreatLevel::None,
            consecutive_429: 0,
            consecutive_403: 0,
            total_blocks: 0,
            recommended_delay_secs: 3.0,
            capabilities: BTreeSet::new(),
            sitemap_url: None,
            sitemap_kind: None,
            api_endpoints: Vec::new(),
            first_seen: Utc::now(),
            last_accessed: None,
            performance: BTreeMap::new(),
        }
    }

    pub fn has(&self, capability: SiteCapability) -> bool {
        self.capabilities.contains(&capability)
    }

    pub fn is_blocked(&self) -> bool {
        self.threat == ThreatLevel::Blocked
    }

    /// The stored delay, never below the current threat level's floor.
    pub fn recommended_delay(&self) -> Duration {
        let stored = Duration::from_secs_f64(self.recommended_delay_secs.max(0.0));
        stored.max(self.threat.floor_delay())
    }

    pub fn performance_of(&self, strategy: &str) -> Option<&StrategyPerformance> {
        self.performance.get(strategy)
    }

    /// Feed one HTTP status into the threat state machine.
    pub fn update_threat(&mut self, status: u16) {
        self.last_accessed = Some(Utc::now());
        match status {
            429 => {
                self.consecutive_429 += 1;
                self.consecutive_403 = 0;
                if self.consecutive_429 >= 3 {
                    self.set_threat(ThreatLevel::High, 30.0);
                } else {
                    self.set_threat(ThreatLevel::Medium, 15.0);
                }
            }
            403 => {
                self.consecutive_403 += 1;
                self.total_blocks += 1;
                self.set_threat(ThreatLevel::Blocked, 60.0);
            }
            200..=299 => {
                self.consecutive_429 = 0;
                self.consecutive_403 = 0;
                match self.threat {
                    ThreatLevel::High => self.set_threat(ThreatLevel::Medium, 10.0),
                    ThreatLevel::Medium => self.set_threat(ThreatLevel::Low, 5.0),
                    ThreatLevel::Blocked => {}
                    ThreatLevel::None | ThreatLevel::Low => {
                        self.set_threat(ThreatLevel::None, 3.0)
                    }
                }
            }
            _ => {}
        }
    }

    fn set_threat(&mut self, level: ThreatLevel, delay_secs: f64) {
        self.threat = level;
        self.recommended_delay_secs = delay_secs;
    }

    pub fn apply(&mut self, observation: &SiteObservation) {
        match observation {
            SiteObservation::SitemapFound { url, kind } => {
                self.sitemap_url = Some(url.clone());
                self.sitemap_kind = Some(*kind);
                self.capabilities.insert(match kind {
                    SitemapKind::Xml => SiteCapability::SitemapXml,
                    SitemapKind::Html => SiteCapability::SitemapHtml,
                });
            }
            SiteObservation::ApiEndpoint { url } => {
                if !self.api_endpoints.contains(url) {
                    self.api_endpoints.push(url.clone());
                }
                self.capabilities.insert(SiteCapability::ApiAvailable);
            }
            SiteObservation::Capability { capability } => {
                self.capabilities.insert(*capability);
            }
        }
    }
}

/// Aggregate view of the world model for the final report.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorldSummary {
    pub sites_known: usize,
    pub blocked_sites: Vec<String>,
    pub urls_visited: usize,
    pub urls_failed: usize,
    pub apply_links_seen: usize,
    pub overall_threat: ThreatLevel,
    pub session_started: Option<DateTime<Utc>>,
}

#[derive(Serialize, Deserialize)]
struct Snapshot {
    saved_at: DateTime<Utc>,
    sites: BTreeMap<String, SiteBelief>,
}

/// Belief store for all sites touched by a run.
#[derive(Debug, Clone, Default)]
pub struct WorldModel {
    sites: HashMap<String, SiteBelief>,
    seen_links: HashSet<String>,
    visited: HashSet<String>,
    failed: HashSet<String>,
    session_started: Option<DateTime<Utc>>,
}

impl WorldModel {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn start_session(&mut self) {
        if self.session_started.is_none() {
            self.session_started = Some(Utc::now());
        }
    }

    /// Get or lazily create the belief for a domain.
    pub fn site_for(&mut self, domain: &str) -> &mut SiteBelief {
        let key = normalize_domain(domain);
        self.sites
            .entry(key.clone())
            .or_insert_with(|| SiteBelief::new(key))
    }

    pub fn site(&self, domain: &str) -> Option<&SiteBelief> {
        self.sites.get(&normalize_domain(domain))
    }

    /// Returns the threat level after the update.
    pub fn update_threat_level(&mut self, domain: &str, status: u16) -> ThreatLevel {
        let site = self.site_for(domain);
        let before = site.threat;
        site.update_threat(status);
        if site.threat != before {
            tracing::info!(
                "threat for {} changed {} -> {} (delay {:.0}s)",
                site.domain,
                before,
                site.threat,
                site.recommended_delay_secs
            );
        }
        site.threat
    }

    /// Lift a block after an external signal that the site is reachable again.
    pub fn reset_block(&mut self, domain: &str) {
        let site = self.site_for(domain);
        if site.is_blocked() {
            site.consecutive_403 = 0;
            site.set_threat(ThreatLevel::Low, 5.0);
        }
    }

    pub fn recommended_delay(&self, domain: &str) -> Duration {
        self.site(domain)
            .map(SiteBelief::recommended_delay)
            .unwrap_or_else(|| ThreatLevel::None.floor_delay())
    }

    pub fn record_strategy_attempt(
        &mut self,
        domain: &str,
        strategy: &str,
        success: bool,
        yield_count: u32,
        duration: Duration,
    ) {
        self.site_for(domain)
            .performance
            .entry(strategy.to_string())
            .or_default()
            .record(success, yield_count, duration);
    }

    pub fn apply_observation(&mut self, domain: &str, observation: &SiteObservation) {
        self.site_for(domain).apply(observation);
    }

    pub fn is_apply_link_seen(&self, link: &str) -> bool {
        self.seen_links.contains(&normalize_link(link))
    }

    /// Returns `true` when the link was not already known.
    pub fn add_apply_link(&mut self, link: &str) -> bool {
        let link = normalize_link(link);
        !link.is_empty() && self.seen_links.insert(link)
    }

    pub fn mark_visited(&mut self, url: &str) {
        self.visited.insert(url.to_string());
    }

    pub fn is_visited(&self, url: &str) -> bool {
        self.visited.contains(url)
    }

    pub fn mark_failed(&mut self, url: &str) {
        self.failed.insert(url.to_string());
    }

    /// Hydrate the duplicate ledger. Storage failures are logged, not raised.
    pub fn load_shared_history(&mut self, store: &dyn LedgerStore) -> usize {
        match store.read_all() {
            Ok(links) => {
                let before = self.seen_links.len();
                for link in links {
                    self.add_apply_link(&link);
                }
                self.seen_links.len() - before
            }
            Err(e) => {
                tracing::warn!("could not load shared history from {}: {e}", store.describe());
                0
            }
        }
    }

    /// Append new links to the shared ledger. Storage failures are logged, not raised.
    pub fn save_shared_history(&self, store: &dyn LedgerStore, links: &[String]) -> usize {
        let links: Vec<String> = links
            .iter()
            .map(|l| normalize_link(l))
            .filter(|l| !l.is_empty())
            .collect();
        if links.is_empty() {
            return 0;
        }
        match store.append(&links) {
            Ok(()) => links.len(),
            Err(e) => {
                tracing::warn!("could not save shared history to {}: {e}", store.describe());
                0
            }
        }
    }

    /// Write site beliefs as JSON, via a uniquely named temp file renamed
    /// into place.
    pub async fn save_snapshot(&self, path: &Path) -> ScoutResult<()> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await?;
            }
        }
        let snapshot = Snapshot {
            saved_at: Utc::now(),
            sites: self
                .sites
                .iter()
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect(),
        };
        let json = serde_json::to_string_pretty(&snapshot)?;
        let tmp = path.with_extension(format!("{}.tmp", uuid::Uuid::new_v4().simple()));
        tokio::fs::write(&tmp, json).await?;
        if let Err(e) = tokio::fs::rename(&tmp, path).await {
            let _ = tokio::fs::remove_file(&tmp).await;
            return Err(e.into());
        }
        Ok(())
    }

    /// Merge site beliefs from a snapshot. Returns the number of sites loaded.
    pub async fn load_snapshot(&mut self, path: &Path) -> ScoutResult<usize> {
        let data = tokio::fs::read_to_string(path).await?;
        let snapshot: Snapshot = serde_json::from_str(&data)?;
        let count = snapshot.sites.len();
        self.sites.extend(snapshot.sites);
        Ok(count)
    }

    /// Fold another model's site beliefs into this one. Per domain, the
    /// belief accessed most recently wins.
    pub fn merge(&mut self, other: WorldModel) {
        for (domain, theirs) in other.sites {
            match self.sites.get(&domain) {
                Some(ours) if ours.last_accessed >= theirs.last_accessed => {}
                _ => {
                    self.sites.insert(domain, theirs);
                }
            }
        }
    }

    pub fn summary(&self) -> WorldSummary {
        let mut blocked_sites: Vec<String> = self
            .sites
            .values()
            .filter(|s| s.is_blocked())
            .map(|s| s.domain.clone())
            .collect();
        blocked_sites.sort();
        WorldSummary {
            sites_known: self.sites.len(),
            blocked_sites,
            urls_visited: self.visited.len(),
            urls_failed: self.failed.len(),
            apply_links_seen: self.seen_links.len(),
            overall_threat: self
                .sites
                .values()
                .map(|s| s.threat)
                .max()
                .unwrap_or(ThreatLevel::None),
            session_started: self.session_started,
        }
    }
}

/// Lowercase a domain (or URL) to its host, dropping a leading `www.`.
pub fn normalize_domain(input: &str) -> String {
    let input = input.trim();
    let host = if input.contains("://") {
        match url::Url::parse(input) {
            Ok(u) => match (u.host_str(), u.port()) {
                (Some(h), Some(p)) => format!("{h}:{p}"),
                (Some(h), None) => h.to_string(),
                _ => String::new(),
            },
            Err(_) => String::new(),
        }
    } else {
        input.split('/').next().unwrap_or_default().to_string()
    };
    let host = host.to_lowercase();
    host.strip_prefix("www.").map(str::to_string).unwrap_or(host)
}

/// Normalized domain of an absolute URL, if it has one.
pub fn domain_of(url: &str) -> Option<String> {
    let domain = normalize_domain(url);
    (!domain.is_empty()).then_some(domain)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::MemoryLedger;

    #[test]
    fn test_normalize_domain() {
        assert_eq!(normalize_domain("https://WWW.Example.com/jobs"), "example.com");
        assert_eq!(normalize_domain("www.example.com"), "example.com");
        assert_eq!(normalize_domain("http://127.0.0.1:8080/x"), "127.0.0.1:8080");
        assert_eq!(normalize_domain("blog.example.com/path"), "blog.example.com");
        assert_eq!(domain_of("not a url://"), None);
    }

    #[test]
    fn test_three_429s_escalate_to_high() {
        let mut world = WorldModel::new();
        assert_eq!(world.update_threat_level("example.com", 429), ThreatLevel::Medium);
        assert_eq!(world.recommended_delay("example.com"), Duration::from_secs(15));
        assert_eq!(world.update_threat_level("example.com", 429), ThreatLevel::Medium);
        assert_eq!(world.update_threat_level("example.com", 429), ThreatLevel::High);
        assert_eq!(world.recommended_delay("example.com"), Duration::from_secs(30));
    }

    #[test]
    fn test_403_blocks_and_survives_success() {
        let mut world = WorldModel::new();
        world.update_threat_level("example.com", 429);
        assert_eq!(world.update_threat_level("example.com", 403), ThreatLevel::Blocked);
        let site = world.site("example.com").unwrap();
        assert_eq!(site.consecutive_403, 1);
        assert_eq!(site.total_blocks, 1);
        assert_eq!(site.consecutive_429, 1);

        assert_eq!(world.update_threat_level("example.com", 200), ThreatLevel::Blocked);
        assert_eq!(world.recommended_delay("example.com"), Duration::from_secs(60));

        world.reset_block("example.com");
        assert_eq!(world.site("example.com").unwrap().threat, ThreatLevel::Low);
    }

    #[test]
    fn test_success_deescalates_one_step() {
        let mut world = WorldModel::new();
        for _ in 0..3 {
            world.update_threat_level("a.com", 429);
        }
        assert_eq!(world.update_threat_level("a.com", 200), ThreatLevel::Medium);
        assert_eq!(world.recommended_delay("a.com"), Duration::from_secs(10));
        assert_eq!(world.update_threat_level("a.com", 204), ThreatLevel::Low);
        assert_eq!(world.update_threat_level("a.com", 200), ThreatLevel::None);
        assert_eq!(world.recommended_delay("a.com"), Duration::from_secs(3));
    }

    #[test]
    fn test_429_resets_403_counter() {
        let mut site = SiteBelief::new("a.com");
        site.update_threat(403);
        site.update_threat(429);
        assert_eq!(site.consecutive_403, 0);
        assert_eq!(site.threat, ThreatLevel::Medium);
    }

    #[test]
    fn test_strategy_performance() {
        let mut world = WorldModel::new();
        assert!(world.site("a.com").is_none());
        world.record_strategy_attempt("www.a.com", "sitemap_crawl", true, 6, Duration::from_secs(2));
        world.record_strategy_attempt("a.com", "sitemap_crawl", false, 0, Duration::from_secs(1));
        let perf = world.site("a.com").unwrap().performance_of("sitemap_crawl").unwrap();
        assert_eq!(perf.attempts, 2);
        assert_eq!(perf.success_rate(), 0.5);
        assert_eq!(perf.average_yield(), 3.0);
        assert_eq!(perf.total_duration_secs, 3.0);
        assert_eq!(StrategyPerformance::default().success_rate(), 0.5);
    }

    #[test]
    fn test_apply_links_are_trimmed() {
        let mut world = WorldModel::new();
        assert!(world.add_apply_link("  https://acme.com/careers \n"));
        assert!(world.is_apply_link_seen("https://acme.com/careers"));
        assert!(!world.add_apply_link("https://acme.com/careers"));
        assert!(!world.add_apply_link("   "));
    }

    #[test]
    fn test_shared_history_roundtrip_through_store() {
        let store = MemoryLedger::with_links(["https://a.com/apply", "https://b.com/jobs"]);
        let mut world = WorldModel::new();
        assert_eq!(world.load_shared_history(&store), 2);
        assert!(world.is_apply_link_seen("https://b.com/jobs"));

        let saved = world.save_shared_history(&store, &["https://c.com/x ".to_string()]);
        assert_eq!(saved, 1);
        assert_eq!(store.links().last().unwrap(), "https://c.com/x");
    }

    #[test]
    fn test_observations_update_capabilities() {
        let mut world = WorldModel::new();
        world.apply_observation(
            "a.com",
            &SiteObservation::SitemapFound {
                url: "https://a.com/sitemap.html".to_string(),
                kind: SitemapKind::Html,
            },
        );
        world.apply_observation(
            "a.com",
            &SiteObservation::ApiEndpoint {
                url: "https://a.com/wp-json/wp/v2/posts".to_string(),
            },
        );
        world.apply_observation(
            "a.com",
            &SiteObservation::ApiEndpoint {
                url: "https://a.com/wp-json/wp/v2/posts".to_string(),
            },
        );
        let site = world.site("a.com").unwrap();
        assert!(site.has(SiteCapability::SitemapHtml));
        assert!(site.has(SiteCapability::ApiAvailable));
        assert_eq!(site.api_endpoints.len(), 1);
        assert_eq!(site.sitemap_kind, Some(SitemapKind::Html));
    }

    #[tokio::test]
    async fn test_snapshot_save_and_load() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("state").join("world.json");

        let mut world = WorldModel::new();
        world.update_threat_level("a.com", 403);
        world.record_strategy_attempt("a.com", "auto_discovery", true, 4, Duration::from_secs(5));
        world.save_snapshot(&path).await.unwrap();
        assert!(path.exists());
        // the temp file was renamed away
        assert_eq!(std::fs::read_dir(path.parent().unwrap()).unwrap().count(), 1);

        let mut restored = WorldModel::new();
        assert_eq!(restored.load_snapshot(&path).await.unwrap(), 1);
        let site = restored.site("a.com").unwrap();
        assert!(site.is_blocked());
        assert_eq!(site.performance_of("auto_discovery").unwrap().total_yield, 4);
    }

    #[tokio::test]
    async fn test_concurrent_snapshot_writers_do_not_collide() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("world.json");

        let mut a = WorldModel::new();
        a.update_threat_level("a.com", 429);
        let mut b = WorldModel::new();
        b.update_threat_level("b.com", 403);

        let (first, second) = tokio::join!(a.save_snapshot(&path), b.save_snapshot(&path));
        first.unwrap();
        second.unwrap();

        let mut restored = WorldModel::new();
        assert_eq!(restored.load_snapshot(&path).await.unwrap(), 1);
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 1);
    }

    #[test]
    fn test_merge_keeps_most_recently_accessed_belief() {
        let mut base = WorldModel::new();
        base.site_for("a.com");
        base.site_for("b.com");

        let mut run_a = base.clone();
        run_a.update_threat_level("a.com", 429);
        let mut run_b = base.clone();
        run_b.update_threat_level("b.com", 403);
        run_b.site_for("c.com").sitemap_url = Some("https://c.com/sitemap.xml".into());

        let mut merged = base;
        merged.merge(run_a);
        merged.merge(run_b);

        assert_eq!(merged.site("a.com").unwrap().threat, ThreatLevel::Medium);
        assert!(merged.site("b.com").unwrap().is_blocked());
        assert!(merged.site("c.com").unwrap().sitemap_url.is_some());
        assert_eq!(merged.summary().sites_known, 3);
    }

    #[test]
    fn test_summary() {
        let mut world = WorldModel::new();
        world.start_session();
        world.update_threat_level("b.com", 403);
        world.update_threat_level("a.com", 429);
        world.mark_visited("https://a.com/1");
        world.mark_failed("https://a.com/2");
        let summary = world.summary();
        assert_eq!(summary.sites_known, 2);
        assert_eq!(summary.blocked_sites, vec!["b.com".to_string()]);
        assert_eq!(summary.overall_threat, ThreatLevel::Blocked);
        assert_eq!(summary.urls_visited, 1);
        assert_eq!(summary.urls_failed, 1);
        assert!(summary.session_started.is_some());
    }
}
