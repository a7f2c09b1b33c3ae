//! The crawl control loop.
//!
//! An [`Orchestrator`] owns the Goal and the World Model for one run. It asks
//! the planner for a plan, executes strategies one at a time through the
//! discovery and transport collaborators, scores every fetched post, and
//! routes strategy-level failures through the recovery engine until the goal
//! is met, resources run out, the plan is spent, or the run is cancelled.

use chrono::{Local, NaiveDate};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::collab::{DiscoveryMode, DiscoveryRequest, PostDiscovery, ResultSink, RunLabel, Transport};
use crate::error::{ScoutError, ScoutResult};
use crate::goal::{Goal, GoalStatus, GoalSummary};
use crate::ledger::{normalize_link, LedgerStore};
use crate::lease::{DomainLeases, LeasedTransport};
use crate::planner::{Plan, Planner, Strategy, StrategyKind, StrategyOutcome};
use crate::progress::{LogSender, LogTag, RunLog};
use crate::recovery::{FailureSummary, FailureType, RecoveryContext, RecoveryEngine};
use crate::scorer::{LinkScorer, ScoringPolicy};
use crate::types::{DateWindow, DiscoveredPost, ExtractedRecord, RecordStatus};
use crate::world_model::{domain_of, SiteCapability, SiteObservation, WorldModel, WorldSummary};

/// Referer sent with post requests.
const POST_REFERER: &str = "https://www.google.com/";

/// Days covered when no window is given.
const DEFAULT_WINDOW_DAYS: u32 = 7;

/// Attempts before the duplicate-rate ceiling is enforced.
const DUPLICATE_CHECK_MIN_ATTEMPTS: u32 = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunState {
    Idle,
    Running,
    Achieved,
    Failed,
    PartiallyAchieved,
}

impl std::fmt::Display for RunState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Idle => write!(f, "idle"),
            Self::Running => write!(f, "running"),
            Self::Achieved => write!(f, "achieved"),
            Self::Failed => write!(f, "failed"),
            Self::PartiallyAchieved => write!(f, "partially_achieved"),
        }
    }
}

/// Final report of a run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunSummary {
    pub run_id: String,
    pub target: String,
    pub window: DateWindow,
    pub state: RunState,
    pub goal: GoalSummary,
    pub world: WorldSummary,
    pub failures: FailureSummary,
    pub records: Vec<ExtractedRecord>,
    pub new_links_saved: usize,
    pub results_location: Option<String>,
    pub abort_reason: Option<String>,
    pub cancelled: bool,
}

/// How one post turned out.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PostOutcome {
    Found,
    Duplicate,
    Skipped,
    Failed,
    /// Ran out of wall-clock time before the request could be made.
    Deferred,
}

pub struct Orchestrator {
    goal: Goal,
    world: WorldModel,
    planner: Planner,
    recovery: RecoveryEngine,
    scorer: LinkScorer,
    transport: Arc<dyn Transport>,
    discovery: Arc<dyn PostDiscovery>,
    sink: Option<Arc<dyn ResultSink>>,
    ledger: Option<Arc<dyn LedgerStore>>,
    leases: Arc<DomainLeases>,
    cancel: CancellationToken,
    log: RunLog,
    snapshot_path: Option<PathBuf>,
    state: RunState,
    plan: Plan,
    new_links: Vec<String>,
    url_failures: HashMap<String, u32>,
    /// Found plus duplicate records produced by the strategy in flight.
    strategy_yield: u32,
    today: Option<NaiveDate>,
}

impl Orchestrator {
    pub fn new(goal: Goal, transport: Arc<dyn Transport>, discovery: Arc<dyn PostDiscovery>) -> Self {
        let planner = Planner::new();
        let scorer = LinkScorer::new(ScoringPolicy {
            threshold: goal.quality.min_confidence_score,
            ..ScoringPolicy::default()
        });
        Self {
            goal,
            world: WorldModel::new(),
            planner,
            recovery: RecoveryEngine::new(planner),
            scorer,
            transport,
            discovery,
            sink: None,
            ledger: None,
            leases: Arc::new(DomainLeases::new()),
            cancel: CancellationToken::new(),
            log: RunLog::new(uuid::Uuid::new_v4().to_string(), None),
            snapshot_path: None,
            state: RunState::Idle,
            plan: Plan::empty(),
            new_links: Vec::new(),
            url_failures: HashMap::new(),
            strategy_yield: 0,
            today: None,
        }
    }

    pub fn with_sink(mut self, sink: Arc<dyn ResultSink>) -> Self {
        self.sink = Some(sink);
        self
    }

    pub fn with_ledger(mut self, ledger: Arc<dyn LedgerStore>) -> Self {
        self.ledger = Some(ledger);
        self
    }

    /// Share politeness state with other runs.
    pub fn with_leases(mut self, leases: Arc<DomainLeases>) -> Self {
        self.leases = leases;
        self
    }

    pub fn with_cancel(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn with_log(mut self, tx: LogSender) -> Self {
        self.log = RunLog::new(self.log.run_id().to_string(), Some(tx));
        self
    }

    pub fn with_world_model(mut self, world: WorldModel) -> Self {
        self.world = world;
        self
    }

    /// Load site beliefs from `path` at start (if present) and save them at the end.
    pub fn with_snapshot(mut self, path: impl Into<PathBuf>) -> Self {
        self.snapshot_path = Some(path.into());
        self
    }

    pub fn with_scoring(mut self, policy: ScoringPolicy) -> Self {
        self.scorer = LinkScorer::new(policy);
        self
    }

    /// Pin "today" for the default date window.
    pub fn with_today(mut self, today: NaiveDate) -> Self {
        self.today = Some(today);
        self
    }

    pub fn run_id(&self) -> &str {
        self.log.run_id()
    }

    pub fn goal(&self) -> &Goal {
        &self.goal
    }

    pub fn world(&self) -> &WorldModel {
        &self.world
    }

    pub fn plan(&self) -> &Plan {
        &self.plan
    }

    pub fn state(&self) -> RunState {
        self.state
    }

    /// Hand back the site beliefs gathered by a finished run.
    pub fn into_world(self) -> WorldModel {
        self.world
    }

    /// Crawl `target_url` until the goal is settled.
    pub async fn run(&mut self, target_url: &str, window: Option<DateWindow>) -> RunSummary {
        self.state = RunState::Running;
        self.goal.start();
        self.world.start_session();

        let window = window.or(self.goal.window).unwrap_or_else(|| {
            let today = self.today.unwrap_or_else(|| Local::now().date_naive());
            DateWindow::last_days(DEFAULT_WINDOW_DAYS, today)
        });
        self.goal.window = Some(window);

        self.log.emit(LogTag::Agent, format!("jobscout agent initialized (run {})", self.run_id()));
        self.log.emit(
            LogTag::Goal,
            format!("Target: extract {} valid jobs", self.goal.target_valid),
        );
        self.log.emit(LogTag::Goal, format!("Date range: {window}"));
        self.log.emit(LogTag::Target, target_url);

        self.load_state().await;

        let mut abort_reason = None;
        let mut cancelled = false;
        match target_domain(target_url) {
            Some(domain) => {
                self.plan = self
                    .planner
                    .generate_plan(target_url, self.world.site_for(&domain));
                self.log.emit(
                    LogTag::Plan,
                    format!(
                        "Generated {} strategies: [{}]",
                        self.plan.len(),
                        self.plan.describe()
                    ),
                );
                match self.execute_plan(&domain, window).await {
                    Ok(reason) => abort_reason = reason,
                    Err(ScoutError::Cancelled) => cancelled = true,
                    Err(e) => abort_reason = Some(e.to_string()),
                }
            }
            None => {
                let reason = format!("invalid target URL: {target_url}");
                self.log.emit(LogTag::Error, reason.clone());
                abort_reason = Some(reason);
            }
        }
        if cancelled {
            self.log.emit(LogTag::Warn, "Run cancelled");
        }

        self.goal.complete();
        self.state = final_state(self.goal.status());
        self.finish(target_url, window, abort_reason, cancelled).await
    }

    /// Strategy loop. Returns the abort reason, if recovery gave up.
    async fn execute_plan(&mut self, domain: &str, window: DateWindow) -> ScoutResult<Option<String>> {
        loop {
            if self.cancel.is_cancelled() {
                return Err(ScoutError::Cancelled);
            }
            if self.goal.is_achieved() || self.goal.is_resource_exhausted() {
                return Ok(None);
            }
            let Some(strategy) = self.plan.current().cloned() else {
                self.log.emit(LogTag::Warn, "All strategies exhausted");
                return Ok(None);
            };

            self.log.emit(
                LogTag::Execute,
                format!("Strategy: {} ({})", strategy.kind, strategy.target_url),
            );
            self.log.emit(
                LogTag::Progress,
                format!(
                    "{:.1}% complete ({}/{})",
                    self.goal.progress_pct(),
                    self.goal.valid_found(),
                    self.goal.target_valid
                ),
            );

            let started = Instant::now();
            self.strategy_yield = 0;
            let result = self.execute_strategy(&strategy, domain, window).await;
            let yielded = self.strategy_yield;
            match result {
                Ok(()) => {
                    self.world.record_strategy_attempt(
                        domain,
                        strategy.kind.as_str(),
                        yielded > 0,
                        yielded,
                        started.elapsed(),
                    );
                    if let Some(current) = self.plan.current_mut() {
                        current.attempts += 1;
                        current.records += yielded;
                        current.last_outcome = Some(StrategyOutcome::Completed { records: yielded });
                    }
                    if self.goal.is_achieved() {
                        self.log.emit(
                            LogTag::Success,
                            format!("Goal achieved! Found {} jobs.", self.goal.valid_found()),
                        );
                        return Ok(None);
                    }
                    self.plan.advance();
                    self.recovery.reset_on_success();
                }
                Err(ScoutError::Cancelled) => return Err(ScoutError::Cancelled),
                Err(err) => {
                    // posts scored before the failure still count toward the strategy
                    self.world.record_strategy_attempt(
                        domain,
                        strategy.kind.as_str(),
                        false,
                        yielded,
                        started.elapsed(),
                    );
                    if let Some(current) = self.plan.current_mut() {
                        current.attempts += 1;
                        current.records += yielded;
                        current.last_outcome = Some(StrategyOutcome::Failed {
                            reason: err.to_string(),
                        });
                    }
                    if let Some(reason) = self.handle_failure(&err, domain).await? {
                        return Ok(Some(reason));
                    }
                }
            }
        }
    }

    /// Route a strategy failure through recovery. Returns an abort reason
    /// when recovery gives up.
    async fn handle_failure(&mut self, err: &ScoutError, domain: &str) -> ScoutResult<Option<String>> {
        let failure = FailureType::from_error(err);
        self.log.emit(
            LogTag::Error,
            format!("{failure}: {}", truncate(&err.to_string(), 100)),
        );

        let decision = {
            let site = self.world.site_for(domain);
            self.recovery.decide(
                failure,
                &err.to_string(),
                &mut self.plan,
                RecoveryContext {
                    goal: &self.goal,
                    site,
                },
            )
        };

        if !decision.retry {
            let reason = decision
                .abort_reason
                .unwrap_or_else(|| decision.message.clone());
            self.log.emit(LogTag::Error, format!("Aborting: {reason}"));
            return Ok(Some(reason));
        }

        if !decision.wait.is_zero() {
            self.log.emit(
                LogTag::Wait,
                format!("{} (sleeping {:.1}s)", decision.message, decision.wait.as_secs_f64()),
            );
            self.pause(decision.wait).await?;
        }
        if decision.rotate_identity {
            self.log.emit(LogTag::Identity, "Rotating client identity");
            self.transport.rotate_identity();
        }
        if let Some(plan) = decision.new_plan {
            self.plan = plan;
            self.log.emit(
                LogTag::Replan,
                format!(
                    "New plan with {} strategies: [{}]",
                    self.plan.len(),
                    self.plan.describe()
                ),
            );
        } else if decision.switch_strategy {
            self.log.emit(LogTag::Replan, decision.message);
        }
        Ok(None)
    }

    /// Run one strategy, counting its records in `strategy_yield`.
    async fn execute_strategy(
        &mut self,
        strategy: &Strategy,
        domain: &str,
        window: DateWindow,
    ) -> ScoutResult<()> {
        let mode = match strategy.kind {
            StrategyKind::SitemapCrawl => DiscoveryMode::Sitemap,
            StrategyKind::AutoDiscovery => DiscoveryMode::Pagination {
                max_pages: strategy.config.max_pages,
            },
            StrategyKind::ApiExtraction => DiscoveryMode::Api,
            StrategyKind::GoogleCache | StrategyKind::WaybackMachine => DiscoveryMode::Mirror,
        };
        let request = DiscoveryRequest {
            mode,
            url: strategy.target_url.clone(),
            window,
            max_urls: strategy.config.max_urls,
        };
        let tag = if mode == DiscoveryMode::Sitemap {
            LogTag::Sitemap
        } else {
            LogTag::Execute
        };
        self.log.emit(tag, format!("Fetching: {}", request.url));

        let paced = LeasedTransport::new(
            self.transport.clone(),
            self.leases.clone(),
            self.request_interval(strategy, domain),
        );
        let discovered = tokio::select! {
            result = self.discovery.discover_posts(&request, &paced) => result,
            _ = self.cancel.cancelled() => Err(ScoutError::Cancelled),
        };
        let discovery = match discovered {
            Ok(discovery) => discovery,
            Err(e) => {
                if let Some(status) = e.status() {
                    self.world.update_threat_level(domain, status);
                }
                return Err(e);
            }
        };
        self.goal.record_requests(discovery.requests_made);
        for observation in &discovery.observations {
            self.world.apply_observation(domain, observation);
        }

        if discovery.posts.is_empty() {
            let observed = |wanted: SiteCapability| {
                discovery.observations.iter().any(|o| {
                    matches!(o, SiteObservation::Capability { capability } if *capability == wanted)
                })
            };
            if observed(SiteCapability::CaptchaPresent) {
                return Err(ScoutError::Captcha(request.url));
            }
            if observed(SiteCapability::AuthenticatedOnly) {
                return Err(ScoutError::AuthRequired(request.url));
            }
        }

        let posts = self.select_posts(discovery.posts, window, strategy.config.max_urls);
        if posts.is_empty() {
            self.log.emit(tag, "No URLs found matching date range");
            return Ok(());
        }
        self.log.emit(tag, format!("Found {} URLs to process", posts.len()));

        let total = posts.len();
        for (i, post) in posts.iter().enumerate() {
            if self.cancel.is_cancelled() {
                return Err(ScoutError::Cancelled);
            }
            if self.goal.is_achieved() || self.goal.is_resource_exhausted() {
                break;
            }
            if self.world.is_visited(&post.url) {
                tracing::debug!("skipping already processed post {}", post.url);
                continue;
            }
            if self.goal.total_attempts() >= DUPLICATE_CHECK_MIN_ATTEMPTS
                && self.goal.duplicate_rate() > self.goal.quality.max_duplicate_rate
            {
                self.log.emit(
                    LogTag::Warn,
                    format!(
                        "Duplicate rate {:.1}% exceeds {:.1}%, ending strategy",
                        self.goal.duplicate_rate() * 100.0,
                        self.goal.quality.max_duplicate_rate * 100.0
                    ),
                );
                break;
            }

            self.log.emit(
                LogTag::Check,
                format!("[{}/{}] {}", i + 1, total, truncate(&post.url, 80)),
            );
            match self.process_post(post, strategy, domain).await? {
                PostOutcome::Found | PostOutcome::Duplicate => self.strategy_yield += 1,
                PostOutcome::Deferred => break,
                PostOutcome::Skipped | PostOutcome::Failed => {}
            }
        }
        Ok(())
    }

    /// Politeness interval for requests to `domain` under `strategy`.
    fn request_interval(&self, strategy: &Strategy, domain: &str) -> Duration {
        Duration::from_secs_f64(strategy.config.delay_secs.max(0.0))
            .max(self.world.recommended_delay(domain))
    }

    /// Drop posts outside the window or domain filter, dedupe, and cap.
    fn select_posts(
        &self,
        posts: Vec<DiscoveredPost>,
        window: DateWindow,
        max_urls: u32,
    ) -> Vec<DiscoveredPost> {
        let mut seen = HashSet::new();
        posts
            .into_iter()
            .filter(|p| p.published.map_or(true, |d| window.contains(d)))
            .filter(|p| {
                domain_of(&p.url)
                    .map(|d| self.goal.accepts_domain(&d))
                    .unwrap_or(false)
            })
            .filter(|p| seen.insert(p.url.clone()))
            .take(max_urls as usize)
            .collect()
    }

    async fn process_post(
        &mut self,
        post: &DiscoveredPost,
        strategy: &Strategy,
        domain: &str,
    ) -> ScoutResult<PostOutcome> {
        let url = post.url.as_str();
        let post_domain = domain_of(url).unwrap_or_else(|| domain.to_string());
        let interval = self.request_interval(strategy, &post_domain);

        let remaining = self.goal.remaining();
        let lease = tokio::select! {
            biased;
            _ = self.cancel.cancelled() => return Err(ScoutError::Cancelled),
            lease = self.leases.acquire(&post_domain, interval) => lease,
            _ = tokio::time::sleep(remaining) => return Ok(PostOutcome::Deferred),
        };

        self.goal.record_request();
        let response = tokio::select! {
            result = self.transport.fetch(url, Some(POST_REFERER)) => result,
            _ = self.cancel.cancelled() => return Err(ScoutError::Cancelled),
        };
        drop(lease);

        let response = match response {
            Ok(response) => response,
            Err(e) => {
                let failures = self.url_failures.entry(url.to_string()).or_default();
                *failures += 1;
                if *failures >= self.goal.limits.max_retries_per_url {
                    self.world.mark_visited(url);
                }
                self.goal.record_failure(url, &e.to_string());
                self.world.mark_failed(url);
                self.log.emit(
                    LogTag::Warn,
                    format!("Error processing URL: {}", truncate(&e.to_string(), 60)),
                );
                return Ok(PostOutcome::Failed);
            }
        };

        self.world.update_threat_level(&post_domain, response.status);
        if matches!(response.status, 403 | 429) || response.status >= 500 {
            return Err(ScoutError::HttpStatus {
                status: response.status,
                url: url.to_string(),
            });
        }
        self.world.mark_visited(url);

        if !response.is_success() {
            self.goal.record_skip();
            self.log.emit(LogTag::Skip, format!("HTTP {} for {}", response.status, url));
            return Ok(PostOutcome::Skipped);
        }

        let Some(found) = self.scorer.best_link(&response.body, url) else {
            self.goal.record_skip();
            self.log.emit(LogTag::Skip, format!("No confident apply link in {}", truncate(url, 60)));
            return Ok(PostOutcome::Skipped);
        };

        let apply_link = normalize_link(&found.link);
        let record = ExtractedRecord {
            date_posted: post.published,
            job_title: found.title,
            apply_link: apply_link.clone(),
            anchor_text: found.text,
            context: found.context,
            source_post: url.to_string(),
            score: found.score,
            status: RecordStatus::New,
        };

        if self.world.is_apply_link_seen(&apply_link) {
            self.log.emit(
                LogTag::Duplicate,
                format!("{}...", truncate(&record.job_title, 40)),
            );
            self.goal.record_duplicate(record);
            return Ok(PostOutcome::Duplicate);
        }

        self.log.emit(
            LogTag::Found,
            format!(
                "({}/{}) {}",
                self.goal.valid_found() + 1,
                self.goal.target_valid,
                truncate(&record.job_title, 40)
            ),
        );
        self.goal.record_success(record);
        self.world.add_apply_link(&apply_link);
        self.new_links.push(apply_link);
        Ok(PostOutcome::Found)
    }

    /// Sleep for `wait`, capped at the remaining budget. Errors if cancelled.
    async fn pause(&self, wait: Duration) -> ScoutResult<()> {
        let wait = wait.min(self.goal.remaining());
        tokio::select! {
            _ = tokio::time::sleep(wait) => Ok(()),
            _ = self.cancel.cancelled() => Err(ScoutError::Cancelled),
        }
    }

    async fn load_state(&mut self) {
        if let Some(ledger) = self.ledger.clone() {
            let loaded = self.world.load_shared_history(ledger.as_ref());
            self.log.emit(
                LogTag::History,
                format!("Loaded {loaded} links from shared history"),
            );
        } else {
            self.log.emit(LogTag::Warn, "No shared ledger configured, running in isolated mode");
        }

        if let Some(path) = self.snapshot_path.clone() {
            if tokio::fs::try_exists(&path).await.unwrap_or(false) {
                match self.world.load_snapshot(&path).await {
                    Ok(n) => self.log.emit(
                        LogTag::History,
                        format!("Loaded beliefs for {n} sites from {}", path.display()),
                    ),
                    Err(e) => self.log.emit(
                        LogTag::Warn,
                        format!("Could not load world model from {}: {e}", path.display()),
                    ),
                }
            }
        }
    }

    async fn finish(
        &mut self,
        target_url: &str,
        window: DateWindow,
        abort_reason: Option<String>,
        cancelled: bool,
    ) -> RunSummary {
        let label = RunLabel {
            run_id: self.run_id().to_string(),
            target: target_url.to_string(),
            window,
        };

        let mut results_location = None;
        if let Some(sink) = self.sink.clone() {
            if !self.goal.records().is_empty() {
                match sink.save(self.goal.records(), &label).await {
                    Ok(location) => {
                        self.log.emit(
                            LogTag::Save,
                            format!("Saved {} records to {location}", self.goal.records().len()),
                        );
                        results_location = Some(location);
                    }
                    Err(e) => self.log.emit(LogTag::Warn, format!("Could not save results: {e}")),
                }
            }
        }

        let mut new_links_saved = 0;
        if let Some(ledger) = self.ledger.clone() {
            new_links_saved = self.world.save_shared_history(ledger.as_ref(), &self.new_links);
            if new_links_saved > 0 {
                self.log.emit(
                    LogTag::History,
                    format!("Saved {new_links_saved} new links to shared history"),
                );
            }
        }

        if let Some(path) = self.snapshot_path.clone() {
            if let Err(e) = self.world.save_snapshot(&path).await {
                self.log.emit(
                    LogTag::Warn,
                    format!("Could not save world model to {}: {e}", path.display()),
                );
            }
        }

        let goal = self.goal.summary();
        self.log.emit(LogTag::Complete, format!("Status: {}", self.state));
        self.log.emit(
            LogTag::Stats,
            format!(
                "Jobs: {}/{} | Success rate: {:.1}% | Time: {:.0}s",
                goal.valid_found,
                goal.target,
                goal.success_rate * 100.0,
                goal.elapsed_secs
            ),
        );

        RunSummary {
            run_id: label.run_id,
            target: label.target,
            window,
            state: self.state,
            goal,
            world: self.world.summary(),
            failures: self.recovery.failure_summary(),
            records: self.goal.records().to_vec(),
            new_links_saved,
            results_location,
            abort_reason,
            cancelled,
        }
    }
}

fn final_state(status: GoalStatus) -> RunState {
    match status {
        GoalStatus::Achieved => RunState::Achieved,
        GoalStatus::PartiallyAchieved | GoalStatus::InProgress => RunState::PartiallyAchieved,
        GoalStatus::Failed | GoalStatus::Pending => RunState::Failed,
    }
}

/// Domain of an absolute http(s) target.
fn target_domain(target_url: &str) -> Option<String> {
    let parsed = url::Url::parse(target_url).ok()?;
    if !matches!(parsed.scheme(), "http" | "https") {
        return None;
    }
    domain_of(target_url)
}

fn truncate(s: &str, max_chars: usize) -> String {
    match s.char_indices().nth(max_chars) {
        Some((idx, _)) => s[..idx].to_string(),
        None => s.to_string(),
    }
}
