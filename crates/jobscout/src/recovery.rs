//! Failure classification and recovery policy.
//!
//! Every failure is mapped to a [`FailureType`] by a single classifier, then
//! [`RecoveryEngine::decide`] picks the next control action: wait and retry,
//! rotate identity, move to another strategy, replan, or abort.

use chrono::{DateTime, Utc};
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::time::Duration;

use crate::error::ScoutError;
use crate::goal::Goal;
use crate::planner::{Plan, Planner, StrategyKind};
use crate::world_model::SiteBelief;

/// Retries a single strategy gets before the engine moves past it.
const MAX_STRATEGY_RETRIES: u32 = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureType {
    NetworkTimeout,
    RateLimited,
    Blocked,
    CaptchaDetected,
    LayoutChanged,
    NoContentFound,
    AuthenticationRequired,
    ServerError,
    Unknown,
}

impl FailureType {
    /// Classify from an HTTP status (checked first) and a message signature.
    pub fn classify(status: Option<u16>, message: &str) -> Self {
        match status {
            Some(429) => return Self::RateLimited,
            Some(403) => return Self::Blocked,
            Some(s) if s >= 500 => return Self::ServerError,
            _ => {}
        }

        let msg = message.to_lowercase();
        let has = |needles: &[&str]| needles.iter().any(|n| msg.contains(n));
        if has(&["429", "rate limit"]) {
            Self::RateLimited
        } else if has(&["403", "forbidden"]) {
            Self::Blocked
        } else if has(&["captcha", "challenge"]) {
            Self::CaptchaDetected
        } else if has(&["timeout", "timed out"]) {
            Self::NetworkTimeout
        } else if has(&["login", "auth", "sign in"]) {
            Self::AuthenticationRequired
        } else if has(&["not found", "element", "selector"]) {
            Self::LayoutChanged
        } else if has(&["empty", "no content"]) {
            Self::NoContentFound
        } else {
            Self::Unknown
        }
    }

    pub fn from_error(err: &ScoutError) -> Self {
        Self::classify(err.status(), &err.to_string())
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::NetworkTimeout => "network_timeout",
            Self::RateLimited => "rate_limited",
            Self::Blocked => "blocked",
            Self::CaptchaDetected => "captcha_detected",
            Self::LayoutChanged => "layout_changed",
            Self::NoContentFound => "no_content_found",
            Self::AuthenticationRequired => "authentication_required",
            Self::ServerError => "server_error",
            Self::Unknown => "unknown",
        }
    }
}

impl std::fmt::Display for FailureType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What the orchestrator should do next.
#[derive(Debug, Clone)]
pub struct RecoveryDecision {
    pub retry: bool,
    pub new_plan: Option<Plan>,
    pub wait: Duration,
    pub rotate_identity: bool,
    pub switch_strategy: bool,
    /// Set whenever `retry` is false.
    pub abort_reason: Option<String>,
    pub message: String,
}

impl RecoveryDecision {
    fn retry_after(wait: Duration, message: impl Into<String>) -> Self {
        Self {
            retry: true,
            new_plan: None,
            wait,
            rotate_identity: false,
            switch_strategy: false,
            abort_reason: None,
            message: message.into(),
        }
    }

    fn abort(reason: impl Into<String>) -> Self {
        let reason = reason.into();
        Self {
            retry: false,
            new_plan: None,
            wait: Duration::ZERO,
            rotate_identity: false,
            switch_strategy: false,
            message: format!("aborting: {reason}"),
            abort_reason: Some(reason),
        }
    }

    fn rotating(mut self) -> Self {
        self.rotate_identity = true;
        self
    }

    fn switching(mut self) -> Self {
        self.switch_strategy = true;
        self
    }
}

/// Read-only state the engine consults.
#[derive(Debug, Clone, Copy)]
pub struct RecoveryContext<'a> {
    pub goal: &'a Goal,
    pub site: &'a SiteBelief,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FailureRecord {
    pub kind: FailureType,
    pub strategy: Option<StrategyKind>,
    pub message: String,
    pub at: DateTime<Utc>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FailureSummary {
    pub total: usize,
    pub consecutive: u32,
    pub by_type: BTreeMap<String, u32>,
    pub by_strategy: BTreeMap<String, u32>,
}

#[derive(Debug, Default)]
pub struct RecoveryEngine {
    planner: Planner,
    consecutive: u32,
    strategy_retries: HashMap<StrategyKind, u32>,
    history: Vec<FailureRecord>,
}

impl RecoveryEngine {
    pub fn new(planner: Planner) -> Self {
        Self {
            planner,
            ..Self::default()
        }
    }

    /// Consecutive failures since the last success.
    pub fn consecutive_failures(&self) -> u32 {
        self.consecutive
    }

    pub fn reset_on_success(&mut self) {
        self.consecutive = 0;
    }

    pub fn history(&self) -> &[FailureRecord] {
        &self.history
    }

    /// Decide the next action for `failure`. Policies see the consecutive
    /// count from before this failure; the abort gate counts it.
    pub fn decide(
        &mut self,
        failure: FailureType,
        message: &str,
        plan: &mut Plan,
        ctx: RecoveryContext<'_>,
    ) -> RecoveryDecision {
        let prior = self.consecutive;
        self.consecutive += 1;

        let strategy = plan.current().map(|s| s.kind);
        self.history.push(FailureRecord {
            kind: failure,
            strategy,
            message: message.to_string(),
            at: Utc::now(),
        });
        let strategy_retries = match strategy {
            Some(kind) => {
                let n = self.strategy_retries.entry(kind).or_default();
                *n += 1;
                *n
            }
            None => 0,
        };

        // 1. abort gate
        let goal = ctx.goal;
        if self.consecutive >= goal.limits.max_consecutive_failures {
            return RecoveryDecision::abort(format!(
                "{} consecutive failures",
                self.consecutive
            ));
        }
        if goal.is_failed() {
            return RecoveryDecision::abort(format!(
                "error rate {:.1}% exceeds {:.1}%",
                goal.error_rate() * 100.0,
                goal.quality.max_error_rate * 100.0
            ));
        }
        if goal.is_resource_exhausted() {
            return RecoveryDecision::abort(if goal.valid_found() > 0 {
                format!(
                    "resources exhausted with partial results ({}/{})",
                    goal.valid_found(),
                    goal.target_valid
                )
            } else {
                "resources exhausted with no results".to_string()
            });
        }

        // 2. per-type policy
        let mut rng = rand::thread_rng();
        match failure {
            FailureType::RateLimited => {
                let wait = Duration::from_secs((30u64 << prior.min(4)).min(300));
                return RecoveryDecision::retry_after(
                    wait,
                    format!("rate limited, backing off {}s", wait.as_secs()),
                )
                .rotating();
            }
            FailureType::Blocked if prior < 3 => {
                let wait = Duration::from_secs_f64(120.0 + rng.gen_range(0.0..30.0));
                return RecoveryDecision::retry_after(
                    wait,
                    format!("blocked, cooling down {:.0}s", wait.as_secs_f64()),
                )
                .rotating();
            }
            FailureType::Blocked => {
                let new_plan = self.planner.replan_after_failure(plan, "blocked", ctx.site);
                if new_plan.is_empty() {
                    return RecoveryDecision::abort("blocked with no strategies left");
                }
                let mut decision = RecoveryDecision::retry_after(
                    Duration::ZERO,
                    format!("repeatedly blocked, replanning: {}", new_plan.describe()),
                )
                .switching();
                decision.new_plan = Some(new_plan);
                return decision;
            }
            FailureType::CaptchaDetected | FailureType::AuthenticationRequired => {
                if !plan.advance() {
                    return RecoveryDecision::abort(format!("{failure} and no strategies left"));
                }
                return RecoveryDecision::retry_after(
                    Duration::ZERO,
                    format!("{failure}, switching strategy"),
                )
                .switching();
            }
            FailureType::LayoutChanged => {
                return RecoveryDecision::retry_after(
                    Duration::from_secs(5),
                    "layout changed, retrying",
                );
            }
            FailureType::ServerError => {
                let wait = Duration::from_secs(u64::from(prior).saturating_mul(30).min(120));
                return RecoveryDecision::retry_after(
                    wait,
                    format!("server error, retrying in {}s", wait.as_secs()),
                );
            }
            FailureType::NetworkTimeout if prior < 3 => {
                let wait = Duration::from_secs(u64::from(prior) * 10);
                return RecoveryDecision::retry_after(
                    wait,
                    format!("timeout, retrying in {}s", wait.as_secs()),
                );
            }
            FailureType::NetworkTimeout => {
                return RecoveryDecision::abort("network unreliable");
            }
            FailureType::NoContentFound | FailureType::Unknown => {}
        }

        // 3. strategy exhaustion gate
        if strategy_retries >= MAX_STRATEGY_RETRIES {
            self.consecutive = 0;
            if plan.advance() {
                return RecoveryDecision::retry_after(
                    Duration::ZERO,
                    format!(
                        "strategy {} exhausted, moving on",
                        strategy.map(StrategyKind::as_str).unwrap_or("none")
                    ),
                )
                .switching();
            }
            let new_plan = self.planner.replan_after_failure(plan, message, ctx.site);
            if new_plan.is_empty() {
                return RecoveryDecision::abort("all strategies exhausted");
            }
            let mut decision = RecoveryDecision::retry_after(
                Duration::ZERO,
                format!("plan exhausted, replanning: {}", new_plan.describe()),
            )
            .switching();
            decision.new_plan = Some(new_plan);
            return decision;
        }

        // 4. default backoff
        let delay = (5.0 * f64::from(1u32 << prior.min(5))).min(60.0);
        let jitter = rng.gen_range(0.0..=delay * 0.3);
        let wait = Duration::from_secs_f64(delay + jitter);
        let decision = RecoveryDecision::retry_after(
            wait,
            format!("{failure}, backing off {:.0}s", wait.as_secs_f64()),
        );
        if prior >= 2 {
            decision.rotating()
        } else {
            decision
        }
    }

    pub fn failure_summary(&self) -> FailureSummary {
        let mut summary = FailureSummary {
            total: self.history.len(),
            consecutive: self.consecutive,
            ..FailureSummary::default()
        };
        for record in &self.history {
            *summary
                .by_type
                .entry(record.kind.as_str().to_string())
                .or_default() += 1;
            if let Some(kind) = record.strategy {
                *summary
                    .by_strategy
                    .entry(kind.as_str().to_string())
                    .or_default() += 1;
            }
        }
        summary
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::goal::ResourceLimits;
    use crate::planner::Strategy;

    fn plan() -> Plan {
        Plan::new(vec![
            Strategy::new(StrategyKind::SitemapCrawl, "https://a.com/sitemap.xml"),
            Strategy::new(StrategyKind::AutoDiscovery, "https://a.com/"),
        ])
    }

    fn decide(engine: &mut RecoveryEngine, failure: FailureType, plan: &mut Plan) -> RecoveryDecision {
        let goal = Goal::new(10);
        let site = SiteBelief::new("a.com");
        engine.decide(failure, "boom", plan, RecoveryContext { goal: &goal, site: &site })
    }

    #[test]
    fn test_classify_status_first() {
        assert_eq!(FailureType::classify(Some(429), "timeout"), FailureType::RateLimited);
        assert_eq!(FailureType::classify(Some(403), ""), FailureType::Blocked);
        assert_eq!(FailureType::classify(Some(502), ""), FailureType::ServerError);
        assert_eq!(FailureType::classify(Some(404), "nothing"), FailureType::Unknown);
    }

    #[test]
    fn test_classify_signatures() {
        let cases = [
            ("Rate limit reached", FailureType::RateLimited),
            ("Forbidden", FailureType::Blocked),
            ("Cloudflare challenge page", FailureType::CaptchaDetected),
            ("operation timed out", FailureType::NetworkTimeout),
            ("please sign in", FailureType::AuthenticationRequired),
            ("selector .post missing", FailureType::LayoutChanged),
            ("empty response", FailureType::NoContentFound),
            ("connection reset", FailureType::Unknown),
        ];
        for (msg, expected) in cases {
            assert_eq!(FailureType::classify(None, msg), expected, "{msg}");
        }
    }

    #[test]
    fn test_classify_errors() {
        let timeout = ScoutError::Timeout("https://a.com".into());
        assert_eq!(FailureType::from_error(&timeout), FailureType::NetworkTimeout);
        let captcha = ScoutError::Captcha("https://a.com".into());
        assert_eq!(FailureType::from_error(&captcha), FailureType::CaptchaDetected);
        let http = ScoutError::HttpStatus {
            status: 503,
            url: "https://a.com".into(),
        };
        assert_eq!(FailureType::from_error(&http), FailureType::ServerError);
    }

    #[test]
    fn test_first_rate_limit_waits_30s_and_rotates() {
        let mut engine = RecoveryEngine::default();
        let mut plan = plan();
        let decision = decide(&mut engine, FailureType::RateLimited, &mut plan);
        assert!(decision.retry);
        assert_eq!(decision.wait, Duration::from_secs(30));
        assert!(decision.rotate_identity);

        let decision = decide(&mut engine, FailureType::RateLimited, &mut plan);
        assert_eq!(decision.wait, Duration::from_secs(60));
    }

    #[test]
    fn test_rate_limit_wait_is_capped() {
        let mut engine = RecoveryEngine::default();
        engine.consecutive = 6;
        let decision = decide(&mut engine, FailureType::RateLimited, &mut plan());
        assert_eq!(decision.wait, Duration::from_secs(300));
    }

    #[test]
    fn test_timeout_after_three_failures_aborts() {
        let mut engine = RecoveryEngine::default();
        let mut plan = plan();
        for expected in [0, 10, 20] {
            let decision = decide(&mut engine, FailureType::NetworkTimeout, &mut plan);
            assert!(decision.retry);
            assert_eq!(decision.wait, Duration::from_secs(expected));
        }
        let decision = decide(&mut engine, FailureType::NetworkTimeout, &mut plan);
        assert!(!decision.retry);
        assert_eq!(decision.abort_reason.as_deref(), Some("network unreliable"));
    }

    #[test]
    fn test_blocked_cools_down_then_replans() {
        let mut engine = RecoveryEngine::default();
        let mut plan = plan();
        for _ in 0..3 {
            let decision = decide(&mut engine, FailureType::Blocked, &mut plan);
            assert!(decision.retry);
            assert!(decision.rotate_identity);
            assert!(decision.wait >= Duration::from_secs(120));
            assert!(decision.wait <= Duration::from_secs(150));
        }
        let decision = decide(&mut engine, FailureType::Blocked, &mut plan);
        assert!(decision.retry);
        assert!(decision.switch_strategy);
        let new_plan = decision.new_plan.unwrap();
        assert!(new_plan
            .strategies()
            .iter()
            .any(|s| s.kind == StrategyKind::GoogleCache));
    }

    #[test]
    fn test_captcha_advances_plan() {
        let mut engine = RecoveryEngine::default();
        let mut plan = plan();
        let decision = decide(&mut engine, FailureType::CaptchaDetected, &mut plan);
        assert!(decision.retry);
        assert!(decision.switch_strategy);
        assert_eq!(plan.current().unwrap().kind, StrategyKind::AutoDiscovery);

        let decision = decide(&mut engine, FailureType::AuthenticationRequired, &mut plan);
        assert!(!decision.retry);
        assert!(decision.abort_reason.is_some());
    }

    #[test]
    fn test_server_error_and_layout_waits() {
        let mut engine = RecoveryEngine::default();
        let mut plan = plan();
        let decision = decide(&mut engine, FailureType::LayoutChanged, &mut plan);
        assert_eq!(decision.wait, Duration::from_secs(5));
        let decision = decide(&mut engine, FailureType::ServerError, &mut plan);
        assert_eq!(decision.wait, Duration::from_secs(30));
        engine.consecutive = 8;
        engine.strategy_retries.clear();
        let decision = decide(&mut engine, FailureType::ServerError, &mut plan);
        assert_eq!(decision.wait, Duration::from_secs(120));
    }

    #[test]
    fn test_strategy_exhaustion_moves_on_and_resets() {
        let mut engine = RecoveryEngine::default();
        let mut plan = plan();
        decide(&mut engine, FailureType::Unknown, &mut plan);
        decide(&mut engine, FailureType::Unknown, &mut plan);
        let decision = decide(&mut engine, FailureType::Unknown, &mut plan);
        assert!(decision.retry);
        assert!(decision.switch_strategy);
        assert_eq!(engine.consecutive_failures(), 0);
        assert_eq!(plan.current().unwrap().kind, StrategyKind::AutoDiscovery);

        for _ in 0..2 {
            decide(&mut engine, FailureType::NoContentFound, &mut plan);
        }
        let decision = decide(&mut engine, FailureType::NoContentFound, &mut plan);
        let fallback = decision.new_plan.expect("fallback plan");
        assert!(fallback.strategies().iter().all(|s| s.kind.is_mirror()));
    }

    #[test]
    fn test_default_backoff_grows_and_rotates() {
        let mut engine = RecoveryEngine::default();
        let mut plan = Plan::empty();
        let first = decide(&mut engine, FailureType::Unknown, &mut plan);
        assert!(first.wait >= Duration::from_secs(5));
        assert!(first.wait <= Duration::from_secs_f64(6.5));
        assert!(!first.rotate_identity);

        decide(&mut engine, FailureType::Unknown, &mut plan);
        let third = decide(&mut engine, FailureType::Unknown, &mut plan);
        assert!(third.wait >= Duration::from_secs(20));
        assert!(third.rotate_identity);
    }

    #[test]
    fn test_abort_gate_on_consecutive_failures() {
        let mut engine = RecoveryEngine::default();
        engine.consecutive = 9;
        let decision = decide(&mut engine, FailureType::RateLimited, &mut plan());
        assert!(!decision.retry);
        assert!(decision.abort_reason.unwrap().contains("10 consecutive"));
    }

    #[test]
    fn test_abort_gate_on_goal_state() {
        let mut engine = RecoveryEngine::default();
        let site = SiteBelief::new("a.com");

        let mut failing = Goal::new(10);
        failing.record_failure("u", "x");
        let decision = engine.decide(
            FailureType::Unknown,
            "x",
            &mut plan(),
            RecoveryContext { goal: &failing, site: &site },
        );
        assert!(decision.abort_reason.unwrap().starts_with("error rate"));

        let mut spent = Goal::new(10).with_limits(ResourceLimits {
            max_requests: 1,
            ..ResourceLimits::default()
        });
        spent.record_request();
        let decision = engine.decide(
            FailureType::Unknown,
            "x",
            &mut plan(),
            RecoveryContext { goal: &spent, site: &site },
        );
        assert_eq!(
            decision.abort_reason.as_deref(),
            Some("resources exhausted with no results")
        );
    }

    #[test]
    fn test_failure_summary() {
        let mut engine = RecoveryEngine::default();
        let mut plan = plan();
        decide(&mut engine, FailureType::RateLimited, &mut plan);
        decide(&mut engine, FailureType::LayoutChanged, &mut plan);
        let summary = engine.failure_summary();
        assert_eq!(summary.total, 2);
        assert_eq!(summary.consecutive, 2);
        assert_eq!(summary.by_type["rate_limited"], 1);
        assert_eq!(summary.by_strategy["sitemap_crawl"], 2);
        engine.reset_on_success();
        assert_eq!(engine.consecutive_failures(), 0);
    }
}
