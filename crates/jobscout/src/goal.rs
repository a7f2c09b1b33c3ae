//! The measurable objective of a crawl run and its live progress counters.
//!
//! A `Goal` is created once per run and mutated only by the orchestrator.
//! Status is derived from the counters on every call, never stored.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::time::Instant;

use crate::types::{DateWindow, ExtractedRecord, RecordStatus};
use crate::world_model::normalize_domain;

/// Where a goal currently stands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GoalStatus {
    Pending,
    InProgress,
    Achieved,
    Failed,
    PartiallyAchieved,
}

impl GoalStatus {
    /// Whether the run loop should stop on this status.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            Self::Achieved | Self::Failed | Self::PartiallyAchieved
        )
    }
}

impl std::fmt::Display for GoalStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Pending => write!(f, "pending"),
            Self::InProgress => write!(f, "in_progress"),
            Self::Achieved => write!(f, "achieved"),
            Self::Failed => write!(f, "failed"),
            Self::PartiallyAchieved => write!(f, "partially_achieved"),
        }
    }
}

/// Quality thresholds a run must respect.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct QualityThresholds {
    /// Minimum apply-link score, in scorer points.
    pub min_confidence_score: f64,
    pub max_error_rate: f64,
    pub max_duplicate_rate: f64,
}

impl Default for QualityThresholds {
    fn default() -> Self {
        Self {
            min_confidence_score: 30.0,
            max_error_rate: 0.15,
            max_duplicate_rate: 0.30,
        }
    }
}

/// Hard resource ceilings for a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceLimits {
    pub max_execution_secs: u64,
    pub max_requests: u32,
    pub max_retries_per_url: u32,
    pub max_consecutive_failures: u32,
}

impl Default for ResourceLimits {
    fn default() -> Self {
        Self {
            max_execution_secs: 3600,
            max_requests: 500,
            max_retries_per_url: 3,
            max_consecutive_failures: 10,
        }
    }
}

/// Snapshot of goal progress for reporting.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GoalSummary {
    pub status: GoalStatus,
    pub progress_pct: f64,
    pub valid_found: u32,
    pub target: u32,
    pub success_rate: f64,
    pub error_rate: f64,
    pub duplicates: u32,
    pub total_attempts: u32,
    pub requests_made: u32,
    pub elapsed_secs: f64,
    pub jobs_per_hour: f64,
    pub remaining_secs: f64,
    pub started_at: Option<DateTime<Utc>>,
}

/// Objective of a crawl run.
#[derive(Debug, Clone)]
pub struct Goal {
    pub target_valid: u32,
    /// Normalized domains to accept posts from; empty accepts any.
    pub target_domains: Vec<String>,
    pub window: Option<DateWindow>,
    pub quality: QualityThresholds,
    pub limits: ResourceLimits,

    valid_found: u32,
    total_attempts: u32,
    errors: u32,
    duplicates: u32,
    requests_made: u32,
    started: Option<Instant>,
    finished: Option<Instant>,
    started_at: Option<DateTime<Utc>>,
    records: Vec<ExtractedRecord>,
    failed_urls: Vec<String>,
}

impl Default for Goal {
    fn default() -> Self {
        Self::new(50)
    }
}

impl Goal {
    pub fn new(target_valid: u32) -> Self {
        Self {
            target_valid,
            target_domains: Vec::new(),
            window: None,
            quality: QualityThresholds::default(),
            limits: ResourceLimits::default(),
            valid_found: 0,
            total_attempts: 0,
            errors: 0,
            duplicates: 0,
            requests_made: 0,
            started: None,
            finished: None,
            started_at: None,
            records: Vec::new(),
            failed_urls: Vec::new(),
        }
    }

    pub fn with_window(mut self, window: DateWindow) -> Self {
        self.window = Some(window);
        self
    }

    pub fn with_domains<I, S>(mut self, domains: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.target_domains = domains
            .into_iter()
            .map(|d| normalize_domain(d.as_ref()))
            .collect();
        self
    }

    pub fn with_quality(mut self, quality: QualityThresholds) -> Self {
        self.quality = quality;
        self
    }

    pub fn with_limits(mut self, limits: ResourceLimits) -> Self {
        self.limits = limits;
        self
    }

    // ── status ──

    pub fn is_achieved(&self) -> bool {
        self.valid_found >= self.target_valid
    }

    /// Error rate above the ceiling. Never true before the first attempt.
    pub fn is_failed(&self) -> bool {
        self.total_attempts > 0 && self.error_rate() > self.quality.max_error_rate
    }

    pub fn is_resource_exhausted(&self) -> bool {
        if let Some(started) = self.started {
            let elapsed = self.finished.unwrap_or_else(Instant::now) - started;
            if elapsed > Duration::from_secs(self.limits.max_execution_secs) {
                return true;
            }
        }
        self.requests_made >= self.limits.max_requests
    }

    pub fn status(&self) -> GoalStatus {
        if self.is_achieved() {
            return GoalStatus::Achieved;
        }
        if self.is_failed() {
            return GoalStatus::Failed;
        }
        if self.is_resource_exhausted() {
            return if self.valid_found > 0 {
                GoalStatus::PartiallyAchieved
            } else {
                GoalStatus::Failed
            };
        }
        if self.valid_found > 0 {
            return GoalStatus::InProgress;
        }
        GoalStatus::Pending
    }

    /// Whether posts from `domain` fall inside the target-domain filter.
    pub fn accepts_domain(&self, domain: &str) -> bool {
        if self.target_domains.is_empty() {
            return true;
        }
        let domain = normalize_domain(domain);
        self.target_domains.iter().any(|d| *d == domain)
    }

    // ── metrics ──

    pub fn progress_pct(&self) -> f64 {
        if self.target_valid == 0 {
            return 100.0;
        }
        (f64::from(self.valid_found) / f64::from(self.target_valid) * 100.0).min(100.0)
    }

    pub fn success_rate(&self) -> f64 {
        ratio(self.valid_found, self.total_attempts)
    }

    pub fn error_rate(&self) -> f64 {
        ratio(self.errors, self.total_attempts)
    }

    pub fn duplicate_rate(&self) -> f64 {
        ratio(self.duplicates, self.total_attempts)
    }

    pub fn elapsed(&self) -> Duration {
        match self.started {
            Some(started) => self.finished.unwrap_or_else(Instant::now) - started,
            None => Duration::ZERO,
        }
    }

    /// Wall-clock budget left. The full budget before `start()`.
    pub fn remaining(&self) -> Duration {
        let budget = Duration::from_secs(self.limits.max_execution_secs);
        match self.started {
            Some(started) => budget.saturating_sub(Instant::now() - started),
            None => budget,
        }
    }

    pub fn jobs_per_hour(&self) -> f64 {
        let hours = self.elapsed().as_secs_f64() / 3600.0;
        if hours == 0.0 {
            return 0.0;
        }
        f64::from(self.valid_found) / hours
    }

    // ── counters ──

    pub fn valid_found(&self) -> u32 {
        self.valid_found
    }

    pub fn total_attempts(&self) -> u32 {
        self.total_attempts
    }

    pub fn errors(&self) -> u32 {
        self.errors
    }

    pub fn duplicates(&self) -> u32 {
        self.duplicates
    }

    pub fn requests_made(&self) -> u32 {
        self.requests_made
    }

    pub fn records(&self) -> &[ExtractedRecord] {
        &self.records
    }

    pub fn failed_urls(&self) -> &[String] {
        &self.failed_urls
    }

    // ── updates ──

    pub fn start(&mut self) {
        if self.started.is_none() {
            self.started = Some(Instant::now());
            self.started_at = Some(Utc::now());
        }
    }

    pub fn complete(&mut self) {
        if self.started.is_some() && self.finished.is_none() {
            self.finished = Some(Instant::now());
        }
    }

    pub fn record_success(&mut self, mut record: ExtractedRecord) {
        record.status = RecordStatus::New;
        self.valid_found += 1;
        self.total_attempts += 1;
        self.records.push(record);
    }

    /// A duplicate still counts toward the target.
    pub fn record_duplicate(&mut self, mut record: ExtractedRecord) {
        record.status = RecordStatus::Duplicate;
        self.duplicates += 1;
        self.valid_found += 1;
        self.total_attempts += 1;
        self.records.push(record);
    }

    pub fn record_skip(&mut self) {
        self.total_attempts += 1;
    }

    pub fn record_failure(&mut self, url: &str, reason: &str) {
        tracing::debug!("goal failure recorded for {url}: {reason}");
        self.errors += 1;
        self.total_attempts += 1;
        self.failed_urls.push(url.to_string());
    }

    pub fn record_request(&mut self) {
        self.requests_made += 1;
    }

    /// Count requests a collaborator made on our behalf.
    pub fn record_requests(&mut self, n: u32) {
        self.requests_made += n;
    }

    pub fn summary(&self) -> GoalSummary {
        GoalSummary {
            status: self.status(),
            progress_pct: self.progress_pct(),
            valid_found: self.valid_found,
            target: self.target_valid,
            success_rate: self.success_rate(),
            error_rate: self.error_rate(),
            duplicates: self.duplicates,
            total_attempts: self.total_attempts,
            requests_made: self.requests_made,
            elapsed_secs: self.elapsed().as_secs_f64(),
            jobs_per_hour: self.jobs_per_hour(),
            remaining_secs: self.remaining().as_secs_f64(),
            started_at: self.started_at,
        }
    }
}

impl std::fmt::Display for Goal {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Goal: extract {} jobs | status: {} | progress: {:.1}% | rate: {:.1} jobs/hr",
            self.target_valid,
            self.status(),
            self.progress_pct(),
            self.jobs_per_hour()
        )
    }
}

fn ratio(n: u32, d: u32) -> f64 {
    if d == 0 {
        0.0
    } else {
        f64::from(n) / f64::from(d)
    }
}
