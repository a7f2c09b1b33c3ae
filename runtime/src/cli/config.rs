//! Run configuration assembled from CLI flags and `JOBSCOUT_*` variables.

use anyhow::{bail, Result};
use chrono::{Local, NaiveDate};
use jobscout::{DateWindow, Goal, QualityThresholds, ResourceLimits};
use std::path::PathBuf;
use std::time::Duration;

use crate::acquisition::http_client::HttpClientConfig;

/// Everything `jobscout run` needs besides the targets.
#[derive(Debug, Clone)]
pub struct RunConfig {
    pub target_jobs: u32,
    pub window: Option<DateWindow>,
    pub domains: Vec<String>,
    pub quality: QualityThresholds,
    pub limits: ResourceLimits,
    /// `None` runs in isolated mode.
    pub ledger_path: Option<PathBuf>,
    pub output_dir: PathBuf,
    pub snapshot_path: Option<PathBuf>,
    pub http: HttpClientConfig,
}

impl RunConfig {
    pub fn goal(&self) -> Goal {
        let goal = Goal::new(self.target_jobs)
            .with_quality(self.quality)
            .with_limits(self.limits)
            .with_domains(&self.domains);
        match self.window {
            Some(window) => goal.with_window(window),
            None => goal,
        }
    }
}

/// Window from explicit bounds, or the last `days` days. Neither leaves the
/// default to the orchestrator.
pub fn resolve_window(
    start: Option<NaiveDate>,
    end: Option<NaiveDate>,
    days: Option<u32>,
) -> Result<Option<DateWindow>> {
    let today = Local::now().date_naive();
    match (start, end, days) {
        (Some(start), end, _) => Ok(Some(DateWindow::new(start, end.unwrap_or(today))?)),
        (None, Some(_), _) => bail!("--end requires --start"),
        (None, None, Some(days)) => Ok(Some(DateWindow::last_days(days, today))),
        (None, None, None) => Ok(None),
    }
}

/// Politeness pause bounds, in seconds.
pub fn think_bounds(min_secs: f64, max_secs: f64) -> Result<(Duration, Duration)> {
    if !(min_secs >= 0.0 && max_secs >= min_secs) {
        bail!("invalid delay bounds: min {min_secs}s, max {max_secs}s");
    }
    Ok((
        Duration::from_secs_f64(min_secs),
        Duration::from_secs_f64(max_secs),
    ))
}

/// `~/.jobscout`, or `$JOBSCOUT_HOME` when set.
pub fn jobscout_home() -> PathBuf {
    read_env_string("JOBSCOUT_HOME")
        .filter(|v| !v.is_empty())
        .map(PathBuf::from)
        .unwrap_or_else(|| {
            dirs::home_dir()
                .unwrap_or_else(|| PathBuf::from("/tmp"))
                .join(".jobscout")
        })
}

pub fn default_ledger_path() -> PathBuf {
    jobscout_home().join("shared_history.txt")
}

pub fn default_snapshot_path() -> PathBuf {
    jobscout_home().join("world_model.json")
}

fn read_env_string(name: &str) -> Option<String> {
    std::env::var(name).ok().map(|v| v.trim().to_string())
}
