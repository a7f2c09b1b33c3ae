//! Human-readable run log, streamed over a broadcast channel.
//!
//! The orchestrator emits one [`LogLine`] per notable event. Lines flow
//! through a `tokio::sync::broadcast` channel to whoever is listening (the
//! CLI prints them) and are mirrored to `tracing`. With no subscriber the
//! lines are dropped.

use serde::{Deserialize, Serialize};

/// Category shown in brackets at the start of a line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum LogTag {
    Agent,
    Goal,
    Target,
    History,
    Warn,
    Plan,
    Execute,
    Progress,
    Sitemap,
    Check,
    Duplicate,
    Found,
    Skip,
    Success,
    Error,
    Wait,
    Identity,
    Replan,
    Save,
    Complete,
    Stats,
}

impl std::fmt::Display for LogTag {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Agent => "AGENT",
            Self::Goal => "GOAL",
            Self::Target => "TARGET",
            Self::History => "HISTORY",
            Self::Warn => "WARN",
            Self::Plan => "PLAN",
            Self::Execute => "EXECUTE",
            Self::Progress => "PROGRESS",
            Self::Sitemap => "SITEMAP",
            Self::Check => "CHECK",
            Self::Duplicate => "DUPLICATE",
            Self::Found => "FOUND",
            Self::Skip => "SKIP",
            Self::Success => "SUCCESS",
            Self::Error => "ERROR",
            Self::Wait => "WAIT",
            Self::Identity => "IDENTITY",
            Self::Replan => "REPLAN",
            Self::Save => "SAVE",
            Self::Complete => "COMPLETE",
            Self::Stats => "STATS",
        };
        f.write_str(s)
    }
}

/// One line of the run log.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogLine {
    pub run_id: String,
    /// Monotonically increasing per run.
    pub seq: u64,
    pub tag: LogTag,
    pub message: String,
}

impl std::fmt::Display for LogLine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{}] {}", self.tag, self.message)
    }
}

pub type LogSender = tokio::sync::broadcast::Sender<LogLine>;
pub type LogReceiver = tokio::sync::broadcast::Receiver<LogLine>;

/// Bounded broadcast channel for log lines.
pub fn channel() -> (LogSender, LogReceiver) {
    tokio::sync::broadcast::channel(1024)
}

/// Per-run emitter that numbers lines and ignores send errors.
#[derive(Debug)]
pub struct RunLog {
    tx: Option<LogSender>,
    run_id: String,
    seq: u64,
}

impl RunLog {
    pub fn new(run_id: impl Into<String>, tx: Option<LogSender>) -> Self {
        Self {
            tx,
            run_id: run_id.into(),
            seq: 0,
        }
    }

    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    pub fn emit(&mut self, tag: LogTag, message: impl Into<String>) {
        let message = message.into();
        self.seq += 1;
        tracing::info!(run_id = %self.run_id, "[{tag}] {message}");
        if let Some(ref sender) = self.tx {
            let _ = sender.send(LogLine {
                run_id: self.run_id.clone(),
                seq: self.seq,
                tag,
                message,
            });
        }
    }
}
