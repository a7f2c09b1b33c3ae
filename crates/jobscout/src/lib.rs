// Copyright 2026 Jobscout Contributors
// SPDX-License-Identifier: MIT

//! Jobscout core: goal tracking, site beliefs, strategy planning, failure
//! recovery, apply-link scoring, and the orchestrator that drives a crawl.
//!
//! All I/O goes through the traits in [`collab`]; the `jobscout-runtime`
//! crate provides the HTTP, sitemap, and file adapters.

pub mod collab;
pub mod error;
pub mod goal;
pub mod lease;
pub mod ledger;
pub mod orchestrator;
pub mod planner;
pub mod progress;
pub mod recovery;
pub mod scorer;
pub mod types;
pub mod world_model;

pub use collab::{
    Discovery, DiscoveryMode, DiscoveryRequest, FetchResponse, PostDiscovery, ResultSink,
    RunLabel, Transport,
};
pub use error::{ScoutError, ScoutResult};
pub use goal::{Goal, GoalStatus, GoalSummary, QualityThresholds, ResourceLimits};
pub use lease::{DomainLease, DomainLeases, LeasedTransport};
pub use ledger::{FileLedger, LedgerStore, MemoryLedger};
pub use orchestrator::{Orchestrator, RunState, RunSummary};
pub use planner::{Plan, Planner, Strategy, StrategyConfig, StrategyKind, StrategyOutcome};
pub use progress::{LogLine, LogReceiver, LogSender, LogTag, RunLog};
pub use recovery::{FailureType, RecoveryContext, RecoveryDecision, RecoveryEngine};
pub use scorer::{LinkMatch, LinkScorer, ScoringPolicy};
pub use types::*;
pub use world_model::{
    domain_of, normalize_domain, SiteBelief, SiteCapability, SiteObservation, SitemapKind,
    ThreatLevel, WorldModel, WorldSummary,
};
