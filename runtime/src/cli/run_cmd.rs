//! `jobscout run <target>...`: crawl one or more sites until each goal settles.

use anyhow::{bail, Context, Result};
use jobscout::{
    DomainLeases, FileLedger, LedgerStore, Orchestrator, PostDiscovery, ResultSink, RunState,
    RunSummary, Transport, WorldModel,
};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use crate::acquisition::http_client::HttpClient;
use crate::audit::results::JsonLinesSink;
use crate::cartography::discovery::SiteDiscovery;
use crate::cli::config::RunConfig;
use crate::cli::output;

/// Run every target concurrently with a shared ledger and shared politeness
/// leases. Ctrl-C cancels all runs; partial results are still saved.
///
/// Runs start from the same site beliefs and the snapshot is written once,
/// after every run has finished.
pub async fn run(targets: &[String], config: &RunConfig) -> Result<()> {
    if targets.is_empty() {
        bail!("no target URLs given");
    }

    let mut beliefs = WorldModel::new();
    if let Some(path) = &config.snapshot_path {
        if tokio::fs::try_exists(path).await.unwrap_or(false) {
            match beliefs.load_snapshot(path).await {
                Ok(n) => tracing::info!("loaded beliefs for {n} sites from {}", path.display()),
                Err(e) => tracing::warn!("could not load world model from {}: {e}", path.display()),
            }
        }
    }

    let ledger: Option<Arc<dyn LedgerStore>> = config
        .ledger_path
        .as_ref()
        .map(|path| Arc::new(FileLedger::new(path)) as Arc<dyn LedgerStore>);
    let sink: Arc<dyn ResultSink> = Arc::new(JsonLinesSink::new(&config.output_dir));
    let leases = Arc::new(DomainLeases::new());
    let cancel = CancellationToken::new();

    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                output::say("\n  Interrupted, finishing up...");
                cancel.cancel();
            }
        });
    }

    let (tx, mut rx) = jobscout::progress::channel();
    let printer = tokio::spawn(async move {
        loop {
            match rx.recv().await {
                Ok(line) => output::say(format!("[{}] {line}", short_id(&line.run_id))),
                Err(tokio::sync::broadcast::error::RecvError::Lagged(n)) => {
                    tracing::warn!("log printer skipped {n} lines");
                }
                Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
            }
        }
    });

    let mut runs = Vec::with_capacity(targets.len());
    for target in targets {
        let transport: Arc<dyn Transport> = Arc::new(
            HttpClient::new(config.http.clone()).context("failed to create HTTP client")?,
        );
        let discovery: Arc<dyn PostDiscovery> = Arc::new(SiteDiscovery::new());

        let mut orchestrator = Orchestrator::new(config.goal(), transport, discovery)
            .with_world_model(beliefs.clone())
            .with_sink(sink.clone())
            .with_leases(leases.clone())
            .with_cancel(cancel.clone())
            .with_log(tx.clone());
        if let Some(ledger) = &ledger {
            orchestrator = orchestrator.with_ledger(ledger.clone());
        }

        let target = target.clone();
        let window = config.window;
        runs.push(async move {
            let summary = orchestrator.run(&target, window).await;
            (summary, orchestrator.into_world())
        });
    }
    drop(tx);

    let (summaries, worlds): (Vec<RunSummary>, Vec<WorldModel>) =
        futures::future::join_all(runs).await.into_iter().unzip();
    let _ = printer.await;

    if let Some(path) = &config.snapshot_path {
        for world in worlds {
            beliefs.merge(world);
        }
        if let Err(e) = beliefs.save_snapshot(path).await {
            tracing::warn!("could not save world model to {}: {e}", path.display());
        }
    }

    if output::is_json() {
        output::print_json(&summaries);
    } else {
        for summary in &summaries {
            print_summary(summary);
        }
    }

    if summaries.iter().all(|s| s.state == RunState::Failed) {
        let reasons: Vec<String> = summaries
            .iter()
            .map(|s| {
                format!(
                    "{}: {}",
                    s.target,
                    s.abort_reason.as_deref().unwrap_or("no jobs found")
                )
            })
            .collect();
        bail!("all runs failed ({})", reasons.join("; "));
    }
    Ok(())
}

fn short_id(run_id: &str) -> &str {
    run_id.get(..8).unwrap_or(run_id)
}

fn print_summary(summary: &RunSummary) {
    output::say("");
    output::say(format!("  {} ({})", summary.target, summary.window));
    output::say(format!(
        "  Status:      {}{}",
        summary.state,
        if summary.cancelled { " (cancelled)" } else { "" }
    ));
    output::say(format!(
        "  Jobs:        {}/{} ({} duplicates)",
        summary.goal.valid_found, summary.goal.target, summary.goal.duplicates
    ));
    output::say(format!(
        "  Requests:    {} in {:.0}s",
        summary.goal.requests_made, summary.goal.elapsed_secs
    ));
    if let Some(reason) = &summary.abort_reason {
        output::say(format!("  Stopped:     {reason}"));
    }
    if let Some(location) = &summary.results_location {
        output::say(format!("  Results:     {location}"));
    }
    for record in summary.records.iter().take(10) {
        output::say(format!(
            "    {} {} -> {}",
            if record.is_duplicate() { "=" } else { "+" },
            output::ellipsize(&record.job_title, 50),
            record.apply_link
        ));
    }
    if summary.records.len() > 10 {
        output::say(format!("    ... and {} more", summary.records.len() - 10));
    }
}
