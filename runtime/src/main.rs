// Copyright 2026 Jobscout Contributors
// SPDX-License-Identifier: MIT

use anyhow::Result;
use chrono::NaiveDate;
use clap::{CommandFactory, Parser, Subcommand};
use clap_complete::Shell;
use std::path::PathBuf;
use std::time::Duration;

use jobscout::{QualityThresholds, ResourceLimits};
use jobscout_runtime::acquisition::http_client::HttpClientConfig;
use jobscout_runtime::cli;
use jobscout_runtime::cli::config::{self, RunConfig};

#[derive(Parser)]
#[command(
    name = "jobscout",
    about = "jobscout: autonomous job-post crawler",
    version,
    after_help = "Run 'jobscout <command> --help' for details on each command."
)]
struct Cli {
    /// Output results as JSON (machine-readable)
    #[arg(long, global = true)]
    json: bool,

    /// Suppress non-essential output
    #[arg(long, short, global = true)]
    quiet: bool,

    /// Enable verbose/debug logging
    #[arg(long, short, global = true)]
    verbose: bool,

    /// Emit tracing logs as JSON on stderr
    #[arg(long, global = true, env = "JOBSCOUT_JSON_LOGS")]
    json_logs: bool,

    #[command(flatten)]
    http: HttpArgs,

    #[command(subcommand)]
    command: Commands,
}

#[derive(clap::Args)]
struct HttpArgs {
    /// HTTP request timeout in seconds
    #[arg(long, global = true, default_value = "30", env = "JOBSCOUT_TIMEOUT")]
    timeout: u64,

    /// Shortest random pause before each request, in seconds
    #[arg(long, global = true, default_value = "2.0", env = "JOBSCOUT_MIN_DELAY")]
    min_delay: f64,

    /// Longest random pause before each request, in seconds
    #[arg(long, global = true, default_value = "5.0", env = "JOBSCOUT_MAX_DELAY")]
    max_delay: f64,
}

impl HttpArgs {
    fn config(&self) -> Result<HttpClientConfig> {
        let (think_min, think_max) = config::think_bounds(self.min_delay, self.max_delay)?;
        Ok(HttpClientConfig {
            timeout: Duration::from_secs(self.timeout),
            think_min,
            think_max,
            ..HttpClientConfig::default()
        })
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Crawl one or more job sites until the goal is met
    Run {
        /// Site, listing page, or sitemap URLs to crawl
        #[arg(required = true)]
        targets: Vec<String>,
        /// Valid jobs to collect per target
        #[arg(long, default_value = "50", env = "JOBSCOUT_TARGET_JOBS")]
        jobs: u32,
        /// First publish date to include (YYYY-MM-DD)
        #[arg(long, env = "JOBSCOUT_START")]
        start: Option<NaiveDate>,
        /// Last publish date to include (YYYY-MM-DD, default today)
        #[arg(long, env = "JOBSCOUT_END")]
        end: Option<NaiveDate>,
        /// Include posts from the last N days (default 7)
        #[arg(long, conflicts_with = "start", env = "JOBSCOUT_DAYS")]
        days: Option<u32>,
        /// Only accept posts from these domains
        #[arg(long = "domain", env = "JOBSCOUT_DOMAINS", value_delimiter = ',')]
        domains: Vec<String>,
        /// Minimum apply-link score
        #[arg(long, default_value = "30", env = "JOBSCOUT_MIN_SCORE")]
        min_score: f64,
        /// Error rate that fails the run
        #[arg(long, default_value = "0.15", env = "JOBSCOUT_MAX_ERROR_RATE")]
        max_error_rate: f64,
        /// Duplicate rate that ends a strategy
        #[arg(long, default_value = "0.30", env = "JOBSCOUT_MAX_DUPLICATE_RATE")]
        max_duplicate_rate: f64,
        /// Wall-clock budget per target, in seconds
        #[arg(long, default_value = "3600", env = "JOBSCOUT_MAX_TIME")]
        max_time: u64,
        /// Request budget per target
        #[arg(long, default_value = "500", env = "JOBSCOUT_MAX_REQUESTS")]
        max_requests: u32,
        /// Shared duplicate ledger (default ~/.jobscout/shared_history.txt)
        #[arg(long, env = "JOBSCOUT_LEDGER")]
        ledger: Option<PathBuf>,
        /// Run without a shared ledger
        #[arg(long, conflicts_with = "ledger")]
        no_ledger: bool,
        /// Folder for result files
        #[arg(long, default_value = "scraped_data", env = "JOBSCOUT_OUTPUT")]
        output: PathBuf,
        /// Site beliefs snapshot (default ~/.jobscout/world_model.json)
        #[arg(long, env = "JOBSCOUT_SNAPSHOT")]
        snapshot: Option<PathBuf>,
        /// Do not load or save site beliefs
        #[arg(long, conflicts_with = "snapshot")]
        no_snapshot: bool,
    },
    /// List the posts a sitemap yields for a date window
    Sitemap {
        /// Sitemap URL (XML, sitemap index, or HTML table)
        url: String,
        /// First date to include (YYYY-MM-DD)
        #[arg(long)]
        start: Option<NaiveDate>,
        /// Last date to include (YYYY-MM-DD)
        #[arg(long)]
        end: Option<NaiveDate>,
        /// Include posts from the last N days
        #[arg(long, default_value = "7", conflicts_with = "start")]
        days: u32,
        /// Posts to print
        #[arg(long, default_value = "20")]
        limit: usize,
    },
    /// Score the apply-link candidates of a single post
    Scan {
        /// Post URL
        url: String,
        /// Minimum winning score
        #[arg(long, default_value = "30")]
        threshold: f64,
        /// Candidates to print
        #[arg(long, default_value = "5")]
        top: usize,
    },
    /// Generate shell completion scripts
    Completions {
        /// Shell type (bash, zsh, fish, powershell, elvish)
        shell: Shell,
    },
}

fn init_tracing(verbose: bool, json: bool) {
    // run log lines go to stdout, so tracing stays at warnings unless asked
    let fallback = if verbose {
        "jobscout=debug,jobscout_runtime=debug"
    } else {
        "jobscout=warn,jobscout_runtime=warn"
    };
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(fallback));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Set global flags via environment variables so all modules can check them
    if cli.json {
        std::env::set_var("JOBSCOUT_JSON", "1");
    }
    if cli.quiet {
        std::env::set_var("JOBSCOUT_QUIET", "1");
    }
    init_tracing(cli.verbose, cli.json_logs);

    let result = match cli.command {
        Commands::Run {
            targets,
            jobs,
            start,
            end,
            days,
            domains,
            min_score,
            max_error_rate,
            max_duplicate_rate,
            max_time,
            max_requests,
            ledger,
            no_ledger,
            output,
            snapshot,
            no_snapshot,
        } => {
            let run_config = config::resolve_window(start, end, days).and_then(|window| {
                Ok(RunConfig {
                    target_jobs: jobs,
                    window,
                    domains,
                    quality: QualityThresholds {
                        min_confidence_score: min_score,
                        max_error_rate,
                        max_duplicate_rate,
                    },
                    limits: ResourceLimits {
                        max_execution_secs: max_time,
                        max_requests,
                        ..ResourceLimits::default()
                    },
                    ledger_path: if no_ledger {
                        None
                    } else {
                        Some(ledger.unwrap_or_else(config::default_ledger_path))
                    },
                    output_dir: output,
                    snapshot_path: if no_snapshot {
                        None
                    } else {
                        Some(snapshot.unwrap_or_else(config::default_snapshot_path))
                    },
                    http: cli.http.config()?,
                })
            });
            match run_config {
                Ok(run_config) => cli::run_cmd::run(&targets, &run_config).await,
                Err(e) => Err(e),
            }
        }
        Commands::Sitemap {
            url,
            start,
            end,
            days,
            limit,
        } => match config::resolve_window(start, end, Some(days)) {
            Ok(Some(window)) => match cli.http.config() {
                Ok(http) => cli::sitemap_cmd::run(&url, window, limit, http).await,
                Err(e) => Err(e),
            },
            Ok(None) => Err(anyhow::anyhow!("no date window")),
            Err(e) => Err(e),
        },
        Commands::Scan {
            url,
            threshold,
            top,
        } => match cli.http.config() {
            Ok(http) => cli::scan_cmd::run(&url, threshold, top, http).await,
            Err(e) => Err(e),
        },
        Commands::Completions { shell } => {
            let mut cmd = Cli::command();
            clap_complete::generate(shell, &mut cmd, "jobscout", &mut std::io::stdout());
            Ok(())
        }
    };

    // Consistent exit codes: 0=success, 1=error
    if let Err(e) = &result {
        if cli::output::is_json() {
            cli::output::print_json(&serde_json::json!({
                "error": true,
                "message": format!("{e:#}"),
            }));
        } else if !cli::output::is_quiet() {
            eprintln!("  Error: {e:#}");
        }
        std::process::exit(1);
    }

    result
}
