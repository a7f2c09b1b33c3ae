//! Full crawl runs over real HTTP against a mock job site, with the file
//! ledger, JSONL results, and the site-belief snapshot on disk.

use chrono::NaiveDate;
use jobscout::{
    DateWindow, FileLedger, Goal, LedgerStore, Orchestrator, PostDiscovery, QualityThresholds,
    ResourceLimits, ResultSink, RunState, Transport, WorldModel,
};
use jobscout_runtime::acquisition::http_client::{HttpClient, HttpClientConfig};
use jobscout_runtime::audit::results::JsonLinesSink;
use jobscout_runtime::cartography::discovery::SiteDiscovery;
use jobscout_runtime::cli::config::RunConfig;
use jobscout_runtime::cli::run_cmd;
use std::sync::Arc;
use tempfile::TempDir;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn day(d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(2025, 3, d).unwrap()
}

fn window() -> DateWindow {
    DateWindow::new(day(3), day(7)).unwrap()
}

const POST_PAGE: &str = r#"<html><head><title>Acme Corp Off Campus Drive 2025</title></head>
<body><h1>Acme Corp Off Campus Drive 2025</h1>
<table><tr><td>Apply Link:</td><td><a href="https://careers.acmecorp.com/apply/123">Click here</a></td></tr></table>
<a href="https://t.me/jobsgroup">Join our Telegram</a>
</body></html>"#;

async fn job_site() -> MockServer {
    let server = MockServer::start().await;
    let base = server.uri();
    Mock::given(method("GET"))
        .and(path("/sitemap.xml"))
        .respond_with(ResponseTemplate::new(200).set_body_string(format!(
            r#"<?xml version="1.0" encoding="UTF-8"?>
<urlset xmlns="http://www.sitemaps.org/schemas/sitemap/0.9">
  <url><loc>{base}/acme-off-campus-drive/</loc><lastmod>2025-03-05</lastmod></url>
</urlset>"#
        )))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/acme-off-campus-drive/"))
        .respond_with(ResponseTemplate::new(200).set_body_string(POST_PAGE))
        .mount(&server)
        .await;
    server
}

struct Workspace {
    dir: TempDir,
}

impl Workspace {
    fn new() -> Self {
        Self {
            dir: TempDir::new().unwrap(),
        }
    }

    fn ledger(&self) -> Arc<FileLedger> {
        Arc::new(FileLedger::new(self.dir.path().join("shared_history.txt")))
    }

    fn results(&self) -> std::path::PathBuf {
        self.dir.path().join("scraped_data")
    }

    fn snapshot(&self) -> std::path::PathBuf {
        self.dir.path().join("world_model.json")
    }

    fn orchestrator(&self) -> Orchestrator {
        let transport: Arc<dyn Transport> =
            Arc::new(HttpClient::new(HttpClientConfig::immediate()).unwrap());
        let discovery: Arc<dyn PostDiscovery> = Arc::new(SiteDiscovery::new());
        let sink: Arc<dyn ResultSink> = Arc::new(JsonLinesSink::new(self.results()));
        Orchestrator::new(Goal::new(1), transport, discovery)
            .with_ledger(self.ledger())
            .with_sink(sink)
            .with_snapshot(self.snapshot())
    }
}

#[tokio::test]
async fn test_run_collects_apply_link_and_persists_everything() {
    let server = job_site().await;
    let workspace = Workspace::new();

    let mut orchestrator = workspace.orchestrator();
    let summary = orchestrator
        .run(&format!("{}/sitemap.xml", server.uri()), Some(window()))
        .await;

    assert_eq!(summary.state, RunState::Achieved, "{summary:?}");
    assert_eq!(summary.records.len(), 1);
    let record = &summary.records[0];
    assert_eq!(record.apply_link, "https://careers.acmecorp.com/apply/123");
    assert_eq!(record.date_posted, Some(day(5)));
    assert!(!record.is_duplicate());
    assert_eq!(summary.new_links_saved, 1);

    let ledger = workspace.ledger().read_all().unwrap();
    assert_eq!(ledger, vec!["https://careers.acmecorp.com/apply/123".to_string()]);

    let location = summary.results_location.clone().unwrap();
    let contents = std::fs::read_to_string(&location).unwrap();
    assert_eq!(contents.lines().count(), 1);
    assert!(contents.contains("careers.acmecorp.com/apply/123"));
    assert!(location.ends_with("_from_2025-03-03_to_2025-03-07.jsonl"));

    let mut world = WorldModel::new();
    world.load_snapshot(&workspace.snapshot()).await.unwrap();
    let site = world.site(&server.uri()).unwrap();
    assert!(site.sitemap_url.is_some());
}

#[tokio::test]
async fn test_second_run_sees_shared_ledger_duplicate() {
    let server = job_site().await;
    let workspace = Workspace::new();
    let target = format!("{}/sitemap.xml", server.uri());

    let first = workspace.orchestrator().run(&target, Some(window())).await;
    assert_eq!(first.state, RunState::Achieved);

    let second = workspace.orchestrator().run(&target, Some(window())).await;
    assert_eq!(second.state, RunState::Achieved);
    assert_eq!(second.goal.duplicates, 1);
    assert!(second.records[0].is_duplicate());
    assert_eq!(second.new_links_saved, 0);
    assert_eq!(workspace.ledger().read_all().unwrap().len(), 1);
}

#[tokio::test]
async fn test_concurrent_targets_keep_every_site_in_snapshot() {
    let first = job_site().await;
    let second = job_site().await;
    let workspace = Workspace::new();
    let config = RunConfig {
        target_jobs: 1,
        window: Some(window()),
        domains: Vec::new(),
        quality: QualityThresholds::default(),
        limits: ResourceLimits::default(),
        ledger_path: Some(workspace.dir.path().join("shared_history.txt")),
        output_dir: workspace.results(),
        snapshot_path: Some(workspace.snapshot()),
        http: HttpClientConfig::immediate(),
    };
    let targets = vec![
        format!("{}/sitemap.xml", first.uri()),
        format!("{}/sitemap.xml", second.uri()),
    ];

    run_cmd::run(&targets, &config).await.unwrap();

    let mut world = WorldModel::new();
    assert_eq!(world.load_snapshot(&workspace.snapshot()).await.unwrap(), 2);
    assert!(world.site(&first.uri()).unwrap().sitemap_url.is_some());
    assert!(world.site(&second.uri()).unwrap().sitemap_url.is_some());
}
