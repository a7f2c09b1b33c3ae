//! `jobscout scan <post-url>`: score the apply-link candidates of one post.

use anyhow::{bail, Context, Result};
use jobscout::{LinkScorer, ScoringPolicy, Transport};

use crate::acquisition::http_client::{HttpClient, HttpClientConfig};
use crate::cli::output;

pub async fn run(url: &str, threshold: f64, top: usize, http: HttpClientConfig) -> Result<()> {
    let client = HttpClient::new(http).context("failed to create HTTP client")?;
    let response = client
        .fetch(url, Some("https://www.google.com/"))
        .await
        .with_context(|| format!("failed to fetch {url}"))?;
    if !response.is_success() {
        bail!("{url} answered HTTP {}", response.status);
    }

    let scorer = LinkScorer::new(ScoringPolicy {
        threshold,
        ..ScoringPolicy::default()
    });
    let analysis = scorer.analyze(&response.body, url);
    let best = scorer.best_link(&response.body, url);

    if output::is_json() {
        output::print_json(&serde_json::json!({
            "url": url,
            "title": analysis.title,
            "keywords": analysis.keywords,
            "candidates": analysis.candidates.iter().take(top).collect::<Vec<_>>(),
            "accepted": best,
        }));
        return Ok(());
    }

    output::say(format!("  Title:     {}", analysis.title));
    output::say(format!("  Keywords:  {}", analysis.keywords.join(", ")));
    output::say(format!("  Candidates ({} total):", analysis.candidates.len()));
    for candidate in analysis.candidates.iter().take(top) {
        output::say(format!(
            "    {:>5.0}  {}  [{}]",
            candidate.score,
            output::ellipsize(&candidate.link, 70),
            candidate.context
        ));
    }
    match best {
        Some(found) => output::say(format!("  Accepted:  {} ({:.0})", found.link, found.score)),
        None => output::say(format!("  Accepted:  none (threshold {threshold:.0})")),
    }
    Ok(())
}
