//! JSONL results writer: one extracted record per line, one file per run.

use async_trait::async_trait;
use chrono::Local;
use jobscout::{domain_of, ExtractedRecord, ResultSink, RunLabel, ScoutResult};
use std::path::PathBuf;
use tokio::io::AsyncWriteExt;

/// Writes each run's records to
/// `{slug}_{timestamp}_from_{start}_to_{end}.jsonl` under a folder.
#[derive(Debug, Clone)]
pub struct JsonLinesSink {
    folder: PathBuf,
}

impl JsonLinesSink {
    pub fn new(folder: impl Into<PathBuf>) -> Self {
        Self {
            folder: folder.into(),
        }
    }

    pub fn file_name(label: &RunLabel, timestamp: &str) -> String {
        format!(
            "{}_{timestamp}_from_{}_to_{}.jsonl",
            slug(&label.target),
            label.window.start,
            label.window.end
        )
    }
}

/// File-name-safe form of a target's domain.
fn slug(target: &str) -> String {
    let domain = domain_of(target).unwrap_or_else(|| target.to_string());
    let slug: String = domain
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
        .collect();
    if slug.is_empty() {
        "results".to_string()
    } else {
        slug
    }
}

#[async_trait]
impl ResultSink for JsonLinesSink {
    async fn save(&self, records: &[ExtractedRecord], label: &RunLabel) -> ScoutResult<String> {
        tokio::fs::create_dir_all(&self.folder).await?;
        let timestamp = Local::now().format("%Y%m%d_%H%M%S").to_string();
        let path = self.folder.join(Self::file_name(label, &timestamp));

        let mut body = String::new();
        for record in records {
            body.push_str(&serde_json::to_string(record)?);
            body.push('\n');
        }

        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .await?;
        file.write_all(body.as_bytes()).await?;
        file.flush().await?;

        tracing::info!("wrote {} records to {}", records.len(), path.display());
        Ok(path.display().to_string())
    }
}
