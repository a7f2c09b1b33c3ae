//! Shared duplicate ledger: an append-only set of apply links.
//!
//! The ledger is read once at run start and appended once at run end. The
//! file format is UTF-8 text, one trimmed link per line.

use std::fs::OpenOptions;
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use crate::error::ScoutResult;

/// Storage backing the duplicate ledger.
pub trait LedgerStore: Send + Sync {
    /// All links recorded so far, in insertion order.
    fn read_all(&self) -> ScoutResult<Vec<String>>;

    /// Append links. Each link is written as one complete line.
    fn append(&self, links: &[String]) -> ScoutResult<()>;

    /// Human-readable location for log messages.
    fn describe(&self) -> String;
}

/// Canonical form of a link in the ledger.
pub fn normalize_link(link: &str) -> String {
    link.trim().to_string()
}

/// Ledger kept in a plain text file.
pub struct FileLedger {
    path: PathBuf,
    write_lock: Mutex<()>,
}

impl FileLedger {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            write_lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl LedgerStore for FileLedger {
    fn read_all(&self) -> ScoutResult<Vec<String>> {
        if !self.path.exists() {
            return Ok(Vec::new());
        }
        let file = std::fs::File::open(&self.path)?;
        let mut links = Vec::new();
        for line in BufReader::new(file).lines() {
            let line = normalize_link(&line?);
            if !line.is_empty() {
                links.push(line);
            }
        }
        Ok(links)
    }

    fn append(&self, links: &[String]) -> ScoutResult<()> {
        let _guard = self
            .write_lock
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;
        for link in links {
            let line = format!("{}\n", normalize_link(link));
            file.write_all(line.as_bytes())?;
        }
        file.flush()?;
        Ok(())
    }

    fn describe(&self) -> String {
        self.path.display().to_string()
    }
}

/// In-memory ledger for tests and dry runs.
#[derive(Default)]
pub struct MemoryLedger {
    links: Mutex<Vec<String>>,
}

impl MemoryLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_links<I, S>(links: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            links: Mutex::new(links.into_iter().map(Into::into).collect()),
        }
    }

    pub fn links(&self) -> Vec<String> {
        self.links
            .lock()
            .map(|l| l.clone())
            .unwrap_or_default()
    }
}

impl LedgerStore for MemoryLedger {
    fn read_all(&self) -> ScoutResult<Vec<String>> {
        Ok(self.links())
    }

    fn append(&self, links: &[String]) -> ScoutResult<()> {
        let mut guard = self
            .links
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        guard.extend(links.iter().map(|l| normalize_link(l)));
        Ok(())
    }

    fn describe(&self) -> String {
        "memory".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_missing_file_reads_empty() {
        let dir = TempDir::new().unwrap();
        let ledger = FileLedger::new(dir.path().join("seen.txt"));
        assert!(ledger.read_all().unwrap().is_empty());
    }

    #[test]
    fn test_append_then_read() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested").join("seen.txt");
        let ledger = FileLedger::new(&path);

        ledger
            .append(&["https://a.com/apply ".to_string(), "https://b.com".to_string()])
            .unwrap();
        ledger.append(&["https://c.com".to_string()]).unwrap();

        let raw = std::fs::read_to_string(&path).unwrap();
        assert_eq!(raw, "https://a.com/apply\nhttps://b.com\nhttps://c.com\n");
        assert_eq!(
            ledger.read_all().unwrap(),
            vec!["https://a.com/apply", "https://b.com", "https://c.com"]
        );
    }

    #[test]
    fn test_blank_lines_are_ignored() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("seen.txt");
        std::fs::write(&path, "https://a.com\n\n   \n  https://b.com  \n").unwrap();
        let ledger = FileLedger::new(&path);
        assert_eq!(ledger.read_all().unwrap(), vec!["https://a.com", "https://b.com"]);
    }

    #[test]
    fn test_concurrent_appends_keep_whole_lines() {
        let dir = TempDir::new().unwrap();
        let ledger = std::sync::Arc::new(FileLedger::new(dir.path().join("seen.txt")));
        let handles: Vec<_> = (0..4)
            .map(|t| {
                let ledger = ledger.clone();
                std::thread::spawn(move || {
                    let links: Vec<String> =
                        (0..25).map(|i| format!("https://t{t}.com/{i}")).collect();
                    ledger.append(&links).unwrap();
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
        let links = ledger.read_all().unwrap();
        assert_eq!(links.len(), 100);
        assert!(links.iter().all(|l| l.starts_with("https://t")));
    }

    #[test]
    fn test_memory_ledger() {
        let ledger = MemoryLedger::new();
        ledger.append(&[" x ".to_string()]).unwrap();
        assert_eq!(ledger.read_all().unwrap(), vec!["x"]);
        assert_eq!(ledger.describe(), "memory");
    }
}
