//! Core data types for extracted records and discovered posts.

use chrono::{Duration, NaiveDate};
use serde::{Deserialize, Serialize};

use crate::error::{ScoutError, ScoutResult};

/// Inclusive publication-date window.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DateWindow {
    pub start: NaiveDate,
    pub end: NaiveDate,
}

impl DateWindow {
    pub fn new(start: NaiveDate, end: NaiveDate) -> ScoutResult<Self> {
        if start > end {
            return Err(ScoutError::InvalidWindow { start, end });
        }
        Ok(Self { start, end })
    }

    /// From `days` days before `today` through `today`.
    pub fn last_days(days: u32, today: NaiveDate) -> Self {
        Self {
            start: today - Duration::days(i64::from(days)),
            end: today,
        }
    }

    pub fn contains(&self, date: NaiveDate) -> bool {
        date >= self.start && date <= self.end
    }
}

impl std::fmt::Display for DateWindow {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} to {}", self.start, self.end)
    }
}

/// Whether an extracted apply link was new to the ledger.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordStatus {
    New,
    Duplicate,
}

/// One job post with its resolved apply link.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExtractedRecord {
    pub date_posted: Option<NaiveDate>,
    pub job_title: String,
    pub apply_link: String,
    pub anchor_text: String,
    /// Where on the page the link was found, with any score boosts.
    pub context: String,
    pub source_post: String,
    pub score: f64,
    pub status: RecordStatus,
}

impl ExtractedRecord {
    pub fn is_duplicate(&self) -> bool {
        self.status == RecordStatus::Duplicate
    }
}

/// A candidate post URL produced by a discovery collaborator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiscoveredPost {
    pub url: String,
    /// Publication date when the listing exposed one.
    pub published: Option<NaiveDate>,
}

impl DiscoveredPost {
    pub fn new(url: impl Into<String>, published: Option<NaiveDate>) -> Self {
        Self {
            url: url.into(),
            published,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn day(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn test_window_is_inclusive() {
        let window = DateWindow::new(day(2025, 3, 1), day(2025, 3, 7)).unwrap();
        assert!(window.contains(day(2025, 3, 1)));
        assert!(window.contains(day(2025, 3, 7)));
        assert!(!window.contains(day(2025, 2, 28)));
        assert!(!window.contains(day(2025, 3, 8)));
    }

    #[test]
    fn test_window_rejects_reversed_bounds() {
        let err = DateWindow::new(day(2025, 3, 7), day(2025, 3, 1)).unwrap_err();
        assert!(matches!(err, ScoutError::InvalidWindow { .. }));
    }

    #[test]
    fn test_last_days() {
        let window = DateWindow::last_days(7, day(2025, 3, 10));
        assert_eq!(window.start, day(2025, 3, 3));
        assert_eq!(window.end, day(2025, 3, 10));
        assert_eq!(window.to_string(), "2025-03-03 to 2025-03-10");

        let single = DateWindow::last_days(0, day(2025, 3, 10));
        assert_eq!(single.start, single.end);
    }
}
