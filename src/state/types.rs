//! Types for the download ledger.

use std::path::PathBuf;

use chrono::{DateTime, Utc};

/// Last known fate of an item.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ItemStatus {
    Downloaded,
    /// Gave up: exhausted its attempts or failed definitively.
    Failed,
}

impl ItemStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Downloaded => "downloaded",
            Self::Failed => "failed",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "downloaded" => Some(Self::Downloaded),
            "failed" => Some(Self::Failed),
            _ => None,
        }
    }
}

#[derive(Debug, Clone)]
#[allow(dead_code)] // status, path and size are only read back by tests
pub struct ItemRecord {
    pub id: i64,
    pub status: ItemStatus,
    pub local_path: Option<PathBuf>,
    pub expected_size: Option<u64>,
    pub attempts: u32,
    pub last_error: Option<String>,
    pub updated_at: DateTime<Utc>,
}

/// Counters written when a run ends.
#[derive(Debug, Clone, Default)]
pub struct RunStats {
    pub batches: u64,
    pub downloaded: u64,
    pub failed: u64,
    pub final_cursor: i64,
    /// Stopped by a signal or a fatal error rather than running out of history.
    pub interrupted: bool,
}

#[derive(Debug, Clone)]
pub struct LedgerSummary {
    pub total_items: u64,
    pub downloaded: u64,
    pub failed: u64,
    pub runs: u64,
    pub last_run_started: Option<DateTime<Utc>>,
    pub last_run_completed: Option<DateTime<Utc>>,
    pub last_run_interrupted: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_item_status_round_trip() {
        for status in [ItemStatus::Downloaded, ItemStatus::Failed] {
            assert_eq!(ItemStatus::from_str(status.as_str()), Some(status));
        }
    }

    #[test]
    fn test_item_status_from_invalid() {
        assert_eq!(ItemStatus::from_str("pending"), None);
    }
}
