//! Ledger trait and SQLite implementation.

use std::path::{Path, PathBuf};
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use rusqlite::{Connection, OptionalExtension};

use super::error::StateError;
use super::schema;
use super::types::{ItemRecord, ItemStatus, LedgerSummary, RunStats};

/// Write side used by the walker plus the queries behind `status`.
///
/// Object-safe so the walker can hold an `Arc<dyn StateDb>`.
#[async_trait]
pub trait StateDb: Send + Sync {
    async fn record_downloaded(
        &self,
        id: i64,
        local_path: &Path,
        expected_size: Option<u64>,
        attempts: u32,
    ) -> Result<(), StateError>;

    /// Record a definitive failure. A later successful download overwrites it.
    async fn record_failed(&self, id: i64, error: &str, attempts: u32) -> Result<(), StateError>;

    async fn get_failed(&self) -> Result<Vec<ItemRecord>, StateError>;

    async fn get_summary(&self) -> Result<LedgerSummary, StateError>;

    /// Start a new run and return its ID.
    async fn start_run(&self) -> Result<i64, StateError>;

    async fn complete_run(&self, run_id: i64, stats: &RunStats) -> Result<(), StateError>;
}

pub struct SqliteStateDb {
    /// rusqlite::Connection is not Sync.
    conn: Mutex<Connection>,
    path: PathBuf,
}

impl std::fmt::Debug for SqliteStateDb {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SqliteStateDb")
            .field("path", &self.path)
            .finish_non_exhaustive()
    }
}

impl SqliteStateDb {
    /// Open or create a ledger at the given path.
    pub async fn open(path: &Path) -> Result<Self, StateError> {
        let path = path.to_path_buf();
        let path_clone = path.clone();

        let conn = tokio::task::spawn_blocking(move || {
            let conn = Connection::open(&path_clone).map_err(|e| StateError::Open {
                path: path_clone.clone(),
                source: e,
            })?;

            conn.pragma_update(None, "journal_mode", "WAL")
                .map_err(StateError::Migration)?;
            // Safe with WAL
            conn.pragma_update(None, "synchronous", "NORMAL")
                .map_err(StateError::Migration)?;

            schema::migrate(&conn)?;

            Ok::<_, StateError>(conn)
        })
        .await??;

        Ok(Self {
            conn: Mutex::new(conn),
            path,
        })
    }

    #[cfg(test)]
    pub fn open_in_memory() -> Result<Self, StateError> {
        let conn = Connection::open_in_memory().map_err(|e| StateError::Open {
            path: PathBuf::from(":memory:"),
            source: e,
        })?;
        schema::migrate(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
            path: PathBuf::from(":memory:"),
        })
    }

    #[cfg(test)]
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, Connection>, StateError> {
        self.conn
            .lock()
            .map_err(|e| StateError::Query(e.to_string()))
    }
}

#[async_trait]
impl StateDb for SqliteStateDb {
    async fn record_downloaded(
        &self,
        id: i64,
        local_path: &Path,
        expected_size: Option<u64>,
        attempts: u32,
    ) -> Result<(), StateError> {
        let now = Utc::now().timestamp();
        let conn = self.lock()?;

        conn.execute(
            r#"
            INSERT INTO items (id, status, local_path, expected_size, attempts, last_error, updated_at)
            VALUES (?1, ?2, ?3, ?4, ?5, NULL, ?6)
            ON CONFLICT(id) DO UPDATE SET
                status = excluded.status,
                local_path = excluded.local_path,
                expected_size = excluded.expected_size,
                attempts = items.attempts + excluded.attempts,
                last_error = NULL,
                updated_at = excluded.updated_at
            "#,
            rusqlite::params![
                id,
                ItemStatus::Downloaded.as_str(),
                local_path.to_string_lossy(),
                expected_size.map(|s| s as i64),
                attempts,
                now,
            ],
        )
        .map_err(StateError::query)?;

        Ok(())
    }

    async fn record_failed(&self, id: i64, error: &str, attempts: u32) -> Result<(), StateError> {
        let now = Utc::now().timestamp();
        let conn = self.lock()?;

        conn.execute(
            r#"
            INSERT INTO items (id, status, attempts, last_error, updated_at)
            VALUES (?1, ?2, ?3, ?4, ?5)
            ON CONFLICT(id) DO UPDATE SET
                status = excluded.status,
                attempts = items.attempts + excluded.attempts,
                last_error = excluded.last_error,
                updated_at = excluded.updated_at
            "#,
            rusqlite::params![id, ItemStatus::Failed.as_str(), attempts, error, now],
        )
        .map_err(StateError::query)?;

        Ok(())
    }

    async fn get_failed(&self) -> Result<Vec<ItemRecord>, StateError> {
        let conn = self.lock()?;

        let mut stmt = conn
            .prepare(
                "SELECT id, status, local_path, expected_size, attempts, last_error, updated_at FROM items WHERE status = 'failed' ORDER BY id",
            )
            .map_err(StateError::query)?;

        let records = stmt
            .query_map([], |row| Ok(row_to_item_record(row)))
            .map_err(StateError::query)?
            .collect::<Result<Vec<_>, _>>()
            .map_err(StateError::query)?;

        Ok(records)
    }

    async fn get_summary(&self) -> Result<LedgerSummary, StateError> {
        let conn = self.lock()?;

        let count = |sql: &str| -> Result<u64, StateError> {
            conn.query_row(sql, [], |row| row.get::<_, i64>(0))
                .map(|n| n as u64)
                .map_err(StateError::query)
        };
        let total_items = count("SELECT COUNT(*) FROM items")?;
        let downloaded = count("SELECT COUNT(*) FROM items WHERE status = 'downloaded'")?;
        let failed = count("SELECT COUNT(*) FROM items WHERE status = 'failed'")?;
        let runs = count("SELECT COUNT(*) FROM runs")?;

        let last_run: Option<(Option<i64>, Option<i64>, i64)> = conn
            .query_row(
                "SELECT started_at, completed_at, interrupted FROM runs ORDER BY id DESC LIMIT 1",
                [],
                |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
            )
            .optional()
            .map_err(StateError::query)?;

        let (last_run_started, last_run_completed, last_run_interrupted) = match last_run {
            Some((started, completed, interrupted)) => (
                started.and_then(timestamp),
                completed.and_then(timestamp),
                interrupted != 0,
            ),
            None => (None, None, false),
        };

        Ok(LedgerSummary {
            total_items,
            downloaded,
            failed,
            runs,
            last_run_started,
            last_run_completed,
            last_run_interrupted,
        })
    }

    async fn start_run(&self) -> Result<i64, StateError> {
        let started_at = Utc::now().timestamp();
        let conn = self.lock()?;

        conn.execute("INSERT INTO runs (started_at) VALUES (?1)", [started_at])
            .map_err(StateError::query)?;

        Ok(conn.last_insert_rowid())
    }

    async fn complete_run(&self, run_id: i64, stats: &RunStats) -> Result<(), StateError> {
        let completed_at = Utc::now().timestamp();
        let conn = self.lock()?;

        conn.execute(
            "UPDATE runs SET completed_at = ?1, batches = ?2, downloaded = ?3, failed = ?4, final_cursor = ?5, interrupted = ?6 WHERE id = ?7",
            rusqlite::params![
                completed_at,
                stats.batches as i64,
                stats.downloaded as i64,
                stats.failed as i64,
                stats.final_cursor,
                stats.interrupted as i64,
                run_id
            ],
        )
        .map_err(StateError::query)?;

        Ok(())
    }
}

fn timestamp(ts: i64) -> Option<DateTime<Utc>> {
    Utc.timestamp_opt(ts, 0).single()
}

fn row_to_item_record(row: &rusqlite::Row<'_>) -> ItemRecord {
    let id: i64 = row.get(0).unwrap_or_default();
    let status_str: String = row.get(1).unwrap_or_default();
    let local_path: Option<String> = row.get(2).ok().flatten();
    let expected_size: Option<i64> = row.get(3).ok().flatten();
    let attempts: i64 = row.get(4).unwrap_or(0);
    let last_error: Option<String> = row.get(5).ok().flatten();
    let updated_at: i64 = row.get(6).unwrap_or(0);

    ItemRecord {
        id,
        status: ItemStatus::from_str(&status_str).unwrap_or(ItemStatus::Failed),
        local_path: local_path.map(PathBuf::from),
        expected_size: expected_size.map(|s| s as u64),
        attempts: attempts as u32,
        last_error,
        updated_at: timestamp(updated_at).unwrap_or(DateTime::UNIX_EPOCH),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_open_creates_db() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("chat.db");
        let db = SqliteStateDb::open(&path).await.unwrap();
        assert!(path.exists());
        assert_eq!(db.path(), path);
    }

    #[tokio::test]
    async fn test_reopen_keeps_records() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("chat.db");
        {
            let db = SqliteStateDb::open(&path).await.unwrap();
            db.record_failed(7, "boom", 3).await.unwrap();
        }
        let db = SqliteStateDb::open(&path).await.unwrap();
        assert_eq!(db.get_failed().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_record_failed_and_get_failed() {
        let db = SqliteStateDb::open_in_memory().unwrap();
        db.record_failed(11, "Transfer incomplete: no file", 3)
            .await
            .unwrap();
        db.record_downloaded(10, Path::new("/tmp/10.bin"), Some(100), 1)
            .await
            .unwrap();

        let failed = db.get_failed().await.unwrap();
        assert_eq!(failed.len(), 1);
        assert_eq!(failed[0].id, 11);
        assert_eq!(failed[0].status, ItemStatus::Failed);
        assert_eq!(failed[0].attempts, 3);
        assert_eq!(
            failed[0].last_error.as_deref(),
            Some("Transfer incomplete: no file")
        );
    }

    #[tokio::test]
    async fn test_download_clears_previous_failure() {
        let db = SqliteStateDb::open_in_memory().unwrap();
        db.record_failed(5, "timeout", 3).await.unwrap();
        db.record_downloaded(5, Path::new("/tmp/5.bin"), Some(9), 2)
            .await
            .unwrap();

        assert!(db.get_failed().await.unwrap().is_empty());
        let summary = db.get_summary().await.unwrap();
        assert_eq!(summary.total_items, 1);
        assert_eq!(summary.downloaded, 1);

        let (attempts, last_error): (i64, Option<String>) = db
            .lock()
            .unwrap()
            .query_row(
                "SELECT attempts, last_error FROM items WHERE id = 5",
                [],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .unwrap();
        assert_eq!(attempts, 5);
        assert!(last_error.is_none());
    }

    #[tokio::test]
    async fn test_get_summary() {
        let db = SqliteStateDb::open_in_memory().unwrap();
        let empty = db.get_summary().await.unwrap();
        assert_eq!(empty.total_items, 0);
        assert_eq!(empty.runs, 0);
        assert!(empty.last_run_started.is_none());

        db.record_downloaded(1, Path::new("/tmp/1.bin"), None, 1)
            .await
            .unwrap();
        db.record_downloaded(2, Path::new("/tmp/2.bin"), Some(4), 1)
            .await
            .unwrap();
        db.record_failed(3, "exhausted", 3).await.unwrap();

        let summary = db.get_summary().await.unwrap();
        assert_eq!(summary.total_items, 3);
        assert_eq!(summary.downloaded, 2);
        assert_eq!(summary.failed, 1);
    }

    #[tokio::test]
    async fn test_run_lifecycle() {
        let db = SqliteStateDb::open_in_memory().unwrap();
        let run_id = db.start_run().await.unwrap();

        let in_progress = db.get_summary().await.unwrap();
        assert_eq!(in_progress.runs, 1);
        assert!(in_progress.last_run_started.is_some());
        assert!(in_progress.last_run_completed.is_none());

        let stats = RunStats {
            batches: 4,
            downloaded: 150,
            failed: 2,
            final_cursor: 3471,
            interrupted: true,
        };
        db.complete_run(run_id, &stats).await.unwrap();

        let summary = db.get_summary().await.unwrap();
        assert!(summary.last_run_completed.is_some());
        assert!(summary.last_run_interrupted);

        let cursor: i64 = db
            .lock()
            .unwrap()
            .query_row("SELECT final_cursor FROM runs WHERE id = ?1", [run_id], |row| {
                row.get(0)
            })
            .unwrap();
        assert_eq!(cursor, 3471);
    }
}
