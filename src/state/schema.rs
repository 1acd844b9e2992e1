//! Ledger schema and migrations.

use rusqlite::Connection;

use super::error::StateError;

/// Bump together with a new arm in `migrate_to_version`.
pub const SCHEMA_VERSION: i32 = 1;

const SCHEMA_V1: &str = r#"
CREATE TABLE IF NOT EXISTS items (
    id INTEGER PRIMARY KEY,
    status TEXT NOT NULL,
    local_path TEXT,
    expected_size INTEGER,
    attempts INTEGER NOT NULL DEFAULT 0,
    last_error TEXT,
    updated_at INTEGER NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_items_status ON items(status);

CREATE TABLE IF NOT EXISTS runs (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    started_at INTEGER NOT NULL,
    completed_at INTEGER,
    batches INTEGER DEFAULT 0,
    downloaded INTEGER DEFAULT 0,
    failed INTEGER DEFAULT 0,
    final_cursor INTEGER,
    interrupted INTEGER DEFAULT 0
);
"#;

pub(crate) fn get_schema_version(conn: &Connection) -> Result<i32, StateError> {
    let version: i32 = conn.pragma_query_value(None, "user_version", |row| row.get(0))?;
    Ok(version)
}

fn set_schema_version(conn: &Connection, version: i32) -> Result<(), StateError> {
    conn.pragma_update(None, "user_version", version)?;
    Ok(())
}

/// Initialize or migrate the ledger schema. Idempotent.
pub(crate) fn migrate(conn: &Connection) -> Result<(), StateError> {
    let current_version = get_schema_version(conn)?;

    if current_version > SCHEMA_VERSION {
        return Err(StateError::UnsupportedSchemaVersion {
            found: current_version,
            expected: SCHEMA_VERSION,
        });
    }

    if current_version == 0 {
        conn.execute_batch(SCHEMA_V1)?;
        set_schema_version(conn, SCHEMA_VERSION)?;
        tracing::debug!("Initialized ledger schema at version {}", SCHEMA_VERSION);
    } else {
        for version in (current_version + 1)..=SCHEMA_VERSION {
            migrate_to_version(conn, version)?;
        }
    }

    Ok(())
}

fn migrate_to_version(conn: &Connection, version: i32) -> Result<(), StateError> {
    match version {
        1 => conn.execute_batch(SCHEMA_V1)?,
        other => {
            return Err(StateError::UnsupportedSchemaVersion {
                found: other,
                expected: SCHEMA_VERSION,
            })
        }
    }
    set_schema_version(conn, version)?;
    tracing::info!("Migrated ledger to schema version {}", version);
    Ok(())
}
