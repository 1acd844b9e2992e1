//! Download ledger.
//!
//! A per-target SQLite database recording which items were downloaded or
//! gave up, and one row per sync run. The engine only writes to it: resume
//! position comes from the checkpoint file, never from here. `status`
//! reads it back for reporting.

pub mod db;
pub mod error;
pub mod schema;
pub mod types;

pub use db::{SqliteStateDb, StateDb};
pub use types::RunStats;
