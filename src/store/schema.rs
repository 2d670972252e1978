//! Versioned schema for the persistent store.
//!
//! Each entry in [`MIGRATIONS`] moves the database from version `n` to
//! `n + 1`. Migrations only ever add tables, indexes or columns; existing
//! collections are never dropped on upgrade.

use rusqlite::Connection;
use tracing::{info, warn};

/// v1: story caches and the offline write queue.
const V1: &str = r#"
CREATE TABLE IF NOT EXISTS stories (
    key TEXT PRIMARY KEY,
    data BLOB NOT NULL,
    stored_at INTEGER NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_stories_stored ON stories(stored_at);

CREATE TABLE IF NOT EXISTS story_details (
    key TEXT PRIMARY KEY,
    data BLOB NOT NULL,
    stored_at INTEGER NOT NULL
);

-- AUTOINCREMENT so ids are never reused after a delete
CREATE TABLE IF NOT EXISTS offline_queue (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    op_type TEXT NOT NULL,
    data BLOB NOT NULL,
    preview BLOB NOT NULL,
    timestamp INTEGER NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_offline_queue_type ON offline_queue(op_type);
CREATE INDEX IF NOT EXISTS idx_offline_queue_timestamp ON offline_queue(timestamp);
"#;

/// v2: favorites and the named response-cache buckets.
const V2: &str = r#"
CREATE TABLE IF NOT EXISTS favorites (
    key TEXT PRIMARY KEY,
    data BLOB NOT NULL,
    stored_at INTEGER NOT NULL
);

CREATE TABLE IF NOT EXISTS cache_buckets (
    name TEXT PRIMARY KEY,
    created_at INTEGER NOT NULL
);

CREATE TABLE IF NOT EXISTS cache_entries (
    bucket TEXT NOT NULL,
    key_hash TEXT NOT NULL,
    url TEXT NOT NULL,
    status INTEGER NOT NULL,
    headers TEXT NOT NULL,
    body BLOB NOT NULL,
    stored_at INTEGER NOT NULL,
    PRIMARY KEY (bucket, key_hash),
    FOREIGN KEY (bucket) REFERENCES cache_buckets(name) ON DELETE CASCADE
);

CREATE INDEX IF NOT EXISTS idx_cache_entries_age ON cache_entries(bucket, stored_at);
"#;

/// v3: idempotency token per queued operation.
const V3: &str = r#"
ALTER TABLE offline_queue ADD COLUMN idempotency_key TEXT;
"#;

pub const MIGRATIONS: &[&str] = &[V1, V2, V3];

/// Tables dropped by an explicit reset, children before parents.
pub const ALL_TABLES: &[&str] = &[
  "cache_entries",
  "cache_buckets",
  "favorites",
  "offline_queue",
  "story_details",
  "stories",
];

/// Latest schema version this build knows about.
pub fn latest_version() -> u32 {
  MIGRATIONS.len() as u32
}

pub fn current_version(conn: &Connection) -> rusqlite::Result<u32> {
  conn.pragma_query_value(None, "user_version", |row| row.get(0))
}

/// Bring the schema up to [`latest_version`], one transaction per step.
pub fn migrate(conn: &mut Connection) -> rusqlite::Result<u32> {
  conn.pragma_update(None, "foreign_keys", true)?;

  let current = current_version(conn)?;
  if current > latest_version() {
    warn!(
      current,
      latest = latest_version(),
      "database was written by a newer build, leaving schema untouched"
    );
    return Ok(current);
  }

  for (idx, sql) in MIGRATIONS.iter().enumerate().skip(current as usize) {
    let version = idx as u32 + 1;
    let tx = conn.transaction()?;
    tx.execute_batch(sql)?;
    tx.pragma_update(None, "user_version", version)?;
    tx.commit()?;
    info!(version, "applied store migration");
  }

  current_version(conn)
}
