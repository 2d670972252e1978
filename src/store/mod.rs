//! Durable local storage: story caches, favorites, the offline write queue
//! and the response-cache buckets, all in one SQLite database.
//!
//! Every operation is async and independently failable. SQLite work runs on
//! the blocking pool so the router and queue never stall the executor.

mod collections;
mod records;
pub mod schema;

pub use collections::NewOperation;
pub use records::{
  CachedStory, CachedStoryDetail, Collection, FavoriteRecord, OfflineOperation, Record,
};

use rusqlite::Connection;
use std::path::Path;
use std::sync::{Arc, Mutex};
use tracing::{info, warn};

use crate::error::{OfflineError, Result};

/// Handle to the persistent store. Cheap to clone; clones share one connection.
#[derive(Clone)]
pub struct Store {
  conn: Arc<Mutex<Connection>>,
}

impl Store {
  /// Open or create the database at `path`, applying pending migrations.
  pub fn open(path: &Path) -> Result<Self> {
    if let Some(parent) = path.parent() {
      std::fs::create_dir_all(parent).map_err(|e| {
        OfflineError::Storage(format!("Failed to create database directory: {}", e))
      })?;
    }

    let conn = Connection::open(path).map_err(|e| {
      OfflineError::Storage(format!(
        "Failed to open database at {}: {}",
        path.display(),
        e
      ))
    })?;

    Self::from_connection(conn)
  }

  /// Open a private in-memory database (tests, ephemeral sessions).
  pub fn open_in_memory() -> Result<Self> {
    let conn = Connection::open_in_memory()?;
    Self::from_connection(conn)
  }

  fn from_connection(mut conn: Connection) -> Result<Self> {
    let version = schema::migrate(&mut conn)
      .map_err(|e| OfflineError::Storage(format!("Failed to run migrations: {}", e)))?;
    info!(version, "store opened");

    Ok(Self {
      conn: Arc::new(Mutex::new(conn)),
    })
  }

  /// Run `f` against the connection on the blocking pool.
  pub(crate) async fn with_conn<F, R>(&self, f: F) -> Result<R>
  where
    F: FnOnce(&mut Connection) -> Result<R> + Send + 'static,
    R: Send + 'static,
  {
    let conn = Arc::clone(&self.conn);
    tokio::task::spawn_blocking(move || {
      let mut guard = conn
        .lock()
        .map_err(|e| OfflineError::Storage(format!("Lock poisoned: {}", e)))?;
      f(&mut guard)
    })
    .await
    .map_err(|e| OfflineError::Storage(format!("Storage task failed: {}", e)))?
  }

  pub async fn schema_version(&self) -> Result<u32> {
    self
      .with_conn(|conn| Ok(schema::current_version(conn)?))
      .await
  }

  /// Destroy every collection and cache bucket, then recreate the schema.
  ///
  /// This is the only path that discards queued operations wholesale; schema
  /// upgrades never do.
  pub async fn reset(&self) -> Result<()> {
    self
      .with_conn(|conn| {
        let tx = conn.transaction()?;
        for table in schema::ALL_TABLES {
          tx.execute_batch(&format!("DROP TABLE IF EXISTS {};", table))?;
        }
        tx.pragma_update(None, "user_version", 0u32)?;
        tx.commit()?;

        schema::migrate(conn)?;
        Ok(())
      })
      .await?;

    warn!("store reset: all cached and queued data discarded");
    Ok(())
  }
}
