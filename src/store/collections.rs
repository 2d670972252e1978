//! Collection operations on the store.
//!
//! Multi-step updates (clear-then-repopulate, clear-all) run inside a single
//! SQLite transaction so concurrent readers never see a half-written state.

use chrono::{Duration, Utc};
use rusqlite::{params, OptionalExtension};
use tracing::debug;

use super::records::{
  CachedStory, CachedStoryDetail, Collection, FavoriteRecord, OfflineOperation, Record,
};
use super::Store;
use crate::api::Story;
use crate::error::{OfflineError, Result};

/// An operation about to be queued; the store assigns its id.
#[derive(Debug, Clone)]
pub struct NewOperation {
  pub op_type: String,
  pub data: serde_json::Value,
  pub preview: serde_json::Value,
  pub idempotency_key: Option<String>,
}

impl NewOperation {
  pub fn new(op_type: &str, data: serde_json::Value, preview: serde_json::Value) -> Self {
    Self {
      op_type: op_type.to_string(),
      data,
      preview,
      idempotency_key: None,
    }
  }

  pub fn with_idempotency_key(mut self, key: String) -> Self {
    self.idempotency_key = Some(key);
    self
  }
}

fn now_millis() -> i64 {
  Utc::now().timestamp_millis()
}

fn insert_sql(table: &str, replace: bool) -> String {
  let verb = if replace { "INSERT OR REPLACE" } else { "INSERT" };
  format!(
    "{} INTO {} (key, data, stored_at) VALUES (?, ?, ?)",
    verb, table
  )
}

impl Store {
  // ==========================================================================
  // Generic record operations
  // ==========================================================================

  pub async fn get<T: Record>(&self, key: &str) -> Result<Option<T>> {
    let key = key.to_string();
    self
      .with_conn(move |conn| {
        let sql = format!("SELECT data FROM {} WHERE key = ?", T::COLLECTION.table());
        let data: Option<Vec<u8>> = conn
          .query_row(&sql, params![key], |row| row.get(0))
          .optional()?;

        match data {
          Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
          None => Ok(None),
        }
      })
      .await
  }

  /// All records of a collection in insertion order.
  pub async fn get_all<T: Record>(&self) -> Result<Vec<T>> {
    self
      .with_conn(|conn| {
        let sql = format!("SELECT data FROM {} ORDER BY rowid", T::COLLECTION.table());
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt
          .query_map([], |row| row.get::<_, Vec<u8>>(0))?
          .collect::<rusqlite::Result<Vec<_>>>()?;

        rows
          .iter()
          .map(|bytes| serde_json::from_slice(bytes).map_err(OfflineError::from))
          .collect()
      })
      .await
  }

  /// Insert a new record; fails if the key already exists.
  pub async fn insert<T: Record>(&self, record: T) -> Result<()> {
    self.write_record(record, false).await
  }

  /// Insert a record, replacing any existing one with the same key wholesale.
  pub async fn put<T: Record>(&self, record: T) -> Result<()> {
    self.write_record(record, true).await
  }

  async fn write_record<T: Record>(&self, record: T, replace: bool) -> Result<()> {
    let data = serde_json::to_vec(&record)?;
    let key = record.key();
    let stamp = record.stamp();

    self
      .with_conn(move |conn| {
        conn.execute(
          &insert_sql(T::COLLECTION.table(), replace),
          params![key, data, stamp],
        )?;
        Ok(())
      })
      .await
  }

  /// Delete by key. Returns whether a record was removed.
  pub async fn delete<T: Record>(&self, key: &str) -> Result<bool> {
    let key = key.to_string();
    self
      .with_conn(move |conn| {
        let sql = format!("DELETE FROM {} WHERE key = ?", T::COLLECTION.table());
        Ok(conn.execute(&sql, params![key])? > 0)
      })
      .await
  }

  pub async fn clear(&self, collection: Collection) -> Result<()> {
    self
      .with_conn(move |conn| {
        conn.execute(&format!("DELETE FROM {}", collection.table()), [])?;
        Ok(())
      })
      .await
  }

  /// Clear all four record collections in one transaction; either every
  /// collection is emptied or none is.
  pub async fn clear_all(&self) -> Result<()> {
    self
      .with_conn(|conn| {
        let tx = conn.transaction()?;
        for collection in Collection::ALL {
          tx.execute(&format!("DELETE FROM {}", collection.table()), [])?;
        }
        tx.commit()?;
        Ok(())
      })
      .await
  }

  pub async fn count(&self, collection: Collection) -> Result<usize> {
    self
      .with_conn(move |conn| {
        let sql = format!("SELECT COUNT(*) FROM {}", collection.table());
        let count: i64 = conn.query_row(&sql, [], |row| row.get(0))?;
        Ok(count as usize)
      })
      .await
  }

  /// True when the collection is empty or its newest row is older than `max_age`.
  pub async fn is_data_stale(&self, collection: Collection, max_age: Duration) -> Result<bool> {
    let newest: Option<i64> = self
      .with_conn(move |conn| {
        let sql = format!(
          "SELECT MAX({}) FROM {}",
          collection.stamp_column(),
          collection.table()
        );
        Ok(conn.query_row(&sql, [], |row| row.get(0))?)
      })
      .await?;

    Ok(match newest {
      Some(stamp) => now_millis() - stamp > max_age.num_milliseconds(),
      None => true,
    })
  }

  // ==========================================================================
  // Story caches
  // ==========================================================================

  /// Replace the whole list cache with `stories`, atomically.
  pub async fn save_stories(&self, stories: Vec<Story>) -> Result<()> {
    let cached_at = now_millis();
    let rows = stories
      .into_iter()
      .map(|story| {
        let record = CachedStory { story, cached_at };
        Ok((record.key(), serde_json::to_vec(&record)?))
      })
      .collect::<Result<Vec<_>>>()?;

    self
      .with_conn(move |conn| {
        let tx = conn.transaction()?;
        tx.execute("DELETE FROM stories", [])?;
        {
          let mut stmt = tx.prepare(&insert_sql("stories", true))?;
          for (key, data) in &rows {
            stmt.execute(params![key, data, cached_at])?;
          }
        }
        tx.commit()?;
        debug!(count = rows.len(), "story list cache replaced");
        Ok(())
      })
      .await
  }

  pub async fn get_stories(&self) -> Result<Vec<CachedStory>> {
    self.get_all().await
  }

  pub async fn save_story_detail(&self, story: Story) -> Result<()> {
    self
      .put(CachedStoryDetail {
        story,
        cached_at: now_millis(),
      })
      .await
  }

  pub async fn get_story_detail(&self, id: &str) -> Result<Option<CachedStoryDetail>> {
    self.get(id).await
  }

  // ==========================================================================
  // Favorites
  // ==========================================================================

  pub async fn add_favorite(&self, story: Story) -> Result<()> {
    self
      .put(FavoriteRecord {
        story,
        added_at: now_millis(),
        is_favorite: true,
      })
      .await
  }

  pub async fn remove_favorite(&self, id: &str) -> Result<bool> {
    self.delete::<FavoriteRecord>(id).await
  }

  /// Favorites, most recently added first.
  pub async fn get_favorites(&self) -> Result<Vec<FavoriteRecord>> {
    let mut favorites: Vec<FavoriteRecord> = self.get_all().await?;
    favorites.sort_by(|a, b| b.added_at.cmp(&a.added_at));
    Ok(favorites)
  }

  pub async fn is_favorite(&self, id: &str) -> Result<bool> {
    Ok(self.get::<FavoriteRecord>(id).await?.is_some())
  }

  pub async fn clear_favorites(&self) -> Result<()> {
    self.clear(Collection::Favorites).await
  }

  // ==========================================================================
  // Offline queue
  // ==========================================================================

  /// Append an operation and return its store-assigned id.
  pub async fn add_to_queue(&self, operation: NewOperation) -> Result<i64> {
    let data = serde_json::to_vec(&operation.data)?;
    let preview = serde_json::to_vec(&operation.preview)?;
    let timestamp = now_millis();

    self
      .with_conn(move |conn| {
        conn.execute(
          "INSERT INTO offline_queue (op_type, data, preview, timestamp, idempotency_key)
           VALUES (?, ?, ?, ?, ?)",
          params![
            operation.op_type,
            data,
            preview,
            timestamp,
            operation.idempotency_key
          ],
        )?;
        Ok(conn.last_insert_rowid())
      })
      .await
  }

  /// The whole queue in FIFO order.
  pub async fn get_queue(&self) -> Result<Vec<OfflineOperation>> {
    self
      .with_conn(|conn| {
        let mut stmt = conn.prepare(
          "SELECT id, op_type, data, preview, timestamp, idempotency_key
           FROM offline_queue ORDER BY id",
        )?;

        let rows = stmt
          .query_map([], |row| {
            Ok((
              row.get::<_, i64>(0)?,
              row.get::<_, String>(1)?,
              row.get::<_, Vec<u8>>(2)?,
              row.get::<_, Vec<u8>>(3)?,
              row.get::<_, i64>(4)?,
              row.get::<_, Option<String>>(5)?,
            ))
          })?
          .collect::<rusqlite::Result<Vec<_>>>()?;

        rows
          .into_iter()
          .map(|(id, op_type, data, preview, timestamp, idempotency_key)| {
            Ok(OfflineOperation {
              id,
              op_type,
              data: serde_json::from_slice(&data)?,
              preview: serde_json::from_slice(&preview)?,
              timestamp,
              idempotency_key,
            })
          })
          .collect()
      })
      .await
  }

  /// Remove one queued operation. Returns whether it was still present.
  pub async fn remove_from_queue(&self, id: i64) -> Result<bool> {
    self
      .with_conn(move |conn| {
        Ok(conn.execute("DELETE FROM offline_queue WHERE id = ?", params![id])? > 0)
      })
      .await
  }

  pub async fn clear_queue(&self) -> Result<()> {
    self.clear(Collection::OfflineQueue).await
  }
}
