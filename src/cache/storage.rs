//! Named response-cache buckets persisted in the store.

use chrono::{DateTime, Utc};
use rusqlite::{params, OptionalExtension};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use tracing::debug;
use url::Url;

use crate::config::BucketLimits;
use crate::error::{OfflineError, Result};
use crate::http::Response;
use crate::store::Store;

/// A stored response and when it was stored.
#[derive(Debug, Clone)]
pub struct CachedResponse {
  pub response: Response,
  pub stored_at: DateTime<Utc>,
}

/// Registry of named buckets.
#[derive(Clone)]
pub struct CacheStorage {
  store: Store,
}

impl CacheStorage {
  pub fn new(store: Store) -> Self {
    Self { store }
  }

  /// Open (creating if needed) the bucket `name` with the given limits.
  pub async fn open(&self, name: &str, limits: BucketLimits) -> Result<Bucket> {
    let owned = name.to_string();
    self
      .store
      .with_conn(move |conn| {
        conn.execute(
          "INSERT OR IGNORE INTO cache_buckets (name, created_at) VALUES (?, ?)",
          params![owned, Utc::now().timestamp_millis()],
        )?;
        Ok(())
      })
      .await?;

    Ok(Bucket {
      store: self.store.clone(),
      name: name.to_string(),
      limits,
    })
  }

  /// Names of all existing buckets.
  pub async fn keys(&self) -> Result<Vec<String>> {
    self
      .store
      .with_conn(|conn| {
        let mut stmt = conn.prepare("SELECT name FROM cache_buckets ORDER BY name")?;
        let names = stmt
          .query_map([], |row| row.get(0))?
          .collect::<rusqlite::Result<Vec<String>>>()?;
        Ok(names)
      })
      .await
  }

  /// Delete a bucket and all of its entries.
  pub async fn delete(&self, name: &str) -> Result<bool> {
    let name = name.to_string();
    self
      .store
      .with_conn(move |conn| {
        let tx = conn.transaction()?;
        tx.execute("DELETE FROM cache_entries WHERE bucket = ?", params![name])?;
        let removed = tx.execute("DELETE FROM cache_buckets WHERE name = ?", params![name])?;
        tx.commit()?;
        Ok(removed > 0)
      })
      .await
  }
}

/// One bucket: request URL -> last known good response.
#[derive(Clone)]
pub struct Bucket {
  store: Store,
  name: String,
  limits: BucketLimits,
}

/// Stable, fixed-length key for a request URL.
fn key_hash(url: &Url) -> String {
  let mut hasher = Sha256::new();
  hasher.update(url.as_str().as_bytes());
  hex::encode(hasher.finalize())
}

fn from_millis(ms: i64) -> Result<DateTime<Utc>> {
  DateTime::from_timestamp_millis(ms)
    .ok_or_else(|| OfflineError::Storage(format!("invalid timestamp {}", ms)))
}

impl Bucket {
  pub fn name(&self) -> &str {
    &self.name
  }

  /// Look up a stored response. Entries past the bucket's max age are
  /// treated as absent and removed.
  pub async fn match_url(&self, url: &Url) -> Result<Option<CachedResponse>> {
    let bucket = self.name.clone();
    let hash = key_hash(url);
    let cutoff = self
      .limits
      .max_age()
      .map(|age| (Utc::now() - age).timestamp_millis());

    let row: Option<(u16, String, Vec<u8>, i64)> = self
      .store
      .with_conn(move |conn| {
        let row = conn
          .query_row(
            "SELECT status, headers, body, stored_at FROM cache_entries
             WHERE bucket = ? AND key_hash = ?",
            params![bucket, hash],
            |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?)),
          )
          .optional()?;

        match (row, cutoff) {
          (Some((_, _, _, stored_at)), Some(cutoff)) if stored_at < cutoff => {
            conn.execute(
              "DELETE FROM cache_entries WHERE bucket = ? AND key_hash = ?",
              params![bucket, hash],
            )?;
            debug!(bucket = %bucket, "dropped expired cache entry");
            Ok(None)
          }
          (row, _) => Ok(row),
        }
      })
      .await?;

    match row {
      Some((status, headers, body, stored_at)) => {
        let headers: BTreeMap<String, String> = serde_json::from_str(&headers)?;
        Ok(Some(CachedResponse {
          response: Response {
            status,
            headers,
            body,
          },
          stored_at: from_millis(stored_at)?,
        }))
      }
      None => Ok(None),
    }
  }

  /// Store `response` for `url`, replacing any previous entry wholesale,
  /// then enforce max age and entry cap (oldest first) in the same
  /// transaction.
  pub async fn put(&self, url: &Url, response: &Response) -> Result<()> {
    let bucket = self.name.clone();
    let hash = key_hash(url);
    let url = url.to_string();
    let status = response.status;
    let headers = serde_json::to_string(&response.headers)?;
    let body = response.body.clone();
    let now = Utc::now();
    let cutoff = self
      .limits
      .max_age()
      .map(|age| (now - age).timestamp_millis());
    let cap = self.limits.max_entries;

    self
      .store
      .with_conn(move |conn| {
        let tx = conn.transaction()?;
        tx.execute(
          "INSERT OR IGNORE INTO cache_buckets (name, created_at) VALUES (?, ?)",
          params![bucket, now.timestamp_millis()],
        )?;
        tx.execute(
          "INSERT OR REPLACE INTO cache_entries (bucket, key_hash, url, status, headers, body, stored_at)
           VALUES (?, ?, ?, ?, ?, ?, ?)",
          params![bucket, hash, url, status, headers, body, now.timestamp_millis()],
        )?;

        let mut evicted = 0;
        if let Some(cutoff) = cutoff {
          evicted += tx.execute(
            "DELETE FROM cache_entries WHERE bucket = ? AND stored_at < ?",
            params![bucket, cutoff],
          )?;
        }
        if let Some(cap) = cap {
          evicted += tx.execute(
            "DELETE FROM cache_entries WHERE rowid IN (
               SELECT rowid FROM cache_entries WHERE bucket = ?1
               ORDER BY stored_at DESC, rowid DESC
               LIMIT -1 OFFSET ?2)",
            params![bucket, cap as i64],
          )?;
        }
        tx.commit()?;

        if evicted > 0 {
          debug!(bucket = %bucket, evicted, "evicted cache entries");
        }
        Ok(())
      })
      .await
  }

  /// Stored URLs, oldest first.
  pub async fn urls(&self) -> Result<Vec<String>> {
    let bucket = self.name.clone();
    self
      .store
      .with_conn(move |conn| {
        let mut stmt = conn.prepare(
          "SELECT url FROM cache_entries WHERE bucket = ? ORDER BY stored_at, rowid",
        )?;
        let urls = stmt
          .query_map(params![bucket], |row| row.get(0))?
          .collect::<rusqlite::Result<Vec<String>>>()?;
        Ok(urls)
      })
      .await
  }

  pub async fn len(&self) -> Result<usize> {
    Ok(self.urls().await?.len())
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn url(path: &str) -> Url {
    Url::parse(&format!("https://example.test{}", path)).unwrap()
  }

  async fn storage() -> CacheStorage {
    CacheStorage::new(Store::open_in_memory().unwrap())
  }

  #[tokio::test]
  async fn test_put_replaces_wholesale() {
    let caches = storage().await;
    let bucket = caches.open("app-dynamic", BucketLimits::default()).await.unwrap();

    bucket
      .put(&url("/a"), &Response::new(200, "one").with_header("x-old", "1"))
      .await
      .unwrap();
    bucket
      .put(&url("/a"), &Response::new(200, "two"))
      .await
      .unwrap();

    let hit = bucket.match_url(&url("/a")).await.unwrap().unwrap();
    assert_eq!(hit.response.text(), "two");
    assert!(hit.response.header("x-old").is_none());
    assert_eq!(bucket.len().await.unwrap(), 1);
  }

  #[tokio::test]
  async fn test_entry_cap_evicts_oldest_first() {
    let caches = storage().await;
    let limits = BucketLimits {
      max_entries: Some(2),
      max_age_secs: None,
    };
    let bucket = caches.open("app-images", limits).await.unwrap();

    for path in ["/1", "/2", "/3"] {
      bucket.put(&url(path), &Response::new(200, path)).await.unwrap();
    }

    assert_eq!(
      bucket.urls().await.unwrap(),
      vec![url("/2").to_string(), url("/3").to_string()]
    );
    assert!(bucket.match_url(&url("/1")).await.unwrap().is_none());
  }

  #[tokio::test]
  async fn test_expired_entries_are_not_served() {
    let caches = storage().await;
    let limits = BucketLimits {
      max_entries: None,
      max_age_secs: Some(0),
    };
    let bucket = caches.open("app-dynamic", limits).await.unwrap();
    bucket.put(&url("/a"), &Response::new(200, "x")).await.unwrap();

    tokio::time::sleep(std::time::Duration::from_millis(5)).await;

    assert!(bucket.match_url(&url("/a")).await.unwrap().is_none());
    assert_eq!(bucket.len().await.unwrap(), 0);
  }

  #[tokio::test]
  async fn test_buckets_are_isolated_and_deletable() {
    let caches = storage().await;
    let a = caches.open("v1-static", BucketLimits::default()).await.unwrap();
    let b = caches.open("v1-dynamic", BucketLimits::default()).await.unwrap();
    a.put(&url("/x"), &Response::new(200, "a")).await.unwrap();

    assert!(b.match_url(&url("/x")).await.unwrap().is_none());
    assert_eq!(caches.keys().await.unwrap(), vec!["v1-dynamic", "v1-static"]);

    assert!(caches.delete("v1-static").await.unwrap());
    assert_eq!(caches.keys().await.unwrap(), vec!["v1-dynamic"]);
    assert!(a.match_url(&url("/x")).await.unwrap().is_none());
  }
}
