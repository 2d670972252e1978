//! Record types held by the persistent store.

use serde::{de::DeserializeOwned, Deserialize, Serialize};

use crate::api::Story;

/// The independent record collections.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Collection {
  Stories,
  StoryDetails,
  OfflineQueue,
  Favorites,
}

impl Collection {
  pub const ALL: [Collection; 4] = [
    Collection::Stories,
    Collection::StoryDetails,
    Collection::OfflineQueue,
    Collection::Favorites,
  ];

  pub fn table(&self) -> &'static str {
    match self {
      Collection::Stories => "stories",
      Collection::StoryDetails => "story_details",
      Collection::OfflineQueue => "offline_queue",
      Collection::Favorites => "favorites",
    }
  }

  /// Column holding the insertion timestamp (epoch millis).
  pub(crate) fn stamp_column(&self) -> &'static str {
    match self {
      Collection::OfflineQueue => "timestamp",
      _ => "stored_at",
    }
  }
}

/// A record keyed by a string, stored as JSON in one collection.
///
/// The offline queue does not implement this: its ids are assigned by the
/// store, see [`OfflineOperation`].
pub trait Record: Serialize + DeserializeOwned + Send + 'static {
  const COLLECTION: Collection;

  /// Primary key within the collection.
  fn key(&self) -> String;

  /// Insertion timestamp in epoch milliseconds.
  fn stamp(&self) -> i64;
}

/// Snapshot of a story from the list endpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CachedStory {
  #[serde(flatten)]
  pub story: Story,
  pub cached_at: i64,
}

/// Snapshot of a story from the detail endpoint. Lives in its own
/// collection so detail fetches never evict the list cache.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CachedStoryDetail {
  #[serde(flatten)]
  pub story: Story,
  pub cached_at: i64,
}

/// A story the user pinned. Independent of both caches.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FavoriteRecord {
  #[serde(flatten)]
  pub story: Story,
  pub added_at: i64,
  pub is_favorite: bool,
}

impl Record for CachedStory {
  const COLLECTION: Collection = Collection::Stories;

  fn key(&self) -> String {
    self.story.id.clone()
  }

  fn stamp(&self) -> i64 {
    self.cached_at
  }
}

impl Record for CachedStoryDetail {
  const COLLECTION: Collection = Collection::StoryDetails;

  fn key(&self) -> String {
    self.story.id.clone()
  }

  fn stamp(&self) -> i64 {
    self.cached_at
  }
}

impl Record for FavoriteRecord {
  const COLLECTION: Collection = Collection::Favorites;

  fn key(&self) -> String {
    self.story.id.clone()
  }

  fn stamp(&self) -> i64 {
    self.added_at
  }
}

/// A deferred mutating request waiting for connectivity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OfflineOperation {
  /// Assigned by the store, strictly increasing, never reused
  pub id: i64,
  /// Handler tag, e.g. "create_story"
  pub op_type: String,
  /// Self-contained request payload (binary parts included)
  pub data: serde_json::Value,
  /// Lightweight summary for optimistic UI
  pub preview: serde_json::Value,
  /// Enqueue time in epoch milliseconds
  pub timestamp: i64,
  /// Sent with the replayed request so a backend can drop duplicates
  pub idempotency_key: Option<String>,
}
