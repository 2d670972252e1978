//! Offline queue: durable FIFO of mutating requests made while offline,
//! replayed when connectivity returns.
//!
//! A flush pass walks the queue oldest-first. Each operation is removed only
//! after its handler succeeds; failures stay queued for the next pass and do
//! not block later operations. Passes never overlap.

mod handler;

pub use handler::{CreateStoryHandler, OperationHandler};

use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::api::StorySubmission;
use crate::error::{OfflineError, Result};
use crate::event::{ClientBus, ClientMessage};
use crate::store::{Collection, NewOperation, OfflineOperation, Store};

/// Operation type for a story created while offline.
pub const CREATE_STORY: &str = "create_story";

/// Fresh token sent with every attempt of one logical operation.
pub fn new_idempotency_key() -> String {
  Uuid::new_v4().to_string()
}

/// Result of one flush pass.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FlushReport {
  /// Replayed and removed, in replay order
  pub synced: Vec<i64>,
  /// Still queued, with the reason
  pub failed: Vec<(i64, String)>,
  /// Queue length after the pass
  pub remaining: usize,
}

pub struct OfflineQueue {
  store: Store,
  handlers: HashMap<String, Arc<dyn OperationHandler>>,
  flush_lock: Mutex<()>,
  clients: ClientBus,
  timeout: Duration,
}

impl OfflineQueue {
  pub fn new(store: Store, clients: ClientBus, timeout: Duration) -> Self {
    Self {
      store,
      handlers: HashMap::new(),
      flush_lock: Mutex::new(()),
      clients,
      timeout,
    }
  }

  /// Register the replay handler for an operation type.
  pub fn with_handler(mut self, op_type: &str, handler: Arc<dyn OperationHandler>) -> Self {
    self.handlers.insert(op_type.to_string(), handler);
    self
  }

  /// Durably append an operation under a fresh idempotency key; returns
  /// its id.
  pub async fn enqueue(&self, op_type: &str, payload: Value, preview: Value) -> Result<i64> {
    self
      .enqueue_with_key(op_type, payload, preview, new_idempotency_key())
      .await
  }

  /// Append an operation that keeps the key of an earlier attempt, so its
  /// replay can be matched against that attempt.
  pub async fn enqueue_with_key(
    &self,
    op_type: &str,
    payload: Value,
    preview: Value,
    idempotency_key: String,
  ) -> Result<i64> {
    let operation =
      NewOperation::new(op_type, payload, preview).with_idempotency_key(idempotency_key);
    let id = self.store.add_to_queue(operation).await?;
    info!(id, op_type, "queued operation for later sync");
    Ok(id)
  }

  /// Queue a story submission, photo bytes included.
  pub async fn add_story_offline(&self, submission: &StorySubmission) -> Result<i64> {
    self
      .add_story_with_key(submission, new_idempotency_key())
      .await
  }

  pub async fn add_story_with_key(
    &self,
    submission: &StorySubmission,
    idempotency_key: String,
  ) -> Result<i64> {
    let payload = serde_json::to_value(submission)?;
    let preview = serde_json::to_value(submission.preview())?;
    self
      .enqueue_with_key(CREATE_STORY, payload, preview, idempotency_key)
      .await
  }

  pub async fn pending(&self) -> Result<Vec<OfflineOperation>> {
    self.store.get_queue().await
  }

  pub async fn is_queue_empty(&self) -> Result<bool> {
    Ok(self.store.count(Collection::OfflineQueue).await? == 0)
  }

  pub async fn clear(&self) -> Result<()> {
    warn!("discarding all queued operations");
    self.store.clear_queue().await
  }

  /// Replay every queued operation once, oldest first.
  pub async fn flush(&self) -> Result<FlushReport> {
    let _pass = self.flush_lock.lock().await;

    let operations = self.store.get_queue().await?;
    let mut report = FlushReport::default();
    if operations.is_empty() {
      debug!("offline queue empty, nothing to sync");
      return Ok(report);
    }
    info!(count = operations.len(), "syncing offline queue");

    for operation in operations {
      match self.replay(&operation).await {
        Ok(()) => match self.store.remove_from_queue(operation.id).await {
          Ok(_) => {
            debug!(id = operation.id, op_type = %operation.op_type, "synced");
            report.synced.push(operation.id);
          }
          Err(e) => {
            // Still queued: the next pass resends it under the same key
            error!(id = operation.id, error = %e, "replayed but could not remove operation");
            report
              .failed
              .push((operation.id, format!("replayed but not removed: {}", e)));
          }
        },
        Err(e) => {
          warn!(id = operation.id, op_type = %operation.op_type, error = %e, "sync failed, keeping operation");
          report.failed.push((operation.id, e.to_string()));
        }
      }
    }

    report.remaining = match self.store.count(Collection::OfflineQueue).await {
      Ok(remaining) => remaining,
      Err(e) => {
        error!(error = %e, "could not count remaining operations");
        report.failed.len()
      }
    };
    info!(
      synced = report.synced.len(),
      failed = report.failed.len(),
      remaining = report.remaining,
      "sync pass finished"
    );

    if !report.synced.is_empty() {
      self.clients.post(ClientMessage::SyncCompleted {
        synced: report.synced.len(),
        failed: report.failed.len(),
      });
    }
    Ok(report)
  }

  async fn replay(&self, operation: &OfflineOperation) -> Result<()> {
    let handler = self
      .handlers
      .get(&operation.op_type)
      .ok_or_else(|| OfflineError::UnknownOperation(operation.op_type.clone()))?;

    tokio::time::timeout(self.timeout, handler.handle(operation))
      .await
      .map_err(|_| OfflineError::Timeout(self.timeout))?
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::api::{Photo, StoryApi};
  use crate::config::Config;
  use crate::http::Response;
  use crate::testing::MockFetcher;
  use async_trait::async_trait;
  use serde_json::json;

  const STORIES_URL: &str = "https://story-api.dicoding.dev/v1/stories";

  /// Records replayed ids; fails any operation whose data has `"fail": true`.
  #[derive(Default)]
  struct Recorder {
    seen: std::sync::Mutex<Vec<i64>>,
  }

  #[async_trait]
  impl OperationHandler for Recorder {
    async fn handle(&self, operation: &OfflineOperation) -> Result<()> {
      self.seen.lock().unwrap().push(operation.id);
      if operation.data["fail"] == json!(true) {
        return Err(OfflineError::Transport("connection refused".to_string()));
      }
      Ok(())
    }
  }

  struct Hang;

  #[async_trait]
  impl OperationHandler for Hang {
    async fn handle(&self, _operation: &OfflineOperation) -> Result<()> {
      std::future::pending::<()>().await;
      Ok(())
    }
  }

  fn queue_with(handler: Arc<dyn OperationHandler>) -> (OfflineQueue, ClientBus) {
    let clients = ClientBus::new();
    let queue = OfflineQueue::new(
      Store::open_in_memory().unwrap(),
      clients.clone(),
      Duration::from_secs(5),
    )
    .with_handler("test", handler);
    (queue, clients)
  }

  fn submission() -> StorySubmission {
    StorySubmission {
      description: "Trip to the lake".to_string(),
      photo: Photo {
        file_name: "lake.jpg".to_string(),
        mime: "image/jpeg".to_string(),
        bytes: vec![7; 64],
      },
      lat: Some(-7.0),
      lon: Some(110.4),
    }
  }

  #[tokio::test]
  async fn test_enqueue_then_pending() {
    let (queue, _) = queue_with(Arc::new(Recorder::default()));
    assert!(queue.is_queue_empty().await.unwrap());

    let id = queue.add_story_offline(&submission()).await.unwrap();
    let pending = queue.pending().await.unwrap();
    assert_eq!(pending.len(), 1);
    assert_eq!(pending[0].id, id);
    assert_eq!(pending[0].op_type, CREATE_STORY);
    assert_eq!(pending[0].preview["description"], "Trip to the lake");
    assert_eq!(pending[0].preview["photo_size"], 64);
    assert!(pending[0].idempotency_key.is_some());

    let restored: StorySubmission = serde_json::from_value(pending[0].data.clone()).unwrap();
    assert_eq!(restored, submission());
  }

  #[tokio::test]
  async fn test_flush_replays_in_fifo_order() {
    let recorder = Arc::new(Recorder::default());
    let (queue, _) = queue_with(recorder.clone());
    let mut ids = Vec::new();
    for n in 0..3 {
      ids.push(queue.enqueue("test", json!({ "n": n }), json!({})).await.unwrap());
    }

    let report = queue.flush().await.unwrap();
    assert_eq!(report.synced, ids);
    assert_eq!(*recorder.seen.lock().unwrap(), ids);
    assert_eq!(report.remaining, 0);
    assert!(queue.is_queue_empty().await.unwrap());
  }

  #[tokio::test]
  async fn test_failed_operation_stays_queued_and_later_ones_proceed() {
    let (queue, _) = queue_with(Arc::new(Recorder::default()));
    let first = queue
      .enqueue("test", json!({ "fail": true }), json!({}))
      .await
      .unwrap();
    let second = queue.enqueue("test", json!({}), json!({})).await.unwrap();

    let report = queue.flush().await.unwrap();
    assert_eq!(report.synced, vec![second]);
    assert_eq!(report.failed.len(), 1);
    assert_eq!(report.failed[0].0, first);
    assert_eq!(report.remaining, 1);

    let pending = queue.pending().await.unwrap();
    assert_eq!(pending.len(), 1);
    assert_eq!(pending[0].id, first);
  }

  #[tokio::test]
  async fn test_unknown_operation_type_is_kept() {
    let (queue, _) = queue_with(Arc::new(Recorder::default()));
    let id = queue.enqueue("mystery", json!({}), json!({})).await.unwrap();

    let report = queue.flush().await.unwrap();
    assert!(report.synced.is_empty());
    assert_eq!(report.failed[0].0, id);
    assert!(report.failed[0].1.contains("mystery"));
    assert_eq!(queue.pending().await.unwrap().len(), 1);
  }

  #[tokio::test]
  async fn test_failed_removal_does_not_end_the_pass() {
    let store = Store::open_in_memory().unwrap();
    let clients = ClientBus::new();
    let mut rx = clients.subscribe();
    let queue = OfflineQueue::new(store.clone(), clients, Duration::from_secs(5))
      .with_handler("test", Arc::new(Recorder::default()));
    let first = queue.enqueue("test", json!({}), json!({})).await.unwrap();
    let second = queue.enqueue("test", json!({}), json!({})).await.unwrap();

    let trigger = format!(
      "CREATE TRIGGER keep_first BEFORE DELETE ON offline_queue WHEN OLD.id = {}
       BEGIN SELECT RAISE(ABORT, 'disk I/O'); END;",
      first
    );
    store
      .with_conn(move |conn| Ok(conn.execute_batch(&trigger)?))
      .await
      .unwrap();

    let report = queue.flush().await.unwrap();
    assert_eq!(report.synced, vec![second]);
    assert_eq!(report.failed.len(), 1);
    assert_eq!(report.failed[0].0, first);
    assert!(report.failed[0].1.contains("replayed but not removed"));
    assert_eq!(report.remaining, 1);

    let pending: Vec<_> = queue.pending().await.unwrap().iter().map(|op| op.id).collect();
    assert_eq!(pending, vec![first]);
    assert_eq!(
      rx.try_recv().unwrap(),
      ClientMessage::SyncCompleted {
        synced: 1,
        failed: 1
      }
    );
  }

  #[tokio::test]
  async fn test_story_keeps_the_key_it_was_given() {
    let (queue, _) = queue_with(Arc::new(Recorder::default()));
    queue
      .add_story_with_key(&submission(), "attempt-1".to_string())
      .await
      .unwrap();
    queue.add_story_offline(&submission()).await.unwrap();

    let pending = queue.pending().await.unwrap();
    assert_eq!(pending[0].idempotency_key.as_deref(), Some("attempt-1"));
    assert!(pending[1].idempotency_key.is_some());
    assert_ne!(pending[0].idempotency_key, pending[1].idempotency_key);
  }

  #[tokio::test]
  async fn test_hung_handler_times_out() {
    let clients = ClientBus::new();
    let queue = OfflineQueue::new(
      Store::open_in_memory().unwrap(),
      clients,
      Duration::from_millis(50),
    )
    .with_handler("test", Arc::new(Hang));
    let id = queue.enqueue("test", json!({}), json!({})).await.unwrap();

    let report = queue.flush().await.unwrap();
    assert_eq!(report.failed.len(), 1);
    assert_eq!(report.failed[0].0, id);
    assert_eq!(report.remaining, 1);
  }

  #[tokio::test]
  async fn test_no_broadcast_when_nothing_synced() {
    let (queue, clients) = queue_with(Arc::new(Recorder::default()));
    let mut rx = clients.subscribe();
    queue
      .enqueue("test", json!({ "fail": true }), json!({}))
      .await
      .unwrap();

    queue.flush().await.unwrap();
    assert!(rx.try_recv().is_err());
  }

  #[tokio::test]
  async fn test_offline_story_syncs_once_connectivity_returns() {
    let fetcher = MockFetcher::new();
    let api = StoryApi::new(&Config::default(), fetcher.clone());
    let clients = ClientBus::new();
    let mut rx = clients.subscribe();
    let queue = OfflineQueue::new(
      Store::open_in_memory().unwrap(),
      clients,
      Duration::from_secs(5),
    )
    .with_handler(CREATE_STORY, Arc::new(CreateStoryHandler::new(api)));

    queue.add_story_offline(&submission()).await.unwrap();

    // still offline: the POST fails and the story stays queued
    let report = queue.flush().await.unwrap();
    assert_eq!(report.remaining, 1);
    assert!(rx.try_recv().is_err());

    fetcher.respond(
      STORIES_URL,
      Response::new(201, r#"{"error":false,"message":"Story created successfully"}"#),
    );
    let report = queue.flush().await.unwrap();
    assert_eq!(report.synced.len(), 1);
    assert!(queue.is_queue_empty().await.unwrap());
    assert_eq!(
      rx.try_recv().unwrap(),
      ClientMessage::SyncCompleted {
        synced: 1,
        failed: 0
      }
    );

    // both attempts carried the same idempotency key
    let keys: Vec<_> = fetcher
      .requests()
      .iter()
      .map(|r| r.header("idempotency-key").map(String::from))
      .collect();
    assert_eq!(keys.len(), 2);
    assert!(keys[0].is_some());
    assert_eq!(keys[0], keys[1]);
  }

  #[tokio::test]
  async fn test_concurrent_flushes_replay_once() {
    let fetcher = MockFetcher::new();
    fetcher.respond(
      STORIES_URL,
      Response::new(201, r#"{"error":false,"message":"ok"}"#),
    );
    let gate = fetcher.hold();
    let api = StoryApi::new(&Config::default(), fetcher.clone());
    let queue = Arc::new(
      OfflineQueue::new(
        Store::open_in_memory().unwrap(),
        ClientBus::new(),
        Duration::from_secs(5),
      )
      .with_handler(CREATE_STORY, Arc::new(CreateStoryHandler::new(api))),
    );
    queue.add_story_offline(&submission()).await.unwrap();

    let a = tokio::spawn({
      let queue = Arc::clone(&queue);
      async move { queue.flush().await }
    });
    let b = tokio::spawn({
      let queue = Arc::clone(&queue);
      async move { queue.flush().await }
    });
    gate.add_permits(10);

    let a = a.await.unwrap().unwrap();
    let b = b.await.unwrap().unwrap();
    assert_eq!(a.synced.len() + b.synced.len(), 1);
    assert_eq!(fetcher.calls(STORIES_URL), 1);
    assert!(queue.is_queue_empty().await.unwrap());
  }
}
