use std::sync::Arc;
use tracing::{info, warn};

use super::client::StoryApi;
use super::types::{Story, StorySubmission, Submission};
use crate::error::{OfflineError, Result};
use crate::event::Connectivity;
use crate::queue::{new_idempotency_key, OfflineQueue};
use crate::store::Store;

/// Story access for the UI: network first, local copy when offline, and
/// submissions queued while disconnected.
#[derive(Clone)]
pub struct StoryRepository {
  api: StoryApi,
  store: Store,
  queue: Arc<OfflineQueue>,
  connectivity: Connectivity,
}

impl StoryRepository {
  pub fn new(
    api: StoryApi,
    store: Store,
    queue: Arc<OfflineQueue>,
    connectivity: Connectivity,
  ) -> Self {
    Self {
      api,
      store,
      queue,
      connectivity,
    }
  }

  /// Fresh list from the API, saved for offline use. On a network failure
  /// the last saved list is returned instead.
  pub async fn get_all_stories(&self) -> Result<Vec<Story>> {
    match self.api.get_all_stories().await {
      Ok(stories) => {
        if let Err(e) = self.store.save_stories(stories.clone()).await {
          warn!(error = %e, "could not save stories for offline use");
        }
        Ok(stories)
      }
      Err(e) if e.is_transport() => {
        warn!(error = %e, "story list unavailable, using saved copy");
        let cached = self.store.get_stories().await?;
        if cached.is_empty() {
          return Err(OfflineError::NoCachedData(
            "No stories available offline".to_string(),
          ));
        }
        Ok(cached.into_iter().map(|c| c.story).collect())
      }
      Err(e) => Err(e),
    }
  }

  /// Fresh detail from the API, saved for offline use. A story the backend
  /// reports missing is never served from the local copy.
  pub async fn get_story_detail(&self, id: &str) -> Result<Story> {
    match self.api.get_story_detail(id).await {
      Ok(story) => {
        if let Err(e) = self.store.save_story_detail(story.clone()).await {
          warn!(id, error = %e, "could not save story detail for offline use");
        }
        Ok(story)
      }
      Err(e) if e.is_transport() => {
        warn!(id, error = %e, "story detail unavailable, using saved copy");
        self
          .store
          .get_story_detail(id)
          .await?
          .map(|cached| cached.story)
          .ok_or_else(|| OfflineError::NoCachedData("Story not available offline".to_string()))
      }
      Err(e) => Err(e),
    }
  }

  /// Post a story, or queue it when offline or when the network drops
  /// mid-request. Backend rejections are returned, not queued.
  /// The direct attempt and any queued replay share one idempotency key.
  pub async fn add_new_story(&self, submission: &StorySubmission) -> Result<Submission> {
    let key = new_idempotency_key();
    if !self.connectivity.is_online() {
      return self.queue_submission(submission, key).await;
    }

    match self.api.add_new_story(submission, Some(&key)).await {
      Ok(message) => Ok(Submission::Sent { message }),
      Err(e) if e.is_transport() => {
        warn!(error = %e, "posting story failed, queueing for later");
        self.queue_submission(submission, key).await
      }
      Err(e) => Err(e),
    }
  }

  async fn queue_submission(
    &self,
    submission: &StorySubmission,
    key: String,
  ) -> Result<Submission> {
    let operation_id = self.queue.add_story_with_key(submission, key).await?;
    info!(operation_id, "story saved, will sync when online");
    Ok(Submission::Queued { operation_id })
  }
}
