use async_trait::async_trait;

use crate::api::{StoryApi, StorySubmission};
use crate::error::Result;
use crate::store::OfflineOperation;

/// Replays one kind of queued operation against the backend.
#[async_trait]
pub trait OperationHandler: Send + Sync {
  async fn handle(&self, operation: &OfflineOperation) -> Result<()>;
}

/// Replays `create_story` operations as `POST /stories`.
pub struct CreateStoryHandler {
  api: StoryApi,
}

impl CreateStoryHandler {
  pub fn new(api: StoryApi) -> Self {
    Self { api }
  }
}

#[async_trait]
impl OperationHandler for CreateStoryHandler {
  async fn handle(&self, operation: &OfflineOperation) -> Result<()> {
    let submission: StorySubmission = serde_json::from_value(operation.data.clone())?;
    self
      .api
      .add_new_story(&submission, operation.idempotency_key.as_deref())
      .await?;
    Ok(())
  }
}
