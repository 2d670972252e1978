use serde::de::DeserializeOwned;
use std::sync::Arc;
use std::time::Duration;

use super::types::{ApiDetailResponse, ApiListResponse, ApiMessage, Story, StorySubmission};
use crate::config::Config;
use crate::error::{OfflineError, Result};
use crate::http::{fetch_with_timeout, Body, Fetcher, Method, Request, Response};

/// Header carrying the per-operation token on replayed submissions.
pub const IDEMPOTENCY_HEADER: &str = "Idempotency-Key";

/// Story API client
#[derive(Clone)]
pub struct StoryApi {
  fetcher: Arc<dyn Fetcher>,
  base_url: String,
  token: Option<String>,
  timeout: Duration,
}

impl StoryApi {
  pub fn new(config: &Config, fetcher: Arc<dyn Fetcher>) -> Self {
    Self {
      fetcher,
      base_url: config.api.base_url.trim_end_matches('/').to_string(),
      token: Config::get_api_token(),
      timeout: config.network.timeout(),
    }
  }

  pub fn with_token(mut self, token: Option<String>) -> Self {
    self.token = token;
    self
  }

  fn request(&self, method: Method, path: &str) -> Result<Request> {
    let request = Request::new(method, &format!("{}{}", self.base_url, path))?;
    Ok(match &self.token {
      Some(token) => request.with_header("Authorization", &format!("Bearer {}", token)),
      None => request,
    })
  }

  async fn send(&self, request: &Request) -> Result<Response> {
    fetch_with_timeout(self.fetcher.as_ref(), request, self.timeout).await
  }

  /// Decode a response, mapping `error: true` bodies and 404s to errors.
  fn decode<T: DeserializeOwned>(response: &Response, not_found: &str) -> Result<T> {
    if response.status == 404 {
      return Err(OfflineError::NotFound(not_found.to_string()));
    }

    let status: ApiMessage = response.json().map_err(|_| OfflineError::Api {
      status: response.status,
      message: response.text(),
    })?;
    if status.error || !response.is_ok() {
      return Err(OfflineError::Api {
        status: response.status,
        message: status.message,
      });
    }

    response.json()
  }

  /// Get all stories
  pub async fn get_all_stories(&self) -> Result<Vec<Story>> {
    let request = self.request(Method::GET, "/stories")?;
    let response = self.send(&request).await?;
    let body: ApiListResponse = Self::decode(&response, "Stories not found")?;
    Ok(body.list_story)
  }

  /// Get a single story by id
  pub async fn get_story_detail(&self, id: &str) -> Result<Story> {
    let request = self.request(Method::GET, &format!("/stories/{}", id))?;
    let response = self.send(&request).await?;
    let body: ApiDetailResponse = Self::decode(&response, "Story not found")?;
    body
      .story
      .ok_or_else(|| OfflineError::NotFound("Story not found".to_string()))
  }

  /// Post a new story as multipart form data.
  pub async fn add_new_story(
    &self,
    submission: &StorySubmission,
    idempotency_key: Option<&str>,
  ) -> Result<String> {
    let mut request = self
      .request(Method::POST, "/stories")?
      .with_body(Body::Multipart(submission.form_parts()));
    if let Some(key) = idempotency_key {
      request = request.with_header(IDEMPOTENCY_HEADER, key);
    }

    let response = self.send(&request).await?;
    let body: ApiMessage = Self::decode(&response, "Stories endpoint not found")?;
    Ok(body.message)
  }
}
