//! Scripted collaborators for unit tests.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tokio::sync::Semaphore;

use crate::error::{OfflineError, Result};
use crate::http::{Fetcher, Request, Response};

#[derive(Clone)]
enum Reply {
  Respond(Response),
  Fail,
}

/// Fetcher that answers from a URL table. Unknown URLs fail as transport
/// errors, like an unreachable network.
#[derive(Default)]
pub struct MockFetcher {
  replies: Mutex<HashMap<String, Reply>>,
  calls: Mutex<Vec<Request>>,
  gate: Mutex<Option<Arc<Semaphore>>>,
}

impl MockFetcher {
  pub fn new() -> Arc<Self> {
    Arc::new(Self::default())
  }

  pub fn respond(&self, url: &str, response: Response) {
    self
      .replies
      .lock()
      .unwrap()
      .insert(url.to_string(), Reply::Respond(response));
  }

  pub fn fail(&self, url: &str) {
    self
      .replies
      .lock()
      .unwrap()
      .insert(url.to_string(), Reply::Fail);
  }

  /// Block every fetch until the returned semaphore gets permits.
  pub fn hold(&self) -> Arc<Semaphore> {
    let gate = Arc::new(Semaphore::new(0));
    *self.gate.lock().unwrap() = Some(Arc::clone(&gate));
    gate
  }

  pub fn calls(&self, url: &str) -> usize {
    self
      .calls
      .lock()
      .unwrap()
      .iter()
      .filter(|r| r.url.as_str() == url)
      .count()
  }

  pub fn requests(&self) -> Vec<Request> {
    self.calls.lock().unwrap().clone()
  }
}

#[async_trait]
impl Fetcher for MockFetcher {
  async fn fetch(&self, request: &Request) -> Result<Response> {
    self.calls.lock().unwrap().push(request.clone());

    let gate = self.gate.lock().unwrap().clone();
    if let Some(gate) = gate {
      gate.acquire().await.unwrap().forget();
    }

    let reply = self
      .replies
      .lock()
      .unwrap()
      .get(request.url.as_str())
      .cloned();

    match reply {
      Some(Reply::Respond(response)) => Ok(response),
      Some(Reply::Fail) | None => Err(OfflineError::Transport(format!(
        "connection refused: {}",
        request.url
      ))),
    }
  }
}
