//! Error taxonomy shared by the store, router and offline queue.

use thiserror::Error;

/// Failures surfaced by the offline-resilience core.
///
/// Every public operation resolves to either a value or one of these; nothing
/// panics across the crate boundary.
#[derive(Debug, Error)]
pub enum OfflineError {
  /// Network unreachable, connection reset, DNS failure.
  #[error("Network error: {0}")]
  Transport(String),

  /// A network attempt did not settle within the configured window.
  #[error("Network request timed out after {0:?}")]
  Timeout(std::time::Duration),

  /// The backend explicitly reported the resource as missing.
  #[error("Not found: {0}")]
  NotFound(String),

  /// The backend answered but rejected the request.
  #[error("API error ({status}): {message}")]
  Api { status: u16, message: String },

  /// Local storage failed (quota, corruption, lock poisoning).
  #[error("Storage error: {0}")]
  Storage(String),

  /// A queued operation carries a type tag with no registered handler.
  #[error("Unknown operation type: {0}")]
  UnknownOperation(String),

  /// Network failed and nothing usable was cached.
  #[error("No cached data available: {0}")]
  NoCachedData(String),

  #[error("Serialization error: {0}")]
  Serialization(String),

  #[error("Invalid request: {0}")]
  InvalidRequest(String),
}

impl OfflineError {
  /// Whether this failure came from the network layer (and so may be
  /// answered from cache or retried by a later flush).
  pub fn is_transport(&self) -> bool {
    matches!(self, OfflineError::Transport(_) | OfflineError::Timeout(_))
  }
}

impl From<rusqlite::Error> for OfflineError {
  fn from(err: rusqlite::Error) -> Self {
    OfflineError::Storage(err.to_string())
  }
}

impl From<serde_json::Error> for OfflineError {
  fn from(err: serde_json::Error) -> Self {
    OfflineError::Serialization(err.to_string())
  }
}

impl From<reqwest::Error> for OfflineError {
  fn from(err: reqwest::Error) -> Self {
    if err.is_timeout() {
      // reqwest does not expose the configured duration
      OfflineError::Transport(format!("timed out: {}", err))
    } else {
      OfflineError::Transport(err.to_string())
    }
  }
}

pub type Result<T> = std::result::Result<T, OfflineError>;

#[cfg(test)]
mod tests {
  use super::*;
  use std::time::Duration;

  #[test]
  fn test_transport_classification() {
    assert!(OfflineError::Transport("reset".into()).is_transport());
    assert!(OfflineError::Timeout(Duration::from_secs(1)).is_transport());
    assert!(!OfflineError::NotFound("story-1".into()).is_transport());
    assert!(!OfflineError::Storage("disk full".into()).is_transport());
  }

  #[test]
  fn test_not_found_message() {
    let err = OfflineError::NotFound("Story not found".into());
    assert_eq!(err.to_string(), "Not found: Story not found");
  }
}
