//! Result of a routed read, including where the response came from.

use chrono::{DateTime, Utc};

use crate::http::Response;

/// A response handed back to the caller, with metadata about the source.
#[derive(Debug, Clone)]
pub struct Served {
  /// The actual response
  pub response: Response,
  /// Where it came from
  pub source: CacheSource,
  /// When the cached copy was stored (if from cache)
  pub cached_at: Option<DateTime<Utc>>,
}

impl Served {
  pub fn from_network(response: Response) -> Self {
    Self {
      response,
      source: CacheSource::Network,
      cached_at: None,
    }
  }

  pub fn from_cache(response: Response, cached_at: DateTime<Utc>) -> Self {
    Self {
      response,
      source: CacheSource::Cache,
      cached_at: Some(cached_at),
    }
  }

  /// Network failed, serving the last known good copy.
  pub fn stale(response: Response, cached_at: DateTime<Utc>) -> Self {
    Self {
      response,
      source: CacheSource::Stale,
      cached_at: Some(cached_at),
    }
  }

  /// Network failed and nothing was cached; response built locally.
  pub fn fallback(response: Response) -> Self {
    Self {
      response,
      source: CacheSource::Fallback,
      cached_at: None,
    }
  }

  /// True for the "offline, no cached data" API notice.
  pub fn is_offline_notice(&self) -> bool {
    self.source == CacheSource::Fallback && self.response.as_offline_notice().is_some()
  }
}

/// Indicates where a served response came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheSource {
  /// Fresh from the network
  Network,
  /// From cache without touching the network first
  Cache,
  /// From cache after the network attempt failed
  Stale,
  /// Synthesized locally (placeholder, offline page, offline notice)
  Fallback,
}
