//! The five caching policies.
//!
//! A cache read or write that fails is logged and treated as a miss; a broken
//! store degrades reads to network-only instead of failing them.

use tracing::{debug, error, warn};
use url::Url;

use super::CacheRouter;
use crate::cache::{Bucket, CachedResponse, Served};
use crate::error::Result;
use crate::http::{fetch_with_timeout, Request, Response};

impl CacheRouter {
  pub(super) async fn fetch(&self, request: &Request) -> Result<Response> {
    fetch_with_timeout(self.fetcher.as_ref(), request, self.timeout).await
  }

  pub(super) async fn lookup(&self, bucket: Option<&Bucket>, url: &Url) -> Option<CachedResponse> {
    let bucket = bucket?;
    match bucket.match_url(url).await {
      Ok(hit) => hit,
      Err(e) => {
        error!(bucket = bucket.name(), error = %e, "cache read failed, treating as miss");
        None
      }
    }
  }

  /// Store a copy of a successful response; anything else is left out.
  pub(super) async fn remember(&self, bucket: Option<&Bucket>, url: &Url, response: &Response) {
    let Some(bucket) = bucket else {
      return;
    };
    if !response.is_ok() {
      return;
    }
    if let Err(e) = bucket.put(url, response).await {
      error!(bucket = bucket.name(), error = %e, "cache write failed");
    }
  }

  /// Cached copy if present, otherwise network (stored on 2xx). A network
  /// failure with no cached copy propagates.
  pub(super) async fn cache_first(
    &self,
    request: &Request,
    bucket: Option<&Bucket>,
  ) -> Result<Served> {
    if let Some(hit) = self.lookup(bucket, &request.url).await {
      return Ok(Served::from_cache(hit.response, hit.stored_at));
    }

    let response = self.fetch(request).await?;
    self.remember(bucket, &request.url, &response).await;
    Ok(Served::from_network(response))
  }

  /// Cache-first that never fails: total failure yields a placeholder image.
  pub(super) async fn cache_first_with_fallback(
    &self,
    request: &Request,
    bucket: Option<&Bucket>,
  ) -> Result<Served> {
    match self.cache_first(request, bucket).await {
      Ok(served) => Ok(served),
      Err(e) => {
        warn!(url = %request.url, error = %e, "image unavailable, serving placeholder");
        Ok(Served::fallback(Response::image_placeholder()))
      }
    }
  }

  /// Network first; on failure the cached copy, else a structured 503
  /// offline notice.
  pub(super) async fn network_first(
    &self,
    request: &Request,
    bucket: Option<&Bucket>,
  ) -> Result<Served> {
    match self.fetch(request).await {
      Ok(response) => {
        self.remember(bucket, &request.url, &response).await;
        Ok(Served::from_network(response))
      }
      Err(e) => {
        if let Some(hit) = self.lookup(bucket, &request.url).await {
          warn!(url = %request.url, error = %e, "network failed, serving cached API response");
          return Ok(Served::stale(hit.response, hit.stored_at));
        }
        warn!(url = %request.url, error = %e, "network failed with nothing cached");
        Ok(Served::fallback(Response::offline_notice()))
      }
    }
  }

  /// Network; on failure the precached offline page, else a bare 503.
  pub(super) async fn navigation(
    &self,
    request: &Request,
    static_bucket: Option<&Bucket>,
  ) -> Result<Served> {
    match self.fetch(request).await {
      Ok(response) => Ok(Served::from_network(response)),
      Err(e) => {
        warn!(url = %request.url, error = %e, "navigation failed, serving offline page");
        match self.lookup(static_bucket, &self.offline_page).await {
          Some(page) => Ok(Served {
            cached_at: Some(page.stored_at),
            ..Served::fallback(page.response)
          }),
          None => Ok(Served::fallback(Response::offline_text())),
        }
      }
    }
  }

  /// Cached copy immediately, refreshed in the background; without a cached
  /// copy the caller waits on the network.
  pub(super) async fn stale_while_revalidate(
    &self,
    request: &Request,
    bucket: Option<&Bucket>,
  ) -> Result<Served> {
    if let Some(bucket) = bucket {
      if let Some(hit) = self.lookup(Some(bucket), &request.url).await {
        self.spawn_revalidation(request.clone(), bucket.clone()).await;
        return Ok(Served::from_cache(hit.response, hit.stored_at));
      }
    }

    let response = self.fetch(request).await?;
    self.remember(bucket, &request.url, &response).await;
    Ok(Served::from_network(response))
  }

  async fn spawn_revalidation(&self, request: Request, bucket: Bucket) {
    let fetcher = std::sync::Arc::clone(&self.fetcher);
    let timeout = self.timeout;

    let mut tasks = self.revalidations.lock().await;
    // Reap finished refreshes so the set does not grow unbounded
    while tasks.try_join_next().is_some() {}

    tasks.spawn(async move {
      match fetch_with_timeout(fetcher.as_ref(), &request, timeout).await {
        Ok(response) if response.is_ok() => {
          if let Err(e) = bucket.put(&request.url, &response).await {
            error!(bucket = bucket.name(), error = %e, "revalidation write failed");
          } else {
            debug!(url = %request.url, "revalidated");
          }
        }
        Ok(response) => {
          debug!(url = %request.url, status = response.status, "revalidation kept cached copy");
        }
        Err(e) => {
          debug!(url = %request.url, error = %e, "revalidation failed");
        }
      }
    });
  }
}
