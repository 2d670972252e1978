//! Cache strategy router: the read-through path for every intercepted GET.
//!
//! Each request is classified into exactly one policy (see [`Route`]) and
//! executed against its bucket. Install and activate manage the bucket set
//! across deploys.

mod classify;
mod strategies;

pub use classify::{Classifier, Route};

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};
use url::Url;

use crate::cache::{active_bucket_names, Bucket, BucketKind, CacheStorage, Served};
use crate::config::{BucketLimits, CacheConfig, Config};
use crate::error::{OfflineError, Result};
use crate::http::{Fetcher, Request};

/// Outcome of precaching the static manifest.
#[derive(Debug, Clone, Default)]
pub struct InstallReport {
  pub cached: Vec<String>,
  pub failed: Vec<String>,
}

pub struct CacheRouter {
  fetcher: Arc<dyn Fetcher>,
  caches: CacheStorage,
  classifier: Classifier,
  cache_config: CacheConfig,
  precache: Vec<Url>,
  offline_page: Url,
  timeout: Duration,
  /// Background stale-while-revalidate refreshes
  revalidations: Mutex<JoinSet<()>>,
}

impl CacheRouter {
  pub fn new(config: &Config, caches: CacheStorage, fetcher: Arc<dyn Fetcher>) -> Result<Self> {
    let origin = Url::parse(&config.app.origin).map_err(|e| {
      OfflineError::InvalidRequest(format!("bad app origin {}: {}", config.app.origin, e))
    })?;

    let precache = config
      .cache
      .precache
      .iter()
      .map(|entry| classify::resolve(&origin, entry))
      .collect::<Result<Vec<_>>>()?;
    let offline_page = classify::resolve(&origin, &config.app.offline_page)?;

    Ok(Self {
      fetcher,
      caches,
      classifier: Classifier::new(config)?,
      cache_config: config.cache.clone(),
      precache,
      offline_page,
      timeout: config.network.timeout(),
      revalidations: Mutex::new(JoinSet::new()),
    })
  }

  /// Serve one intercepted request through its caching policy.
  pub async fn handle(&self, request: Request) -> Result<Served> {
    let route = self.classifier.classify(&request);
    debug!(url = %request.url, ?route, "routing request");

    match route {
      Route::Passthrough => Ok(Served::from_network(self.fetch(&request).await?)),
      Route::Static => {
        let bucket = self.open_bucket(&BucketKind::Static).await;
        self.cache_first(&request, bucket.as_ref()).await
      }
      Route::Image => {
        let bucket = self.open_bucket(&BucketKind::Images).await;
        self.cache_first_with_fallback(&request, bucket.as_ref()).await
      }
      Route::Api => {
        let bucket = self.open_bucket(&BucketKind::Dynamic).await;
        self.network_first(&request, bucket.as_ref()).await
      }
      Route::Navigation => {
        let bucket = self.open_bucket(&BucketKind::Static).await;
        self.navigation(&request, bucket.as_ref()).await
      }
      Route::Dynamic(kind) => {
        let bucket = self.open_bucket(&kind).await;
        self.stale_while_revalidate(&request, bucket.as_ref()).await
      }
    }
  }

  fn limits(&self, kind: &BucketKind) -> BucketLimits {
    match kind {
      BucketKind::Static => self.cache_config.static_limits,
      BucketKind::Dynamic => self.cache_config.dynamic,
      BucketKind::Images => self.cache_config.images,
      BucketKind::Origin(name) => self
        .cache_config
        .origins
        .iter()
        .find(|o| &o.name == name)
        .map(|o| o.limits)
        .unwrap_or_default(),
    }
  }

  async fn bucket(&self, kind: &BucketKind) -> Result<Bucket> {
    let name = kind.bucket_name(&self.cache_config.name);
    self.caches.open(&name, self.limits(kind)).await
  }

  /// Bucket for a read; `None` when the store is unusable, in which case the
  /// policy runs network-only.
  async fn open_bucket(&self, kind: &BucketKind) -> Option<Bucket> {
    match self.bucket(kind).await {
      Ok(bucket) => Some(bucket),
      Err(e) => {
        error!(?kind, error = %e, "cache bucket unavailable, going network-only");
        None
      }
    }
  }

  /// Precache the static manifest. Entries that fail are reported, not fatal.
  pub async fn install(&self) -> Result<InstallReport> {
    info!(count = self.precache.len(), "precaching static resources");
    let bucket = self.bucket(&BucketKind::Static).await?;

    let fetches = self.precache.iter().map(|url| async move {
      let outcome = match Request::get(url.as_str()) {
        Ok(request) => self.fetch(&request).await,
        Err(e) => Err(e),
      };
      (url, outcome)
    });

    let mut report = InstallReport::default();
    for (url, outcome) in futures::future::join_all(fetches).await {
      match outcome {
        Ok(response) if response.is_ok() => match bucket.put(url, &response).await {
          Ok(()) => report.cached.push(url.to_string()),
          Err(e) => {
            warn!(url = %url, error = %e, "failed to store precached resource");
            report.failed.push(url.to_string());
          }
        },
        Ok(response) => {
          warn!(url = %url, status = response.status, "precache fetch returned non-success");
          report.failed.push(url.to_string());
        }
        Err(e) => {
          warn!(url = %url, error = %e, "precache fetch failed");
          report.failed.push(url.to_string());
        }
      }
    }

    info!(
      cached = report.cached.len(),
      failed = report.failed.len(),
      "install finished"
    );
    Ok(report)
  }

  /// Delete every bucket not used by the current configuration. Returns the
  /// names removed.
  pub async fn activate(&self) -> Result<Vec<String>> {
    let active = active_bucket_names(&self.cache_config);
    let mut removed = Vec::new();

    for name in self.caches.keys().await? {
      if !active.contains(&name) {
        info!(bucket = %name, "deleting old cache");
        self.caches.delete(&name).await?;
        removed.push(name);
      }
    }

    Ok(removed)
  }

  /// Fetch and store the given URLs in the dynamic bucket.
  pub async fn cache_urls(&self, urls: &[String]) -> Result<usize> {
    let bucket = self.bucket(&BucketKind::Dynamic).await?;
    let mut stored = 0;

    for url in urls {
      let request = Request::get(url)?;
      let response = self.fetch(&request).await?;
      if response.is_ok() {
        bucket.put(&request.url, &response).await?;
        stored += 1;
      }
    }

    Ok(stored)
  }

  /// Wait for all in-flight background refreshes to finish.
  pub async fn settle(&self) {
    let mut tasks = std::mem::take(&mut *self.revalidations.lock().await);
    while tasks.join_next().await.is_some() {}
  }
}
