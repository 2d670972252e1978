use std::sync::Arc;
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

use crate::api::{StoryApi, StoryRepository};
use crate::cache::CacheStorage;
use crate::config::Config;
use crate::error::Result;
use crate::event::{
  ClientBus, ClientMessage, ClientRequest, Connectivity, EventHandler, Signal,
  BACKGROUND_SYNC_TAG,
};
use crate::http::Fetcher;
use crate::notification::Notification;
use crate::queue::{CreateStoryHandler, OfflineQueue, CREATE_STORY};
use crate::router::CacheRouter;
use crate::store::Store;

/// Lifecycle state of this worker version
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Lifecycle {
  /// Installed, waiting for the previous version to let go
  Waiting,
  /// Serving requests
  Active,
}

/// Owns every offline component and dispatches signals to them.
pub struct Worker {
  store: Store,
  router: Arc<CacheRouter>,
  queue: Arc<OfflineQueue>,
  repository: StoryRepository,
  connectivity: Connectivity,
  clients: ClientBus,
  lifecycle: Lifecycle,
  flushes: JoinSet<()>,
}

impl Worker {
  pub fn new(
    config: &Config,
    store: Store,
    fetcher: Arc<dyn Fetcher>,
    connectivity: Connectivity,
    clients: ClientBus,
  ) -> Result<Self> {
    let api = StoryApi::new(config, Arc::clone(&fetcher));
    let queue = Arc::new(
      OfflineQueue::new(store.clone(), clients.clone(), config.network.timeout())
        .with_handler(CREATE_STORY, Arc::new(CreateStoryHandler::new(api.clone()))),
    );
    let router = Arc::new(CacheRouter::new(
      config,
      CacheStorage::new(store.clone()),
      fetcher,
    )?);
    let repository = StoryRepository::new(
      api,
      store.clone(),
      Arc::clone(&queue),
      connectivity.clone(),
    );

    Ok(Self {
      store,
      router,
      queue,
      repository,
      connectivity,
      clients,
      lifecycle: Lifecycle::Waiting,
      flushes: JoinSet::new(),
    })
  }

  pub fn store(&self) -> &Store {
    &self.store
  }

  pub fn router(&self) -> &CacheRouter {
    &self.router
  }

  pub fn queue(&self) -> &OfflineQueue {
    &self.queue
  }

  pub fn repository(&self) -> &StoryRepository {
    &self.repository
  }

  pub fn connectivity(&self) -> &Connectivity {
    &self.connectivity
  }

  pub fn clients(&self) -> &ClientBus {
    &self.clients
  }

  pub fn lifecycle(&self) -> Lifecycle {
    self.lifecycle
  }

  /// Process signals until shutdown or until every sender is gone.
  pub async fn run(&mut self, events: &mut EventHandler) -> Result<()> {
    info!(online = self.connectivity.is_online(), "worker started");

    while let Some(signal) = events.next().await {
      match self.handle_signal(signal).await {
        Ok(true) => {}
        Ok(false) => break,
        // One failed signal never stops the loop
        Err(e) => error!(error = %e, "signal handling failed"),
      }
    }

    self.settle().await;
    info!("worker stopped");
    Ok(())
  }

  /// Dispatch one signal. Returns false on shutdown.
  pub async fn handle_signal(&mut self, signal: Signal) -> Result<bool> {
    debug!(?signal, "signal");
    match signal {
      Signal::Online => {
        if self.connectivity.set_online(true) {
          info!("back online");
          self.clients.post(ClientMessage::ConnectionStatus { online: true });
          self.spawn_flush(false);
        }
      }
      Signal::Offline => {
        if self.connectivity.set_online(false) {
          info!("connection lost");
          self.clients.post(ClientMessage::ConnectionStatus { online: false });
        }
      }
      Signal::Visibility { visible } => {
        if visible && self.connectivity.is_online() {
          self.spawn_flush(false);
        }
      }
      Signal::Sync { tag } => {
        if tag == BACKGROUND_SYNC_TAG {
          self.spawn_flush(true);
        } else {
          debug!(%tag, "ignoring sync with unknown tag");
        }
      }
      Signal::Install => {
        self.router.install().await?;
      }
      Signal::Activate => {
        let removed = self.router.activate().await?;
        self.lifecycle = Lifecycle::Active;
        info!(removed = removed.len(), "worker activated");
      }
      Signal::Message(request) => self.handle_client_request(request).await,
      Signal::Push(payload) => {
        let notification = Notification::from_push(payload.as_deref());
        self.clients.post(ClientMessage::ShowNotification(notification));
      }
      Signal::NotificationClick { action, url } => {
        if action.as_deref() != Some("close") {
          self.clients.post(ClientMessage::OpenWindow {
            url: url.unwrap_or_else(|| "/".to_string()),
          });
        }
      }
      Signal::Shutdown => return Ok(false),
    }
    Ok(true)
  }

  /// Every client message is acknowledged, even when acting on it fails.
  async fn handle_client_request(&mut self, request: ClientRequest) {
    match request {
      ClientRequest::SkipWaiting => {
        info!("skip waiting");
        self.lifecycle = Lifecycle::Active;
      }
      ClientRequest::CacheUrls(urls) => match self.router.cache_urls(&urls).await {
        Ok(stored) => info!(stored, requested = urls.len(), "cached client urls"),
        Err(e) => warn!(error = %e, "caching client urls failed"),
      },
      ClientRequest::Other(message) => debug!(%message, "unhandled client message"),
    }

    self.clients.post(ClientMessage::SwResponse {
      message: "Message received by service worker".to_string(),
    });
  }

  /// Replay the queue off the signal loop. Passes still run one at a time
  /// because the queue serializes them.
  fn spawn_flush(&mut self, background_sync: bool) {
    while let Some(done) = self.flushes.try_join_next() {
      if let Err(e) = done {
        error!(error = %e, "flush task panicked");
      }
    }

    let queue = Arc::clone(&self.queue);
    let clients = self.clients.clone();
    self.flushes.spawn(async move {
      let report = match queue.flush().await {
        Ok(report) => report,
        Err(e) => {
          error!(error = %e, "queue flush failed");
          return;
        }
      };
      if background_sync {
        clients.post(ClientMessage::BackgroundSync {
          message: format!(
            "Background sync triggered: {} synced, {} pending",
            report.synced.len(),
            report.remaining
          ),
        });
      }
    });
  }

  /// Wait for in-flight flushes and cache revalidations.
  pub async fn settle(&mut self) {
    while let Some(done) = self.flushes.join_next().await {
      if let Err(e) = done {
        error!(error = %e, "flush task panicked");
      }
    }
    self.router.settle().await;
  }
}
