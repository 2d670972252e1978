//! Connectivity and lifecycle signals, and the broadcast channel back to
//! open UI contexts.

use serde::Serialize;
use std::str::FromStr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::io::{AsyncBufRead, AsyncBufReadExt};
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, warn};

use crate::notification::Notification;

/// Tag the hosting platform uses for queue replay requests.
pub const BACKGROUND_SYNC_TAG: &str = "background-sync";

/// Inputs to the worker
#[derive(Debug, Clone, PartialEq)]
pub enum Signal {
  /// Connectivity restored
  Online,
  /// Connectivity lost
  Offline,
  /// Page became visible or hidden
  Visibility { visible: bool },
  /// Background sync requested by the platform
  Sync { tag: String },
  /// New version installing: precache
  Install,
  /// New version taking over: drop old buckets
  Activate,
  /// Message posted by a UI context
  Message(ClientRequest),
  /// Push message with optional payload (JSON or plain text)
  Push(Option<String>),
  /// User clicked a notification
  NotificationClick {
    action: Option<String>,
    url: Option<String>,
  },
  Shutdown,
}

/// Requests a UI context can post to the worker
#[derive(Debug, Clone, PartialEq)]
pub enum ClientRequest {
  SkipWaiting,
  CacheUrls(Vec<String>),
  Other(String),
}

/// Messages broadcast to every open UI context
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ClientMessage {
  /// A flush pass replayed at least one queued operation
  SyncCompleted { synced: usize, failed: usize },
  BackgroundSync { message: String },
  ConnectionStatus { online: bool },
  ShowNotification(Notification),
  OpenWindow { url: String },
  SwResponse { message: String },
}

impl FromStr for Signal {
  type Err = String;

  /// Parse one line of the text signal protocol, e.g. `online`,
  /// `sync background-sync`, `cache-urls <url>...`, `push {"body":"hi"}`.
  fn from_str(line: &str) -> Result<Self, Self::Err> {
    let line = line.trim();
    let (word, rest) = match line.split_once(char::is_whitespace) {
      Some((word, rest)) => (word, rest.trim()),
      None => (line, ""),
    };
    let rest_opt = (!rest.is_empty()).then(|| rest.to_string());

    match word.to_ascii_lowercase().as_str() {
      "online" => Ok(Signal::Online),
      "offline" => Ok(Signal::Offline),
      "visible" => Ok(Signal::Visibility { visible: true }),
      "hidden" => Ok(Signal::Visibility { visible: false }),
      "sync" => Ok(Signal::Sync {
        tag: rest_opt.unwrap_or_else(|| BACKGROUND_SYNC_TAG.to_string()),
      }),
      "install" => Ok(Signal::Install),
      "activate" => Ok(Signal::Activate),
      "skip-waiting" => Ok(Signal::Message(ClientRequest::SkipWaiting)),
      "cache-urls" => Ok(Signal::Message(ClientRequest::CacheUrls(
        rest.split_whitespace().map(String::from).collect(),
      ))),
      "message" => Ok(Signal::Message(ClientRequest::Other(rest.to_string()))),
      "push" => Ok(Signal::Push(rest_opt)),
      "click" => {
        let mut parts = rest.split_whitespace();
        Ok(Signal::NotificationClick {
          action: parts.next().map(String::from),
          url: parts.next().map(String::from),
        })
      }
      "quit" | "exit" => Ok(Signal::Shutdown),
      "" => Err("empty signal".to_string()),
      other => Err(format!("unknown signal: {}", other)),
    }
  }
}

/// Shared online/offline state.
#[derive(Debug, Clone)]
pub struct Connectivity {
  online: Arc<AtomicBool>,
}

impl Connectivity {
  pub fn new(online: bool) -> Self {
    Self {
      online: Arc::new(AtomicBool::new(online)),
    }
  }

  pub fn is_online(&self) -> bool {
    self.online.load(Ordering::SeqCst)
  }

  /// Record the current state; returns true if it changed.
  pub fn set_online(&self, online: bool) -> bool {
    self.online.swap(online, Ordering::SeqCst) != online
  }
}

/// Broadcast channel to all open UI contexts.
#[derive(Debug, Clone)]
pub struct ClientBus {
  tx: broadcast::Sender<ClientMessage>,
}

impl ClientBus {
  pub fn new() -> Self {
    let (tx, _) = broadcast::channel(64);
    Self { tx }
  }

  pub fn subscribe(&self) -> broadcast::Receiver<ClientMessage> {
    self.tx.subscribe()
  }

  /// Send to every subscriber; having none is not an error.
  pub fn post(&self, message: ClientMessage) {
    debug!(?message, "broadcasting to clients");
    let _ = self.tx.send(message);
  }
}

impl Default for ClientBus {
  fn default() -> Self {
    Self::new()
  }
}

/// Event handler that funnels signals from any source into one queue
pub struct EventHandler {
  tx: mpsc::UnboundedSender<Signal>,
  rx: mpsc::UnboundedReceiver<Signal>,
}

impl EventHandler {
  pub fn new() -> Self {
    let (tx, rx) = mpsc::unbounded_channel();
    Self { tx, rx }
  }

  /// Sender for producers (connectivity probes, UI messages, timers)
  pub fn sender(&self) -> mpsc::UnboundedSender<Signal> {
    self.tx.clone()
  }

  /// Spawn a reader that parses one signal per line; end of input sends
  /// [`Signal::Shutdown`].
  pub fn spawn_line_reader<R>(&self, reader: R)
  where
    R: AsyncBufRead + Unpin + Send + 'static,
  {
    let tx = self.tx.clone();
    tokio::spawn(async move {
      let mut lines = reader.lines();
      loop {
        match lines.next_line().await {
          Ok(Some(line)) if line.trim().is_empty() => continue,
          Ok(Some(line)) => match line.parse::<Signal>() {
            Ok(signal) => {
              if tx.send(signal).is_err() {
                break;
              }
            }
            Err(e) => warn!(line = %line, error = %e, "ignoring unparseable signal"),
          },
          Ok(None) | Err(_) => {
            let _ = tx.send(Signal::Shutdown);
            break;
          }
        }
      }
    });
  }

  /// Receive the next signal
  pub async fn next(&mut self) -> Option<Signal> {
    self.rx.recv().await
  }
}

impl Default for EventHandler {
  fn default() -> Self {
    Self::new()
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_parse_signals() {
    assert_eq!("online".parse::<Signal>().unwrap(), Signal::Online);
    assert_eq!(
      " Hidden ".parse::<Signal>().unwrap(),
      Signal::Visibility { visible: false }
    );
    assert_eq!(
      "sync".parse::<Signal>().unwrap(),
      Signal::Sync {
        tag: BACKGROUND_SYNC_TAG.to_string()
      }
    );
    assert_eq!(
      "cache-urls http://a.test/x http://a.test/y"
        .parse::<Signal>()
        .unwrap(),
      Signal::Message(ClientRequest::CacheUrls(vec![
        "http://a.test/x".to_string(),
        "http://a.test/y".to_string()
      ]))
    );
    assert_eq!(
      r#"push {"body": "new story"}"#.parse::<Signal>().unwrap(),
      Signal::Push(Some(r#"{"body": "new story"}"#.to_string()))
    );
    assert_eq!(
      "click close".parse::<Signal>().unwrap(),
      Signal::NotificationClick {
        action: Some("close".to_string()),
        url: None
      }
    );
    assert!("reboot".parse::<Signal>().is_err());
  }

  #[test]
  fn test_connectivity_reports_transitions() {
    let connectivity = Connectivity::new(true);
    assert!(!connectivity.set_online(true));
    assert!(connectivity.set_online(false));
    assert!(!connectivity.is_online());
    assert!(connectivity.set_online(true));
  }

  #[test]
  fn test_client_message_wire_format() {
    let json = serde_json::to_value(ClientMessage::SyncCompleted {
      synced: 2,
      failed: 0,
    })
    .unwrap();
    assert_eq!(json["type"], "SYNC_COMPLETED");
    assert_eq!(json["synced"], 2);
  }

  #[tokio::test]
  async fn test_line_reader_ends_with_shutdown() {
    let mut events = EventHandler::new();
    let input: &'static [u8] = b"offline\n\nbogus\nonline\n";
    events.spawn_line_reader(tokio::io::BufReader::new(input));

    assert_eq!(events.next().await, Some(Signal::Offline));
    assert_eq!(events.next().await, Some(Signal::Online));
    assert_eq!(events.next().await, Some(Signal::Shutdown));
  }
}
