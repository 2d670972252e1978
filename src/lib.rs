//! Offline-resilience core for the StoryShare client.
//!
//! - [`router`]: per-request caching policies over bounded buckets
//! - [`queue`]: durable queue of writes made offline, replayed on reconnect
//! - [`store`]: SQLite-backed local collections
//! - [`worker`]: connectivity and lifecycle signal dispatch

pub mod api;
pub mod cache;
pub mod config;
pub mod error;
pub mod event;
pub mod http;
pub mod notification;
pub mod queue;
pub mod router;
pub mod store;
pub mod worker;

#[cfg(test)]
mod testing;

pub use error::{OfflineError, Result};
