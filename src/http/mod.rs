//! Request/response model shared by the router, the API client and the
//! offline queue, plus the responses synthesized when the network is gone.

mod fetcher;

pub use fetcher::{fetch_with_timeout, Fetcher, HttpFetcher};
pub use reqwest::Method;

use serde::{de::DeserializeOwned, Deserialize, Serialize};
use std::collections::BTreeMap;
use url::Url;

use crate::error::{OfflineError, Result};

/// What the requester intends to do with the response.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Destination {
  #[default]
  Empty,
  Document,
  Image,
  Script,
  Style,
  Font,
  Manifest,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum RequestMode {
  #[default]
  Cors,
  /// Full-page load
  Navigate,
  NoCors,
  SameOrigin,
}

/// One field of a multipart form.
#[derive(Debug, Clone, PartialEq)]
pub enum FormPart {
  Text {
    name: String,
    value: String,
  },
  File {
    name: String,
    file_name: String,
    mime: String,
    bytes: Vec<u8>,
  },
}

#[derive(Debug, Clone, Default, PartialEq)]
pub enum Body {
  #[default]
  Empty,
  Bytes(Vec<u8>),
  Multipart(Vec<FormPart>),
}

/// An outbound request as seen by the interception point.
#[derive(Debug, Clone)]
pub struct Request {
  pub method: Method,
  pub url: Url,
  /// Lowercased header names
  pub headers: BTreeMap<String, String>,
  pub destination: Destination,
  pub mode: RequestMode,
  pub body: Body,
}

impl Request {
  pub fn new(method: Method, url: &str) -> Result<Self> {
    let url = Url::parse(url)
      .map_err(|e| OfflineError::InvalidRequest(format!("bad url {}: {}", url, e)))?;

    Ok(Self {
      method,
      url,
      headers: BTreeMap::new(),
      destination: Destination::Empty,
      mode: RequestMode::Cors,
      body: Body::Empty,
    })
  }

  pub fn get(url: &str) -> Result<Self> {
    Self::new(Method::GET, url)
  }

  pub fn with_header(mut self, name: &str, value: &str) -> Self {
    self
      .headers
      .insert(name.to_ascii_lowercase(), value.to_string());
    self
  }

  pub fn with_destination(mut self, destination: Destination) -> Self {
    self.destination = destination;
    self
  }

  pub fn with_mode(mut self, mode: RequestMode) -> Self {
    self.mode = mode;
    self
  }

  pub fn with_body(mut self, body: Body) -> Self {
    self.body = body;
    self
  }

  pub fn header(&self, name: &str) -> Option<&str> {
    self
      .headers
      .get(&name.to_ascii_lowercase())
      .map(String::as_str)
  }
}

/// A response, either live from the network, replayed from a cache bucket,
/// or synthesized locally.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Response {
  pub status: u16,
  pub headers: BTreeMap<String, String>,
  pub body: Vec<u8>,
}

/// Body of the response returned when an API call fails with nothing cached.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OfflineNotice {
  pub error: bool,
  pub message: String,
  pub offline: bool,
}

pub const OFFLINE_MESSAGE: &str = "You are offline. Please check your internet connection.";

const IMAGE_PLACEHOLDER: &str = r##"<svg width="200" height="150" xmlns="http://www.w3.org/2000/svg"><rect width="100%" height="100%" fill="#f0f0f0"/><text x="50%" y="50%" text-anchor="middle" dy=".3em" fill="#999">Image unavailable</text></svg>"##;

impl Response {
  pub fn new(status: u16, body: impl Into<Vec<u8>>) -> Self {
    Self {
      status,
      headers: BTreeMap::new(),
      body: body.into(),
    }
  }

  pub fn with_header(mut self, name: &str, value: &str) -> Self {
    self
      .headers
      .insert(name.to_ascii_lowercase(), value.to_string());
    self
  }

  /// 2xx
  pub fn is_ok(&self) -> bool {
    (200..300).contains(&self.status)
  }

  pub fn header(&self, name: &str) -> Option<&str> {
    self
      .headers
      .get(&name.to_ascii_lowercase())
      .map(String::as_str)
  }

  pub fn content_type(&self) -> Option<&str> {
    self.header("content-type")
  }

  pub fn json<T: DeserializeOwned>(&self) -> Result<T> {
    Ok(serde_json::from_slice(&self.body)?)
  }

  pub fn text(&self) -> String {
    String::from_utf8_lossy(&self.body).into_owned()
  }

  /// 503 carrying `{"error": true, "offline": true, ...}`.
  pub fn offline_notice() -> Self {
    let notice = OfflineNotice {
      error: true,
      message: OFFLINE_MESSAGE.to_string(),
      offline: true,
    };
    let body = serde_json::to_vec(&notice).unwrap_or_default();
    Self::new(503, body).with_header("content-type", "application/json")
  }

  /// The "offline, no cached data" notice, if this response is one.
  pub fn as_offline_notice(&self) -> Option<OfflineNotice> {
    if self.status != 503 {
      return None;
    }
    self
      .json::<OfflineNotice>()
      .ok()
      .filter(|notice| notice.offline)
  }

  /// Grey "Image unavailable" SVG.
  pub fn image_placeholder() -> Self {
    Self::new(200, IMAGE_PLACEHOLDER).with_header("content-type", "image/svg+xml")
  }

  /// Bare 503 used when even the offline page is missing.
  pub fn offline_text() -> Self {
    Self::new(503, "Offline").with_header("content-type", "text/plain")
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_offline_notice_is_recognizable() {
    let response = Response::offline_notice();
    assert_eq!(response.status, 503);
    assert_eq!(response.content_type(), Some("application/json"));

    let notice = response.as_offline_notice().unwrap();
    assert!(notice.offline);
    assert!(notice.error);
    assert_eq!(notice.message, OFFLINE_MESSAGE);
  }

  #[test]
  fn test_plain_503_is_not_an_offline_notice() {
    assert!(Response::offline_text().as_offline_notice().is_none());
    assert!(Response::new(503, r#"{"error":true,"message":"busy","offline":false}"#)
      .as_offline_notice()
      .is_none());
  }

  #[test]
  fn test_placeholder_is_successful_svg() {
    let response = Response::image_placeholder();
    assert!(response.is_ok());
    assert_eq!(response.content_type(), Some("image/svg+xml"));
    assert!(response.text().contains("Image unavailable"));
  }

  #[test]
  fn test_headers_are_case_insensitive() {
    let request = Request::get("https://example.test/a")
      .unwrap()
      .with_header("Authorization", "Bearer t");
    assert_eq!(request.header("authorization"), Some("Bearer t"));
    assert_eq!(request.header("AUTHORIZATION"), Some("Bearer t"));
  }

  #[test]
  fn test_invalid_url_is_rejected() {
    assert!(matches!(
      Request::get("not a url"),
      Err(OfflineError::InvalidRequest(_))
    ));
  }
}
