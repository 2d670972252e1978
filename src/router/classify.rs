//! Request classification: decides which caching policy handles a request.

use std::collections::HashSet;
use url::Url;

use crate::cache::BucketKind;
use crate::config::Config;
use crate::error::{OfflineError, Result};
use crate::http::{Destination, Method, Request, RequestMode};

const STATIC_EXTENSIONS: &[&str] = &[".css", ".js", ".woff", ".woff2"];
const IMAGE_EXTENSIONS: &[&str] = &[".jpg", ".jpeg", ".png", ".gif", ".webp", ".svg"];

/// The policy a request is routed to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Route {
  /// Not a cacheable read (non-GET, non-http); goes straight to the network
  Passthrough,
  /// Cache-first in the static bucket
  Static,
  /// Cache-first with placeholder fallback in the image bucket
  Image,
  /// Network-first with offline fallback
  Api,
  /// Network, then offline page
  Navigation,
  /// Stale-while-revalidate in the given bucket (dynamic or an origin group)
  Dynamic(BucketKind),
}

/// Classifies requests against the configured manifest, API host and
/// origin groups. First match wins.
#[derive(Debug, Clone)]
pub struct Classifier {
  precache: HashSet<String>,
  api_host: Option<String>,
  origins: Vec<(String, Vec<String>)>,
}

/// Resolve a manifest entry (absolute or origin-relative) to a URL.
pub fn resolve(origin: &Url, entry: &str) -> Result<Url> {
  origin
    .join(entry)
    .map_err(|e| OfflineError::InvalidRequest(format!("bad manifest entry {}: {}", entry, e)))
}

fn without_fragment(url: &Url) -> String {
  let mut url = url.clone();
  url.set_fragment(None);
  url.to_string()
}

impl Classifier {
  pub fn new(config: &Config) -> Result<Self> {
    let origin = Url::parse(&config.app.origin).map_err(|e| {
      OfflineError::InvalidRequest(format!("bad app origin {}: {}", config.app.origin, e))
    })?;

    let precache = config
      .cache
      .precache
      .iter()
      .map(|entry| resolve(&origin, entry).map(|u| without_fragment(&u)))
      .collect::<Result<HashSet<_>>>()?;

    let api_host = Url::parse(&config.api.base_url)
      .ok()
      .and_then(|u| u.host_str().map(str::to_ascii_lowercase));

    let origins = config
      .cache
      .origins
      .iter()
      .map(|o| {
        (
          o.name.clone(),
          o.hosts.iter().map(|h| h.to_ascii_lowercase()).collect(),
        )
      })
      .collect();

    Ok(Self {
      precache,
      api_host,
      origins,
    })
  }

  pub fn classify(&self, request: &Request) -> Route {
    if request.method != Method::GET || !matches!(request.url.scheme(), "http" | "https") {
      return Route::Passthrough;
    }

    if self.is_static(request) {
      Route::Static
    } else if self.is_image(request) {
      Route::Image
    } else if self.is_api(request) {
      Route::Api
    } else if request.mode == RequestMode::Navigate {
      Route::Navigation
    } else {
      Route::Dynamic(self.origin_bucket(request).unwrap_or(BucketKind::Dynamic))
    }
  }

  fn is_static(&self, request: &Request) -> bool {
    let path = request.url.path().to_ascii_lowercase();
    self.precache.contains(&without_fragment(&request.url))
      || STATIC_EXTENSIONS.iter().any(|ext| path.ends_with(ext))
  }

  fn is_image(&self, request: &Request) -> bool {
    let path = request.url.path().to_ascii_lowercase();
    request.destination == Destination::Image
      || IMAGE_EXTENSIONS.iter().any(|ext| path.ends_with(ext))
  }

  fn is_api(&self, request: &Request) -> bool {
    match (&self.api_host, request.url.host_str()) {
      (Some(api), Some(host)) => api.eq_ignore_ascii_case(host),
      _ => false,
    }
  }

  fn origin_bucket(&self, request: &Request) -> Option<BucketKind> {
    let host = request.url.host_str()?.to_ascii_lowercase();
    self
      .origins
      .iter()
      .find(|(_, hosts)| hosts.contains(&host))
      .map(|(name, _)| BucketKind::Origin(name.clone()))
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn classifier() -> Classifier {
    Classifier::new(&Config::default()).unwrap()
  }

  fn get(url: &str) -> Request {
    Request::get(url).unwrap()
  }

  #[test]
  fn test_manifest_and_extensions_are_static() {
    let c = classifier();
    assert_eq!(c.classify(&get("http://localhost:8080/index.html")), Route::Static);
    assert_eq!(c.classify(&get("http://localhost:8080/")), Route::Static);
    assert_eq!(c.classify(&get("https://other.test/theme.css")), Route::Static);
    assert_eq!(c.classify(&get("https://other.test/font.woff2")), Route::Static);
  }

  #[test]
  fn test_images_by_destination_or_extension() {
    let c = classifier();
    assert_eq!(c.classify(&get("https://cdn.test/photo.JPG")), Route::Image);
    let avatar = get("https://cdn.test/avatar").with_destination(Destination::Image);
    assert_eq!(c.classify(&avatar), Route::Image);
  }

  #[test]
  fn test_api_host_wins_over_navigation() {
    let c = classifier();
    let list = get("https://story-api.dicoding.dev/v1/stories");
    assert_eq!(c.classify(&list), Route::Api);

    // Story photos on the API host are still images
    let photo = get("https://story-api.dicoding.dev/images/stories/p.jpg");
    assert_eq!(c.classify(&photo), Route::Image);
  }

  #[test]
  fn test_navigation_and_default() {
    let c = classifier();
    let page = get("http://localhost:8080/#/detail/1").with_mode(RequestMode::Navigate);
    // "/" is in the manifest, so a navigation to the shell is served statically
    assert_eq!(c.classify(&page), Route::Static);

    let page = get("http://localhost:8080/about").with_mode(RequestMode::Navigate);
    assert_eq!(c.classify(&page), Route::Navigation);

    assert_eq!(
      c.classify(&get("http://localhost:8080/data/feed")),
      Route::Dynamic(BucketKind::Dynamic)
    );
    assert_eq!(
      c.classify(&get("https://fonts.googleapis.com/css2?family=Poppins")),
      Route::Dynamic(BucketKind::Origin("google-fonts".to_string()))
    );
  }

  #[test]
  fn test_non_get_and_non_http_pass_through() {
    let c = classifier();
    let post = Request::new(Method::POST, "https://story-api.dicoding.dev/v1/stories").unwrap();
    assert_eq!(c.classify(&post), Route::Passthrough);
    assert_eq!(c.classify(&get("data:text/plain,hello")), Route::Passthrough);
  }
}
