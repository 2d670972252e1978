use color_eyre::{eyre::eyre, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
  #[serde(default)]
  pub api: ApiConfig,
  #[serde(default)]
  pub app: AppConfig,
  #[serde(default)]
  pub cache: CacheConfig,
  #[serde(default)]
  pub network: NetworkConfig,
  /// Database file (defaults to $XDG_DATA_HOME/storyshare/storyshare.db)
  pub database: Option<PathBuf>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ApiConfig {
  /// Backend base URL; its host decides which requests count as API calls
  #[serde(default = "default_api_url")]
  pub base_url: String,
}

impl Default for ApiConfig {
  fn default() -> Self {
    Self {
      base_url: default_api_url(),
    }
  }
}

fn default_api_url() -> String {
  "https://story-api.dicoding.dev/v1".to_string()
}

#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
  /// Origin the app shell is served from; relative manifest entries resolve against it
  #[serde(default = "default_origin")]
  pub origin: String,
  /// Page served to navigations that fail while offline
  #[serde(default = "default_offline_page")]
  pub offline_page: String,
}

impl Default for AppConfig {
  fn default() -> Self {
    Self {
      origin: default_origin(),
      offline_page: default_offline_page(),
    }
  }
}

fn default_origin() -> String {
  "http://localhost:8080".to_string()
}

fn default_offline_page() -> String {
  "/offline.html".to_string()
}

/// Limits for one named cache bucket.
#[derive(Debug, Clone, Copy, Default, Deserialize, PartialEq, Eq)]
pub struct BucketLimits {
  pub max_entries: Option<usize>,
  pub max_age_secs: Option<u64>,
}

impl BucketLimits {
  pub fn max_age(&self) -> Option<chrono::Duration> {
    self
      .max_age_secs
      .map(|secs| chrono::Duration::seconds(secs as i64))
  }
}

/// A group of third-party hosts that share their own bucket.
#[derive(Debug, Clone, Deserialize)]
pub struct OriginBucket {
  /// Suffix appended to the cache name, e.g. "google-fonts"
  pub name: String,
  pub hosts: Vec<String>,
  #[serde(flatten)]
  pub limits: BucketLimits,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CacheConfig {
  /// Base name (and version tag) for all buckets; bump it on deploy
  #[serde(default = "default_cache_name")]
  pub name: String,
  /// Resources precached on install and always served cache-first
  #[serde(default = "default_precache")]
  pub precache: Vec<String>,
  #[serde(default)]
  pub static_limits: BucketLimits,
  #[serde(default = "default_dynamic_limits")]
  pub dynamic: BucketLimits,
  #[serde(default = "default_image_limits")]
  pub images: BucketLimits,
  #[serde(default = "default_origins")]
  pub origins: Vec<OriginBucket>,
}

impl Default for CacheConfig {
  fn default() -> Self {
    Self {
      name: default_cache_name(),
      precache: default_precache(),
      static_limits: BucketLimits::default(),
      dynamic: default_dynamic_limits(),
      images: default_image_limits(),
      origins: default_origins(),
    }
  }
}

fn default_cache_name() -> String {
  "storyshare-v1".to_string()
}

fn default_precache() -> Vec<String> {
  [
    "/",
    "/index.html",
    "/app.bundle.js",
    "/manifest.json",
    "/offline.html",
    "https://unpkg.com/leaflet@1.9.4/dist/leaflet.css",
    "https://unpkg.com/leaflet@1.9.4/dist/leaflet.js",
  ]
  .iter()
  .map(|s| s.to_string())
  .collect()
}

fn default_dynamic_limits() -> BucketLimits {
  BucketLimits {
    max_entries: Some(30),
    max_age_secs: Some(60 * 60 * 6),
  }
}

fn default_image_limits() -> BucketLimits {
  BucketLimits {
    max_entries: Some(20),
    max_age_secs: Some(60 * 60 * 24 * 3),
  }
}

fn default_origins() -> Vec<OriginBucket> {
  vec![
    OriginBucket {
      name: "google-fonts".to_string(),
      hosts: vec![
        "fonts.googleapis.com".to_string(),
        "fonts.gstatic.com".to_string(),
      ],
      limits: BucketLimits {
        max_entries: Some(10),
        max_age_secs: Some(60 * 60 * 24 * 30),
      },
    },
    OriginBucket {
      name: "cdn".to_string(),
      hosts: vec!["cdnjs.cloudflare.com".to_string(), "unpkg.com".to_string()],
      limits: BucketLimits {
        max_entries: Some(15),
        max_age_secs: Some(60 * 60 * 24 * 7),
      },
    },
  ]
}

#[derive(Debug, Clone, Deserialize)]
pub struct NetworkConfig {
  /// Upper bound for any single network attempt
  #[serde(default = "default_timeout_secs")]
  pub timeout_secs: u64,
}

impl Default for NetworkConfig {
  fn default() -> Self {
    Self {
      timeout_secs: default_timeout_secs(),
    }
  }
}

fn default_timeout_secs() -> u64 {
  30
}

impl NetworkConfig {
  pub fn timeout(&self) -> Duration {
    Duration::from_secs(self.timeout_secs)
  }
}

impl Default for Config {
  fn default() -> Self {
    Self {
      api: ApiConfig::default(),
      app: AppConfig::default(),
      cache: CacheConfig::default(),
      network: NetworkConfig::default(),
      database: None,
    }
  }
}

impl Config {
  /// Load configuration from file.
  ///
  /// Search order:
  /// 1. Explicit path if provided
  /// 2. ./storyshare.yaml (current directory)
  /// 3. $XDG_CONFIG_HOME/storyshare/config.yaml
  ///
  /// Falls back to built-in defaults when no file is found.
  pub fn load(explicit_path: Option<&Path>) -> Result<Self> {
    let path = if let Some(p) = explicit_path {
      if p.exists() {
        Some(p.to_path_buf())
      } else {
        return Err(eyre!("Config file not found: {}", p.display()));
      }
    } else {
      Self::find_config_file()
    };

    match path {
      Some(p) => Self::load_from_path(&p),
      None => Ok(Self::default()),
    }
  }

  fn find_config_file() -> Option<PathBuf> {
    let local = PathBuf::from("storyshare.yaml");
    if local.exists() {
      return Some(local);
    }

    if let Some(config_dir) = dirs::config_dir() {
      let xdg_path = config_dir.join("storyshare").join("config.yaml");
      if xdg_path.exists() {
        return Some(xdg_path);
      }
    }

    None
  }

  fn load_from_path(path: &Path) -> Result<Self> {
    let contents = std::fs::read_to_string(path)
      .map_err(|e| eyre!("Failed to read config file {}: {}", path.display(), e))?;

    Self::from_yaml(&contents)
      .map_err(|e| eyre!("Failed to parse config file {}: {}", path.display(), e))
  }

  pub fn from_yaml(contents: &str) -> std::result::Result<Self, serde_yaml::Error> {
    serde_yaml::from_str(contents)
  }

  /// Directory for the database and log files.
  pub fn data_dir() -> Result<PathBuf> {
    let data_dir = dirs::data_dir()
      .or_else(|| dirs::home_dir().map(|p| p.join(".local/share")))
      .ok_or_else(|| eyre!("Could not determine data directory"))?;

    Ok(data_dir.join("storyshare"))
  }

  pub fn database_path(&self) -> Result<PathBuf> {
    match &self.database {
      Some(path) => Ok(path.clone()),
      None => Ok(Self::data_dir()?.join("storyshare.db")),
    }
  }

  /// Get the API bearer token from the environment, if one is set.
  ///
  /// Checks STORYSHARE_TOKEN.
  pub fn get_api_token() -> Option<String> {
    std::env::var("STORYSHARE_TOKEN")
      .ok()
      .filter(|t| !t.is_empty())
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_empty_yaml_uses_defaults() {
    let config = Config::from_yaml("{}").unwrap();
    assert_eq!(config.api.base_url, "https://story-api.dicoding.dev/v1");
    assert_eq!(config.cache.name, "storyshare-v1");
    assert_eq!(config.cache.images.max_entries, Some(20));
    assert_eq!(config.network.timeout(), Duration::from_secs(30));
  }

  #[test]
  fn test_partial_override() {
    let yaml = r#"
api:
  base_url: https://api.example.test/v2
cache:
  name: app-v7
  dynamic:
    max_entries: 5
  origins:
    - name: fonts
      hosts: [fonts.example.test]
      max_entries: 3
      max_age_secs: 60
network:
  timeout_secs: 4
"#;
    let config = Config::from_yaml(yaml).unwrap();
    assert_eq!(config.api.base_url, "https://api.example.test/v2");
    assert_eq!(config.cache.name, "app-v7");
    assert_eq!(config.cache.dynamic.max_entries, Some(5));
    assert_eq!(config.cache.dynamic.max_age_secs, None);
    assert_eq!(config.cache.origins.len(), 1);
    assert_eq!(config.cache.origins[0].limits.max_entries, Some(3));
    assert_eq!(config.network.timeout_secs, 4);
    // untouched sections keep defaults
    assert_eq!(config.app.offline_page, "/offline.html");
  }

  #[test]
  fn test_missing_explicit_path_is_an_error() {
    let err = Config::load(Some(Path::new("/nonexistent/storyshare.yaml"))).unwrap_err();
    assert!(err.to_string().contains("Config file not found"));
  }
}
