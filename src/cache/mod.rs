//! Named response-cache buckets for offline support.
//!
//! This module provides:
//! - Buckets keyed by request URL, persisted alongside the record store
//! - Per-bucket entry caps and max age, evicting oldest entries first
//! - Bucket naming scoped by a versioned base name, so a deploy can drop
//!   every bucket from the previous version

mod source;
mod storage;

pub use source::{CacheSource, Served};
pub use storage::{Bucket, CacheStorage, CachedResponse};

use crate::config::CacheConfig;

/// Purpose of a bucket; decides its name suffix.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BucketKind {
  Static,
  Dynamic,
  Images,
  /// Third-party origin group, by configured name
  Origin(String),
}

impl BucketKind {
  /// Full bucket name under the configured base name.
  pub fn bucket_name(&self, base: &str) -> String {
    match self {
      BucketKind::Static => format!("{}-static", base),
      BucketKind::Dynamic => format!("{}-dynamic", base),
      BucketKind::Images => format!("{}-images", base),
      BucketKind::Origin(name) => format!("{}-{}", base, name),
    }
  }
}

/// Names of every bucket the current configuration uses.
pub fn active_bucket_names(config: &CacheConfig) -> Vec<String> {
  let mut names = vec![
    BucketKind::Static.bucket_name(&config.name),
    BucketKind::Dynamic.bucket_name(&config.name),
    BucketKind::Images.bucket_name(&config.name),
  ];
  names.extend(
    config
      .origins
      .iter()
      .map(|o| BucketKind::Origin(o.name.clone()).bucket_name(&config.name)),
  );
  names
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_active_names_follow_version_tag() {
    let config = CacheConfig {
      name: "storyshare-v2".to_string(),
      ..CacheConfig::default()
    };
    let names = active_bucket_names(&config);
    assert!(names.contains(&"storyshare-v2-static".to_string()));
    assert!(names.contains(&"storyshare-v2-images".to_string()));
    assert!(names.contains(&"storyshare-v2-google-fonts".to_string()));
    assert!(names.iter().all(|n| n.starts_with("storyshare-v2-")));
  }
}
