use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Notification shown for a push message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Notification {
  pub title: String,
  pub body: String,
  pub icon: String,
  pub badge: String,
  pub tag: String,
  pub url: String,
}

impl Default for Notification {
  fn default() -> Self {
    Self {
      title: "StoryShare".to_string(),
      body: "You have a new notification".to_string(),
      icon: "/icons/icon-192x192.png".to_string(),
      badge: "/icons/icon-72x72.png".to_string(),
      tag: "storyshare-notification".to_string(),
      url: "/".to_string(),
    }
  }
}

impl Notification {
  /// Build from a push payload. A JSON object is merged over the defaults;
  /// anything else becomes the body.
  pub fn from_push(payload: Option<&str>) -> Self {
    let mut notification = Self::default();
    let Some(payload) = payload.map(str::trim).filter(|p| !p.is_empty()) else {
      return notification;
    };

    match serde_json::from_str::<Value>(payload) {
      Ok(Value::Object(fields)) => {
        let mut merged = match serde_json::to_value(&notification) {
          Ok(Value::Object(defaults)) => defaults,
          _ => serde_json::Map::new(),
        };
        for (key, value) in fields {
          // Only string fields override; `data.url` is accepted as the url
          match (key.as_str(), value) {
            ("data", Value::Object(data)) => {
              if let Some(Value::String(url)) = data.get("url") {
                merged.insert("url".to_string(), Value::String(url.clone()));
              }
            }
            (_, value @ Value::String(_)) => {
              merged.insert(key, value);
            }
            _ => {}
          }
        }
        if let Ok(parsed) = serde_json::from_value(Value::Object(merged)) {
          notification = parsed;
        }
      }
      _ => notification.body = payload.to_string(),
    }
    notification
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_no_payload_uses_defaults() {
    assert_eq!(Notification::from_push(None), Notification::default());
    assert_eq!(Notification::from_push(Some("  ")), Notification::default());
  }

  #[test]
  fn test_json_payload_merges_over_defaults() {
    let n = Notification::from_push(Some(
      r#"{"title":"New story","body":"Dimas posted","data":{"url":"/#/stories/1"},"extra":3}"#,
    ));
    assert_eq!(n.title, "New story");
    assert_eq!(n.body, "Dimas posted");
    assert_eq!(n.url, "/#/stories/1");
    assert_eq!(n.tag, "storyshare-notification");
  }

  #[test]
  fn test_text_payload_becomes_body() {
    let n = Notification::from_push(Some("hello there"));
    assert_eq!(n.body, "hello there");
    assert_eq!(n.title, "StoryShare");

    // a JSON scalar is still just text
    let n = Notification::from_push(Some("42"));
    assert_eq!(n.body, "42");
  }
}
