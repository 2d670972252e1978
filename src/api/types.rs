//! Story domain types and the Story API wire format.

use base64::{engine::general_purpose::STANDARD, Engine};
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::http::FormPart;

/// A story as returned by the list and detail endpoints.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Story {
  pub id: String,
  pub name: String,
  pub description: String,
  pub photo_url: String,
  pub created_at: String,
  #[serde(default)]
  pub lat: Option<f64>,
  #[serde(default)]
  pub lon: Option<f64>,
}

// ============================================================================
// Response envelopes
// ============================================================================

/// Fields every Story API response carries; checked before the body is
/// decoded into its envelope.
#[derive(Debug, Clone, Deserialize)]
pub struct ApiMessage {
  #[serde(default)]
  pub error: bool,
  #[serde(default)]
  pub message: String,
}

#[derive(Debug, Deserialize)]
pub struct ApiListResponse {
  #[serde(rename = "listStory", default)]
  pub list_story: Vec<Story>,
}

#[derive(Debug, Deserialize)]
pub struct ApiDetailResponse {
  pub story: Option<Story>,
}

// ============================================================================
// Submissions
// ============================================================================

/// Binary photo carried inside a queued operation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Photo {
  pub file_name: String,
  pub mime: String,
  #[serde(serialize_with = "to_base64", deserialize_with = "from_base64")]
  pub bytes: Vec<u8>,
}

fn to_base64<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
  serializer.serialize_str(&STANDARD.encode(bytes))
}

fn from_base64<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
  let encoded = String::deserialize(deserializer)?;
  STANDARD
    .decode(encoded.as_bytes())
    .map_err(serde::de::Error::custom)
}

/// A new story as submitted by the add-story form.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StorySubmission {
  pub description: String,
  pub photo: Photo,
  pub lat: Option<f64>,
  pub lon: Option<f64>,
}

/// What the UI shows for a submission still waiting in the queue.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoryPreview {
  pub description: String,
  pub photo_name: String,
  pub photo_size: usize,
  pub lat: Option<f64>,
  pub lon: Option<f64>,
}

impl StorySubmission {
  pub fn preview(&self) -> StoryPreview {
    StoryPreview {
      description: self.description.clone(),
      photo_name: self.photo.file_name.clone(),
      photo_size: self.photo.bytes.len(),
      lat: self.lat,
      lon: self.lon,
    }
  }

  /// Multipart fields expected by `POST /stories`.
  pub fn form_parts(&self) -> Vec<FormPart> {
    let mut parts = vec![
      FormPart::Text {
        name: "description".to_string(),
        value: self.description.clone(),
      },
      FormPart::File {
        name: "photo".to_string(),
        file_name: self.photo.file_name.clone(),
        mime: self.photo.mime.clone(),
        bytes: self.photo.bytes.clone(),
      },
    ];
    if let (Some(lat), Some(lon)) = (self.lat, self.lon) {
      parts.push(FormPart::Text {
        name: "lat".to_string(),
        value: lat.to_string(),
      });
      parts.push(FormPart::Text {
        name: "lon".to_string(),
        value: lon.to_string(),
      });
    }
    parts
  }
}

/// Outcome of submitting a story.
#[derive(Debug, Clone, PartialEq)]
pub enum Submission {
  /// Accepted by the backend
  Sent { message: String },
  /// Saved locally, will sync later
  Queued { operation_id: i64 },
}
