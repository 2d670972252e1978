//! Story API client and the offline-aware repository in front of it.

mod client;
mod repository;
mod types;

pub use client::{StoryApi, IDEMPOTENCY_HEADER};
pub use repository::StoryRepository;
pub use types::{Photo, Story, StoryPreview, StorySubmission, Submission};
