//! Domain entities and write payloads.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;

use crate::error::{Error, Result};

/// Geographic coordinates of a restaurant.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LatLng {
  pub lat: f64,
  pub lng: f64,
}

/// A restaurant as served by the remote data service.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Restaurant {
  pub id: i64,
  pub name: String,
  pub cuisine_type: String,
  pub neighborhood: String,
  pub address: String,
  pub latlng: LatLng,
  /// Day name -> opening hours, e.g. "Monday" -> "11:00 am - 5:00 pm"
  #[serde(default)]
  pub operating_hours: BTreeMap<String, String>,
  /// Photograph reference; some records ship without one.
  #[serde(default)]
  pub photograph: Option<String>,
  #[serde(default)]
  pub is_favorite: bool,
}

/// A server-confirmed review. The id and timestamp are server-assigned.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Review {
  pub id: i64,
  pub restaurant_id: i64,
  pub name: String,
  /// Integer rating, 1 to 5.
  pub rating: u8,
  pub comments: String,
  #[serde(rename = "createdAt")]
  pub created_at: DateTime<Utc>,
}

/// A review submission before the server has confirmed it. No id yet.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReviewDraft {
  pub restaurant_id: i64,
  pub name: String,
  pub rating: u8,
  pub comments: String,
}

impl ReviewDraft {
  /// Validate the payload. Runs before any network or storage interaction.
  pub fn validate(&self) -> Result<()> {
    if self.name.trim().is_empty() {
      return Err(Error::validation("name", "this field cannot be empty"));
    }
    if self.comments.trim().is_empty() {
      return Err(Error::validation("comments", "this field cannot be empty"));
    }
    if !(1..=5).contains(&self.rating) {
      return Err(Error::validation("rating", "rating must be between 1 and 5"));
    }
    Ok(())
  }
}

/// A draft waiting in the pending-write queue, tagged with a local
/// correlation id so a later confirmation can be matched back to it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PendingReview {
  pub correlation_id: String,
  pub draft: ReviewDraft,
  pub queued_at: DateTime<Utc>,
}

impl PendingReview {
  /// Wrap a draft for queueing, stamping it with the queue time and a
  /// correlation id derived from the content and that timestamp.
  pub fn new(draft: ReviewDraft) -> Self {
    let queued_at = Utc::now();
    let correlation_id = correlation_id(&draft, queued_at);
    Self {
      correlation_id,
      draft,
      queued_at,
    }
  }
}

/// SHA256 hex digest over the draft fields and queue timestamp.
fn correlation_id(draft: &ReviewDraft, queued_at: DateTime<Utc>) -> String {
  let mut hasher = Sha256::new();
  hasher.update(draft.restaurant_id.to_le_bytes());
  hasher.update(draft.name.as_bytes());
  hasher.update([draft.rating]);
  hasher.update(draft.comments.as_bytes());
  hasher.update(queued_at.timestamp_nanos_opt().unwrap_or_default().to_le_bytes());
  hex::encode(hasher.finalize())
}
