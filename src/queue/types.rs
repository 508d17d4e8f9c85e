use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Everything needed to replay a mood-tracking write.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MoodPayload {
  /// 1-10 mood score
  pub score: u8,
  pub emotions: Vec<String>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub notes: Option<String>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub activity: Option<String>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub location: Option<String>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub weather: Option<String>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub user_id: Option<String>,
}

impl MoodPayload {
  pub fn new(score: u8, emotions: &[&str]) -> Self {
    Self {
      score,
      emotions: emotions.iter().map(|e| e.to_string()).collect(),
      notes: None,
      activity: None,
      location: None,
      weather: None,
      user_id: None,
    }
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntryStatus {
  /// Visible to replay
  Pending,
  /// Accepted by the server but not yet removed locally
  Synced,
}

impl EntryStatus {
  pub fn as_str(self) -> &'static str {
    match self {
      Self::Pending => "pending",
      Self::Synced => "synced",
    }
  }

  pub fn parse(s: &str) -> Option<Self> {
    match s {
      "pending" => Some(Self::Pending),
      "synced" => Some(Self::Synced),
      _ => None,
    }
  }
}

/// A write that failed for lack of connectivity, waiting for replay.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MutationEntry {
  /// Unique and monotonic: creation order is id order
  pub id: i64,
  pub payload: MoodPayload,
  pub created_at: DateTime<Utc>,
  /// Token captured when the write was made
  pub auth_token: Option<String>,
  pub status: EntryStatus,
}
