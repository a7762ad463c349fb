use serde::{Serialize, Deserialize};
use uuid::Uuid;
use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

/// Size label (`"100x100"`) to storage-relative derivative path.
pub type ThumbnailMap = BTreeMap<String, String>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ImageStatus {
  New,
  Processing,
  Done,
  Error,
}

impl ImageStatus {
  pub const fn as_str(&self) -> &'static str {
    match self {
      ImageStatus::New => "NEW",
      ImageStatus::Processing => "PROCESSING",
      ImageStatus::Done => "DONE",
      ImageStatus::Error => "ERROR",
    }
  }

  pub const fn is_terminal(&self) -> bool {
    matches!(self, ImageStatus::Done | ImageStatus::Error)
  }
}

impl fmt::Display for ImageStatus {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.as_str())
  }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown image status '{0}'")]
pub struct UnknownStatus(pub String);

impl FromStr for ImageStatus {
  type Err = UnknownStatus;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    match s {
      "NEW" => Ok(ImageStatus::New),
      "PROCESSING" => Ok(ImageStatus::Processing),
      "DONE" => Ok(ImageStatus::Done),
      "ERROR" => Ok(ImageStatus::Error),
      other => Err(UnknownStatus(other.to_string())),
    }
  }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageRecord {
  pub id: Uuid,
  pub status: ImageStatus,
  /// Storage-relative path of the uploaded original.
  pub original_path: String,
  /// Empty unless `status` is `DONE`.
  pub thumbnails: ThumbnailMap,
  pub created_at: DateTime<Utc>,
  pub updated_at: DateTime<Utc>,
}

/// Returned to the uploader once the original is stored and the task queued.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UploadReceipt {
  pub image_id: Uuid,
  pub task_id: Uuid,
  pub status: ImageStatus,
}
