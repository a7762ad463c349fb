//! Wire contract for the `images` queue.
//!
//! A message body is a JSON object:
//!
//! ```text
//! {"image_id": "<uuid>", "original_path": "originals/<uuid>.png",
//!  "sizes": [{"width": 100, "height": 100}, ...]}
//! ```

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;
use uuid::Uuid;

/// Bounding boxes produced for every upload unless configured otherwise.
pub const DEFAULT_SIZES: [ThumbnailSize; 3] = [
  ThumbnailSize { width: 100, height: 100 },
  ThumbnailSize { width: 300, height: 300 },
  ThumbnailSize { width: 1200, height: 1200 },
];

pub const CONTENT_TYPE: &str = "application/json";

#[derive(Debug, Error)]
pub enum CodecError {
  #[error("malformed task payload: {0}")]
  Malformed(#[from] serde_json::Error),
  #[error("task payload has an empty original_path")]
  EmptyPath,
  #[error("task payload has no sizes")]
  NoSizes,
  #[error("task payload has a zero dimension: {0}")]
  ZeroDimension(ThumbnailSize),
  #[error("invalid size label '{0}', expected WxH")]
  BadLabel(String),
}

/// A `{width, height}` bounding box.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ThumbnailSize {
  pub width: u32,
  pub height: u32,
}

impl ThumbnailSize {
  pub const fn new(width: u32, height: u32) -> Self {
    Self { width, height }
  }

  /// Key used in the record's thumbnail map and in derivative file names.
  pub fn label(&self) -> String {
    format!("{}x{}", self.width, self.height)
  }
}

impl fmt::Display for ThumbnailSize {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "{}x{}", self.width, self.height)
  }
}

impl FromStr for ThumbnailSize {
  type Err = CodecError;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    let bad = || CodecError::BadLabel(s.to_string());
    let (w, h) = s.trim().split_once(['x', 'X']).ok_or_else(bad)?;
    let size = ThumbnailSize {
      width: w.trim().parse().map_err(|_| bad())?,
      height: h.trim().parse().map_err(|_| bad())?,
    };
    if size.width == 0 || size.height == 0 {
      return Err(CodecError::ZeroDimension(size));
    }
    Ok(size)
  }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskMessage {
  pub image_id: Uuid,
  /// Storage-root-relative when possible, absolute otherwise.
  pub original_path: String,
  pub sizes: Vec<ThumbnailSize>,
}

impl TaskMessage {
  pub fn new(image_id: Uuid, original_path: impl Into<String>, sizes: Vec<ThumbnailSize>) -> Self {
    Self {
      image_id,
      original_path: original_path.into(),
      sizes,
    }
  }

  pub fn encode(&self) -> Result<Vec<u8>, CodecError> {
    self.validate()?;
    Ok(serde_json::to_vec(self)?)
  }

  /// Parses and validates a body. Missing or mistyped fields are rejected,
  /// never coerced.
  pub fn decode(body: &[u8]) -> Result<Self, CodecError> {
    let task: TaskMessage = serde_json::from_slice(body)?;
    task.validate()?;
    Ok(task)
  }

  fn validate(&self) -> Result<(), CodecError> {
    if self.original_path.trim().is_empty() {
      return Err(CodecError::EmptyPath);
    }
    if self.sizes.is_empty() {
      return Err(CodecError::NoSizes);
    }
    if let Some(size) = self.sizes.iter().find(|s| s.width == 0 || s.height == 0) {
      return Err(CodecError::ZeroDimension(*size));
    }
    Ok(())
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use serde_json::json;
  use tokio_test::{assert_err, assert_ok};

  #[test]
  fn round_trip_preserves_fields_and_order() {
    let task = TaskMessage::new(
      Uuid::new_v4(),
      "originals/abc.png",
      vec![ThumbnailSize::new(300, 300), ThumbnailSize::new(100, 50)],
    );
    let body = assert_ok!(task.encode());
    let decoded = assert_ok!(TaskMessage::decode(&body));
    assert_eq!(decoded, task);
  }

  #[test]
  fn wire_format_uses_plain_keys() {
    let id = Uuid::new_v4();
    let task = TaskMessage::new(id, "originals/x.jpg", DEFAULT_SIZES.to_vec());
    let value: serde_json::Value = serde_json::from_slice(&task.encode().unwrap()).unwrap();
    assert_eq!(value["image_id"], json!(id.to_string()));
    assert_eq!(value["original_path"], json!("originals/x.jpg"));
    assert_eq!(value["sizes"][2], json!({"width": 1200, "height": 1200}));
  }

  #[test]
  fn decode_rejects_missing_fields() {
    let body = json!({"image_id": Uuid::new_v4(), "sizes": []}).to_string();
    assert!(matches!(TaskMessage::decode(body.as_bytes()), Err(CodecError::Malformed(_))));
  }

  #[test]
  fn decode_rejects_mistyped_dimensions() {
    let body = json!({
      "image_id": Uuid::new_v4(),
      "original_path": "originals/a.png",
      "sizes": [{"width": "100", "height": 100}],
    })
    .to_string();
    assert_err!(TaskMessage::decode(body.as_bytes()));
  }

  #[test]
  fn decode_rejects_empty_sizes_and_zero_boxes() {
    let id = Uuid::new_v4();
    let empty = json!({"image_id": id, "original_path": "a.png", "sizes": []}).to_string();
    assert!(matches!(TaskMessage::decode(empty.as_bytes()), Err(CodecError::NoSizes)));

    let zero = json!({
      "image_id": id,
      "original_path": "a.png",
      "sizes": [{"width": 0, "height": 10}],
    })
    .to_string();
    assert!(matches!(TaskMessage::decode(zero.as_bytes()), Err(CodecError::ZeroDimension(_))));
  }

  #[test]
  fn decode_rejects_non_uuid_id() {
    let body = json!({"image_id": "42", "original_path": "a.png", "sizes": [{"width": 1, "height": 1}]})
      .to_string();
    assert_err!(TaskMessage::decode(body.as_bytes()));
  }

  #[test]
  fn size_labels_parse() {
    assert_eq!("300x200".parse::<ThumbnailSize>().unwrap(), ThumbnailSize::new(300, 200));
    assert_eq!(ThumbnailSize::new(1200, 1200).label(), "1200x1200");
    assert_err!("300".parse::<ThumbnailSize>());
    assert_err!("0x10".parse::<ThumbnailSize>());
    assert_err!("ax10".parse::<ThumbnailSize>());
  }
}
