use std::path::{Component, Path, PathBuf};
use uuid::Uuid;

use crate::task::ThumbnailSize;

pub const ORIGINALS_DIR: &str = "originals";
pub const THUMBNAILS_DIR: &str = "thumbnails";
pub const DERIVATIVE_EXT: &str = "jpg";

/// Maps image identifiers to locations under the storage root.
///
/// Path construction only; nothing here touches the filesystem.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StorageLayout {
  root: PathBuf,
}

impl StorageLayout {
  pub fn new(root: impl Into<PathBuf>) -> Self {
    Self { root: root.into() }
  }

  pub fn root(&self) -> &Path {
    &self.root
  }

  pub fn originals_dir(&self) -> PathBuf {
    self.root.join(ORIGINALS_DIR)
  }

  /// `{root}/originals/{id}{ext}`, where `ext` includes the leading dot.
  pub fn original_path(&self, image_id: Uuid, ext: &str) -> PathBuf {
    self.originals_dir().join(format!("{image_id}{ext}"))
  }

  pub fn thumbnail_dir(&self, image_id: Uuid) -> PathBuf {
    self.root.join(THUMBNAILS_DIR).join(image_id.to_string())
  }

  /// `{root}/thumbnails/{id}/{W}x{H}.jpg`
  pub fn thumbnail_path(&self, image_id: Uuid, size: ThumbnailSize) -> PathBuf {
    self
      .thumbnail_dir(image_id)
      .join(format!("{}.{}", size.label(), DERIVATIVE_EXT))
  }

  /// Root-relative form of `path`, used in messages and records so they stay
  /// valid on hosts that mount the storage root elsewhere. Falls back to the
  /// path as given when it is not under the root.
  pub fn to_relative(&self, path: &Path) -> String {
    match path.strip_prefix(&self.root) {
      Ok(rel) if !rel.as_os_str().is_empty() => rel.to_string_lossy().into_owned(),
      _ => path.to_string_lossy().into_owned(),
    }
  }

  /// Absolute paths are returned unchanged; relative ones are joined onto the
  /// root. `.` segments are dropped and `..` is resolved lexically.
  pub fn resolve(&self, stored: &str) -> PathBuf {
    let candidate = Path::new(stored);
    let joined = if candidate.is_absolute() {
      candidate.to_path_buf()
    } else {
      self.root.join(candidate)
    };
    normalize(&joined)
  }
}

fn normalize(path: &Path) -> PathBuf {
  let mut out = PathBuf::new();
  for component in path.components() {
    match component {
      Component::CurDir => {}
      Component::ParentDir => {
        if !out.pop() {
          out.push(component);
        }
      }
      other => out.push(other),
    }
  }
  out
}
