//! Streams untrusted uploads into `{root}/originals` under a hard size cap.
//!
//! Checks run in order and the first failure wins: non-empty filename,
//! allowed extension, size cap while copying, then a full decode of what was
//! written. Any failure after the file was created removes it.

use image::{ImageFormat, ImageReader};
use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tokio::fs::{self, File};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::storage::StorageLayout;

pub const MAX_UPLOAD_BYTES: u64 = 5 * 1024 * 1024;
pub const CHUNK_SIZE: usize = 1024 * 1024;
pub const ALLOWED_EXTENSIONS: [&str; 5] = [".jpg", ".jpeg", ".png", ".gif", ".webp"];
const SUPPORTED_FORMATS: [ImageFormat; 4] = [
  ImageFormat::Jpeg,
  ImageFormat::Png,
  ImageFormat::Gif,
  ImageFormat::WebP,
];

#[derive(Debug, Error)]
pub enum UploadError {
  #[error("empty file name")]
  EmptyFilename,
  #[error("unsupported file type '{0}'")]
  UnsupportedType(String),
  #[error("file exceeds the {limit} byte limit")]
  TooLarge { limit: u64 },
  #[error("file is not a valid image: {0}")]
  InvalidContent(String),
  #[error("storage I/O failed: {0}")]
  Io(#[from] io::Error),
}

#[derive(Debug, Clone)]
pub struct StoredOriginal {
  pub image_id: Uuid,
  pub path: PathBuf,
  pub size: u64,
  /// Format detected from the bytes, independent of the extension.
  pub format: ImageFormat,
}

/// Lower-cased extension (with the dot) if `filename` may be uploaded.
pub fn allowed_extension(filename: &str) -> Result<String, UploadError> {
  if filename.trim().is_empty() {
    return Err(UploadError::EmptyFilename);
  }
  let ext = Path::new(filename)
    .extension()
    .map(|e| format!(".{}", e.to_string_lossy().to_lowercase()))
    .unwrap_or_default();
  if ALLOWED_EXTENSIONS.contains(&ext.as_str()) {
    Ok(ext)
  } else {
    Err(UploadError::UnsupportedType(ext))
  }
}

#[derive(Debug, Clone)]
pub struct UploadWriter {
  layout: StorageLayout,
  max_bytes: u64,
}

impl UploadWriter {
  pub fn new(layout: StorageLayout, max_bytes: u64) -> Self {
    Self { layout, max_bytes }
  }

  pub fn layout(&self) -> &StorageLayout {
    &self.layout
  }

  pub async fn store<R>(&self, filename: &str, source: R) -> Result<StoredOriginal, UploadError>
  where
    R: AsyncRead + Unpin,
  {
    let ext = allowed_extension(filename)?;

    fs::create_dir_all(self.layout.originals_dir()).await?;
    let image_id = Uuid::new_v4();
    let path = self.layout.original_path(image_id, &ext);

    let size = match self.copy_bounded(source, &path).await {
      Ok(size) => size,
      Err(e) => {
        discard(&path).await;
        return Err(e);
      }
    };

    let format = match verify_image(path.clone()).await {
      Ok(format) => format,
      Err(e) => {
        discard(&path).await;
        return Err(e);
      }
    };

    info!(image_id = %image_id, bytes = size, format = ?format, "original stored");
    Ok(StoredOriginal {
      image_id,
      path,
      size,
      format,
    })
  }

  async fn copy_bounded<R>(&self, mut source: R, path: &Path) -> Result<u64, UploadError>
  where
    R: AsyncRead + Unpin,
  {
    let mut file = File::create(path).await?;
    let mut buf = vec![0u8; CHUNK_SIZE];
    let mut written: u64 = 0;
    loop {
      let n = read_chunk(&mut source, &mut buf).await?;
      if n == 0 {
        break;
      }
      written += n as u64;
      if written > self.max_bytes {
        debug!(path = %path.display(), written, "upload over limit, aborting");
        return Err(UploadError::TooLarge {
          limit: self.max_bytes,
        });
      }
      file.write_all(&buf[..n]).await?;
    }
    file.flush().await?;
    Ok(written)
  }
}

/// Fills `buf` unless the source ends first.
async fn read_chunk<R>(source: &mut R, buf: &mut [u8]) -> io::Result<usize>
where
  R: AsyncRead + Unpin,
{
  let mut filled = 0;
  while filled < buf.len() {
    let n = source.read(&mut buf[filled..]).await?;
    if n == 0 {
      break;
    }
    filled += n;
  }
  Ok(filled)
}

async fn verify_image(path: PathBuf) -> Result<ImageFormat, UploadError> {
  tokio::task::spawn_blocking(move || -> Result<ImageFormat, UploadError> {
    let reader = ImageReader::open(&path)?.with_guessed_format()?;
    let format = reader
      .format()
      .filter(|f| SUPPORTED_FORMATS.contains(f))
      .ok_or_else(|| UploadError::InvalidContent("unrecognised image format".into()))?;
    reader
      .decode()
      .map_err(|e| UploadError::InvalidContent(e.to_string()))?;
    Ok(format)
  })
  .await
  .map_err(|e| UploadError::Io(io::Error::other(e)))?
}

async fn discard(path: &Path) {
  match fs::remove_file(path).await {
    Ok(()) => debug!(path = %path.display(), "partial upload removed"),
    Err(e) if e.kind() == io::ErrorKind::NotFound => {}
    Err(e) => warn!(path = %path.display(), error = %e, "failed to remove partial upload"),
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::test_support::encode_image;
  use tempfile::TempDir;
  use tokio_test::assert_ok;

  fn writer(dir: &TempDir) -> UploadWriter {
    UploadWriter::new(StorageLayout::new(dir.path()), MAX_UPLOAD_BYTES)
  }

  fn originals(dir: &TempDir) -> Vec<PathBuf> {
    match std::fs::read_dir(dir.path().join("originals")) {
      Ok(entries) => entries.map(|e| e.unwrap().path()).collect(),
      Err(_) => vec![],
    }
  }

  #[test]
  fn extension_rules() {
    assert_eq!(allowed_extension("cat.JPG").unwrap(), ".jpg");
    assert_eq!(allowed_extension("a.b.webp").unwrap(), ".webp");
    assert!(matches!(allowed_extension(""), Err(UploadError::EmptyFilename)));
    assert!(matches!(allowed_extension("  "), Err(UploadError::EmptyFilename)));
    assert!(matches!(allowed_extension("doc.pdf"), Err(UploadError::UnsupportedType(_))));
    assert!(matches!(allowed_extension("noext"), Err(UploadError::UnsupportedType(_))));
    assert!(matches!(allowed_extension(".png"), Err(UploadError::UnsupportedType(_))));
  }

  #[tokio::test]
  async fn stores_valid_png() {
    let dir = TempDir::new().unwrap();
    let bytes = encode_image(40, 20, ImageFormat::Png);
    let stored = assert_ok!(writer(&dir).store("pic.PNG", bytes.as_slice()).await);

    assert_eq!(stored.format, ImageFormat::Png);
    assert_eq!(stored.size, bytes.len() as u64);
    assert_eq!(stored.path, dir.path().join(format!("originals/{}.png", stored.image_id)));
    assert_eq!(std::fs::read(&stored.path).unwrap(), bytes);
  }

  #[tokio::test]
  async fn sniffs_content_not_extension() {
    let dir = TempDir::new().unwrap();
    let png = encode_image(8, 8, ImageFormat::Png);
    let stored = assert_ok!(writer(&dir).store("really-a-png.jpg", png.as_slice()).await);
    assert_eq!(stored.format, ImageFormat::Png);
  }

  #[tokio::test]
  async fn unsupported_extension_writes_nothing() {
    let dir = TempDir::new().unwrap();
    let png = encode_image(8, 8, ImageFormat::Png);
    let err = writer(&dir).store("image.bmp", png.as_slice()).await.unwrap_err();
    assert!(matches!(err, UploadError::UnsupportedType(ext) if ext == ".bmp"));
    assert!(!dir.path().join("originals").exists());
  }

  #[tokio::test]
  async fn oversized_upload_leaves_no_file() {
    let dir = TempDir::new().unwrap();
    let big = vec![0u8; 6 * 1024 * 1024];
    let err = writer(&dir).store("huge.png", big.as_slice()).await.unwrap_err();
    assert!(matches!(err, UploadError::TooLarge { limit } if limit == MAX_UPLOAD_BYTES));
    assert!(originals(&dir).is_empty());
  }

  #[tokio::test]
  async fn cap_is_inclusive() {
    let dir = TempDir::new().unwrap();
    let png = encode_image(16, 16, ImageFormat::Png);
    let exact = UploadWriter::new(StorageLayout::new(dir.path()), png.len() as u64);
    assert_ok!(exact.store("a.png", png.as_slice()).await);

    let under = UploadWriter::new(StorageLayout::new(dir.path()), png.len() as u64 - 1);
    assert!(matches!(
      under.store("b.png", png.as_slice()).await,
      Err(UploadError::TooLarge { .. })
    ));
    assert_eq!(originals(&dir).len(), 1);
  }

  #[tokio::test]
  async fn text_renamed_to_jpg_is_invalid_content() {
    let dir = TempDir::new().unwrap();
    let text = b"definitely not an image, just some words\n".repeat(10);
    let err = writer(&dir).store("notes.jpg", text.as_slice()).await.unwrap_err();
    assert!(matches!(err, UploadError::InvalidContent(_)));
    assert!(originals(&dir).is_empty());
  }

  #[tokio::test]
  async fn truncated_image_is_invalid_content() {
    let dir = TempDir::new().unwrap();
    let png = encode_image(64, 64, ImageFormat::Png);
    let err = writer(&dir)
      .store("cut.png", &png[..png.len() / 3])
      .await
      .unwrap_err();
    assert!(matches!(err, UploadError::InvalidContent(_)));
    assert!(originals(&dir).is_empty());
  }

  #[tokio::test]
  async fn each_upload_gets_a_fresh_id() {
    let dir = TempDir::new().unwrap();
    let png = encode_image(4, 4, ImageFormat::Png);
    let a = writer(&dir).store("a.png", png.as_slice()).await.unwrap();
    let b = writer(&dir).store("a.png", png.as_slice()).await.unwrap();
    assert_ne!(a.image_id, b.image_id);
    assert_eq!(originals(&dir).len(), 2);
  }
}
