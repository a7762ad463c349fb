//! Thumbnail generation.
//!
//! Sources are decoded once, normalised to 8-bit RGB, scaled down to fit each
//! bounding box (aspect ratio kept, never upscaled, never cropped) and written
//! as JPEG. Output for a given source and box is byte-for-byte reproducible.
//!
//! Everything here is blocking; async callers go through [`Transformer::run`],
//! which moves the work onto the blocking pool.

use image::imageops::{self, FilterType};
use image::{ImageError, ImageReader, RgbImage};
use jpeg_encoder::{ColorType, EncodingError};
use std::fs::{self, File};
use std::io::{self, BufWriter, Cursor, Write};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::debug;
use uuid::Uuid;

use crate::storage::StorageLayout;
use crate::task::ThumbnailSize;

pub const JPEG_QUALITY: u8 = 85;

#[derive(Debug, Error)]
pub enum TransformError {
  #[error("cannot read source {path}: {source}")]
  SourceUnreadable { path: PathBuf, source: io::Error },
  #[error("cannot decode source image: {0}")]
  Decode(#[source] ImageError),
  #[error("cannot encode {size} derivative: {source}")]
  Encode { size: ThumbnailSize, source: EncodingError },
  #[error("{width}x{height} exceeds the JPEG dimension limit")]
  Oversize { width: u32, height: u32 },
  #[error("cannot write derivative {path}: {source}")]
  Write { path: PathBuf, source: io::Error },
  #[error("transformation aborted: {0}")]
  Aborted(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Derivative {
  pub size: ThumbnailSize,
  pub path: PathBuf,
  pub width: u32,
  pub height: u32,
}

/// Largest dimensions with the source's aspect ratio that fit inside `bbox`.
/// Sources already inside the box keep their size.
pub fn fit_within(width: u32, height: u32, bbox: ThumbnailSize) -> (u32, u32) {
  if width <= bbox.width && height <= bbox.height {
    return (width, height);
  }
  let scale = f64::min(
    bbox.width as f64 / width as f64,
    bbox.height as f64 / height as f64,
  );
  let w = ((width as f64 * scale).round() as u32).clamp(1, bbox.width);
  let h = ((height as f64 * scale).round() as u32).clamp(1, bbox.height);
  (w, h)
}

/// Decodes any supported raster format into RGB without alpha.
pub fn decode_rgb(bytes: &[u8]) -> Result<RgbImage, TransformError> {
  let img = ImageReader::new(Cursor::new(bytes))
    .with_guessed_format()
    .map_err(|e| TransformError::Decode(ImageError::IoError(e)))?
    .decode()
    .map_err(TransformError::Decode)?;
  Ok(img.into_rgb8())
}

/// Baseline JPEG of `img`, with Huffman tables built from the image itself when
/// `optimize` is set.
pub fn encode_jpeg<W: Write>(out: W, img: &RgbImage, quality: u8, optimize: bool) -> Result<(), TransformError> {
  let (width, height) = img.dimensions();
  let (Ok(w), Ok(h)) = (u16::try_from(width), u16::try_from(height)) else {
    return Err(TransformError::Oversize { width, height });
  };
  let mut encoder = jpeg_encoder::Encoder::new(out, quality);
  encoder.set_optimized_huffman_tables(optimize);
  encoder
    .encode(img.as_raw(), w, h, ColorType::Rgb)
    .map_err(|source| TransformError::Encode {
      size: ThumbnailSize::new(width, height),
      source,
    })
}

#[derive(Debug, Clone)]
pub struct Transformer {
  layout: StorageLayout,
  quality: u8,
}

impl Transformer {
  pub fn new(layout: StorageLayout) -> Self {
    Self {
      layout,
      quality: JPEG_QUALITY,
    }
  }

  /// Produces one derivative of `source` at the deterministic path for
  /// (`image_id`, `size`).
  pub fn render(&self, source: &RgbImage, image_id: Uuid, size: ThumbnailSize) -> Result<Derivative, TransformError> {
    let (width, height) = fit_within(source.width(), source.height(), size);
    let path = self.layout.thumbnail_path(image_id, size);

    if (width, height) == source.dimensions() {
      self.write_jpeg(source, &path)?;
    } else {
      let resized = imageops::resize(source, width, height, FilterType::Lanczos3);
      self.write_jpeg(&resized, &path)?;
    }

    debug!(image_id = %image_id, size = %size, width, height, "derivative written");
    Ok(Derivative {
      size,
      path,
      width,
      height,
    })
  }

  /// `render` for raw source bytes.
  #[cfg(test)]
  pub fn render_bytes(&self, bytes: &[u8], image_id: Uuid, size: ThumbnailSize) -> Result<Derivative, TransformError> {
    let source = decode_rgb(bytes)?;
    self.render(&source, image_id, size)
  }

  /// Reads `source_path` and renders every size in order. The first failure
  /// stops the run; derivatives already written are left where they are.
  pub async fn run(
    &self,
    source_path: PathBuf,
    image_id: Uuid,
    sizes: Vec<ThumbnailSize>,
  ) -> Result<Vec<Derivative>, TransformError> {
    let engine = self.clone();
    tokio::task::spawn_blocking(move || -> Result<Vec<Derivative>, TransformError> {
      let bytes = fs::read(&source_path).map_err(|source| TransformError::SourceUnreadable {
        path: source_path.clone(),
        source,
      })?;
      let source = decode_rgb(&bytes)?;
      drop(bytes);
      sizes
        .into_iter()
        .map(|size| engine.render(&source, image_id, size))
        .collect()
    })
    .await
    .map_err(|e| TransformError::Aborted(e.to_string()))?
  }

  /// Encodes next to `path` and renames into place so a reader never sees a
  /// half-written derivative.
  fn write_jpeg(&self, img: &RgbImage, path: &Path) -> Result<(), TransformError> {
    let write_err = |source: io::Error| TransformError::Write {
      path: path.to_path_buf(),
      source,
    };
    if let Some(dir) = path.parent() {
      fs::create_dir_all(dir).map_err(write_err)?;
    }
    let tmp = path.with_extension("jpg.part");
    let file = File::create(&tmp).map_err(write_err)?;
    let mut out = BufWriter::new(file);
    encode_jpeg(&mut out, img, self.quality, true)?;
    out.flush().map_err(write_err)?;
    drop(out);
    fs::rename(&tmp, path).map_err(write_err)
  }
}
