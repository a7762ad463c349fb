use image::{DynamicImage, ImageFormat, Rgb, RgbImage};
use std::io::Cursor;

/// Encoded solid-colour image for fixtures.
pub fn encode_image(width: u32, height: u32, format: ImageFormat) -> Vec<u8> {
  let img = DynamicImage::ImageRgb8(RgbImage::from_pixel(width, height, Rgb([180, 40, 90])));
  let mut bytes = Vec::new();
  img
    .write_to(&mut Cursor::new(&mut bytes), format)
    .expect("encode fixture image");
  bytes
}
