//! Image utility functions

use image::codecs::jpeg::JpegEncoder;
use image::{DynamicImage, RgbImage};
use anyhow::Result;

/// Encode an RGB frame as JPEG
pub fn encode_jpeg(image: &RgbImage, quality: u8) -> Result<Vec<u8>> {
    let mut buffer = Vec::new();
    let encoder = JpegEncoder::new_with_quality(&mut buffer, quality.clamp(1, 100));
    image.write_with_encoder(encoder)?;
    Ok(buffer)
}

/// Encode any decoded image as JPEG
pub fn encode_dynamic_jpeg(image: &DynamicImage, quality: u8) -> Result<Vec<u8>> {
    encode_jpeg(&image.to_rgb8(), quality)
}
