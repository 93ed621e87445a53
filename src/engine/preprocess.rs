//! Image preprocessing for the face models

use image::{imageops, DynamicImage, GenericImageView, ImageBuffer, Rgb};
use ndarray::Array4;
use anyhow::{Context, Result};

/// Input size of the SCRFD detector
pub const DETECTOR_INPUT_SIZE: (u32, u32) = (640, 640);

/// Input size of the InsightFace gender/age model
pub const ATTRIBUTE_INPUT_SIZE: (u32, u32) = (96, 96);

/// Letterbox the image to the detector input and convert it to a
/// normalized NCHW tensor.
pub fn preprocess_for_detection(image: &DynamicImage) -> Array4<f32> {
    let (target_w, target_h) = DETECTOR_INPUT_SIZE;
    let padded = resize_with_padding(image, target_w, target_h);
    image_to_nchw(&padded)
}

/// Resize keeping aspect ratio, centered on a black canvas
fn resize_with_padding(image: &DynamicImage, target_w: u32, target_h: u32) -> DynamicImage {
    let info = ResizeInfo::new(image.dimensions(), (target_w, target_h));
    let (new_w, new_h) = info.scaled_size();

    let resized = image
        .resize_exact(new_w, new_h, imageops::FilterType::Triangle)
        .to_rgb8();

    let mut padded = ImageBuffer::from_pixel(target_w, target_h, Rgb([0u8, 0, 0]));
    imageops::overlay(&mut padded, &resized, info.offset_x as i64, info.offset_y as i64);

    DynamicImage::ImageRgb8(padded)
}

/// NCHW tensor in BGR order normalized to [-1, 1], as InsightFace models expect
fn image_to_nchw(image: &DynamicImage) -> Array4<f32> {
    let rgb = image.to_rgb8();
    let (width, height) = rgb.dimensions();

    let mut tensor = Array4::<f32>::zeros((1, 3, height as usize, width as usize));

    for (x, y, pixel) in rgb.enumerate_pixels() {
        let (x, y) = (x as usize, y as usize);
        tensor[[0, 0, y, x]] = (pixel[2] as f32 - 127.5) / 128.0;
        tensor[[0, 1, y, x]] = (pixel[1] as f32 - 127.5) / 128.0;
        tensor[[0, 2, y, x]] = (pixel[0] as f32 - 127.5) / 128.0;
    }

    tensor
}

/// Square crop around a face box, grown by `margin` (fraction of the box
/// size) on each side and clamped to the image.
pub fn crop_face(
    image: &DynamicImage,
    x1: f32,
    y1: f32,
    x2: f32,
    y2: f32,
    margin: f32,
) -> Option<DynamicImage> {
    let (img_w, img_h) = image.dimensions();

    let cx = (x1 + x2) / 2.0;
    let cy = (y1 + y2) / 2.0;
    let side = (x2 - x1).max(y2 - y1) * (1.0 + 2.0 * margin);
    let half = side / 2.0;

    let left = (cx - half).max(0.0) as u32;
    let top = (cy - half).max(0.0) as u32;
    let right = ((cx + half).min(img_w as f32)) as u32;
    let bottom = ((cy + half).min(img_h as f32)) as u32;

    if right <= left || bottom <= top {
        return None;
    }

    Some(image.crop_imm(left, top, right - left, bottom - top))
}

/// Decode an encoded still, honoring its EXIF orientation
pub fn decode_image(data: &[u8]) -> Result<DynamicImage> {
    let image = image::load_from_memory(data).context("Failed to decode image")?;
    Ok(apply_exif_orientation(data, image))
}

fn apply_exif_orientation(data: &[u8], image: DynamicImage) -> DynamicImage {
    use std::io::Cursor;

    let orientation = match exif::Reader::new().read_from_container(&mut Cursor::new(data)) {
        Ok(exif_data) => exif_data
            .get_field(exif::Tag::Orientation, exif::In::PRIMARY)
            .and_then(|field| field.value.get_uint(0))
            .unwrap_or(1),
        Err(_) => 1,
    };

    // https://exiftool.org/TagNames/EXIF.html (Orientation)
    match orientation {
        2 => image.fliph(),
        3 => image.rotate180(),
        4 => image.flipv(),
        5 => image.rotate90().fliph(),
        6 => image.rotate90(),
        7 => image.rotate270().fliph(),
        8 => image.rotate270(),
        _ => image,
    }
}

/// Letterbox geometry, used to map detections back to the source image
#[derive(Debug, Clone, Copy)]
pub struct ResizeInfo {
    pub scale: f32,
    pub offset_x: u32,
    pub offset_y: u32,
    pub original_width: u32,
    pub original_height: u32,
}

impl ResizeInfo {
    pub fn new(original: (u32, u32), target: (u32, u32)) -> Self {
        let (orig_w, orig_h) = original;
        let (target_w, target_h) = target;

        let scale = f32::min(
            target_w as f32 / orig_w as f32,
            target_h as f32 / orig_h as f32,
        );

        let new_w = (orig_w as f32 * scale) as u32;
        let new_h = (orig_h as f32 * scale) as u32;

        Self {
            scale,
            offset_x: (target_w - new_w) / 2,
            offset_y: (target_h - new_h) / 2,
            original_width: orig_w,
            original_height: orig_h,
        }
    }

    fn scaled_size(&self) -> (u32, u32) {
        (
            (self.original_width as f32 * self.scale) as u32,
            (self.original_height as f32 * self.scale) as u32,
        )
    }

    /// Convert detector coordinates back to original image space
    pub fn to_original(&self, x: f32, y: f32) -> (f32, f32) {
        let x = (x - self.offset_x as f32) / self.scale;
        let y = (y - self.offset_y as f32) / self.scale;
        (x, y)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::RgbImage;

    #[test]
    fn test_resize_info_landscape() {
        let info = ResizeInfo::new((1280, 720), DETECTOR_INPUT_SIZE);
        assert!((info.scale - 0.5).abs() < 1e-6);
        assert_eq!(info.offset_x, 0);
        assert_eq!(info.offset_y, 140);

        let (x, y) = info.to_original(320.0, 320.0);
        assert!((x - 640.0).abs() < 1e-3);
        assert!((y - 360.0).abs() < 1e-3);
    }

    #[test]
    fn test_detection_tensor_shape() {
        let image = DynamicImage::ImageRgb8(RgbImage::new(320, 240));
        let tensor = preprocess_for_detection(&image);
        assert_eq!(tensor.shape(), &[1, 3, 640, 640]);
    }

    #[test]
    fn test_crop_face_is_clamped() {
        let image = DynamicImage::ImageRgb8(RgbImage::new(100, 100));
        let crop = crop_face(&image, 80.0, 80.0, 120.0, 120.0, 0.2).unwrap();
        assert!(crop.width() <= 40);
        assert!(crop.height() <= 40);
    }

    #[test]
    fn test_crop_face_outside_image() {
        let image = DynamicImage::ImageRgb8(RgbImage::new(50, 50));
        assert!(crop_face(&image, 200.0, 200.0, 220.0, 220.0, 0.0).is_none());
    }

    #[test]
    fn test_decode_without_exif_keeps_dimensions() {
        let image = DynamicImage::ImageRgb8(RgbImage::new(64, 32));
        let mut buffer = std::io::Cursor::new(Vec::new());
        image.write_to(&mut buffer, image::ImageFormat::Png).unwrap();

        let decoded = decode_image(&buffer.into_inner()).unwrap();
        assert_eq!(decoded.dimensions(), (64, 32));
    }

    #[test]
    fn test_decode_garbage_fails() {
        assert!(decode_image(b"not an image").is_err());
    }
}
