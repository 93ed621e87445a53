//! Text recognition over a full capture using rusty-tesseract

use std::collections::HashMap;

use anyhow::{anyhow, Result};
use image::DynamicImage;
use serde::Serialize;

use crate::config::OcrConfig;

/// One step of a recognition run. Progress runs from 0.0 to 1.0.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OcrProgress {
    pub generation: u64,
    pub stage: String,
    pub progress: f32,
}

/// Receives progress updates while a recognition runs
pub type ProgressSink<'a> = &'a (dyn Fn(&str, f32) + Send + Sync);

/// Optical character recognition over a whole image.
///
/// Blocks; callers run it on the blocking pool.
pub trait TextRecognizer: Send + Sync {
    fn recognize(&self, image: &DynamicImage, progress: ProgressSink<'_>) -> Result<String>;
}

/// Recognizer backed by the system tesseract binary
pub struct TesseractRecognizer {
    language: String,
    dpi: i32,
    psm: i32,
}

impl TesseractRecognizer {
    pub fn new(config: &OcrConfig) -> Self {
        Self {
            language: config.language.clone(),
            dpi: config.dpi,
            psm: config.psm,
        }
    }

    fn args(&self, dpi: i32) -> rusty_tesseract::Args {
        rusty_tesseract::Args {
            lang: self.language.clone(),
            config_variables: HashMap::new(),
            dpi: Some(dpi),
            psm: Some(self.psm),
            oem: Some(3),
        }
    }
}

impl TextRecognizer for TesseractRecognizer {
    fn recognize(&self, image: &DynamicImage, progress: ProgressSink<'_>) -> Result<String> {
        progress("preparing image", 0.0);

        // Tesseract needs text at least 10-12 px tall; upscale small frames
        let (prepared, dpi) = upscale_for_ocr(image, self.dpi);

        tracing::debug!(
            "Running tesseract ({}) on {}x{} image",
            self.language,
            prepared.width(),
            prepared.height()
        );

        let tess_img = rusty_tesseract::Image::from_dynamic_image(&prepared)
            .map_err(|e| anyhow!("Failed to create tesseract image: {}", e))?;

        progress("recognizing text", 0.5);

        let text = rusty_tesseract::image_to_string(&tess_img, &self.args(dpi))
            .map_err(|e| anyhow!("Tesseract OCR failed: {}", e))?;

        progress("done", 1.0);

        Ok(text.trim().to_string())
    }
}

/// Upscale factor and DPI hint chosen from the smaller image side
fn upscale_for_ocr(image: &DynamicImage, base_dpi: i32) -> (DynamicImage, i32) {
    let min_dimension = image.width().min(image.height());
    let factor = match min_dimension {
        0..=99 => 4,
        100..=199 => 2,
        _ => 1,
    };

    if factor == 1 {
        return (image.clone(), base_dpi);
    }

    let resized = image.resize(
        image.width() * factor,
        image.height() * factor,
        image::imageops::FilterType::Lanczos3,
    );
    (resized, base_dpi.max(300))
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::RgbImage;

    #[test]
    fn test_small_images_are_upscaled() {
        let tiny = DynamicImage::ImageRgb8(RgbImage::new(80, 60));
        let (prepared, dpi) = upscale_for_ocr(&tiny, 150);
        assert_eq!((prepared.width(), prepared.height()), (320, 240));
        assert_eq!(dpi, 300);

        let small = DynamicImage::ImageRgb8(RgbImage::new(300, 150));
        let (prepared, _) = upscale_for_ocr(&small, 150);
        assert_eq!((prepared.width(), prepared.height()), (600, 300));
    }

    #[test]
    fn test_large_images_are_untouched() {
        let frame = DynamicImage::ImageRgb8(RgbImage::new(640, 480));
        let (prepared, dpi) = upscale_for_ocr(&frame, 150);
        assert_eq!((prepared.width(), prepared.height()), (640, 480));
        assert_eq!(dpi, 150);
    }

    #[test]
    fn test_args_use_configured_language() {
        let recognizer = TesseractRecognizer::new(&OcrConfig::default());
        let args = recognizer.args(150);
        assert_eq!(args.lang, "eng");
        assert_eq!(args.psm, Some(3));
    }
}
