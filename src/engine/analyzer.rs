//! Single-face age/gender analysis
//!
//! `FaceAnalyzer` is the seam between the capture pipeline and the models:
//! the OpenVINO implementation runs SCRFD on the whole frame, keeps the most
//! confident face and estimates age and gender on its crop.

use std::sync::Arc;

use anyhow::Result;
use image::DynamicImage;
use serde::{Deserialize, Serialize};

use crate::config::ModelsConfig;

use super::attribute::{AttributeAnalyzer, Gender};
use super::detector::{primary_face, FaceDetector};
use super::pool::{ModelPool, ModelType};
use super::preprocess::crop_face;

/// Margin added around the detected box before age/gender estimation
const FACE_CROP_MARGIN: f32 = 0.1;

/// Where the detector found the face
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FaceRegion {
    pub x1: f32,
    pub y1: f32,
    pub x2: f32,
    pub y2: f32,
    pub confidence: f32,
}

/// Age/gender estimate for the single most prominent face in a capture
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DetectionResult {
    pub age: i32,
    pub gender: Gender,
    pub gender_confidence: f32,
    pub face: FaceRegion,
}

/// Face detection plus age/gender estimation.
///
/// Both methods block; callers run them on the blocking pool.
pub trait FaceAnalyzer: Send + Sync {
    /// Load every model the analyzer needs
    fn load_models(&self) -> Result<()>;

    /// Analyze the most prominent face. `Ok(None)` means no face was found.
    fn analyze(&self, image: &DynamicImage) -> Result<Option<DetectionResult>>;
}

/// OpenVINO-backed analyzer
pub struct OpenVinoFaceAnalyzer {
    pool: Arc<ModelPool>,
    detector: FaceDetector,
    attribute: AttributeAnalyzer,
}

impl OpenVinoFaceAnalyzer {
    pub fn new(config: &ModelsConfig) -> Self {
        let pool = Arc::new(ModelPool::new(config));
        Self {
            detector: FaceDetector::new(pool.clone(), config.confidence_threshold),
            attribute: AttributeAnalyzer::new(pool.clone()),
            pool,
        }
    }
}

impl FaceAnalyzer for OpenVinoFaceAnalyzer {
    fn load_models(&self) -> Result<()> {
        for model_type in ModelType::ALL {
            self.pool.load(model_type)?;
        }
        Ok(())
    }

    fn analyze(&self, image: &DynamicImage) -> Result<Option<DetectionResult>> {
        let faces = self.detector.detect(image)?;
        let Some(face) = primary_face(faces) else {
            return Ok(None);
        };

        let Some(crop) = crop_face(image, face.x1, face.y1, face.x2, face.y2, FACE_CROP_MARGIN) else {
            tracing::debug!("Detected face box is empty after clamping, ignoring it");
            return Ok(None);
        };

        let attrs = self.attribute.analyze(&crop)?;

        Ok(Some(DetectionResult {
            age: attrs.age,
            gender: attrs.gender,
            gender_confidence: attrs.gender_confidence,
            face: FaceRegion {
                x1: face.x1,
                y1: face.y1,
                x2: face.x2,
                y2: face.y2,
                confidence: face.confidence,
            },
        }))
    }
}
