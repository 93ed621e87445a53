//! SCRFD Face Detector
//!
//! Face localization using the InsightFace SCRFD model.
//! Outputs bounding boxes in source image coordinates.

use std::sync::Arc;

use image::{DynamicImage, GenericImageView};
use openvino::{ElementType, InferRequest, Shape, Tensor};
use anyhow::{anyhow, Result};

use super::pool::{ModelPool, ModelType};
use super::preprocess::{preprocess_for_detection, ResizeInfo, DETECTOR_INPUT_SIZE};

const NMS_THRESHOLD: f32 = 0.4;

/// Face detection result
#[derive(Debug, Clone, PartialEq)]
pub struct FaceBox {
    pub x1: f32,
    pub y1: f32,
    pub x2: f32,
    pub y2: f32,
    pub confidence: f32,
}

impl FaceBox {
    pub fn area(&self) -> f32 {
        (self.x2 - self.x1).max(0.0) * (self.y2 - self.y1).max(0.0)
    }
}

/// SCRFD Face Detector
pub struct FaceDetector {
    pool: Arc<ModelPool>,
    confidence_threshold: f32,
}

impl FaceDetector {
    pub fn new(pool: Arc<ModelPool>, confidence_threshold: f32) -> Self {
        Self {
            pool,
            confidence_threshold,
        }
    }

    /// Detect all faces in a decoded image
    pub fn detect(&self, image: &DynamicImage) -> Result<Vec<FaceBox>> {
        let resize_info = ResizeInfo::new(image.dimensions(), DETECTOR_INPUT_SIZE);
        let input_tensor = preprocess_for_detection(image);

        let model = self.pool.get_model(ModelType::Detector)?;
        let mut request = model.create_infer_request()?;

        let input_shape = Shape::new(&[1, 3, DETECTOR_INPUT_SIZE.1 as i64, DETECTOR_INPUT_SIZE.0 as i64])?;
        let mut input = Tensor::new(ElementType::F32, &input_shape)?;

        let input_data = input_tensor
            .as_slice()
            .ok_or_else(|| anyhow!("Detection tensor is not contiguous"))?;
        unsafe {
            let tensor_data = input.get_raw_data_mut()?.as_mut_ptr() as *mut f32;
            std::ptr::copy_nonoverlapping(input_data.as_ptr(), tensor_data, input_data.len());
        }

        request.set_input_tensor(&input)?;
        request.infer()?;

        let detections = self.parse_outputs(&request, &resize_info)?;
        let faces = nms(detections, NMS_THRESHOLD);

        tracing::debug!("Detected {} faces after NMS", faces.len());

        Ok(faces)
    }

    /// Decode SCRFD outputs.
    ///
    /// The output count identifies the variant: scores for every stride come
    /// first, then box distances. Keypoint outputs, when present, are not read.
    fn parse_outputs(&self, request: &InferRequest, resize_info: &ResizeInfo) -> Result<Vec<FaceBox>> {
        let mut output_count = 0;
        while output_count < 20 && request.get_output_tensor_by_index(output_count).is_ok() {
            output_count += 1;
        }

        let (fmc, num_anchors) = match output_count {
            6 | 9 => (3, 2),
            10 | 15 => (5, 1),
            _ => {
                tracing::warn!("Unknown SCRFD output count: {}, trying default", output_count);
                (3, 2)
            }
        };

        let strides: &[i32] = if fmc == 3 { &[8, 16, 32] } else { &[8, 16, 32, 64, 128] };
        let (input_h, input_w) = (DETECTOR_INPUT_SIZE.1 as i32, DETECTOR_INPUT_SIZE.0 as i32);

        let mut all_boxes = Vec::new();

        for (idx, &stride) in strides.iter().enumerate() {
            let scores = read_tensor_f32(&request.get_output_tensor_by_index(idx)?)?;
            let bboxes = read_tensor_f32(&request.get_output_tensor_by_index(idx + fmc)?)?;

            let feat_h = input_h / stride;
            let feat_w = input_w / stride;
            let s = stride as f32;

            let anchor_centers = (0..feat_h).flat_map(|y| {
                (0..feat_w).flat_map(move |x| {
                    std::iter::repeat((x as f32 * s, y as f32 * s)).take(num_anchors)
                })
            });

            for (i, (cx, cy)) in anchor_centers.enumerate() {
                let Some(&score) = scores.get(i) else { break };
                if score < self.confidence_threshold {
                    continue;
                }

                let bbox_idx = i * 4;
                if bbox_idx + 3 >= bboxes.len() {
                    continue;
                }

                // Distances from the anchor: left, top, right, bottom
                let x1 = cx - bboxes[bbox_idx] * s;
                let y1 = cy - bboxes[bbox_idx + 1] * s;
                let x2 = cx + bboxes[bbox_idx + 2] * s;
                let y2 = cy + bboxes[bbox_idx + 3] * s;

                let (orig_x1, orig_y1) = resize_info.to_original(x1, y1);
                let (orig_x2, orig_y2) = resize_info.to_original(x2, y2);
                let max_w = resize_info.original_width as f32;
                let max_h = resize_info.original_height as f32;

                all_boxes.push(FaceBox {
                    x1: orig_x1.clamp(0.0, max_w),
                    y1: orig_y1.clamp(0.0, max_h),
                    x2: orig_x2.clamp(0.0, max_w),
                    y2: orig_y2.clamp(0.0, max_h),
                    confidence: score,
                });
            }
        }

        tracing::debug!("{} candidate faces before NMS", all_boxes.len());

        Ok(all_boxes)
    }
}

fn read_tensor_f32(tensor: &Tensor) -> Result<Vec<f32>> {
    let shape = tensor.get_shape()?;
    let total_elements: i64 = shape.get_dimensions().iter().product();

    let data: Vec<f32> = unsafe {
        let ptr = tensor.get_raw_data()?.as_ptr() as *const f32;
        std::slice::from_raw_parts(ptr, total_elements as usize).to_vec()
    };

    Ok(data)
}

/// The face a single-face query reports: highest confidence wins
pub fn primary_face(faces: Vec<FaceBox>) -> Option<FaceBox> {
    faces
        .into_iter()
        .max_by(|a, b| a.confidence.total_cmp(&b.confidence))
}

/// Non-maximum suppression
pub fn nms(mut boxes: Vec<FaceBox>, threshold: f32) -> Vec<FaceBox> {
    boxes.sort_by(|a, b| b.confidence.total_cmp(&a.confidence));

    let mut keep: Vec<FaceBox> = Vec::new();
    for candidate in boxes {
        if keep.iter().all(|kept| compute_iou(kept, &candidate) <= threshold) {
            keep.push(candidate);
        }
    }

    keep
}

/// Intersection over union
pub fn compute_iou(a: &FaceBox, b: &FaceBox) -> f32 {
    let x1 = a.x1.max(b.x1);
    let y1 = a.y1.max(b.y1);
    let x2 = a.x2.min(b.x2);
    let y2 = a.y2.min(b.y2);

    let intersection = (x2 - x1).max(0.0) * (y2 - y1).max(0.0);
    let union = a.area() + b.area() - intersection;

    if union > 0.0 {
        intersection / union
    } else {
        0.0
    }
}
