//! Age and gender estimation for a localized face

use std::sync::Arc;

use image::DynamicImage;
use ndarray::Array4;
use openvino::{ElementType, Shape, Tensor};
use anyhow::{anyhow, Result};
use serde::{Deserialize, Serialize};

use super::pool::{ModelPool, ModelType};
use super::preprocess::ATTRIBUTE_INPUT_SIZE;

/// Gender classification result
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Gender {
    Male,
    Female,
}

impl Gender {
    pub fn as_str(&self) -> &'static str {
        match self {
            Gender::Male => "male",
            Gender::Female => "female",
        }
    }
}

/// Age/gender estimate for one face
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FaceAttributes {
    pub age: i32,
    pub gender: Gender,
    pub gender_confidence: f32,
}

/// Runs the gender/age model on face crops
pub struct AttributeAnalyzer {
    pool: Arc<ModelPool>,
}

impl AttributeAnalyzer {
    pub fn new(pool: Arc<ModelPool>) -> Self {
        Self { pool }
    }

    /// Estimate age and gender from a face crop
    pub fn analyze(&self, face: &DynamicImage) -> Result<FaceAttributes> {
        let (target_w, target_h) = ATTRIBUTE_INPUT_SIZE;
        let resized = face.resize_exact(target_w, target_h, image::imageops::FilterType::Lanczos3);
        let input_tensor = image_to_tensor(&resized);

        let model = self.pool.get_model(ModelType::GenderAge)?;
        let mut request = model.create_infer_request()?;

        let input_shape = Shape::new(&[1, 3, target_h as i64, target_w as i64])?;
        let mut input = Tensor::new(ElementType::F32, &input_shape)?;

        let input_data = input_tensor
            .as_slice()
            .ok_or_else(|| anyhow!("Attribute tensor is not contiguous"))?;
        unsafe {
            let tensor_data = input.get_raw_data_mut()?.as_mut_ptr() as *mut f32;
            std::ptr::copy_nonoverlapping(input_data.as_ptr(), tensor_data, input_data.len());
        }

        request.set_input_tensor(&input)?;
        request.infer()?;

        let output = request.get_output_tensor()?;
        let output_len = output.get_shape()?.get_dimensions().iter().product::<i64>() as usize;
        let output_data: Vec<f32> = unsafe {
            let ptr = output.get_raw_data()?.as_ptr() as *const f32;
            std::slice::from_raw_parts(ptr, output_len).to_vec()
        };

        tracing::debug!("GenderAge model raw output: {:?}", output_data);

        let attributes = parse_gender_age(&output_data)?;

        tracing::debug!(
            "Parsed: age={}, gender={:?}, conf={:.3}",
            attributes.age,
            attributes.gender,
            attributes.gender_confidence
        );

        Ok(attributes)
    }
}

/// Interpret the gender/age model output.
///
/// Three values are `[female_logit, male_logit, age / 100]` (InsightFace);
/// two values are `[signed gender logit, age factor]` with positive meaning
/// female. Age is clamped to 1..=100.
pub fn parse_gender_age(output: &[f32]) -> Result<FaceAttributes> {
    let (gender, gender_confidence, age) = match *output {
        [female_logit, male_logit, age_scale] => {
            let probs = softmax(&[female_logit, male_logit]);
            let (gender, conf) = if male_logit > female_logit {
                (Gender::Male, probs[1])
            } else {
                (Gender::Female, probs[0])
            };
            (gender, conf, (age_scale * 100.0).round() as i32)
        }
        [gender_val, age_factor] => {
            let sigmoid = 1.0 / (1.0 + (-gender_val).exp());
            let (gender, conf) = if sigmoid > 0.5 {
                (Gender::Female, sigmoid)
            } else {
                (Gender::Male, 1.0 - sigmoid)
            };
            let age = if age_factor > 1.0 && age_factor < 120.0 {
                age_factor.round() as i32
            } else {
                (age_factor * 100.0).round() as i32
            };
            (gender, conf, age)
        }
        _ => return Err(anyhow!("Unexpected gender/age output length: {}", output.len())),
    };

    Ok(FaceAttributes {
        age: age.clamp(1, 100),
        gender,
        gender_confidence,
    })
}

/// NCHW tensor in RGB order, normalized with (x - 127.5) / 128
fn image_to_tensor(image: &DynamicImage) -> Array4<f32> {
    let rgb = image.to_rgb8();
    let (width, height) = rgb.dimensions();

    let mut tensor = Array4::<f32>::zeros((1, 3, height as usize, width as usize));

    for (x, y, pixel) in rgb.enumerate_pixels() {
        let (x, y) = (x as usize, y as usize);
        for c in 0..3 {
            tensor[[0, c, y, x]] = (pixel[c] as f32 - 127.5) / 128.0;
        }
    }

    tensor
}

fn softmax(x: &[f32]) -> Vec<f32> {
    let max_val = x.iter().cloned().fold(f32::NEG_INFINITY, f32::max);
    let exp_vals: Vec<f32> = x.iter().map(|v| (v - max_val).exp()).collect();
    let sum: f32 = exp_vals.iter().sum();
    exp_vals.iter().map(|v| v / sum).collect()
}
