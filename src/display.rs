//! Display helpers: the grayscale filter and the result panels

use anyhow::Result;
use serde::{Deserialize, Serialize};

use crate::capture::CaptureFrame;
use crate::engine::preprocess::decode_image;
use crate::location::LocationFix;
use crate::service::DisplayState;
use crate::utils::image::encode_dynamic_jpeg;

/// Visual filter applied to the captured still
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FilterState {
    #[default]
    None,
    Grayscale,
}

impl FilterState {
    pub fn toggle(self) -> Self {
        match self {
            FilterState::None => FilterState::Grayscale,
            FilterState::Grayscale => FilterState::None,
        }
    }
}

/// Render the captured still with the filter applied. The unfiltered JPEG is
/// returned as-is.
pub fn render_capture(frame: &CaptureFrame, filter: FilterState, jpeg_quality: u8) -> Result<Vec<u8>> {
    match filter {
        FilterState::None => Ok(frame.jpeg.clone()),
        FilterState::Grayscale => {
            let image = decode_image(&frame.jpeg)?;
            encode_dynamic_jpeg(&image.grayscale(), jpeg_quality)
        }
    }
}

/// The three result panels; each is shown only when it has content
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Panels {
    pub faces: Option<String>,
    pub ocr_text: Option<String>,
    pub location: Option<String>,
}

impl Panels {
    pub fn from_state(state: &DisplayState) -> Self {
        let cycle = state.cycle.as_ref();

        let faces = cycle
            .and_then(|c| c.detection_result())
            .map(|d| format!("Age: {}, Gender: {}", d.age, d.gender.as_str()));

        let ocr_text = cycle
            .map(|c| c.ocr_text())
            .filter(|text| !text.is_empty())
            .map(str::to_string);

        Panels {
            faces,
            ocr_text,
            location: state.location.map(format_location),
        }
    }
}

fn format_location(fix: LocationFix) -> String {
    format!("Latitude: {}, Longitude: {}", fix.latitude, fix.longitude)
}
