//! REST API response data transfer objects

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::display::{FilterState, Panels};
use crate::engine::{DetectionResult, ModelStatus};
use crate::location::LocationFix;
use crate::service::{BranchState, CaptureCycle, DisplayState};

/// Capture response
#[derive(Debug, Serialize, Deserialize)]
pub struct CaptureResponse {
    pub generation: u64,
}

/// Filter toggle response
#[derive(Debug, Serialize, Deserialize)]
pub struct FilterResponse {
    pub filter: FilterState,
}

/// The latest capture cycle, without the image bytes
#[derive(Debug, Serialize)]
pub struct CaptureDto {
    pub generation: u64,
    pub width: u32,
    pub height: u32,
    pub captured_at: DateTime<Utc>,
    pub detection: BranchState<Option<DetectionResult>>,
    pub ocr: BranchState<String>,
    pub settled: bool,
}

impl From<&CaptureCycle> for CaptureDto {
    fn from(cycle: &CaptureCycle) -> Self {
        Self {
            generation: cycle.generation,
            width: cycle.frame.width,
            height: cycle.frame.height,
            captured_at: cycle.frame.captured_at,
            detection: cycle.detection.clone(),
            ocr: cycle.ocr.clone(),
            settled: cycle.is_settled(),
        }
    }
}

/// Display state response
#[derive(Debug, Serialize)]
pub struct StateResponse {
    pub models: ModelStatus,
    pub filter: FilterState,
    pub location: Option<LocationFix>,
    pub capture: Option<CaptureDto>,
    pub last_error: Option<String>,
    pub panels: Panels,
}

impl From<&DisplayState> for StateResponse {
    fn from(state: &DisplayState) -> Self {
        Self {
            models: state.models.clone(),
            filter: state.filter,
            location: state.location,
            capture: state.cycle.as_ref().map(CaptureDto::from),
            last_error: state.last_error.clone(),
            panels: Panels::from_state(state),
        }
    }
}

/// Health response
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub healthy: bool,
    pub version: String,
    pub models: ModelStatus,
    pub uptime_seconds: u64,
}

/// Error response
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
    pub code: String,
}

impl ErrorResponse {
    pub fn new(error: &str, code: &str) -> Self {
        Self {
            error: error.to_string(),
            code: code.to_string(),
        }
    }
}
