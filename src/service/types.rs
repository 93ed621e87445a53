//! Display state owned by the capture session

use serde::Serialize;
use tokio::sync::oneshot;

use crate::capture::CaptureFrame;
use crate::display::FilterState;
use crate::engine::{DetectionResult, ModelStatus};
use crate::location::LocationFix;

/// Progress of one inference branch within a capture cycle
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", content = "value", rename_all = "snake_case")]
pub enum BranchState<T> {
    Pending,
    Skipped,
    Done(T),
    Failed(String),
}

impl<T> BranchState<T> {
    pub fn is_settled(&self) -> bool {
        !matches!(self, BranchState::Pending)
    }

    pub fn done(&self) -> Option<&T> {
        match self {
            BranchState::Done(value) => Some(value),
            _ => None,
        }
    }
}

/// One capture plus the state of its two branches
#[derive(Debug, Clone)]
pub struct CaptureCycle {
    pub generation: u64,
    pub frame: CaptureFrame,
    pub detection: BranchState<Option<DetectionResult>>,
    pub ocr: BranchState<String>,
}

impl CaptureCycle {
    pub fn new(generation: u64, frame: CaptureFrame) -> Self {
        Self {
            generation,
            frame,
            detection: BranchState::Pending,
            ocr: BranchState::Pending,
        }
    }

    pub fn is_settled(&self) -> bool {
        self.detection.is_settled() && self.ocr.is_settled()
    }

    pub fn detection_result(&self) -> Option<&DetectionResult> {
        self.detection.done().and_then(Option::as_ref)
    }

    /// Recognized text, empty until the OCR branch finishes
    pub fn ocr_text(&self) -> &str {
        self.ocr.done().map(String::as_str).unwrap_or("")
    }
}

/// Everything the page renders
#[derive(Debug, Clone)]
pub struct DisplayState {
    pub models: ModelStatus,
    pub location: Option<LocationFix>,
    pub filter: FilterState,
    pub cycle: Option<CaptureCycle>,
    pub last_error: Option<String>,
}

impl Default for DisplayState {
    fn default() -> Self {
        Self {
            models: ModelStatus::Loading,
            location: None,
            filter: FilterState::None,
            cycle: None,
            last_error: None,
        }
    }
}

/// A write to the display state. Only the session's state task applies them.
#[derive(Debug)]
pub enum StateUpdate {
    Models(ModelStatus),
    Location(LocationFix),
    CaptureFailed(String),
    Started(CaptureCycle),
    Detection {
        generation: u64,
        result: BranchState<Option<DetectionResult>>,
    },
    Ocr {
        generation: u64,
        result: BranchState<String>,
    },
    /// Flip the filter; the new value is sent back on the channel
    ToggleFilter(oneshot::Sender<FilterState>),
}

impl DisplayState {
    fn current_generation(&self) -> u64 {
        self.cycle.as_ref().map(|c| c.generation).unwrap_or(0)
    }

    /// Apply one update. Branch results from a cycle other than the current
    /// one are stale and dropped. Returns whether anything changed.
    pub fn apply(&mut self, update: StateUpdate) -> bool {
        match update {
            StateUpdate::Models(status) => {
                self.models = status;
            }
            StateUpdate::Location(fix) => {
                self.location = Some(fix);
            }
            StateUpdate::CaptureFailed(error) => {
                self.last_error = Some(error);
            }
            StateUpdate::Started(cycle) => {
                if cycle.generation <= self.current_generation() {
                    tracing::debug!("Ignoring out-of-order capture {}", cycle.generation);
                    return false;
                }
                self.cycle = Some(cycle);
                self.last_error = None;
            }
            StateUpdate::Detection { generation, result } => match self.cycle.as_mut() {
                Some(cycle) if cycle.generation == generation => cycle.detection = result,
                _ => {
                    tracing::debug!("Discarding stale detection from capture {}", generation);
                    return false;
                }
            },
            StateUpdate::Ocr { generation, result } => match self.cycle.as_mut() {
                Some(cycle) if cycle.generation == generation => cycle.ocr = result,
                _ => {
                    tracing::debug!("Discarding stale OCR from capture {}", generation);
                    return false;
                }
            },
            StateUpdate::ToggleFilter(reply) => {
                self.filter = self.filter.toggle();
                // Requester may have gone away
                let _ = reply.send(self.filter);
            }
        }
        true
    }
}
