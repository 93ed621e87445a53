//! Service layer module

pub mod session;
pub mod types;

pub use session::{log_ocr_progress, CaptureSession};
pub use types::*;
