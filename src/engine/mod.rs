//! Inference engine module
//!
//! - OpenVINO face detection and age/gender estimation
//! - Background model loading with a readiness status
//! - Tesseract text recognition

pub mod pool;
pub mod detector;
pub mod attribute;
pub mod preprocess;
pub mod analyzer;
pub mod loader;
pub mod ocr;

pub use pool::ModelPool;
pub use detector::FaceDetector;
pub use attribute::{AttributeAnalyzer, Gender};
pub use analyzer::{DetectionResult, FaceAnalyzer, FaceRegion, OpenVinoFaceAnalyzer};
pub use loader::{spawn_model_loader, ModelStatus};
pub use ocr::{OcrProgress, TesseractRecognizer, TextRecognizer};
