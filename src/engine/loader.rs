//! Startup model loading
//!
//! Loads the face models once in the background and publishes a readiness
//! status that gates face analysis for the rest of the session.

use std::sync::Arc;
use std::time::Instant;

use serde::Serialize;
use tokio::sync::watch;
use tracing::{info, warn};

use super::analyzer::FaceAnalyzer;

/// Readiness of the face models
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "state", content = "error", rename_all = "snake_case")]
pub enum ModelStatus {
    Loading,
    Ready,
    Failed(String),
}

impl ModelStatus {
    pub fn is_ready(&self) -> bool {
        matches!(self, ModelStatus::Ready)
    }
}

/// Spawn the one-shot model load. Must be called inside a tokio runtime.
///
/// A failed load is reported once as a warning and leaves detection disabled;
/// there is no retry.
pub fn spawn_model_loader(analyzer: Arc<dyn FaceAnalyzer>) -> watch::Receiver<ModelStatus> {
    let (tx, rx) = watch::channel(ModelStatus::Loading);

    tokio::spawn(async move {
        info!("Loading models...");
        let start = Instant::now();

        let result = tokio::task::spawn_blocking(move || analyzer.load_models()).await;

        let status = match result {
            Ok(Ok(())) => {
                info!("Models loaded in {:?}", start.elapsed());
                ModelStatus::Ready
            }
            Ok(Err(e)) => {
                warn!("Model loading failed, face detection disabled: {:#}", e);
                ModelStatus::Failed(e.to_string())
            }
            Err(e) => {
                warn!("Model loading task aborted, face detection disabled: {}", e);
                ModelStatus::Failed(e.to_string())
            }
        };

        tx.send_replace(status);
    });

    rx
}
