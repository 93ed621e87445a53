//! Capture session - the capture pipeline and the owner of display state
//!
//! A capture takes a still, decodes it, and fans out to two tasks: face
//! analysis (only once the models are ready) and text recognition. Each task
//! posts its tagged result to the single state task, which applies updates in
//! arrival order and publishes snapshots on a watch channel. Results from a
//! superseded capture are dropped.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use anyhow::{anyhow, Result};
use image::DynamicImage;
use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tracing::{debug, info, warn};

use crate::capture::CameraHandle;
use crate::display::FilterState;
use crate::engine::preprocess::decode_image;
use crate::engine::{FaceAnalyzer, ModelStatus, OcrProgress, TextRecognizer};
use crate::location::{probe_location, LocationFix, LocationProvider};

use super::types::*;

const PROGRESS_CAPACITY: usize = 64;

/// Owns the capture pipeline and the display state
pub struct CaptureSession {
    camera: CameraHandle,
    faces: Arc<dyn FaceAnalyzer>,
    text: Arc<dyn TextRecognizer>,
    models: watch::Receiver<ModelStatus>,
    generation: AtomicU64,
    updates: mpsc::UnboundedSender<StateUpdate>,
    display: watch::Receiver<DisplayState>,
    progress: broadcast::Sender<OcrProgress>,
}

impl CaptureSession {
    /// Create the session and spawn its state task. Must be called inside a
    /// tokio runtime.
    pub fn start(
        camera: CameraHandle,
        faces: Arc<dyn FaceAnalyzer>,
        text: Arc<dyn TextRecognizer>,
        models: watch::Receiver<ModelStatus>,
    ) -> Arc<Self> {
        let (updates_tx, updates_rx) = mpsc::unbounded_channel();
        let (display_tx, display_rx) = watch::channel(DisplayState::default());
        let (progress_tx, _) = broadcast::channel(PROGRESS_CAPACITY);

        tokio::spawn(run_state_loop(updates_rx, display_tx));
        tokio::spawn(forward_model_status(models.clone(), updates_tx.clone()));

        Arc::new(Self {
            camera,
            faces,
            text,
            models,
            generation: AtomicU64::new(0),
            updates: updates_tx,
            display: display_rx,
            progress: progress_tx,
        })
    }

    /// Latest display snapshot
    pub fn display(&self) -> DisplayState {
        self.display.borrow().clone()
    }

    /// Subscribe to display snapshots
    pub fn subscribe(&self) -> watch::Receiver<DisplayState> {
        self.display.clone()
    }

    /// Subscribe to OCR progress events
    pub fn progress_events(&self) -> broadcast::Receiver<OcrProgress> {
        self.progress.subscribe()
    }

    pub fn camera(&self) -> &CameraHandle {
        &self.camera
    }

    fn send(&self, update: StateUpdate) {
        if self.updates.send(update).is_err() {
            warn!("Display state task has stopped, dropping update");
        }
    }

    /// Record the location fix
    pub fn set_location(&self, fix: LocationFix) {
        self.send(StateUpdate::Location(fix));
    }

    /// Request the location once in the background
    pub fn spawn_location_probe(self: &Arc<Self>, provider: Box<dyn LocationProvider>) {
        let session = self.clone();
        tokio::spawn(async move {
            if let Some(fix) = probe_location(provider.as_ref()).await {
                session.set_location(fix);
            }
        });
    }

    /// Flip the filter and return the value the state task settled on
    pub async fn toggle_filter(&self) -> Result<FilterState> {
        let (tx, rx) = oneshot::channel();
        self.send(StateUpdate::ToggleFilter(tx));

        rx.await.map_err(|_| anyhow!("Display state task has stopped"))
    }

    /// Run one capture cycle.
    ///
    /// Returns the cycle's generation as soon as both branches are launched;
    /// their results arrive through the display state.
    pub async fn capture(&self) -> Result<u64> {
        debug!("Capture requested");

        let frame = match self.camera.snapshot().await {
            Ok(Some(frame)) => frame,
            Ok(None) => return Err(self.capture_failed("No image captured".to_string())),
            Err(e) => return Err(self.capture_failed(format!("Camera capture failed: {:#}", e))),
        };

        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        info!("Image captured ({}x{}), capture {}", frame.width, frame.height, generation);

        let jpeg = frame.jpeg.clone();
        self.send(StateUpdate::Started(CaptureCycle::new(generation, frame)));

        let image = match tokio::task::spawn_blocking(move || decode_image(&jpeg)).await {
            Ok(Ok(image)) => Arc::new(image),
            Ok(Err(e)) => return Err(self.decode_failed(generation, format!("{:#}", e))),
            Err(e) => return Err(self.decode_failed(generation, e.to_string())),
        };
        debug!("Capture {} decoded", generation);

        if self.models.borrow().is_ready() {
            tokio::spawn(detect_faces(
                generation,
                image.clone(),
                self.faces.clone(),
                self.updates.clone(),
            ));
        } else {
            debug!("Models not ready, skipping face detection for capture {}", generation);
            self.send(StateUpdate::Detection {
                generation,
                result: BranchState::Skipped,
            });
        }

        tokio::spawn(recognize_text(
            generation,
            image,
            self.text.clone(),
            self.updates.clone(),
            self.progress.clone(),
        ));

        Ok(generation)
    }

    fn capture_failed(&self, message: String) -> anyhow::Error {
        warn!("{}", message);
        self.send(StateUpdate::CaptureFailed(message.clone()));
        anyhow!(message)
    }

    fn decode_failed(&self, generation: u64, message: String) -> anyhow::Error {
        warn!("Capture {} could not be decoded: {}", generation, message);
        self.send(StateUpdate::Detection {
            generation,
            result: BranchState::Failed(message.clone()),
        });
        self.send(StateUpdate::Ocr {
            generation,
            result: BranchState::Failed(message.clone()),
        });
        anyhow!("Failed to decode capture: {}", message)
    }
}

/// Branch A: face detection plus age/gender
async fn detect_faces(
    generation: u64,
    image: Arc<DynamicImage>,
    faces: Arc<dyn FaceAnalyzer>,
    updates: mpsc::UnboundedSender<StateUpdate>,
) {
    debug!("Detecting faces for capture {}", generation);

    let result = match tokio::task::spawn_blocking(move || faces.analyze(&image)).await {
        Ok(Ok(detection)) => {
            match &detection {
                Some(d) => info!("Capture {}: age {}, gender {}", generation, d.age, d.gender.as_str()),
                None => info!("Capture {}: no face found", generation),
            }
            BranchState::Done(detection)
        }
        Ok(Err(e)) => {
            warn!("Face detection failed for capture {}: {:#}", generation, e);
            BranchState::Failed(e.to_string())
        }
        Err(e) => {
            warn!("Face detection task aborted for capture {}: {}", generation, e);
            BranchState::Failed(e.to_string())
        }
    };

    let _ = updates.send(StateUpdate::Detection { generation, result });
}

/// Branch B: text recognition over the full frame
async fn recognize_text(
    generation: u64,
    image: Arc<DynamicImage>,
    text: Arc<dyn TextRecognizer>,
    updates: mpsc::UnboundedSender<StateUpdate>,
    progress: broadcast::Sender<OcrProgress>,
) {
    debug!("Recognizing text for capture {}", generation);

    let result = tokio::task::spawn_blocking(move || {
        let report = move |stage: &str, value: f32| {
            // No subscribers is fine
            let _ = progress.send(OcrProgress {
                generation,
                stage: stage.to_string(),
                progress: value,
            });
        };
        text.recognize(&image, &report)
    })
    .await;

    let result = match result {
        Ok(Ok(recognized)) => {
            info!("Capture {}: OCR text {:?}", generation, recognized);
            BranchState::Done(recognized)
        }
        Ok(Err(e)) => {
            warn!("Text recognition failed for capture {}: {:#}", generation, e);
            BranchState::Failed(e.to_string())
        }
        Err(e) => {
            warn!("Text recognition task aborted for capture {}: {}", generation, e);
            BranchState::Failed(e.to_string())
        }
    };

    let _ = updates.send(StateUpdate::Ocr { generation, result });
}

/// Single writer of the display state
async fn run_state_loop(
    mut updates: mpsc::UnboundedReceiver<StateUpdate>,
    display: watch::Sender<DisplayState>,
) {
    while let Some(update) = updates.recv().await {
        display.send_if_modified(|state| state.apply(update));
    }
    debug!("Display state task finished");
}

async fn forward_model_status(
    mut models: watch::Receiver<ModelStatus>,
    updates: mpsc::UnboundedSender<StateUpdate>,
) {
    loop {
        let status = models.borrow_and_update().clone();
        let settled = status != ModelStatus::Loading;
        if updates.send(StateUpdate::Models(status)).is_err() || settled {
            break;
        }
        if models.changed().await.is_err() {
            // Loader finished; publish its final value
            let status = models.borrow().clone();
            let _ = updates.send(StateUpdate::Models(status));
            break;
        }
    }
}

/// Log OCR progress events until the session goes away
pub async fn log_ocr_progress(mut events: broadcast::Receiver<OcrProgress>) {
    loop {
        match events.recv().await {
            Ok(event) => info!(
                "OCR capture {}: {} ({:.0}%)",
                event.generation,
                event.stage,
                event.progress * 100.0
            ),
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                debug!("OCR progress log skipped {} events", skipped);
            }
            Err(broadcast::error::RecvError::Closed) => break,
        }
    }
}
