//! Capture pipeline behaviour with fake analyzers and recognizers

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use image::{DynamicImage, Rgb, RgbImage};
use tokio::sync::watch;

use snaplens::capture::{CameraHandle, FrameSource, StillSource};
use snaplens::display::{FilterState, Panels};
use snaplens::engine::ocr::ProgressSink;
use snaplens::engine::{
    spawn_model_loader, DetectionResult, FaceAnalyzer, FaceRegion, Gender, ModelStatus, TextRecognizer,
};
use snaplens::location::{LocationFix, LocationProvider};
use snaplens::service::{BranchState, CaptureSession, DisplayState};

const WAIT: Duration = Duration::from_secs(5);

fn fixture_camera() -> CameraHandle {
    CameraHandle::spawn(
        || {
            let image = DynamicImage::ImageRgb8(RgbImage::from_pixel(64, 48, Rgb([200, 180, 160])));
            Ok(Box::new(StillSource::from_image("fixture", image)) as Box<dyn FrameSource>)
        },
        90,
    )
    .unwrap()
}

fn ready() -> watch::Receiver<ModelStatus> {
    watch::channel(ModelStatus::Ready).1
}

async fn wait_settled(session: &CaptureSession, generation: u64) -> DisplayState {
    let mut display = session.subscribe();
    let state = tokio::time::timeout(
        WAIT,
        display.wait_for(|s| {
            s.cycle
                .as_ref()
                .map_or(false, |c| c.generation == generation && c.is_settled())
        }),
    )
    .await
    .expect("capture did not settle in time")
    .expect("state task stopped");
    state.clone()
}

struct NoFaces;

impl FaceAnalyzer for NoFaces {
    fn load_models(&self) -> Result<()> {
        Ok(())
    }

    fn analyze(&self, _image: &DynamicImage) -> Result<Option<DetectionResult>> {
        Ok(None)
    }
}

struct OneFace;

impl FaceAnalyzer for OneFace {
    fn load_models(&self) -> Result<()> {
        Ok(())
    }

    fn analyze(&self, _image: &DynamicImage) -> Result<Option<DetectionResult>> {
        Ok(Some(DetectionResult {
            age: 34,
            gender: Gender::Male,
            gender_confidence: 0.87,
            face: FaceRegion { x1: 10.0, y1: 8.0, x2: 40.0, y2: 44.0, confidence: 0.93 },
        }))
    }
}

struct BrokenModels;

impl FaceAnalyzer for BrokenModels {
    fn load_models(&self) -> Result<()> {
        Err(anyhow!("model file not found"))
    }

    fn analyze(&self, _image: &DynamicImage) -> Result<Option<DetectionResult>> {
        unreachable!("analysis must be skipped when models failed to load")
    }
}

struct PanickingAnalyzer;

impl FaceAnalyzer for PanickingAnalyzer {
    fn load_models(&self) -> Result<()> {
        Ok(())
    }

    fn analyze(&self, _image: &DynamicImage) -> Result<Option<DetectionResult>> {
        panic!("inference crashed")
    }
}

struct FixedText(&'static str);

impl TextRecognizer for FixedText {
    fn recognize(&self, _image: &DynamicImage, progress: ProgressSink<'_>) -> Result<String> {
        progress("recognizing text", 0.5);
        Ok(self.0.to_string())
    }
}

struct FailingText;

impl TextRecognizer for FailingText {
    fn recognize(&self, _image: &DynamicImage, _progress: ProgressSink<'_>) -> Result<String> {
        Err(anyhow!("tesseract not installed"))
    }
}

/// First call is slow, later calls are immediate
struct SlowFirstText {
    calls: AtomicUsize,
}

impl TextRecognizer for SlowFirstText {
    fn recognize(&self, _image: &DynamicImage, _progress: ProgressSink<'_>) -> Result<String> {
        match self.calls.fetch_add(1, Ordering::SeqCst) {
            0 => {
                std::thread::sleep(Duration::from_millis(300));
                Ok("first".to_string())
            }
            _ => Ok("second".to_string()),
        }
    }
}

struct DeniedLocation;

#[async_trait]
impl LocationProvider for DeniedLocation {
    fn name(&self) -> &'static str {
        "denied"
    }

    async fn current_position(&self) -> Result<Option<LocationFix>> {
        Err(anyhow!("permission denied"))
    }
}

struct FixedLocation(LocationFix);

#[async_trait]
impl LocationProvider for FixedLocation {
    fn name(&self) -> &'static str {
        "fixed"
    }

    async fn current_position(&self) -> Result<Option<LocationFix>> {
        Ok(Some(self.0))
    }
}

#[tokio::test(flavor = "multi_thread")]
async fn no_face_still_recognizes_text() {
    let session = CaptureSession::start(fixture_camera(), Arc::new(NoFaces), Arc::new(FixedText("HELLO")), ready());

    let generation = session.capture().await.unwrap();
    let state = wait_settled(&session, generation).await;

    let cycle = state.cycle.as_ref().unwrap();
    assert_eq!(cycle.detection, BranchState::Done(None));
    assert_eq!(cycle.ocr_text(), "HELLO");

    let panels = Panels::from_state(&state);
    assert_eq!(panels.faces, None);
    assert_eq!(panels.ocr_text.as_deref(), Some("HELLO"));
}

#[tokio::test(flavor = "multi_thread")]
async fn detected_face_fills_the_panel() {
    let session = CaptureSession::start(fixture_camera(), Arc::new(OneFace), Arc::new(FixedText("")), ready());

    let generation = session.capture().await.unwrap();
    let state = wait_settled(&session, generation).await;

    let panels = Panels::from_state(&state);
    assert_eq!(panels.faces.as_deref(), Some("Age: 34, Gender: male"));
    assert_eq!(panels.ocr_text, None);
}

#[tokio::test(flavor = "multi_thread")]
async fn capture_before_models_ready_skips_detection() {
    let (_loading, models) = watch::channel(ModelStatus::Loading);
    let session = CaptureSession::start(fixture_camera(), Arc::new(OneFace), Arc::new(FixedText("HELLO")), models);

    let generation = session.capture().await.unwrap();
    let state = wait_settled(&session, generation).await;

    let cycle = state.cycle.as_ref().unwrap();
    assert_eq!(cycle.detection, BranchState::Skipped);
    assert_eq!(cycle.ocr_text(), "HELLO");
}

#[tokio::test(flavor = "multi_thread")]
async fn failed_model_load_disables_detection() {
    let faces: Arc<dyn FaceAnalyzer> = Arc::new(BrokenModels);
    let mut models = spawn_model_loader(faces.clone());
    let session = CaptureSession::start(fixture_camera(), faces, Arc::new(FixedText("HELLO")), models.clone());

    let status = tokio::time::timeout(WAIT, models.wait_for(|s| *s != ModelStatus::Loading))
        .await
        .unwrap()
        .unwrap()
        .clone();
    assert!(matches!(status, ModelStatus::Failed(_)));

    let generation = session.capture().await.unwrap();
    let state = wait_settled(&session, generation).await;
    assert_eq!(state.cycle.unwrap().detection, BranchState::Skipped);
}

#[tokio::test(flavor = "multi_thread")]
async fn loaded_models_become_ready_in_display_state() {
    let faces: Arc<dyn FaceAnalyzer> = Arc::new(OneFace);
    let models = spawn_model_loader(faces.clone());
    let session = CaptureSession::start(fixture_camera(), faces, Arc::new(FixedText("")), models);

    let mut display = session.subscribe();
    tokio::time::timeout(WAIT, display.wait_for(|s| s.models.is_ready()))
        .await
        .expect("models did not become ready")
        .unwrap();
}

#[tokio::test(flavor = "multi_thread")]
async fn toggling_twice_restores_the_filter() {
    let session = CaptureSession::start(fixture_camera(), Arc::new(NoFaces), Arc::new(FixedText("")), ready());

    assert_eq!(session.toggle_filter().await.unwrap(), FilterState::Grayscale);
    assert_eq!(session.toggle_filter().await.unwrap(), FilterState::None);
    assert_eq!(session.display().filter, FilterState::None);
}

#[tokio::test(flavor = "multi_thread")]
async fn concurrent_toggles_both_complete() {
    let session = CaptureSession::start(fixture_camera(), Arc::new(NoFaces), Arc::new(FixedText("")), ready());

    let (first, second) = tokio::time::timeout(WAIT, async {
        tokio::join!(session.toggle_filter(), session.toggle_filter())
    })
    .await
    .expect("filter toggles did not complete");

    let mut seen = vec![first.unwrap(), second.unwrap()];
    seen.sort_by_key(|f| *f == FilterState::None);
    assert_eq!(seen, vec![FilterState::Grayscale, FilterState::None]);
    assert_eq!(session.display().filter, FilterState::None);
}

#[tokio::test(flavor = "multi_thread")]
async fn denied_location_leaves_capture_working() {
    let session = CaptureSession::start(fixture_camera(), Arc::new(OneFace), Arc::new(FixedText("HELLO")), ready());
    session.spawn_location_probe(Box::new(DeniedLocation));

    let generation = session.capture().await.unwrap();
    let state = wait_settled(&session, generation).await;

    assert_eq!(state.location, None);
    assert_eq!(Panels::from_state(&state).location, None);
    assert!(state.cycle.unwrap().detection_result().is_some());
}

#[tokio::test(flavor = "multi_thread")]
async fn location_fix_is_published() {
    let session = CaptureSession::start(fixture_camera(), Arc::new(NoFaces), Arc::new(FixedText("")), ready());
    let fix = LocationFix { latitude: 52.52, longitude: 13.405 };
    session.spawn_location_probe(Box::new(FixedLocation(fix)));

    let mut display = session.subscribe();
    let state = tokio::time::timeout(WAIT, display.wait_for(|s| s.location.is_some()))
        .await
        .unwrap()
        .unwrap()
        .clone();
    assert_eq!(
        Panels::from_state(&state).location.as_deref(),
        Some("Latitude: 52.52, Longitude: 13.405")
    );
}

#[tokio::test(flavor = "multi_thread")]
async fn second_capture_supersedes_slow_first_ocr() {
    let text = Arc::new(SlowFirstText { calls: AtomicUsize::new(0) });
    let session = CaptureSession::start(fixture_camera(), Arc::new(NoFaces), text, ready());

    let first = session.capture().await.unwrap();
    let second = session.capture().await.unwrap();
    assert!(second > first);

    let state = wait_settled(&session, second).await;
    assert_eq!(state.cycle.as_ref().unwrap().ocr_text(), "second");

    // Let the first OCR finish; its result must not replace the second
    tokio::time::sleep(Duration::from_millis(500)).await;
    let state = session.display();
    let cycle = state.cycle.as_ref().unwrap();
    assert_eq!(cycle.generation, second);
    assert_eq!(cycle.ocr_text(), "second");
}

#[tokio::test(flavor = "multi_thread")]
async fn panicking_detection_keeps_ocr_result() {
    let session = CaptureSession::start(
        fixture_camera(),
        Arc::new(PanickingAnalyzer),
        Arc::new(FixedText("HELLO")),
        ready(),
    );

    let generation = session.capture().await.unwrap();
    let state = wait_settled(&session, generation).await;

    let cycle = state.cycle.as_ref().unwrap();
    assert!(matches!(cycle.detection, BranchState::Failed(_)));
    assert_eq!(cycle.ocr_text(), "HELLO");
}

#[tokio::test(flavor = "multi_thread")]
async fn failed_ocr_keeps_detection_result() {
    let session = CaptureSession::start(fixture_camera(), Arc::new(OneFace), Arc::new(FailingText), ready());

    let generation = session.capture().await.unwrap();
    let state = wait_settled(&session, generation).await;

    let cycle = state.cycle.as_ref().unwrap();
    assert!(matches!(cycle.ocr, BranchState::Failed(_)));
    assert_eq!(cycle.detection_result().map(|d| d.age), Some(34));
}

#[tokio::test(flavor = "multi_thread")]
async fn missing_camera_reports_error() {
    let camera = CameraHandle::spawn(|| Err(anyhow!("no video device")), 90).unwrap();
    let session = CaptureSession::start(camera, Arc::new(NoFaces), Arc::new(FixedText("")), ready());

    assert!(session.capture().await.is_err());

    let mut display = session.subscribe();
    let state = tokio::time::timeout(WAIT, display.wait_for(|s| s.last_error.is_some()))
        .await
        .unwrap()
        .unwrap()
        .clone();
    assert!(state.cycle.is_none());
    assert_eq!(state.last_error.as_deref(), Some("No image captured"));
}

#[tokio::test(flavor = "multi_thread")]
async fn progress_events_carry_the_generation() {
    let session = CaptureSession::start(fixture_camera(), Arc::new(NoFaces), Arc::new(FixedText("x")), ready());
    let mut events = session.progress_events();

    let generation = session.capture().await.unwrap();
    let event = tokio::time::timeout(WAIT, events.recv()).await.unwrap().unwrap();
    assert_eq!(event.generation, generation);
    assert_eq!(event.stage, "recognizing text");
}

/// Real models, Tesseract and a fixture image. Run with
/// `SNAPLENS_MODELS=<dir> SNAPLENS_FIXTURE=<face with HELLO>.jpg cargo test -- --ignored`
#[tokio::test(flavor = "multi_thread")]
#[ignore]
async fn end_to_end_with_real_engines() {
    use snaplens::config::{ModelsConfig, OcrConfig};
    use snaplens::engine::{OpenVinoFaceAnalyzer, TesseractRecognizer};

    let models_dir = std::env::var("SNAPLENS_MODELS").expect("SNAPLENS_MODELS not set");
    let fixture = std::env::var("SNAPLENS_FIXTURE").expect("SNAPLENS_FIXTURE not set");

    let models_config = ModelsConfig {
        base_path: models_dir.into(),
        ..ModelsConfig::default()
    };
    let faces: Arc<dyn FaceAnalyzer> = Arc::new(OpenVinoFaceAnalyzer::new(&models_config));
    let mut models = spawn_model_loader(faces.clone());

    let camera = CameraHandle::spawn(
        move || Ok(Box::new(StillSource::open(std::path::Path::new(&fixture))?) as Box<dyn FrameSource>),
        95,
    )
    .unwrap();
    let text = Arc::new(TesseractRecognizer::new(&OcrConfig::default()));
    let session = CaptureSession::start(camera, faces, text, models.clone());

    tokio::time::timeout(Duration::from_secs(60), models.wait_for(|s| *s != ModelStatus::Loading))
        .await
        .expect("models did not load in time")
        .unwrap();
    let status = models.borrow().clone();
    assert!(status.is_ready(), "model load failed: {:?}", status);

    let generation = session.capture().await.unwrap();
    let mut display = session.subscribe();
    let state = tokio::time::timeout(
        Duration::from_secs(60),
        display.wait_for(|s| s.cycle.as_ref().map_or(false, |c| c.generation == generation && c.is_settled())),
    )
    .await
    .expect("capture did not settle")
    .unwrap()
    .clone();

    let cycle = state.cycle.as_ref().unwrap();
    let detection = cycle.detection_result().expect("no face detected");
    assert!(detection.age >= 0);
    assert!(matches!(detection.gender, Gender::Male | Gender::Female));
    assert!(cycle.ocr_text().to_uppercase().contains("HELLO"));
}
