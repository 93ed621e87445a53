//! Snaplens
//!
//! Webcam capture service: face age/gender estimation with OpenVINO, text
//! recognition with Tesseract, and a one-shot location fix, served as a
//! single page over Axum.

use std::sync::Arc;
use std::time::Instant;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::net::TcpListener;
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

use snaplens::api::{create_rest_router, AppState};
use snaplens::args::Args;
use snaplens::capture::{list_cameras, CameraHandle};
use snaplens::config::Config;
use snaplens::engine::{spawn_model_loader, FaceAnalyzer, OpenVinoFaceAnalyzer, TesseractRecognizer};
use snaplens::location::provider_from_config;
use snaplens::service::{log_ocr_progress, CaptureSession};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    FmtSubscriber::builder()
        .with_max_level(Level::INFO)
        .with_target(false)
        .init();

    let args = Args::parse();

    if args.list_cameras {
        for cam in list_cameras()? {
            println!("{}: {} ({})", cam.index, cam.name, cam.misc);
        }
        return Ok(());
    }

    info!("Starting Snaplens v{}", env!("CARGO_PKG_VERSION"));

    // Load configuration
    let mut config = Config::load(&args.config).unwrap_or_else(|e| {
        info!("Using default config ({:#})", e);
        Config::default()
    });
    if let Some(port) = args.port {
        config.server.port = port;
    }

    info!("Configuration loaded:");
    info!("  Port: {}", config.server.port);
    info!("  Camera: {:?} #{}", config.camera.source, config.camera.index);
    info!("  Models: {} on {}", config.models.base_path.display(), config.models.device);
    info!("  OCR language: {}", config.ocr.language);
    info!("  Location provider: {:?}", config.location.provider);

    // Models load in the background; captures before then skip face analysis
    let faces: Arc<dyn FaceAnalyzer> = Arc::new(OpenVinoFaceAnalyzer::new(&config.models));
    let models = spawn_model_loader(faces.clone());

    let camera = CameraHandle::from_config(&config.camera)?;
    let text = Arc::new(TesseractRecognizer::new(&config.ocr));

    let session = CaptureSession::start(camera, faces, text, models);
    session.spawn_location_probe(provider_from_config(&config.location));
    tokio::spawn(log_ocr_progress(session.progress_events()));

    let app_state = Arc::new(AppState {
        session,
        jpeg_quality: config.camera.jpeg_quality,
        start_time: Instant::now(),
    });
    let router = create_rest_router(app_state, &config.server.static_dir);

    let addr = format!("0.0.0.0:{}", config.server.port);
    let listener = TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;
    info!("Listening on http://{}", addr);

    axum::serve(listener, router)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            info!("Shutdown signal received, cleaning up...");
        })
        .await?;

    info!("Goodbye!");
    Ok(())
}
