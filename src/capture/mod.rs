//! Camera capture
//!
//! The frame source lives on its own thread; callers ask it for stills over a
//! channel and get back a JPEG-encoded `CaptureFrame`, or `None` when no
//! stream is active.

pub mod camera;

use std::sync::mpsc;
use std::thread;

use anyhow::{anyhow, Result};
use chrono::{DateTime, Utc};
use tokio::sync::oneshot;
use tracing::{debug, info, warn};

use crate::config::{CameraConfig, CameraSourceKind};
use crate::utils::image::encode_jpeg;

pub use camera::{list_cameras, CameraDescription, DeviceSource, FrameSource, StillSource};

/// A still taken from the camera feed
#[derive(Debug, Clone)]
pub struct CaptureFrame {
    pub jpeg: Vec<u8>,
    pub width: u32,
    pub height: u32,
    pub captured_at: DateTime<Utc>,
}

type SnapshotReply = oneshot::Sender<Result<Option<CaptureFrame>>>;

/// Handle to the camera worker thread
#[derive(Clone)]
pub struct CameraHandle {
    requests: mpsc::Sender<SnapshotReply>,
}

impl CameraHandle {
    /// Start the worker. `open` runs on the worker thread, so the source
    /// itself does not need to be `Send`. If it fails the worker keeps
    /// answering with `None`.
    pub fn spawn<F>(open: F, jpeg_quality: u8) -> Result<Self>
    where
        F: FnOnce() -> Result<Box<dyn FrameSource>> + Send + 'static,
    {
        let (tx, rx) = mpsc::channel::<SnapshotReply>();

        thread::Builder::new()
            .name("camera".to_string())
            .spawn(move || {
                let mut source = match open() {
                    Ok(source) => {
                        info!("Camera source ready: {}", source.name());
                        Some(source)
                    }
                    Err(e) => {
                        warn!("No camera available, captures will be empty: {:#}", e);
                        None
                    }
                };

                while let Ok(reply) = rx.recv() {
                    let result = match source.as_mut() {
                        Some(source) => snapshot(&mut **source, jpeg_quality).map(Some),
                        None => Ok(None),
                    };
                    let _ = reply.send(result);
                }

                debug!("Camera worker shutting down");
            })?;

        Ok(Self { requests: tx })
    }

    /// Start the worker for the configured source
    pub fn from_config(config: &CameraConfig) -> Result<Self> {
        let config = config.clone();
        let quality = config.jpeg_quality;

        Self::spawn(
            move || -> Result<Box<dyn FrameSource>> {
                match config.source {
                    CameraSourceKind::Device => Ok(Box::new(DeviceSource::open(config.index)?)),
                    CameraSourceKind::Still => {
                        let path = config
                            .still_path
                            .ok_or_else(|| anyhow!("camera.still_path is required for a still source"))?;
                        Ok(Box::new(StillSource::open(&path)?))
                    }
                }
            },
            quality,
        )
    }

    /// Take a still of the latest frame
    pub async fn snapshot(&self) -> Result<Option<CaptureFrame>> {
        let (tx, rx) = oneshot::channel();
        self.requests
            .send(tx)
            .map_err(|_| anyhow!("Camera worker has stopped"))?;
        rx.await.map_err(|_| anyhow!("Camera worker dropped the request"))?
    }
}

fn snapshot(source: &mut dyn FrameSource, jpeg_quality: u8) -> Result<CaptureFrame> {
    let frame = source.grab()?;
    let (width, height) = frame.dimensions();
    let jpeg = encode_jpeg(&frame, jpeg_quality)?;

    Ok(CaptureFrame {
        jpeg,
        width,
        height,
        captured_at: Utc::now(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{DynamicImage, Rgb, RgbImage};

    #[tokio::test]
    async fn test_snapshot_from_still_source() {
        let camera = CameraHandle::spawn(
            || {
                let image = DynamicImage::ImageRgb8(RgbImage::from_pixel(32, 24, Rgb([9, 9, 9])));
                Ok(Box::new(StillSource::from_image("fixture", image)) as Box<dyn FrameSource>)
            },
            80,
        )
        .unwrap();

        let frame = camera.snapshot().await.unwrap().unwrap();
        assert_eq!((frame.width, frame.height), (32, 24));
        assert_eq!(&frame.jpeg[..2], &[0xFF, 0xD8]);
    }

    #[tokio::test]
    async fn test_missing_camera_yields_nothing() {
        let camera = CameraHandle::spawn(|| Err(anyhow!("no video device")), 80).unwrap();

        assert!(camera.snapshot().await.unwrap().is_none());
        assert!(camera.snapshot().await.unwrap().is_none());
    }
}
