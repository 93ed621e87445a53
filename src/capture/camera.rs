use std::path::Path;

use anyhow::{anyhow, Context, Result};
use image::{DynamicImage, RgbImage};
use nokhwa::{
    pixel_format::RgbFormat,
    utils::{ApiBackend, CameraIndex, RequestedFormat, RequestedFormatType},
    Camera,
};
use tracing::info;

/// Something that can hand out the current video frame
pub trait FrameSource {
    fn name(&self) -> String;
    fn grab(&mut self) -> Result<RgbImage>;
}

/// Webcam opened through nokhwa
pub struct DeviceSource {
    camera: Camera,
}

impl DeviceSource {
    pub fn open(index: u32) -> Result<Self> {
        let requested = RequestedFormat::new::<RgbFormat>(RequestedFormatType::AbsoluteHighestFrameRate);
        let mut camera = Camera::new(CameraIndex::Index(index), requested)
            .map_err(|e| anyhow!(e))
            .context("Failed to create camera instance")?;

        camera
            .open_stream()
            .map_err(|e| anyhow!(e))
            .context("Failed to open camera stream")?;

        info!(
            "Opened camera: {} ({})",
            camera.info().human_name(),
            camera.camera_format()
        );

        Ok(Self { camera })
    }
}

impl FrameSource for DeviceSource {
    fn name(&self) -> String {
        self.camera.info().human_name()
    }

    fn grab(&mut self) -> Result<RgbImage> {
        let frame = self
            .camera
            .frame()
            .map_err(|e| anyhow!(e))
            .context("Failed to get frame")?;
        let decoded = frame
            .decode_image::<RgbFormat>()
            .map_err(|e| anyhow!(e))
            .context("Failed to decode frame")?;

        let (width, height) = decoded.dimensions();
        RgbImage::from_raw(width, height, decoded.into_raw())
            .ok_or_else(|| anyhow!("Camera frame buffer does not match {}x{}", width, height))
    }
}

/// Serves the same still image as every frame
pub struct StillSource {
    name: String,
    frame: RgbImage,
}

impl StillSource {
    pub fn open(path: &Path) -> Result<Self> {
        let image = image::open(path).with_context(|| format!("Failed to open still image {:?}", path))?;
        Ok(Self {
            name: path.display().to_string(),
            frame: image.to_rgb8(),
        })
    }

    pub fn from_image(name: &str, image: DynamicImage) -> Self {
        Self {
            name: name.to_string(),
            frame: image.to_rgb8(),
        }
    }
}

impl FrameSource for StillSource {
    fn name(&self) -> String {
        self.name.clone()
    }

    fn grab(&mut self) -> Result<RgbImage> {
        Ok(self.frame.clone())
    }
}

/// A camera as reported by the platform
#[derive(Debug, Clone)]
pub struct CameraDescription {
    pub index: String,
    pub name: String,
    pub misc: String,
}

/// Enumerate the cameras nokhwa can see
pub fn list_cameras() -> Result<Vec<CameraDescription>> {
    let cameras = nokhwa::query(ApiBackend::Auto)
        .map_err(|e| anyhow!(e))
        .context("Failed to query cameras")?;

    Ok(cameras
        .into_iter()
        .map(|cam| CameraDescription {
            index: cam.index().to_string(),
            name: cam.human_name(),
            misc: cam.misc(),
        })
        .collect())
}
