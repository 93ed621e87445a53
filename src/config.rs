//! Application configuration

use serde::Deserialize;
use std::path::PathBuf;

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    pub server: ServerConfig,
    pub camera: CameraConfig,
    pub models: ModelsConfig,
    pub ocr: OcrConfig,
    pub location: LocationConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub port: u16,
    pub static_dir: PathBuf,
}

/// Where capture frames come from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CameraSourceKind {
    Device,
    Still,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CameraConfig {
    pub source: CameraSourceKind,
    pub index: u32,
    /// Image served as the camera feed when `source = "still"`
    pub still_path: Option<PathBuf>,
    pub jpeg_quality: u8,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ModelsConfig {
    pub base_path: PathBuf,
    pub detector: String,
    pub gender_age: String,
    pub device: String,
    pub confidence_threshold: f32,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct OcrConfig {
    pub language: String,
    pub dpi: i32,
    pub psm: i32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LocationProviderKind {
    Geoclue,
    Static,
    None,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LocationConfig {
    pub provider: LocationProviderKind,
    pub desktop_id: String,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
}

impl Config {
    pub fn load(path: &str) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)?;
        Ok(config)
    }

    pub fn default_path() -> &'static str {
        "config.toml"
    }
}

impl ModelsConfig {
    pub fn detector_path(&self) -> PathBuf {
        self.base_path.join(&self.detector)
    }

    pub fn gender_age_path(&self) -> PathBuf {
        self.base_path.join(&self.gender_age)
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: 3000,
            static_dir: PathBuf::from("static"),
        }
    }
}

impl Default for CameraConfig {
    fn default() -> Self {
        Self {
            source: CameraSourceKind::Device,
            index: 0,
            still_path: None,
            jpeg_quality: 90,
        }
    }
}

impl Default for ModelsConfig {
    fn default() -> Self {
        Self {
            base_path: PathBuf::from("models"),
            detector: "det_10g.onnx".to_string(),
            gender_age: "genderage.onnx".to_string(),
            device: "CPU".to_string(),
            confidence_threshold: 0.5,
        }
    }
}

impl Default for OcrConfig {
    fn default() -> Self {
        Self {
            language: "eng".to_string(),
            dpi: 150,
            psm: 3,
        }
    }
}

impl Default for LocationConfig {
    fn default() -> Self {
        Self {
            provider: LocationProviderKind::Geoclue,
            desktop_id: "snaplens".to_string(),
            latitude: None,
            longitude: None,
        }
    }
}
