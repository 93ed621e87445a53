//! Model Pool
//!
//! Owns the OpenVINO core and the two compiled models used for face
//! analysis. Models are compiled once at startup and kept for the life of
//! the process.

use std::ops::Deref;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use anyhow::{anyhow, Context};
use openvino::{CompiledModel, Core};
use parking_lot::RwLock;
use tracing::info;

use crate::config::ModelsConfig;

/// Wrapper for OpenVINO Core that implements Send + Sync
pub struct SafeCore(Core);
unsafe impl Send for SafeCore {}
unsafe impl Sync for SafeCore {}

impl Deref for SafeCore {
    type Target = Core;
    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl std::ops::DerefMut for SafeCore {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.0
    }
}

/// Wrapper for OpenVINO CompiledModel that implements Send + Sync
#[derive(Clone)]
pub struct SafeCompiledModel(pub Arc<CompiledModel>);
unsafe impl Send for SafeCompiledModel {}
unsafe impl Sync for SafeCompiledModel {}

impl SafeCompiledModel {
    /// Create an inference request
    /// OpenVINO CompiledModel methods are thread-safe in C++, but Rust bindings
    /// require &mut self. We bypass this restriction safely.
    pub fn create_infer_request(&self) -> anyhow::Result<openvino::InferRequest> {
        unsafe {
            let ptr = Arc::as_ptr(&self.0) as *mut CompiledModel;
            (*ptr).create_infer_request().map_err(|e| e.into())
        }
    }
}

impl Deref for SafeCompiledModel {
    type Target = CompiledModel;
    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

/// Models needed for face analysis
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ModelType {
    Detector,
    GenderAge,
}

impl ModelType {
    pub const ALL: [ModelType; 2] = [ModelType::Detector, ModelType::GenderAge];

    pub fn as_str(&self) -> &'static str {
        match self {
            ModelType::Detector => "detector",
            ModelType::GenderAge => "gender_age",
        }
    }
}

/// Compiled model cache
pub struct ModelPool {
    core: RwLock<Option<SafeCore>>,
    device: String,

    detector_path: PathBuf,
    gender_age_path: PathBuf,

    detector: RwLock<Option<SafeCompiledModel>>,
    gender_age: RwLock<Option<SafeCompiledModel>>,
}

impl ModelPool {
    /// Create an empty pool. The OpenVINO core is created on first load so
    /// that constructing the pool never touches the runtime.
    pub fn new(config: &ModelsConfig) -> Self {
        Self {
            core: RwLock::new(None),
            device: config.device.clone(),
            detector_path: config.detector_path(),
            gender_age_path: config.gender_age_path(),
            detector: RwLock::new(None),
            gender_age: RwLock::new(None),
        }
    }

    fn slot(&self, model_type: ModelType) -> (&RwLock<Option<SafeCompiledModel>>, &Path) {
        match model_type {
            ModelType::Detector => (&self.detector, &self.detector_path),
            ModelType::GenderAge => (&self.gender_age, &self.gender_age_path),
        }
    }

    /// Read and compile a model. Loading an already loaded model is a no-op.
    pub fn load(&self, model_type: ModelType) -> anyhow::Result<()> {
        let (cache, path) = self.slot(model_type);

        let mut write_guard = cache.write();
        if write_guard.is_some() {
            return Ok(());
        }

        let path_str = path
            .to_str()
            .ok_or_else(|| anyhow!("Model path is not valid UTF-8: {:?}", path))?;

        info!("Loading model: {} from {}", model_type.as_str(), path_str);
        let start = Instant::now();

        // Core methods like read_model require &mut self in Rust bindings
        let mut core_guard = self.core.write();
        if core_guard.is_none() {
            let core = Core::new().context("Failed to initialize OpenVINO runtime")?;
            *core_guard = Some(SafeCore(core));
        }
        let core = core_guard
            .as_mut()
            .ok_or_else(|| anyhow!("OpenVINO core unavailable"))?;

        let model = core
            .read_model_from_file(path_str, "")
            .with_context(|| format!("Failed to read model {}", path_str))?;
        let compiled = core
            .compile_model(&model, self.device.as_str().into())
            .with_context(|| format!("Failed to compile {} for {}", model_type.as_str(), self.device))?;

        info!("Model {} loaded in {:?}", model_type.as_str(), start.elapsed());

        *write_guard = Some(SafeCompiledModel(Arc::new(compiled)));
        Ok(())
    }

    /// Get a loaded model
    pub fn get_model(&self, model_type: ModelType) -> anyhow::Result<SafeCompiledModel> {
        let (cache, _) = self.slot(model_type);
        cache
            .read()
            .clone()
            .ok_or_else(|| anyhow!("Model {} is not loaded", model_type.as_str()))
    }
}
