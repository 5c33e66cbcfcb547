//! Tract segmentation backend
//!
//! Pure Rust inference on the CPU. Slower than ONNX Runtime, but needs no
//! native libraries, which makes it the fallback for machines without them.

use crate::config::SegmentationConfig;
use crate::error::{CutoutError, Result};
use crate::inference::{into_array4, InferenceBackend};
use crate::models::{ModelInfo, ModelManager, PreprocessingConfig};
use ndarray::Array4;
use std::time::{Duration, Instant};
use tract_onnx::prelude::*;

type TractModel = RunnableModel<TypedFact, Box<dyn TypedOp>, Graph<TypedFact, Box<dyn TypedOp>>>;

/// Tract backend
#[derive(Debug, Default)]
pub struct TractBackend {
    model: Option<TractModel>,
    model_manager: Option<ModelManager>,
}

impl TractBackend {
    /// Tract only runs on the CPU
    pub fn list_providers() -> Vec<(String, bool, String)> {
        vec![(
            "CPU".to_string(),
            true,
            "Pure Rust CPU inference with no external dependencies".to_string(),
        )]
    }

    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a backend around an already resolved model
    #[must_use]
    pub fn with_model_manager(model_manager: ModelManager) -> Self {
        Self {
            model: None,
            model_manager: Some(model_manager),
        }
    }

    fn load_model(&mut self, config: &SegmentationConfig) -> Result<Duration> {
        let start = Instant::now();

        if self.model_manager.is_none() {
            // Tract has no accelerators; resolve variants as for the CPU
            self.model_manager = Some(ModelManager::from_spec(
                &config.model_spec,
                crate::config::ExecutionProvider::Cpu,
            )?);
        }
        let manager = self
            .model_manager
            .as_ref()
            .ok_or_else(|| CutoutError::internal("Model manager missing after insertion"))?;

        let model_data = manager.load_model()?;
        log::info!("Initializing Tract backend with {}", manager.label());

        let model = onnx()
            .model_for_read(&mut std::io::Cursor::new(model_data))
            .map_err(|e| CutoutError::model(format!("Failed to load ONNX model: {e}")))?
            .into_optimized()
            .map_err(|e| CutoutError::model(format!("Failed to optimize model: {e}")))?
            .into_runnable()
            .map_err(|e| CutoutError::model(format!("Failed to create runnable model: {e}")))?;

        self.model = Some(model);
        let elapsed = start.elapsed();
        log::info!("Tract backend initialized in {}ms", elapsed.as_millis());
        Ok(elapsed)
    }

    fn manager(&self) -> Result<&ModelManager> {
        self.model_manager
            .as_ref()
            .ok_or_else(|| CutoutError::internal("Model manager not initialized"))
    }
}

impl InferenceBackend for TractBackend {
    fn initialize(&mut self, config: &SegmentationConfig) -> Result<Option<Duration>> {
        if self.model.is_some() {
            return Ok(None);
        }
        self.load_model(config).map(Some)
    }

    fn infer(&mut self, input: &Array4<f32>) -> Result<Array4<f32>> {
        let model = self
            .model
            .as_ref()
            .ok_or_else(|| CutoutError::internal("Backend not initialized"))?;

        let start = Instant::now();
        let input_tensor = Tensor::from(input.clone());
        let outputs = model
            .run(tvec![input_tensor.into()])
            .map_err(|e| CutoutError::inference(format!("Tract inference failed: {e}")))?;

        let output = outputs
            .into_iter()
            .next()
            .ok_or_else(|| CutoutError::inference("No output tensor found"))?
            .into_arc_tensor();
        let view = output
            .to_array_view::<f32>()
            .map_err(|e| CutoutError::inference(format!("Failed to convert output tensor: {e}")))?;

        let shape = view.shape().to_vec();
        let data: Vec<f32> = view.iter().copied().collect();
        log::debug!(
            "Tract inference produced {shape:?} in {}ms",
            start.elapsed().as_millis()
        );
        into_array4(&shape, data)
    }

    fn get_preprocessing_config(&self) -> Result<PreprocessingConfig> {
        Ok(self.manager()?.get_preprocessing_config())
    }

    fn get_model_info(&self) -> Result<ModelInfo> {
        self.manager()?.get_info()
    }

    fn is_initialized(&self) -> bool {
        self.model.is_some()
    }

    fn name(&self) -> &'static str {
        "tract"
    }
}
