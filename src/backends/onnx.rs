//! ONNX Runtime segmentation backend
//!
//! Runs a salient-object model through ONNX Runtime with CPU, CUDA or `CoreML`
//! execution. Requested accelerators that are not available fall back to CPU
//! with a warning rather than failing the batch.

use crate::config::{ExecutionProvider, SegmentationConfig};
use crate::error::{CutoutError, Result};
use crate::inference::{into_array4, InferenceBackend};
use crate::models::{ModelInfo, ModelManager, PreprocessingConfig};
use ndarray::Array4;
use ort::execution_providers::{
    CUDAExecutionProvider, CoreMLExecutionProvider, ExecutionProvider as OrtExecutionProvider,
    ExecutionProviderDispatch,
};
use ort::session::{builder::GraphOptimizationLevel, builder::SessionBuilder, Session};
use ort::value::Value;
use std::time::{Duration, Instant};

/// ONNX Runtime backend
#[derive(Debug, Default)]
pub struct OnnxBackend {
    session: Option<Session>,
    model_manager: Option<ModelManager>,
}

impl OnnxBackend {
    /// List ONNX Runtime execution providers as `(name, available, description)`
    ///
    /// ```rust
    /// use product_cutout::backends::OnnxBackend;
    ///
    /// let providers = OnnxBackend::list_providers();
    /// assert!(providers.iter().any(|(name, available, _)| name == "CPU" && *available));
    /// ```
    pub fn list_providers() -> Vec<(String, bool, String)> {
        log::debug!(
            "Probing execution providers on {os}/{arch}",
            os = std::env::consts::OS,
            arch = std::env::consts::ARCH
        );

        let cuda_available = cuda_available();
        let coreml_available = coreml_available();
        if !coreml_available && cfg!(target_os = "macos") {
            log::warn!("CoreML execution provider is not available on this Mac");
        }

        vec![
            (
                "CPU".to_string(),
                true,
                "Always available, uses CPU for inference".to_string(),
            ),
            (
                "CUDA".to_string(),
                cuda_available,
                "NVIDIA GPU acceleration (requires CUDA toolkit and compatible GPU)".to_string(),
            ),
            (
                "CoreML".to_string(),
                coreml_available,
                "Apple Silicon GPU acceleration (macOS only)".to_string(),
            ),
        ]
    }

    /// Create a backend around an already resolved model
    #[must_use]
    pub fn with_model_manager(model_manager: ModelManager) -> Self {
        Self {
            session: None,
            model_manager: Some(model_manager),
        }
    }

    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn execution_providers(provider: ExecutionProvider) -> Vec<ExecutionProviderDispatch> {
        let mut providers = Vec::new();
        match provider {
            ExecutionProvider::Auto => {
                if cuda_available() {
                    log::info!("CUDA execution provider is available and will be used");
                    providers.push(CUDAExecutionProvider::default().build());
                }
                if coreml_available() {
                    log::info!("CoreML execution provider is available and will be used");
                    providers.push(CoreMLExecutionProvider::default().with_subgraphs(true).build());
                }
                if providers.is_empty() {
                    log::info!("No hardware acceleration available, using CPU");
                }
            },
            ExecutionProvider::Cpu => log::info!("Using CPU execution provider"),
            ExecutionProvider::Cuda => {
                if cuda_available() {
                    log::info!("Using CUDA execution provider");
                    providers.push(CUDAExecutionProvider::default().build());
                } else {
                    log::warn!("CUDA requested but not available, falling back to CPU");
                }
            },
            ExecutionProvider::CoreMl => {
                if coreml_available() {
                    log::info!("Using CoreML execution provider");
                    providers.push(CoreMLExecutionProvider::default().with_subgraphs(true).build());
                } else {
                    log::warn!("CoreML requested but not available, falling back to CPU");
                }
            },
        }
        providers
    }

    fn thread_counts(config: &SegmentationConfig) -> (usize, usize) {
        let cores = std::thread::available_parallelism()
            .map(std::num::NonZero::get)
            .unwrap_or(8);
        let intra = if config.intra_threads > 0 {
            config.intra_threads
        } else {
            cores
        };
        let inter = if config.inter_threads > 0 {
            config.inter_threads
        } else {
            (cores / 4).max(1)
        };
        (intra, inter)
    }

    fn session_builder(config: &SegmentationConfig) -> Result<SessionBuilder> {
        let (intra_threads, inter_threads) = Self::thread_counts(config);
        let mut builder = Session::builder()
            .and_then(|b| b.with_optimization_level(GraphOptimizationLevel::Level3))
            .map_err(|e| CutoutError::inference(format!("Failed to create session builder: {e}")))?;

        let providers = Self::execution_providers(config.execution_provider);
        if !providers.is_empty() {
            builder = builder.with_execution_providers(providers).map_err(|e| {
                CutoutError::inference(format!("Failed to set execution providers: {e}"))
            })?;
        }

        log::debug!("Threading: {intra_threads} intra-op, {inter_threads} inter-op");
        builder
            .with_parallel_execution(true)
            .and_then(|b| b.with_intra_threads(intra_threads))
            .and_then(|b| b.with_inter_threads(inter_threads))
            .map_err(|e| CutoutError::inference(format!("Failed to configure threads: {e}")))
    }

    fn load_model(&mut self, config: &SegmentationConfig) -> Result<Duration> {
        let start = Instant::now();

        if self.model_manager.is_none() {
            self.model_manager = Some(ModelManager::from_spec(
                &config.model_spec,
                config.execution_provider,
            )?);
        }
        let manager = self
            .model_manager
            .as_ref()
            .ok_or_else(|| CutoutError::internal("Model manager missing after insertion"))?;

        let model_data = manager.load_model()?;
        let session = Self::session_builder(config)?
            .commit_from_memory(&model_data)
            .map_err(|e| {
                CutoutError::inference(format!("Failed to create session from model data: {e}"))
            })?;

        let info = manager.get_info()?;
        #[allow(clippy::cast_precision_loss)]
        let size_mb = info.size_bytes as f64 / (1024.0 * 1024.0);
        log::debug!(
            "ONNX session ready: {} ({}), {size_mb:.2} MB, provider {}",
            manager.label(),
            info.precision,
            config.execution_provider
        );

        self.session = Some(session);
        let elapsed = start.elapsed();
        log::info!("Model loaded in {:.0}ms", elapsed.as_secs_f64() * 1000.0);
        Ok(elapsed)
    }

    fn manager(&self) -> Result<&ModelManager> {
        self.model_manager
            .as_ref()
            .ok_or_else(|| CutoutError::internal("Model manager not initialized"))
    }
}

fn cuda_available() -> bool {
    OrtExecutionProvider::is_available(&CUDAExecutionProvider::default()).unwrap_or(false)
}

fn coreml_available() -> bool {
    OrtExecutionProvider::is_available(&CoreMLExecutionProvider::default()).unwrap_or(false)
}

impl InferenceBackend for OnnxBackend {
    fn initialize(&mut self, config: &SegmentationConfig) -> Result<Option<Duration>> {
        if self.session.is_some() {
            return Ok(None);
        }
        self.load_model(config).map(Some)
    }

    fn infer(&mut self, input: &Array4<f32>) -> Result<Array4<f32>> {
        let session = self
            .session
            .as_mut()
            .ok_or_else(|| CutoutError::internal("Backend not initialized"))?;

        let start = Instant::now();
        let input_value = Value::from_array(input.clone())
            .map_err(|e| CutoutError::inference(format!("Failed to convert input tensor: {e}")))?;

        // Positional input and output avoid depending on tensor names
        let outputs = session
            .run(ort::inputs![input_value])
            .map_err(|e| CutoutError::inference(format!("ONNX inference failed: {e}")))?;
        let first_key = outputs
            .keys()
            .next()
            .ok_or_else(|| CutoutError::inference("Model produced no outputs"))?;
        let output = outputs
            .get(first_key)
            .ok_or_else(|| CutoutError::inference("First output tensor not found"))?
            .try_extract_array::<f32>()
            .map_err(|e| CutoutError::inference(format!("Failed to extract output tensor: {e}")))?;

        let shape = output.shape().to_vec();
        let data: Vec<f32> = output.iter().copied().collect();
        log::debug!(
            "Inference produced {shape:?} in {:.2}ms",
            start.elapsed().as_secs_f64() * 1000.0
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
        self.session.is_some()
    }

    fn name(&self) -> &'static str {
        "onnx"
    }
}
