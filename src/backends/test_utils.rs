//! Test doubles for inference backends
//!
//! `MockInferenceBackend` records the calls it receives and returns a mask
//! whose central half is foreground, which keeps segmentation tests fast and
//! independent of any model files.

use crate::config::{BackendType, SegmentationConfig};
use crate::error::{CutoutError, Result};
use crate::inference::InferenceBackend;
use crate::models::{ModelInfo, PreprocessingConfig};
use crate::segmentation::BackendFactory;
use ndarray::Array4;
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Canvas size reported by the mock preprocessing config
pub const MOCK_INPUT_SIZE: u32 = 8;

#[derive(Debug)]
pub struct MockInferenceBackend {
    initialized: bool,
    fail_init: bool,
    fail_inference: bool,
    calls: Arc<Mutex<Vec<String>>>,
}

impl MockInferenceBackend {
    #[must_use]
    pub fn new() -> Self {
        Self {
            initialized: false,
            fail_init: false,
            fail_inference: false,
            calls: Arc::new(Mutex::new(Vec::new())),
        }
    }

    #[must_use]
    pub fn new_failing_init() -> Self {
        Self {
            fail_init: true,
            ..Self::new()
        }
    }

    #[must_use]
    pub fn new_failing_inference() -> Self {
        Self {
            fail_inference: true,
            ..Self::new()
        }
    }

    /// Shared handle on the call history, usable after the backend is boxed
    #[must_use]
    pub fn call_log(&self) -> Arc<Mutex<Vec<String>>> {
        Arc::clone(&self.calls)
    }

    fn record_call(&self, method: &str) {
        if let Ok(mut calls) = self.calls.lock() {
            calls.push(method.to_string());
        }
    }

    fn mock_mask(input: &Array4<f32>) -> Array4<f32> {
        let (_, _, height, width) = input.dim();
        Array4::from_shape_fn((1, 1, height, width), |(_, _, y, x)| {
            let inside_y = y >= height / 4 && y < height * 3 / 4;
            let inside_x = x >= width / 4 && x < width * 3 / 4;
            if inside_y && inside_x {
                1.0
            } else {
                0.0
            }
        })
    }
}

impl Default for MockInferenceBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl InferenceBackend for MockInferenceBackend {
    fn initialize(&mut self, _config: &SegmentationConfig) -> Result<Option<Duration>> {
        self.record_call("initialize");
        if self.fail_init {
            return Err(CutoutError::model("Mock initialization failure"));
        }
        if self.initialized {
            return Ok(None);
        }
        self.record_call("load");
        self.initialized = true;
        Ok(Some(Duration::from_millis(1)))
    }

    fn infer(&mut self, input: &Array4<f32>) -> Result<Array4<f32>> {
        self.record_call("infer");
        if !self.initialized {
            return Err(CutoutError::internal("Backend not initialized"));
        }
        if self.fail_inference {
            return Err(CutoutError::inference("Mock inference failure"));
        }
        Ok(Self::mock_mask(input))
    }

    fn get_preprocessing_config(&self) -> Result<PreprocessingConfig> {
        Ok(PreprocessingConfig {
            target_size: [MOCK_INPUT_SIZE, MOCK_INPUT_SIZE],
            normalization_mean: [0.5, 0.5, 0.5],
            normalization_std: [1.0, 1.0, 1.0],
        })
    }

    fn get_model_info(&self) -> Result<ModelInfo> {
        let size = MOCK_INPUT_SIZE as usize;
        Ok(ModelInfo {
            name: "mock-fp32".to_string(),
            precision: "fp32".to_string(),
            size_bytes: 0,
            input_shape: (1, 3, size, size),
            output_shape: (1, 1, size, size),
        })
    }

    fn is_initialized(&self) -> bool {
        self.initialized
    }

    fn name(&self) -> &'static str {
        "mock"
    }
}

/// Factory handing out mock backends for any model backend type
pub struct MockBackendFactory {
    fail_init: bool,
}

impl MockBackendFactory {
    #[must_use]
    pub fn new() -> Self {
        Self { fail_init: false }
    }

    /// Backends from this factory fail to load their model
    #[must_use]
    pub fn new_failing() -> Self {
        Self { fail_init: true }
    }
}

impl Default for MockBackendFactory {
    fn default() -> Self {
        Self::new()
    }
}

impl BackendFactory for MockBackendFactory {
    fn create_backend(
        &self,
        backend_type: BackendType,
        _config: &SegmentationConfig,
    ) -> Result<Box<dyn InferenceBackend>> {
        if !backend_type.requires_model() {
            return Err(CutoutError::invalid_config(format!(
                "{backend_type} does not use an inference backend"
            )));
        }
        if self.fail_init {
            Ok(Box::new(MockInferenceBackend::new_failing_init()))
        } else {
            Ok(Box::new(MockInferenceBackend::new()))
        }
    }

    fn available_backends(&self) -> Vec<BackendType> {
        vec![BackendType::Onnx, BackendType::Tract]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mock_mask_shape_follows_input() {
        let mut backend = MockInferenceBackend::new();
        backend.initialize(&SegmentationConfig::default()).unwrap();

        let output = backend.infer(&Array4::zeros((1, 3, 12, 8))).unwrap();
        assert_eq!(output.shape(), &[1, 1, 12, 8]);
        assert!((output[[0, 0, 6, 4]] - 1.0).abs() < f32::EPSILON);
        assert!(output[[0, 0, 0, 0]].abs() < f32::EPSILON);
    }

    #[test]
    fn test_infer_requires_initialization() {
        let mut backend = MockInferenceBackend::new();
        assert!(backend.infer(&Array4::zeros((1, 3, 4, 4))).is_err());
    }

    #[test]
    fn test_mock_factory_only_builds_model_backends() {
        let factory = MockBackendFactory::new();
        let config = SegmentationConfig::default();
        assert!(factory.create_backend(BackendType::Onnx, &config).is_ok());
        assert!(factory.create_backend(BackendType::ColorKey, &config).is_err());
        assert_eq!(factory.available_backends().len(), 2);
    }
}
