//! Inference backend abstraction

use crate::{
    config::SegmentationConfig,
    error::{CutoutError, Result},
    models::{ModelInfo, PreprocessingConfig},
};
use ndarray::Array4;
use std::time::Duration;

/// Trait for neural inference backends
pub trait InferenceBackend {
    /// Load the model and prepare a session
    ///
    /// Returns the model load time when a model was loaded.
    ///
    /// # Errors
    /// - model loading or validation errors
    /// - session construction failures
    fn initialize(&mut self, config: &SegmentationConfig) -> Result<Option<Duration>>;

    /// Run inference on a `1x3xHxW` input tensor
    ///
    /// # Errors
    /// - backend not initialized
    /// - model inference failures
    /// - unexpected output tensor shape
    fn infer(&mut self, input: &Array4<f32>) -> Result<Array4<f32>>;

    /// Preprocessing the loaded model expects
    ///
    /// # Errors
    /// - backend not initialized
    fn get_preprocessing_config(&self) -> Result<PreprocessingConfig>;

    /// Metadata of the loaded model
    ///
    /// # Errors
    /// - backend not initialized
    /// - model metadata unavailable
    fn get_model_info(&self) -> Result<ModelInfo>;

    fn is_initialized(&self) -> bool;

    /// Short backend name for logs
    fn name(&self) -> &'static str;
}

/// Reshape a flat output buffer into a 4-D tensor
///
/// # Errors
/// - the shape is not 4-D or does not match the data length
pub(crate) fn into_array4(shape: &[usize], data: Vec<f32>) -> Result<Array4<f32>> {
    let &[n, c, h, w] = shape else {
        return Err(CutoutError::inference(format!(
            "Expected a 4-D output tensor, got shape {shape:?}"
        )));
    };
    Array4::from_shape_vec((n, c, h, w), data).map_err(|e| {
        CutoutError::inference(format!("Output tensor does not match shape {shape:?}: {e}"))
    })
}
