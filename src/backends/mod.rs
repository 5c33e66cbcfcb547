//! Segmentation backends
//!
//! - ONNX Runtime backend (native, GPU acceleration)
//! - Tract backend (pure Rust, CPU only)
//! - Colour-key segmenter (no model, uniform backdrops)

pub mod colorkey;

#[cfg(feature = "onnx")]
pub mod onnx;

#[cfg(feature = "tract")]
pub mod tract;

#[cfg(test)]
pub mod test_utils;

pub use self::colorkey::ColorKeySegmenter;

#[cfg(feature = "onnx")]
pub use self::onnx::OnnxBackend;

#[cfg(feature = "tract")]
pub use self::tract::TractBackend;
