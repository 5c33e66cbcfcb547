#![allow(clippy::missing_errors_doc)]
#![allow(clippy::missing_panics_doc)]
#![allow(clippy::uninlined_format_args)]

//! # Product Cutout
//!
//! Batch background removal for product photography. Each listed image is
//! segmented, optionally flattened onto a solid backdrop, written next to the
//! input with a normalised extension, and lossy originals (JPEG by default)
//! are removed once the cutout exists. Missing inputs are skipped and failing
//! inputs are reported without stopping the batch.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use product_cutout::{
//!     create_segmenter, BatchConfig, BatchProcessor, ConsoleProgressReporter,
//!     SegmentationConfig,
//! };
//!
//! # fn example() -> anyhow::Result<()> {
//! let segmenter = create_segmenter(&SegmentationConfig::default())?;
//! let mut processor = BatchProcessor::new(BatchConfig::default(), segmenter)?
//!     .with_reporter(Box::new(ConsoleProgressReporter));
//!
//! let summary = processor.run(&["shop/glass-1.jpg", "shop/glass-2.jpg"]);
//! println!("{} saved, {} failed", summary.saved(), summary.failed());
//! # Ok(())
//! # }
//! ```
//!
//! ## Segmenters
//!
//! - ONNX Runtime (`onnx` feature): CPU, CUDA or `CoreML` execution
//! - Tract (`tract` feature): pure Rust CPU inference
//! - Colour key: no model, removes a uniform backdrop connected to the border
//!
//! Model-backed segmenters read HuggingFace-style model directories, either
//! from a path or from the download cache (see [`ModelCache`] and
//! [`ModelDownloader`]).
//!
//! ### Feature Flags
//!
//! - `onnx` (default): ONNX Runtime backend
//! - `tract` (default): Tract backend
//! - `cli` (default): the `product-cutout` binary and progress bars
//! - `webp-support` (default): WebP output
//! - `tracing-json`: JSON log output for the CLI

pub mod backends;
pub mod batch;
pub mod cache;
#[cfg(feature = "cli")]
pub mod cli;
pub mod config;
pub mod defaults;
pub mod download;
pub mod error;
pub mod inference;
pub mod job;
pub mod models;
pub mod segmentation;
pub mod services;
pub mod tracing_config;
pub mod utils;

pub use backends::ColorKeySegmenter;
#[cfg(feature = "onnx")]
pub use backends::OnnxBackend;
#[cfg(feature = "tract")]
pub use backends::TractBackend;
pub use batch::{BatchProcessor, BatchSummary, JobError, JobOutcome, JobReport};
pub use cache::{format_size, CachedModelInfo, ModelCache};
pub use config::{
    BackdropColor, BackendType, BatchConfig, BatchConfigBuilder, BatchManifest, CompositingMode,
    ExecutionProvider, OutputFormat, SegmentationConfig,
};
pub use download::{parse_huggingface_url, validate_model_url, ModelDownloader};
pub use error::{CutoutError, Result};
pub use inference::InferenceBackend;
pub use job::ImageJob;
pub use models::{ModelManager, ModelSource, ModelSpec};
pub use segmentation::{
    create_segmenter, create_segmenter_with_factory, BackendFactory, DefaultBackendFactory,
    ModelSegmenter, Segmenter,
};
pub use services::{
    BackdropCompositor, ConsoleProgressReporter, ImageIOService, NoOpProgressReporter,
    OutputFormatHandler, ProgressEvent, ProgressReporter, RecordingProgressReporter,
};
#[cfg(feature = "cli")]
pub use tracing_config::init_cli_tracing;
pub use tracing_config::{spans, TracingConfig, TracingFormat};

use std::path::Path;

/// Process `paths` with a segmenter built from `segmentation`
///
/// Progress lines are printed to stdout.
///
/// ```rust,no_run
/// use product_cutout::{remove_backgrounds, BackendType, BatchConfig, SegmentationConfig};
///
/// # fn example() -> anyhow::Result<()> {
/// let segmentation = SegmentationConfig {
///     backend: BackendType::ColorKey,
///     ..SegmentationConfig::default()
/// };
/// let summary = remove_backgrounds(&["a.jpg", "b.png"], BatchConfig::default(), &segmentation)?;
/// assert_eq!(summary.reports.len(), 2);
/// # Ok(())
/// # }
/// ```
///
/// # Errors
/// - the batch configuration is invalid
/// - the segmenter cannot be created
pub fn remove_backgrounds<P: AsRef<Path>>(
    paths: &[P],
    config: BatchConfig,
    segmentation: &SegmentationConfig,
) -> Result<BatchSummary> {
    let segmenter = create_segmenter(segmentation)?;
    let mut processor =
        BatchProcessor::new(config, segmenter)?.with_reporter(Box::new(ConsoleProgressReporter));
    Ok(processor.run(paths))
}
