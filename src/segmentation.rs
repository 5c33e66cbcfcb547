//! Foreground segmentation
//!
//! A [`Segmenter`] turns encoded image bytes into a PNG with an alpha channel
//! where the background is transparent. [`ModelSegmenter`] runs a salient
//! object model through an [`InferenceBackend`]; the colour-key segmenter in
//! [`crate::backends::colorkey`] needs no model at all.

use crate::{
    backends::ColorKeySegmenter,
    config::{BackendType, SegmentationConfig},
    error::{CutoutError, Result},
    inference::InferenceBackend,
    services::ImageIOService,
    utils::{ImagePreprocessor, Letterbox},
};
use image::{ImageFormat, Rgba, RgbaImage};
use ndarray::Array4;
use std::io::Cursor;
use std::time::Instant;

/// Removes the background from one encoded image
pub trait Segmenter {
    /// Name used in logs
    fn name(&self) -> &str;

    /// Segment `image_bytes`, returning PNG bytes with alpha
    ///
    /// # Errors
    /// - the bytes are not a decodable image
    /// - model loading or inference fails
    /// - PNG encoding fails
    fn segment(&mut self, image_bytes: &[u8]) -> Result<Vec<u8>>;
}

/// Creates inference backends for model-based segmentation
pub trait BackendFactory: Send + Sync {
    /// Create an uninitialized backend of the given type
    ///
    /// # Errors
    /// - the backend type is not compiled into this build or needs no model
    fn create_backend(
        &self,
        backend_type: BackendType,
        config: &SegmentationConfig,
    ) -> Result<Box<dyn InferenceBackend>>;

    /// Model backends available in this build
    fn available_backends(&self) -> Vec<BackendType>;
}

/// Factory for the backends enabled by cargo features
pub struct DefaultBackendFactory;

impl BackendFactory for DefaultBackendFactory {
    fn create_backend(
        &self,
        backend_type: BackendType,
        _config: &SegmentationConfig,
    ) -> Result<Box<dyn InferenceBackend>> {
        match backend_type {
            #[cfg(feature = "onnx")]
            BackendType::Onnx => Ok(Box::new(crate::backends::OnnxBackend::new())),
            #[cfg(feature = "tract")]
            BackendType::Tract => Ok(Box::new(crate::backends::TractBackend::new())),
            BackendType::ColorKey => Err(CutoutError::invalid_config(
                "The colorkey backend does not use an inference backend",
            )),
            #[allow(unreachable_patterns)]
            other => Err(CutoutError::invalid_config(format!(
                "The {other} backend is not enabled in this build"
            ))),
        }
    }

    fn available_backends(&self) -> Vec<BackendType> {
        let mut backends = Vec::new();
        if cfg!(feature = "onnx") {
            backends.push(BackendType::Onnx);
        }
        if cfg!(feature = "tract") {
            backends.push(BackendType::Tract);
        }
        backends
    }
}

/// Segmenter backed by a neural inference backend
pub struct ModelSegmenter {
    backend: Box<dyn InferenceBackend>,
    config: SegmentationConfig,
}

impl ModelSegmenter {
    /// Wrap a backend; the model is loaded on first use
    #[must_use]
    pub fn new(backend: Box<dyn InferenceBackend>, config: SegmentationConfig) -> Self {
        Self { backend, config }
    }

    /// Load the model now instead of on the first image
    ///
    /// # Errors
    /// - model resolution, loading or session creation fails
    pub fn initialize(&mut self) -> Result<()> {
        if let Some(load_time) = self.backend.initialize(&self.config)? {
            tracing::info!(
                backend = self.backend.name(),
                load_ms = load_time.as_millis() as u64,
                "Segmentation model loaded"
            );
        }
        Ok(())
    }

    #[must_use]
    pub fn is_initialized(&self) -> bool {
        self.backend.is_initialized()
    }

    /// Segment an already decoded image
    ///
    /// # Errors
    /// - model loading or inference fails
    /// - the model output is not a `1x1xHxW` tensor
    pub fn segment_image(&mut self, image: &image::DynamicImage) -> Result<RgbaImage> {
        self.initialize()?;

        let start = Instant::now();
        let preprocessing = self.backend.get_preprocessing_config()?;
        let (input, letterbox) = ImagePreprocessor::preprocess_for_inference(image, &preprocessing)?;
        let output = self.backend.infer(&input)?;
        let mask = tensor_to_mask(&output, &letterbox)?;
        let result = apply_mask(&image.to_rgba8(), &mask);

        log::debug!(
            "Segmented {}x{} image in {}ms",
            result.width(),
            result.height(),
            start.elapsed().as_millis()
        );
        Ok(result)
    }
}

impl Segmenter for ModelSegmenter {
    fn name(&self) -> &str {
        self.backend.name()
    }

    fn segment(&mut self, image_bytes: &[u8]) -> Result<Vec<u8>> {
        let image = ImageIOService::load_from_bytes(image_bytes)?;
        encode_png(&self.segment_image(&image)?)
    }
}

/// Build the segmenter described by `config`
///
/// Model backends are initialized here so that a missing or broken model is
/// reported before any image is touched.
///
/// # Errors
/// - the backend is not enabled in this build
/// - the model cannot be loaded
pub fn create_segmenter(config: &SegmentationConfig) -> Result<Box<dyn Segmenter>> {
    create_segmenter_with_factory(config, &DefaultBackendFactory)
}

/// Build a segmenter using a custom backend factory
///
/// # Errors
/// - the factory cannot create the backend
/// - the model cannot be loaded
pub fn create_segmenter_with_factory(
    config: &SegmentationConfig,
    factory: &dyn BackendFactory,
) -> Result<Box<dyn Segmenter>> {
    if config.backend == BackendType::ColorKey {
        return Ok(Box::new(ColorKeySegmenter::new()));
    }

    let backend = factory.create_backend(config.backend, config)?;
    let mut segmenter = ModelSegmenter::new(backend, config.clone());
    segmenter.initialize()?;
    Ok(Box::new(segmenter))
}

/// Encode an RGBA image as PNG
///
/// # Errors
/// - PNG encoding fails
pub(crate) fn encode_png(image: &RgbaImage) -> Result<Vec<u8>> {
    let mut buffer = Vec::new();
    image
        .write_to(&mut Cursor::new(&mut buffer), ImageFormat::Png)
        .map_err(|e| CutoutError::processing(format!("Failed to encode PNG: {e}")))?;
    Ok(buffer)
}

/// Map a `1x1xHxW` model output back onto the original image as an 8-bit mask
fn tensor_to_mask(tensor: &Array4<f32>, letterbox: &Letterbox) -> Result<Vec<u8>> {
    let &[batch, channels, mask_height, mask_width] = tensor.shape() else {
        return Err(CutoutError::processing("Invalid output tensor shape"));
    };
    if batch != 1 || channels != 1 || mask_height == 0 || mask_width == 0 {
        return Err(CutoutError::processing(format!(
            "Expected a 1x1xHxW mask tensor, got {:?}",
            tensor.shape()
        )));
    }

    // Some models emit masks at a different resolution than their input
    let (canvas_width, canvas_height) = letterbox.canvas_size;
    let (width, height) = letterbox.source_size;
    let mut mask = Vec::with_capacity(width as usize * height as usize);
    for y in 0..height {
        for x in 0..width {
            let (cx, cy) = letterbox.canvas_coordinate(x, y);
            let tx = (cx * mask_width / canvas_width as usize).min(mask_width - 1);
            let ty = (cy * mask_height / canvas_height as usize).min(mask_height - 1);
            let value = tensor[[0, 0, ty, tx]];
            mask.push((value.clamp(0.0, 1.0) * 255.0).round() as u8);
        }
    }
    Ok(mask)
}

/// Use `mask` as alpha; fully transparent pixels are zeroed
fn apply_mask(image: &RgbaImage, mask: &[u8]) -> RgbaImage {
    let width = image.width() as usize;
    RgbaImage::from_fn(image.width(), image.height(), |x, y| {
        let pixel = image.get_pixel(x, y);
        let coverage = u16::from(mask.get(y as usize * width + x as usize).copied().unwrap_or(0));
        let alpha = ((coverage * u16::from(pixel[3]) + 127) / 255) as u8;
        if alpha == 0 {
            Rgba([0, 0, 0, 0])
        } else {
            Rgba([pixel[0], pixel[1], pixel[2], alpha])
        }
    })
}
