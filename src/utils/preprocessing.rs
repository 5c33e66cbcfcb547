//! Image preprocessing for model inference
//!
//! Images are letterboxed: resized to fit the model input while keeping their
//! aspect ratio, centred on a padded canvas, then normalised into an NCHW
//! tensor. The `Letterbox` describing that placement is returned alongside the
//! tensor so the model output can be mapped back onto the original pixels.

use crate::{
    error::{CutoutError, Result},
    models::PreprocessingConfig,
};
use image::{imageops::FilterType, DynamicImage, Rgb, RgbImage};
use ndarray::Array4;

/// Padding colour around the resized image
const PADDING_COLOR: Rgb<u8> = Rgb([255, 255, 255]);

/// Placement of an image inside the model's input canvas
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Letterbox {
    /// Original image dimensions
    pub source_size: (u32, u32),
    /// Canvas (model input) dimensions as `(width, height)`
    pub canvas_size: (u32, u32),
    /// Original-to-canvas scale factor
    pub scale: f32,
    /// Top-left corner of the resized image on the canvas
    pub offset: (u32, u32),
    /// Resized image dimensions
    pub scaled_size: (u32, u32),
}

impl Letterbox {
    /// Compute the placement of a `width x height` image on a canvas
    ///
    /// # Errors
    /// - any dimension is zero
    pub fn fit(width: u32, height: u32, canvas_width: u32, canvas_height: u32) -> Result<Self> {
        if width == 0 || height == 0 {
            return Err(CutoutError::processing(format!(
                "Cannot preprocess an empty image ({width}x{height})"
            )));
        }
        if canvas_width == 0 || canvas_height == 0 {
            return Err(CutoutError::processing("Model input size must be non-zero"));
        }

        let scale = (canvas_width as f32 / width as f32).min(canvas_height as f32 / height as f32);
        let scaled_width = ((width as f32 * scale).round() as u32).clamp(1, canvas_width);
        let scaled_height = ((height as f32 * scale).round() as u32).clamp(1, canvas_height);

        Ok(Self {
            source_size: (width, height),
            canvas_size: (canvas_width, canvas_height),
            scale,
            offset: (
                (canvas_width - scaled_width) / 2,
                (canvas_height - scaled_height) / 2,
            ),
            scaled_size: (scaled_width, scaled_height),
        })
    }

    /// Canvas coordinate sampled for an original pixel, clamped to the canvas
    #[must_use]
    pub fn canvas_coordinate(&self, x: u32, y: u32) -> (usize, usize) {
        let cx = (x as f32 * self.scale) as u32 + self.offset.0;
        let cy = (y as f32 * self.scale) as u32 + self.offset.1;
        (
            cx.min(self.canvas_size.0 - 1) as usize,
            cy.min(self.canvas_size.1 - 1) as usize,
        )
    }
}

/// Shared image preprocessing utilities
pub struct ImagePreprocessor;

impl ImagePreprocessor {
    /// Letterbox and normalise an image into a `1x3xHxW` tensor
    ///
    /// # Errors
    /// - the image or the model input size is empty
    pub fn preprocess_for_inference(
        image: &DynamicImage,
        config: &PreprocessingConfig,
    ) -> Result<(Array4<f32>, Letterbox)> {
        let rgb = image.to_rgb8();
        let [canvas_height, canvas_width] = config.target_size;
        let letterbox = Letterbox::fit(rgb.width(), rgb.height(), canvas_width, canvas_height)?;

        let canvas = Self::letterbox_canvas(&rgb, &letterbox);
        Ok((Self::canvas_to_tensor(&canvas, config), letterbox))
    }

    fn letterbox_canvas(rgb: &RgbImage, letterbox: &Letterbox) -> RgbImage {
        let (scaled_width, scaled_height) = letterbox.scaled_size;
        let resized = image::imageops::resize(rgb, scaled_width, scaled_height, FilterType::Triangle);

        let (canvas_width, canvas_height) = letterbox.canvas_size;
        let mut canvas = RgbImage::from_pixel(canvas_width, canvas_height, PADDING_COLOR);
        image::imageops::replace(
            &mut canvas,
            &resized,
            i64::from(letterbox.offset.0),
            i64::from(letterbox.offset.1),
        );
        canvas
    }

    fn canvas_to_tensor(canvas: &RgbImage, config: &PreprocessingConfig) -> Array4<f32> {
        let (width, height) = canvas.dimensions();
        let mean = config.normalization_mean;
        let std = config.normalization_std;

        Array4::from_shape_fn(
            (1, 3, height as usize, width as usize),
            |(_, channel, y, x)| {
                let value = canvas.get_pixel(x as u32, y as u32)[channel];
                (f32::from(value) / 255.0 - mean[channel]) / std[channel]
            },
        )
    }
}
