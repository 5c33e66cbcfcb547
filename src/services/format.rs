//! Output format handling service
//!
//! Maps `OutputFormat` to extensions and encoders, keeping codec details out
//! of the batch pipeline.

use crate::{config::OutputFormat, error::Result};
use image::codecs::jpeg::JpegEncoder;
use image::{DynamicImage, ImageFormat};
use std::borrow::Cow;
use std::io::Cursor;

/// Service for encoding cutouts in the configured output format
pub struct OutputFormatHandler;

impl OutputFormatHandler {
    /// File extension (without the dot) for a format
    ///
    /// ```rust
    /// use product_cutout::{services::OutputFormatHandler, OutputFormat};
    ///
    /// assert_eq!(OutputFormatHandler::get_extension(OutputFormat::Png), "png");
    /// assert_eq!(OutputFormatHandler::get_extension(OutputFormat::Jpeg), "jpg");
    /// ```
    #[must_use]
    pub fn get_extension(format: OutputFormat) -> &'static str {
        match format {
            OutputFormat::Png => "png",
            OutputFormat::WebP => "webp",
            OutputFormat::Tiff => "tiff",
            OutputFormat::Jpeg => "jpg",
        }
    }

    /// Whether a format can carry an alpha channel
    #[must_use]
    pub fn supports_transparency(format: OutputFormat) -> bool {
        match format {
            OutputFormat::Png | OutputFormat::WebP | OutputFormat::Tiff => true,
            OutputFormat::Jpeg => false,
        }
    }

    #[must_use]
    pub fn image_format(format: OutputFormat) -> ImageFormat {
        match format {
            OutputFormat::Png => ImageFormat::Png,
            OutputFormat::WebP => ImageFormat::WebP,
            OutputFormat::Tiff => ImageFormat::Tiff,
            OutputFormat::Jpeg => ImageFormat::Jpeg,
        }
    }

    /// Encode an image into bytes
    ///
    /// Alpha is dropped for formats without transparency. WebP is written
    /// lossless; JPEG uses `jpeg_quality`.
    ///
    /// # Errors
    /// - the encoder rejects the image
    /// - the format's codec is not compiled in (WebP without `webp-support`)
    pub fn encode(image: &DynamicImage, format: OutputFormat, jpeg_quality: u8) -> Result<Vec<u8>> {
        let mut buffer = Vec::new();

        match format {
            OutputFormat::Jpeg => {
                let rgb = image.to_rgb8();
                JpegEncoder::new_with_quality(&mut buffer, jpeg_quality).encode_image(&rgb)?;
            },
            OutputFormat::Png | OutputFormat::WebP | OutputFormat::Tiff => {
                let source = match image {
                    DynamicImage::ImageRgb8(_) | DynamicImage::ImageRgba8(_) => Cow::Borrowed(image),
                    other if other.color().has_alpha() => {
                        Cow::Owned(DynamicImage::ImageRgba8(other.to_rgba8()))
                    },
                    other => Cow::Owned(DynamicImage::ImageRgb8(other.to_rgb8())),
                };
                source.write_to(&mut Cursor::new(&mut buffer), Self::image_format(format))?;
            },
        }

        log::debug!("Encoded {} bytes as {format}", buffer.len());
        Ok(buffer)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{GenericImageView, Rgb, RgbImage, Rgba, RgbaImage};

    fn sample_rgba() -> DynamicImage {
        let mut img = RgbaImage::new(4, 3);
        img.put_pixel(0, 0, Rgba([200, 10, 10, 0]));
        img.put_pixel(1, 1, Rgba([10, 200, 10, 128]));
        img.put_pixel(3, 2, Rgba([10, 10, 200, 255]));
        DynamicImage::ImageRgba8(img)
    }

    #[test]
    fn test_extensions_and_transparency() {
        assert_eq!(OutputFormatHandler::get_extension(OutputFormat::WebP), "webp");
        assert_eq!(OutputFormatHandler::get_extension(OutputFormat::Tiff), "tiff");
        assert!(OutputFormatHandler::supports_transparency(OutputFormat::Png));
        assert!(OutputFormatHandler::supports_transparency(OutputFormat::Tiff));
        assert!(!OutputFormatHandler::supports_transparency(OutputFormat::Jpeg));
    }

    #[test]
    fn test_png_keeps_alpha() {
        let bytes = OutputFormatHandler::encode(&sample_rgba(), OutputFormat::Png, 90).unwrap();
        assert_eq!(image::guess_format(&bytes).unwrap(), ImageFormat::Png);

        let decoded = image::load_from_memory(&bytes).unwrap().to_rgba8();
        assert_eq!(decoded.get_pixel(1, 1), &Rgba([10, 200, 10, 128]));
        assert_eq!(decoded.get_pixel(0, 0)[3], 0);
    }

    #[test]
    fn test_png_keeps_opaque_rgb_without_alpha() {
        let rgb = DynamicImage::ImageRgb8(RgbImage::from_pixel(2, 2, Rgb([1, 2, 3])));
        let bytes = OutputFormatHandler::encode(&rgb, OutputFormat::Png, 90).unwrap();
        let decoded = image::load_from_memory(&bytes).unwrap();
        assert!(!decoded.color().has_alpha());
    }

    #[test]
    fn test_tiff_round_trips_alpha() {
        let bytes = OutputFormatHandler::encode(&sample_rgba(), OutputFormat::Tiff, 90).unwrap();
        let decoded = image::load_from_memory(&bytes).unwrap().to_rgba8();
        assert_eq!(decoded.get_pixel(3, 2), &Rgba([10, 10, 200, 255]));
    }

    #[test]
    fn test_jpeg_drops_alpha() {
        let bytes = OutputFormatHandler::encode(&sample_rgba(), OutputFormat::Jpeg, 80).unwrap();
        assert_eq!(image::guess_format(&bytes).unwrap(), ImageFormat::Jpeg);
        let decoded = image::load_from_memory(&bytes).unwrap();
        assert!(!decoded.color().has_alpha());
        assert_eq!(decoded.dimensions(), (4, 3));
    }

    #[cfg(feature = "webp-support")]
    #[test]
    fn test_webp_is_lossless() {
        let bytes = OutputFormatHandler::encode(&sample_rgba(), OutputFormat::WebP, 90).unwrap();
        let decoded = image::load_from_memory(&bytes).unwrap().to_rgba8();
        assert_eq!(decoded.get_pixel(1, 1), &Rgba([10, 200, 10, 128]));
    }
}
