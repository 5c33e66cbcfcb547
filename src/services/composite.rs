//! Alpha compositing onto a solid backdrop

use crate::config::BackdropColor;
use image::{Rgb, RgbImage, RgbaImage};

/// Flattens cutouts onto an opaque backdrop
pub struct BackdropCompositor;

impl BackdropCompositor {
    /// Composite `foreground` over a solid `backdrop` of the same size
    ///
    /// Each channel is `fg * a + bg * (1 - a)` with `a = alpha / 255`,
    /// rounded to the nearest integer. The result has no alpha channel.
    ///
    /// ```rust
    /// use image::{Rgba, RgbaImage};
    /// use product_cutout::{services::BackdropCompositor, BackdropColor};
    ///
    /// let cutout = RgbaImage::from_pixel(1, 1, Rgba([0, 0, 0, 0]));
    /// let flat = BackdropCompositor::flatten(&cutout, BackdropColor::WHITE);
    /// assert_eq!(flat.get_pixel(0, 0).0, [255, 255, 255]);
    /// ```
    #[must_use]
    pub fn flatten(foreground: &RgbaImage, backdrop: BackdropColor) -> RgbImage {
        let (width, height) = foreground.dimensions();
        let bg = [backdrop.r, backdrop.g, backdrop.b];

        RgbImage::from_fn(width, height, |x, y| {
            let px = foreground.get_pixel(x, y);
            let alpha = px[3];
            Rgb([
                blend(px[0], bg[0], alpha),
                blend(px[1], bg[1], alpha),
                blend(px[2], bg[2], alpha),
            ])
        })
    }
}

#[inline]
fn blend(fg: u8, bg: u8, alpha: u8) -> u8 {
    let a = u32::from(alpha);
    // (fg*a + bg*(255-a)) / 255, rounded half up
    let value = (u32::from(fg) * a + u32::from(bg) * (255 - a) + 127) / 255;
    value.min(255) as u8
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgba;

    #[test]
    fn test_fully_transparent_becomes_backdrop() {
        let cutout = RgbaImage::from_pixel(3, 2, Rgba([12, 34, 56, 0]));
        let flat = BackdropCompositor::flatten(&cutout, BackdropColor::new(10, 20, 30));
        assert_eq!(flat.dimensions(), (3, 2));
        assert!(flat.pixels().all(|p| p.0 == [10, 20, 30]));
    }

    #[test]
    fn test_opaque_pixels_are_unchanged() {
        let cutout = RgbaImage::from_pixel(2, 2, Rgba([12, 34, 56, 255]));
        let flat = BackdropCompositor::flatten(&cutout, BackdropColor::WHITE);
        assert!(flat.pixels().all(|p| p.0 == [12, 34, 56]));
    }

    #[test]
    fn test_partial_alpha_matches_over_operator() {
        for alpha in [1u8, 64, 128, 200, 254] {
            let cutout = RgbaImage::from_pixel(1, 1, Rgba([0, 100, 255, alpha]));
            let flat = BackdropCompositor::flatten(&cutout, BackdropColor::WHITE);

            let a = f64::from(alpha) / 255.0;
            let expected: Vec<u8> = [0.0, 100.0, 255.0]
                .iter()
                .map(|fg| (fg * a + 255.0 * (1.0 - a)).round() as u8)
                .collect();
            assert_eq!(flat.get_pixel(0, 0).0.to_vec(), expected, "alpha {alpha}");
        }
    }
}
