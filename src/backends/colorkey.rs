//! Model-free colour-key segmenter
//!
//! Product shots are usually taken against a uniform backdrop. The backdrop
//! colour is estimated from the image corners, pixels close to it in CIE-Lab
//! are classified as background, and only background connected to the image
//! border is made transparent. Background-coloured islands enclosed by the
//! product (a white label on a white backdrop, say) survive.

use crate::error::{CutoutError, Result};
use crate::segmentation::{encode_png, Segmenter};
use crate::services::ImageIOService;
use image::RgbaImage;
use lab::{rgb_bytes_to_labs, Lab};
use std::collections::VecDeque;

/// ΔE at or below which a pixel is pure background
pub const DEFAULT_CORE_THRESHOLD: f32 = 10.0;
/// ΔE at or below which a pixel is an anti-aliased background edge
pub const DEFAULT_EDGE_THRESHOLD: f32 = 25.0;

const SAMPLE_WINDOW: u32 = 5;
const MIN_SAMPLE_ALPHA: u8 = 8;
const CLUSTER_THRESHOLD_SQ: f32 = 8.0 * 8.0;
// Fully transparent input pixels are never classified
const MIN_PROCESS_ALPHA: u8 = 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PixelClass {
    Foreground,
    Edge(u8),
    Core,
}

/// Removes the uniform backdrop around a product
#[derive(Debug, Clone, Copy)]
pub struct ColorKeySegmenter {
    core_threshold: f32,
    edge_threshold: f32,
}

impl Default for ColorKeySegmenter {
    fn default() -> Self {
        Self {
            core_threshold: DEFAULT_CORE_THRESHOLD,
            edge_threshold: DEFAULT_EDGE_THRESHOLD,
        }
    }
}

impl ColorKeySegmenter {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Use custom ΔE thresholds
    ///
    /// # Errors
    /// - thresholds are negative, not finite, or `edge < core`
    pub fn with_thresholds(core_threshold: f32, edge_threshold: f32) -> Result<Self> {
        if !core_threshold.is_finite() || !edge_threshold.is_finite() || core_threshold < 0.0 {
            return Err(CutoutError::invalid_config(
                "Colour-key thresholds must be finite and non-negative",
            ));
        }
        if edge_threshold < core_threshold {
            return Err(CutoutError::invalid_config(format!(
                "Edge threshold {edge_threshold} is below core threshold {core_threshold}"
            )));
        }
        Ok(Self {
            core_threshold,
            edge_threshold,
        })
    }

    /// Make the border-connected backdrop of `image` transparent
    #[must_use]
    pub fn remove_backdrop(&self, image: &RgbaImage) -> RgbaImage {
        let mut output = image.clone();
        let (width, height) = output.dimensions();
        if width == 0 || height == 0 {
            return output;
        }

        let backdrop = detect_backdrop(&output);
        log::debug!(
            "Detected backdrop L={:.1} a={:.1} b={:.1}",
            backdrop.l,
            backdrop.a,
            backdrop.b
        );
        let classes = self.classify(&output, &backdrop);
        flood_fill_from_border(&mut output, &classes);
        output
    }

    fn classify(&self, image: &RgbaImage, backdrop: &Lab) -> Vec<PixelClass> {
        let rgb: Vec<u8> = image.pixels().flat_map(|p| [p[0], p[1], p[2]]).collect();
        let labs = rgb_bytes_to_labs(&rgb);

        let core_sq = self.core_threshold * self.core_threshold;
        let edge_sq = self.edge_threshold * self.edge_threshold;
        let span = (self.edge_threshold - self.core_threshold).max(f32::EPSILON);

        image
            .pixels()
            .zip(labs.iter())
            .map(|(pixel, lab)| {
                let alpha = pixel[3];
                if alpha < MIN_PROCESS_ALPHA {
                    return PixelClass::Foreground;
                }
                let distance_sq = distance_sq(lab, backdrop);
                if distance_sq <= core_sq {
                    PixelClass::Core
                } else if distance_sq <= edge_sq {
                    let ratio = ((distance_sq.sqrt() - self.core_threshold) / span).clamp(0.0, 1.0);
                    PixelClass::Edge((f32::from(alpha) * ratio).round() as u8)
                } else {
                    PixelClass::Foreground
                }
            })
            .collect()
    }
}

impl Segmenter for ColorKeySegmenter {
    fn name(&self) -> &str {
        "colorkey"
    }

    fn segment(&mut self, image_bytes: &[u8]) -> Result<Vec<u8>> {
        let image = ImageIOService::load_from_bytes(image_bytes)?.to_rgba8();
        encode_png(&self.remove_backdrop(&image))
    }
}

#[inline]
fn distance_sq(c1: &Lab, c2: &Lab) -> f32 {
    let dl = c1.l - c2.l;
    let da = c1.a - c2.a;
    let db = c1.b - c2.b;
    dl * dl + da * da + db * db
}

#[derive(Clone, Copy)]
struct LabCluster {
    sum: [f32; 3],
    weight: f32,
}

impl LabCluster {
    fn new(lab: Lab, weight: f32) -> Self {
        Self {
            sum: [lab.l * weight, lab.a * weight, lab.b * weight],
            weight,
        }
    }

    fn add(&mut self, lab: Lab, weight: f32) {
        self.sum[0] += lab.l * weight;
        self.sum[1] += lab.a * weight;
        self.sum[2] += lab.b * weight;
        self.weight += weight;
    }

    fn centroid(self) -> Lab {
        let n = self.weight.max(f32::EPSILON);
        Lab {
            l: self.sum[0] / n,
            a: self.sum[1] / n,
            b: self.sum[2] / n,
        }
    }
}

/// Dominant colour of the four corner windows, white if they are all transparent
fn detect_backdrop(image: &RgbaImage) -> Lab {
    let (width, height) = image.dimensions();
    let right = width.saturating_sub(SAMPLE_WINDOW);
    let bottom = height.saturating_sub(SAMPLE_WINDOW);

    let mut clusters: Vec<LabCluster> = Vec::with_capacity(8);
    for (cx, cy) in [(0, 0), (right, 0), (0, bottom), (right, bottom)] {
        for dy in 0..SAMPLE_WINDOW {
            for dx in 0..SAMPLE_WINDOW {
                let pixel = image.get_pixel((cx + dx).min(width - 1), (cy + dy).min(height - 1));
                if pixel[3] < MIN_SAMPLE_ALPHA {
                    continue;
                }
                let lab = Lab::from_rgb(&[pixel[0], pixel[1], pixel[2]]);
                let weight = (f32::from(pixel[3]) / 255.0).max(0.1);

                let nearest = clusters
                    .iter_mut()
                    .map(|cluster| (distance_sq(&cluster.centroid(), &lab), cluster))
                    .min_by(|a, b| a.0.total_cmp(&b.0));
                match nearest {
                    Some((dist, cluster)) if dist <= CLUSTER_THRESHOLD_SQ => cluster.add(lab, weight),
                    _ => clusters.push(LabCluster::new(lab, weight)),
                }
            }
        }
    }

    clusters
        .into_iter()
        .max_by(|a, b| a.weight.total_cmp(&b.weight))
        .map_or(
            Lab {
                l: 100.0,
                a: 0.0,
                b: 0.0,
            },
            LabCluster::centroid,
        )
}

/// Apply background alpha to every background pixel 4-connected to the border
fn flood_fill_from_border(output: &mut RgbaImage, classes: &[PixelClass]) {
    let (width, height) = output.dimensions();
    let index = |x: u32, y: u32| y as usize * width as usize + x as usize;

    let mut visited = vec![false; classes.len()];
    let mut queue = VecDeque::with_capacity((width as usize + height as usize) * 2);
    let mut enqueue = |queue: &mut VecDeque<(u32, u32)>, x: u32, y: u32| {
        let i = index(x, y);
        if !visited[i] && classes[i] != PixelClass::Foreground {
            visited[i] = true;
            queue.push_back((x, y));
        }
    };

    for x in 0..width {
        enqueue(&mut queue, x, 0);
        enqueue(&mut queue, x, height - 1);
    }
    for y in 0..height {
        enqueue(&mut queue, 0, y);
        enqueue(&mut queue, width - 1, y);
    }

    while let Some((x, y)) = queue.pop_front() {
        match classes[index(x, y)] {
            PixelClass::Core => output.get_pixel_mut(x, y)[3] = 0,
            PixelClass::Edge(alpha) => output.get_pixel_mut(x, y)[3] = alpha,
            PixelClass::Foreground => continue,
        }
        if x > 0 {
            enqueue(&mut queue, x - 1, y);
        }
        if x + 1 < width {
            enqueue(&mut queue, x + 1, y);
        }
        if y > 0 {
            enqueue(&mut queue, x, y - 1);
        }
        if y + 1 < height {
            enqueue(&mut queue, x, y + 1);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{DynamicImage, Rgba};

    const WHITE: Rgba<u8> = Rgba([255, 255, 255, 255]);
    const BLACK: Rgba<u8> = Rgba([0, 0, 0, 255]);

    fn ring_image() -> RgbaImage {
        let mut img = RgbaImage::from_pixel(7, 7, WHITE);
        for i in 1..=5 {
            img.put_pixel(i, 1, BLACK);
            img.put_pixel(i, 5, BLACK);
            img.put_pixel(1, i, BLACK);
            img.put_pixel(5, i, BLACK);
        }
        img
    }

    #[test]
    fn test_border_connected_backdrop_is_removed() {
        let out = ColorKeySegmenter::new().remove_backdrop(&ring_image());
        assert_eq!(out.get_pixel(0, 0)[3], 0);
        assert_eq!(out.get_pixel(6, 3)[3], 0);
        assert_eq!(out.get_pixel(1, 1)[3], 255);
    }

    #[test]
    fn test_enclosed_island_survives() {
        let out = ColorKeySegmenter::new().remove_backdrop(&ring_image());
        assert_eq!(out.get_pixel(3, 3)[3], 255);
    }

    #[test]
    fn test_coloured_backdrop_is_detected() {
        let green = Rgba([30, 200, 40, 255]);
        let mut img = RgbaImage::from_pixel(12, 12, green);
        for y in 4..8 {
            for x in 4..8 {
                img.put_pixel(x, y, Rgba([200, 20, 180, 255]));
            }
        }

        let out = ColorKeySegmenter::new().remove_backdrop(&img);
        assert_eq!(out.get_pixel(0, 11)[3], 0);
        assert_eq!(out.get_pixel(5, 5)[3], 255);
        assert_eq!(out.get_pixel(5, 5).0[..3], [200, 20, 180]);
    }

    #[test]
    fn test_near_backdrop_pixels_get_partial_alpha() {
        let mut img = RgbaImage::from_pixel(9, 9, WHITE);
        // Light grey, between the core and edge thresholds of white
        img.put_pixel(4, 0, Rgba([205, 205, 205, 255]));

        let out = ColorKeySegmenter::new().remove_backdrop(&img);
        let alpha = out.get_pixel(4, 0)[3];
        assert!(alpha > 0 && alpha < 255, "alpha {alpha}");
    }

    #[test]
    fn test_single_pixel_and_transparent_inputs() {
        let segmenter = ColorKeySegmenter::new();
        let out = segmenter.remove_backdrop(&RgbaImage::from_pixel(1, 1, WHITE));
        assert_eq!(out.get_pixel(0, 0)[3], 0);

        let out = segmenter.remove_backdrop(&RgbaImage::from_pixel(1, 1, Rgba([1, 2, 3, 0])));
        assert_eq!(out.get_pixel(0, 0)[3], 0);
    }

    #[test]
    fn test_segment_returns_png_with_alpha() {
        let mut bytes = Vec::new();
        DynamicImage::ImageRgba8(ring_image())
            .write_to(&mut std::io::Cursor::new(&mut bytes), image::ImageFormat::Png)
            .unwrap();

        let png = ColorKeySegmenter::new().segment(&bytes).unwrap();
        assert_eq!(image::guess_format(&png).unwrap(), image::ImageFormat::Png);
        let decoded = image::load_from_memory(&png).unwrap();
        assert!(decoded.color().has_alpha());
        assert_eq!(decoded.to_rgba8().get_pixel(0, 0)[3], 0);
    }

    #[test]
    fn test_threshold_validation() {
        assert!(ColorKeySegmenter::with_thresholds(5.0, 15.0).is_ok());
        assert!(ColorKeySegmenter::with_thresholds(15.0, 5.0).is_err());
        assert!(ColorKeySegmenter::with_thresholds(-1.0, 5.0).is_err());
        assert!(ColorKeySegmenter::with_thresholds(f32::NAN, 5.0).is_err());
    }
}
