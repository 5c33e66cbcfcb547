//! Shared fixtures for the integration tests

#![allow(dead_code)]

use image::{Rgb, RgbImage};
use product_cutout::{
    BatchConfig, BatchProcessor, ColorKeySegmenter, RecordingProgressReporter,
};
use std::path::{Path, PathBuf};

/// Product photo stand-in: a red box on a white studio backdrop
pub fn product_photo() -> RgbImage {
    RgbImage::from_fn(48, 48, |x, y| {
        if (16..32).contains(&x) && (16..32).contains(&y) {
            Rgb([200, 30, 30])
        } else {
            Rgb([255, 255, 255])
        }
    })
}

/// Write the product photo to `dir/name`, format taken from the extension
pub fn write_photo(dir: &Path, name: &str) -> PathBuf {
    let path = dir.join(name);
    product_photo().save(&path).unwrap();
    path
}

/// A processor backed by the colour-key segmenter that records its output
pub fn colorkey_processor(config: BatchConfig) -> (BatchProcessor, RecordingProgressReporter) {
    let reporter = RecordingProgressReporter::new();
    let processor = BatchProcessor::new(config, Box::new(ColorKeySegmenter::new()))
        .unwrap()
        .with_reporter(Box::new(reporter.clone()));
    (processor, reporter)
}

/// Console lines without the opening and closing banners
pub fn job_lines(reporter: &RecordingProgressReporter) -> Vec<String> {
    let lines = reporter.lines();
    assert!(lines.len() >= 2, "missing banners: {lines:?}");
    lines[1..lines.len() - 1].to_vec()
}
