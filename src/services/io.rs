//! File I/O for the batch pipeline
//!
//! Jobs work on raw bytes: the input is read whole, the encoded output is
//! written whole, and a superseded original is unlinked.

use crate::error::{CutoutError, Result};
use image::DynamicImage;
use std::fs;
use std::path::Path;

/// Service for handling image file input/output operations
pub struct ImageIOService;

impl ImageIOService {
    /// Read the full contents of an input image
    ///
    /// # Errors
    /// - the file cannot be opened or read
    pub fn read_bytes<P: AsRef<Path>>(path: P) -> Result<Vec<u8>> {
        let path = path.as_ref();
        fs::read(path).map_err(|e| CutoutError::file_io_error("read image file", path, &e))
    }

    /// Write encoded bytes, creating the parent directory when missing
    ///
    /// # Errors
    /// - the parent directory cannot be created
    /// - the file cannot be written
    pub fn write_bytes<P: AsRef<Path>>(path: P, bytes: &[u8]) -> Result<()> {
        let path = path.as_ref();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)
                .map_err(|e| CutoutError::file_io_error("create output directory", parent, &e))?;
        }
        fs::write(path, bytes).map_err(|e| CutoutError::file_io_error("write output file", path, &e))
    }

    /// Delete an original input file
    ///
    /// # Errors
    /// - the file cannot be removed
    pub fn remove_original<P: AsRef<Path>>(path: P) -> Result<()> {
        let path = path.as_ref();
        fs::remove_file(path).map_err(|e| CutoutError::file_io_error("remove original", path, &e))
    }

    /// Decode image bytes, sniffing the format from content
    ///
    /// # Errors
    /// - the bytes are not a supported image format
    pub fn load_from_bytes(bytes: &[u8]) -> Result<DynamicImage> {
        Ok(image::load_from_memory(bytes)?)
    }
}
