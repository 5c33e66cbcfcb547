//! A single image job: where it reads, where it writes, what it replaces

use crate::config::{BatchConfig, OutputFormat};
use crate::services::OutputFormatHandler;
use std::path::{Path, PathBuf};

/// One input path and its derived output path
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageJob {
    input: PathBuf,
    output: PathBuf,
}

impl ImageJob {
    /// Derive the job for `input`; the output replaces the extension
    ///
    /// ```rust
    /// use product_cutout::{ImageJob, OutputFormat};
    /// use std::path::Path;
    ///
    /// let job = ImageJob::new("shop/glass-1.jpg", OutputFormat::Png);
    /// assert_eq!(job.output(), Path::new("shop/glass-1.png"));
    /// ```
    pub fn new<P: Into<PathBuf>>(input: P, format: OutputFormat) -> Self {
        let input = input.into();
        let output = input.with_extension(OutputFormatHandler::get_extension(format));
        Self { input, output }
    }

    #[must_use]
    pub fn input(&self) -> &Path {
        &self.input
    }

    #[must_use]
    pub fn output(&self) -> &Path {
        &self.output
    }

    /// Whether the input is an existing regular file
    #[must_use]
    pub fn input_exists(&self) -> bool {
        self.input.is_file()
    }

    /// Whether the input extension is one of `lossy_extensions` (case-insensitive)
    #[must_use]
    pub fn is_lossy_source(&self, lossy_extensions: &[String]) -> bool {
        self.input
            .extension()
            .and_then(|ext| ext.to_str())
            .is_some_and(|ext| {
                lossy_extensions
                    .iter()
                    .any(|lossy| lossy.eq_ignore_ascii_case(ext))
            })
    }

    /// Whether writing the output makes the input redundant, so it may be deleted
    #[must_use]
    pub fn supersedes_original(&self, config: &BatchConfig) -> bool {
        config.remove_lossy_originals
            && self.input != self.output
            && self.is_lossy_source(&config.lossy_extensions)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{BackdropColor, BatchConfig};

    fn lossy() -> Vec<String> {
        vec!["jpg".to_string(), "jpeg".to_string()]
    }

    #[test]
    fn test_output_path_derivation() {
        let cases = [
            ("a/b/photo.jpg", OutputFormat::Png, "a/b/photo.png"),
            ("photo.JPEG", OutputFormat::Png, "photo.png"),
            ("photo.png", OutputFormat::Png, "photo.png"),
            ("photo", OutputFormat::Png, "photo.png"),
            ("photo.jpg", OutputFormat::WebP, "photo.webp"),
            ("photo.png", OutputFormat::Jpeg, "photo.jpg"),
            ("archive.tar.jpg", OutputFormat::Tiff, "archive.tar.tiff"),
        ];
        for (input, format, expected) in cases {
            assert_eq!(
                ImageJob::new(input, format).output(),
                Path::new(expected),
                "{input}"
            );
        }
    }

    #[test]
    fn test_lossy_source_is_case_insensitive() {
        assert!(ImageJob::new("a.jpg", OutputFormat::Png).is_lossy_source(&lossy()));
        assert!(ImageJob::new("a.JPG", OutputFormat::Png).is_lossy_source(&lossy()));
        assert!(ImageJob::new("a.Jpeg", OutputFormat::Png).is_lossy_source(&lossy()));
        assert!(!ImageJob::new("a.png", OutputFormat::Png).is_lossy_source(&lossy()));
        assert!(!ImageJob::new("a", OutputFormat::Png).is_lossy_source(&lossy()));
    }

    #[test]
    fn test_original_superseded_only_when_paths_differ() {
        let config = BatchConfig::default();
        assert!(ImageJob::new("a.jpg", OutputFormat::Png).supersedes_original(&config));
        assert!(!ImageJob::new("a.png", OutputFormat::Png).supersedes_original(&config));

        // JPEG output written over a .jpg input would delete the result itself
        let jpeg = BatchConfig::builder()
            .flatten(BackdropColor::WHITE)
            .output_format(OutputFormat::Jpeg)
            .build()
            .unwrap();
        assert!(!ImageJob::new("a.jpg", jpeg.output_format).supersedes_original(&jpeg));
        assert!(ImageJob::new("a.jpeg", jpeg.output_format).supersedes_original(&jpeg));
    }

    #[test]
    fn test_keep_originals_disables_removal() {
        let config = BatchConfig::builder().keep_originals(true).build().unwrap();
        assert!(!ImageJob::new("a.jpg", OutputFormat::Png).supersedes_original(&config));
    }

    #[test]
    fn test_input_exists_requires_a_file() {
        let temp = tempfile::tempdir().unwrap();
        let file = temp.path().join("a.jpg");
        std::fs::write(&file, b"x").unwrap();

        assert!(ImageJob::new(&file, OutputFormat::Png).input_exists());
        assert!(!ImageJob::new(temp.path().join("b.jpg"), OutputFormat::Png).input_exists());
        assert!(!ImageJob::new(temp.path(), OutputFormat::Png).input_exists());
    }
}
