//! Configuration types for batch cutout runs

use crate::error::{CutoutError, Result};
use crate::models::ModelSpec;
use crate::services::OutputFormatHandler;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

/// Execution provider options for ONNX Runtime
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExecutionProvider {
    /// Auto-detect best available provider (CUDA > `CoreML` > CPU)
    #[default]
    Auto,
    /// CPU execution (always available)
    Cpu,
    /// NVIDIA CUDA GPU acceleration
    Cuda,
    /// Apple Silicon GPU acceleration
    CoreMl,
}

impl fmt::Display for ExecutionProvider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Auto => write!(f, "auto"),
            Self::Cpu => write!(f, "cpu"),
            Self::Cuda => write!(f, "cuda"),
            Self::CoreMl => write!(f, "coreml"),
        }
    }
}

/// Segmentation backend selection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendType {
    /// ONNX Runtime (native, GPU capable)
    #[default]
    Onnx,
    /// Tract (pure Rust, CPU only)
    Tract,
    /// Model-free colour-key flood fill
    ColorKey,
}

impl fmt::Display for BackendType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Onnx => write!(f, "onnx"),
            Self::Tract => write!(f, "tract"),
            Self::ColorKey => write!(f, "colorkey"),
        }
    }
}

impl BackendType {
    /// Whether this backend needs a model on disk
    #[must_use]
    pub fn requires_model(self) -> bool {
        !matches!(self, Self::ColorKey)
    }
}

/// Output image format options
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    /// PNG with alpha channel transparency
    #[default]
    Png,
    /// Lossless WebP with alpha channel transparency
    WebP,
    /// TIFF with alpha channel transparency
    Tiff,
    /// JPEG, only usable when flattening onto a backdrop
    Jpeg,
}

impl fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Png => write!(f, "png"),
            Self::WebP => write!(f, "webp"),
            Self::Tiff => write!(f, "tiff"),
            Self::Jpeg => write!(f, "jpeg"),
        }
    }
}

/// Solid backdrop colour used when flattening a cutout
///
/// Parses `#rrggbb`, `rrggbb`, `#rgb` and a few colour names. Serialized as
/// the `#rrggbb` string form.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct BackdropColor {
    pub r: u8,
    pub g: u8,
    pub b: u8,
}

impl BackdropColor {
    pub const WHITE: Self = Self::new(255, 255, 255);
    pub const BLACK: Self = Self::new(0, 0, 0);

    #[must_use]
    pub const fn new(r: u8, g: u8, b: u8) -> Self {
        Self { r, g, b }
    }
}

impl Default for BackdropColor {
    fn default() -> Self {
        Self::WHITE
    }
}

impl fmt::Display for BackdropColor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{:02x}{:02x}{:02x}", self.r, self.g, self.b)
    }
}

impl FromStr for BackdropColor {
    type Err = CutoutError;

    fn from_str(s: &str) -> Result<Self> {
        let trimmed = s.trim();
        match trimmed.to_ascii_lowercase().as_str() {
            "white" => return Ok(Self::WHITE),
            "black" => return Ok(Self::BLACK),
            "gray" | "grey" => return Ok(Self::new(128, 128, 128)),
            _ => {},
        }

        let hex = trimmed.strip_prefix('#').unwrap_or(trimmed);
        let invalid = || {
            CutoutError::invalid_config(format!(
                "Invalid backdrop colour '{s}'. Use #rrggbb, #rgb or one of: white, black, gray"
            ))
        };
        if !hex.chars().all(|c| c.is_ascii_hexdigit()) {
            return Err(invalid());
        }

        let channel = |digits: &str| u8::from_str_radix(digits, 16).map_err(|_| invalid());
        match hex.len() {
            6 => Ok(Self::new(
                channel(&hex[0..2])?,
                channel(&hex[2..4])?,
                channel(&hex[4..6])?,
            )),
            3 => {
                // #abc expands to #aabbcc
                let r = channel(&hex[0..1])?;
                let g = channel(&hex[1..2])?;
                let b = channel(&hex[2..3])?;
                Ok(Self::new(r * 17, g * 17, b * 17))
            },
            _ => Err(invalid()),
        }
    }
}

impl TryFrom<String> for BackdropColor {
    type Error = CutoutError;

    fn try_from(value: String) -> Result<Self> {
        value.parse()
    }
}

impl From<BackdropColor> for String {
    fn from(color: BackdropColor) -> Self {
        color.to_string()
    }
}

/// How the segmented foreground is written out
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CompositingMode {
    /// Keep the alpha channel produced by segmentation
    #[default]
    Transparent,
    /// Composite onto an opaque backdrop and drop alpha
    Flatten(BackdropColor),
}

impl CompositingMode {
    #[must_use]
    pub fn backdrop(self) -> Option<BackdropColor> {
        match self {
            Self::Transparent => None,
            Self::Flatten(color) => Some(color),
        }
    }
}

/// Source extensions whose originals are removed once a cutout exists
pub const DEFAULT_LOSSY_EXTENSIONS: &[&str] = &["jpg", "jpeg"];

/// Configuration for a batch run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchConfig {
    /// Transparent output or flatten onto a backdrop
    pub compositing: CompositingMode,

    /// Output format (drives the output extension)
    pub output_format: OutputFormat,

    /// JPEG quality (1-100, only used for JPEG output)
    pub jpeg_quality: u8,

    /// Delete lossy originals once the cutout is written
    pub remove_lossy_originals: bool,

    /// Extensions (lowercase, no dot) treated as lossy sources
    pub lossy_extensions: Vec<String>,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            compositing: CompositingMode::default(),
            output_format: OutputFormat::default(),
            jpeg_quality: 90,
            remove_lossy_originals: true,
            lossy_extensions: DEFAULT_LOSSY_EXTENSIONS
                .iter()
                .map(|ext| (*ext).to_string())
                .collect(),
        }
    }
}

impl BatchConfig {
    /// Create a new configuration builder
    ///
    /// # Examples
    ///
    /// ```rust
    /// use product_cutout::{BackdropColor, BatchConfig, CompositingMode, OutputFormat};
    ///
    /// let config = BatchConfig::builder()
    ///     .compositing(CompositingMode::Flatten(BackdropColor::WHITE))
    ///     .output_format(OutputFormat::Jpeg)
    ///     .jpeg_quality(85)
    ///     .build()
    ///     .unwrap();
    /// assert_eq!(config.jpeg_quality, 85);
    /// ```
    #[must_use]
    pub fn builder() -> BatchConfigBuilder {
        BatchConfigBuilder::default()
    }

    /// Validate the configuration
    ///
    /// # Errors
    /// - JPEG quality outside 1-100
    /// - JPEG output combined with transparent compositing
    /// - an empty or dotted lossy extension
    pub fn validate(&self) -> Result<()> {
        if !(1..=100).contains(&self.jpeg_quality) {
            return Err(CutoutError::config_value_error(
                "JPEG quality",
                self.jpeg_quality,
                "1-100",
            ));
        }

        if !OutputFormatHandler::supports_transparency(self.output_format)
            && self.compositing == CompositingMode::Transparent
        {
            return Err(CutoutError::invalid_config(format!(
                "{} output has no alpha channel; use flatten mode or a transparent format",
                self.output_format
            )));
        }

        if let Some(bad) = self
            .lossy_extensions
            .iter()
            .find(|ext| ext.is_empty() || ext.starts_with('.'))
        {
            return Err(CutoutError::invalid_config(format!(
                "Invalid lossy extension '{bad}': expected a bare extension like 'jpg'"
            )));
        }

        Ok(())
    }
}

/// Builder for `BatchConfig`
#[derive(Debug, Default)]
pub struct BatchConfigBuilder {
    config: BatchConfig,
}

impl BatchConfigBuilder {
    #[must_use]
    pub fn compositing(mut self, mode: CompositingMode) -> Self {
        self.config.compositing = mode;
        self
    }

    /// Flatten onto the given backdrop colour
    #[must_use]
    pub fn flatten(self, color: BackdropColor) -> Self {
        self.compositing(CompositingMode::Flatten(color))
    }

    #[must_use]
    pub fn output_format(mut self, format: OutputFormat) -> Self {
        self.config.output_format = format;
        self
    }

    /// Set JPEG quality (clamped to 100)
    #[must_use]
    pub fn jpeg_quality(mut self, quality: u8) -> Self {
        self.config.jpeg_quality = quality.min(100);
        self
    }

    /// Keep lossy originals instead of deleting them
    #[must_use]
    pub fn keep_originals(mut self, keep: bool) -> Self {
        self.config.remove_lossy_originals = !keep;
        self
    }

    /// Replace the set of lossy source extensions (case-insensitive)
    #[must_use]
    pub fn lossy_extensions<I, S>(mut self, extensions: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.config.lossy_extensions = extensions
            .into_iter()
            .map(|ext| ext.as_ref().to_ascii_lowercase())
            .collect();
        self
    }

    /// Build and validate the configuration
    ///
    /// # Errors
    /// Returns `CutoutError::InvalidConfig` when validation fails
    pub fn build(self) -> Result<BatchConfig> {
        self.config.validate()?;
        Ok(self.config)
    }
}

/// Configuration for constructing a segmenter
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SegmentationConfig {
    /// Which backend performs segmentation
    pub backend: BackendType,

    /// Execution provider for ONNX Runtime
    pub execution_provider: ExecutionProvider,

    /// Model source and variant (ignored by the colour-key backend)
    pub model_spec: ModelSpec,

    /// Number of intra-op threads for inference (0 = auto)
    pub intra_threads: usize,

    /// Number of inter-op threads for inference (0 = auto)
    pub inter_threads: usize,
}

impl Default for SegmentationConfig {
    fn default() -> Self {
        Self {
            backend: BackendType::default(),
            execution_provider: ExecutionProvider::default(),
            model_spec: ModelSpec::default(),
            intra_threads: 0,
            inter_threads: 0,
        }
    }
}

impl SegmentationConfig {
    /// Set both thread counts from a total (inter-op gets half, minimum 1)
    #[must_use]
    pub fn with_threads(mut self, threads: usize) -> Self {
        self.intra_threads = threads;
        self.inter_threads = if threads > 0 { (threads / 2).max(1) } else { 0 };
        self
    }
}

/// A JSON batch manifest
///
/// ```json
/// { "paths": ["a.jpg"], "mode": {"flatten": "#ffffff"}, "format": "png", "keep_originals": false }
/// ```
///
/// Only `paths` is required. Values set here are defaults that CLI flags override.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct BatchManifest {
    pub paths: Vec<PathBuf>,
    #[serde(default)]
    pub mode: Option<CompositingMode>,
    #[serde(default)]
    pub format: Option<OutputFormat>,
    #[serde(default)]
    pub keep_originals: Option<bool>,
}

impl BatchManifest {
    /// Parse a manifest from a JSON string
    ///
    /// # Errors
    /// Returns `CutoutError::InvalidConfig` on malformed JSON
    pub fn from_json_str(json: &str) -> Result<Self> {
        serde_json::from_str(json)
            .map_err(|e| CutoutError::invalid_config(format!("Invalid batch manifest: {e}")))
    }

    /// Load a manifest file
    ///
    /// Relative entries are resolved against the manifest's directory.
    ///
    /// # Errors
    /// - the file cannot be read
    /// - the JSON is malformed
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path)
            .map_err(|e| CutoutError::file_io_error("read manifest", path, &e))?;
        let mut manifest = Self::from_json_str(&contents)?;

        if let Some(base) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            manifest.paths = manifest
                .paths
                .into_iter()
                .map(|p| if p.is_relative() { base.join(p) } else { p })
                .collect();
        }
        Ok(manifest)
    }

    /// Apply the manifest's settings to a builder
    #[must_use]
    pub fn apply_to(&self, mut builder: BatchConfigBuilder) -> BatchConfigBuilder {
        if let Some(mode) = self.mode {
            builder = builder.compositing(mode);
        }
        if let Some(format) = self.format {
            builder = builder.output_format(format);
        }
        if let Some(keep) = self.keep_originals {
            builder = builder.keep_originals(keep);
        }
        builder
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = BatchConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.compositing, CompositingMode::Transparent);
        assert_eq!(config.output_format, OutputFormat::Png);
        assert!(config.remove_lossy_originals);
        assert_eq!(config.lossy_extensions, vec!["jpg", "jpeg"]);
    }

    #[test]
    fn test_jpeg_requires_flatten() {
        let result = BatchConfig::builder()
            .output_format(OutputFormat::Jpeg)
            .build();
        assert!(matches!(result, Err(CutoutError::InvalidConfig(_))));

        let config = BatchConfig::builder()
            .output_format(OutputFormat::Jpeg)
            .flatten(BackdropColor::WHITE)
            .build()
            .unwrap();
        assert_eq!(config.compositing.backdrop(), Some(BackdropColor::WHITE));

        for format in [OutputFormat::Png, OutputFormat::WebP, OutputFormat::Tiff] {
            let config = BatchConfig::builder().output_format(format).build();
            assert!(config.is_ok(), "{format} keeps alpha");
        }
    }

    #[test]
    fn test_jpeg_quality_bounds() {
        let mut config = BatchConfig::default();
        config.jpeg_quality = 0;
        assert!(config.validate().is_err());

        let config = BatchConfig::builder().jpeg_quality(250).build().unwrap();
        assert_eq!(config.jpeg_quality, 100);
    }

    #[test]
    fn test_lossy_extensions_are_lowercased() {
        let config = BatchConfig::builder()
            .lossy_extensions(["JPG", "Jfif"])
            .build()
            .unwrap();
        assert_eq!(config.lossy_extensions, vec!["jpg", "jfif"]);

        let result = BatchConfig::builder().lossy_extensions([".jpg"]).build();
        assert!(result.is_err());
    }

    #[test]
    fn test_backdrop_color_parsing() {
        assert_eq!("#ffffff".parse::<BackdropColor>().unwrap(), BackdropColor::WHITE);
        assert_eq!("000000".parse::<BackdropColor>().unwrap(), BackdropColor::BLACK);
        assert_eq!(
            "#1a2B3c".parse::<BackdropColor>().unwrap(),
            BackdropColor::new(0x1a, 0x2b, 0x3c)
        );
        assert_eq!(
            "#f80".parse::<BackdropColor>().unwrap(),
            BackdropColor::new(0xff, 0x88, 0x00)
        );
        assert_eq!(" White ".parse::<BackdropColor>().unwrap(), BackdropColor::WHITE);

        for bad in [
            "",
            "#12345",
            "#gggggg",
            "blue-ish",
            "#ffffffff",
            "#ééé",
            "#+f+f+f",
            "+fffff",
            "#-1-1-1",
        ] {
            assert!(bad.parse::<BackdropColor>().is_err(), "{bad} should not parse");
        }
    }

    #[test]
    fn test_backdrop_color_display() {
        assert_eq!(BackdropColor::new(255, 8, 0).to_string(), "#ff0800");
    }

    #[test]
    fn test_manifest_parsing() {
        let manifest = BatchManifest::from_json_str(
            r##"{
                "paths": ["public/a.jpg", "public/b.png"],
                "mode": {"flatten": "#000"},
                "format": "webp",
                "keep_originals": true
            }"##,
        )
        .unwrap();

        assert_eq!(manifest.paths.len(), 2);
        assert_eq!(manifest.mode, Some(CompositingMode::Flatten(BackdropColor::BLACK)));
        assert_eq!(manifest.format, Some(OutputFormat::WebP));

        let config = manifest.apply_to(BatchConfig::builder()).build().unwrap();
        assert!(!config.remove_lossy_originals);
        assert_eq!(config.output_format, OutputFormat::WebP);
    }

    #[test]
    fn test_manifest_minimal_and_invalid() {
        let manifest = BatchManifest::from_json_str(r#"{"paths": [], "mode": "transparent"}"#).unwrap();
        assert!(manifest.paths.is_empty());
        assert_eq!(manifest.mode, Some(CompositingMode::Transparent));
        assert_eq!(manifest.format, None);

        assert!(BatchManifest::from_json_str(r#"{"mode": "transparent"}"#).is_err());
        assert!(BatchManifest::from_json_str(r#"{"paths": [], "colour": "red"}"#).is_err());
        assert!(BatchManifest::from_json_str(r#"{"paths": [], "mode": {"flatten": "nope"}}"#).is_err());
    }

    #[test]
    fn test_manifest_file_resolves_relative_paths() {
        let dir = tempfile::tempdir().unwrap();
        let manifest_path = dir.path().join("batch.json");
        std::fs::write(&manifest_path, r#"{"paths": ["img/a.jpg", "/abs/b.png"]}"#).unwrap();

        let manifest = BatchManifest::from_file(&manifest_path).unwrap();
        assert_eq!(manifest.paths[0], dir.path().join("img/a.jpg"));
        assert_eq!(manifest.paths[1], PathBuf::from("/abs/b.png"));
    }

    #[test]
    fn test_segmentation_threads() {
        let config = SegmentationConfig::default().with_threads(8);
        assert_eq!(config.intra_threads, 8);
        assert_eq!(config.inter_threads, 4);

        let config = SegmentationConfig::default().with_threads(0);
        assert_eq!(config.inter_threads, 0);
    }
}
