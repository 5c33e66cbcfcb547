//! Model specification and loading for the neural segmenters
//!
//! Models use the `HuggingFace` directory layout:
//!
//! ```text
//! <model>/
//!   config.json                 model_type
//!   preprocessor_config.json    size.{height,width}, image_mean, image_std (0-255)
//!   onnx/model.onnx             fp32 variant
//!   onnx/model_fp16.onnx        fp16 variant
//! ```

use crate::cache::ModelCache;
use crate::config::ExecutionProvider;
use crate::error::{CutoutError, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// URL of the model fetched automatically when nothing else is configured
pub const DEFAULT_MODEL_URL: &str = "https://huggingface.co/imgly/isnet-general-onnx";

/// Model source specification
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ModelSource {
    /// Model directory on the filesystem
    External(PathBuf),
    /// Model in the download cache, by model ID
    Downloaded(String),
}

impl ModelSource {
    /// Get a display name for tracing and logging
    #[must_use]
    pub fn display_name(&self) -> String {
        match self {
            Self::External(path) => format!(
                "external:{}",
                path.file_name().unwrap_or_default().to_string_lossy()
            ),
            Self::Downloaded(model_id) => format!("cached:{model_id}"),
        }
    }
}

/// Model source plus optional variant (`fp16`, `fp32`)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelSpec {
    pub source: ModelSource,
    pub variant: Option<String>,
}

impl Default for ModelSpec {
    fn default() -> Self {
        Self {
            source: ModelSource::Downloaded(ModelCache::url_to_model_id(DEFAULT_MODEL_URL)),
            variant: None,
        }
    }
}

/// Preprocessing parameters a model expects
#[derive(Debug, Clone, PartialEq)]
pub struct PreprocessingConfig {
    /// Target size as `[height, width]`
    pub target_size: [u32; 2],
    /// Per-channel mean in 0-1 range
    pub normalization_mean: [f32; 3],
    /// Per-channel std in 0-1 range
    pub normalization_std: [f32; 3],
}

/// Model information and metadata
#[derive(Debug, Clone)]
pub struct ModelInfo {
    pub name: String,
    pub precision: String,
    pub size_bytes: u64,
    pub input_shape: (usize, usize, usize, usize), // NCHW format
    pub output_shape: (usize, usize, usize, usize),
}

#[derive(Debug, Deserialize)]
struct ModelConfigFile {
    #[serde(default)]
    model_type: Option<String>,
}

#[derive(Debug, Deserialize)]
struct PreprocessorConfigFile {
    size: ImageSizeEntry,
    image_mean: Vec<f64>,
    image_std: Vec<f64>,
}

#[derive(Debug, Deserialize)]
struct ImageSizeEntry {
    height: u32,
    width: u32,
}

impl PreprocessorConfigFile {
    fn into_preprocessing_config(self) -> Result<PreprocessingConfig> {
        if self.size.height == 0 || self.size.width == 0 {
            return Err(CutoutError::model("Preprocessor size must be non-zero"));
        }

        Ok(PreprocessingConfig {
            target_size: [self.size.height, self.size.width],
            normalization_mean: Self::channels_from_255(&self.image_mean, "image_mean")?,
            normalization_std: Self::channels_from_255(&self.image_std, "image_std")?,
        })
    }

    /// Convert three 0-255 values to the 0-1 range
    fn channels_from_255(values: &[f64], field: &str) -> Result<[f32; 3]> {
        let [a, b, c, ..] = values else {
            return Err(CutoutError::model(format!(
                "{field} must have at least 3 values"
            )));
        };
        if field == "image_std" && [a, b, c].iter().any(|v| **v <= 0.0) {
            return Err(CutoutError::model("image_std values must be positive"));
        }
        Ok([
            (a / 255.0) as f32,
            (b / 255.0) as f32,
            (c / 255.0) as f32,
        ])
    }
}

/// List the ONNX variants present in a model's `onnx/` directory
pub(crate) fn scan_variants(onnx_dir: &Path) -> Vec<String> {
    let mut variants = Vec::new();
    let Ok(entries) = fs::read_dir(onnx_dir) else {
        return variants;
    };

    for entry in entries.flatten() {
        let file_name = entry.file_name();
        let Some(file_name) = file_name.to_str() else {
            continue;
        };
        match file_name {
            "model.onnx" => variants.push("fp32".to_string()),
            other => {
                if let Some(variant) = other
                    .strip_prefix("model_")
                    .and_then(|s| s.strip_suffix(".onnx"))
                {
                    variants.push(variant.to_string());
                }
            },
        }
    }

    variants.sort();
    variants
}

/// Loads a model directory and resolves which variant to run
#[derive(Debug, Clone)]
pub struct ModelManager {
    label: String,
    model_dir: PathBuf,
    model_type: String,
    variant: String,
    preprocessing: PreprocessingConfig,
}

impl ModelManager {
    /// Create a model manager from a specification, using the default cache
    ///
    /// # Errors
    /// - cache directory cannot be determined
    /// - the model is not cached or its directory is invalid
    pub fn from_spec(spec: &ModelSpec, provider: ExecutionProvider) -> Result<Self> {
        let cache = ModelCache::new()?;
        Self::from_spec_with_cache(spec, &cache, provider)
    }

    /// Create a model manager from a specification and an explicit cache
    ///
    /// # Errors
    /// - the downloaded model is missing from the cache
    /// - configuration files are missing or malformed
    /// - the requested variant is not available
    pub fn from_spec_with_cache(
        spec: &ModelSpec,
        cache: &ModelCache,
        provider: ExecutionProvider,
    ) -> Result<Self> {
        match &spec.source {
            ModelSource::External(path) => {
                Self::from_directory(path, spec.variant.as_deref(), provider)
            },
            ModelSource::Downloaded(model_id) => {
                if !cache.is_model_cached(model_id) {
                    let available: Vec<String> = cache
                        .scan_cached_models()?
                        .into_iter()
                        .map(|m| m.model_id)
                        .collect();
                    return Err(CutoutError::model(format!(
                        "Model '{model_id}' not found in cache. Available models: {available:?}"
                    )));
                }
                let mut manager = Self::from_directory(
                    cache.get_model_path(model_id),
                    spec.variant.as_deref(),
                    provider,
                )?;
                manager.label = spec.source.display_name();
                Ok(manager)
            },
        }
    }

    /// Create a model manager for a model directory
    ///
    /// # Errors
    /// - the directory does not exist
    /// - `config.json` or `preprocessor_config.json` is missing or malformed
    /// - no ONNX file exists, or the requested variant is not among them
    pub fn from_directory<P: AsRef<Path>>(
        model_dir: P,
        requested_variant: Option<&str>,
        provider: ExecutionProvider,
    ) -> Result<Self> {
        let model_dir = model_dir.as_ref();
        if !model_dir.is_dir() {
            return Err(CutoutError::model(format!(
                "Model directory does not exist: {}",
                model_dir.display()
            )));
        }

        let config: ModelConfigFile = Self::read_json(&model_dir.join("config.json"))?;
        let preprocessor: PreprocessorConfigFile =
            Self::read_json(&model_dir.join("preprocessor_config.json"))?;

        let onnx_dir = model_dir.join("onnx");
        let available = scan_variants(&onnx_dir);
        if available.is_empty() {
            return Err(CutoutError::model(format!(
                "No ONNX model files found in {}",
                onnx_dir.display()
            )));
        }
        let variant = Self::resolve_variant(&available, requested_variant, provider)?;
        log::debug!(
            "Resolved model variant '{variant}' for {provider} provider (available: {available:?})"
        );

        Ok(Self {
            label: ModelSource::External(model_dir.to_path_buf()).display_name(),
            model_dir: model_dir.to_path_buf(),
            model_type: config.model_type.unwrap_or_else(|| "unknown".to_string()),
            variant,
            preprocessing: preprocessor.into_preprocessing_config()?,
        })
    }

    fn read_json<T: serde::de::DeserializeOwned>(path: &Path) -> Result<T> {
        let contents = fs::read_to_string(path)
            .map_err(|e| CutoutError::file_io_error("read model configuration", path, &e))?;
        serde_json::from_str(&contents).map_err(|e| {
            CutoutError::model(format!("Failed to parse {}: {e}", path.display()))
        })
    }

    /// Pick a variant: explicit request, then provider preference, then fp16, fp32, first
    fn resolve_variant(
        available: &[String],
        requested: Option<&str>,
        provider: ExecutionProvider,
    ) -> Result<String> {
        let has = |name: &str| available.iter().any(|v| v == name);

        if let Some(variant) = requested {
            if has(variant) {
                return Ok(variant.to_string());
            }
            return Err(CutoutError::model(format!(
                "Requested variant '{variant}' not available. Available: {available:?}"
            )));
        }

        let preferred = match provider {
            // CoreML runs fp16 graphs poorly
            ExecutionProvider::CoreMl => "fp32",
            ExecutionProvider::Cuda | ExecutionProvider::Cpu => "fp16",
            ExecutionProvider::Auto => {
                if cfg!(target_os = "macos") {
                    "fp32"
                } else {
                    "fp16"
                }
            },
        };

        [preferred, "fp16", "fp32"]
            .into_iter()
            .find(|name| has(name))
            .map(str::to_string)
            .or_else(|| available.first().cloned())
            .ok_or_else(|| CutoutError::model("No model variants available"))
    }

    /// Path of the ONNX file for the resolved variant
    #[must_use]
    pub fn model_file_path(&self) -> PathBuf {
        let onnx_dir = self.model_dir.join("onnx");
        match self.variant.as_str() {
            "fp32" => onnx_dir.join("model.onnx"),
            variant => onnx_dir.join(format!("model_{variant}.onnx")),
        }
    }

    /// Read the model bytes
    ///
    /// # Errors
    /// - the model file is missing or unreadable
    pub fn load_model(&self) -> Result<Vec<u8>> {
        let path = self.model_file_path();
        fs::read(&path).map_err(|e| CutoutError::file_io_error("read model file", &path, &e))
    }

    /// Describe the model without loading it
    ///
    /// # Errors
    /// - the model file metadata cannot be read
    pub fn get_info(&self) -> Result<ModelInfo> {
        let path = self.model_file_path();
        let size_bytes = fs::metadata(&path)
            .map_err(|e| CutoutError::file_io_error("inspect model file", &path, &e))?
            .len();
        let [height, width] = self.preprocessing.target_size;

        Ok(ModelInfo {
            name: format!("{}-{}", self.model_type, self.variant),
            precision: self.variant.clone(),
            size_bytes,
            input_shape: (1, 3, height as usize, width as usize),
            output_shape: (1, 1, height as usize, width as usize),
        })
    }

    #[must_use]
    pub fn get_preprocessing_config(&self) -> PreprocessingConfig {
        self.preprocessing.clone()
    }

    #[must_use]
    pub fn variant(&self) -> &str {
        &self.variant
    }

    /// Display name for logging (`cached:<id>` or `external:<dir>`)
    #[must_use]
    pub fn label(&self) -> &str {
        &self.label
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    /// Write a minimal model directory with the given ONNX files
    pub(crate) fn write_model_dir(dir: &Path, onnx_files: &[&str]) {
        fs::write(dir.join("config.json"), r#"{"model_type": "isnet"}"#).unwrap();
        fs::write(
            dir.join("preprocessor_config.json"),
            r#"{"size": {"height": 1024, "width": 1024},
                "image_mean": [127.5, 127.5, 127.5],
                "image_std": [255.0, 255.0, 255.0]}"#,
        )
        .unwrap();
        fs::create_dir_all(dir.join("onnx")).unwrap();
        for file in onnx_files {
            fs::write(dir.join("onnx").join(file), b"onnx").unwrap();
        }
    }

    #[test]
    fn test_model_source_display_name() {
        let external = ModelSource::External(PathBuf::from("/models/isnet"));
        assert_eq!(external.display_name(), "external:isnet");

        let cached = ModelSource::Downloaded("imgly--isnet-general-onnx".to_string());
        assert_eq!(cached.display_name(), "cached:imgly--isnet-general-onnx");
    }

    #[test]
    fn test_default_spec_points_at_default_model() {
        let spec = ModelSpec::default();
        assert_eq!(
            spec.source,
            ModelSource::Downloaded("imgly--isnet-general-onnx".to_string())
        );
        assert!(spec.variant.is_none());
    }

    #[test]
    fn test_from_directory_parses_preprocessing() {
        let dir = tempfile::tempdir().unwrap();
        write_model_dir(dir.path(), &["model.onnx", "model_fp16.onnx"]);

        let manager =
            ModelManager::from_directory(dir.path(), Some("fp32"), ExecutionProvider::Cpu).unwrap();
        let config = manager.get_preprocessing_config();
        assert_eq!(config.target_size, [1024, 1024]);
        assert!((config.normalization_mean[0] - 0.5).abs() < 1e-6);
        assert!((config.normalization_std[2] - 1.0).abs() < 1e-6);
        assert_eq!(manager.model_file_path(), dir.path().join("onnx/model.onnx"));

        let info = manager.get_info().unwrap();
        assert_eq!(info.name, "isnet-fp32");
        assert_eq!(info.size_bytes, 4);
        assert_eq!(info.input_shape, (1, 3, 1024, 1024));
    }

    #[test]
    fn test_variant_resolution() {
        let dir = tempfile::tempdir().unwrap();
        write_model_dir(dir.path(), &["model.onnx", "model_fp16.onnx"]);

        let cpu = ModelManager::from_directory(dir.path(), None, ExecutionProvider::Cpu).unwrap();
        assert_eq!(cpu.variant(), "fp16");

        let coreml =
            ModelManager::from_directory(dir.path(), None, ExecutionProvider::CoreMl).unwrap();
        assert_eq!(coreml.variant(), "fp32");

        let missing = ModelManager::from_directory(dir.path(), Some("int8"), ExecutionProvider::Cpu);
        assert!(matches!(missing, Err(CutoutError::Model(_))));
    }

    #[test]
    fn test_only_fp32_available() {
        let dir = tempfile::tempdir().unwrap();
        write_model_dir(dir.path(), &["model.onnx"]);

        let manager = ModelManager::from_directory(dir.path(), None, ExecutionProvider::Cuda).unwrap();
        assert_eq!(manager.variant(), "fp32");
    }

    #[test]
    fn test_invalid_model_directories() {
        let dir = tempfile::tempdir().unwrap();
        assert!(ModelManager::from_directory(dir.path().join("nope"), None, ExecutionProvider::Cpu)
            .is_err());

        write_model_dir(dir.path(), &[]);
        let err = ModelManager::from_directory(dir.path(), None, ExecutionProvider::Cpu).unwrap_err();
        assert!(err.to_string().contains("No ONNX model files"));

        fs::write(
            dir.path().join("preprocessor_config.json"),
            r#"{"size": {"height": 1024, "width": 1024}, "image_mean": [0.5], "image_std": [1, 1, 1]}"#,
        )
        .unwrap();
        fs::write(dir.path().join("onnx/model.onnx"), b"onnx").unwrap();
        let err = ModelManager::from_directory(dir.path(), None, ExecutionProvider::Cpu).unwrap_err();
        assert!(err.to_string().contains("image_mean"));
    }

    #[test]
    fn test_scan_variants_ignores_other_files() {
        let dir = tempfile::tempdir().unwrap();
        let onnx = dir.path().join("onnx");
        fs::create_dir_all(&onnx).unwrap();
        for file in ["model.onnx", "model_quantized.onnx", "README.md", "weights.bin"] {
            fs::write(onnx.join(file), b"").unwrap();
        }
        assert_eq!(scan_variants(&onnx), vec!["fp32", "quantized"]);
    }
}
