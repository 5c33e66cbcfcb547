//! On-disk cache of downloaded segmentation models
//!
//! Models live under `<cache>/product-cutout/models/<model-id>/` where the
//! base cache directory follows the platform convention (`~/.cache` on Linux)
//! unless `PRODUCT_CUTOUT_CACHE_DIR` or an explicit directory overrides it.

use crate::error::{CutoutError, Result};
use crate::models::{scan_variants, DEFAULT_MODEL_URL};
use sha2::{Digest, Sha256};
use std::fs;
use std::path::{Component, Path, PathBuf};

/// Environment variable overriding the cache location
pub const CACHE_DIR_ENV: &str = "PRODUCT_CUTOUT_CACHE_DIR";

const HUGGINGFACE_PREFIX: &str = "https://huggingface.co/";

/// A model directory found in the cache
#[derive(Debug, Clone)]
pub struct CachedModelInfo {
    /// Model identifier (derived from URL)
    pub model_id: String,
    /// Path to the cached model directory
    pub path: PathBuf,
    /// Available ONNX variants (fp16, fp32, ...)
    pub variants: Vec<String>,
    /// Total size of the model directory in bytes
    pub size_bytes: u64,
}

/// Model cache manager
#[derive(Debug, Clone)]
pub struct ModelCache {
    cache_dir: PathBuf,
}

impl ModelCache {
    /// Open the default cache, creating its directory if needed
    ///
    /// # Errors
    /// - no cache directory can be determined for this platform
    /// - the directory cannot be created
    pub fn new() -> Result<Self> {
        let models_dir = match std::env::var_os(CACHE_DIR_ENV) {
            Some(dir) => PathBuf::from(dir).join("models"),
            None => dirs::cache_dir()
                .ok_or_else(|| {
                    CutoutError::invalid_config(format!(
                        "Failed to determine cache directory. Set {CACHE_DIR_ENV}."
                    ))
                })?
                .join("product-cutout")
                .join("models"),
        };
        Self::open(models_dir)
    }

    /// Open a cache rooted at a custom directory (`<dir>/models`)
    ///
    /// # Errors
    /// - the directory cannot be created
    pub fn with_custom_cache_dir(cache_dir: &Path) -> Result<Self> {
        Self::open(cache_dir.join("models"))
    }

    fn open(models_dir: PathBuf) -> Result<Self> {
        fs::create_dir_all(&models_dir)
            .map_err(|e| CutoutError::file_io_error("create cache directory", &models_dir, &e))?;
        Ok(Self {
            cache_dir: models_dir,
        })
    }

    /// Derive a filesystem-safe model ID from a URL
    ///
    /// ```
    /// use product_cutout::cache::ModelCache;
    ///
    /// let id = ModelCache::url_to_model_id("https://huggingface.co/imgly/isnet-general-onnx");
    /// assert_eq!(id, "imgly--isnet-general-onnx");
    /// ```
    #[must_use]
    pub fn url_to_model_id(url: &str) -> String {
        if let Some(repo) = url.strip_prefix(HUGGINGFACE_PREFIX) {
            return repo.trim_end_matches('/').replace('/', "--");
        }

        let digest = Sha256::digest(url.as_bytes());
        let mut id = format!("url-{digest:x}");
        id.truncate(16);
        id
    }

    /// ID of the model downloaded when none is configured
    #[must_use]
    pub fn default_model_id() -> String {
        Self::url_to_model_id(DEFAULT_MODEL_URL)
    }

    /// Whether `model_id` names a single directory entry inside the cache
    ///
    /// Absolute paths, separators, `.`/`..` and hidden names are rejected.
    ///
    /// ```
    /// use product_cutout::cache::ModelCache;
    ///
    /// assert!(ModelCache::is_valid_model_id("imgly--isnet-general-onnx"));
    /// assert!(!ModelCache::is_valid_model_id(".."));
    /// assert!(!ModelCache::is_valid_model_id("/home/me/models/isnet"));
    /// ```
    #[must_use]
    pub fn is_valid_model_id(model_id: &str) -> bool {
        let mut components = Path::new(model_id).components();
        matches!(
            (components.next(), components.next()),
            (Some(Component::Normal(name)), None)
                if name == model_id && !model_id.starts_with('.')
        )
    }

    /// Whether a complete model directory exists for this ID
    #[must_use]
    pub fn is_model_cached(&self, model_id: &str) -> bool {
        Self::is_valid_model_id(model_id)
            && Self::is_valid_model_directory(&self.get_model_path(model_id))
    }

    /// Path to a model directory (may not exist)
    #[must_use]
    pub fn get_model_path(&self, model_id: &str) -> PathBuf {
        self.cache_dir.join(model_id)
    }

    #[must_use]
    pub fn cache_dir(&self) -> &Path {
        &self.cache_dir
    }

    /// List the valid models in the cache, sorted by ID
    ///
    /// # Errors
    /// - the cache directory cannot be read
    pub fn scan_cached_models(&self) -> Result<Vec<CachedModelInfo>> {
        let mut models = Vec::new();
        for path in self.model_directories()? {
            if !Self::is_valid_model_directory(&path) {
                log::debug!("Skipping invalid model directory: {}", path.display());
                continue;
            }
            let Some(model_id) = path.file_name().and_then(|n| n.to_str()) else {
                continue;
            };
            models.push(CachedModelInfo {
                model_id: model_id.to_string(),
                variants: scan_variants(&path.join("onnx")),
                size_bytes: directory_size(&path).unwrap_or(0),
                path,
            });
        }

        models.sort_by(|a, b| a.model_id.cmp(&b.model_id));
        Ok(models)
    }

    /// Remove every model directory, returning the removed IDs
    ///
    /// # Errors
    /// - the cache directory cannot be read
    /// - a model directory cannot be removed
    pub fn clear_all_models(&self) -> Result<Vec<String>> {
        let mut removed = Vec::new();
        for path in self.model_directories()? {
            let model_id = path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default();
            log::info!("Removing cached model: {model_id}");
            fs::remove_dir_all(&path)
                .map_err(|e| CutoutError::file_io_error("remove cached model", &path, &e))?;
            removed.push(model_id);
        }
        removed.sort();
        Ok(removed)
    }

    /// Remove one model; `false` if it was not cached
    ///
    /// Only directories listed in the cache are removed.
    ///
    /// # Errors
    /// - `model_id` is not a plain cache entry name (a path, `..`, ...)
    /// - the cache directory cannot be read
    /// - the model directory cannot be removed
    pub fn clear_specific_model(&self, model_id: &str) -> Result<bool> {
        if !Self::is_valid_model_id(model_id) {
            return Err(CutoutError::invalid_config(format!(
                "Invalid model ID '{model_id}': expected a cached model name, not a path"
            )));
        }
        let model_path = self.get_model_path(model_id);
        if !self.model_directories()?.contains(&model_path) {
            return Ok(false);
        }

        log::info!("Removing cached model: {model_id}");
        fs::remove_dir_all(&model_path)
            .map_err(|e| CutoutError::file_io_error("remove cached model", &model_path, &e))?;
        Ok(true)
    }

    fn model_directories(&self) -> Result<Vec<PathBuf>> {
        if !self.cache_dir.exists() {
            return Ok(Vec::new());
        }
        let entries = fs::read_dir(&self.cache_dir).map_err(|e| {
            CutoutError::file_io_error("read cache directory", &self.cache_dir, &e)
        })?;

        let mut dirs = Vec::new();
        for entry in entries {
            let path = entry
                .map_err(|e| CutoutError::file_io_error("read cache directory", &self.cache_dir, &e))?
                .path();
            // Staging directories from interrupted downloads start with a dot
            let hidden = path
                .file_name()
                .and_then(|n| n.to_str())
                .is_some_and(|n| n.starts_with('.'));
            if path.is_dir() && !hidden {
                dirs.push(path);
            }
        }
        Ok(dirs)
    }

    pub(crate) fn is_valid_model_directory(model_path: &Path) -> bool {
        model_path.join("config.json").is_file()
            && model_path.join("preprocessor_config.json").is_file()
            && model_path.join("onnx").is_dir()
    }
}

fn directory_size(dir: &Path) -> std::io::Result<u64> {
    let mut total = 0;
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        let metadata = entry.metadata()?;
        if metadata.is_dir() {
            total += directory_size(&entry.path())?;
        } else {
            total += metadata.len();
        }
    }
    Ok(total)
}

/// Format a byte count for humans
#[must_use]
pub fn format_size(bytes: u64) -> String {
    const UNITS: &[&str] = &["B", "KB", "MB", "GB", "TB"];
    let mut size = bytes as f64;
    let mut unit = 0;

    while size >= 1024.0 && unit < UNITS.len() - 1 {
        size /= 1024.0;
        unit += 1;
    }

    let label = UNITS.get(unit).unwrap_or(&"B");
    if unit == 0 {
        format!("{bytes} {label}")
    } else {
        format!("{size:.1} {label}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::tests::write_model_dir;
    use tempfile::TempDir;

    #[test]
    fn test_url_to_model_id() {
        assert_eq!(
            ModelCache::url_to_model_id("https://huggingface.co/imgly/isnet-general-onnx"),
            "imgly--isnet-general-onnx"
        );
        assert_eq!(
            ModelCache::url_to_model_id("https://huggingface.co/ZhengPeng7/BiRefNet/"),
            "ZhengPeng7--BiRefNet"
        );

        let id = ModelCache::url_to_model_id("https://example.com/model.onnx");
        assert!(id.starts_with("url-"));
        assert_eq!(id.len(), 16);
        assert_eq!(id, ModelCache::url_to_model_id("https://example.com/model.onnx"));
        assert_ne!(id, ModelCache::url_to_model_id("https://example.com/other.onnx"));
    }

    #[test]
    fn test_default_model_id() {
        assert_eq!(ModelCache::default_model_id(), "imgly--isnet-general-onnx");
    }

    #[test]
    fn test_format_size() {
        assert_eq!(format_size(0), "0 B");
        assert_eq!(format_size(512), "512 B");
        assert_eq!(format_size(1536), "1.5 KB");
        assert_eq!(format_size(1024 * 1024), "1.0 MB");
        assert_eq!(format_size(3 * 1024 * 1024 * 1024), "3.0 GB");
    }

    #[test]
    fn test_custom_cache_dir() {
        let temp_dir = TempDir::new().unwrap();
        let cache = ModelCache::with_custom_cache_dir(&temp_dir.path().join("custom")).unwrap();
        assert!(temp_dir.path().join("custom/models").is_dir());
        assert_eq!(cache.cache_dir(), temp_dir.path().join("custom/models"));
    }

    #[test]
    fn test_scan_and_is_cached() {
        let temp_dir = TempDir::new().unwrap();
        let cache = ModelCache::with_custom_cache_dir(temp_dir.path()).unwrap();
        assert!(cache.scan_cached_models().unwrap().is_empty());

        let good = cache.get_model_path("b--good");
        fs::create_dir_all(&good).unwrap();
        write_model_dir(&good, &["model.onnx", "model_fp16.onnx"]);
        let other = cache.get_model_path("a--other");
        fs::create_dir_all(&other).unwrap();
        write_model_dir(&other, &["model.onnx"]);

        fs::create_dir_all(cache.get_model_path("broken")).unwrap();
        fs::create_dir_all(cache.get_model_path(".staging-1234")).unwrap();

        assert!(cache.is_model_cached("b--good"));
        assert!(!cache.is_model_cached("broken"));

        let models = cache.scan_cached_models().unwrap();
        let ids: Vec<_> = models.iter().map(|m| m.model_id.as_str()).collect();
        assert_eq!(ids, vec!["a--other", "b--good"]);
        assert_eq!(models[1].variants, vec!["fp16", "fp32"]);
        assert!(models[1].size_bytes > 0);
    }

    #[test]
    fn test_clear_models() {
        let temp_dir = TempDir::new().unwrap();
        let cache = ModelCache::with_custom_cache_dir(temp_dir.path()).unwrap();
        for id in ["model1", "model2"] {
            fs::create_dir_all(cache.get_model_path(id)).unwrap();
        }

        assert!(cache.clear_specific_model("model1").unwrap());
        assert!(!cache.clear_specific_model("model1").unwrap());

        fs::create_dir_all(cache.get_model_path("model3")).unwrap();
        let removed = cache.clear_all_models().unwrap();
        assert_eq!(removed, vec!["model2", "model3"]);
        assert!(cache.scan_cached_models().unwrap().is_empty());
    }

    #[test]
    fn test_clear_specific_model_stays_inside_cache() {
        let temp_dir = TempDir::new().unwrap();
        let cache = ModelCache::with_custom_cache_dir(&temp_dir.path().join("cache")).unwrap();
        let sibling = temp_dir.path().join("my-model");
        fs::create_dir_all(&sibling).unwrap();
        write_model_dir(&sibling, &["model.onnx"]);
        let marker = temp_dir.path().join("cache/keep.txt");
        fs::write(&marker, b"keep").unwrap();

        let absolute = sibling.to_string_lossy().into_owned();
        for id in [absolute.as_str(), "..", "../my-model", ".", "", ".staging"] {
            assert!(cache.clear_specific_model(id).is_err(), "{id:?} accepted");
            assert!(!cache.is_model_cached(id));
        }
        assert!(sibling.join("onnx/model.onnx").is_file());
        assert!(marker.is_file());
        assert!(cache.cache_dir().is_dir());
    }

    #[test]
    fn test_valid_model_ids() {
        assert!(ModelCache::is_valid_model_id("ZhengPeng7--BiRefNet"));
        assert!(ModelCache::is_valid_model_id("url-0123456789ab"));
        for id in ["", ".", "..", "a/b", "/abs", ".download-x", "a/../b"] {
            assert!(!ModelCache::is_valid_model_id(id), "{id:?}");
        }
    }
}
