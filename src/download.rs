//! Model downloads from `HuggingFace` repositories
//!
//! Files are fetched into a hidden staging directory inside the cache and
//! renamed into place only once every required file has arrived, so an
//! interrupted download never leaves a half-populated model behind.

use crate::cache::ModelCache;
use crate::error::{CutoutError, Result};
use futures_util::stream::TryStreamExt;
#[cfg(feature = "cli")]
use indicatif::{ProgressBar, ProgressStyle};
use reqwest::Client;
use std::fs;
use std::path::Path;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio_util::io::StreamReader;

const HUGGINGFACE_PREFIX: &str = "https://huggingface.co/";

/// Files every model needs
const REQUIRED_FILES: &[&str] = &["config.json", "preprocessor_config.json"];

/// ONNX variants to try; at least one must succeed
const ONNX_FILES: &[(&str, &str)] = &[
    ("onnx/model.onnx", "fp32"),
    ("onnx/model_fp16.onnx", "fp16"),
];

const HTTP_TIMEOUT: Duration = Duration::from_secs(300);

/// Progress bar abstraction that works with and without CLI features
#[derive(Debug)]
pub enum ProgressIndicator {
    #[cfg(feature = "cli")]
    Indicatif(ProgressBar),
    NoOp,
}

impl ProgressIndicator {
    #[cfg(feature = "cli")]
    fn new(show_progress: bool) -> Self {
        if !show_progress {
            return Self::NoOp;
        }
        let pb = ProgressBar::new(0);
        let style = ProgressStyle::default_bar()
            .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {bytes}/{total_bytes} {msg}")
            .map(|s| s.progress_chars("#>-"))
            .unwrap_or_else(|_| ProgressStyle::default_bar());
        pb.set_style(style);
        Self::Indicatif(pb)
    }

    #[cfg(not(feature = "cli"))]
    fn new(_show_progress: bool) -> Self {
        Self::NoOp
    }

    pub fn set_message(&self, msg: String) {
        match self {
            #[cfg(feature = "cli")]
            Self::Indicatif(pb) => pb.set_message(msg),
            Self::NoOp => {},
        }
    }

    pub fn set_length(&self, len: u64) {
        match self {
            #[cfg(feature = "cli")]
            Self::Indicatif(pb) => pb.set_length(len),
            Self::NoOp => {},
        }
    }

    pub fn set_position(&self, pos: u64) {
        match self {
            #[cfg(feature = "cli")]
            Self::Indicatif(pb) => pb.set_position(pos),
            Self::NoOp => {},
        }
    }

    pub fn finish_with_message(&self, msg: String) {
        match self {
            #[cfg(feature = "cli")]
            Self::Indicatif(pb) => pb.finish_with_message(msg),
            Self::NoOp => {
                let _ = msg;
            },
        }
    }
}

/// Downloads models into a `ModelCache`
#[derive(Debug)]
pub struct ModelDownloader {
    client: Client,
    cache: ModelCache,
}

impl ModelDownloader {
    /// Create a downloader writing into `cache`
    ///
    /// # Errors
    /// - the HTTP client cannot be built
    pub fn new(cache: ModelCache) -> Result<Self> {
        let client = Client::builder()
            .timeout(HTTP_TIMEOUT)
            .build()
            .map_err(|e| CutoutError::network_error("Failed to create HTTP client", e))?;
        Ok(Self { client, cache })
    }

    #[must_use]
    pub fn cache(&self) -> &ModelCache {
        &self.cache
    }

    /// Download a model repository into the cache and return its model ID
    ///
    /// Already-cached models are returned immediately.
    ///
    /// # Errors
    /// - the URL is not a `HuggingFace` repository
    /// - a configuration file fails to download, or no ONNX variant does
    /// - the staging directory cannot be created or moved into place
    pub async fn download_model(&self, url: &str, show_progress: bool) -> Result<String> {
        validate_model_url(url)?;
        let model_id = ModelCache::url_to_model_id(url);
        if !ModelCache::is_valid_model_id(&model_id) {
            return Err(CutoutError::invalid_config(format!(
                "Cannot derive a cache entry name from {url}"
            )));
        }
        if self.cache.is_model_cached(&model_id) {
            log::info!("Model already cached: {model_id}");
            return Ok(model_id);
        }

        log::info!("Downloading model {model_id} from {url}");
        let staging = tempfile::Builder::new()
            .prefix(".download-")
            .tempdir_in(self.cache.cache_dir())
            .map_err(|e| {
                CutoutError::file_io_error("create staging directory", self.cache.cache_dir(), &e)
            })?;

        let progress = ProgressIndicator::new(show_progress);
        if let Err(e) = self.download_model_files(url, staging.path(), &progress).await {
            progress.finish_with_message("Download failed".to_string());
            return Err(e);
        }

        let final_dir = self.cache.get_model_path(&model_id);
        if final_dir.exists() {
            fs::remove_dir_all(&final_dir).map_err(|e| {
                CutoutError::file_io_error("replace incomplete model directory", &final_dir, &e)
            })?;
        }
        fs::rename(staging.path(), &final_dir)
            .map_err(|e| CutoutError::file_io_error("move model into cache", &final_dir, &e))?;

        progress.finish_with_message(format!("Downloaded {model_id}"));
        log::info!("Model cached at {}", final_dir.display());
        Ok(model_id)
    }

    async fn download_model_files(
        &self,
        base_url: &str,
        download_dir: &Path,
        progress: &ProgressIndicator,
    ) -> Result<()> {
        let raw_base = format!("{}/resolve/main/", base_url.trim_end_matches('/'));

        for file_name in REQUIRED_FILES {
            progress.set_message(format!("Downloading {file_name}"));
            self.download_file(&format!("{raw_base}{file_name}"), &download_dir.join(file_name), progress)
                .await?;
        }

        let mut downloaded = 0;
        for (file_path, variant) in ONNX_FILES {
            progress.set_message(format!("Downloading {variant} model"));
            match self
                .download_file(&format!("{raw_base}{file_path}"), &download_dir.join(file_path), progress)
                .await
            {
                Ok(()) => {
                    downloaded += 1;
                    log::info!("Downloaded {variant} model variant");
                },
                Err(e) => log::warn!("Failed to download {variant} variant: {e}"),
            }
        }

        if downloaded == 0 {
            return Err(CutoutError::network_error(
                "Failed to download any ONNX model variants",
                base_url,
            ));
        }
        Ok(())
    }

    /// Stream one file to disk
    async fn download_file(
        &self,
        url: &str,
        local_path: &Path,
        progress: &ProgressIndicator,
    ) -> Result<()> {
        log::debug!("Downloading: {url} -> {}", local_path.display());
        if let Some(parent) = local_path.parent() {
            fs::create_dir_all(parent)
                .map_err(|e| CutoutError::file_io_error("create directory", parent, &e))?;
        }

        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| CutoutError::network_error(format!("Failed to download {url}"), e))?;
        let status = response.status();
        if !status.is_success() {
            return Err(CutoutError::network_error(format!("HTTP error for {url}"), status));
        }

        let total_size = response.content_length();
        if let Some(total) = total_size {
            progress.set_length(total);
        }
        progress.set_position(0);

        let mut file = tokio::fs::File::create(local_path)
            .await
            .map_err(|e| CutoutError::file_io_error("create file", local_path, &e))?;
        let mut stream = StreamReader::new(
            response
                .bytes_stream()
                .map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, e)),
        );

        let mut downloaded = 0u64;
        let mut buffer = vec![0; 8192];
        loop {
            let bytes_read = stream
                .read(&mut buffer)
                .await
                .map_err(|e| CutoutError::network_error("Failed to read download stream", e))?;
            if bytes_read == 0 {
                break;
            }

            file.write_all(buffer.get(..bytes_read).unwrap_or(&[]))
                .await
                .map_err(|e| CutoutError::file_io_error("write to file", local_path, &e))?;
            downloaded += bytes_read as u64;

            if total_size.is_some() {
                progress.set_position(downloaded);
            } else {
                progress.set_message(format!("Downloaded {:.1} MB", downloaded as f64 / 1_048_576.0));
            }
        }

        file.flush()
            .await
            .map_err(|e| CutoutError::file_io_error("flush file", local_path, &e))?;
        log::debug!("Downloaded {downloaded} bytes to {}", local_path.display());
        Ok(())
    }
}

/// Check that a URL names a `HuggingFace` repository (`https://huggingface.co/<user>/<repo>`)
///
/// # Errors
/// - empty URL, other hosts, or a missing user or repository segment
pub fn validate_model_url(url: &str) -> Result<()> {
    parse_huggingface_url(url).map(|_| ())
}

/// Split a `HuggingFace` repository URL into `(user, repo)`
///
/// # Errors
/// - empty URL, other hosts, or a missing user or repository segment
pub fn parse_huggingface_url(url: &str) -> Result<(String, String)> {
    if url.is_empty() {
        return Err(CutoutError::invalid_config("Model URL cannot be empty"));
    }
    let Some(repo_path) = url.strip_prefix(HUGGINGFACE_PREFIX) else {
        return Err(CutoutError::invalid_config(format!(
            "Unsupported URL format: {url}. Only HuggingFace repositories are supported (https://huggingface.co/...)"
        )));
    };

    let mut parts = repo_path.split('/').filter(|part| !part.is_empty());
    match (parts.next(), parts.next()) {
        (Some(user), Some(repo)) => Ok((user.to_string(), repo.to_string())),
        _ => Err(CutoutError::invalid_config(format!(
            "Invalid HuggingFace repository URL: {url}. Expected https://huggingface.co/<user>/<repo>"
        ))),
    }
}
