//! `product-cutout` command-line interface
//!
//! Removes backgrounds from a list of product images. Paths come from the
//! command line, a JSON manifest, or the built-in product list.

use super::config::CliConfigBuilder;
use crate::{
    batch::BatchProcessor,
    cache::{format_size, ModelCache},
    config::{BackdropColor, SegmentationConfig},
    download::{validate_model_url, ModelDownloader},
    models::{ModelSource, DEFAULT_MODEL_URL},
    segmentation::create_segmenter,
    services::create_cli_progress_reporter,
    tracing_config::{init_cli_tracing, spans},
    utils::ExecutionProviderManager,
};
use anyhow::{Context, Result};
use clap::{Parser, ValueEnum};
use std::path::PathBuf;

/// Batch background removal for product images
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
#[command(name = "product-cutout")]
#[allow(clippy::struct_excessive_bools)]
pub struct Cli {
    /// Images to process, in order [default: manifest paths or the built-in product list]
    #[arg(value_name = "PATHS")]
    pub paths: Vec<PathBuf>,

    /// JSON manifest with paths and batch settings
    #[arg(long, value_name = "FILE")]
    pub manifest: Option<PathBuf>,

    /// Flatten onto a solid backdrop instead of keeping transparency [default colour: white]
    #[arg(
        long,
        value_name = "COLOR",
        num_args = 0..=1,
        require_equals = true,
        default_missing_value = "#ffffff"
    )]
    pub flatten: Option<BackdropColor>,

    /// Output format [default: png]
    #[arg(short, long, value_enum)]
    pub format: Option<CliOutputFormat>,

    /// JPEG quality (1-100)
    #[arg(long, default_value_t = 90, value_parser = clap::value_parser!(u8).range(1..=100))]
    pub jpeg_quality: u8,

    /// Keep JPEG originals after writing the cutout
    #[arg(long)]
    pub keep_originals: bool,

    /// Segmenter in format backend:provider (onnx:auto, onnx:cuda, onnx:coreml, tract:cpu, colorkey)
    #[arg(short, long, default_value = "onnx:auto")]
    pub execution_provider: String,

    /// Model URL, cached model ID, or model directory [default: ISNet general]
    #[arg(short, long)]
    pub model: Option<String>,

    /// Model variant (fp16, fp32) [default: chosen for the execution provider]
    #[arg(long)]
    pub variant: Option<String>,

    /// Number of inference threads (0 = auto-detect)
    #[arg(short, long, default_value_t = 0)]
    pub threads: usize,

    /// Verbose diagnostics on stderr (-v: debug, -vv: trace)
    #[arg(short, long, action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Emit diagnostics as JSON (requires the tracing-json feature)
    #[arg(long)]
    pub log_json: bool,

    /// Show a progress bar
    #[arg(long)]
    pub progress: bool,

    /// List cached models and exit
    #[arg(long)]
    pub list_models: bool,

    /// Download the model (default or --model URL) and exit
    #[arg(long)]
    pub only_download: bool,

    /// Remove cached models (only --model when given) and exit
    #[arg(long)]
    pub clear_cache: bool,

    /// Use a custom cache directory
    #[arg(long, value_name = "PATH")]
    pub cache_dir: Option<PathBuf>,

    /// Show backends and execution providers and exit
    #[arg(long)]
    pub show_providers: bool,
}

#[derive(Copy, Clone, PartialEq, Eq, ValueEnum, Debug)]
pub enum CliOutputFormat {
    Png,
    Webp,
    Tiff,
    Jpeg,
}

/// Run the CLI
///
/// # Errors
/// - invalid arguments or manifest
/// - model download or segmenter construction failures
///
/// Per-image failures are reported and do not make this fail.
pub async fn main() -> Result<()> {
    let cli = Cli::parse();

    let session_id =
        init_cli_tracing(cli.verbose, cli.log_json).context("Failed to initialize tracing")?;

    if cli.show_providers {
        show_provider_diagnostics();
        return Ok(());
    }
    if cli.list_models {
        return list_cached_models(&cli);
    }
    if cli.only_download {
        return download_model_only(&cli).await;
    }
    if cli.clear_cache {
        return clear_cache_models(&cli);
    }

    let manifest = CliConfigBuilder::load_manifest(&cli)?;
    let batch_config = CliConfigBuilder::batch_config(&cli, manifest.as_ref())?;
    let paths = CliConfigBuilder::resolve_paths(&cli, manifest.as_ref());
    let mut segmentation = CliConfigBuilder::segmentation_config(&cli)?;

    let span = spans::session(&session_id, &segmentation.backend.to_string());
    let _guard = span.enter();

    if segmentation.backend.requires_model() {
        ensure_model_available(&cli, &mut segmentation).await?;
    }

    let segmenter = {
        let span = spans::model_loading(
            &segmentation.model_spec.source.display_name(),
            &segmentation.execution_provider.to_string(),
        );
        let _guard = span.enter();
        create_segmenter(&segmentation).context("Failed to create segmenter")?
    };
    log::info!(
        "Processing {} path(s) with the {} segmenter",
        paths.len(),
        segmenter.name()
    );

    let mut processor = BatchProcessor::new(batch_config, segmenter)
        .context("Invalid batch configuration")?
        .with_reporter(create_cli_progress_reporter(cli.progress));
    let summary = processor.run(&paths);

    log::info!(
        "{} saved, {} skipped, {} failed, {} original(s) removed in {:.2}s",
        summary.saved(),
        summary.skipped(),
        summary.failed(),
        summary.removed_originals(),
        summary.elapsed.as_secs_f64()
    );
    Ok(())
}

/// Make sure a cached model exists, downloading the default model if needed
///
/// Cached models are rewritten to their directory so a custom `--cache-dir`
/// is honoured by the backend.
async fn ensure_model_available(cli: &Cli, segmentation: &mut SegmentationConfig) -> Result<()> {
    let ModelSource::Downloaded(model_id) = segmentation.model_spec.source.clone() else {
        return Ok(());
    };
    let cache = CliConfigBuilder::model_cache(cli)?;

    if !cache.is_model_cached(&model_id) {
        let url = match cli.model.as_deref() {
            Some(arg) if arg.starts_with("http") => arg,
            _ if model_id == ModelCache::default_model_id() => DEFAULT_MODEL_URL,
            _ => anyhow::bail!(
                "Model '{model_id}' not found in cache. Use --only-download to download it first, or --list-models to see available models."
            ),
        };
        println!("Model not cached. Downloading {url}...");
        let span = spans::download(url);
        let _guard = span.enter();
        let downloader = ModelDownloader::new(cache.clone())?;
        let downloaded = downloader
            .download_model(url, cli.progress)
            .await
            .with_context(|| format!("Failed to download model from {url}"))?;
        if downloaded != model_id {
            anyhow::bail!("Downloaded model ID '{downloaded}' doesn't match expected '{model_id}'");
        }
    }

    segmentation.model_spec.source = ModelSource::External(cache.get_model_path(&model_id));
    Ok(())
}

fn show_provider_diagnostics() {
    let cpu_count = std::thread::available_parallelism()
        .map(std::num::NonZeroUsize::get)
        .unwrap_or(1);
    println!("Backend and Execution Provider Diagnostics");
    println!("System: {cpu_count} CPU cores detected");
    println!();

    for provider in ExecutionProviderManager::list_all_providers() {
        let status = if provider.available {
            "available"
        } else {
            "not available"
        };
        println!("  {:<12} {:<14} {}", provider.name, status, provider.description);
    }

    println!();
    println!("Usage: --execution-provider onnx:auto | onnx:cpu | onnx:cuda | onnx:coreml | tract:cpu | colorkey");
}

fn list_cached_models(cli: &Cli) -> Result<()> {
    let cache = CliConfigBuilder::model_cache(cli)?;
    let models = cache
        .scan_cached_models()
        .context("Failed to list cached models")?;

    println!("Cached models in {}", cache.cache_dir().display());
    if models.is_empty() {
        println!("No cached models found.");
        println!("Download one with: product-cutout --only-download --model {DEFAULT_MODEL_URL}");
        return Ok(());
    }

    for model in models {
        println!("  {}", model.model_id);
        println!("    variants: {}", model.variants.join(", "));
        println!("    size:     {}", format_size(model.size_bytes));
    }
    Ok(())
}

async fn download_model_only(cli: &Cli) -> Result<()> {
    let url = match cli.model.as_deref() {
        Some(model) if model.starts_with("http") => model,
        Some(_) => anyhow::bail!(
            "--only-download requires a URL, e.g. --model {DEFAULT_MODEL_URL}"
        ),
        None => DEFAULT_MODEL_URL,
    };
    validate_model_url(url).context("Invalid model URL")?;

    let cache = CliConfigBuilder::model_cache(cli)?;
    let downloader = ModelDownloader::new(cache)?;
    let span = spans::download(url);
    let _guard = span.enter();

    println!("Downloading model from: {url}");
    let model_id = downloader
        .download_model(url, true)
        .await
        .context("Failed to download model")?;
    println!("Model ID: {model_id}");
    println!(
        "Cache location: {}",
        downloader.cache().get_model_path(&model_id).display()
    );
    Ok(())
}

fn clear_cache_models(cli: &Cli) -> Result<()> {
    let cache = CliConfigBuilder::model_cache(cli)?;

    if let Some(model) = cli.model.as_deref() {
        let model_id = if model.starts_with("http") {
            ModelCache::url_to_model_id(model)
        } else {
            model.to_string()
        };
        if cache
            .clear_specific_model(&model_id)
            .with_context(|| format!("Failed to clear model '{model_id}'"))?
        {
            println!("Removed model: {model_id}");
        } else {
            println!("Model '{model_id}' not found in cache");
        }
        return Ok(());
    }

    let removed = cache.clear_all_models().context("Failed to clear cache")?;
    if removed.is_empty() {
        println!("Cache was already empty");
    } else {
        println!("Removed {} model(s):", removed.len());
        for model_id in removed {
            println!("  {model_id}");
        }
    }
    Ok(())
}
