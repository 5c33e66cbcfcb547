//! Conversion of CLI arguments into library configuration

use crate::cli::main_impl::{Cli, CliOutputFormat};
use crate::{
    cache::ModelCache,
    config::{BatchConfig, BatchManifest, OutputFormat, SegmentationConfig},
    defaults,
    models::{ModelSource, ModelSpec},
    utils::ExecutionProviderManager,
};
use anyhow::{Context, Result};
use std::path::{Path, PathBuf};

impl From<CliOutputFormat> for OutputFormat {
    fn from(format: CliOutputFormat) -> Self {
        match format {
            CliOutputFormat::Png => Self::Png,
            CliOutputFormat::Webp => Self::WebP,
            CliOutputFormat::Tiff => Self::Tiff,
            CliOutputFormat::Jpeg => Self::Jpeg,
        }
    }
}

/// Builds library configuration from parsed arguments
pub(crate) struct CliConfigBuilder;

impl CliConfigBuilder {
    /// Read `--manifest` when given
    pub(crate) fn load_manifest(cli: &Cli) -> Result<Option<BatchManifest>> {
        cli.manifest
            .as_ref()
            .map(|path| {
                BatchManifest::from_file(path)
                    .with_context(|| format!("Failed to load manifest {}", path.display()))
            })
            .transpose()
    }

    /// Positional paths, else the manifest's paths, else the built-in list
    pub(crate) fn resolve_paths(cli: &Cli, manifest: Option<&BatchManifest>) -> Vec<PathBuf> {
        if !cli.paths.is_empty() {
            return cli.paths.clone();
        }
        match manifest {
            Some(manifest) => manifest.paths.clone(),
            None => {
                log::info!("No paths given, using the built-in product list");
                defaults::default_paths()
            },
        }
    }

    /// Batch settings: defaults, then the manifest, then explicit flags
    pub(crate) fn batch_config(cli: &Cli, manifest: Option<&BatchManifest>) -> Result<BatchConfig> {
        let mut builder = BatchConfig::builder().jpeg_quality(cli.jpeg_quality);
        if let Some(manifest) = manifest {
            builder = manifest.apply_to(builder);
        }
        if let Some(color) = cli.flatten {
            builder = builder.flatten(color);
        }
        if let Some(format) = cli.format {
            builder = builder.output_format(format.into());
        }
        if cli.keep_originals {
            builder = builder.keep_originals(true);
        }
        builder.build().context("Invalid batch configuration")
    }

    /// Open the model cache, honouring `--cache-dir`
    pub(crate) fn model_cache(cli: &Cli) -> Result<ModelCache> {
        match &cli.cache_dir {
            Some(dir) => ModelCache::with_custom_cache_dir(dir)
                .with_context(|| format!("Failed to open cache directory {}", dir.display())),
            None => ModelCache::new().context("Failed to open model cache"),
        }
    }

    /// Interpret `--model`: an existing directory, a URL, or a cached model ID
    ///
    /// A `name:variant` suffix selects a variant unless `--variant` is given.
    pub(crate) fn parse_model_spec(model_arg: Option<&str>, variant: Option<&str>) -> ModelSpec {
        let Some(model_arg) = model_arg else {
            return ModelSpec {
                source: ModelSource::Downloaded(ModelCache::default_model_id()),
                variant: variant.map(str::to_string),
            };
        };

        let (name, suffix) = match model_arg.rsplit_once(':') {
            Some((name, suffix)) if !model_arg.starts_with("http") && !suffix.contains(|c| c == '/' || c == '\\') => {
                (name, Some(suffix))
            },
            _ => (model_arg, None),
        };

        let source = if Path::new(name).is_dir() {
            ModelSource::External(PathBuf::from(name))
        } else if name.starts_with("http") {
            ModelSource::Downloaded(ModelCache::url_to_model_id(name))
        } else {
            ModelSource::Downloaded(name.to_string())
        };

        ModelSpec {
            source,
            variant: variant.or(suffix).map(str::to_string),
        }
    }

    /// Segmenter settings from `--execution-provider`, `--model`, `--variant`, `--threads`
    pub(crate) fn segmentation_config(cli: &Cli) -> Result<SegmentationConfig> {
        let (backend, execution_provider) =
            ExecutionProviderManager::parse_provider_string(&cli.execution_provider)
                .context("Invalid execution provider format")?;

        Ok(SegmentationConfig {
            backend,
            execution_provider,
            model_spec: Self::parse_model_spec(cli.model.as_deref(), cli.variant.as_deref()),
            ..SegmentationConfig::default()
        }
        .with_threads(cli.threads))
    }
}
