//! Backend and execution provider selection strings
//!
//! The CLI selects a segmenter with `backend:provider`, e.g. `onnx:cuda`,
//! `tract:cpu`, or plain `colorkey`.

use crate::{
    config::{BackendType, ExecutionProvider},
    error::{CutoutError, Result},
};

/// Information about an execution provider
#[derive(Debug, Clone)]
pub struct ProviderInfo {
    pub name: String,
    pub backend_type: BackendType,
    pub execution_provider: ExecutionProvider,
    pub available: bool,
    pub description: String,
}

/// Utility for parsing and listing execution providers
pub struct ExecutionProviderManager;

impl ExecutionProviderManager {
    /// Parse a `backend[:provider]` selection
    ///
    /// ```rust
    /// use product_cutout::{utils::ExecutionProviderManager, BackendType, ExecutionProvider};
    ///
    /// let (backend, provider) = ExecutionProviderManager::parse_provider_string("onnx:cuda").unwrap();
    /// assert_eq!((backend, provider), (BackendType::Onnx, ExecutionProvider::Cuda));
    /// ```
    ///
    /// # Errors
    /// - unknown backend, or a provider the backend does not support
    pub fn parse_provider_string(provider_str: &str) -> Result<(BackendType, ExecutionProvider)> {
        let normalized = provider_str.trim().to_ascii_lowercase();
        let (backend, provider) = match normalized.split_once(':') {
            Some((backend, provider)) => (backend, Some(provider)),
            None => (normalized.as_str(), None),
        };

        match backend {
            "onnx" => {
                let execution_provider = match provider.unwrap_or("auto") {
                    "auto" => ExecutionProvider::Auto,
                    "cpu" => ExecutionProvider::Cpu,
                    "cuda" => ExecutionProvider::Cuda,
                    "coreml" => ExecutionProvider::CoreMl,
                    other => {
                        return Err(CutoutError::invalid_config(format!(
                            "Unknown ONNX provider: {other}. Supported: auto, cpu, cuda, coreml"
                        )));
                    },
                };
                Ok((BackendType::Onnx, execution_provider))
            },
            "tract" => match provider.unwrap_or("cpu") {
                "cpu" => Ok((BackendType::Tract, ExecutionProvider::Cpu)),
                other => Err(CutoutError::invalid_config(format!(
                    "Unknown Tract provider: {other}. Tract only supports 'cpu'"
                ))),
            },
            "colorkey" => match provider {
                None | Some("cpu") => Ok((BackendType::ColorKey, ExecutionProvider::Cpu)),
                Some(other) => Err(CutoutError::invalid_config(format!(
                    "The colorkey backend takes no provider (got '{other}')"
                ))),
            },
            other => Err(CutoutError::invalid_config(format!(
                "Unknown backend: {other}. Supported backends: onnx, tract, colorkey"
            ))),
        }
    }

    /// Every selectable provider with its availability in this build
    #[must_use]
    pub fn list_all_providers() -> Vec<ProviderInfo> {
        let mut providers = Vec::new();

        let onnx_entries = [
            ("auto", ExecutionProvider::Auto, "ONNX Runtime with auto-selected provider"),
            ("cpu", ExecutionProvider::Cpu, "ONNX Runtime CPU execution"),
            ("cuda", ExecutionProvider::Cuda, "ONNX Runtime CUDA GPU acceleration"),
            ("coreml", ExecutionProvider::CoreMl, "ONNX Runtime CoreML acceleration"),
        ];
        #[cfg(feature = "onnx")]
        let onnx_availability: std::collections::HashMap<String, bool> =
            crate::backends::OnnxBackend::list_providers()
                .into_iter()
                .map(|(name, available, _)| (name.to_lowercase(), available))
                .collect();

        for (name, execution_provider, description) in onnx_entries {
            #[cfg(feature = "onnx")]
            let available = if name == "auto" {
                onnx_availability.values().any(|available| *available)
            } else {
                onnx_availability.get(name).copied().unwrap_or(false)
            };
            #[cfg(not(feature = "onnx"))]
            let available = false;

            providers.push(ProviderInfo {
                name: format!("onnx:{name}"),
                backend_type: BackendType::Onnx,
                execution_provider,
                available,
                description: description.to_string(),
            });
        }

        providers.push(ProviderInfo {
            name: "tract:cpu".to_string(),
            backend_type: BackendType::Tract,
            execution_provider: ExecutionProvider::Cpu,
            available: cfg!(feature = "tract"),
            description: "Tract pure-Rust CPU inference".to_string(),
        });
        providers.push(ProviderInfo {
            name: "colorkey".to_string(),
            backend_type: BackendType::ColorKey,
            execution_provider: ExecutionProvider::Cpu,
            available: true,
            description: "Model-free removal of a uniform backdrop colour".to_string(),
        });

        providers
    }
}
