//! Shared helpers for preprocessing and backend selection

pub mod preprocessing;
pub mod providers;

pub use preprocessing::{ImagePreprocessor, Letterbox};
pub use providers::{ExecutionProviderManager, ProviderInfo};
