//! Built-in product image list
//!
//! Used by the CLI when neither paths nor a manifest are given. Paths are
//! relative to the working directory.

use std::path::PathBuf;

pub const PRODUCT_IMAGES: &[&str] = &[
    "public/products/strawberry-peach/main-product.png",
    "public/products/strawberry-peach/transparent-glass-1.jpg",
    "public/products/strawberry-peach/transparent-glass-2.jpg",
    "public/products/strawberry-peach/transparent-glass-3.jpg",
    "public/products/strawberry-banana-protein/transparent-glass-1.jpg",
    "public/products/strawberry-banana-protein/transparent-glass-2.jpg",
    "public/products/strawberry-banana-protein/transparent-glass-3.jpg",
];

#[must_use]
pub fn default_paths() -> Vec<PathBuf> {
    PRODUCT_IMAGES.iter().map(PathBuf::from).collect()
}
