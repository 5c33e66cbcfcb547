//! Product Cutout CLI
//!
//! Removes backgrounds from product images in a batch, see `--help`.

use product_cutout::cli;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    cli::main().await
}
