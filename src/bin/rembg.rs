//! rembg CLI tool
//!
//! Command-line interface for background removal through remote inference
//! servers, built on the rembg-dispatch library.

#[cfg(feature = "cli")]
use rembg_dispatch::cli;

#[cfg(feature = "cli")]
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    cli::main().await
}

#[cfg(not(feature = "cli"))]
fn main() {
    eprintln!("CLI feature not enabled. Please rebuild with --features cli");
    std::process::exit(1);
}
