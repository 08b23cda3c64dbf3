//! `devgate-build`: package entry files into content-hashed bundles and
//! emit the manifest the backend resolves asset URLs through.

use devgate::build::run_build;
use devgate::config::Config;
use devgate::{PKG_NAME, VERSION};
use std::path::PathBuf;
use tracing::{error, info};

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("devgate=debug".parse().expect("valid log directive")),
        )
        .init();

    let config_path = std::env::args()
        .nth(1)
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("devgate.toml"));

    let config = Config::load(&config_path).map_err(|e| {
        error!(path = %config_path.display(), error = %e, "Failed to load configuration");
        e
    })?;

    info!(name = PKG_NAME, version = VERSION, "Starting production build");

    let output = run_build(&config)?;

    match output.manifest_path {
        Some(path) => info!(
            path = %path.display(),
            entries = output.manifest.len(),
            "Build complete"
        ),
        None => info!(
            out_dir = %output.out_dir.display(),
            entries = output.manifest.len(),
            "Build complete (manifest emission disabled)"
        ),
    }

    Ok(())
}
