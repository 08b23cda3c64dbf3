//! Production build: content-hashed bundles plus the manifest
//!
//! Each configured entry is written under the output directory with a
//! content hash in its filename, and `manifest.json` records the mapping
//! from logical entry name to final output path.

use crate::config::Config;
use crate::manifest::{Manifest, ManifestEntry};
use anyhow::Context;
use sha2::{Digest, Sha256};
use std::path::PathBuf;
use tracing::info;

/// Hex characters of the content digest embedded in output filenames
const HASH_LEN: usize = 8;

/// Result of a production build
#[derive(Debug)]
pub struct BuildOutput {
    pub manifest: Manifest,
    /// Where manifest.json was written, `None` when emission is disabled
    pub manifest_path: Option<PathBuf>,
    pub out_dir: PathBuf,
}

/// Run the production build described by the configuration
pub fn run_build(config: &Config) -> anyhow::Result<BuildOutput> {
    let build = &config.build;
    let entry = build
        .entry
        .as_ref()
        .ok_or_else(|| anyhow::anyhow!("build.entry is not configured"))?;
    if entry.is_empty() {
        anyhow::bail!("build.entry is empty");
    }

    std::fs::create_dir_all(&build.out_dir)
        .with_context(|| format!("Failed to create output directory '{}'", build.out_dir.display()))?;

    let mut manifest = Manifest::default();

    for (name, src) in entry.entries() {
        let content = std::fs::read(&src)
            .with_context(|| format!("Failed to read entry '{}' from '{}'", name, src))?;

        let hashed = hashed_name(&name, &content);
        let out_path = build.out_dir.join(&hashed);
        if let Some(parent) = out_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(&out_path, &content)
            .with_context(|| format!("Failed to write bundle '{}'", out_path.display()))?;

        info!(entry = %name, file = %hashed, bytes = content.len(), "Bundle written");

        manifest.insert(name, ManifestEntry { file: hashed, src });
    }

    let manifest_path = if build.manifest {
        let path = manifest.write_to(&build.out_dir)?;
        info!(path = %path.display(), entries = manifest.len(), "Manifest written");
        Some(path)
    } else {
        None
    };

    Ok(BuildOutput {
        manifest,
        manifest_path,
        out_dir: build.out_dir.clone(),
    })
}

/// Output filename for a logical entry name: the hash goes between stem and
/// extension, directories from the logical name are preserved. Deterministic
/// in the content.
fn hashed_name(logical: &str, content: &[u8]) -> String {
    let digest = hex::encode(Sha256::digest(content));
    let hash = &digest[..HASH_LEN];

    let (dir, file) = match logical.rsplit_once('/') {
        Some((dir, file)) => (Some(dir), file),
        None => (None, logical),
    };

    let hashed_file = match file.rsplit_once('.') {
        Some((stem, ext)) if !stem.is_empty() => format!("{}-{}.{}", stem, hash, ext),
        _ => format!("{}-{}", file, hash),
    };

    match dir {
        Some(dir) => format!("{}/{}", dir, hashed_file),
        None => hashed_file,
    }
}
