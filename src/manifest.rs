//! Build manifest: logical entry names mapped to hashed output files
//!
//! The backend's template layer resolves asset URLs through this file, so
//! content hashes never have to be hardcoded anywhere.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

/// One built entry
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ManifestEntry {
    /// Output path of the hashed bundle, relative to the output directory
    pub file: String,
    /// Source path the bundle was built from
    pub src: String,
}

/// Mapping from logical entry name to its built output. BTreeMap keeps the
/// serialized form stable across runs.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct Manifest {
    #[serde(flatten)]
    entries: BTreeMap<String, ManifestEntry>,
}

impl Manifest {
    pub const FILE_NAME: &'static str = "manifest.json";

    pub fn insert(&mut self, name: String, entry: ManifestEntry) {
        self.entries.insert(name, entry);
    }

    pub fn get(&self, name: &str) -> Option<&ManifestEntry> {
        self.entries.get(name)
    }

    pub fn names(&self) -> impl Iterator<Item = &String> {
        self.entries.keys()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn to_json(&self) -> anyhow::Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Write `manifest.json` into the output directory
    pub fn write_to(&self, out_dir: &Path) -> anyhow::Result<PathBuf> {
        let path = out_dir.join(Self::FILE_NAME);
        std::fs::write(&path, self.to_json()?)?;
        Ok(path)
    }

    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&content)?)
    }
}
