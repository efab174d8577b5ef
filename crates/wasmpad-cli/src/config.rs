//! Playground configuration file.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use wasmpad_compiler::{ArtifactStore, CompilerConfig};
use wasmpad_sandbox::WasmConfig;

/// Everything `--config` can set. Missing sections keep their defaults.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PlaygroundConfig {
    /// Compile orchestrator settings
    pub compiler: CompilerConfig,
    /// Execution host settings
    pub sandbox: WasmConfig,
    /// Keep compiled modules here as `wasm_{id}.wasm`
    pub artifact_dir: Option<PathBuf>,
    /// Seconds an artifact stays retrievable (store default when unset)
    pub artifact_max_age_secs: Option<u64>,
}

impl PlaygroundConfig {
    /// Load from a JSON file, or defaults when no file was given.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let Some(path) = path else {
            return Ok(Self::default());
        };
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {:?}", path))?;
        serde_json::from_str(&text).with_context(|| format!("Invalid config file {:?}", path))
    }

    /// Artifact store, if one is configured.
    pub fn artifact_store(&self) -> Option<ArtifactStore> {
        let store = ArtifactStore::new(self.artifact_dir.as_ref()?);
        Some(match self.artifact_max_age_secs {
            Some(secs) => store.max_age(Duration::from_secs(secs)),
            None => store,
        })
    }
}
