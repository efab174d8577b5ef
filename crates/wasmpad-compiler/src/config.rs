//! Configuration for the compile orchestrator.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// SDK used when none is configured and `sdk list` names no wasm SDK.
pub const DEFAULT_SDK: &str = "swift-wasm-6.1-RELEASE-wasm32-unknown-wasi";

/// Directory prepended to the toolchain's `PATH` by default.
pub const DEFAULT_PATH_PREFIX: &str = "/opt/swift/usr/bin";

/// Where the toolchain leaves the module, relative to the staged package.
pub const DEFAULT_ARTIFACT_PATH: &str = ".build/wasm32-unknown-wasi/debug/main.wasm";

/// Configuration for the compile orchestrator.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CompilerConfig {
    /// Toolchain executable (default = `swift`)
    pub program: String,

    /// Swift SDK passed to `--swift-sdk`
    ///
    /// `None` means probe `swift sdk list` once and pick the first wasm SDK.
    pub sdk: Option<String>,

    /// Directory prepended to the subprocess `PATH`
    pub path_prefix: Option<PathBuf>,

    /// Build deadline in milliseconds (default = 30s)
    pub timeout_ms: u64,

    /// Deadline for `--version` / `sdk list` probes in milliseconds
    pub probe_timeout_ms: u64,

    /// Parent of the per-compile staging directories (default = system temp)
    pub staging_root: Option<PathBuf>,

    /// Artifact location relative to the staged package
    pub artifact_path: PathBuf,

    /// Rewrite common Foundation idioms before staging
    ///
    /// Off by default so the staged source is the submitted source, verbatim.
    pub rewrite_foundation_idioms: bool,
}

impl Default for CompilerConfig {
    fn default() -> Self {
        Self {
            program: "swift".to_string(),
            sdk: None,
            path_prefix: Some(PathBuf::from(DEFAULT_PATH_PREFIX)),
            timeout_ms: 30_000,
            probe_timeout_ms: 5_000,
            staging_root: None,
            artifact_path: PathBuf::from(DEFAULT_ARTIFACT_PATH),
            rewrite_foundation_idioms: false,
        }
    }
}

impl CompilerConfig {
    /// Builder: set the toolchain executable
    pub fn program(mut self, program: impl Into<String>) -> Self {
        self.program = program.into();
        self
    }

    /// Builder: pin the SDK instead of probing for one
    pub fn sdk(mut self, sdk: impl Into<String>) -> Self {
        self.sdk = Some(sdk.into());
        self
    }

    /// Builder: set or clear the `PATH` prefix
    pub fn path_prefix(mut self, prefix: Option<PathBuf>) -> Self {
        self.path_prefix = prefix;
        self
    }

    /// Builder: set the build deadline
    pub fn timeout_ms(mut self, ms: u64) -> Self {
        self.timeout_ms = ms;
        self
    }

    /// Builder: set where staging directories are created
    pub fn staging_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.staging_root = Some(root.into());
        self
    }

    /// Builder: enable the Foundation idiom rewrite
    pub fn rewrite_foundation_idioms(mut self, enable: bool) -> Self {
        self.rewrite_foundation_idioms = enable;
        self
    }

    /// Build deadline as a `Duration`.
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    /// Probe deadline as a `Duration`.
    pub fn probe_timeout(&self) -> Duration {
        Duration::from_millis(self.probe_timeout_ms)
    }

    /// Effective staging root.
    pub fn staging_dir(&self) -> PathBuf {
        self.staging_root
            .clone()
            .unwrap_or_else(std::env::temp_dir)
    }

    /// Artifact location relative to the staged package.
    pub fn artifact_relative_path(&self) -> &Path {
        &self.artifact_path
    }
}
