//! Ephemeral on-disk packages handed to the toolchain.
//!
//! Each compile gets its own directory:
//!
//! ```text
//! <staging root>/temp_package_XXXXXX/
//! ├── Package.swift
//! ├── Sources/main.swift
//! └── .build/            (scratch path, created by the toolchain)
//! ```

use std::path::{Path, PathBuf};

use tempfile::TempDir;

use crate::error::{CompilerError, Result};

/// Name prefix of every staging directory.
pub const STAGING_PREFIX: &str = "temp_package_";

/// Manifest file name inside a staged package.
pub const MANIFEST_FILE: &str = "Package.swift";

/// Source file path inside a staged package.
pub const SOURCE_FILE: &str = "Sources/main.swift";

/// Scratch directory passed to `--scratch-path`.
pub const BUILD_DIR: &str = ".build";

/// Manifest for a single executable target named `main`.
pub const MANIFEST: &str = r#"// swift-tools-version: 6.1
import PackageDescription

let package = Package(
    name: "TempPackage",
    platforms: [.macOS(.v12)],
    products: [
        .executable(name: "main", targets: ["main"])
    ],
    targets: [
        .executableTarget(name: "main")
    ]
)
"#;

/// A staged package, exclusively owned by one compile.
///
/// Dropping it removes the tree; [`close`](Self::close) does the same and
/// logs a failure instead of ignoring it.
#[derive(Debug)]
pub struct StagedProject {
    dir: TempDir,
    manifest: PathBuf,
    source: PathBuf,
    build_dir: PathBuf,
}

impl StagedProject {
    /// Create a uniquely named package under `root` holding `source`.
    ///
    /// `root` is created if needed. The source is written verbatim.
    pub fn create(root: &Path, source: &str) -> Result<Self> {
        let staging_error = |source| CompilerError::Staging {
            root: root.to_path_buf(),
            source,
        };

        std::fs::create_dir_all(root).map_err(staging_error)?;
        let dir = tempfile::Builder::new()
            .prefix(STAGING_PREFIX)
            .tempdir_in(root)
            .map_err(staging_error)?;

        let manifest = dir.path().join(MANIFEST_FILE);
        let source_path = dir.path().join(SOURCE_FILE);
        let build_dir = dir.path().join(BUILD_DIR);

        if let Some(sources) = source_path.parent() {
            std::fs::create_dir_all(sources).map_err(staging_error)?;
        }
        std::fs::write(&manifest, MANIFEST).map_err(staging_error)?;
        std::fs::write(&source_path, source).map_err(staging_error)?;

        tracing::debug!(dir = %dir.path().display(), "staged package");

        Ok(Self {
            dir,
            manifest,
            source: source_path,
            build_dir,
        })
    }

    /// Package root (`--package-path`, and the toolchain's working directory).
    pub fn root(&self) -> &Path {
        self.dir.path()
    }

    /// `Package.swift`.
    pub fn manifest_file(&self) -> &Path {
        &self.manifest
    }

    /// `Sources/main.swift`.
    pub fn source_file(&self) -> &Path {
        &self.source
    }

    /// Scratch directory (`--scratch-path`).
    pub fn build_dir(&self) -> &Path {
        &self.build_dir
    }

    /// Resolve a package-relative path, such as the artifact location.
    pub fn path(&self, relative: &Path) -> PathBuf {
        self.dir.path().join(relative)
    }

    /// Remove the tree. Failure is logged, never returned.
    pub fn close(self) {
        let path = self.dir.path().to_path_buf();
        if let Err(e) = self.dir.close() {
            tracing::warn!(dir = %path.display(), "failed to remove staging directory: {}", e);
        }
    }
}
