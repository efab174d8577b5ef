//! Compile orchestration: stage, build, collect, clean up.
//!
//! ```text
//! source ─▶ StagedProject ─▶ swift build ─▶ artifact? ─▶ CompileResult
//!                 │                                          ▲
//!                 └──────────── always removed ──────────────┘
//! ```

use std::ffi::OsString;
use std::fmt::Write as _;
use std::path::Path;
use std::time::Instant;

use tokio::sync::OnceCell;

use crate::config::{CompilerConfig, DEFAULT_SDK};
use crate::preprocess::rewrite_foundation_idioms;
use crate::staging::StagedProject;
use crate::toolchain::{ProcessOutput, Toolchain};

/// Diagnostic text of every successful compile.
pub const SUCCESS_MESSAGE: &str = "Compilation successful";

/// Failure reason for empty or whitespace-only source.
pub const MISSING_SOURCE: &str = "source code is required";

#[derive(Debug, Clone, PartialEq, Eq)]
enum Outcome {
    Succeeded { artifact: Vec<u8> },
    Failed { error: String },
}

/// Result of one compile attempt.
///
/// Carries an artifact exactly when it succeeded and an error message exactly
/// when it failed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompileResult {
    diagnostic_text: String,
    outcome: Outcome,
}

impl CompileResult {
    /// A successful compile producing `artifact`.
    pub fn succeeded(artifact: Vec<u8>) -> Self {
        Self {
            diagnostic_text: SUCCESS_MESSAGE.to_string(),
            outcome: Outcome::Succeeded { artifact },
        }
    }

    /// A failed compile.
    pub fn failed(error: impl Into<String>, diagnostic_text: impl Into<String>) -> Self {
        Self {
            diagnostic_text: diagnostic_text.into(),
            outcome: Outcome::Failed {
                error: error.into(),
            },
        }
    }

    /// Whether an artifact was produced.
    pub fn success(&self) -> bool {
        matches!(self.outcome, Outcome::Succeeded { .. })
    }

    /// Human-readable detail: the success message, or the failure report.
    pub fn diagnostic_text(&self) -> &str {
        &self.diagnostic_text
    }

    /// Failure reason, present iff the compile failed.
    pub fn error_message(&self) -> Option<&str> {
        match &self.outcome {
            Outcome::Failed { error } => Some(error),
            Outcome::Succeeded { .. } => None,
        }
    }

    /// Module bytes, present iff the compile succeeded.
    pub fn binary_artifact(&self) -> Option<&[u8]> {
        match &self.outcome {
            Outcome::Succeeded { artifact } => Some(artifact),
            Outcome::Failed { .. } => None,
        }
    }

    /// Take the module bytes.
    pub fn into_artifact(self) -> Option<Vec<u8>> {
        match self.outcome {
            Outcome::Succeeded { artifact } => Some(artifact),
            Outcome::Failed { .. } => None,
        }
    }
}

/// Drives the toolchain. Safe to share between concurrent compiles.
#[derive(Debug)]
pub struct Compiler {
    config: CompilerConfig,
    toolchain: Toolchain,
    sdk: OnceCell<String>,
}

impl Compiler {
    /// Create a compiler with the given configuration.
    pub fn new(config: CompilerConfig) -> Self {
        let toolchain = Toolchain::from_config(&config);
        let sdk = match &config.sdk {
            Some(sdk) => OnceCell::new_with(Some(sdk.clone())),
            None => OnceCell::new(),
        };
        Self {
            config,
            toolchain,
            sdk,
        }
    }

    /// Get the configuration.
    pub fn config(&self) -> &CompilerConfig {
        &self.config
    }

    /// Get the toolchain handle.
    pub fn toolchain(&self) -> &Toolchain {
        &self.toolchain
    }

    /// SDK passed to `--swift-sdk`; probed on first use when not configured.
    pub async fn sdk(&self) -> &str {
        self.sdk
            .get_or_init(|| async {
                self.toolchain
                    .detect_sdk(self.config.probe_timeout(), DEFAULT_SDK)
                    .await
            })
            .await
    }

    /// Arguments of the build invocation for a staged package.
    pub fn build_args(&self, sdk: &str, project: &StagedProject) -> Vec<OsString> {
        vec![
            "build".into(),
            "--swift-sdk".into(),
            sdk.into(),
            "--package-path".into(),
            project.root().into(),
            "--scratch-path".into(),
            project.build_dir().into(),
        ]
    }

    /// Compile `source` into a module.
    ///
    /// Never fails outright: every problem becomes a failed [`CompileResult`].
    /// The staging directory is gone by the time this returns.
    pub async fn compile(&self, source: &str) -> CompileResult {
        if source.trim().is_empty() {
            return CompileResult::failed(MISSING_SOURCE, MISSING_SOURCE);
        }

        let start = Instant::now();
        let staged = if self.config.rewrite_foundation_idioms {
            StagedProject::create(&self.config.staging_dir(), &rewrite_foundation_idioms(source))
        } else {
            StagedProject::create(&self.config.staging_dir(), source)
        };
        let project = match staged {
            Ok(project) => project,
            Err(e) => {
                let reason = e.to_string();
                tracing::warn!("{}", reason);
                let report = FailureReport::new(&reason).finish();
                return CompileResult::failed(reason, report);
            }
        };

        let result = self.build(&project).await;
        project.close();

        tracing::info!(
            success = result.success(),
            ms = start.elapsed().as_millis() as u64,
            "compile finished"
        );
        result
    }

    async fn build(&self, project: &StagedProject) -> CompileResult {
        let sdk = self.sdk().await;
        let args = self.build_args(sdk, project);
        let artifact = project.path(self.config.artifact_relative_path());
        tracing::debug!(sdk, dir = %project.root().display(), "invoking toolchain");

        let output = match self
            .toolchain
            .run(&args, Some(project.root()), self.config.timeout())
            .await
        {
            Ok(output) => output,
            Err(e) => {
                let reason = e.to_string();
                let report = FailureReport::new(&reason).project(project, &artifact).finish();
                return CompileResult::failed(reason, report);
            }
        };

        if !output.success() {
            let reason = format!("toolchain failed with {}", output.status_text());
            let error = match output.stderr.trim() {
                "" => reason.clone(),
                stderr => stderr.to_string(),
            };
            let report = FailureReport::new(&reason)
                .project(project, &artifact)
                .output(&output)
                .finish();
            return CompileResult::failed(error, report);
        }

        match tokio::fs::read(&artifact).await {
            Ok(bytes) => CompileResult::succeeded(bytes),
            Err(e) => {
                let reason = if e.kind() == std::io::ErrorKind::NotFound {
                    format!("toolchain produced no artifact at {}", artifact.display())
                } else {
                    format!("failed to read artifact {}: {}", artifact.display(), e)
                };
                let report = FailureReport::new(&reason)
                    .project(project, &artifact)
                    .output(&output)
                    .finish();
                CompileResult::failed(reason, report)
            }
        }
    }
}

/// Operator-facing failure text.
struct FailureReport {
    text: String,
}

impl FailureReport {
    fn new(reason: &str) -> Self {
        Self {
            text: format!("Compilation failed:\n- error: {}", reason),
        }
    }

    fn project(mut self, project: &StagedProject, artifact: &Path) -> Self {
        let _ = write!(
            self.text,
            "\n- package dir: {}\n- source file: {}\n- artifact path: {}",
            project.root().display(),
            project.source_file().display(),
            artifact.display()
        );
        self
    }

    fn output(mut self, output: &ProcessOutput) -> Self {
        let _ = write!(
            self.text,
            "\n- exit status: {}\n- stdout: {}\n- stderr: {}",
            output.status_text(),
            output.stdout.trim_end(),
            output.stderr.trim_end()
        );
        self
    }

    fn finish(self) -> String {
        self.text
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_succeeded_invariants() {
        let result = CompileResult::succeeded(vec![0, 97, 115, 109]);
        assert!(result.success());
        assert_eq!(result.diagnostic_text(), SUCCESS_MESSAGE);
        assert!(result.error_message().is_none());
        assert_eq!(result.binary_artifact(), Some(&[0, 97, 115, 109][..]));
        assert_eq!(result.into_artifact(), Some(vec![0, 97, 115, 109]));
    }

    #[test]
    fn test_failed_invariants() {
        let result = CompileResult::failed("boom", "details");
        assert!(!result.success());
        assert_eq!(result.error_message(), Some("boom"));
        assert_eq!(result.diagnostic_text(), "details");
        assert!(result.binary_artifact().is_none());
        assert!(result.into_artifact().is_none());
    }

    #[tokio::test]
    async fn test_blank_source_never_reaches_disk() {
        let root = tempfile::tempdir().unwrap();
        let compiler = Compiler::new(
            CompilerConfig::default()
                .program("/nonexistent/wasmpad-toolchain")
                .staging_root(root.path()),
        );

        for source in ["", "  \n\t"] {
            let result = compiler.compile(source).await;
            assert!(!result.success());
            assert_eq!(result.error_message(), Some(MISSING_SOURCE));
        }
        assert_eq!(std::fs::read_dir(root.path()).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn test_configured_sdk_skips_probe() {
        let compiler = Compiler::new(
            CompilerConfig::default()
                .program("/nonexistent/wasmpad-toolchain")
                .sdk("pinned-wasm-sdk"),
        );
        assert_eq!(compiler.sdk().await, "pinned-wasm-sdk");
    }

    #[tokio::test]
    async fn test_failed_probe_falls_back_to_default_sdk() {
        let compiler = Compiler::new(
            CompilerConfig::default().program("/nonexistent/wasmpad-toolchain"),
        );
        assert_eq!(compiler.sdk().await, DEFAULT_SDK);
    }

    #[test]
    fn test_build_args() {
        let root = tempfile::tempdir().unwrap();
        let project = StagedProject::create(root.path(), "print(1)").unwrap();
        let compiler = Compiler::new(CompilerConfig::default());
        let args = compiler.build_args("wasm-sdk", &project);

        assert_eq!(args[0], "build");
        assert_eq!(args[1], "--swift-sdk");
        assert_eq!(args[2], "wasm-sdk");
        assert_eq!(args[3], "--package-path");
        assert_eq!(Path::new(&args[4]), project.root());
        assert_eq!(args[5], "--scratch-path");
        assert_eq!(Path::new(&args[6]), project.root().join(".build"));
    }

    #[test]
    fn test_failure_report_sections() {
        let root = tempfile::tempdir().unwrap();
        let project = StagedProject::create(root.path(), "x").unwrap();
        let artifact = project.path(Path::new("out.wasm"));
        let output = ProcessOutput {
            exit_code: Some(1),
            stdout: "building\n".into(),
            stderr: "error: expected expression\n".into(),
        };

        let text = FailureReport::new("toolchain failed with exit code 1")
            .project(&project, &artifact)
            .output(&output)
            .finish();

        assert!(text.starts_with("Compilation failed:\n- error: toolchain failed with exit code 1"));
        assert!(text.contains(&format!("- package dir: {}", project.root().display())));
        assert!(text.contains("- source file: "));
        assert!(text.contains("- stdout: building"));
        assert!(text.contains("- stderr: error: expected expression"));
    }
}
