//! The external Swift toolchain, driven as a subprocess.

use std::ffi::{OsStr, OsString};
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use once_cell::sync::Lazy;
use regex::Regex;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::{Child, Command};

use crate::config::CompilerConfig;
use crate::error::{CompilerError, Result};

/// After exit, how long to wait for the pipes to drain.
const PIPE_DRAIN_GRACE: Duration = Duration::from_secs(2);

/// After a timeout kill, how long to wait for the process group to empty.
#[cfg(unix)]
const GROUP_EXIT_GRACE: Duration = Duration::from_millis(500);

static VERSION_NUMBER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"Swift version (\d+\.\d+(?:\.\d+)?)").expect("version regex"));
static RELEASE_TAG: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\((swift-[\d.]+-RELEASE)\)").expect("release regex"));

/// Captured result of a finished toolchain process.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessOutput {
    /// Exit code, `None` when terminated by a signal
    pub exit_code: Option<i32>,
    /// Standard output (lossy UTF-8)
    pub stdout: String,
    /// Standard error (lossy UTF-8)
    pub stderr: String,
}

impl ProcessOutput {
    /// Whether the process exited with code 0.
    pub fn success(&self) -> bool {
        self.exit_code == Some(0)
    }

    /// Human-readable exit status.
    pub fn status_text(&self) -> String {
        match self.exit_code {
            Some(code) => format!("exit code {}", code),
            None => "terminated by signal".to_string(),
        }
    }
}

/// Handle on the toolchain executable.
#[derive(Debug, Clone)]
pub struct Toolchain {
    program: String,
    path_prefix: Option<PathBuf>,
}

impl Toolchain {
    /// Create a handle for `program`, run with `path_prefix` ahead of `PATH`.
    pub fn new(program: impl Into<String>, path_prefix: Option<PathBuf>) -> Self {
        Self {
            program: program.into(),
            path_prefix,
        }
    }

    /// Create a handle from the compiler configuration.
    pub fn from_config(config: &CompilerConfig) -> Self {
        Self::new(config.program.clone(), config.path_prefix.clone())
    }

    /// Toolchain executable.
    pub fn program(&self) -> &str {
        &self.program
    }

    /// `PATH` the subprocess sees.
    pub fn search_path(&self) -> Option<OsString> {
        let current = std::env::var_os("PATH");
        let Some(prefix) = &self.path_prefix else {
            return current;
        };

        let mut dirs = vec![prefix.clone()];
        if let Some(current) = &current {
            dirs.extend(std::env::split_paths(current));
        }
        match std::env::join_paths(dirs) {
            Ok(joined) => Some(joined),
            Err(e) => {
                tracing::warn!(prefix = %prefix.display(), "ignoring PATH prefix: {}", e);
                current
            }
        }
    }

    /// Run the toolchain with `args`, killing it once `timeout` elapses.
    ///
    /// Standard output and standard error are captured separately. A non-zero
    /// exit is an `Ok` with that exit code; only a spawn failure or the
    /// timeout is an `Err`.
    ///
    /// On unix the toolchain leads its own process group, and a timeout kills
    /// the whole group so build jobs it started stop with it.
    pub async fn run<I, S>(&self, args: I, cwd: Option<&Path>, timeout: Duration) -> Result<ProcessOutput>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<OsStr>,
    {
        let mut cmd = Command::new(&self.program);
        cmd.args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(path) = self.search_path() {
            cmd.env("PATH", path);
        }
        if let Some(dir) = cwd {
            cmd.current_dir(dir);
        }
        #[cfg(unix)]
        cmd.process_group(0);

        let mut child = cmd.spawn().map_err(|source| CompilerError::Spawn {
            program: self.program.clone(),
            source,
        })?;

        let stdout = tokio::spawn(drain(child.stdout.take()));
        let stderr = tokio::spawn(drain(child.stderr.take()));

        let status = match tokio::time::timeout(timeout, child.wait()).await {
            Ok(status) => status?,
            Err(_) => {
                self.kill_tree(&mut child).await;
                stdout.abort();
                stderr.abort();
                return Err(CompilerError::Timeout {
                    program: self.program.clone(),
                    timeout_ms: timeout.as_millis() as u64,
                });
            }
        };

        let stdout = collect(stdout).await;
        let stderr = collect(stderr).await;

        tracing::debug!(program = %self.program, status = %status, "toolchain finished");
        Ok(ProcessOutput {
            exit_code: status.code(),
            stdout,
            stderr,
        })
    }

    /// Kill the child and everything in its process group, then reap it.
    async fn kill_tree(&self, child: &mut Child) {
        #[cfg(unix)]
        let group = child.id().map(|pid| nix::unistd::Pid::from_raw(pid as i32));
        #[cfg(unix)]
        if let Some(group) = group {
            if let Err(e) = nix::sys::signal::killpg(group, nix::sys::signal::Signal::SIGKILL) {
                tracing::warn!(program = %self.program, "failed to kill toolchain process group: {}", e);
            }
        }

        if let Err(e) = child.kill().await {
            tracing::warn!(program = %self.program, "failed to kill timed-out toolchain: {}", e);
        }

        #[cfg(unix)]
        if let Some(group) = group {
            wait_for_group_exit(group).await;
        }
    }

    /// `swift --version`.
    pub async fn version(&self, timeout: Duration) -> Result<ProcessOutput> {
        self.run(["--version"], None, timeout).await
    }

    /// `swift sdk list`.
    pub async fn sdk_list(&self, timeout: Duration) -> Result<ProcessOutput> {
        self.run(["sdk", "list"], None, timeout).await
    }

    /// Pick the SDK to build with: the first wasm SDK installed, or `fallback`.
    pub async fn detect_sdk(&self, timeout: Duration, fallback: &str) -> String {
        match self.sdk_list(timeout).await {
            Ok(out) if out.success() => match find_wasm_sdk(&out.stdout) {
                Some(sdk) => return sdk.to_string(),
                None => tracing::warn!("no wasm SDK installed; using {}", fallback),
            },
            Ok(out) => tracing::warn!("sdk list failed ({}); using {}", out.status_text(), fallback),
            Err(e) => tracing::warn!("sdk list failed: {}; using {}", e, fallback),
        }
        fallback.to_string()
    }
}

// Orphaned group members are reaped by init; poll until none is left.
#[cfg(unix)]
async fn wait_for_group_exit(group: nix::unistd::Pid) {
    let deadline = tokio::time::Instant::now() + GROUP_EXIT_GRACE;
    while nix::sys::signal::killpg(group, None::<nix::sys::signal::Signal>).is_ok() {
        if tokio::time::Instant::now() >= deadline {
            tracing::debug!(group = group.as_raw(), "process group still present after kill");
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

async fn drain<R: AsyncRead + Unpin>(pipe: Option<R>) -> String {
    let mut buf = Vec::new();
    if let Some(mut pipe) = pipe {
        if let Err(e) = pipe.read_to_end(&mut buf).await {
            tracing::debug!("toolchain pipe read failed: {}", e);
        }
    }
    String::from_utf8_lossy(&buf).into_owned()
}

// A process that exits while a child of its own still holds the pipe would
// otherwise keep us waiting.
async fn collect(task: tokio::task::JoinHandle<String>) -> String {
    match tokio::time::timeout(PIPE_DRAIN_GRACE, task).await {
        Ok(Ok(text)) => text,
        Ok(Err(e)) => {
            tracing::debug!("toolchain pipe reader failed: {}", e);
            String::new()
        }
        Err(_) => String::new(),
    }
}

/// First line of an `sdk list` listing that names a wasm SDK, trimmed.
pub fn find_wasm_sdk(listing: &str) -> Option<&str> {
    listing
        .lines()
        .find(|line| line.contains("wasm") || line.contains("WASI"))
        .map(str::trim)
        .filter(|line| !line.is_empty())
}

/// Whether an `sdk list` listing mentions a wasm SDK.
pub fn has_wasm_sdk(listing: &str) -> bool {
    listing.contains("wasm") || listing.contains("WASI")
}

/// Condense `swift --version` output to e.g. `Swift 6.1 (swift-6.1-RELEASE)`.
///
/// Falls back to the first line as-is when it does not look like a release.
pub fn clean_version(output: &str) -> String {
    let line = output.trim().lines().next().unwrap_or_default();
    match (VERSION_NUMBER.captures(line), RELEASE_TAG.captures(line)) {
        (Some(version), Some(release)) => format!("Swift {} ({})", &version[1], &release[1]),
        _ => line.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clean_version_release() {
        let out = "Swift version 6.1 (swift-6.1-RELEASE)\nTarget: x86_64-unknown-linux-gnu\n";
        assert_eq!(clean_version(out), "Swift 6.1 (swift-6.1-RELEASE)");
    }

    #[test]
    fn test_clean_version_patch_release() {
        let out = "Swift version 5.10.1 (swift-5.10.1-RELEASE)";
        assert_eq!(clean_version(out), "Swift 5.10.1 (swift-5.10.1-RELEASE)");
    }

    #[test]
    fn test_clean_version_unrecognized() {
        let out = "Apple Swift version 6.0 (swiftlang-6.0.0.9.10 clang-1600.0.26.2)\nTarget: arm64";
        assert_eq!(
            clean_version(out),
            "Apple Swift version 6.0 (swiftlang-6.0.0.9.10 clang-1600.0.26.2)"
        );
        assert_eq!(clean_version(""), "");
    }

    #[test]
    fn test_find_wasm_sdk() {
        let listing = "6.1-RELEASE-static-linux\n  swift-wasm-6.1-RELEASE-wasm32-unknown-wasi  \n";
        assert_eq!(
            find_wasm_sdk(listing),
            Some("swift-wasm-6.1-RELEASE-wasm32-unknown-wasi")
        );
        assert_eq!(find_wasm_sdk("WASI-preview1\n"), Some("WASI-preview1"));
        assert_eq!(find_wasm_sdk("static-linux\n"), None);
        assert_eq!(find_wasm_sdk(""), None);
    }

    #[test]
    fn test_has_wasm_sdk() {
        assert!(has_wasm_sdk("a\nswift-wasm\n"));
        assert!(!has_wasm_sdk("No Swift SDKs are currently installed."));
    }

    #[test]
    fn test_search_path_prefix_comes_first() {
        let toolchain = Toolchain::new("swift", Some(PathBuf::from("/opt/swift/usr/bin")));
        let path = toolchain.search_path().unwrap();
        let first = std::env::split_paths(&path).next().unwrap();
        assert_eq!(first, PathBuf::from("/opt/swift/usr/bin"));

        let plain = Toolchain::new("swift", None);
        assert_eq!(plain.search_path(), std::env::var_os("PATH"));
    }

    #[test]
    fn test_process_output_status() {
        let out = ProcessOutput {
            exit_code: Some(1),
            stdout: String::new(),
            stderr: String::new(),
        };
        assert!(!out.success());
        assert_eq!(out.status_text(), "exit code 1");
    }

    #[tokio::test]
    async fn test_spawn_failure() {
        let toolchain = Toolchain::new("/nonexistent/wasmpad-toolchain", None);
        let err = toolchain
            .run(["--version"], None, Duration::from_secs(1))
            .await
            .unwrap_err();
        assert!(matches!(err, CompilerError::Spawn { .. }), "got {:?}", err);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_output_is_captured_separately() {
        let toolchain = Toolchain::new("sh", None);
        let out = toolchain
            .run(["-c", "echo out; echo err >&2; exit 3"], None, Duration::from_secs(5))
            .await
            .unwrap();
        assert_eq!(out.exit_code, Some(3));
        assert_eq!(out.stdout, "out\n");
        assert_eq!(out.stderr, "err\n");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_timeout_kills_process() {
        let toolchain = Toolchain::new("sh", None);
        let start = std::time::Instant::now();
        let err = toolchain
            .run(["-c", "exec sleep 10"], None, Duration::from_millis(200))
            .await
            .unwrap_err();
        assert!(matches!(err, CompilerError::Timeout { timeout_ms: 200, .. }), "got {:?}", err);
        assert!(start.elapsed() < Duration::from_secs(5));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_timeout_kills_background_jobs() {
        let dir = tempfile::tempdir().unwrap();
        let marker = dir.path().join("late.o");
        let script = format!("(sleep 1; echo x > '{}') & sleep 10", marker.display());

        let toolchain = Toolchain::new("sh", None);
        let err = toolchain
            .run(["-c", script.as_str()], None, Duration::from_millis(200))
            .await
            .unwrap_err();
        assert!(matches!(err, CompilerError::Timeout { .. }), "got {:?}", err);

        tokio::time::sleep(Duration::from_millis(1500)).await;
        assert!(!marker.exists(), "background job outlived the timeout");
    }
}
