//! Toolchain introspection for the health and debug surfaces.

use std::time::Duration;

use chrono::{SecondsFormat, Utc};
use serde::Serialize;

use crate::toolchain::{clean_version, has_wasm_sdk, Toolchain};

/// Outcome of a single probe.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Check {
    /// `success` or `error`
    pub status: &'static str,
    /// Probe output on success
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output: Option<String>,
    /// Failure reason
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl Check {
    fn success(output: impl Into<String>) -> Self {
        Self {
            status: "success",
            output: Some(output.into()),
            error: None,
        }
    }

    fn error(error: impl Into<String>) -> Self {
        Self {
            status: "error",
            output: None,
            error: Some(error.into()),
        }
    }

    /// Whether the probe succeeded.
    pub fn is_success(&self) -> bool {
        self.status == "success"
    }
}

/// `sdk list` probe, plus whether a wasm SDK showed up.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SdkCheck {
    /// Probe outcome
    #[serde(flatten)]
    pub check: Check,
    /// Whether the listing names a wasm SDK
    #[serde(skip_serializing_if = "Option::is_none")]
    pub has_wasm_sdk: Option<bool>,
}

/// Process environment relevant to finding the toolchain.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Environment {
    /// `PATH` the toolchain is run with
    #[serde(rename = "PATH")]
    pub path: Option<String>,
    /// Host operating system
    pub platform: &'static str,
    /// Host architecture
    pub arch: &'static str,
}

/// Every probe the debug surface runs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DebugChecks {
    /// `swift --version`, condensed
    pub swift_version: Check,
    /// `swift sdk list`
    pub swift_sdks: SdkCheck,
    /// Process environment
    pub environment: Environment,
    /// The wasm lines of `swift sdk list`
    pub wasm_sdk_installed: Check,
}

/// Debug surface payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DebugReport {
    /// RFC 3339 time the report was taken
    pub timestamp: String,
    /// Probe results
    pub checks: DebugChecks,
}

/// Raw `sdk list` result for the SDK test surface.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SdkTestReport {
    /// `tested` when the toolchain ran, `error` when it could not be started
    pub status: &'static str,
    /// Exit code of `sdk list`
    #[serde(skip_serializing_if = "Option::is_none")]
    pub exit_code: Option<i32>,
    /// Standard output of `sdk list`
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sdks: Option<String>,
    /// Standard error of `sdk list`, when non-empty
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Why the toolchain could not be run
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

/// Probe the toolchain version and SDKs.
pub async fn debug_report(toolchain: &Toolchain, timeout: Duration) -> DebugReport {
    let swift_version = match toolchain.version(timeout).await {
        Ok(out) if out.success() => Check::success(clean_version(&out.stdout)),
        Ok(out) => Check::error(failure_text(&out.status_text(), &out.stderr)),
        Err(e) => Check::error(e.to_string()),
    };

    let (swift_sdks, wasm_sdk_installed) = match toolchain.sdk_list(timeout).await {
        Ok(out) if out.success() => {
            let listing = out.stdout.trim();
            let wasm_lines: Vec<&str> = listing
                .lines()
                .filter(|line| line.to_ascii_lowercase().contains("wasm"))
                .collect();
            let installed = if wasm_lines.is_empty() {
                Check::error("WASM SDK not found")
            } else {
                Check::success(wasm_lines.join("\n"))
            };
            let sdks = SdkCheck {
                check: Check::success(listing),
                has_wasm_sdk: Some(has_wasm_sdk(listing)),
            };
            (sdks, installed)
        }
        Ok(out) => {
            let reason = failure_text(&out.status_text(), &out.stderr);
            let sdks = SdkCheck {
                check: Check::error(reason.clone()),
                has_wasm_sdk: None,
            };
            (sdks, Check::error(reason))
        }
        Err(e) => {
            let sdks = SdkCheck {
                check: Check::error(e.to_string()),
                has_wasm_sdk: None,
            };
            (sdks, Check::error(e.to_string()))
        }
    };

    DebugReport {
        timestamp: Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true),
        checks: DebugChecks {
            swift_version,
            swift_sdks,
            environment: Environment {
                path: toolchain
                    .search_path()
                    .map(|p| p.to_string_lossy().into_owned()),
                platform: std::env::consts::OS,
                arch: std::env::consts::ARCH,
            },
            wasm_sdk_installed,
        },
    }
}

/// Run `sdk list` and report its raw result.
pub async fn sdk_test(toolchain: &Toolchain, timeout: Duration) -> SdkTestReport {
    match toolchain.sdk_list(timeout).await {
        Ok(out) => SdkTestReport {
            status: "tested",
            exit_code: out.exit_code,
            sdks: Some(out.stdout),
            error: Some(out.stderr).filter(|s| !s.is_empty()),
            message: None,
        },
        Err(e) => SdkTestReport {
            status: "error",
            exit_code: None,
            sdks: None,
            error: None,
            message: Some(e.to_string()),
        },
    }
}

fn failure_text(status: &str, stderr: &str) -> String {
    match stderr.trim() {
        "" => status.to_string(),
        stderr => format!("{}: {}", status, stderr),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn missing_toolchain() -> Toolchain {
        Toolchain::new("/nonexistent/wasmpad-toolchain", None)
    }

    #[tokio::test]
    async fn test_debug_report_without_toolchain() {
        let report = debug_report(&missing_toolchain(), Duration::from_secs(1)).await;
        assert!(!report.checks.swift_version.is_success());
        assert!(!report.checks.swift_sdks.check.is_success());
        assert!(report.checks.swift_sdks.has_wasm_sdk.is_none());
        assert_eq!(report.checks.environment.platform, std::env::consts::OS);
        assert!(chrono::DateTime::parse_from_rfc3339(&report.timestamp).is_ok());
    }

    #[tokio::test]
    async fn test_sdk_test_without_toolchain() {
        let report = sdk_test(&missing_toolchain(), Duration::from_secs(1)).await;
        assert_eq!(report.status, "error");
        assert!(report.exit_code.is_none());
        assert!(report.message.unwrap().contains("failed to start"));
    }

    #[test]
    fn test_debug_report_json_shape() {
        let report = DebugReport {
            timestamp: "2026-01-01T00:00:00.000Z".into(),
            checks: DebugChecks {
                swift_version: Check::success("Swift 6.1 (swift-6.1-RELEASE)"),
                swift_sdks: SdkCheck {
                    check: Check::success("swift-wasm-6.1-RELEASE-wasm32-unknown-wasi"),
                    has_wasm_sdk: Some(true),
                },
                environment: Environment {
                    path: Some("/usr/bin".into()),
                    platform: "linux",
                    arch: "x86_64",
                },
                wasm_sdk_installed: Check::error("WASM SDK not found"),
            },
        };
        let json = serde_json::to_value(&report).unwrap();
        assert_eq!(json["checks"]["swiftVersion"]["status"], "success");
        assert_eq!(json["checks"]["swiftSdks"]["hasWasmSdk"], true);
        assert_eq!(json["checks"]["environment"]["PATH"], "/usr/bin");
        assert_eq!(json["checks"]["wasmSdkInstalled"]["error"], "WASM SDK not found");
        assert!(json["checks"]["wasmSdkInstalled"].get("output").is_none());
    }

    #[test]
    fn test_failure_text() {
        assert_eq!(failure_text("exit code 1", ""), "exit code 1");
        assert_eq!(failure_text("exit code 1", "no such sdk\n"), "exit code 1: no such sdk");
    }
}
