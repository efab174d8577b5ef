//! Transport-agnostic request handlers for the playground endpoints.
//!
//! Each handler returns an [`ApiResponse`] (status, headers, body) that any
//! HTTP server can write out as-is:
//!
//! | Route | Handler |
//! |-------|---------|
//! | `GET /` | [`Playground::root`] |
//! | `POST /compile` | [`Playground::compile`] |
//! | `GET /wasm/{id}` | [`Playground::artifact`] |
//! | `GET /health` | [`Playground::health`] |
//! | `GET /debug` | [`Playground::debug`] |
//! | `GET /test-sdk` | [`Playground::test_sdk`] |
//! | `OPTIONS *` | [`Playground::options`] |

use serde::{Deserialize, Serialize};

use crate::artifacts::ArtifactStore;
use crate::diagnostics::{debug_report, sdk_test};
use crate::error::CompilerError;
use crate::orchestrator::{CompileResult, Compiler, MISSING_SOURCE};
use crate::transport::encode_artifact;

/// Service name reported by the health surface.
pub const SERVICE_NAME: &str = "SwiftWasm Compiler Server";

/// Plain-text body of `GET /`.
pub const BANNER: &str = "SwiftWasm Compiler Server is running!";

/// CORS headers attached to every response.
pub const CORS_HEADERS: [(&str, &str); 3] = [
    ("Access-Control-Allow-Origin", "*"),
    ("Access-Control-Allow-Methods", "GET, POST, PUT, DELETE, OPTIONS"),
    ("Access-Control-Allow-Headers", "Content-Type, Authorization"),
];

/// A response ready to be written by an HTTP layer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApiResponse {
    /// HTTP status code
    pub status: u16,
    /// Header name/value pairs, CORS included
    pub headers: Vec<(String, String)>,
    /// Response body
    pub body: Vec<u8>,
}

impl ApiResponse {
    fn new(status: u16, content_type: Option<&str>, body: Vec<u8>) -> Self {
        let mut headers: Vec<(String, String)> = CORS_HEADERS
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        if let Some(content_type) = content_type {
            headers.push(("Content-Type".to_string(), content_type.to_string()));
        }
        Self {
            status,
            headers,
            body,
        }
    }

    fn json<T: Serialize>(status: u16, value: &T) -> Self {
        match serde_json::to_vec(value) {
            Ok(body) => Self::new(status, Some("application/json"), body),
            Err(e) => Self::text(500, &format!("failed to encode response: {}", e)),
        }
    }

    fn text(status: u16, text: &str) -> Self {
        Self::new(
            status,
            Some("text/plain; charset=utf-8"),
            text.as_bytes().to_vec(),
        )
    }

    fn with_header(mut self, name: &str, value: impl Into<String>) -> Self {
        self.headers.push((name.to_string(), value.into()));
        self
    }

    /// First header named `name` (case-insensitive).
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    /// Body as text (lossy).
    pub fn body_text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }
}

/// Body of `POST /compile`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompileRequest {
    /// Swift source
    pub code: String,
}

/// Reply of `POST /compile`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompileResponse {
    /// Whether an artifact was produced
    pub success: bool,
    /// Success message or failure report
    pub output: String,
    /// Failure reason
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Base64 module bytes
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub wasm_base64: Option<String>,
    /// Id for `GET /wasm/{id}`, when an artifact store is configured
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub wasm_id: Option<String>,
}

impl CompileResponse {
    fn rejected(error: impl Into<String>) -> Self {
        Self {
            success: false,
            output: String::new(),
            error: Some(error.into()),
            wasm_base64: None,
            wasm_id: None,
        }
    }
}

impl From<&CompileResult> for CompileResponse {
    fn from(result: &CompileResult) -> Self {
        Self {
            success: result.success(),
            output: result.diagnostic_text().to_string(),
            error: result.error_message().map(str::to_string),
            wasm_base64: result.binary_artifact().map(encode_artifact),
            wasm_id: None,
        }
    }
}

/// Health surface payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HealthResponse {
    /// Always `ok`
    pub status: String,
    /// [`SERVICE_NAME`]
    pub service: String,
}

/// The playground endpoints over one compiler.
#[derive(Debug)]
pub struct Playground {
    compiler: Compiler,
    artifacts: Option<ArtifactStore>,
}

impl Playground {
    /// Serve compiles through `compiler`, without an artifact store.
    pub fn new(compiler: Compiler) -> Self {
        Self {
            compiler,
            artifacts: None,
        }
    }

    /// Builder: also stage successful artifacts in `store`
    pub fn with_artifact_store(mut self, store: ArtifactStore) -> Self {
        self.artifacts = Some(store);
        self
    }

    /// Get the compiler.
    pub fn compiler(&self) -> &Compiler {
        &self.compiler
    }

    /// `OPTIONS` preflight.
    pub fn options(&self) -> ApiResponse {
        ApiResponse::new(200, None, Vec::new())
    }

    /// `GET /`.
    pub fn root(&self) -> ApiResponse {
        ApiResponse::text(200, BANNER)
    }

    /// `GET /health`.
    pub fn health(&self) -> ApiResponse {
        ApiResponse::json(
            200,
            &HealthResponse {
                status: "ok".to_string(),
                service: SERVICE_NAME.to_string(),
            },
        )
    }

    /// `POST /compile` with a JSON [`CompileRequest`] body.
    ///
    /// Undecodable bodies and blank source answer 400. Every compile outcome,
    /// failures included, answers 200.
    pub async fn compile(&self, body: &[u8]) -> ApiResponse {
        let request: CompileRequest = match serde_json::from_slice(body) {
            Ok(request) => request,
            Err(e) => {
                let reply = CompileResponse::rejected(format!("failed to decode request: {}", e));
                return ApiResponse::json(400, &reply);
            }
        };
        if request.code.trim().is_empty() {
            return ApiResponse::json(400, &CompileResponse::rejected(MISSING_SOURCE));
        }

        let result = self.compiler.compile(&request.code).await;
        let mut reply = CompileResponse::from(&result);

        if let (Some(store), Some(bytes)) = (&self.artifacts, result.binary_artifact()) {
            match store.store(bytes).await {
                Ok(id) => reply.wasm_id = Some(id),
                Err(e) => tracing::warn!("failed to stage artifact: {}", e),
            }
        }

        ApiResponse::json(200, &reply)
    }

    /// `GET /wasm/{id}`.
    pub async fn artifact(&self, id: &str) -> ApiResponse {
        if id.is_empty() {
            return ApiResponse::text(400, "WASM ID is required");
        }
        let Some(store) = &self.artifacts else {
            return ApiResponse::text(404, "WASM file not found");
        };

        match store.load(id).await {
            Ok(Some(bytes)) => {
                let len = bytes.len();
                ApiResponse::new(200, Some("application/wasm"), bytes)
                    .with_header("Content-Length", len.to_string())
                    .with_header("Cache-Control", "no-cache")
            }
            Ok(None) | Err(CompilerError::InvalidArtifactId(_)) => {
                ApiResponse::text(404, "WASM file not found")
            }
            Err(e) => ApiResponse::text(500, &format!("WASM file read error: {}", e)),
        }
    }

    /// `GET /debug`.
    pub async fn debug(&self) -> ApiResponse {
        let config = self.compiler.config();
        let report = debug_report(self.compiler.toolchain(), config.probe_timeout()).await;
        ApiResponse::json(200, &report)
    }

    /// `GET /test-sdk`.
    pub async fn test_sdk(&self) -> ApiResponse {
        let config = self.compiler.config();
        let report = sdk_test(self.compiler.toolchain(), config.probe_timeout()).await;
        ApiResponse::json(200, &report)
    }
}
