//! Error types for the compiler crate.

use std::path::PathBuf;

use thiserror::Error;

/// Compiler error type
///
/// Inside [`Compiler::compile`](crate::Compiler::compile) every one of these
/// is folded into a failed [`CompileResult`](crate::CompileResult); they only
/// escape from the lower-level helpers (toolchain probes, transport, the
/// artifact store).
#[derive(Error, Debug)]
pub enum CompilerError {
    /// The toolchain could not be started
    #[error("failed to start `{program}`: {source}")]
    Spawn {
        /// Program that was invoked
        program: String,
        /// Underlying spawn error
        #[source]
        source: std::io::Error,
    },

    /// The toolchain did not finish within its deadline and was killed
    #[error("`{program}` timed out after {timeout_ms} ms")]
    Timeout {
        /// Program that was invoked
        program: String,
        /// Deadline that elapsed
        timeout_ms: u64,
    },

    /// The staging tree could not be created or written
    #[error("failed to stage project under {root}: {source}")]
    Staging {
        /// Staging root directory
        root: PathBuf,
        /// Underlying I/O error
        #[source]
        source: std::io::Error,
    },

    /// A base64 artifact payload did not decode
    #[error("invalid artifact encoding: {0}")]
    Transport(#[from] base64::DecodeError),

    /// An artifact id contained characters outside `[A-Za-z0-9_-]`
    #[error("invalid artifact id `{0}`")]
    InvalidArtifactId(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type alias for compiler operations
pub type Result<T> = std::result::Result<T, CompilerError>;
