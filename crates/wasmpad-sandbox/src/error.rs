//! Error types for the sandbox crate.

use thiserror::Error;

/// Sandbox error type
///
/// These are run-level failures surfaced to whoever called
/// [`WasmSandbox::run`](crate::WasmSandbox::run). Per-call denials returned to
/// the guest are [`Errno`](crate::Errno) codes, not errors.
#[derive(Error, Debug)]
pub enum SandboxError {
    /// The binary could not be parsed or validated
    #[error("invalid module: {0}")]
    InvalidModule(String),

    /// Linking or instantiating the module failed (e.g. an unknown import)
    #[error("instantiation failed: {0}")]
    InstantiationError(String),

    /// The module has no usable start export
    #[error("missing entrypoint: {0}")]
    MissingEntrypoint(String),

    /// The guest trapped while running
    #[error("wasm trap: {0}")]
    TrapError(String),

    /// Engine or host setup failed
    #[error("WASM sandbox error: {0}")]
    WasmError(String),

    /// Configuration error
    #[error("configuration error: {0}")]
    ConfigError(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// A guest access outside its own linear memory.
///
/// Raised from host functions, where it becomes a trap and ends the run.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
#[error("guest memory access out of bounds: {len} bytes at {addr:#x} (memory is {size} bytes)")]
pub struct MemoryFault {
    /// Guest address of the access
    pub addr: u32,
    /// Length of the access in bytes
    pub len: u64,
    /// Current size of the linear memory
    pub size: usize,
}

/// Result type alias for sandbox operations
pub type Result<T> = std::result::Result<T, SandboxError>;
