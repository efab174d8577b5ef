//! # wasmpad compiler
//!
//! Compile orchestrator for wasmpad: turns Swift source into a WASI command
//! module by staging a throwaway package and running the Swift toolchain's
//! wasm SDK over it.
//!
//! ```rust,ignore
//! use wasmpad_compiler::{Compiler, CompilerConfig};
//!
//! let compiler = Compiler::new(CompilerConfig::default());
//! let result = compiler.compile("print(\"hi\")").await;
//! if let Some(wasm) = result.binary_artifact() {
//!     // hand to wasmpad_sandbox::WasmSandbox::run
//! }
//! ```
//!
//! Compiles never error out: timeouts, toolchain failures and missing
//! artifacts all come back as a failed [`CompileResult`]. The [`api`] module
//! wraps the orchestrator in the playground's request handlers.

#![warn(missing_docs)]
#![warn(rust_2018_idioms)]

pub mod api;
pub mod artifacts;
pub mod config;
pub mod diagnostics;
pub mod error;
pub mod orchestrator;
pub mod preprocess;
pub mod staging;
pub mod toolchain;
pub mod transport;

// Re-export main types
pub use api::{ApiResponse, CompileRequest, CompileResponse, Playground};
pub use artifacts::ArtifactStore;
pub use config::CompilerConfig;
pub use error::{CompilerError, Result};
pub use orchestrator::{CompileResult, Compiler};
pub use staging::StagedProject;
pub use toolchain::{ProcessOutput, Toolchain};
pub use transport::{decode_artifact, encode_artifact};
