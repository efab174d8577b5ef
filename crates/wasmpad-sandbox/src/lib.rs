//! # wasmpad sandbox
//!
//! Execution host for wasmpad, the compile-and-run playground.
//!
//! A program compiled to a WASI command module is instantiated against a small,
//! fixed emulation of `wasi_snapshot_preview1` and its `_start` export is run
//! to completion. Output is collected in an [`OutputSink`] that callers can
//! watch while the guest runs, and failures come back as typed
//! [`SandboxError`]s.
//!
//! ## Failure Model
//!
//! | Stage | Error |
//! |-------|-------|
//! | parse / validate | [`SandboxError::InvalidModule`] |
//! | link / instantiate | [`SandboxError::InstantiationError`] |
//! | locate `_start` | [`SandboxError::MissingEntrypoint`] |
//! | execute | [`SandboxError::TrapError`] |
//!
//! Per-call denials (`EBADF`, `ENOTCAPABLE`, `ENOSYS`) are returned to the
//! guest as [`Errno`] codes and never fail the run by themselves.
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use wasmpad_sandbox::{OutputSink, ScriptedInput, WasmConfig, WasmSandbox};
//!
//! let sandbox = WasmSandbox::new(WasmConfig::default())?;
//! let sink = OutputSink::new();
//! sandbox.run(&bytes, &sink, ScriptedInput::new(["42"]))?;
//! assert_eq!(sink.snapshot(), "You typed 42\n");
//! ```

#![warn(missing_docs)]
#![warn(rust_2018_idioms)]

pub mod error;
pub mod input;
pub mod output;
pub mod wasm;

// Re-export main types
pub use error::{MemoryFault, Result, SandboxError};
pub use input::{ChannelInput, InputSource, NoInput, ScriptedInput, StdinInput};
pub use output::OutputSink;
pub use wasm::{Errno, RunReport, SyscallTable, WasmConfig, WasmModule, WasmSandbox};
