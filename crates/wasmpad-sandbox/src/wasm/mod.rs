//! WebAssembly execution host for compiled guest programs.
//!
//! Guests are ordinary WASI preview1 command modules. Instead of wiring in a
//! full WASI implementation, the host links a fixed emulation table: stdout
//! and stderr go to an [`OutputSink`](crate::OutputSink), stdin comes from an
//! [`InputSource`](crate::InputSource), clocks and randomness work, and
//! everything else is denied.
//!
//! ## Security Model
//!
//! - **Memory isolation**: Each run gets its own store and linear memory
//! - **No filesystem**: `path_*` calls answer `ENOTCAPABLE`, there are no preopens
//! - **No environment**: empty argv and environ
//! - **Three descriptors**: 0, 1 and 2; anything else is a bad descriptor
//!
//! ## Usage
//!
//! ```rust,ignore
//! use wasmpad_sandbox::{NoInput, OutputSink, WasmConfig, WasmSandbox};
//!
//! let sandbox = WasmSandbox::new(WasmConfig::default())?;
//! let sink = OutputSink::new();
//! let report = sandbox.run(&wasm_bytes, &sink, NoInput)?;
//! println!("{}", sink.snapshot());
//! ```

mod config;
mod host_functions;
mod memory;
mod runtime;
mod syscalls;

pub use config::{WasmConfig, DEFAULT_ENTRYPOINT};
pub use host_functions::{GuestExit, HostFault, InstanceSlot, MEMORY_EXPORT};
pub use memory::{encode_utf8, GuestMemory, IoVector, IOVEC_SIZE};
pub use runtime::{RunReport, WasmHostState, WasmModule, WasmSandbox};
pub use syscalls::{
    Errno, SyscallTable, CLOCK_RESOLUTION_NS, FDSTAT_SIZE, STDERR, STDIN, STDOUT, SYSCALL_NAMES,
    WASI_MODULE, WRITE_FAILURE,
};
