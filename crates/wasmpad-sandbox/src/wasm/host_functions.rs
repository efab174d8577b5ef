//! Linker glue between wasmtime and the [`SyscallTable`].
//!
//! Functions are registered before any instance exists, so they cannot
//! capture one. Instead each store carries an [`InstanceSlot`] that the host
//! fills exactly once after instantiation; every handler that touches guest
//! memory resolves the memory export through it, fetching a fresh view on
//! every call.
//!
//! ## Import Module
//!
//! All functions live under `wasi_snapshot_preview1`:
//! ```wat
//! (import "wasi_snapshot_preview1" "fd_write" (func (param i32 i32 i32 i32) (result i32)))
//! ```

use std::sync::OnceLock;

use thiserror::Error;
use wasmtime::{Caller, Instance, Linker, Memory};

use super::runtime::WasmHostState;
use super::syscalls::{SyscallTable, WASI_MODULE};
use crate::error::{Result, SandboxError};

/// Name of the memory export handlers resolve.
pub const MEMORY_EXPORT: &str = "memory";

/// Non-owning back-reference from the handlers to the running instance.
#[derive(Debug, Default)]
pub struct InstanceSlot(OnceLock<Instance>);

impl InstanceSlot {
    /// Create an unbound slot.
    pub fn new() -> Self {
        Self::default()
    }

    /// Bind the slot. A second bind is a host bug.
    pub fn bind(&self, instance: Instance) {
        let first = self.0.set(instance).is_ok();
        debug_assert!(first, "instance slot bound twice");
    }

    /// Whether the slot has been bound.
    pub fn is_bound(&self) -> bool {
        self.0.get().is_some()
    }

    fn get(&self) -> std::result::Result<Instance, HostFault> {
        self.0.get().copied().ok_or(HostFault::Unbound)
    }
}

/// Faults that end a run from inside a host function.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum HostFault {
    /// A handler ran before the instance slot was bound
    #[error("syscall invoked before the module instance was bound")]
    Unbound,

    /// The instance exports no linear memory
    #[error("module does not export `memory`")]
    NoMemory,
}

/// Raised by `proc_exit` to unwind the guest; the host treats it as a normal
/// end of the run.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
#[error("guest exited with code {0}")]
pub struct GuestExit(pub i32);

fn bound_memory(caller: &mut Caller<'_, WasmHostState>) -> std::result::Result<Memory, HostFault> {
    let instance = caller.data().instance.get()?;
    instance
        .get_memory(&mut *caller, MEMORY_EXPORT)
        .ok_or(HostFault::NoMemory)
}

/// Split the caller into the current memory bytes and the syscall table.
macro_rules! with_memory {
    ($caller:ident, |$mem:ident, $table:ident| $body:expr) => {{
        let memory = bound_memory(&mut $caller)?;
        let (data, state) = memory.data_and_store_mut(&mut $caller);
        let $mem: &mut [u8] = data;
        let $table: &mut SyscallTable = &mut state.syscalls;
        $body
    }};
}

/// Registers the emulated WASI subset on a linker.
pub struct WasiHostFunctions;

impl WasiHostFunctions {
    /// Register every call in [`SYSCALL_NAMES`](super::syscalls::SYSCALL_NAMES).
    pub fn register(linker: &mut Linker<WasmHostState>) -> Result<()> {
        Self::register_stdio(linker)?;
        Self::register_clocks_and_random(linker)?;
        Self::register_environment(linker)?;
        Self::register_denials(linker)?;
        Self::register_proc_exit(linker)?;
        Ok(())
    }

    // ========================================================================
    // Stdio
    // ========================================================================

    fn register_stdio(linker: &mut Linker<WasmHostState>) -> Result<()> {
        linker
            .func_wrap(
                WASI_MODULE,
                "fd_write",
                |mut caller: Caller<'_, WasmHostState>,
                 fd: i32,
                 iovs: i32,
                 iovs_len: i32,
                 nwritten: i32|
                 -> wasmtime::Result<i32> {
                    let fd = fd as u32;
                    if fd != super::syscalls::STDOUT && fd != super::syscalls::STDERR {
                        return Ok(super::syscalls::WRITE_FAILURE);
                    }
                    with_memory!(caller, |mem, table| {
                        Ok(table.fd_write(mem, fd, iovs as u32, iovs_len as u32, nwritten as u32)?)
                    })
                },
            )
            .map_err(|e| link_error("fd_write", e))?;

        linker
            .func_wrap(
                WASI_MODULE,
                "fd_read",
                |mut caller: Caller<'_, WasmHostState>,
                 fd: i32,
                 iovs: i32,
                 iovs_len: i32,
                 nread: i32|
                 -> wasmtime::Result<i32> {
                    if fd as u32 != super::syscalls::STDIN {
                        return Ok(caller.data().syscalls.no_such_descriptor());
                    }
                    with_memory!(caller, |mem, table| {
                        Ok(table.fd_read(mem, fd as u32, iovs as u32, iovs_len as u32, nread as u32)?)
                    })
                },
            )
            .map_err(|e| link_error("fd_read", e))?;

        linker
            .func_wrap(
                WASI_MODULE,
                "fd_fdstat_get",
                |mut caller: Caller<'_, WasmHostState>, fd: i32, stat: i32| -> wasmtime::Result<i32> {
                    with_memory!(caller, |mem, table| {
                        Ok(table.fd_fdstat_get(mem, fd as u32, stat as u32)?)
                    })
                },
            )
            .map_err(|e| link_error("fd_fdstat_get", e))?;

        Ok(())
    }

    // ========================================================================
    // Clocks and randomness
    // ========================================================================

    fn register_clocks_and_random(linker: &mut Linker<WasmHostState>) -> Result<()> {
        linker
            .func_wrap(
                WASI_MODULE,
                "clock_time_get",
                |mut caller: Caller<'_, WasmHostState>,
                 id: i32,
                 precision: i64,
                 time: i32|
                 -> wasmtime::Result<i32> {
                    with_memory!(caller, |mem, table| {
                        Ok(table.clock_time_get(mem, id as u32, precision as u64, time as u32)?)
                    })
                },
            )
            .map_err(|e| link_error("clock_time_get", e))?;

        linker
            .func_wrap(
                WASI_MODULE,
                "clock_res_get",
                |mut caller: Caller<'_, WasmHostState>, id: i32, res: i32| -> wasmtime::Result<i32> {
                    with_memory!(caller, |mem, table| {
                        Ok(table.clock_res_get(mem, id as u32, res as u32)?)
                    })
                },
            )
            .map_err(|e| link_error("clock_res_get", e))?;

        linker
            .func_wrap(
                WASI_MODULE,
                "random_get",
                |mut caller: Caller<'_, WasmHostState>, buf: i32, len: i32| -> wasmtime::Result<i32> {
                    with_memory!(caller, |mem, table| {
                        Ok(table.random_get(mem, buf as u32, len as u32)?)
                    })
                },
            )
            .map_err(|e| link_error("random_get", e))?;

        Ok(())
    }

    // ========================================================================
    // Environment and arguments
    // ========================================================================

    fn register_environment(linker: &mut Linker<WasmHostState>) -> Result<()> {
        for name in ["environ_sizes_get", "args_sizes_get"] {
            linker
                .func_wrap(
                    WASI_MODULE,
                    name,
                    |mut caller: Caller<'_, WasmHostState>,
                     count: i32,
                     buf_size: i32|
                     -> wasmtime::Result<i32> {
                        with_memory!(caller, |mem, table| {
                            Ok(table.sizes_get(mem, count as u32, buf_size as u32)?)
                        })
                    },
                )
                .map_err(|e| link_error(name, e))?;
        }

        for name in ["environ_get", "args_get"] {
            linker
                .func_wrap(
                    WASI_MODULE,
                    name,
                    |caller: Caller<'_, WasmHostState>, _list: i32, _buf: i32| -> i32 {
                        caller.data().syscalls.list_get()
                    },
                )
                .map_err(|e| link_error(name, e))?;
        }

        Ok(())
    }

    // ========================================================================
    // No-ops and denials
    // ========================================================================

    fn register_denials(linker: &mut Linker<WasmHostState>) -> Result<()> {
        // fd_close, fd_sync, fd_datasync: (fd) -> errno
        for name in ["fd_close", "fd_sync", "fd_datasync"] {
            linker
                .func_wrap(WASI_MODULE, name, |caller: Caller<'_, WasmHostState>, _fd: i32| -> i32 {
                    caller.data().syscalls.no_op()
                })
                .map_err(|e| link_error(name, e))?;
        }

        linker
            .func_wrap(
                WASI_MODULE,
                "fd_seek",
                |caller: Caller<'_, WasmHostState>, _fd: i32, _offset: i64, _whence: i32, _new_offset: i32| -> i32 {
                    caller.data().syscalls.no_op()
                },
            )
            .map_err(|e| link_error("fd_seek", e))?;

        linker
            .func_wrap(WASI_MODULE, "sched_yield", |caller: Caller<'_, WasmHostState>| -> i32 {
                caller.data().syscalls.no_op()
            })
            .map_err(|e| link_error("sched_yield", e))?;

        linker
            .func_wrap(
                WASI_MODULE,
                "fd_prestat_get",
                |caller: Caller<'_, WasmHostState>, _fd: i32, _prestat: i32| -> i32 {
                    caller.data().syscalls.no_preopens()
                },
            )
            .map_err(|e| link_error("fd_prestat_get", e))?;

        linker
            .func_wrap(
                WASI_MODULE,
                "fd_prestat_dir_name",
                |caller: Caller<'_, WasmHostState>, _fd: i32, _path: i32, _len: i32| -> i32 {
                    caller.data().syscalls.no_preopens()
                },
            )
            .map_err(|e| link_error("fd_prestat_dir_name", e))?;

        linker
            .func_wrap(
                WASI_MODULE,
                "fd_filestat_get",
                |caller: Caller<'_, WasmHostState>, _fd: i32, _buf: i32| -> i32 {
                    caller.data().syscalls.no_such_descriptor()
                },
            )
            .map_err(|e| link_error("fd_filestat_get", e))?;

        linker
            .func_wrap(
                WASI_MODULE,
                "fd_readdir",
                |caller: Caller<'_, WasmHostState>,
                 _fd: i32,
                 _buf: i32,
                 _buf_len: i32,
                 _cookie: i64,
                 _bufused: i32|
                 -> i32 { caller.data().syscalls.no_such_descriptor() },
            )
            .map_err(|e| link_error("fd_readdir", e))?;

        linker
            .func_wrap(
                WASI_MODULE,
                "path_open",
                |caller: Caller<'_, WasmHostState>,
                 _fd: i32,
                 _dirflags: i32,
                 _path: i32,
                 _path_len: i32,
                 _oflags: i32,
                 _rights_base: i64,
                 _rights_inheriting: i64,
                 _fdflags: i32,
                 _opened_fd: i32|
                 -> i32 { caller.data().syscalls.no_filesystem() },
            )
            .map_err(|e| link_error("path_open", e))?;

        linker
            .func_wrap(
                WASI_MODULE,
                "path_filestat_get",
                |caller: Caller<'_, WasmHostState>,
                 _fd: i32,
                 _flags: i32,
                 _path: i32,
                 _path_len: i32,
                 _buf: i32|
                 -> i32 { caller.data().syscalls.no_filesystem() },
            )
            .map_err(|e| link_error("path_filestat_get", e))?;

        // path_create_directory, path_remove_directory, path_unlink_file: (fd, path, len) -> errno
        for name in ["path_create_directory", "path_remove_directory", "path_unlink_file"] {
            linker
                .func_wrap(
                    WASI_MODULE,
                    name,
                    |caller: Caller<'_, WasmHostState>, _fd: i32, _path: i32, _len: i32| -> i32 {
                        caller.data().syscalls.no_filesystem()
                    },
                )
                .map_err(|e| link_error(name, e))?;
        }

        linker
            .func_wrap(
                WASI_MODULE,
                "poll_oneoff",
                |caller: Caller<'_, WasmHostState>, _in: i32, _out: i32, _nsubs: i32, _nevents: i32| -> i32 {
                    caller.data().syscalls.not_implemented()
                },
            )
            .map_err(|e| link_error("poll_oneoff", e))?;

        Ok(())
    }

    // ========================================================================
    // Process
    // ========================================================================

    fn register_proc_exit(linker: &mut Linker<WasmHostState>) -> Result<()> {
        linker
            .func_wrap(
                WASI_MODULE,
                "proc_exit",
                |mut caller: Caller<'_, WasmHostState>, code: i32| -> wasmtime::Result<()> {
                    caller.data_mut().syscalls.proc_exit(code);
                    Err(GuestExit(code).into())
                },
            )
            .map_err(|e| link_error("proc_exit", e))?;
        Ok(())
    }
}

fn link_error(name: &str, e: wasmtime::Error) -> SandboxError {
    SandboxError::WasmError(format!("failed to register {}: {}", name, e))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unbound_slot_faults() {
        let slot = InstanceSlot::new();
        assert!(!slot.is_bound());
        assert_eq!(slot.get().unwrap_err(), HostFault::Unbound);
    }

    #[test]
    fn test_guest_exit_message() {
        assert_eq!(GuestExit(2).to_string(), "guest exited with code 2");
    }
}
