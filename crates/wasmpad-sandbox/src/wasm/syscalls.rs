//! The emulated WASI preview1 subset.
//!
//! Handlers take only numeric arguments (guest addresses, descriptor numbers)
//! and return a numeric status. Their side effects go through
//! [`GuestMemory`] and the [`OutputSink`]; nothing here knows about wasmtime,
//! so the whole table can be driven against a plain byte buffer.
//!
//! The sandbox has no filesystem, environment, arguments or subprocesses.
//! Every call outside stdio, clocks and randomness answers with the most
//! specific denial code rather than pretending to succeed.

use std::time::{SystemTime, UNIX_EPOCH};

use rand::rngs::OsRng;
use rand::RngCore;

use super::memory::{encode_utf8, GuestMemory};
use crate::error::MemoryFault;
use crate::input::InputSource;
use crate::output::OutputSink;

/// Import module name for every emulated call.
pub const WASI_MODULE: &str = "wasi_snapshot_preview1";

/// Status returned by `fd_write` for any descriptor other than 1 or 2.
pub const WRITE_FAILURE: i32 = -1;

/// Nominal clock resolution reported by `clock_res_get` (1 ms).
pub const CLOCK_RESOLUTION_NS: u64 = 1_000_000;

/// Size of the `fdstat` structure written by `fd_fdstat_get`.
pub const FDSTAT_SIZE: u32 = 24;

/// Input descriptor.
pub const STDIN: u32 = 0;
/// Output descriptor.
pub const STDOUT: u32 = 1;
/// Error-output descriptor.
pub const STDERR: u32 = 2;

/// Every import name the table defines.
pub const SYSCALL_NAMES: &[&str] = &[
    "fd_write",
    "fd_read",
    "clock_time_get",
    "clock_res_get",
    "random_get",
    "fd_fdstat_get",
    "fd_close",
    "fd_seek",
    "fd_sync",
    "fd_datasync",
    "sched_yield",
    "environ_get",
    "args_get",
    "environ_sizes_get",
    "args_sizes_get",
    "fd_prestat_get",
    "fd_prestat_dir_name",
    "path_open",
    "path_filestat_get",
    "path_create_directory",
    "path_remove_directory",
    "path_unlink_file",
    "fd_readdir",
    "fd_filestat_get",
    "poll_oneoff",
    "proc_exit",
];

/// WASI errno values used by the table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i32)]
pub enum Errno {
    /// No error
    Success = 0,
    /// `EBADF`: the descriptor does not exist in this sandbox
    BadDescriptor = 8,
    /// `ENOSYS`: the call is not implemented
    NotImplemented = 52,
    /// `ENOTCAPABLE`: the sandbox never grants this capability
    InsufficientCapability = 76,
}

impl Errno {
    /// Raw status code handed back to the guest.
    pub fn code(self) -> i32 {
        self as i32
    }
}

/// Handler state for one run: the output sink, the input source and the
/// exit code the guest asked for.
pub struct SyscallTable {
    sink: OutputSink,
    input: Box<dyn InputSource>,
    exit_code: Option<i32>,
    // Trailing bytes of a UTF-8 sequence the guest has not finished writing.
    pending: Vec<u8>,
}

impl std::fmt::Debug for SyscallTable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SyscallTable")
            .field("sink_len", &self.sink.len())
            .field("exit_code", &self.exit_code)
            .field("pending", &self.pending.len())
            .finish_non_exhaustive()
    }
}

impl SyscallTable {
    /// Create a table writing into `sink` and reading from `input`.
    pub fn new(sink: OutputSink, input: Box<dyn InputSource>) -> Self {
        Self {
            sink,
            input,
            exit_code: None,
            pending: Vec::new(),
        }
    }

    /// The sink this table appends to.
    pub fn sink(&self) -> &OutputSink {
        &self.sink
    }

    /// Exit code recorded by `proc_exit`, if the guest called it.
    pub fn exit_code(&self) -> Option<i32> {
        self.exit_code
    }

    // ========================================================================
    // Stdio
    // ========================================================================

    /// `fd_write`: append the IoVectors' text to the sink, in order.
    ///
    /// The bytes of all IoVectors are decoded together, and a multibyte
    /// character cut off at the end of the call is held until the next write
    /// (or [`flush`](Self::flush)) completes it.
    pub fn fd_write<M: GuestMemory + ?Sized>(
        &mut self,
        mem: &mut M,
        fd: u32,
        iovs_ptr: u32,
        iovs_len: u32,
        nwritten_ptr: u32,
    ) -> Result<i32, MemoryFault> {
        if fd != STDOUT && fd != STDERR {
            tracing::debug!(fd, "fd_write rejected");
            return Ok(WRITE_FAILURE);
        }

        let mut bytes = std::mem::take(&mut self.pending);
        let mut total: u32 = 0;
        for iov in mem.read_io_vectors(iovs_ptr, iovs_len)? {
            bytes.extend_from_slice(mem.bytes(iov.ptr, iov.len)?);
            total = total.wrapping_add(iov.len);
        }

        let complete = bytes.len() - incomplete_tail(&bytes);
        self.pending = bytes.split_off(complete);
        self.sink.append(&String::from_utf8_lossy(&bytes));

        mem.write_u32(nwritten_ptr, total)?;
        tracing::trace!(fd, bytes = total, "fd_write");
        Ok(Errno::Success.code())
    }

    /// `fd_read`: copy one line of input (plus `\n`) across the IoVectors.
    ///
    /// Copying stops when the line is exhausted; unused buffer space is left
    /// untouched and `nread` reports only the bytes copied. Whatever part of
    /// the line does not fit is discarded.
    pub fn fd_read<M: GuestMemory + ?Sized>(
        &mut self,
        mem: &mut M,
        fd: u32,
        iovs_ptr: u32,
        iovs_len: u32,
        nread_ptr: u32,
    ) -> Result<i32, MemoryFault> {
        if fd != STDIN {
            return Ok(Errno::BadDescriptor.code());
        }

        let iovs = mem.read_io_vectors(iovs_ptr, iovs_len)?;

        let Some(line) = self.input.read_line() else {
            tracing::debug!("fd_read: input cancelled");
            mem.write_u32(nread_ptr, 0)?;
            return Ok(Errno::Success.code());
        };

        let mut input = encode_utf8(&line);
        input.push(b'\n');

        let mut copied = 0usize;
        for iov in iovs {
            let take = (iov.len as usize).min(input.len() - copied);
            if take > 0 {
                mem.write_bytes(iov.ptr, &input[copied..copied + take])?;
                copied += take;
            }
            if copied >= input.len() {
                break;
            }
        }

        if copied < input.len() {
            tracing::debug!(dropped = input.len() - copied, "fd_read: line truncated");
        }
        mem.write_u32(nread_ptr, copied as u32)?;
        Ok(Errno::Success.code())
    }

    /// `fd_fdstat_get`: a zeroed status (unknown type, no flags, no rights).
    pub fn fd_fdstat_get<M: GuestMemory + ?Sized>(
        &self,
        mem: &mut M,
        _fd: u32,
        stat_ptr: u32,
    ) -> Result<i32, MemoryFault> {
        mem.bytes_mut(stat_ptr, FDSTAT_SIZE)?.fill(0);
        Ok(Errno::Success.code())
    }

    // ========================================================================
    // Clocks and randomness
    // ========================================================================

    /// `clock_time_get`: wall-clock nanoseconds since the Unix epoch.
    pub fn clock_time_get<M: GuestMemory + ?Sized>(
        &self,
        mem: &mut M,
        _clock_id: u32,
        _precision: u64,
        time_ptr: u32,
    ) -> Result<i32, MemoryFault> {
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_nanos() as u64)
            .unwrap_or(0);
        mem.write_u64(time_ptr, now)?;
        Ok(Errno::Success.code())
    }

    /// `clock_res_get`: always one millisecond.
    pub fn clock_res_get<M: GuestMemory + ?Sized>(
        &self,
        mem: &mut M,
        _clock_id: u32,
        res_ptr: u32,
    ) -> Result<i32, MemoryFault> {
        mem.write_u64(res_ptr, CLOCK_RESOLUTION_NS)?;
        Ok(Errno::Success.code())
    }

    /// `random_get`: fill the buffer from the OS random source.
    pub fn random_get<M: GuestMemory + ?Sized>(
        &self,
        mem: &mut M,
        buf_ptr: u32,
        buf_len: u32,
    ) -> Result<i32, MemoryFault> {
        OsRng.fill_bytes(mem.bytes_mut(buf_ptr, buf_len)?);
        Ok(Errno::Success.code())
    }

    // ========================================================================
    // Environment and arguments (always empty)
    // ========================================================================

    /// `environ_sizes_get` / `args_sizes_get`: zero entries, zero bytes.
    pub fn sizes_get<M: GuestMemory + ?Sized>(
        &self,
        mem: &mut M,
        count_ptr: u32,
        buf_size_ptr: u32,
    ) -> Result<i32, MemoryFault> {
        mem.write_u32(count_ptr, 0)?;
        mem.write_u32(buf_size_ptr, 0)?;
        Ok(Errno::Success.code())
    }

    /// `environ_get` / `args_get`: nothing to copy.
    pub fn list_get(&self) -> i32 {
        Errno::Success.code()
    }

    // ========================================================================
    // No-ops and denials
    // ========================================================================

    /// `fd_close`, `fd_seek`, `fd_sync`, `fd_datasync`, `sched_yield`.
    pub fn no_op(&self) -> i32 {
        Errno::Success.code()
    }

    /// `fd_prestat_get`, `fd_prestat_dir_name`: no preopened directories.
    pub fn no_preopens(&self) -> i32 {
        Errno::BadDescriptor.code()
    }

    /// `fd_readdir`, `fd_filestat_get`: no file-backed descriptors.
    pub fn no_such_descriptor(&self) -> i32 {
        Errno::BadDescriptor.code()
    }

    /// `path_*`: filesystem access is never granted.
    pub fn no_filesystem(&self) -> i32 {
        Errno::InsufficientCapability.code()
    }

    /// `poll_oneoff`.
    pub fn not_implemented(&self) -> i32 {
        Errno::NotImplemented.code()
    }

    // ========================================================================
    // Process
    // ========================================================================

    /// `proc_exit`: record the exit and note non-zero codes in the sink.
    ///
    /// Returns normally; stopping the guest is the execution host's job.
    pub fn proc_exit(&mut self, code: i32) {
        self.flush();
        if code != 0 {
            self.sink
                .append(&format!("\nprocess exited with code {}\n", code));
        }
        tracing::debug!(code, "proc_exit");
        self.exit_code = Some(code);
    }

    /// Write out a held-back partial character, replaced with U+FFFD.
    /// Called by the host when the guest stops.
    pub fn flush(&mut self) {
        if !self.pending.is_empty() {
            let bytes = std::mem::take(&mut self.pending);
            self.sink.append(&String::from_utf8_lossy(&bytes));
        }
    }
}

/// Length of an unfinished UTF-8 sequence at the end of `bytes` (0 to 3).
fn incomplete_tail(bytes: &[u8]) -> usize {
    for back in 1..=bytes.len().min(3) {
        let byte = bytes[bytes.len() - back];
        if byte & 0xC0 == 0x80 {
            continue;
        }
        let width = match byte {
            0xC2..=0xDF => 2,
            0xE0..=0xEF => 3,
            0xF0..=0xF4 => 4,
            _ => return 0,
        };
        return if width > back { back } else { 0 };
    }
    0
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::input::{NoInput, ScriptedInput};

    const NWRITTEN: u32 = 0;
    const IOVS: u32 = 16;
    const DATA: u32 = 128;

    fn table_with(input: impl InputSource + 'static) -> (SyscallTable, OutputSink) {
        let sink = OutputSink::new();
        (SyscallTable::new(sink.clone(), Box::new(input)), sink)
    }

    /// Lay `chunks` out at DATA and point one IoVector at each.
    fn stage_iovs(mem: &mut [u8], chunks: &[&[u8]]) -> u32 {
        let mut at = DATA;
        for (i, chunk) in chunks.iter().enumerate() {
            mem.write_bytes(at, chunk).unwrap();
            let iov = IOVS + i as u32 * 8;
            mem.write_u32(iov, at).unwrap();
            mem.write_u32(iov + 4, chunk.len() as u32).unwrap();
            at += chunk.len() as u32;
        }
        chunks.len() as u32
    }

    #[test]
    fn test_fd_write_appends_in_order() {
        let (mut table, sink) = table_with(NoInput);
        let mut mem = vec![0u8; 512];

        let n = stage_iovs(&mut mem, &[b"hello", b", ", b"world\n"]);
        let status = table.fd_write(&mut mem[..], STDOUT, IOVS, n, NWRITTEN).unwrap();
        assert_eq!(status, 0);
        assert_eq!(mem.read_u32(NWRITTEN).unwrap(), 13);

        let n = stage_iovs(&mut mem, &[b"err"]);
        table.fd_write(&mut mem[..], STDERR, IOVS, n, NWRITTEN).unwrap();
        assert_eq!(sink.snapshot(), "hello, world\nerr");
    }

    #[test]
    fn test_fd_write_joins_split_characters() {
        let (mut table, sink) = table_with(NoInput);
        let mut mem = vec![0u8; 512];

        let n = stage_iovs(&mut mem, &[b"caf\xC3", b"\xA9\n"]);
        table.fd_write(&mut mem[..], STDOUT, IOVS, n, NWRITTEN).unwrap();
        assert_eq!(mem.read_u32(NWRITTEN).unwrap(), 6);
        assert_eq!(sink.snapshot(), "caf\u{e9}\n");

        // Split across calls: the lead bytes wait for the rest.
        let n = stage_iovs(&mut mem, &[b"\xE2\x82"]);
        table.fd_write(&mut mem[..], STDOUT, IOVS, n, NWRITTEN).unwrap();
        assert_eq!(mem.read_u32(NWRITTEN).unwrap(), 2);
        assert_eq!(sink.snapshot(), "caf\u{e9}\n");

        let n = stage_iovs(&mut mem, &[b"\xAC!"]);
        table.fd_write(&mut mem[..], STDERR, IOVS, n, NWRITTEN).unwrap();
        assert_eq!(sink.snapshot(), "caf\u{e9}\n\u{20ac}!");
    }

    #[test]
    fn test_flush_replaces_unfinished_character() {
        let (mut table, sink) = table_with(NoInput);
        let mut mem = vec![0u8; 512];

        let n = stage_iovs(&mut mem, &[b"ok\xF0\x9F"]);
        table.fd_write(&mut mem[..], STDOUT, IOVS, n, NWRITTEN).unwrap();
        assert_eq!(sink.snapshot(), "ok");
        table.flush();
        assert_eq!(sink.snapshot(), "ok\u{FFFD}");
        table.flush();
        assert_eq!(sink.snapshot(), "ok\u{FFFD}");
    }

    #[test]
    fn test_incomplete_tail() {
        assert_eq!(incomplete_tail(b""), 0);
        assert_eq!(incomplete_tail(b"abc"), 0);
        assert_eq!(incomplete_tail(b"caf\xC3"), 1);
        assert_eq!(incomplete_tail(b"caf\xC3\xA9"), 0);
        assert_eq!(incomplete_tail(b"\xE2\x82"), 2);
        assert_eq!(incomplete_tail(b"\xF0\x9F\x98"), 3);
        assert_eq!(incomplete_tail(b"\xF0\x9F\x98\x80"), 0);
        assert_eq!(incomplete_tail(b"x\xFF"), 0);
        assert_eq!(incomplete_tail(b"\x80\x80"), 0);
    }

    #[test]
    fn test_fd_write_rejects_other_descriptors() {
        let (mut table, sink) = table_with(NoInput);
        let mut mem = vec![0u8; 512];
        let n = stage_iovs(&mut mem, &[b"nope"]);
        mem.write_u32(NWRITTEN, 0xdead).unwrap();

        for fd in [0, 3, 4, 99, u32::MAX] {
            let status = table.fd_write(&mut mem[..], fd, IOVS, n, NWRITTEN).unwrap();
            assert!(status < 0, "fd {} should fail", fd);
        }
        assert!(sink.is_empty());
        assert_eq!(mem.read_u32(NWRITTEN).unwrap(), 0xdead);
    }

    #[test]
    fn test_fd_write_out_of_bounds_faults() {
        let (mut table, _sink) = table_with(NoInput);
        let mut mem = vec![0u8; 64];
        mem.write_u32(IOVS, 60).unwrap();
        mem.write_u32(IOVS + 4, 10).unwrap();
        assert!(table.fd_write(&mut mem[..], STDOUT, IOVS, 1, NWRITTEN).is_err());
    }

    #[test]
    fn test_fd_read_copies_line_with_newline() {
        let (mut table, _sink) = table_with(ScriptedInput::new(["abc"]));
        let mut mem = vec![0u8; 512];
        mem.write_u32(IOVS, DATA).unwrap();
        mem.write_u32(IOVS + 4, 64).unwrap();

        let status = table.fd_read(&mut mem[..], STDIN, IOVS, 1, NWRITTEN).unwrap();
        assert_eq!(status, 0);
        assert_eq!(mem.read_u32(NWRITTEN).unwrap(), 4);
        assert_eq!(&mem[DATA as usize..DATA as usize + 4], b"abc\n");
        assert_eq!(mem[DATA as usize + 4], 0, "no padding past the line");
    }

    #[test]
    fn test_fd_read_spans_io_vectors() {
        let (mut table, _sink) = table_with(ScriptedInput::new(["hello"]));
        let mut mem = vec![0u8; 512];
        mem.write_u32(IOVS, DATA).unwrap();
        mem.write_u32(IOVS + 4, 2).unwrap();
        mem.write_u32(IOVS + 8, DATA + 100).unwrap();
        mem.write_u32(IOVS + 12, 16).unwrap();

        table.fd_read(&mut mem[..], STDIN, IOVS, 2, NWRITTEN).unwrap();
        assert_eq!(mem.read_u32(NWRITTEN).unwrap(), 6);
        assert_eq!(&mem[DATA as usize..DATA as usize + 2], b"he");
        assert_eq!(&mem[DATA as usize + 100..DATA as usize + 104], b"llo\n");
    }

    #[test]
    fn test_fd_read_truncates_to_buffer() {
        let (mut table, _sink) = table_with(ScriptedInput::new(["too long", "next"]));
        let mut mem = vec![0u8; 512];
        mem.write_u32(IOVS, DATA).unwrap();
        mem.write_u32(IOVS + 4, 3).unwrap();

        table.fd_read(&mut mem[..], STDIN, IOVS, 1, NWRITTEN).unwrap();
        assert_eq!(mem.read_u32(NWRITTEN).unwrap(), 3);
        assert_eq!(&mem[DATA as usize..DATA as usize + 3], b"too");

        // the rest of the first line is gone; the next read gets a new line
        table.fd_read(&mut mem[..], STDIN, IOVS, 1, NWRITTEN).unwrap();
        assert_eq!(&mem[DATA as usize..DATA as usize + 3], b"nex");
    }

    #[test]
    fn test_fd_read_cancelled_is_empty_read() {
        let (mut table, _sink) = table_with(NoInput);
        let mut mem = vec![0u8; 512];
        mem.write_u32(NWRITTEN, 77).unwrap();
        mem.write_u32(IOVS, DATA).unwrap();
        mem.write_u32(IOVS + 4, 8).unwrap();

        let status = table.fd_read(&mut mem[..], STDIN, IOVS, 1, NWRITTEN).unwrap();
        assert_eq!(status, 0);
        assert_eq!(mem.read_u32(NWRITTEN).unwrap(), 0);
    }

    #[test]
    fn test_fd_read_other_descriptor() {
        let (mut table, _sink) = table_with(ScriptedInput::new(["unused"]));
        let mut mem = vec![0u8; 64];
        let status = table.fd_read(&mut mem[..], STDOUT, IOVS, 0, NWRITTEN).unwrap();
        assert_eq!(status, Errno::BadDescriptor.code());
    }

    #[test]
    fn test_clock_res_is_one_millisecond() {
        let (table, _sink) = table_with(NoInput);
        let mut mem = vec![0xffu8; 64];
        for id in [0, 1, 2, 3, 1234] {
            table.clock_res_get(&mut mem[..], id, 8).unwrap();
            assert_eq!(mem.read_u64(8).unwrap(), 1_000_000);
        }
    }

    #[test]
    fn test_clock_time_is_recent() {
        let (table, _sink) = table_with(NoInput);
        let mut mem = vec![0u8; 64];
        table.clock_time_get(&mut mem[..], 0, 1, 16).unwrap();
        let ns = mem.read_u64(16).unwrap();
        // after 2020-01-01
        assert!(ns > 1_577_836_800 * 1_000_000_000);
    }

    #[test]
    fn test_random_get_fills_exactly_len() {
        let (table, _sink) = table_with(NoInput);
        let mut mem = vec![0u8; 128];
        table.random_get(&mut mem[..], 32, 32).unwrap();
        let first = mem[32..64].to_vec();
        assert!(mem[..32].iter().all(|&b| b == 0));
        assert!(mem[64..].iter().all(|&b| b == 0));

        table.random_get(&mut mem[..], 32, 32).unwrap();
        assert_ne!(first, mem[32..64].to_vec());
    }

    #[test]
    fn test_fdstat_is_zeroed() {
        let (table, _sink) = table_with(NoInput);
        let mut mem = vec![0xaau8; 64];
        let status = table.fd_fdstat_get(&mut mem[..], 1, 8).unwrap();
        assert_eq!(status, 0);
        assert!(mem[8..32].iter().all(|&b| b == 0));
        assert_eq!(mem[32], 0xaa);
    }

    #[test]
    fn test_sizes_get_reports_nothing() {
        let (table, _sink) = table_with(NoInput);
        let mut mem = vec![0xffu8; 16];
        table.sizes_get(&mut mem[..], 0, 4).unwrap();
        assert_eq!(mem.read_u32(0).unwrap(), 0);
        assert_eq!(mem.read_u32(4).unwrap(), 0);
    }

    #[test]
    fn test_denial_codes() {
        let (table, _sink) = table_with(NoInput);
        assert_eq!(table.no_op(), 0);
        assert_eq!(table.list_get(), 0);
        assert_eq!(table.no_preopens(), 8);
        assert_eq!(table.no_such_descriptor(), 8);
        assert_eq!(table.no_filesystem(), 76);
        assert_eq!(table.not_implemented(), 52);
    }

    #[test]
    fn test_proc_exit_notice() {
        let (mut table, sink) = table_with(NoInput);
        table.proc_exit(0);
        assert!(sink.is_empty());
        assert_eq!(table.exit_code(), Some(0));

        table.proc_exit(3);
        assert!(sink.snapshot().contains("code 3"));
        assert_eq!(table.exit_code(), Some(3));
    }
}
