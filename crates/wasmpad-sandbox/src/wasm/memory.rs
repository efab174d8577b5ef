//! Guest linear-memory marshalling.
//!
//! Every syscall handler reads its arguments and writes its results through
//! [`GuestMemory`]. The host side implements it for a plain byte slice, which
//! is what wasmtime hands out for the *current* memory view; handlers fetch a
//! fresh view on every call because `memory.grow` invalidates older ones.
//!
//! ## Layout
//!
//! All values are little-endian. An IoVector is 8 bytes:
//! ```text
//! [ptr: u32][len: u32]
//! ```
//! Addresses are trusted (the guest owns its address space), but an access
//! past the end of memory is reported as a [`MemoryFault`] so the host never
//! panics on malformed guest data.

use crate::error::MemoryFault;

/// Size in bytes of one encoded IoVector.
pub const IOVEC_SIZE: u32 = 8;

/// A guest-memory descriptor for one scatter/gather buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IoVector {
    /// Guest address of the buffer
    pub ptr: u32,
    /// Buffer length in bytes
    pub len: u32,
}

/// Byte-addressable view of a guest's linear memory.
pub trait GuestMemory {
    /// Borrow `len` bytes starting at `addr`.
    fn bytes(&self, addr: u32, len: u32) -> Result<&[u8], MemoryFault>;

    /// Mutably borrow `len` bytes starting at `addr`.
    fn bytes_mut(&mut self, addr: u32, len: u32) -> Result<&mut [u8], MemoryFault>;

    /// Copy `data` into memory at `addr`.
    fn write_bytes(&mut self, addr: u32, data: &[u8]) -> Result<(), MemoryFault> {
        let len = u32::try_from(data.len()).map_err(|_| MemoryFault {
            addr,
            len: data.len() as u64,
            size: 0,
        })?;
        self.bytes_mut(addr, len)?.copy_from_slice(data);
        Ok(())
    }

    /// Read a little-endian u32.
    fn read_u32(&self, addr: u32) -> Result<u32, MemoryFault> {
        let b = self.bytes(addr, 4)?;
        Ok(u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
    }

    /// Write a little-endian u32.
    fn write_u32(&mut self, addr: u32, value: u32) -> Result<(), MemoryFault> {
        self.write_bytes(addr, &value.to_le_bytes())
    }

    /// Read a little-endian u64.
    fn read_u64(&self, addr: u32) -> Result<u64, MemoryFault> {
        let b = self.bytes(addr, 8)?;
        let mut raw = [0u8; 8];
        raw.copy_from_slice(b);
        Ok(u64::from_le_bytes(raw))
    }

    /// Write a little-endian u64.
    fn write_u64(&mut self, addr: u32, value: u64) -> Result<(), MemoryFault> {
        self.write_bytes(addr, &value.to_le_bytes())
    }

    /// Read `count` IoVectors laid out contiguously from `base`.
    fn read_io_vectors(&self, base: u32, count: u32) -> Result<Vec<IoVector>, MemoryFault> {
        let mut iovs = Vec::with_capacity(count.min(1024) as usize);
        for i in 0..count {
            let at = iov_address(base, i)?;
            iovs.push(IoVector {
                ptr: self.read_u32(at)?,
                len: self.read_u32(offset(at, 4)?)?,
            });
        }
        Ok(iovs)
    }

    /// Decode UTF-8 text at `ptr`, replacing invalid sequences.
    fn decode_utf8(&self, ptr: u32, len: u32) -> Result<String, MemoryFault> {
        Ok(String::from_utf8_lossy(self.bytes(ptr, len)?).into_owned())
    }
}

/// Encode host text for copying into guest memory.
pub fn encode_utf8(text: &str) -> Vec<u8> {
    text.as_bytes().to_vec()
}

fn iov_address(base: u32, index: u32) -> Result<u32, MemoryFault> {
    index
        .checked_mul(IOVEC_SIZE)
        .and_then(|rel| base.checked_add(rel))
        .ok_or(MemoryFault {
            addr: base,
            len: u64::from(index) * u64::from(IOVEC_SIZE),
            size: 0,
        })
}

fn offset(addr: u32, by: u32) -> Result<u32, MemoryFault> {
    addr.checked_add(by).ok_or(MemoryFault {
        addr,
        len: u64::from(by),
        size: 0,
    })
}

fn span(addr: u32, len: u32, size: usize) -> Result<std::ops::Range<usize>, MemoryFault> {
    let start = addr as usize;
    start
        .checked_add(len as usize)
        .filter(|end| *end <= size)
        .map(|end| start..end)
        .ok_or(MemoryFault {
            addr,
            len: u64::from(len),
            size,
        })
}

impl GuestMemory for [u8] {
    fn bytes(&self, addr: u32, len: u32) -> Result<&[u8], MemoryFault> {
        let range = span(addr, len, self.len())?;
        Ok(&self[range])
    }

    fn bytes_mut(&mut self, addr: u32, len: u32) -> Result<&mut [u8], MemoryFault> {
        let range = span(addr, len, self.len())?;
        Ok(&mut self[range])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_u32_little_endian() {
        let mut mem = vec![0u8; 16];
        mem.write_u32(4, 0x0403_0201).unwrap();
        assert_eq!(&mem[4..8], &[1, 2, 3, 4]);
        assert_eq!(mem.read_u32(4).unwrap(), 0x0403_0201);
    }

    #[test]
    fn test_u64_little_endian() {
        let mut mem = vec![0u8; 16];
        mem.write_u64(8, 1_000_000).unwrap();
        assert_eq!(mem.read_u64(8).unwrap(), 1_000_000);
        assert_eq!(mem[8], 0x40);
        assert_eq!(mem[9], 0x42);
        assert_eq!(mem[10], 0x0f);
    }

    #[test]
    fn test_out_of_bounds_is_fault() {
        let mut mem = vec![0u8; 8];
        let fault = mem.read_u32(6).unwrap_err();
        assert_eq!(fault.addr, 6);
        assert_eq!(fault.size, 8);
        assert!(mem.write_u64(1, 7).is_err());
        assert!(mem.bytes(u32::MAX, 2).is_err());
    }

    #[test]
    fn test_read_io_vectors() {
        let mut mem = vec![0u8; 64];
        mem.write_u32(16, 100).unwrap();
        mem.write_u32(20, 5).unwrap();
        mem.write_u32(24, 200).unwrap();
        mem.write_u32(28, 7).unwrap();

        let iovs = mem.read_io_vectors(16, 2).unwrap();
        assert_eq!(
            iovs,
            vec![IoVector { ptr: 100, len: 5 }, IoVector { ptr: 200, len: 7 }]
        );
        assert!(mem.read_io_vectors(16, 0).unwrap().is_empty());
    }

    #[test]
    fn test_decode_utf8_is_permissive() {
        let mut mem = vec![0u8; 16];
        mem.write_bytes(0, &[b'h', 0xff, b'i']).unwrap();
        assert_eq!(mem.decode_utf8(0, 3).unwrap(), "h\u{fffd}i");
    }

    #[test]
    fn test_utf8_round_trip() {
        let text = "héllo, 世界";
        let mut mem = vec![0u8; 64];
        let bytes = encode_utf8(text);
        mem.write_bytes(10, &bytes).unwrap();
        assert_eq!(mem.decode_utf8(10, bytes.len() as u32).unwrap(), text);
    }
}
