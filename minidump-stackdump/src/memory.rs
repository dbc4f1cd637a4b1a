// Copyright 2015 Ted Mielczarek. See the COPYRIGHT
// file at the top-level directory of this distribution.

//! Raw memory captured from a thread's stack.

use std::io;
use std::io::prelude::*;

use scroll::{Pread, LE};
use serde::{Deserialize, Serialize};

use crate::system_info::{Architecture, PointerWidth};

/// A region of memory from the process that produced the snapshot.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "RawMemoryRegion")]
pub struct MemoryRegion {
    /// The starting address of this range of memory.
    pub base_address: u64,
    /// The length of this range of memory.
    ///
    /// This may be larger than `bytes` if the capture was truncated.
    pub size: u64,
    /// The contents of the memory.
    pub bytes: Vec<u8>,
}

#[derive(Deserialize)]
struct RawMemoryRegion {
    base_address: u64,
    #[serde(default)]
    size: Option<u64>,
    bytes: Vec<u8>,
}

impl From<RawMemoryRegion> for MemoryRegion {
    fn from(raw: RawMemoryRegion) -> Self {
        let size = raw.size.unwrap_or(raw.bytes.len() as u64);
        MemoryRegion {
            base_address: raw.base_address,
            size,
            bytes: raw.bytes,
        }
    }
}

impl MemoryRegion {
    /// Create a region covering exactly `bytes`.
    pub fn new(base_address: u64, bytes: Vec<u8>) -> MemoryRegion {
        MemoryRegion {
            base_address,
            size: bytes.len() as u64,
            bytes,
        }
    }

    /// The address one past the end of the region, if it doesn't overflow.
    pub fn end_address(&self) -> Option<u64> {
        self.base_address.checked_add(self.size)
    }

    /// Read a little-endian `u32` at `addr`.
    ///
    /// Returns `None` if any byte of the value lies outside the captured bytes.
    pub fn get_u32_at_address(&self, addr: u64) -> Option<u32> {
        let start = addr.checked_sub(self.base_address)? as usize;
        self.bytes.pread_with::<u32>(start, LE).ok()
    }

    /// Read a little-endian `u64` at `addr`.
    pub fn get_u64_at_address(&self, addr: u64) -> Option<u64> {
        let start = addr.checked_sub(self.base_address)? as usize;
        self.bytes.pread_with::<u64>(start, LE).ok()
    }

    /// Read one stack slot of `arch`'s word size at `addr`.
    pub fn get_word_at_address(&self, addr: u64, arch: Architecture) -> Option<u64> {
        match arch.pointer_width() {
            PointerWidth::Bits32 => self.get_u32_at_address(addr).map(u64::from),
            PointerWidth::Bits64 => self.get_u64_at_address(addr),
        }
    }

    /// Write the contents of this `MemoryRegion` to `f` as a hex string.
    pub fn print_contents<T: Write>(&self, f: &mut T) -> io::Result<()> {
        const PARAGRAPH_SIZE: usize = 16;
        let mut offset = 0;
        for paragraph in self.bytes.chunks(PARAGRAPH_SIZE) {
            write!(f, "    {:08x}: ", offset)?;
            let mut byte_iter = paragraph.iter().fuse();
            for _ in 0..PARAGRAPH_SIZE {
                if let Some(byte) = byte_iter.next() {
                    write!(f, "{:02x} ", byte)?;
                } else {
                    write!(f, "   ")?;
                }
            }
            for &byte in paragraph.iter() {
                let ascii_char = if !(byte as char).is_ascii_control() {
                    byte as char
                } else {
                    '.'
                };
                write!(f, "{}", ascii_char)?;
            }
            writeln!(f)?;
            offset += PARAGRAPH_SIZE;
        }
        Ok(())
    }
}
