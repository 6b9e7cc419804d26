//! Splits large transfers into `MAX_CHUNK`-sized pieces and steps the
//! device-side address between them.

use crate::wire::{Mode, Tags, MAX_CHUNK};

/// One piece of a chunked transfer: `offset` into the caller's buffer and
/// the number of bytes this chunk covers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Chunk {
    pub offset: usize,
    pub len: usize,
}

/// Lazily splits a buffer of length `total` into `MAX_CHUNK`-sized pieces.
///
/// Offsets are strictly increasing and coverage is exact: the chunk lengths
/// sum to exactly `total`, and every chunk but possibly the last equals
/// `MAX_CHUNK`.
pub struct Chunker {
    total: usize,
    offset: usize,
}

impl Chunker {
    pub fn new(total: usize) -> Self {
        Self { total, offset: 0 }
    }
}

impl Iterator for Chunker {
    type Item = Chunk;

    fn next(&mut self) -> Option<Chunk> {
        if self.offset >= self.total {
            return None;
        }
        let len = (self.total - self.offset).min(MAX_CHUNK);
        let chunk = Chunk {
            offset: self.offset,
            len,
        };
        self.offset += len;
        Some(chunk)
    }
}

/// Advances a device-side address by one chunk of `chunk_len` bytes,
/// following the FEL/FES address-stepping rules.
///
/// DRAM targets (the `dram` tag, or any FEL-mode transfer) step by byte
/// length. Block-addressed FES targets step by 512-byte sectors, with a
/// sub-sector tail chunk still consuming one sector.
pub fn step_address(address: u32, chunk_len: usize, tags: Tags, mode: Mode) -> u32 {
    if tags.contains(Tags::DRAM) || mode == Mode::Fel {
        address.wrapping_add(chunk_len as u32)
    } else {
        let sectors = ((chunk_len / 512) as u32).max(1);
        address.wrapping_add(sectors)
    }
}
