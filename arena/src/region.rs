use core::ptr::NonNull;

use crate::provider::ChunkProvider;

/// Hands out consecutive chunks carved from one caller-provided region.
///
/// The region never grows and a tail smaller than one chunk is trimmed away
/// at construction, so the provider exhausts after exactly
/// `len / chunk_size` grants.
pub struct RegionArena {
    chunk_size: usize,
    base: usize,
    cursor: usize,
    end: usize,
}

impl RegionArena {
    /// # Safety
    ///
    /// `base..base + len` must be writable memory that stays valid for the
    /// rest of the program and is reached through no other path once chunks
    /// have been granted from it.
    pub unsafe fn new(chunk_size: usize, base: usize, len: usize) -> RegionArena {
        assert!(chunk_size > 0, "chunk size must be non-zero");
        let usable = (len / chunk_size) * chunk_size;
        RegionArena {
            chunk_size,
            base,
            cursor: base,
            end: base + usable,
        }
    }

    pub fn granted_chunks(&self) -> usize {
        (self.cursor - self.base) / self.chunk_size
    }

    pub fn remaining_chunks(&self) -> usize {
        (self.end - self.cursor) / self.chunk_size
    }
}

unsafe impl ChunkProvider for RegionArena {
    fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    fn request_chunk(&mut self) -> Option<NonNull<u8>> {
        if self.remaining_chunks() == 0 {
            return None;
        }
        let chunk = self.cursor;
        self.cursor += self.chunk_size;
        NonNull::new(chunk as *mut u8)
    }
}
