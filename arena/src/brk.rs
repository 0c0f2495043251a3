use core::ptr::NonNull;

use libc::c_void;

use crate::provider::ChunkProvider;

/// Grows the program break by one chunk per request.
///
/// Exhaustion is whatever the kernel decides: an `sbrk` failure maps to
/// `None` and the provider can be asked again later.
pub struct BrkArena {
    chunk_size: usize,
}

impl BrkArena {
    pub fn new(chunk_size: usize) -> BrkArena {
        assert!(chunk_size > 0, "chunk size must be non-zero");
        BrkArena { chunk_size }
    }
}

unsafe impl ChunkProvider for BrkArena {
    fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    fn request_chunk(&mut self) -> Option<NonNull<u8>> {
        // Safety: sbrk either extends the data segment by chunk_size bytes
        // and returns the old break, or fails with (void*)-1.
        let previous_break = unsafe { libc::sbrk(self.chunk_size as libc::intptr_t) };
        if previous_break == usize::MAX as *mut c_void {
            return None;
        }
        NonNull::new(previous_break as *mut u8)
    }
}
