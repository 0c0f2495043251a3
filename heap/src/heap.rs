//! Best-fit heap over provider-granted chunks.

use core::fmt;
use core::ptr::NonNull;

use arena::ChunkProvider;
use log::{debug, warn};

use crate::block::{BLOCK_OVERHEAD, BlockHandle, MIN_BLOCK_BYTES};
use crate::free_list::FreeList;

/// Failure modes of [`Heap::allocate`] and [`Heap::release`].
#[derive(Debug, PartialEq, Eq)]
pub enum AllocError {
    /// The request cannot fit in one chunk even with an empty heap.
    RequestTooLarge,
    /// No free block fits and the chunk provider is exhausted.
    OutOfMemory,
    /// A guard sentinel or the block header was overwritten; the heap was
    /// left untouched.
    GuardCorrupted,
}

impl fmt::Display for AllocError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let message = match self {
            AllocError::RequestTooLarge => "request exceeds a whole chunk",
            AllocError::OutOfMemory => "chunk provider exhausted",
            AllocError::GuardCorrupted => "guard sentinel corrupted",
        };
        f.write_str(message)
    }
}

/// Best-fit allocator handing out blocks carved from fixed-size chunks.
///
/// Chunks come from the provider one at a time and are never returned; all
/// bookkeeping lives inside the chunks themselves. The heap assumes one
/// logical caller and takes `&mut self` throughout.
pub struct Heap<P: ChunkProvider> {
    provider: P,
    free_list: FreeList,
    chunk_size: usize,
    chunks_obtained: usize,
    live_allocations: usize,
    allocated_bytes: usize,
}

impl<P: ChunkProvider> Heap<P> {
    /// Panics when the provider's chunks cannot hold even one minimal block.
    pub fn new(provider: P) -> Heap<P> {
        let chunk_size = provider.chunk_size();
        assert!(
            chunk_size > MIN_BLOCK_BYTES,
            "chunk size too small for a single block"
        );
        Heap {
            provider,
            free_list: FreeList::new(),
            chunk_size,
            chunks_obtained: 0,
            live_allocations: 0,
            allocated_bytes: 0,
        }
    }

    /// Hands out a block with room for `size` payload bytes.
    ///
    /// The smallest sufficient free block is used and split when the
    /// remainder is big enough to stand alone; otherwise a fresh chunk is
    /// requested. The returned pointer is valid until released and carries
    /// no alignment promise beyond the header boundary.
    pub fn allocate(&mut self, size: usize) -> Result<NonNull<u8>, AllocError> {
        let true_size = size
            .checked_add(BLOCK_OVERHEAD)
            .ok_or(AllocError::RequestTooLarge)?;
        if true_size > self.chunk_size {
            return Err(AllocError::RequestTooLarge);
        }

        if self.free_list.is_empty() {
            self.grow()?;
        }

        let block = match self.free_list.find_best_fit(true_size) {
            Some(best) => {
                self.free_list.split(best, true_size);
                best
            }
            None => self.carve_from_new_chunk(true_size)?,
        };

        block.seal(size);
        self.live_allocations += 1;
        self.allocated_bytes += size;
        Ok(block.payload())
    }

    /// Returns the payload at `ptr` to the heap, merging it with any
    /// physically adjacent free block.
    ///
    /// On `Err(GuardCorrupted)` nothing was modified and the block stays
    /// allocated.
    ///
    /// # Safety
    ///
    /// `ptr` must have been returned by [`Heap::allocate`] on this heap and
    /// not released since. Anything else is undefined behavior, bounded only
    /// by the guard checks, which may or may not catch it.
    pub unsafe fn release(&mut self, ptr: NonNull<u8>) -> Result<(), AllocError> {
        // Safety: ptr came from allocate, so the reverse computation lands
        // on the block header.
        let block = unsafe { BlockHandle::from_payload(ptr) };

        if !block.leading_guard_intact() {
            warn!("leading guard damaged at {:#x}", block.addr());
            return Err(AllocError::GuardCorrupted);
        }
        let total = block.total_size();
        // The largest block allocate can hand out is an unsplittable carve:
        // true_size plus a remainder of at most MIN_BLOCK_BYTES. A header
        // value outside that range was overwritten, and the trailing-guard
        // address it implies cannot be trusted enough to probe.
        if total < BLOCK_OVERHEAD || total > self.chunk_size + MIN_BLOCK_BYTES {
            warn!("header damaged at {:#x}: total size {}", block.addr(), total);
            return Err(AllocError::GuardCorrupted);
        }
        if !block.trailing_guard_intact() {
            warn!("trailing guard damaged at {:#x}", block.addr());
            return Err(AllocError::GuardCorrupted);
        }

        // Past this point the release always completes. Consuming the
        // leading guard makes an immediate second release fail its check.
        let released_bytes = block.requested_size();
        block.scrub_leading_guard();
        block.set_requested_size(0);

        self.coalesce(block);

        self.live_allocations -= 1;
        self.allocated_bytes -= released_bytes;
        Ok(())
    }

    /// Bytes sitting in free blocks.
    pub fn free_bytes(&self) -> usize {
        self.free_list.iter().map(|block| block.total_size()).sum()
    }

    pub fn free_block_count(&self) -> usize {
        self.free_list.iter().count()
    }

    pub fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    /// Chunks requested from the provider so far.
    pub fn chunks_obtained(&self) -> usize {
        self.chunks_obtained
    }

    pub fn live_allocations(&self) -> usize {
        self.live_allocations
    }

    /// Payload bytes currently handed out, as requested by callers.
    pub fn allocated_bytes(&self) -> usize {
        self.allocated_bytes
    }

    /// Installs one fresh chunk as the new head free block.
    fn grow(&mut self) -> Result<(), AllocError> {
        let chunk = self.request_chunk()?;
        // Safety: the provider granted chunk_size bytes at this address.
        let block = unsafe { BlockHandle::init(chunk.as_ptr() as usize, self.chunk_size) };
        self.free_list.push_front(block);
        Ok(())
    }

    /// Serves a request no free block can hold: the front of a fresh chunk
    /// goes to the caller and a viable remainder joins the list at the tail.
    fn carve_from_new_chunk(&mut self, true_size: usize) -> Result<BlockHandle, AllocError> {
        let chunk = self.request_chunk()?;
        let chunk_addr = chunk.as_ptr() as usize;
        let remainder_size = self.chunk_size - true_size;
        if remainder_size > MIN_BLOCK_BYTES {
            // Safety: the chunk spans true_size + remainder_size bytes.
            let block = unsafe { BlockHandle::init(chunk_addr, true_size) };
            // Safety: as above; the remainder starts right after the block.
            let remainder = unsafe { BlockHandle::init(chunk_addr + true_size, remainder_size) };
            self.free_list.push_back(remainder);
            Ok(block)
        } else {
            // Safety: the whole chunk goes to the caller.
            Ok(unsafe { BlockHandle::init(chunk_addr, self.chunk_size) })
        }
    }

    fn request_chunk(&mut self) -> Result<NonNull<u8>, AllocError> {
        match self.provider.request_chunk() {
            Some(chunk) => {
                self.chunks_obtained += 1;
                debug!(
                    "obtained chunk {} at {:#x}",
                    self.chunks_obtained,
                    chunk.as_ptr() as usize
                );
                Ok(chunk)
            }
            None => {
                warn!("chunk provider exhausted");
                Err(AllocError::OutOfMemory)
            }
        }
    }

    /// One scan resolves both possible adjacencies of the released block: a
    /// free block ending where it starts absorbs it, and a free block
    /// starting where it ends is absorbed. Both at once collapse three
    /// blocks into one. With no adjacency the block becomes the new head.
    fn coalesce(&mut self, block: BlockHandle) {
        let block_start = block.addr();
        let block_end = block.end_addr();

        // Block that absorbed the released bytes backward, if any.
        let mut absorbed_into: Option<BlockHandle> = None;
        // Set while the released block sits on the list in the place of a
        // forward neighbor it absorbed.
        let mut on_list = false;

        let mut cursor = self.free_list.head();
        while let Some(current) = cursor {
            cursor = current.next();
            if current == block {
                // After a forward merge the released block itself is on the
                // list; it cannot be its own neighbor.
                continue;
            }
            if current.end_addr() == block_start {
                // current sits flush before the released block.
                if on_list {
                    self.free_list.unlink(block);
                    on_list = false;
                }
                current.set_total_size(current.total_size() + block.total_size());
                block.clear_header();
                debug!("merged release into free block at {:#x}", current.addr());
                absorbed_into = Some(current);
            } else if current.addr() == block_end {
                // current sits flush after the released block.
                match absorbed_into {
                    Some(before) => {
                        before.set_total_size(before.total_size() + current.total_size());
                        self.free_list.unlink(current);
                        current.clear_header();
                        debug!("three-way merge into free block at {:#x}", before.addr());
                    }
                    None => {
                        block.set_total_size(block.total_size() + current.total_size());
                        self.free_list.replace(current, block);
                        current.clear_header();
                        debug!("merged free block at {:#x} into release", current.addr());
                        on_list = true;
                    }
                }
            }
        }

        if absorbed_into.is_none() && !on_list {
            self.free_list.push_front(block);
        }
    }
}
