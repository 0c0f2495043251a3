//! Block layout codec, the only module that touches block bytes.
//!
//! A block starts with a four-word header (total size, requested size, two
//! free-list links), followed by a u32 guard, the payload, and a second u32
//! guard in the block's final four bytes. Sizes are free-form byte counts,
//! so block starts land on arbitrary addresses; every access below goes
//! through unaligned reads and writes, and no reference into block memory
//! is ever created.

use core::ptr::NonNull;

/// Sentinel written on both sides of a live payload.
const GUARD: u32 = 0xB10C_CAFE;

const WORD: usize = size_of::<usize>();

pub(crate) const GUARD_SIZE: usize = size_of::<u32>();
pub(crate) const HEADER_SIZE: usize = 4 * WORD;

/// Bytes a block spends on bookkeeping: header plus both guards.
pub(crate) const BLOCK_OVERHEAD: usize = HEADER_SIZE + 2 * GUARD_SIZE;

/// Smallest viable block. A split only happens when the remainder strictly
/// exceeds this.
pub(crate) const MIN_BLOCK_BYTES: usize = BLOCK_OVERHEAD + 1;

const OFFSET_TOTAL: usize = 0;
const OFFSET_REQUESTED: usize = WORD;
const OFFSET_PREV: usize = 2 * WORD;
const OFFSET_NEXT: usize = 3 * WORD;

/// Address of a block's first header byte.
///
/// A handle is a plain number and holding one borrows nothing. Every handle
/// points at a block header inside chunk memory owned by the heap, which is
/// what makes the accessors sound: they only ever touch bytes of that block.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub(crate) struct BlockHandle(usize);

impl BlockHandle {
    /// Views the block header already present at `addr`.
    ///
    /// # Safety
    ///
    /// `addr` must be the first byte of a block header inside chunk memory
    /// owned by the caller's heap.
    pub(crate) unsafe fn at(addr: usize) -> BlockHandle {
        BlockHandle(addr)
    }

    /// Writes a fresh free-block header at `addr` covering `total_size`
    /// bytes and returns its handle.
    ///
    /// # Safety
    ///
    /// `addr..addr + total_size` must lie inside chunk memory owned by the
    /// caller, with `total_size` at least `BLOCK_OVERHEAD`.
    pub(crate) unsafe fn init(addr: usize, total_size: usize) -> BlockHandle {
        let block = BlockHandle(addr);
        block.set_total_size(total_size);
        block.set_requested_size(0);
        block.set_prev(None);
        block.set_next(None);
        block
    }

    /// Recovers the handle of the block whose payload starts at `payload`.
    ///
    /// # Safety
    ///
    /// `payload` must be a pointer obtained from [`BlockHandle::payload`] on
    /// a block of the caller's heap.
    pub(crate) unsafe fn from_payload(payload: NonNull<u8>) -> BlockHandle {
        // Safety: payload sits GUARD_SIZE + HEADER_SIZE bytes past the
        // header the caller vouches for.
        unsafe { BlockHandle::at(payload.as_ptr() as usize - GUARD_SIZE - HEADER_SIZE) }
    }

    pub(crate) fn addr(self) -> usize {
        self.0
    }

    /// First address past the block.
    pub(crate) fn end_addr(self) -> usize {
        self.0 + self.total_size()
    }

    pub(crate) fn total_size(self) -> usize {
        self.read_word(OFFSET_TOTAL)
    }

    pub(crate) fn set_total_size(self, total_size: usize) {
        self.write_word(OFFSET_TOTAL, total_size);
    }

    pub(crate) fn requested_size(self) -> usize {
        self.read_word(OFFSET_REQUESTED)
    }

    pub(crate) fn set_requested_size(self, requested_size: usize) {
        self.write_word(OFFSET_REQUESTED, requested_size);
    }

    pub(crate) fn prev(self) -> Option<BlockHandle> {
        match self.read_word(OFFSET_PREV) {
            0 => None,
            addr => Some(BlockHandle(addr)),
        }
    }

    pub(crate) fn set_prev(self, prev: Option<BlockHandle>) {
        self.write_word(OFFSET_PREV, prev.map_or(0, BlockHandle::addr));
    }

    pub(crate) fn next(self) -> Option<BlockHandle> {
        match self.read_word(OFFSET_NEXT) {
            0 => None,
            addr => Some(BlockHandle(addr)),
        }
    }

    pub(crate) fn set_next(self, next: Option<BlockHandle>) {
        self.write_word(OFFSET_NEXT, next.map_or(0, BlockHandle::addr));
    }

    /// Start of the caller-visible payload.
    pub(crate) fn payload(self) -> NonNull<u8> {
        // Safety: block addresses are never null, so neither is this.
        unsafe { NonNull::new_unchecked((self.0 + HEADER_SIZE + GUARD_SIZE) as *mut u8) }
    }

    /// Marks the block allocated: records the requested size and writes the
    /// guard before the payload and into the block's final four bytes.
    pub(crate) fn seal(self, requested_size: usize) {
        self.set_requested_size(requested_size);
        self.write_guard(HEADER_SIZE, GUARD);
        self.write_guard(self.total_size() - GUARD_SIZE, GUARD);
    }

    pub(crate) fn leading_guard_intact(self) -> bool {
        self.read_guard(HEADER_SIZE) == GUARD
    }

    pub(crate) fn trailing_guard_intact(self) -> bool {
        self.read_guard(self.total_size() - GUARD_SIZE) == GUARD
    }

    /// Consumes the leading guard so that a second release of the same
    /// payload fails its guard check.
    pub(crate) fn scrub_leading_guard(self) {
        self.write_guard(HEADER_SIZE, 0);
    }

    /// Zeroes the header of a block absorbed by a merge.
    pub(crate) fn clear_header(self) {
        self.set_total_size(0);
        self.set_requested_size(0);
        self.set_prev(None);
        self.set_next(None);
    }

    fn read_word(self, offset: usize) -> usize {
        // Safety: the handle invariant keeps offset inside this block's
        // header; unaligned access keeps arbitrary addresses defined.
        unsafe { ((self.0 + offset) as *const usize).read_unaligned() }
    }

    fn write_word(self, offset: usize, value: usize) {
        // Safety: as in read_word.
        unsafe { ((self.0 + offset) as *mut usize).write_unaligned(value) }
    }

    fn read_guard(self, offset: usize) -> u32 {
        // Safety: offset is HEADER_SIZE or total_size - GUARD_SIZE, both
        // inside the block.
        unsafe { ((self.0 + offset) as *const u32).read_unaligned() }
    }

    fn write_guard(self, offset: usize, value: u32) {
        // Safety: as in read_guard.
        unsafe { ((self.0 + offset) as *mut u32).write_unaligned(value) }
    }
}
