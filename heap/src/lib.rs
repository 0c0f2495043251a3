//! Best-fit heap allocator over fixed-size chunks.
//!
//! Blocks live inside chunks granted by an [`arena::ChunkProvider`] and
//! carry their own header, guard sentinels, and free-list links. A release
//! merges the block with any physically adjacent free neighbor, so no two
//! adjacent free blocks ever survive a call.

#![cfg_attr(not(test), no_std)]

mod block;
mod free_list;
mod heap;

pub use crate::heap::{AllocError, Heap};
