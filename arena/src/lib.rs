//! Fixed-size chunk sources for the heap.
//!
//! A [`ChunkProvider`] grants raw memory one chunk at a time and never takes
//! it back. [`RegionArena`] carves chunks out of one caller-provided region;
//! [`BrkArena`] grows the program break.

#![cfg_attr(not(test), no_std)]

pub mod provider;
pub mod region;

#[cfg(unix)]
pub mod brk;

pub use crate::provider::ChunkProvider;
pub use crate::region::RegionArena;

#[cfg(unix)]
pub use crate::brk::BrkArena;
