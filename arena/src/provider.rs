use core::ptr::NonNull;

/// Source of fixed-size memory chunks.
///
/// A provider grants chunks one at a time and never reclaims them. The chunk
/// size is fixed for the provider's whole lifetime, so consumers may cache it
/// once and size every request against it.
///
/// # Safety
///
/// Implementations must guarantee that every granted chunk is exactly
/// [`chunk_size`](ChunkProvider::chunk_size) bytes, writable, disjoint from
/// every earlier grant, and valid for the rest of the program. The caller
/// takes exclusive ownership of a chunk at the moment it is granted.
pub unsafe trait ChunkProvider {
    /// Size in bytes of every chunk this provider grants.
    fn chunk_size(&self) -> usize;

    /// Grants one chunk, or `None` once the provider is exhausted.
    fn request_chunk(&mut self) -> Option<NonNull<u8>>;
}
