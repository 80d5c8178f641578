//! Raw-memory chunks
//!
//! A chunk is one contiguous reservation carved into equally sized blocks:
//!
//! ```text
//! base                                              base + layout.size()
//!  [Block0][Block1][Block2] ... [Block(count - 1)]
//! ```
//!
//! A `Chunk` only records where its memory lives. It never frees itself:
//! the owning pool releases it through its chunk source, exactly once.

use core::alloc::Layout;
use core::ptr::{self, NonNull};

use crate::error::{PoolError, PoolResult};
use crate::source::ChunkSource;

/// One owned raw-memory reservation subdivided into blocks
#[derive(Debug)]
pub(crate) struct Chunk {
    base: NonNull<u8>,
    layout: Layout,
    block_size: usize,
    block_count: usize,
}

// SAFETY: Chunk is a plain record of an address range.
// - It holds no thread-affine state
// - The memory behind it is only touched through the pool's free list
//   protocol or by the caller a block was handed to
unsafe impl Send for Chunk {}

impl Chunk {
    /// Reserves a chunk of `block_count` blocks of `block_size` bytes.
    ///
    /// `block_size` must already be a multiple of `block_align`.
    pub(crate) fn reserve<S: ChunkSource>(
        source: &S,
        block_size: usize,
        block_align: usize,
        block_count: usize,
    ) -> PoolResult<Self> {
        debug_assert_eq!(block_size % block_align, 0);

        let size = block_size
            .checked_mul(block_count)
            .ok_or_else(|| PoolError::size_overflow("chunk size calculation"))?;
        let layout = Layout::from_size_align(size, block_align)
            .map_err(|_| PoolError::invalid_layout("chunk exceeds isize::MAX"))?;

        let base = source
            .reserve(layout)
            .ok_or_else(|| PoolError::allocation_failed_with_layout(layout))?;

        Ok(Self {
            base,
            layout,
            block_size,
            block_count,
        })
    }

    /// Chunk size in bytes
    pub(crate) fn bytes(&self) -> usize {
        self.layout.size()
    }

    /// Number of blocks in the chunk
    pub(crate) fn block_count(&self) -> usize {
        self.block_count
    }

    /// Address of block `index`
    pub(crate) fn block(&self, index: usize) -> NonNull<u8> {
        debug_assert!(index < self.block_count);
        // SAFETY: index < block_count, so the offset stays inside the
        // reservation of block_size * block_count bytes.
        unsafe { self.base.add(index * self.block_size) }
    }

    /// Checks if an address lies inside this chunk
    pub(crate) fn contains(&self, addr: usize) -> bool {
        let start = self.base.as_ptr() as usize;
        addr >= start && addr < start + self.layout.size()
    }

    /// Checks if an address is the first byte of one of this chunk's blocks
    pub(crate) fn is_block_start(&self, addr: usize) -> bool {
        self.contains(addr)
            && (addr - self.base.as_ptr() as usize).is_multiple_of(self.block_size)
    }

    /// Fills the whole chunk with a byte pattern
    ///
    /// Only called before any block of the chunk is published.
    pub(crate) fn fill(&self, pattern: u8) {
        // SAFETY: The chunk was just reserved and no block has been handed
        // out or linked yet, so this is the only access to its memory.
        unsafe { ptr::write_bytes(self.base.as_ptr(), pattern, self.layout.size()) };
    }

    /// Returns the memory to the source it was reserved from.
    ///
    /// # Safety
    /// - `source` must be the source this chunk was reserved from
    /// - no block of this chunk may be used afterwards
    pub(crate) unsafe fn release<S: ChunkSource>(self, source: &S) {
        // SAFETY: Caller contract; base and layout are the reservation's.
        unsafe { source.release(self.base, self.layout) };
    }
}
