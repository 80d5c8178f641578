//! Lock-free fixed-size block pool
//!
//! # Safety
//!
//! This module implements a thread-safe block pool using a lock-free free list:
//! - Fixed-size blocks carved out of one or more raw-memory chunks
//! - Atomic head pointer with CAS for thread-safe allocation/deallocation
//! - Free blocks store the next pointer in their first word (intrusive list)
//! - Chunk registration serialized by a mutex; growth is the only slow path
//!
//! ## Invariants
//!
//! - Every block is either on the free list exactly once or owned by exactly
//!   one caller
//! - Every block handed out lies inside exactly one registered chunk
//! - Chunks are released only in `Drop`, exactly once, through the source they
//!   were reserved from; blocks are never freed individually
//! - The free list is never walked at teardown
//!
//! ## Known limitation
//!
//! The stack is not protected against ABA: a thread that loaded `head` and
//! `head.next` can succeed its CAS after `head` was popped, reused, and pushed
//! back by other threads, installing a stale `next`. Chunks outlive every
//! block, so the stale read never touches released memory.

use core::fmt;
use core::mem;
use core::ptr::{self, NonNull};
use core::sync::atomic::{AtomicPtr, AtomicUsize, Ordering};

use parking_lot::Mutex;
#[cfg(feature = "logging")]
use tracing::{debug, trace};

use crate::chunk::Chunk;
use crate::config::PoolConfig;
use crate::error::{PoolError, PoolResult};
use crate::source::{ChunkSource, SystemSource};
use crate::stats::PoolStats;
use crate::utils::{Backoff, atomic_max};

/// Node in the free list
///
/// When a block is free, its first word stores a pointer to the next free
/// block, forming a linked list.
#[repr(C)]
struct FreeBlock {
    next: *mut FreeBlock,
}

/// Concurrent pool of fixed-size blocks
///
/// Blocks are served from a lock-free free list. When the list is observed
/// empty the pool reserves another chunk of `block_count` blocks from its
/// [`ChunkSource`] and retries. Chunks are kept until the pool is dropped.
///
/// # Memory Layout
/// ```text
/// chunk 0: [Block0][Block1][Block2]...[BlockN]
/// chunk 1: [Block0][Block1][Block2]...[BlockN]
///
/// free_head → [free] → [free] → [free] → null
/// ```
///
/// The pool is move-only. Moving it moves ownership of every chunk; use
/// [`BlockPool::take`] to transfer out of a pool held by reference.
pub struct BlockPool<S: ChunkSource = SystemSource> {
    /// Head of the free list
    free_head: AtomicPtr<FreeBlock>,

    /// Count of free blocks; incremented before a block is published and
    /// decremented after it is detached, so it never underflows
    free_count: AtomicUsize,

    /// Owned chunks; the lock also serializes growth
    chunks: Mutex<Vec<Chunk>>,

    /// Mirror of `chunks.len()` readable without the lock
    chunk_count: AtomicUsize,

    /// Size of each block (pointer-width minimum, alignment-rounded)
    block_size: usize,

    /// Alignment of each block
    block_align: usize,

    /// Blocks per chunk; zero once ownership was transferred away
    block_count: usize,

    config: PoolConfig,
    source: S,

    /// Statistics (only tracked if enabled)
    total_allocs: AtomicUsize,
    total_deallocs: AtomicUsize,
    peak_in_use: AtomicUsize,
}

impl BlockPool {
    /// Creates a pool of `block_count`-block chunks with default configuration
    ///
    /// `block_size` is raised to at least pointer width. One chunk is
    /// reserved before this returns.
    ///
    /// # Errors
    /// - `InvalidConfig` if either argument is zero
    /// - `AllocationFailed` if the first chunk cannot be reserved
    pub fn new(block_size: usize, block_count: usize) -> PoolResult<Self> {
        Self::with_config(PoolConfig::new(block_size, block_count))
    }

    /// Creates a pool with custom configuration
    pub fn with_config(config: PoolConfig) -> PoolResult<Self> {
        Self::with_source(config, SystemSource)
    }

    /// Creates a pool sized and aligned for values of type `T`
    pub fn for_type<T>(block_count: usize) -> PoolResult<Self> {
        Self::with_config(Self::config_for::<T>(block_count))
    }

    /// Creates a production pool for values of type `T`
    pub fn production_for_type<T>(block_count: usize) -> PoolResult<Self> {
        let config = Self::config_for::<T>(block_count);
        Self::with_config(PoolConfig {
            track_stats: false,
            alloc_pattern: None,
            dealloc_pattern: None,
            ..config
        })
    }

    fn config_for<T>(block_count: usize) -> PoolConfig {
        // Zero-sized types still need room for the link word.
        PoolConfig::new(size_of::<T>().max(1), block_count)
            .with_block_align(align_of::<T>())
    }
}

impl<S: ChunkSource> BlockPool<S> {
    /// Creates a pool that reserves its chunks from `source`
    pub fn with_source(config: PoolConfig, source: S) -> PoolResult<Self> {
        let block_size = config.effective_block_size()?;
        // Reject geometries whose chunk size overflows before touching memory.
        config.chunk_bytes()?;

        let pool = Self {
            free_head: AtomicPtr::new(ptr::null_mut()),
            free_count: AtomicUsize::new(0),
            chunks: Mutex::new(Vec::new()),
            chunk_count: AtomicUsize::new(0),
            block_size,
            block_align: config.effective_block_align(),
            block_count: config.block_count,
            config,
            source,
            total_allocs: AtomicUsize::new(0),
            total_deallocs: AtomicUsize::new(0),
            peak_in_use: AtomicUsize::new(0),
        };

        pool.grow()?;

        #[cfg(feature = "logging")]
        debug!(
            block_size = pool.block_size,
            block_align = pool.block_align,
            block_count = pool.block_count,
            "block pool created"
        );

        Ok(pool)
    }

    /// Returns the size of each block
    pub fn block_size(&self) -> usize {
        self.block_size
    }

    /// Returns the alignment of each block
    pub fn block_align(&self) -> usize {
        self.block_align
    }

    /// Returns the number of blocks per chunk
    pub fn block_count(&self) -> usize {
        self.block_count
    }

    /// Returns the configuration the pool was created with
    pub fn config(&self) -> &PoolConfig {
        &self.config
    }

    /// Returns the chunk source
    pub fn source(&self) -> &S {
        &self.source
    }

    /// Returns the number of chunks currently owned
    pub fn chunk_count(&self) -> usize {
        self.chunk_count.load(Ordering::Acquire)
    }

    /// Returns the number of blocks across all owned chunks
    pub fn capacity(&self) -> usize {
        self.chunk_count() * self.block_count
    }

    /// Returns the number of free blocks (atomic estimate, exact in absence of races)
    pub fn free_blocks(&self) -> usize {
        self.free_count.load(Ordering::Relaxed)
    }

    /// Returns the number of blocks handed out
    pub fn allocated_blocks(&self) -> usize {
        self.capacity().saturating_sub(self.free_blocks())
    }

    /// Checks if an address lies inside one of the owned chunks
    pub fn owns(&self, ptr: *const u8) -> bool {
        let addr = ptr as usize;
        self.chunks.lock().iter().any(|chunk| chunk.contains(addr))
    }

    /// Checks if an address is the start of a block of this pool
    fn is_block(&self, ptr: *const u8) -> bool {
        let addr = ptr as usize;
        self.chunks
            .lock()
            .iter()
            .any(|chunk| chunk.is_block_start(addr))
    }

    /// Allocates one block
    ///
    /// The returned block is `block_size` bytes, aligned to `block_align`,
    /// and exclusively owned by the caller until passed to
    /// [`deallocate`](Self::deallocate). Its contents are unspecified.
    ///
    /// # Errors
    /// - `AllocationFailed` if the free list is empty and a new chunk cannot
    ///   be reserved; the pool stays usable
    /// - `Detached` if this pool's chunks were moved out with [`take`](Self::take)
    pub fn allocate(&self) -> PoolResult<NonNull<u8>> {
        loop {
            if let Some(block) = self.pop() {
                if self.config.track_stats {
                    self.total_allocs.fetch_add(1, Ordering::Relaxed);
                    atomic_max(&self.peak_in_use, self.allocated_blocks());
                }
                return Ok(block);
            }
            self.grow()?;
        }
    }

    /// Returns a block to the pool
    ///
    /// # Safety
    ///
    /// Caller must ensure:
    /// - `block` was returned by [`allocate`](Self::allocate) on this pool
    /// - `block` has not been deallocated since
    /// - nothing reads or writes the block afterwards
    ///
    /// Builds with debug assertions check that `block` is a block start
    /// inside an owned chunk.
    pub unsafe fn deallocate(&self, block: NonNull<u8>) {
        debug_assert!(
            self.is_block(block.as_ptr()),
            "deallocated pointer {block:p} is not a block of this pool"
        );

        if let Some(pattern) = self.config.dealloc_pattern {
            // SAFETY: Writing debug pattern to block being deallocated.
            // - Caller guarantees the block is ours and exclusively owned
            // - The block is block_size bytes
            // - The link word is written after this, inside push
            unsafe { ptr::write_bytes(block.as_ptr(), pattern, self.block_size) };
        }

        self.push(block);

        if self.config.track_stats {
            self.total_deallocs.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Detaches the head of the free list
    #[inline]
    fn pop(&self) -> Option<NonNull<u8>> {
        let mut backoff = self.config.use_backoff.then(Backoff::new);
        let mut head = self.free_head.load(Ordering::Acquire);

        loop {
            let block = NonNull::new(head)?;

            // SAFETY: Reading next pointer from the free list head.
            // - head is non-null and points into an owned chunk
            // - chunks are never released while the pool is alive
            // - Acquire load pairs with the Release CAS in push, so the
            //   link written before publication is visible
            let next = unsafe { (*head).next };

            match self.free_head.compare_exchange_weak(
                head,
                next,
                Ordering::Acquire,
                Ordering::Acquire,
            ) {
                Ok(_) => {
                    self.free_count.fetch_sub(1, Ordering::Relaxed);
                    return Some(block.cast());
                }
                Err(current) => {
                    head = current;
                    if let Some(b) = backoff.as_mut() {
                        b.spin();
                    }
                }
            }
        }
    }

    /// Publishes a block on the free list
    ///
    /// Shared by [`deallocate`](Self::deallocate) and chunk growth.
    #[inline]
    fn push(&self, block: NonNull<u8>) {
        let node = block.as_ptr().cast::<FreeBlock>();
        let mut backoff = self.config.use_backoff.then(Backoff::new);

        self.free_count.fetch_add(1, Ordering::Relaxed);
        let mut head = self.free_head.load(Ordering::Acquire);

        loop {
            // SAFETY: Writing next pointer into the block being published.
            // - block is pointer-aligned and at least pointer-width (config)
            // - the block is owned by this thread until the CAS succeeds
            unsafe { (*node).next = head };

            match self.free_head.compare_exchange_weak(
                head,
                node,
                Ordering::Release,
                Ordering::Acquire,
            ) {
                Ok(_) => return,
                Err(current) => {
                    head = current;
                    if let Some(b) = backoff.as_mut() {
                        b.spin();
                    }
                }
            }
        }
    }

    /// Reserves one more chunk and publishes its blocks
    ///
    /// Holds the chunk lock for the whole operation. A thread that loses the
    /// race for the lock re-checks the free list and returns without
    /// reserving if another thread already refilled it.
    #[cold]
    fn grow(&self) -> PoolResult<()> {
        let mut chunks = self.chunks.lock();

        if self.block_count == 0 {
            return Err(PoolError::detached());
        }

        if !self.free_head.load(Ordering::Acquire).is_null() {
            #[cfg(feature = "logging")]
            trace!("free list refilled while waiting to grow");
            return Ok(());
        }

        // Registration must not fail once blocks are published.
        chunks.try_reserve(1).map_err(|_| {
            PoolError::allocation_failed(size_of::<Chunk>(), align_of::<Chunk>())
        })?;

        let chunk = Chunk::reserve(
            &self.source,
            self.block_size,
            self.block_align,
            self.block_count,
        )?;

        if let Some(pattern) = self.config.alloc_pattern {
            chunk.fill(pattern);
        }

        for index in 0..chunk.block_count() {
            self.push(chunk.block(index));
        }

        #[cfg(feature = "logging")]
        debug!(
            chunk = chunks.len(),
            block_size = self.block_size,
            block_count = self.block_count,
            bytes = chunk.bytes(),
            "reserved pool chunk"
        );

        chunks.push(chunk);
        self.chunk_count.store(chunks.len(), Ordering::Release);
        Ok(())
    }

    /// Counts the blocks reachable from the free list
    ///
    /// Exclusive access guarantees no concurrent push or pop.
    pub fn free_list_len(&mut self) -> usize {
        let mut len = 0;
        let mut node = *self.free_head.get_mut();
        while !node.is_null() {
            len += 1;
            // SAFETY: &mut self excludes concurrent mutation; every node on
            // the list is a free block inside an owned chunk.
            node = unsafe { (*node).next };
        }
        len
    }

    /// Moves all chunks and the free list into a new pool
    ///
    /// `self` is left empty: it owns no chunks, its free list is empty, and
    /// allocating from it fails with [`PoolError::Detached`]. Dropping it
    /// releases nothing. Deallocating into it is undefined behaviour.
    pub fn take(&mut self) -> Self
    where
        S: Clone,
    {
        let chunks = mem::take(self.chunks.get_mut());
        let chunk_count = mem::take(self.chunk_count.get_mut());
        let free_head = mem::replace(self.free_head.get_mut(), ptr::null_mut());
        let free_count = mem::take(self.free_count.get_mut());

        #[cfg(feature = "logging")]
        debug!(chunks = chunks.len(), "transferring pool ownership");

        let taken = Self {
            free_head: AtomicPtr::new(free_head),
            free_count: AtomicUsize::new(free_count),
            chunks: Mutex::new(chunks),
            chunk_count: AtomicUsize::new(chunk_count),
            block_size: self.block_size,
            block_align: self.block_align,
            block_count: self.block_count,
            config: self.config.clone(),
            source: self.source.clone(),
            total_allocs: AtomicUsize::new(mem::take(self.total_allocs.get_mut())),
            total_deallocs: AtomicUsize::new(mem::take(self.total_deallocs.get_mut())),
            peak_in_use: AtomicUsize::new(mem::take(self.peak_in_use.get_mut())),
        };

        self.block_count = 0;
        taken
    }

    /// Get statistics (if tracking is enabled)
    pub fn stats(&self) -> Option<PoolStats> {
        if !self.config.track_stats {
            return None;
        }

        Some(PoolStats {
            total_allocs: self.total_allocs.load(Ordering::Relaxed),
            total_deallocs: self.total_deallocs.load(Ordering::Relaxed),
            peak_in_use: self.peak_in_use.load(Ordering::Relaxed),
            in_use: self.allocated_blocks(),
            free_blocks: self.free_blocks(),
            block_size: self.block_size,
            block_count: self.block_count,
            chunk_count: self.chunk_count(),
        })
    }
}

impl<S: ChunkSource> Drop for BlockPool<S> {
    fn drop(&mut self) {
        let chunks = mem::take(self.chunks.get_mut());
        *self.chunk_count.get_mut() = 0;
        *self.free_head.get_mut() = ptr::null_mut();

        #[cfg(feature = "logging")]
        {
            if !chunks.is_empty() {
                debug!(chunks = chunks.len(), "releasing pool chunks");
            }
        }

        for chunk in chunks {
            // SAFETY: Releasing a chunk at teardown.
            // - it was reserved from self.source in grow
            // - mem::take removed it from the registry, so it is released once
            // - &mut self in drop means no block can be allocated afterwards
            unsafe { chunk.release(&self.source) };
        }
    }
}

impl<S: ChunkSource> fmt::Debug for BlockPool<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BlockPool")
            .field("block_size", &self.block_size)
            .field("block_align", &self.block_align)
            .field("block_count", &self.block_count)
            .field("chunk_count", &self.chunk_count())
            .field("free_blocks", &self.free_blocks())
            .finish()
    }
}
