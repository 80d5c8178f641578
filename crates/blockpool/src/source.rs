//! Chunk sources
//!
//! A [`ChunkSource`] is where a pool reserves its chunks from and where it
//! releases them at teardown. [`SystemSource`] delegates to the platform
//! allocator; [`TrackedSource`] wraps any source and counts what passes
//! through it.
//!
//! # Safety
//!
//! Implementations hand out raw memory that the pool subdivides and writes
//! free-list links into. The trait is `unsafe` because the pool trusts every
//! returned pointer to be valid for `layout` until it is released.

use core::alloc::{GlobalAlloc, Layout};
use core::ptr::NonNull;
use core::sync::atomic::{AtomicUsize, Ordering};
use std::alloc::System;

use crate::utils::atomic_max;

/// Backing store for pool chunks
///
/// # Safety
///
/// Implementors must ensure that:
/// - a pointer returned by `reserve` is valid for reads and writes of
///   `layout.size()` bytes and aligned to `layout.align()`
/// - the memory stays valid until `release` is called with the same layout
/// - `release` accepts every pointer previously returned by `reserve`
pub unsafe trait ChunkSource: Send + Sync {
    /// Reserves one chunk, or `None` if the memory is not available.
    fn reserve(&self, layout: Layout) -> Option<NonNull<u8>>;

    /// Releases a chunk.
    ///
    /// # Safety
    /// - `ptr` must come from `reserve` on this source with the same `layout`
    /// - each reserved chunk must be released at most once
    unsafe fn release(&self, ptr: NonNull<u8>, layout: Layout);
}

/// Chunk source backed by the platform allocator
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemSource;

impl SystemSource {
    /// Creates a new `SystemSource`
    #[inline]
    pub const fn new() -> Self {
        Self
    }
}

// SAFETY: Forwards to `std::alloc::System`.
// - Pool layouts always have non-zero size (validated config)
// - System returns null or a block valid for the layout
// - Releases use the layout the chunk was reserved with
unsafe impl ChunkSource for SystemSource {
    #[inline]
    fn reserve(&self, layout: Layout) -> Option<NonNull<u8>> {
        debug_assert!(layout.size() > 0);
        // SAFETY: layout has non-zero size (pool configuration is validated).
        NonNull::new(unsafe { System.alloc(layout) })
    }

    #[inline]
    unsafe fn release(&self, ptr: NonNull<u8>, layout: Layout) {
        // SAFETY: Caller guarantees ptr came from `reserve` with this layout.
        unsafe { System.dealloc(ptr.as_ptr(), layout) };
    }
}

/// A wrapper source that tracks chunk reservations
///
/// Acts as a transparent wrapper around any other source, counting
/// reservations, releases and live bytes. Counters use relaxed atomics:
/// they are exact once the pool is quiescent.
#[derive(Debug, Default)]
pub struct TrackedSource<S = SystemSource> {
    inner: S,
    reserved: AtomicUsize,
    released: AtomicUsize,
    failed: AtomicUsize,
    live_bytes: AtomicUsize,
    peak_bytes: AtomicUsize,
}

impl<S> TrackedSource<S> {
    /// Creates a new `TrackedSource` wrapping the provided source
    pub const fn new(inner: S) -> Self {
        Self {
            inner,
            reserved: AtomicUsize::new(0),
            released: AtomicUsize::new(0),
            failed: AtomicUsize::new(0),
            live_bytes: AtomicUsize::new(0),
            peak_bytes: AtomicUsize::new(0),
        }
    }

    /// Gets a reference to the underlying source
    pub fn inner(&self) -> &S {
        &self.inner
    }

    /// Number of chunks reserved so far
    pub fn reserved_chunks(&self) -> usize {
        self.reserved.load(Ordering::Relaxed)
    }

    /// Number of chunks released so far
    pub fn released_chunks(&self) -> usize {
        self.released.load(Ordering::Relaxed)
    }

    /// Number of reservations the inner source refused
    pub fn failed_reservations(&self) -> usize {
        self.failed.load(Ordering::Relaxed)
    }

    /// Chunks reserved and not yet released
    pub fn live_chunks(&self) -> usize {
        self.reserved_chunks()
            .saturating_sub(self.released_chunks())
    }

    /// Bytes reserved and not yet released
    pub fn live_bytes(&self) -> usize {
        self.live_bytes.load(Ordering::Relaxed)
    }

    /// Highest value `live_bytes` has reached
    pub fn peak_bytes(&self) -> usize {
        self.peak_bytes.load(Ordering::Relaxed)
    }

    /// Check if any reserved chunk is still outstanding
    pub fn has_leaks(&self) -> bool {
        self.live_chunks() > 0
    }
}

// SAFETY: TrackedSource forwards every call to the inner source unchanged.
// - Pointers and layouts pass through untouched
// - Counters are side bookkeeping only
unsafe impl<S: ChunkSource> ChunkSource for TrackedSource<S> {
    fn reserve(&self, layout: Layout) -> Option<NonNull<u8>> {
        let Some(ptr) = self.inner.reserve(layout) else {
            self.failed.fetch_add(1, Ordering::Relaxed);
            return None;
        };
        self.reserved.fetch_add(1, Ordering::Relaxed);
        let live = self.live_bytes.fetch_add(layout.size(), Ordering::Relaxed) + layout.size();
        atomic_max(&self.peak_bytes, live);
        Some(ptr)
    }

    unsafe fn release(&self, ptr: NonNull<u8>, layout: Layout) {
        self.released.fetch_add(1, Ordering::Relaxed);
        self.live_bytes.fetch_sub(layout.size(), Ordering::Relaxed);
        // SAFETY: Forwarded caller contract.
        unsafe { self.inner.release(ptr, layout) };
    }
}

// SAFETY: A shared reference to a source is itself a source.
// - Same pointers, same layouts, same validity guarantees
unsafe impl<S: ChunkSource + ?Sized> ChunkSource for &S {
    fn reserve(&self, layout: Layout) -> Option<NonNull<u8>> {
        (**self).reserve(layout)
    }

    unsafe fn release(&self, ptr: NonNull<u8>, layout: Layout) {
        // SAFETY: Forwarded caller contract.
        unsafe { (**self).release(ptr, layout) };
    }
}

// SAFETY: Same forwarding argument as for `&S`.
unsafe impl<S: ChunkSource + ?Sized> ChunkSource for std::sync::Arc<S> {
    fn reserve(&self, layout: Layout) -> Option<NonNull<u8>> {
        (**self).reserve(layout)
    }

    unsafe fn release(&self, ptr: NonNull<u8>, layout: Layout) {
        // SAFETY: Forwarded caller contract.
        unsafe { (**self).release(ptr, layout) };
    }
}
