//! Smart pointer for pool-allocated objects

use core::fmt;
use core::marker::PhantomData;
use core::mem;
use core::ops::{Deref, DerefMut};
use core::ptr::{self, NonNull};

use crate::error::{PoolError, PoolResult};
use crate::pool::BlockPool;
use crate::source::{ChunkSource, SystemSource};

/// RAII smart pointer for pool-allocated values
///
/// Automatically drops the value and returns its block to the pool when
/// dropped. Similar to `Box`, but backed by a [`BlockPool`] the caller hands
/// in, and unable to outlive it.
///
/// # Example
///
/// ```
/// use blockpool::{BlockPool, PoolBox};
///
/// struct Point {
///     x: i32,
///     y: i32,
/// }
///
/// let pool = BlockPool::for_type::<Point>(10)?;
/// let point = PoolBox::new_in(Point { x: 1, y: 2 }, &pool)?;
/// assert_eq!(point.x + point.y, 3);
/// # Ok::<(), blockpool::PoolError>(())
/// ```
pub struct PoolBox<'a, T, S: ChunkSource = SystemSource> {
    ptr: NonNull<T>,
    pool: &'a BlockPool<S>,
    _owns: PhantomData<T>,
}

impl<'a, T, S: ChunkSource> PoolBox<'a, T, S> {
    /// Moves `value` into a block allocated from `pool`
    ///
    /// # Errors
    /// - `InvalidLayout` if `T` is larger or more aligned than the pool's blocks
    /// - any error from [`BlockPool::allocate`]
    #[must_use = "allocated value must be used"]
    pub fn new_in(value: T, pool: &'a BlockPool<S>) -> PoolResult<Self> {
        if size_of::<T>() > pool.block_size() {
            return Err(PoolError::invalid_layout("value larger than pool block"));
        }
        if align_of::<T>() > pool.block_align() {
            return Err(PoolError::invalid_layout(
                "value alignment exceeds pool block alignment",
            ));
        }

        let ptr = pool.allocate()?.cast::<T>();

        // SAFETY: Initializing a freshly allocated block.
        // - the block is exclusively ours until deallocated
        // - size and alignment of T fit the block (checked above)
        // - write moves value in without reading the old contents
        unsafe { ptr.as_ptr().write(value) };

        Ok(Self {
            ptr,
            pool,
            _owns: PhantomData,
        })
    }

    /// Returns the pool the value lives in
    pub fn pool(&self) -> &'a BlockPool<S> {
        self.pool
    }

    /// Returns the address of the value's block
    pub fn as_ptr(&self) -> *const T {
        self.ptr.as_ptr()
    }

    /// Consumes the `PoolBox` and returns the contained value
    #[must_use]
    pub fn into_inner(self) -> T {
        let this = mem::ManuallyDrop::new(self);

        // SAFETY: Reading value from owned allocation.
        // - this.ptr points to an initialized T
        // - ManuallyDrop prevents Drop from dropping it a second time
        let value = unsafe { ptr::read(this.ptr.as_ptr()) };

        // SAFETY: The block came from this pool and is returned once.
        unsafe { this.pool.deallocate(this.ptr.cast()) };

        value
    }
}

impl<T, S: ChunkSource> Deref for PoolBox<'_, T, S> {
    type Target = T;

    fn deref(&self) -> &Self::Target {
        // SAFETY: ptr points to an initialized T owned by this box; the
        // shared borrow of self prevents mutation.
        unsafe { self.ptr.as_ref() }
    }
}

impl<T, S: ChunkSource> DerefMut for PoolBox<'_, T, S> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        // SAFETY: &mut self ensures exclusive access to the owned T.
        unsafe { self.ptr.as_mut() }
    }
}

impl<T: fmt::Debug, S: ChunkSource> fmt::Debug for PoolBox<'_, T, S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(&**self, f)
    }
}

impl<T, S: ChunkSource> Drop for PoolBox<'_, T, S> {
    fn drop(&mut self) {
        // SAFETY: Dropping value and returning memory to pool.
        // 1. drop_in_place runs T's destructor on the initialized value
        // 2. deallocate returns the block it was allocated from, once
        unsafe {
            ptr::drop_in_place(self.ptr.as_ptr());
            self.pool.deallocate(self.ptr.cast());
        }
    }
}

// SAFETY: PoolBox owns its T like Box does; the pool reference is Sync
// because BlockPool<S> is Sync.
unsafe impl<T: Send, S: ChunkSource> Send for PoolBox<'_, T, S> {}

// SAFETY: Shared access to PoolBox only hands out &T.
unsafe impl<T: Sync, S: ChunkSource> Sync for PoolBox<'_, T, S> {}

#[cfg(test)]
mod tests {
    use std::rc::Rc;

    use super::*;

    #[test]
    fn test_value_roundtrip() {
        let pool = BlockPool::for_type::<[u64; 3]>(4).unwrap();
        let mut boxed = PoolBox::new_in([1u64, 2, 3], &pool).unwrap();
        boxed[1] = 20;
        assert_eq!(*boxed, [1, 20, 3]);
        assert_eq!(pool.allocated_blocks(), 1);

        let value = boxed.into_inner();
        assert_eq!(value, [1, 20, 3]);
        assert_eq!(pool.allocated_blocks(), 0);
    }

    #[test]
    fn test_drop_runs_destructor_and_frees_block() {
        let marker = Rc::new(());
        let pool = BlockPool::for_type::<Rc<()>>(2).unwrap();
        {
            let _boxed = PoolBox::new_in(Rc::clone(&marker), &pool).unwrap();
            assert_eq!(Rc::strong_count(&marker), 2);
        }
        assert_eq!(Rc::strong_count(&marker), 1);
        assert_eq!(pool.free_blocks(), 2);
    }

    #[test]
    fn test_rejects_oversized_values() {
        let pool = BlockPool::new(8, 4).unwrap();
        let err = PoolBox::new_in([0u8; 64], &pool).unwrap_err();
        assert_eq!(err.code(), "POOL:ALLOC:LAYOUT");
    }

    #[test]
    fn test_rejects_overaligned_values() {
        #[repr(align(64))]
        struct Aligned(u8);

        let pool = BlockPool::new(64, 4).unwrap();
        assert!(PoolBox::new_in(Aligned(1), &pool).is_err());
    }
}
