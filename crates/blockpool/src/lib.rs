//! # blockpool
//!
//! A concurrent allocator for blocks of one fixed size.
//!
//! [`BlockPool`] pre-reserves large chunks of raw memory and hands out
//! same-sized blocks from a lock-free free list. Callers that create and
//! destroy many objects of the same size get lower, more predictable
//! allocation latency than a general-purpose allocator gives them.
//!
//! - Allocation and deallocation are a single CAS on the free-list head
//! - The pool grows by one chunk whenever the free list runs dry
//! - Chunks are released together when the pool is dropped
//!
//! ## Quick Start
//!
//! ```rust
//! use blockpool::BlockPool;
//!
//! let pool = BlockPool::new(16, 10)?;
//!
//! let block = pool.allocate()?;
//! // ... use the 16 bytes at `block` ...
//! unsafe { pool.deallocate(block) };
//! # Ok::<(), blockpool::PoolError>(())
//! ```
//!
//! For typed values, [`PoolBox`] wraps a block and returns it on drop.
//! Pools are passed to their users explicitly; there is no global pool.
//!
//! ## Features
//!
//! - `logging` (default): `tracing` events on construction, growth,
//!   ownership transfer and teardown. The allocate/deallocate hot path never
//!   logs.
//!
//! ## Architecture
//!
//! - [`error`]: standalone `thiserror` error type
//! - [`config`]: block geometry and debugging knobs
//! - [`source`]: where chunks come from ([`SystemSource`], [`TrackedSource`])
//! - [`pool`]: the free list and chunk growth
//! - [`pool_box`]: RAII handle for typed values
//! - [`stats`]: statistics snapshot

#![cfg_attr(docsrs, feature(doc_cfg))]
#![warn(rust_2018_idioms)]
#![warn(missing_docs)]
// The pool is raw-memory plumbing; every unsafe block carries a SAFETY note.
#![allow(unsafe_code)]
// #[must_use] on fns returning Result documents intent even if type is already must_use
#![allow(clippy::double_must_use)]
// Pointer alignment cast in the free list is guaranteed by block geometry
#![allow(clippy::cast_ptr_alignment)]

mod chunk;
pub mod config;
pub mod error;
pub mod pool;
pub mod pool_box;
pub mod source;
pub mod stats;
pub mod utils;

pub use crate::config::PoolConfig;
pub use crate::error::{PoolError, PoolResult};
pub use crate::pool::BlockPool;
pub use crate::pool_box::PoolBox;
pub use crate::source::{ChunkSource, SystemSource, TrackedSource};
pub use crate::stats::PoolStats;

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

// Public API exports
pub mod prelude {
    //! Convenient re-exports of commonly used types and traits.

    pub use crate::config::PoolConfig;
    pub use crate::error::{PoolError, PoolResult};
    pub use crate::pool::BlockPool;
    pub use crate::pool_box::PoolBox;
    pub use crate::source::{ChunkSource, SystemSource, TrackedSource};
    pub use crate::stats::PoolStats;
}
