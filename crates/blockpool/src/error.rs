//! Error types for blockpool
//!
//! Uses thiserror for clean, idiomatic Rust error definitions.
//!
//! Misuse of the pool (double deallocation, deallocating a foreign block,
//! deallocating into an emptied pool) is undefined behaviour rather than an
//! error variant: the hot path performs no validation.

use core::alloc::Layout;
use thiserror::Error;

#[cfg(feature = "logging")]
use tracing::{error, warn};

// ============================================================================
// Main Error Type
// ============================================================================

/// Block pool errors
#[must_use = "errors should be handled"]
#[non_exhaustive]
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PoolError {
    /// The chunk source could not satisfy a chunk reservation.
    #[error("chunk allocation failed: {size} bytes with {align} byte alignment")]
    AllocationFailed {
        /// Requested chunk size in bytes
        size: usize,
        /// Requested chunk alignment
        align: usize,
    },

    /// The pool configuration was rejected.
    #[error("invalid pool configuration: {reason}")]
    InvalidConfig {
        /// What was rejected
        reason: String,
    },

    /// A size computation overflowed `usize`.
    #[error("size overflow during operation: {operation}")]
    SizeOverflow {
        /// Computation that overflowed
        operation: String,
    },

    /// A layout did not fit the pool.
    #[error("invalid memory layout: {reason}")]
    InvalidLayout {
        /// What did not fit
        reason: String,
    },

    /// The pool's chunks were transferred to another pool.
    #[error("pool ownership was transferred; it holds no chunks")]
    Detached,
}

impl PoolError {
    /// Check if the operation may succeed when retried later.
    ///
    /// Only chunk allocation failures qualify: the pool stays valid and a
    /// later grow can succeed once memory is available again.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::AllocationFailed { .. })
    }

    /// Get error code for categorization
    #[must_use]
    pub fn code(&self) -> &'static str {
        match self {
            Self::AllocationFailed { .. } => "POOL:ALLOC:FAILED",
            Self::InvalidConfig { .. } => "POOL:CONFIG:INVALID",
            Self::SizeOverflow { .. } => "POOL:ALLOC:OVERFLOW",
            Self::InvalidLayout { .. } => "POOL:ALLOC:LAYOUT",
            Self::Detached => "POOL:STATE:DETACHED",
        }
    }

    // ============================================================================
    // Convenience Constructors
    // ============================================================================

    /// Create allocation failed error
    pub fn allocation_failed(size: usize, align: usize) -> Self {
        #[cfg(feature = "logging")]
        error!(size, align, "chunk allocation failed");

        Self::AllocationFailed { size, align }
    }

    /// Create allocation failed error from layout
    pub fn allocation_failed_with_layout(layout: Layout) -> Self {
        Self::allocation_failed(layout.size(), layout.align())
    }

    /// Create invalid config error
    pub fn invalid_config(reason: &str) -> Self {
        Self::InvalidConfig {
            reason: reason.to_string(),
        }
    }

    /// Create size overflow error
    pub fn size_overflow(operation: &str) -> Self {
        Self::SizeOverflow {
            operation: operation.to_string(),
        }
    }

    /// Create invalid layout error
    pub fn invalid_layout(reason: &str) -> Self {
        Self::InvalidLayout {
            reason: reason.to_string(),
        }
    }

    /// Create detached pool error
    pub fn detached() -> Self {
        #[cfg(feature = "logging")]
        warn!("allocation attempted on a pool whose chunks were transferred");

        Self::Detached
    }
}

// ============================================================================
// Result Types
// ============================================================================

/// Result type for pool operations
pub type PoolResult<T> = core::result::Result<T, PoolError>;

// ============================================================================
// Tests
// ============================================================================
