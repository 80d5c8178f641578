//! Pool configuration

use crate::error::{PoolError, PoolResult};
use crate::utils::{POINTER_ALIGN, POINTER_WIDTH, align_up};

/// Configuration for a block pool
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PoolConfig {
    /// Requested size of each block in bytes
    ///
    /// Raised to at least pointer width and rounded up to `block_align`.
    pub block_size: usize,

    /// Number of blocks reserved per chunk
    pub block_count: usize,

    /// Alignment of every block (power of two)
    pub block_align: usize,

    /// Enable statistics tracking
    pub track_stats: bool,

    /// Use exponential backoff for CAS retries
    pub use_backoff: bool,

    /// Fill pattern byte for freshly reserved chunks (for debugging)
    pub alloc_pattern: Option<u8>,
    /// Fill pattern byte for returned blocks (for debugging)
    pub dealloc_pattern: Option<u8>,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            block_size: POINTER_WIDTH,
            block_count: 64,
            block_align: POINTER_ALIGN,
            track_stats: cfg!(debug_assertions),
            use_backoff: true,
            alloc_pattern: if cfg!(debug_assertions) {
                Some(0xBB)
            } else {
                None
            },
            dealloc_pattern: if cfg!(debug_assertions) {
                Some(0xDD)
            } else {
                None
            },
        }
    }
}

impl PoolConfig {
    /// Default configuration for the given block geometry
    #[must_use]
    pub fn new(block_size: usize, block_count: usize) -> Self {
        Self {
            block_size,
            block_count,
            ..Self::default()
        }
    }

    /// Production configuration - optimized for performance
    #[must_use]
    pub fn production(block_size: usize, block_count: usize) -> Self {
        Self {
            track_stats: false,
            use_backoff: true,
            alloc_pattern: None,
            dealloc_pattern: None,
            ..Self::new(block_size, block_count)
        }
    }

    /// Debug configuration - optimized for debugging
    #[must_use]
    pub fn debug(block_size: usize, block_count: usize) -> Self {
        Self {
            track_stats: true,
            use_backoff: false,
            alloc_pattern: Some(0xBB),
            dealloc_pattern: Some(0xDD),
            ..Self::new(block_size, block_count)
        }
    }

    /// Performance configuration - minimal overhead
    #[must_use]
    pub fn performance(block_size: usize, block_count: usize) -> Self {
        Self {
            track_stats: false,
            use_backoff: false,
            alloc_pattern: None,
            dealloc_pattern: None,
            ..Self::new(block_size, block_count)
        }
    }

    /// Set block alignment
    pub fn with_block_align(mut self, block_align: usize) -> Self {
        self.block_align = block_align;
        self
    }

    /// Enable or disable statistics tracking
    pub fn with_stats(mut self, track_stats: bool) -> Self {
        self.track_stats = track_stats;
        self
    }

    /// Enable or disable CAS backoff
    pub fn with_backoff(mut self, use_backoff: bool) -> Self {
        self.use_backoff = use_backoff;
        self
    }

    /// Set debug fill patterns for fresh chunks and returned blocks
    pub fn with_patterns(mut self, alloc: Option<u8>, dealloc: Option<u8>) -> Self {
        self.alloc_pattern = alloc;
        self.dealloc_pattern = dealloc;
        self
    }

    /// Validate the configuration
    pub fn validate(&self) -> PoolResult<()> {
        if self.block_size == 0 {
            return Err(PoolError::invalid_config("block size must be positive"));
        }
        if self.block_count == 0 {
            return Err(PoolError::invalid_config("block count must be positive"));
        }
        if !self.block_align.is_power_of_two() {
            return Err(PoolError::invalid_config(
                "block alignment must be a power of two",
            ));
        }
        Ok(())
    }

    /// Alignment the pool actually uses
    ///
    /// Never below pointer alignment: free blocks hold a link in their
    /// first word.
    pub fn effective_block_align(&self) -> usize {
        self.block_align.max(POINTER_ALIGN)
    }

    /// Block size the pool actually hands out
    ///
    /// `max(block_size, pointer width)` rounded up to a multiple of the
    /// effective alignment, so consecutive blocks in a chunk stay aligned.
    pub fn effective_block_size(&self) -> PoolResult<usize> {
        self.validate()?;
        align_up(
            self.block_size.max(POINTER_WIDTH),
            self.effective_block_align(),
        )
        .ok_or_else(|| PoolError::size_overflow("block size alignment"))
    }

    /// Bytes reserved per chunk
    pub fn chunk_bytes(&self) -> PoolResult<usize> {
        self.effective_block_size()?
            .checked_mul(self.block_count)
            .ok_or_else(|| PoolError::size_overflow("chunk size calculation"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_small_blocks_clamped_to_pointer_width() {
        let config = PoolConfig::new(1, 4);
        assert_eq!(config.effective_block_size().unwrap(), POINTER_WIDTH);
    }

    #[test]
    fn test_block_size_rounded_to_alignment() {
        let config = PoolConfig::new(20, 4).with_block_align(16);
        assert_eq!(config.effective_block_size().unwrap(), 32);
        assert_eq!(config.chunk_bytes().unwrap(), 128);
    }

    #[test]
    fn test_validate_rejects_zero_geometry() {
        assert_eq!(
            PoolConfig::new(0, 4).validate().unwrap_err().code(),
            "POOL:CONFIG:INVALID"
        );
        assert_eq!(
            PoolConfig::new(16, 0).validate().unwrap_err().code(),
            "POOL:CONFIG:INVALID"
        );
    }

    #[test]
    fn test_alignment_never_below_pointer() {
        let config = PoolConfig::new(3, 4).with_block_align(1);
        assert_eq!(config.effective_block_align(), POINTER_ALIGN);
        assert_eq!(config.effective_block_size().unwrap() % POINTER_ALIGN, 0);
    }

    #[test]
    fn test_validate_rejects_bad_alignment() {
        let config = PoolConfig::new(16, 4).with_block_align(12);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_chunk_size_overflow() {
        let config = PoolConfig::new(usize::MAX / 2, 4);
        assert_eq!(
            config.chunk_bytes().unwrap_err(),
            PoolError::size_overflow("chunk size calculation")
        );
    }

    #[test]
    fn test_presets() {
        let production = PoolConfig::production(32, 8);
        assert!(!production.track_stats);
        assert!(production.use_backoff);
        assert_eq!(production.dealloc_pattern, None);

        let debug = PoolConfig::debug(32, 8);
        assert!(debug.track_stats);
        assert_eq!(debug.alloc_pattern, Some(0xBB));

        let performance = PoolConfig::performance(32, 8);
        assert!(!performance.use_backoff);
        assert_eq!(performance.block_size, 32);
        assert_eq!(performance.block_count, 8);
    }
}
