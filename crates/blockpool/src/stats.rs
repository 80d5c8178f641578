//! Block pool statistics

/// Point-in-time statistics for a block pool
///
/// Counters are read with relaxed ordering; under concurrent use the
/// snapshot is approximate, and exact once the pool is quiescent.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolStats {
    /// Total allocations performed
    pub total_allocs: usize,
    /// Total deallocations performed
    pub total_deallocs: usize,
    /// Highest number of blocks in use at once
    pub peak_in_use: usize,
    /// Blocks currently in use
    pub in_use: usize,
    /// Blocks currently on the free list
    pub free_blocks: usize,
    /// Size of each block
    pub block_size: usize,
    /// Blocks per chunk
    pub block_count: usize,
    /// Chunks currently owned by the pool
    pub chunk_count: usize,
}

impl PoolStats {
    /// Bytes handed out to callers
    pub fn in_use_bytes(&self) -> usize {
        self.in_use * self.block_size
    }

    /// Bytes reserved across all chunks
    pub fn reserved_bytes(&self) -> usize {
        self.chunk_count * self.block_count * self.block_size
    }

    /// Fraction of reserved blocks currently in use, in `0.0..=1.0`
    pub fn utilization(&self) -> f64 {
        let capacity = self.chunk_count * self.block_count;
        if capacity == 0 {
            0.0
        } else {
            self.in_use as f64 / capacity as f64
        }
    }
}
