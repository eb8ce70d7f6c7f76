//! Database configuration.

use crate::compaction::CompactionPolicy;
use crate::error::{CoreError, CoreResult};

/// Rows per row block.
pub const DEFAULT_BLOCK_CAPACITY: usize = 8192;

/// Rows per segment (1024 full blocks).
pub const DEFAULT_SEGMENT_CAPACITY: usize = 1024 * DEFAULT_BLOCK_CAPACITY;

/// Configuration for opening a database.
#[derive(Debug, Clone)]
pub struct Config {
    /// Maximum rows in one row block. Imports and compaction both pack
    /// rows into blocks of exactly this size (the last block may be short).
    pub block_capacity: usize,

    /// Maximum rows in one segment. Must be a multiple of `block_capacity`.
    pub segment_capacity: usize,

    /// Candidate selection for automatic compaction.
    pub compaction: CompactionPolicy,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            block_capacity: DEFAULT_BLOCK_CAPACITY,
            segment_capacity: DEFAULT_SEGMENT_CAPACITY,
            compaction: CompactionPolicy::default(),
        }
    }
}

impl Config {
    /// Creates a new configuration with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the row block capacity.
    #[must_use]
    pub const fn block_capacity(mut self, rows: usize) -> Self {
        self.block_capacity = rows;
        self
    }

    /// Sets the segment capacity in rows.
    #[must_use]
    pub const fn segment_capacity(mut self, rows: usize) -> Self {
        self.segment_capacity = rows;
        self
    }

    /// Sets the automatic compaction policy.
    #[must_use]
    pub fn compaction(mut self, policy: CompactionPolicy) -> Self {
        self.compaction = policy;
        self
    }

    /// Returns the number of blocks a full segment holds.
    #[must_use]
    pub const fn blocks_per_segment(&self) -> usize {
        self.segment_capacity / self.block_capacity
    }

    /// Checks that the capacities describe a usable layout.
    ///
    /// # Errors
    ///
    /// Returns `InvalidArgument` for a zero block capacity, a segment
    /// capacity that is not a positive multiple of it, or a segment capacity
    /// that does not fit a `u32` row offset.
    pub fn validate(&self) -> CoreResult<()> {
        if self.block_capacity == 0 {
            return Err(CoreError::invalid_argument("block capacity must be positive"));
        }
        if self.segment_capacity == 0 || self.segment_capacity % self.block_capacity != 0 {
            return Err(CoreError::invalid_argument(format!(
                "segment capacity {} is not a positive multiple of block capacity {}",
                self.segment_capacity, self.block_capacity
            )));
        }
        if u32::try_from(self.segment_capacity).is_err() {
            return Err(CoreError::invalid_argument(format!(
                "segment capacity {} exceeds u32 row offsets",
                self.segment_capacity
            )));
        }
        self.compaction.validate()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config() {
        let config = Config::default();
        assert_eq!(config.block_capacity, 8192);
        assert_eq!(config.blocks_per_segment(), 1024);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn builder_pattern() {
        let config = Config::new().block_capacity(4).segment_capacity(16);
        assert_eq!(config.block_capacity, 4);
        assert_eq!(config.blocks_per_segment(), 4);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn rejects_misaligned_segment_capacity() {
        let config = Config::new().block_capacity(4).segment_capacity(10);
        assert!(config.validate().is_err());

        let config = Config::new().block_capacity(0);
        assert!(config.validate().is_err());
    }
}
