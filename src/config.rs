//! Configuration for the Bw-tree core.
//!
//! The knobs here are the ones the per-node machinery recognizes. The
//! outer tree driver owns its own policy (retry strategy, when to split
//! or merge); nothing in this module reaches beyond the core.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Default mapping-table slot count (1M logical node ids).
pub const DEFAULT_MAPPING_TABLE_CAPACITY: usize = 1 << 20;

/// Default delta-chain height at which writers consolidate.
pub const DEFAULT_CONSOLIDATION_HEIGHT_THRESHOLD: u32 = 8;

/// Configuration error raised by [`BwTreeConfig::validate`].
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("mapping table capacity must be non-zero")]
    ZeroCapacity,

    #[error("consolidation height threshold must be at least 1")]
    ZeroHeightThreshold,

    #[error("non-unique keys are not supported by the core; layer them in the caller")]
    NonUniqueKeysUnsupported,
}

/// Tunable parameters of the core.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BwTreeConfig {
    /// Fixed slot count of the mapping table. Ids are never recycled, so
    /// this bounds the number of logical nodes ever allocated.
    pub mapping_table_capacity: usize,

    /// Chain height at which writers trigger consolidation on their
    /// critical path. Must be at least 1.
    pub consolidation_height_threshold: u32,

    /// The core refuses to enable this; callers wanting duplicate-key
    /// semantics layer them outside.
    pub allow_non_unique_keys: bool,

    /// Enables debug-only invariant checks and memory-usage accounting
    /// on the per-base delta allocator.
    pub debug_assertions: bool,
}

impl Default for BwTreeConfig {
    fn default() -> Self {
        Self {
            mapping_table_capacity: DEFAULT_MAPPING_TABLE_CAPACITY,
            consolidation_height_threshold: DEFAULT_CONSOLIDATION_HEIGHT_THRESHOLD,
            allow_non_unique_keys: false,
            debug_assertions: cfg!(debug_assertions),
        }
    }
}

impl BwTreeConfig {
    /// Check the knobs for consistency.
    ///
    /// # Errors
    ///
    /// Returns the first violated constraint.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.mapping_table_capacity == 0 {
            return Err(ConfigError::ZeroCapacity);
        }

        if self.consolidation_height_threshold == 0 {
            return Err(ConfigError::ZeroHeightThreshold);
        }

        if self.allow_non_unique_keys {
            return Err(ConfigError::NonUniqueKeysUnsupported);
        }

        Ok(())
    }
}
