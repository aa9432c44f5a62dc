//! Shard information and statistics data structures
//!
//! Point-in-time snapshots of the shards of a sink.

use serde::{Deserialize, Serialize};

/// Information about a shard
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShardInfo {
    /// Position among the configured base filenames
    pub index: usize,
    /// Configured base filename
    pub base: String,
    /// File the shard currently writes to
    pub filename: String,
    /// Whether the shard holds an open handle
    pub is_open: bool,
    /// Identity of the open handle
    pub handle_id: Option<u64>,
    /// Last known size of the active file in bytes
    pub size_hint: u64,
}

/// Statistics about all shards of a sink
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShardStats {
    /// Number of configured shards
    pub shard_count: usize,
    /// Number of shards holding an open handle
    pub open_count: usize,
    /// Sum of the size hints of all active files
    pub total_size_hint: u64,
}

impl ShardStats {
    /// Create new empty shard statistics
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of shards without an open handle
    pub fn closed_count(&self) -> usize {
        self.shard_count.saturating_sub(self.open_count)
    }
}
