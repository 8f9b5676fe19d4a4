//! Explicit configuration structs for nodes and the partition directory.

use crate::consensus::log::DEFAULT_INDEX_INTERVAL;
use crate::membership::Endpoint;
use std::path::PathBuf;
use std::time::Duration;

/// Settings for one partition's consensus node.
#[derive(Debug, Clone)]
pub struct NodeConfig {
    pub topic_name: String,
    pub partition_id: u32,
    /// Endpoint this node is reachable at; identifies it in membership.
    pub endpoint: Endpoint,
    /// Fixed floor between two appends sent to the same peer.
    pub heartbeat_interval: Duration,
    pub election_timeout_min: Duration,
    pub election_timeout_max: Duration,
    pub election_seed: u64,
}

impl NodeConfig {
    pub const DEFAULT_HEARTBEAT_MS: u64 = 100;
    pub const DEFAULT_ELECTION_MIN_MS: u64 = 150;
    pub const DEFAULT_ELECTION_MAX_MS: u64 = 300;

    pub fn new(topic_name: impl Into<String>, partition_id: u32, endpoint: Endpoint) -> Self {
        let election_seed = (u64::from(partition_id) << 16) | u64::from(endpoint.port);
        Self {
            topic_name: topic_name.into(),
            partition_id,
            endpoint,
            heartbeat_interval: Duration::from_millis(Self::DEFAULT_HEARTBEAT_MS),
            election_timeout_min: Duration::from_millis(Self::DEFAULT_ELECTION_MIN_MS),
            election_timeout_max: Duration::from_millis(Self::DEFAULT_ELECTION_MAX_MS),
            election_seed,
        }
    }

    /// Short label used in log lines.
    pub fn partition_label(&self) -> String {
        format!("{}-{}", self.topic_name, self.partition_id)
    }
}

/// Settings for the [`crate::storage::ConfigurationDirectory`].
#[derive(Debug, Clone)]
pub struct DirectoryConfig {
    /// Candidate data directories, in tie-break order.
    pub data_dirs: Vec<PathBuf>,
    pub segment_size: u64,
    pub index_interval: usize,
}

impl DirectoryConfig {
    pub const DEFAULT_SEGMENT_SIZE: u64 = 8 * 1024 * 1024;

    pub fn new(data_dirs: Vec<PathBuf>) -> Self {
        Self {
            data_dirs,
            segment_size: Self::DEFAULT_SEGMENT_SIZE,
            index_interval: DEFAULT_INDEX_INTERVAL,
        }
    }
}
