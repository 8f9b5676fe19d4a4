use std::fs;
use std::io;
use std::path::{Path, PathBuf};

const METADATA_FILE: &str = "metadata.json";
const SEGMENTS_DIR: &str = "segments";
const SNAPSHOTS_DIR: &str = "snapshots";

/// Canonical layout of one partition rooted at `<data_dir>/<topic>-<partition_id>/`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PartitionLayout {
    root: PathBuf,
}

impl PartitionLayout {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn for_partition(data_dir: &Path, topic_name: &str, partition_id: u32) -> Self {
        Self::new(data_dir.join(partition_dir_name(topic_name, partition_id)))
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn paths(&self) -> PartitionPaths {
        PartitionPaths {
            root: self.root.clone(),
            metadata_file: self.root.join(METADATA_FILE),
            segments_dir: self.root.join(SEGMENTS_DIR),
            snapshots_dir: self.root.join(SNAPSHOTS_DIR),
        }
    }

    pub fn metadata_file(&self) -> PathBuf {
        self.root.join(METADATA_FILE)
    }

    pub fn ensure(&self) -> io::Result<()> {
        let paths = self.paths();
        fs::create_dir_all(&paths.segments_dir)?;
        fs::create_dir_all(&paths.snapshots_dir)?;
        Ok(())
    }

    /// Whether `dir` looks like a partition root (holds a metadata file).
    pub fn is_partition_dir(dir: &Path) -> bool {
        dir.join(METADATA_FILE).is_file()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PartitionPaths {
    pub root: PathBuf,
    pub metadata_file: PathBuf,
    pub segments_dir: PathBuf,
    pub snapshots_dir: PathBuf,
}

pub fn partition_dir_name(topic_name: &str, partition_id: u32) -> String {
    format!("{topic_name}-{partition_id}")
}
