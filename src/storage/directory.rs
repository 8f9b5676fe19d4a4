use super::layout::PartitionLayout;
use super::metadata::{MetadataError, PartitionMetadata, PartitionMetadataStore};
use crate::config::DirectoryConfig;
use crate::consensus::log::{FileLog, LogError};
use crate::membership::Member;
use log::{info, warn};
use parking_lot::RwLock;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// A partition known to this process: where it lives and its metadata as of
/// the last catalog update.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PartitionConfiguration {
    pub data_dir: PathBuf,
    pub layout: PartitionLayout,
    pub metadata: PartitionMetadata,
    /// Index interval of the partition log, taken from the directory settings.
    pub index_interval: usize,
}

impl PartitionConfiguration {
    pub fn partition_id(&self) -> u32 {
        self.metadata.partition_id
    }

    pub fn topic_name(&self) -> &str {
        &self.metadata.topic_name
    }

    /// Opens the durable store backing this partition, reloading the file.
    pub fn open_store(&self) -> Result<PartitionMetadataStore, MetadataError> {
        PartitionMetadataStore::open(self.layout.metadata_file(), self.metadata.clone())
    }

    pub fn open_log(&self) -> Result<FileLog, LogError> {
        FileLog::open_with(
            self.layout.paths().segments_dir,
            self.metadata.segment_size,
            self.index_interval,
        )
    }
}

/// Catalog of local partitions spread over several data directories.
///
/// Shared by every partition of the process; the catalog sits behind a lock and
/// callers only ever receive copies.
#[derive(Debug)]
pub struct ConfigurationDirectory {
    config: DirectoryConfig,
    catalog: RwLock<Vec<PartitionConfiguration>>,
}

impl ConfigurationDirectory {
    /// Scans every data directory for existing partitions.
    pub fn open(config: DirectoryConfig) -> Result<Self, DirectoryError> {
        if config.data_dirs.is_empty() {
            return Err(DirectoryError::NoDataDirectories);
        }
        let mut catalog: Vec<PartitionConfiguration> = Vec::new();
        for data_dir in &config.data_dirs {
            fs::create_dir_all(data_dir)?;
            for found in discover(data_dir, config.index_interval)? {
                if catalog
                    .iter()
                    .any(|known| known.partition_id() == found.partition_id())
                {
                    warn!(
                        "event=partition_duplicate partition={} path={}",
                        found.partition_id(),
                        found.layout.root().display()
                    );
                    continue;
                }
                catalog.push(found);
            }
        }
        info!(
            "event=partition_catalog_open data_dirs={} partitions={}",
            config.data_dirs.len(),
            catalog.len()
        );
        Ok(Self {
            config,
            catalog: RwLock::new(catalog),
        })
    }

    pub fn config(&self) -> &DirectoryConfig {
        &self.config
    }

    /// Snapshot copy of the catalog.
    pub fn configurations(&self) -> Vec<PartitionConfiguration> {
        self.catalog.read().clone()
    }

    pub fn configuration(&self, partition_id: u32) -> Option<PartitionConfiguration> {
        self.catalog
            .read()
            .iter()
            .find(|config| config.partition_id() == partition_id)
            .cloned()
    }

    /// Number of partitions per data directory, in configured order.
    pub fn partitions_per_dir(&self) -> Vec<(PathBuf, usize)> {
        let catalog = self.catalog.read();
        self.config
            .data_dirs
            .iter()
            .map(|dir| {
                let count = catalog.iter().filter(|c| &c.data_dir == dir).count();
                (dir.clone(), count)
            })
            .collect()
    }

    /// Creates and persists a new partition in the least loaded data directory.
    /// On any failure the partially created directory is removed.
    pub fn create_configuration(
        &self,
        topic_name: &str,
        partition_id: u32,
        replication_factor: u32,
        members: &[Member],
    ) -> Result<PartitionConfiguration, DirectoryError> {
        let mut catalog = self.catalog.write();
        if catalog
            .iter()
            .any(|config| config.partition_id() == partition_id)
        {
            return Err(DirectoryError::PartitionExists(partition_id));
        }

        let data_dir = least_loaded(&self.config.data_dirs, &catalog)
            .ok_or(DirectoryError::NoDataDirectories)?;
        let layout = PartitionLayout::for_partition(&data_dir, topic_name, partition_id);
        if layout.root().exists() {
            return Err(DirectoryError::DirectoryOccupied(layout.root().to_path_buf()));
        }

        let mut metadata = PartitionMetadata::new(
            topic_name,
            partition_id,
            replication_factor,
            self.config.segment_size,
        );
        let created = create_partition(&layout, &mut metadata, members);
        if let Err(err) = created {
            if let Err(cleanup) = fs::remove_dir_all(layout.root()) {
                warn!(
                    "event=partition_create_rollback_failed partition={} path={} error={}",
                    partition_id,
                    layout.root().display(),
                    cleanup
                );
            }
            warn!(
                "event=partition_create_rollback partition={} path={} error={}",
                partition_id,
                layout.root().display(),
                err
            );
            return Err(err);
        }

        let configuration = PartitionConfiguration {
            data_dir,
            layout,
            metadata,
            index_interval: self.config.index_interval,
        };
        catalog.push(configuration.clone());
        info!(
            "event=partition_created topic={} partition={} replication_factor={} path={}",
            topic_name,
            partition_id,
            replication_factor,
            configuration.layout.root().display()
        );
        Ok(configuration)
    }

    /// Decommissions a partition: deletes its metadata and directory tree.
    pub fn remove_configuration(&self, partition_id: u32) -> Result<bool, DirectoryError> {
        let mut catalog = self.catalog.write();
        let Some(slot) = catalog
            .iter()
            .position(|config| config.partition_id() == partition_id)
        else {
            return Ok(false);
        };
        let configuration = catalog.remove(slot);
        PartitionMetadataStore::new(
            configuration.layout.metadata_file(),
            configuration.metadata.clone(),
        )
        .delete()?;
        match fs::remove_dir_all(configuration.layout.root()) {
            Ok(()) => {}
            Err(err) if err.kind() == io::ErrorKind::NotFound => {}
            Err(err) => return Err(DirectoryError::Io(err)),
        }
        info!(
            "event=partition_removed partition={} path={}",
            partition_id,
            configuration.layout.root().display()
        );
        Ok(true)
    }
}

fn create_partition(
    layout: &PartitionLayout,
    metadata: &mut PartitionMetadata,
    members: &[Member],
) -> Result<(), DirectoryError> {
    layout.ensure()?;
    let mut store = PartitionMetadataStore::new(layout.metadata_file(), metadata.clone());
    for member in members {
        store.add_member(member);
    }
    store.save()?;
    *metadata = store.metadata().clone();
    Ok(())
}

fn least_loaded(data_dirs: &[PathBuf], catalog: &[PartitionConfiguration]) -> Option<PathBuf> {
    data_dirs
        .iter()
        .enumerate()
        .min_by_key(|(order, dir)| {
            let count = catalog.iter().filter(|c| &c.data_dir == *dir).count();
            (count, *order)
        })
        .map(|(_, dir)| dir.clone())
}

fn discover(
    data_dir: &Path,
    index_interval: usize,
) -> Result<Vec<PartitionConfiguration>, DirectoryError> {
    let mut found = Vec::new();
    let mut dirs: Vec<PathBuf> = fs::read_dir(data_dir)?
        .filter_map(|entry| entry.ok().map(|entry| entry.path()))
        .filter(|path| PartitionLayout::is_partition_dir(path))
        .collect();
    dirs.sort();
    for root in dirs {
        let layout = PartitionLayout::new(root);
        let mut store = PartitionMetadataStore::new(
            layout.metadata_file(),
            PartitionMetadata::new("", 0, 0, 0),
        );
        if !store.load()? {
            continue;
        }
        found.push(PartitionConfiguration {
            data_dir: data_dir.to_path_buf(),
            layout,
            metadata: store.metadata().clone(),
            index_interval,
        });
    }
    Ok(found)
}

#[derive(Debug, Error)]
pub enum DirectoryError {
    #[error("partition {0} already exists")]
    PartitionExists(u32),
    #[error("partition directory {0} already exists on disk")]
    DirectoryOccupied(PathBuf),
    #[error("no data directories configured")]
    NoDataDirectories,
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
    #[error(transparent)]
    Metadata(#[from] MetadataError),
}
