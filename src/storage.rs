//! Durable per-partition state: metadata file, directory layout and the
//! catalog of partitions spread over data directories.

pub mod directory;
pub mod layout;
pub mod metadata;

pub use directory::{ConfigurationDirectory, DirectoryError, PartitionConfiguration};
pub use layout::{partition_dir_name, PartitionLayout, PartitionPaths};
pub use metadata::{MemberRecord, MetadataError, PartitionMetadata, PartitionMetadataStore};
