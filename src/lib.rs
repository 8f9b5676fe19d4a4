//! Raft replication core for partitioned log streams.
//!
//! Each partition replica runs a [`RaftNode`] over an ordered, seekable
//! [`RaftLog`], talks to its peers through a non-blocking [`RaftTransport`] and
//! keeps term, vote and membership in a crash-safe [`PartitionMetadataStore`].
//! A [`ConfigurationDirectory`] tracks the partitions of a process across
//! several data directories.

pub mod config;
pub mod consensus;
pub mod membership;
pub mod raft;
pub mod storage;
pub mod transport;
pub mod util;

pub use config::{DirectoryConfig, NodeConfig};
pub use consensus::{
    EntryKind, EntryMeta, FileLog, LogAddress, LogError, LogReader, LoggedEntry, MemoryLog,
    RaftLog,
};
pub use membership::{
    Configuration, Endpoint, EndpointParseError, Member, MemberType, Position, Term, NO_POSITION,
    NO_TERM,
};
pub use raft::{
    AppendRequest, AppendResponse, ElectionController, ElectionTimer, PartitionWorker,
    RaftNode, RaftRequest, RaftResponse, RaftRole, ReplicationSession, VoteRequest, VoteResponse,
    VoteTally,
};
pub use storage::{
    ConfigurationDirectory, DirectoryError, MetadataError, PartitionConfiguration,
    PartitionLayout, PartitionMetadata, PartitionMetadataStore,
};
pub use transport::{
    LoopbackNetwork, LoopbackTransport, RaftTransport, RequestId, RequestStatus, TransportError,
};
pub use util::{IdleBackoff, RaftError};
