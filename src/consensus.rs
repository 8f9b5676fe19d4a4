//! Consensus-side collaborators of the replication core.

pub mod log;

pub use self::log::{
    EntryKind, EntryMeta, FileLog, LogAddress, LogError, LogReader, LoggedEntry, MemoryLog,
    RaftLog, DEFAULT_INDEX_INTERVAL,
};
