//! Ordered, seekable log consumed by the replication core.
//!
//! The consensus layer only relies on the [`RaftLog`] trait: forward reads from an
//! arbitrary address, seek to first/last, and a coarse `position -> address` index
//! used to bound backtracking. [`MemoryLog`] and [`FileLog`] are the two bundled
//! implementations.

mod memory;
mod reader;
mod store;

pub use memory::MemoryLog;
pub use reader::LogReader;
pub use store::FileLog;

use crate::membership::{Position, Term, NO_POSITION};
use serde::{Deserialize, Serialize};
use std::io;
use thiserror::Error;

/// Default number of entries covered by one coarse index block.
pub const DEFAULT_INDEX_INTERVAL: usize = 32;

/// Opaque location of an entry inside a log implementation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct LogAddress {
    pub segment: u64,
    pub offset: u64,
}

impl LogAddress {
    pub fn new(segment: u64, offset: u64) -> Self {
        Self { segment, offset }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EntryKind {
    /// Written by a new leader when it takes over a term.
    Initial,
    /// Carries a JSON encoded member list.
    Configuration,
    Data,
}

/// `(position, term)` pair describing an entry without its payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntryMeta {
    pub position: Position,
    pub term: Term,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoggedEntry {
    pub position: Position,
    pub term: Term,
    pub kind: EntryKind,
    pub payload: Vec<u8>,
}

impl LoggedEntry {
    pub fn new(position: Position, term: Term, kind: EntryKind, payload: Vec<u8>) -> Self {
        Self {
            position,
            term,
            kind,
            payload,
        }
    }

    pub fn meta(&self) -> EntryMeta {
        EntryMeta {
            position: self.position,
            term: self.term,
        }
    }
}

pub trait RaftLog {
    /// Address of the first entry (or of the end when the log is empty).
    fn first_address(&self) -> LogAddress;

    /// Address one past the last entry; the next append lands here.
    fn end_address(&self) -> LogAddress;

    fn last_entry(&self) -> Result<Option<EntryMeta>, LogError>;

    /// Coarse index lookup: address of an entry whose position is `<= position`,
    /// close to `position`. `None` when no entry at or before `position` exists.
    fn lookup_address(&self, position: Position) -> Option<LogAddress>;

    /// Reads the entry stored at `address` and returns it with the address of
    /// the following entry. `Ok(None)` at the end of the log.
    fn read(&self, address: LogAddress) -> Result<Option<(LoggedEntry, LogAddress)>, LogError>;

    /// Leader append: the log assigns the next position.
    fn append(&mut self, term: Term, kind: EntryKind, payload: Vec<u8>)
        -> Result<Position, LogError>;

    /// Follower append: the position is dictated by the leader and must extend the log.
    fn append_entry(&mut self, entry: &LoggedEntry) -> Result<(), LogError>;

    /// Drops `position` and everything after it.
    fn truncate_from(&mut self, position: Position) -> Result<(), LogError>;

    fn last_position(&self) -> Result<Position, LogError> {
        Ok(self
            .last_entry()?
            .map(|meta| meta.position)
            .unwrap_or(NO_POSITION))
    }

    /// Index lookup followed by a forward scan bounded by the index interval.
    fn entry_at(&self, position: Position) -> Result<Option<LoggedEntry>, LogError> {
        if position < 0 {
            return Ok(None);
        }
        let Some(mut address) = self.lookup_address(position) else {
            return Ok(None);
        };
        while let Some((entry, next)) = self.read(address)? {
            if entry.position == position {
                return Ok(Some(entry));
            }
            if entry.position > position {
                break;
            }
            address = next;
        }
        Ok(None)
    }
}

/// Checks that `entry` may follow `last`; shared by the bundled implementations.
pub(crate) fn check_sequence(last: Option<EntryMeta>, entry: EntryMeta) -> Result<(), LogError> {
    match last {
        Some(last) if entry.position != last.position + 1 => Err(LogError::NonSequentialAppend {
            expected: last.position + 1,
            attempted: entry.position,
        }),
        Some(last) if entry.term < last.term => Err(LogError::TermRegression {
            previous: last.term,
            attempted: entry.term,
        }),
        None if entry.position < 0 => Err(LogError::NonSequentialAppend {
            expected: 0,
            attempted: entry.position,
        }),
        _ => Ok(()),
    }
}

#[derive(Debug, Error)]
pub enum LogError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("expected next position {expected}, attempted {attempted}")]
    NonSequentialAppend { expected: Position, attempted: Position },
    #[error("term regression: previous={previous}, attempted={attempted}")]
    TermRegression { previous: Term, attempted: Term },
    #[error("truncate position must be >= 0 (observed {0})")]
    InvalidTruncatePosition(Position),
    #[error("corrupted entry in segment {segment} at offset {offset}")]
    Corrupted { segment: u64, offset: u64 },
}
