use super::{
    check_sequence, EntryKind, EntryMeta, LogAddress, LogError, LoggedEntry, RaftLog,
    DEFAULT_INDEX_INTERVAL,
};
use crate::membership::{Position, Term};

/// Volatile log keeping entries in memory, with the same sparse index layout as
/// [`super::FileLog`]. Addresses are entry slots in segment 0.
#[derive(Debug, Clone)]
pub struct MemoryLog {
    entries: Vec<LoggedEntry>,
    index: Vec<(Position, usize)>,
    index_interval: usize,
}

impl MemoryLog {
    pub fn new() -> Self {
        Self::with_index_interval(DEFAULT_INDEX_INTERVAL)
    }

    pub fn with_index_interval(index_interval: usize) -> Self {
        Self {
            entries: Vec::new(),
            index: Vec::new(),
            index_interval: index_interval.max(1),
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn index_blocks(&self) -> usize {
        self.index.len()
    }

    fn push(&mut self, entry: LoggedEntry) {
        let slot = self.entries.len();
        if slot % self.index_interval == 0 {
            self.index.push((entry.position, slot));
        }
        self.entries.push(entry);
    }
}

impl Default for MemoryLog {
    fn default() -> Self {
        Self::new()
    }
}

impl RaftLog for MemoryLog {
    fn first_address(&self) -> LogAddress {
        LogAddress::new(0, 0)
    }

    fn end_address(&self) -> LogAddress {
        LogAddress::new(0, self.entries.len() as u64)
    }

    fn last_entry(&self) -> Result<Option<EntryMeta>, LogError> {
        Ok(self.entries.last().map(LoggedEntry::meta))
    }

    fn lookup_address(&self, position: Position) -> Option<LogAddress> {
        let block = self.index.partition_point(|(start, _)| *start <= position);
        if block == 0 {
            return None;
        }
        let (_, slot) = self.index[block - 1];
        Some(LogAddress::new(0, slot as u64))
    }

    fn read(&self, address: LogAddress) -> Result<Option<(LoggedEntry, LogAddress)>, LogError> {
        if address.segment != 0 {
            return Ok(None);
        }
        Ok(self
            .entries
            .get(address.offset as usize)
            .map(|entry| (entry.clone(), LogAddress::new(0, address.offset + 1))))
    }

    fn append(
        &mut self,
        term: Term,
        kind: EntryKind,
        payload: Vec<u8>,
    ) -> Result<Position, LogError> {
        let position = self.entries.last().map(|last| last.position + 1).unwrap_or(0);
        let entry = LoggedEntry::new(position, term, kind, payload);
        check_sequence(self.entries.last().map(LoggedEntry::meta), entry.meta())?;
        self.push(entry);
        Ok(position)
    }

    fn append_entry(&mut self, entry: &LoggedEntry) -> Result<(), LogError> {
        check_sequence(self.entries.last().map(LoggedEntry::meta), entry.meta())?;
        self.push(entry.clone());
        Ok(())
    }

    fn truncate_from(&mut self, position: Position) -> Result<(), LogError> {
        if position < 0 {
            return Err(LogError::InvalidTruncatePosition(position));
        }
        self.entries.retain(|entry| entry.position < position);
        self.index.retain(|(start, _)| *start < position);
        Ok(())
    }
}
