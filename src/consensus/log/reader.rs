use super::{LogAddress, LogError, LoggedEntry, RaftLog};
use crate::membership::Position;

/// Forward cursor over a [`RaftLog`]. Each consumer owns one; the log is passed in
/// on every call so readers never hold a reference to it.
#[derive(Debug, Clone, Default)]
pub struct LogReader {
    next: LogAddress,
}

impl LogReader {
    pub fn new<L: RaftLog + ?Sized>(log: &L) -> Self {
        Self {
            next: log.first_address(),
        }
    }

    /// Address of the entry the next call to [`LogReader::next`] returns.
    pub fn address(&self) -> LogAddress {
        self.next
    }

    pub fn set_address(&mut self, address: LogAddress) {
        self.next = address;
    }

    pub fn seek_to_first<L: RaftLog + ?Sized>(&mut self, log: &L) {
        self.next = log.first_address();
    }

    /// Positions the cursor after the last entry.
    pub fn seek_to_end<L: RaftLog + ?Sized>(&mut self, log: &L) {
        self.next = log.end_address();
    }

    /// Positions the cursor on the first entry with a position `>= position`.
    /// Returns whether an entry with exactly that position exists.
    pub fn seek<L: RaftLog + ?Sized>(
        &mut self,
        log: &L,
        position: Position,
    ) -> Result<bool, LogError> {
        let mut address = log
            .lookup_address(position)
            .unwrap_or_else(|| log.first_address());
        loop {
            match log.read(address)? {
                Some((entry, _)) if entry.position >= position => {
                    self.next = address;
                    return Ok(entry.position == position);
                }
                Some((_, next)) => address = next,
                None => {
                    self.next = address;
                    return Ok(false);
                }
            }
        }
    }

    pub fn has_next<L: RaftLog + ?Sized>(&self, log: &L) -> Result<bool, LogError> {
        Ok(log.read(self.next)?.is_some())
    }

    pub fn next<L: RaftLog + ?Sized>(&mut self, log: &L) -> Result<Option<LoggedEntry>, LogError> {
        match log.read(self.next)? {
            Some((entry, next)) => {
                self.next = next;
                Ok(Some(entry))
            }
            None => Ok(None),
        }
    }
}
