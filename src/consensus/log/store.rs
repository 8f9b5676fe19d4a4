use super::{
    check_sequence, EntryKind, EntryMeta, LogAddress, LogError, LoggedEntry, RaftLog,
    DEFAULT_INDEX_INTERVAL,
};
use crate::membership::{Position, Term};
use log::{debug, warn};
use std::fs::{self, File, OpenOptions};
use std::io::{BufRead, BufReader, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

const SEGMENT_FILE_PREFIX: &str = "segment-";
const SEGMENT_FILE_SUFFIX: &str = ".log";
pub const DEFAULT_SEGMENT_BYTES: u64 = 8 * 1024 * 1024;

#[derive(Debug, Clone)]
struct Segment {
    id: u64,
    path: PathBuf,
    bytes: u64,
}

/// Append-only log stored as JSON-lines segment files under one directory.
///
/// A sparse `(position, address)` index is rebuilt on open; addresses are
/// `(segment id, byte offset)` pairs. A torn line at the tail of the last
/// segment (crash mid-append) is cut off during open.
#[derive(Debug)]
pub struct FileLog {
    dir: PathBuf,
    segment_bytes: u64,
    index_interval: usize,
    segments: Vec<Segment>,
    index: Vec<(Position, LogAddress)>,
    first: Option<Position>,
    last: Option<EntryMeta>,
}

impl FileLog {
    pub fn open(dir: impl Into<PathBuf>) -> Result<Self, LogError> {
        Self::open_with(dir, DEFAULT_SEGMENT_BYTES, DEFAULT_INDEX_INTERVAL)
    }

    pub fn open_with(
        dir: impl Into<PathBuf>,
        segment_bytes: u64,
        index_interval: usize,
    ) -> Result<Self, LogError> {
        let dir = dir.into();
        fs::create_dir_all(&dir)?;
        let mut log = Self {
            segments: discover_segments(&dir)?,
            dir,
            segment_bytes: segment_bytes.max(1),
            index_interval: index_interval.max(1),
            index: Vec::new(),
            first: None,
            last: None,
        };
        log.replay()?;
        if log.segments.is_empty() {
            log.start_segment(0)?;
        }
        debug!(
            "event=log_open dir={} segments={} last_position={:?}",
            log.dir.display(),
            log.segments.len(),
            log.last.map(|meta| meta.position)
        );
        Ok(log)
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn segment_count(&self) -> usize {
        self.segments.len()
    }

    pub fn index_interval(&self) -> usize {
        self.index_interval
    }

    fn replay(&mut self) -> Result<(), LogError> {
        let segment_count = self.segments.len();
        for slot in 0..segment_count {
            let segment = self.segments[slot].clone();
            let file = File::open(&segment.path)?;
            let mut reader = BufReader::new(file);
            let mut offset = 0u64;
            let mut line = String::new();
            loop {
                line.clear();
                let read = reader.read_line(&mut line)?;
                if read == 0 {
                    break;
                }
                let parsed = if line.ends_with('\n') {
                    serde_json::from_str::<LoggedEntry>(line.trim_end()).ok()
                } else {
                    None
                };
                match parsed {
                    Some(entry) => {
                        self.record(entry.meta(), LogAddress::new(segment.id, offset));
                        offset += read as u64;
                    }
                    None if slot + 1 == segment_count => {
                        warn!(
                            "event=log_torn_tail segment={} offset={} dropped_bytes={}",
                            segment.path.display(),
                            offset,
                            segment.bytes.saturating_sub(offset)
                        );
                        let file = OpenOptions::new().write(true).open(&segment.path)?;
                        file.set_len(offset)?;
                        file.sync_all()?;
                        break;
                    }
                    None => {
                        return Err(LogError::Corrupted {
                            segment: segment.id,
                            offset,
                        })
                    }
                }
            }
            self.segments[slot].bytes = offset;
        }
        Ok(())
    }

    fn record(&mut self, meta: EntryMeta, address: LogAddress) {
        let first = *self.first.get_or_insert(meta.position);
        if ((meta.position - first) as usize) % self.index_interval == 0 {
            self.index.push((meta.position, address));
        }
        self.last = Some(meta);
    }

    fn start_segment(&mut self, id: u64) -> Result<(), LogError> {
        let path = self.dir.join(segment_file_name(id));
        File::create(&path)?.sync_all()?;
        self.segments.push(Segment { id, path, bytes: 0 });
        Ok(())
    }

    fn write_entry(&mut self, entry: &LoggedEntry) -> Result<(), LogError> {
        let needs_rotation = self
            .segments
            .last()
            .map(|segment| segment.bytes >= self.segment_bytes)
            .unwrap_or(true);
        if needs_rotation {
            let next_id = self.segments.last().map(|s| s.id + 1).unwrap_or(0);
            self.start_segment(next_id)?;
        }
        let mut line = serde_json::to_string(entry)?;
        line.push('\n');
        let Some(segment) = self.segments.last_mut() else {
            return Ok(());
        };
        let mut file = OpenOptions::new().append(true).open(&segment.path)?;
        file.write_all(line.as_bytes())?;
        file.sync_data()?;
        let address = LogAddress::new(segment.id, segment.bytes);
        segment.bytes += line.len() as u64;
        self.record(entry.meta(), address);
        Ok(())
    }

    fn segment_slot(&self, id: u64) -> Option<usize> {
        self.segments.binary_search_by_key(&id, |s| s.id).ok()
    }

    fn address_of(&self, position: Position) -> Result<Option<LogAddress>, LogError> {
        let Some(mut address) = self.lookup_address(position) else {
            return Ok(None);
        };
        while let Some((entry, next)) = self.read(address)? {
            if entry.position == position {
                return Ok(Some(address));
            }
            address = next;
        }
        Ok(None)
    }
}

impl RaftLog for FileLog {
    fn first_address(&self) -> LogAddress {
        self.segments
            .first()
            .map(|segment| LogAddress::new(segment.id, 0))
            .unwrap_or_default()
    }

    fn end_address(&self) -> LogAddress {
        self.segments
            .last()
            .map(|segment| LogAddress::new(segment.id, segment.bytes))
            .unwrap_or_default()
    }

    fn last_entry(&self) -> Result<Option<EntryMeta>, LogError> {
        Ok(self.last)
    }

    fn lookup_address(&self, position: Position) -> Option<LogAddress> {
        let block = self.index.partition_point(|(start, _)| *start <= position);
        if block == 0 {
            return None;
        }
        Some(self.index[block - 1].1)
    }

    fn read(&self, address: LogAddress) -> Result<Option<(LoggedEntry, LogAddress)>, LogError> {
        let Some(mut slot) = self.segment_slot(address.segment) else {
            return Ok(None);
        };
        let mut offset = address.offset;
        while offset >= self.segments[slot].bytes {
            if slot + 1 >= self.segments.len() {
                return Ok(None);
            }
            slot += 1;
            offset = 0;
        }
        let segment = &self.segments[slot];
        let mut file = File::open(&segment.path)?;
        file.seek(SeekFrom::Start(offset))?;
        let mut reader = BufReader::new(file);
        let mut line = String::new();
        let read = reader.read_line(&mut line)?;
        if read == 0 {
            return Ok(None);
        }
        let entry: LoggedEntry =
            serde_json::from_str(line.trim_end()).map_err(|_| LogError::Corrupted {
                segment: segment.id,
                offset,
            })?;
        Ok(Some((
            entry,
            LogAddress::new(segment.id, offset + read as u64),
        )))
    }

    fn append(
        &mut self,
        term: Term,
        kind: EntryKind,
        payload: Vec<u8>,
    ) -> Result<Position, LogError> {
        let position = self.last.map(|last| last.position + 1).unwrap_or(0);
        let entry = LoggedEntry::new(position, term, kind, payload);
        check_sequence(self.last, entry.meta())?;
        self.write_entry(&entry)?;
        Ok(position)
    }

    fn append_entry(&mut self, entry: &LoggedEntry) -> Result<(), LogError> {
        check_sequence(self.last, entry.meta())?;
        self.write_entry(entry)
    }

    fn truncate_from(&mut self, position: Position) -> Result<(), LogError> {
        if position < 0 {
            return Err(LogError::InvalidTruncatePosition(position));
        }
        let (Some(first), Some(last)) = (self.first, self.last) else {
            return Ok(());
        };
        if position > last.position {
            return Ok(());
        }
        let address = if position <= first {
            self.first_address()
        } else {
            match self.address_of(position)? {
                Some(address) => address,
                None => return Ok(()),
            }
        };
        let Some(slot) = self.segment_slot(address.segment) else {
            return Ok(());
        };
        for segment in self.segments.drain(slot + 1..) {
            fs::remove_file(&segment.path)?;
        }
        let segment = &mut self.segments[slot];
        let file = OpenOptions::new().write(true).open(&segment.path)?;
        file.set_len(address.offset)?;
        file.sync_all()?;
        segment.bytes = address.offset;

        self.index.retain(|(start, _)| *start < position);
        if position <= first {
            self.first = None;
            self.last = None;
        } else {
            self.last = self.entry_at(position - 1)?.map(|entry| entry.meta());
        }
        warn!(
            "event=log_truncate dir={} from_position={} last_position={:?}",
            self.dir.display(),
            position,
            self.last.map(|meta| meta.position)
        );
        Ok(())
    }
}

fn segment_file_name(id: u64) -> String {
    format!("{SEGMENT_FILE_PREFIX}{id:016x}{SEGMENT_FILE_SUFFIX}")
}

fn discover_segments(dir: &Path) -> Result<Vec<Segment>, LogError> {
    let mut segments = Vec::new();
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        let name = entry.file_name();
        let Some(name) = name.to_str() else {
            continue;
        };
        let Some(id) = name
            .strip_prefix(SEGMENT_FILE_PREFIX)
            .and_then(|rest| rest.strip_suffix(SEGMENT_FILE_SUFFIX))
            .and_then(|hex| u64::from_str_radix(hex, 16).ok())
        else {
            continue;
        };
        let bytes = entry.metadata()?.len();
        segments.push(Segment {
            id,
            path: entry.path(),
            bytes,
        });
    }
    segments.sort_by_key(|segment| segment.id);
    Ok(segments)
}
