use crate::membership::{Endpoint, Member, MemberType, Term};
use log::{debug, warn};
use serde::{Deserialize, Serialize};
use std::ffi::OsString;
use std::fs::{self, File};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use thiserror::Error;

/// `rename(2)` across filesystems (Linux/macOS errno).
const EXDEV: i32 = 18;

/// One persisted member: `{host, port}` plus the member type.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemberRecord {
    pub host: String,
    pub port: u16,
    #[serde(rename = "type", default = "default_member_type")]
    pub member_type: MemberType,
}

fn default_member_type() -> MemberType {
    MemberType::Active
}

impl From<&Member> for MemberRecord {
    fn from(member: &Member) -> Self {
        Self {
            host: member.endpoint.host.clone(),
            port: member.endpoint.port,
            member_type: member.member_type,
        }
    }
}

impl MemberRecord {
    pub fn endpoint(&self) -> Endpoint {
        Endpoint::new(self.host.clone(), self.port)
    }

    pub fn to_member(&self) -> Member {
        Member::new(self.endpoint(), self.member_type)
    }
}

/// Consensus metadata persisted per partition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PartitionMetadata {
    pub topic_name: String,
    pub partition_id: u32,
    pub replication_factor: u32,
    pub segment_size: u64,
    pub term: Term,
    #[serde(default)]
    pub voted_for_host: Option<String>,
    #[serde(default)]
    pub voted_for_port: Option<u16>,
    #[serde(default)]
    pub members: Vec<MemberRecord>,
}

impl PartitionMetadata {
    pub fn new(
        topic_name: impl Into<String>,
        partition_id: u32,
        replication_factor: u32,
        segment_size: u64,
    ) -> Self {
        Self {
            topic_name: topic_name.into(),
            partition_id,
            replication_factor,
            segment_size,
            term: 0,
            voted_for_host: None,
            voted_for_port: None,
            members: Vec::new(),
        }
    }

    pub fn voted_for(&self) -> Option<Endpoint> {
        match (&self.voted_for_host, self.voted_for_port) {
            (Some(host), Some(port)) => Some(Endpoint::new(host.clone(), port)),
            _ => None,
        }
    }
}

/// Crash-safe JSON file holding a partition's [`PartitionMetadata`].
///
/// Mutators only touch the in-memory copy; callers decide when to [`save`]
/// (a vote must be saved before the grant is sent).
///
/// [`save`]: PartitionMetadataStore::save
#[derive(Debug, Clone)]
pub struct PartitionMetadataStore {
    path: PathBuf,
    tmp_path: PathBuf,
    metadata: PartitionMetadata,
}

impl PartitionMetadataStore {
    /// Creates a store seeded with `defaults`; nothing is read or written.
    pub fn new(path: impl Into<PathBuf>, defaults: PartitionMetadata) -> Self {
        let path = path.into();
        let tmp_path = tmp_path_for(&path);
        Self {
            path,
            tmp_path,
            metadata: defaults,
        }
    }

    /// Creates the store and loads the backing file when it exists.
    pub fn open(
        path: impl Into<PathBuf>,
        defaults: PartitionMetadata,
    ) -> Result<Self, MetadataError> {
        let mut store = Self::new(path, defaults);
        store.load()?;
        Ok(store)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn tmp_path(&self) -> &Path {
        &self.tmp_path
    }

    pub fn metadata(&self) -> &PartitionMetadata {
        &self.metadata
    }

    /// Reads the live file into memory. A missing file keeps the current
    /// (default) state and returns `false`.
    pub fn load(&mut self) -> Result<bool, MetadataError> {
        match fs::read(&self.path) {
            Ok(bytes) => {
                self.metadata = serde_json::from_slice(&bytes)?;
                debug!(
                    "event=metadata_load path={} term={} members={}",
                    self.path.display(),
                    self.metadata.term,
                    self.metadata.members.len()
                );
                Ok(true)
            }
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(false),
            Err(err) => Err(MetadataError::Io(err)),
        }
    }

    /// Writes temp file, syncs it, then renames it over the live file.
    pub fn save(&self) -> Result<(), MetadataError> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        let payload = serde_json::to_vec_pretty(&self.metadata)?;
        let mut file = File::create(&self.tmp_path)?;
        file.write_all(&payload)?;
        file.sync_all()?;
        drop(file);
        match fs::rename(&self.tmp_path, &self.path) {
            Ok(()) => Ok(()),
            Err(err) if rename_unsupported(&err) => {
                warn!(
                    "event=metadata_save_non_atomic path={} error={}",
                    self.path.display(),
                    err
                );
                fs::copy(&self.tmp_path, &self.path)?;
                File::open(&self.path)?.sync_all()?;
                fs::remove_file(&self.tmp_path)?;
                Ok(())
            }
            Err(err) => Err(MetadataError::Io(err)),
        }
    }

    /// Removes the live and temp files. Used when the partition is decommissioned.
    pub fn delete(&self) -> Result<(), MetadataError> {
        for path in [&self.path, &self.tmp_path] {
            match fs::remove_file(path) {
                Ok(()) => {}
                Err(err) if err.kind() == io::ErrorKind::NotFound => {}
                Err(err) => return Err(MetadataError::Io(err)),
            }
        }
        Ok(())
    }

    pub fn term(&self) -> Term {
        self.metadata.term
    }

    /// Sets the term; moving to a different term drops the recorded vote.
    pub fn set_term(&mut self, term: Term) {
        if term != self.metadata.term {
            self.metadata.term = term;
            self.metadata.voted_for_host = None;
            self.metadata.voted_for_port = None;
        }
    }

    pub fn voted_for(&self) -> Option<Endpoint> {
        self.metadata.voted_for()
    }

    /// Records the vote for the current term. A second, different vote in the
    /// same term is rejected before anything changes.
    pub fn set_voted_for(&mut self, candidate: Option<&Endpoint>) -> Result<(), MetadataError> {
        if let (Some(existing), Some(candidate)) = (self.voted_for(), candidate) {
            if &existing != candidate {
                return Err(MetadataError::VoteConflict {
                    term: self.metadata.term,
                    voted_for: existing,
                    candidate: candidate.clone(),
                });
            }
        }
        self.metadata.voted_for_host = candidate.map(|c| c.host.clone());
        self.metadata.voted_for_port = candidate.map(|c| c.port);
        Ok(())
    }

    pub fn members(&self) -> Vec<Member> {
        self.metadata
            .members
            .iter()
            .map(MemberRecord::to_member)
            .collect()
    }

    /// Adds or updates a member, keyed by endpoint.
    pub fn add_member(&mut self, member: &Member) {
        let record = MemberRecord::from(member);
        match self
            .metadata
            .members
            .iter_mut()
            .find(|existing| existing.host == record.host && existing.port == record.port)
        {
            Some(existing) => existing.member_type = record.member_type,
            None => self.metadata.members.push(record),
        }
    }

    pub fn remove_member(&mut self, endpoint: &Endpoint) -> bool {
        let before = self.metadata.members.len();
        self.metadata
            .members
            .retain(|record| !(record.host == endpoint.host && record.port == endpoint.port));
        before != self.metadata.members.len()
    }

    pub fn clear_members(&mut self) {
        self.metadata.members.clear();
    }
}

fn tmp_path_for(path: &Path) -> PathBuf {
    let mut name = path
        .file_name()
        .map(OsString::from)
        .unwrap_or_else(|| OsString::from("metadata"));
    name.push(".tmp");
    path.with_file_name(name)
}

fn rename_unsupported(err: &io::Error) -> bool {
    err.kind() == io::ErrorKind::Unsupported || err.raw_os_error() == Some(EXDEV)
}

#[derive(Debug, Error)]
pub enum MetadataError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("already voted for {voted_for} in term {term}, refusing {candidate}")]
    VoteConflict {
        term: Term,
        voted_for: Endpoint,
        candidate: Endpoint,
    },
}
