use crate::consensus::log::LogError;
use crate::membership::{Endpoint, Position};
use crate::storage::metadata::MetadataError;
use crate::transport::TransportError;
use thiserror::Error;

/// Hard failures surfaced by a consensus node to its owner.
///
/// Protocol disagreements (stale terms, log mismatches) never show up here;
/// they travel as regular responses.
#[derive(Debug, Error)]
pub enum RaftError {
    #[error(transparent)]
    Metadata(#[from] MetadataError),
    #[error(transparent)]
    Log(#[from] LogError),
    #[error(transparent)]
    Transport(#[from] TransportError),
    #[error("configuration payload error: {0}")]
    Encoding(#[from] serde_json::Error),
    #[error("not the leader (known leader: {leader:?})")]
    NotLeader { leader: Option<Endpoint> },
    #[error("member {0} is not active")]
    InactiveMember(Endpoint),
    #[error("refusing to truncate committed position {position} (commit position {commit_position})")]
    CommitTruncation {
        position: Position,
        commit_position: Position,
    },
    #[error("unknown member {0}")]
    UnknownMember(Endpoint),
}
