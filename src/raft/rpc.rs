use crate::consensus::log::LoggedEntry;
use crate::membership::{Endpoint, Position, Term};
use serde::{Deserialize, Serialize};
use thiserror::Error;

const FRAME_VERSION: u8 = 1;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VoteRequest {
    pub term: Term,
    pub candidate: Endpoint,
    pub last_entry_position: Position,
    pub last_entry_term: Term,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VoteResponse {
    pub term: Term,
    pub granted: bool,
    /// Endpoint of the responding member.
    pub member: Endpoint,
}

/// Leader append. `entry == None` is a heartbeat that only checks the previous
/// entry and carries the commit position.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppendRequest {
    pub term: Term,
    pub leader: Endpoint,
    pub commit_position: Position,
    pub previous_entry_position: Position,
    pub previous_entry_term: Term,
    pub entry: Option<LoggedEntry>,
}

impl AppendRequest {
    pub fn is_heartbeat(&self) -> bool {
        self.entry.is_none()
    }
}

/// On success `entry_position` is the highest position the follower now
/// shares with the leader; on rejection it is where the logs diverge.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppendResponse {
    pub term: Term,
    pub succeeded: bool,
    pub entry_position: Position,
    pub member: Endpoint,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum RaftRequest {
    Vote(VoteRequest),
    Append(AppendRequest),
}

impl RaftRequest {
    pub fn encode(&self) -> Result<Vec<u8>, FrameError> {
        encode_frame(self)
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, FrameError> {
        decode_frame(bytes)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum RaftResponse {
    Vote(VoteResponse),
    Append(AppendResponse),
}

impl RaftResponse {
    pub fn encode(&self) -> Result<Vec<u8>, FrameError> {
        encode_frame(self)
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, FrameError> {
        decode_frame(bytes)
    }
}

/// Version byte followed by the JSON body.
fn encode_frame<M: Serialize>(message: &M) -> Result<Vec<u8>, FrameError> {
    let body = serde_json::to_vec(message)?;
    let mut buf = Vec::with_capacity(body.len() + 1);
    buf.push(FRAME_VERSION);
    buf.extend_from_slice(&body);
    Ok(buf)
}

fn decode_frame<M: for<'de> Deserialize<'de>>(bytes: &[u8]) -> Result<M, FrameError> {
    let (&version, body) = bytes.split_first().ok_or(FrameError::Truncated)?;
    if version != FRAME_VERSION {
        return Err(FrameError::InvalidVersion {
            observed: version,
            expected: FRAME_VERSION,
        });
    }
    Ok(serde_json::from_slice(body)?)
}

#[derive(Debug, Error)]
pub enum FrameError {
    #[error("frame truncated")]
    Truncated,
    #[error("invalid frame version {observed}, expected {expected}")]
    InvalidVersion { observed: u8, expected: u8 },
    #[error("invalid frame body: {0}")]
    Body(#[from] serde_json::Error),
}
