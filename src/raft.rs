//! Raft replication core: the per-partition node, its peer sessions, election
//! timing and the worker that drives it.

pub mod election;
pub mod membership;
pub mod node;
pub mod rpc;
pub mod session;
pub mod worker;

pub use election::{ElectionController, ElectionTimer, VoteTally};
pub use node::{RaftNode, RaftRole};
pub use rpc::{
    AppendRequest, AppendResponse, FrameError, RaftRequest, RaftResponse, VoteRequest,
    VoteResponse,
};
pub use session::{AppendContext, Exchange, ReplicationSession};
pub use worker::PartitionWorker;
