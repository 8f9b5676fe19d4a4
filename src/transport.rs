//! Non-blocking request/response channel between consensus nodes.

pub mod loopback;

pub use loopback::{LoopbackNetwork, LoopbackTransport};

use crate::membership::Endpoint;
pub use crate::raft::rpc::{RaftRequest, RaftResponse};
use thiserror::Error;

/// Handle for one outstanding request, unique per transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RequestId(pub u64);

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RequestStatus<T> {
    Pending,
    Ready(T),
    Failed(TransportError),
}

/// Fire-and-forget sends whose outcome is polled on a later work step.
///
/// Implementations must eventually resolve every request they accepted, either
/// with a response or with a failure; none of the methods may block.
pub trait RaftTransport {
    fn send(&mut self, to: &Endpoint, request: RaftRequest) -> Result<RequestId, TransportError>;

    /// Returns the request status; `Ready` and `Failed` are returned once.
    fn poll(&mut self, id: RequestId) -> RequestStatus<RaftResponse>;

    /// Releases the request. Responses arriving afterwards are discarded.
    fn cancel(&mut self, id: RequestId) -> Result<(), TransportError>;
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TransportError {
    #[error("endpoint {0} is unreachable")]
    Unreachable(Endpoint),
    #[error("request {0:?} was cancelled")]
    Cancelled(RequestId),
    #[error("unknown request {0:?}")]
    UnknownRequest(RequestId),
    #[error("message to {0} was dropped")]
    Dropped(Endpoint),
}
