use super::{RaftRequest, RaftResponse, RaftTransport, RequestId, RequestStatus, TransportError};
use crate::membership::Endpoint;
use log::{debug, trace};
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;

#[derive(Debug)]
struct InFlight {
    id: RequestId,
    from: Endpoint,
    to: Endpoint,
    request: RaftRequest,
}

#[derive(Debug, Default)]
struct NetworkState {
    next_id: u64,
    queue: VecDeque<InFlight>,
    outcomes: HashMap<RequestId, RequestStatus<RaftResponse>>,
    /// Requests accepted but not yet resolved; used to tell cancelled or
    /// unknown ids apart from pending ones.
    open: HashSet<RequestId>,
    isolated: HashSet<Endpoint>,
}

/// In-process network shared by every node of a test cluster.
///
/// Requests queue until [`LoopbackNetwork::deliver`] hands them to a handler,
/// which keeps message interleaving under the caller's control.
#[derive(Debug, Clone, Default)]
pub struct LoopbackNetwork {
    state: Arc<Mutex<NetworkState>>,
}

impl LoopbackNetwork {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn transport(&self, local: Endpoint) -> LoopbackTransport {
        LoopbackTransport {
            local,
            network: self.clone(),
        }
    }

    /// Drops every message sent to or from `endpoint` until [`heal`] is called.
    ///
    /// [`heal`]: LoopbackNetwork::heal
    pub fn isolate(&self, endpoint: &Endpoint) {
        self.state.lock().isolated.insert(endpoint.clone());
    }

    pub fn heal(&self, endpoint: &Endpoint) {
        self.state.lock().isolated.remove(endpoint);
    }

    pub fn heal_all(&self) {
        self.state.lock().isolated.clear();
    }

    pub fn queued(&self) -> usize {
        self.state.lock().queue.len()
    }

    /// Routes every queued request through `handler`, which returns the
    /// receiver's response or `None` when nobody listens at the target.
    /// Returns the number of requests taken off the queue.
    ///
    /// The network lock is not held while `handler` runs.
    pub fn deliver<F>(&self, mut handler: F) -> usize
    where
        F: FnMut(&Endpoint, RaftRequest) -> Option<RaftResponse>,
    {
        let batch: Vec<InFlight> = self.state.lock().queue.drain(..).collect();
        let delivered = batch.len();
        for message in batch {
            let dropped = {
                let state = self.state.lock();
                state.isolated.contains(&message.from) || state.isolated.contains(&message.to)
            };
            let outcome = if dropped {
                trace!(
                    "event=loopback_drop id={:?} from={} to={}",
                    message.id,
                    message.from,
                    message.to
                );
                RequestStatus::Failed(TransportError::Dropped(message.to.clone()))
            } else {
                match handler(&message.to, message.request) {
                    Some(response) => RequestStatus::Ready(response),
                    None => RequestStatus::Failed(TransportError::Unreachable(message.to.clone())),
                }
            };
            let mut state = self.state.lock();
            if state.open.contains(&message.id) {
                state.outcomes.insert(message.id, outcome);
            }
        }
        delivered
    }

    /// Delivers until the queue stays empty or `rounds` is exhausted.
    pub fn deliver_all<F>(&self, rounds: usize, mut handler: F) -> usize
    where
        F: FnMut(&Endpoint, RaftRequest) -> Option<RaftResponse>,
    {
        let mut total = 0;
        for _ in 0..rounds {
            let delivered = self.deliver(&mut handler);
            if delivered == 0 {
                break;
            }
            total += delivered;
        }
        total
    }
}

/// One node's handle on a [`LoopbackNetwork`].
#[derive(Debug, Clone)]
pub struct LoopbackTransport {
    local: Endpoint,
    network: LoopbackNetwork,
}

impl LoopbackTransport {
    pub fn local(&self) -> &Endpoint {
        &self.local
    }

    pub fn network(&self) -> &LoopbackNetwork {
        &self.network
    }
}

impl RaftTransport for LoopbackTransport {
    fn send(&mut self, to: &Endpoint, request: RaftRequest) -> Result<RequestId, TransportError> {
        let mut state = self.network.state.lock();
        state.next_id += 1;
        let id = RequestId(state.next_id);
        debug!(
            "event=loopback_send id={:?} from={} to={}",
            id, self.local, to
        );
        state.open.insert(id);
        state.queue.push_back(InFlight {
            id,
            from: self.local.clone(),
            to: to.clone(),
            request,
        });
        Ok(id)
    }

    fn poll(&mut self, id: RequestId) -> RequestStatus<RaftResponse> {
        let mut state = self.network.state.lock();
        match state.outcomes.remove(&id) {
            Some(outcome) => {
                state.open.remove(&id);
                outcome
            }
            None if state.open.contains(&id) => RequestStatus::Pending,
            None => RequestStatus::Failed(TransportError::UnknownRequest(id)),
        }
    }

    fn cancel(&mut self, id: RequestId) -> Result<(), TransportError> {
        let mut state = self.network.state.lock();
        if !state.open.remove(&id) {
            return Err(TransportError::UnknownRequest(id));
        }
        state.outcomes.remove(&id);
        state.queue.retain(|message| message.id != id);
        Ok(())
    }
}
