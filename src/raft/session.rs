use super::rpc::{AppendRequest, AppendResponse, VoteRequest, VoteResponse};
use crate::consensus::log::{LogError, LogReader, LoggedEntry, RaftLog};
use crate::membership::{Endpoint, MemberType, Position, Term, NO_POSITION, NO_TERM};
use crate::transport::{
    RaftRequest, RaftResponse, RaftTransport, RequestId, RequestStatus, TransportError,
};
use log::{debug, trace, warn};
use std::time::{Duration, Instant};

/// Outcome of advancing one request/response exchange by a single step.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Exchange<T> {
    /// Nothing outstanding.
    Idle,
    Pending,
    Completed(T),
    Failed(TransportError),
}

impl<T> Exchange<T> {
    pub fn work(&self) -> usize {
        match self {
            Exchange::Completed(_) | Exchange::Failed(_) => 1,
            Exchange::Idle | Exchange::Pending => 0,
        }
    }
}

/// Leader state an append request is stamped with.
#[derive(Debug, Clone, Copy)]
pub struct AppendContext<'a> {
    pub term: Term,
    pub leader: &'a Endpoint,
    pub commit_position: Position,
}

#[derive(Debug, Clone, Copy)]
struct OpenAppend {
    id: RequestId,
    /// Position of the carried entry; `None` for heartbeats.
    entry_position: Option<Position>,
}

/// Replication and voting state the local node keeps for one remote member.
///
/// The session owns its log cursor but not the log or the transport; both are
/// passed in by the node on every call.
#[derive(Debug, Clone)]
pub struct ReplicationSession {
    endpoint: Endpoint,
    member_type: MemberType,
    reader: LogReader,
    current_entry_position: Position,
    current_entry_term: Term,
    match_position: Position,
    failures: u32,
    last_activity: Option<Instant>,
    vote: Option<RequestId>,
    append: Option<OpenAppend>,
}

impl ReplicationSession {
    pub fn new<L: RaftLog + ?Sized>(endpoint: Endpoint, member_type: MemberType, log: &L) -> Self {
        Self {
            endpoint,
            member_type,
            reader: LogReader::new(log),
            current_entry_position: NO_POSITION,
            current_entry_term: NO_TERM,
            match_position: NO_POSITION,
            failures: 0,
            last_activity: None,
            vote: None,
            append: None,
        }
    }

    pub fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    pub fn member_type(&self) -> MemberType {
        self.member_type
    }

    pub fn set_member_type(&mut self, member_type: MemberType) {
        self.member_type = member_type;
    }

    pub fn current_entry_position(&self) -> Position {
        self.current_entry_position
    }

    pub fn current_entry_term(&self) -> Term {
        self.current_entry_term
    }

    pub fn match_position(&self) -> Position {
        self.match_position
    }

    pub fn record_match(&mut self, position: Position) {
        if position > self.match_position {
            self.match_position = position;
        }
    }

    pub fn failures(&self) -> u32 {
        self.failures
    }

    pub fn increment_failures(&mut self) {
        self.failures = self.failures.saturating_add(1);
    }

    pub fn reset_failures(&mut self) {
        self.failures = 0;
    }

    pub fn last_activity(&self) -> Option<Instant> {
        self.last_activity
    }

    /// Forgets everything learned about the peer; used when a new leader term starts.
    pub fn reset_progress(&mut self) {
        self.match_position = NO_POSITION;
        self.failures = 0;
        self.last_activity = None;
    }

    pub fn is_vote_open(&self) -> bool {
        self.vote.is_some()
    }

    pub fn is_append_open(&self) -> bool {
        self.append.is_some()
    }

    // --- vote -------------------------------------------------------------

    /// Opens a vote exchange, replacing any exchange still outstanding.
    /// Returns `false` when the transport refused the request.
    pub fn send_vote_request<T: RaftTransport + ?Sized>(
        &mut self,
        transport: &mut T,
        request: VoteRequest,
    ) -> bool {
        if let Err(err) = self.cancel_vote_request(transport) {
            warn!(
                "event=vote_cancel_failed member={} error={}",
                self.endpoint, err
            );
        }
        debug!(
            "event=vote_send member={} term={} last_position={} last_term={}",
            self.endpoint, request.term, request.last_entry_position, request.last_entry_term
        );
        match transport.send(&self.endpoint, RaftRequest::Vote(request)) {
            Ok(id) => {
                self.vote = Some(id);
                true
            }
            Err(err) => {
                warn!("event=vote_send_failed member={} error={}", self.endpoint, err);
                false
            }
        }
    }

    pub fn do_vote<T: RaftTransport + ?Sized>(&mut self, transport: &mut T) -> Exchange<VoteResponse> {
        let Some(id) = self.vote else {
            return Exchange::Idle;
        };
        match transport.poll(id) {
            RequestStatus::Pending => Exchange::Pending,
            RequestStatus::Ready(RaftResponse::Vote(response)) => {
                self.vote = None;
                Exchange::Completed(response)
            }
            RequestStatus::Ready(other) => {
                self.vote = None;
                warn!(
                    "event=vote_unexpected_response member={} response={:?}",
                    self.endpoint, other
                );
                Exchange::Failed(TransportError::Dropped(self.endpoint.clone()))
            }
            RequestStatus::Failed(err) => {
                self.vote = None;
                debug!("event=vote_failed member={} error={}", self.endpoint, err);
                Exchange::Failed(err)
            }
        }
    }

    pub fn cancel_vote_request<T: RaftTransport + ?Sized>(
        &mut self,
        transport: &mut T,
    ) -> Result<(), TransportError> {
        match self.vote.take() {
            Some(id) => transport.cancel(id),
            None => Ok(()),
        }
    }

    // --- append -----------------------------------------------------------

    /// True when new data can be sent to a healthy peer, or the heartbeat
    /// interval elapsed since the last contact. Never while an append is open.
    pub fn should_append<L: RaftLog + ?Sized>(
        &self,
        log: &L,
        now: Instant,
        heartbeat_interval: Duration,
    ) -> Result<bool, LogError> {
        if self.append.is_some() {
            return Ok(false);
        }
        let heartbeat_due = self
            .last_activity
            .map(|last| now.saturating_duration_since(last) >= heartbeat_interval)
            .unwrap_or(true);
        if heartbeat_due {
            return Ok(true);
        }
        Ok(self.failures == 0 && self.has_next_entry(log)?)
    }

    /// Sends the entry after the cursor, or a heartbeat when the peer is caught
    /// up or still failing. Returns `false` when the transport refused it; the
    /// refusal counts as a failure.
    pub fn send_append_request<L: RaftLog + ?Sized, T: RaftTransport + ?Sized>(
        &mut self,
        log: &L,
        transport: &mut T,
        context: AppendContext<'_>,
        now: Instant,
    ) -> Result<bool, LogError> {
        let previous_entry_position = self.current_entry_position;
        let previous_entry_term = self.current_entry_term;
        let entry = if self.failures == 0 {
            self.next_entry(log)?
        } else {
            None
        };
        let entry_position = entry.as_ref().map(|entry| entry.position);
        let request = AppendRequest {
            term: context.term,
            leader: context.leader.clone(),
            commit_position: context.commit_position,
            previous_entry_position,
            previous_entry_term,
            entry,
        };
        match entry_position {
            Some(position) => debug!(
                "event=append_send member={} term={} position={} previous={}",
                self.endpoint, context.term, position, previous_entry_position
            ),
            None => trace!(
                "event=heartbeat_send member={} term={} previous={} failures={}",
                self.endpoint,
                context.term,
                previous_entry_position,
                self.failures
            ),
        }
        self.last_activity = Some(now);
        match transport.send(&self.endpoint, RaftRequest::Append(request)) {
            Ok(id) => {
                self.append = Some(OpenAppend { id, entry_position });
                Ok(true)
            }
            Err(err) => {
                warn!(
                    "event=append_send_failed member={} error={} failures={}",
                    self.endpoint,
                    err,
                    self.failures + 1
                );
                self.increment_failures();
                self.rewind_unsent(log, entry_position)?;
                Ok(false)
            }
        }
    }

    /// Polls the open append. A failed exchange counts as a failure and moves
    /// the cursor back so the entry is sent again.
    pub fn do_append<L: RaftLog + ?Sized, T: RaftTransport + ?Sized>(
        &mut self,
        log: &L,
        transport: &mut T,
        now: Instant,
    ) -> Result<Exchange<AppendResponse>, LogError> {
        let Some(open) = self.append else {
            return Ok(Exchange::Idle);
        };
        let failure = match transport.poll(open.id) {
            RequestStatus::Pending => return Ok(Exchange::Pending),
            RequestStatus::Ready(RaftResponse::Append(response)) => {
                self.append = None;
                self.last_activity = Some(now);
                return Ok(Exchange::Completed(response));
            }
            RequestStatus::Ready(other) => {
                warn!(
                    "event=append_unexpected_response member={} response={:?}",
                    self.endpoint, other
                );
                TransportError::Dropped(self.endpoint.clone())
            }
            RequestStatus::Failed(err) => err,
        };
        self.append = None;
        debug!(
            "event=append_failed member={} error={} failures={}",
            self.endpoint,
            failure,
            self.failures + 1
        );
        self.increment_failures();
        self.rewind_unsent(log, open.entry_position)?;
        Ok(Exchange::Failed(failure))
    }

    pub fn cancel_append_request<T: RaftTransport + ?Sized>(
        &mut self,
        transport: &mut T,
    ) -> Result<(), TransportError> {
        match self.append.take() {
            Some(open) => transport.cancel(open.id),
            None => Ok(()),
        }
    }

    /// Cancels both exchanges; the first error is returned after both ran.
    pub fn cancel_all<T: RaftTransport + ?Sized>(
        &mut self,
        transport: &mut T,
    ) -> Result<(), TransportError> {
        let vote = self.cancel_vote_request(transport);
        let append = self.cancel_append_request(transport);
        vote.and(append)
    }

    fn rewind_unsent<L: RaftLog + ?Sized>(
        &mut self,
        log: &L,
        entry_position: Option<Position>,
    ) -> Result<(), LogError> {
        match entry_position {
            Some(position) => self.reset_to_previous_entry(log, position),
            None => Ok(()),
        }
    }

    // --- cursor -----------------------------------------------------------

    pub fn has_next_entry<L: RaftLog + ?Sized>(&self, log: &L) -> Result<bool, LogError> {
        self.reader.has_next(log)
    }

    /// Reads the entry after the cursor and makes it the current entry.
    pub fn next_entry<L: RaftLog + ?Sized>(
        &mut self,
        log: &L,
    ) -> Result<Option<LoggedEntry>, LogError> {
        let entry = self.reader.next(log)?;
        if let Some(entry) = &entry {
            self.current_entry_position = entry.position;
            self.current_entry_term = entry.term;
        }
        Ok(entry)
    }

    /// Moves the cursor onto the last entry strictly before `position`: one
    /// index lookup, then a forward scan over at most one index block. With no
    /// such entry the cursor goes back before the first entry.
    pub fn reset_to_previous_entry<L: RaftLog + ?Sized>(
        &mut self,
        log: &L,
        position: Position,
    ) -> Result<(), LogError> {
        self.current_entry_position = NO_POSITION;
        self.current_entry_term = NO_TERM;
        let start = if position > 0 {
            log.lookup_address(position - 1)
        } else {
            None
        };
        let mut resume = None;
        if let Some(mut address) = start {
            while let Some((entry, next)) = log.read(address)? {
                if entry.position >= position {
                    break;
                }
                self.current_entry_position = entry.position;
                self.current_entry_term = entry.term;
                resume = Some(next);
                address = next;
            }
        }
        match resume {
            Some(next) => self.reader.set_address(next),
            None => self.reader.seek_to_first(log),
        }
        debug!(
            "event=session_backtrack member={} from={} to={}",
            self.endpoint, position, self.current_entry_position
        );
        Ok(())
    }

    /// Moves the cursor onto the last entry, so only later appends are sent.
    pub fn reset_to_last_entry<L: RaftLog + ?Sized>(&mut self, log: &L) -> Result<(), LogError> {
        match log.last_entry()? {
            Some(last) => {
                self.current_entry_position = last.position;
                self.current_entry_term = last.term;
            }
            None => {
                self.current_entry_position = NO_POSITION;
                self.current_entry_term = NO_TERM;
            }
        }
        self.reader.seek_to_end(log);
        Ok(())
    }
}
