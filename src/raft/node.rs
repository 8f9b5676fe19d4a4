use super::election::VoteTally;
use super::membership::latest_configuration_entry;
use super::rpc::{AppendRequest, AppendResponse, RaftRequest, RaftResponse, VoteRequest, VoteResponse};
use super::session::{AppendContext, Exchange, ReplicationSession};
use crate::config::NodeConfig;
use crate::consensus::log::{EntryKind, LoggedEntry, RaftLog};
use crate::membership::{
    Configuration, Endpoint, Member, MemberType, Position, Term, NO_POSITION, NO_TERM,
};
use crate::storage::metadata::PartitionMetadataStore;
use crate::transport::RaftTransport;
use crate::util::error::RaftError;
use log::{debug, info, trace, warn};
use std::collections::BTreeMap;
use std::fmt;
use std::time::Instant;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RaftRole {
    Inactive,
    Follower,
    Candidate,
    Leader,
}

impl RaftRole {
    pub fn is_active(self) -> bool {
        !matches!(self, RaftRole::Inactive)
    }
}

impl fmt::Display for RaftRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            RaftRole::Inactive => "inactive",
            RaftRole::Follower => "follower",
            RaftRole::Candidate => "candidate",
            RaftRole::Leader => "leader",
        };
        f.write_str(label)
    }
}

/// Consensus state machine of one partition replica.
///
/// Driven by a single worker: every method takes `&mut self` and returns
/// without blocking. The node owns the log, the transport, the durable
/// metadata store and one [`ReplicationSession`] per remote member.
///
/// Term and vote live in the metadata store and are saved before the node acts
/// on them.
pub struct RaftNode<L: RaftLog, T: RaftTransport> {
    pub(super) config: NodeConfig,
    pub(super) log: L,
    pub(super) transport: T,
    pub(super) store: PartitionMetadataStore,
    pub(super) role: RaftRole,
    pub(super) member_type: MemberType,
    pub(super) leader: Option<Endpoint>,
    pub(super) commit_position: Position,
    pub(super) configuration: Configuration,
    /// Member list loaded at open; the fallback when truncation removes every
    /// configuration entry.
    pub(super) bootstrap_members: Vec<Member>,
    pub(super) sessions: BTreeMap<Endpoint, ReplicationSession>,
    pub(super) tally: Option<VoteTally>,
    pub(super) last_contact: Option<Instant>,
}

impl<L: RaftLog, T: RaftTransport> RaftNode<L, T> {
    /// Builds an inactive node seeded with the persisted term, vote and members.
    /// Call [`RaftNode::start`] to enter the role matching the own member type;
    /// sessions are only created once the node is active.
    pub fn new(
        config: NodeConfig,
        log: L,
        transport: T,
        store: PartitionMetadataStore,
    ) -> Result<Self, RaftError> {
        let members = store.members();
        let member_type = members
            .iter()
            .find(|member| member.endpoint == config.endpoint)
            .map(|member| member.member_type)
            .unwrap_or(MemberType::Inactive);
        let mut configuration = Configuration::bootstrap(members.clone());
        if let Some(entry) = latest_configuration_entry(&log, Position::MAX)? {
            configuration.position = entry.position;
        }
        info!(
            "event=raft_node_open partition={} endpoint={} term={} member_type={} members={} last_position={}",
            config.partition_label(),
            config.endpoint,
            store.term(),
            member_type,
            members.len(),
            log.last_position()?
        );
        Ok(Self {
            config,
            log,
            transport,
            store,
            role: RaftRole::Inactive,
            member_type,
            leader: None,
            commit_position: NO_POSITION,
            bootstrap_members: members,
            configuration,
            sessions: BTreeMap::new(),
            tally: None,
            last_contact: None,
        })
    }

    /// Enters the role matching the configured own member type.
    pub fn start(&mut self, now: Instant) -> Result<(), RaftError> {
        self.transition_member_type(self.member_type, now)
    }

    pub fn config(&self) -> &NodeConfig {
        &self.config
    }

    pub fn endpoint(&self) -> &Endpoint {
        &self.config.endpoint
    }

    pub fn log(&self) -> &L {
        &self.log
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn store(&self) -> &PartitionMetadataStore {
        &self.store
    }

    pub fn role(&self) -> RaftRole {
        self.role
    }

    pub fn member_type(&self) -> MemberType {
        self.member_type
    }

    pub fn term(&self) -> Term {
        self.store.term()
    }

    pub fn voted_for(&self) -> Option<Endpoint> {
        self.store.voted_for()
    }

    pub fn leader(&self) -> Option<&Endpoint> {
        self.leader.as_ref()
    }

    pub fn is_leader(&self) -> bool {
        self.role == RaftRole::Leader
    }

    pub fn commit_position(&self) -> Position {
        self.commit_position
    }

    pub fn configuration(&self) -> &Configuration {
        &self.configuration
    }

    pub fn members(&self) -> &[Member] {
        &self.configuration.new_members
    }

    pub fn session(&self, endpoint: &Endpoint) -> Option<&ReplicationSession> {
        self.sessions.get(endpoint)
    }

    pub fn sessions(&self) -> impl Iterator<Item = &ReplicationSession> {
        self.sessions.values()
    }

    /// Last time a leader, a granted vote or an own transition reset the
    /// election clock.
    pub fn last_contact(&self) -> Option<Instant> {
        self.last_contact
    }

    /// Adopts `term` when it is newer: persists it, drops the vote and forgets
    /// the leader. Returns whether the term changed.
    pub fn update_term(&mut self, term: Term) -> Result<bool, RaftError> {
        let current = self.term();
        if term <= current {
            return Ok(false);
        }
        self.store.set_term(term);
        self.store.save()?;
        self.leader = None;
        info!(
            "event=raft_term partition={} from={} to={}",
            self.config.partition_label(),
            current,
            term
        );
        Ok(true)
    }

    /// Raises the commit position; lower or equal values are ignored.
    pub fn update_commit_position(&mut self, position: Position) -> bool {
        if position <= self.commit_position {
            return false;
        }
        debug!(
            "event=raft_commit partition={} from={} to={}",
            self.config.partition_label(),
            self.commit_position,
            position
        );
        self.commit_position = position;
        true
    }

    /// Number of ACTIVE members, the local node included when it is active.
    pub fn active_member_count(&self) -> usize {
        let peers = self
            .configuration
            .new_members
            .iter()
            .filter(|member| member.endpoint != self.config.endpoint)
            .filter(|member| member.member_type.is_active())
            .count();
        peers + usize::from(self.member_type.is_active())
    }

    pub fn quorum_size(&self) -> usize {
        self.active_member_count() / 2 + 1
    }

    pub fn is_under_replicated(&self) -> bool {
        self.active_member_count() < self.store.metadata().replication_factor as usize
    }

    /// Applies a change of the local member type: an active member leaves
    /// INACTIVE for FOLLOWER, an inactive one drops to INACTIVE.
    pub fn transition_member_type(
        &mut self,
        member_type: MemberType,
        now: Instant,
    ) -> Result<(), RaftError> {
        self.member_type = member_type;
        if member_type.is_active() {
            if self.role == RaftRole::Inactive {
                return self.transition(RaftRole::Follower, now);
            }
            Ok(())
        } else {
            self.transition(RaftRole::Inactive, now)
        }
    }

    /// Closes the current role and opens `role`. The new role is installed even
    /// when closing fails; that error is returned afterwards.
    ///
    /// Re-entering CANDIDATE starts a new election; other same-role
    /// transitions are no-ops.
    pub fn transition(&mut self, role: RaftRole, now: Instant) -> Result<(), RaftError> {
        if role == self.role && role != RaftRole::Candidate {
            return Ok(());
        }
        if role.is_active() && !self.member_type.is_active() {
            return Err(RaftError::InactiveMember(self.config.endpoint.clone()));
        }
        let previous = self.role;
        let closed = self.close_role(previous);
        if let Err(err) = &closed {
            warn!(
                "event=raft_role_close_failed partition={} role={} error={}",
                self.config.partition_label(),
                previous,
                err
            );
        }
        self.role = role;
        info!(
            "event=raft_transition partition={} from={} to={} term={}",
            self.config.partition_label(),
            previous,
            role,
            self.term()
        );
        let opened = self.open_role(role, now);
        closed.and(opened)
    }

    fn close_role(&mut self, role: RaftRole) -> Result<(), RaftError> {
        match role {
            RaftRole::Candidate => {
                self.tally = None;
                self.cancel_exchanges()
            }
            RaftRole::Leader => {
                if self.leader.as_ref() == Some(&self.config.endpoint) {
                    self.leader = None;
                }
                self.cancel_exchanges()
            }
            RaftRole::Follower | RaftRole::Inactive => Ok(()),
        }
    }

    fn open_role(&mut self, role: RaftRole, now: Instant) -> Result<(), RaftError> {
        match role {
            RaftRole::Inactive => {
                self.tally = None;
                self.sessions.clear();
                Ok(())
            }
            RaftRole::Follower => {
                self.last_contact = Some(now);
                self.ensure_sessions()
            }
            RaftRole::Candidate => self.open_candidate(now),
            RaftRole::Leader => self.open_leader(now),
        }
    }

    /// Cancels every outstanding vote and append. Every session is visited;
    /// the first error is returned.
    fn cancel_exchanges(&mut self) -> Result<(), RaftError> {
        let mut first = None;
        for session in self.sessions.values_mut() {
            if let Err(err) = session.cancel_all(&mut self.transport) {
                warn!(
                    "event=session_cancel_failed partition={} member={} error={}",
                    self.config.partition_label(),
                    session.endpoint(),
                    err
                );
                first.get_or_insert(err);
            }
        }
        match first {
            Some(err) => Err(err.into()),
            None => Ok(()),
        }
    }

    /// Recreates sessions dropped while the node was inactive.
    pub(super) fn ensure_sessions(&mut self) -> Result<(), RaftError> {
        for member in &self.configuration.new_members {
            if member.endpoint == self.config.endpoint || self.sessions.contains_key(&member.endpoint)
            {
                continue;
            }
            let mut session =
                ReplicationSession::new(member.endpoint.clone(), member.member_type, &self.log);
            session.reset_to_last_entry(&self.log)?;
            self.sessions.insert(member.endpoint.clone(), session);
        }
        Ok(())
    }

    fn open_candidate(&mut self, now: Instant) -> Result<(), RaftError> {
        self.ensure_sessions()?;
        self.last_contact = Some(now);
        self.leader = None;
        let term = self.term() + 1;
        self.store.set_term(term);
        self.store.set_voted_for(Some(&self.config.endpoint))?;
        self.store.save()?;

        let mut tally = VoteTally::new(term);
        tally.record(term, &self.config.endpoint, true);
        self.tally = Some(tally);

        let last = self.log.last_entry()?;
        let request = VoteRequest {
            term,
            candidate: self.config.endpoint.clone(),
            last_entry_position: last.map(|meta| meta.position).unwrap_or(NO_POSITION),
            last_entry_term: last.map(|meta| meta.term).unwrap_or(NO_TERM),
        };
        info!(
            "event=raft_election_start partition={} term={} last_position={} last_term={} voters={}",
            self.config.partition_label(),
            term,
            request.last_entry_position,
            request.last_entry_term,
            self.active_member_count()
        );
        for session in self.sessions.values_mut() {
            if session.member_type().is_active() {
                session.send_vote_request(&mut self.transport, request.clone());
            }
        }
        Ok(())
    }

    fn open_leader(&mut self, now: Instant) -> Result<(), RaftError> {
        self.ensure_sessions()?;
        self.tally = None;
        self.last_contact = Some(now);
        self.leader = Some(self.config.endpoint.clone());
        for session in self.sessions.values_mut() {
            session.reset_progress();
            session.reset_to_last_entry(&self.log)?;
        }
        let position = self.log.append(self.term(), EntryKind::Initial, Vec::new())?;
        info!(
            "event=raft_leader_open partition={} term={} initial_position={}",
            self.config.partition_label(),
            self.term(),
            position
        );
        Ok(())
    }

    /// One bounded unit of work for the current role. Returns the amount of
    /// work done; 0 means idle.
    pub fn do_work(&mut self, now: Instant) -> Result<usize, RaftError> {
        match self.role {
            RaftRole::Inactive | RaftRole::Follower => Ok(0),
            RaftRole::Candidate => self.candidate_work(now),
            RaftRole::Leader => self.leader_work(now),
        }
    }

    fn candidate_work(&mut self, now: Instant) -> Result<usize, RaftError> {
        let mut work = 0;
        let mut responses = Vec::new();
        for session in self.sessions.values_mut() {
            let exchange = session.do_vote(&mut self.transport);
            work += exchange.work();
            if let Exchange::Completed(response) = exchange {
                responses.push(response);
            }
        }
        for response in responses {
            self.handle_vote_response(response, now)?;
            if self.role != RaftRole::Candidate {
                return Ok(work + 1);
            }
        }
        let quorum = self.quorum_size();
        let voters = self.active_member_count();
        let (won, lost, rejected) = match &self.tally {
            Some(tally) => (
                tally.has_quorum(quorum),
                tally.is_lost(voters, quorum),
                tally.rejected(),
            ),
            None => (false, false, 0),
        };
        if won {
            self.transition(RaftRole::Leader, now)?;
            work += 1;
        } else if lost {
            info!(
                "event=raft_election_lost partition={} term={} voters={} rejected={} quorum={}",
                self.config.partition_label(),
                self.term(),
                voters,
                rejected,
                quorum
            );
            self.transition(RaftRole::Follower, now)?;
            work += 1;
        }
        Ok(work)
    }

    fn leader_work(&mut self, now: Instant) -> Result<usize, RaftError> {
        let mut work = 0;
        let mut responses = Vec::new();
        {
            let Self {
                log,
                transport,
                sessions,
                ..
            } = &mut *self;
            for session in sessions.values_mut() {
                let exchange = session.do_append(&*log, &mut *transport, now)?;
                work += exchange.work();
                if let Exchange::Completed(response) = exchange {
                    responses.push(response);
                }
            }
        }
        for response in responses {
            self.handle_append_response(response, now)?;
            if self.role != RaftRole::Leader {
                return Ok(work);
            }
        }
        if self.advance_commit_position()? {
            work += 1;
        }

        let term = self.term();
        let commit_position = self.commit_position;
        let Self {
            config,
            log,
            transport,
            sessions,
            ..
        } = &mut *self;
        let context = AppendContext {
            term,
            leader: &config.endpoint,
            commit_position,
        };
        for session in sessions.values_mut() {
            if session.should_append(&*log, now, config.heartbeat_interval)? {
                session.send_append_request(&*log, &mut *transport, context, now)?;
                work += 1;
            }
        }
        Ok(work)
    }

    /// Majority scan over the match positions of ACTIVE members. Only an entry
    /// written in the current term is committed directly.
    fn advance_commit_position(&mut self) -> Result<bool, RaftError> {
        let mut positions: Vec<Position> = self
            .sessions
            .values()
            .filter(|session| session.member_type().is_active())
            .map(ReplicationSession::match_position)
            .collect();
        if self.member_type.is_active() {
            positions.push(self.log.last_position()?);
        }
        let quorum = self.quorum_size();
        if positions.len() < quorum {
            return Ok(false);
        }
        positions.sort_unstable_by(|a, b| b.cmp(a));
        let candidate = positions[quorum - 1];
        if candidate <= self.commit_position {
            return Ok(false);
        }
        match self.log.entry_at(candidate)? {
            Some(entry) if entry.term == self.term() => Ok(self.update_commit_position(candidate)),
            _ => Ok(false),
        }
    }

    fn step_down(&mut self, term: Term, now: Instant) -> Result<(), RaftError> {
        self.update_term(term)?;
        if self.member_type.is_active() {
            self.transition(RaftRole::Follower, now)
        } else {
            Ok(())
        }
    }

    /// Routes an incoming request to its handler.
    pub fn handle_request(
        &mut self,
        request: RaftRequest,
        now: Instant,
    ) -> Result<RaftResponse, RaftError> {
        match request {
            RaftRequest::Vote(request) => self.handle_vote(&request, now).map(RaftResponse::Vote),
            RaftRequest::Append(request) => self
                .handle_append_request(&request, now)
                .map(RaftResponse::Append),
        }
    }

    /// Grants the vote when the request is for the current term, no other
    /// candidate got the vote in this term and the candidate's log is at least
    /// as up to date. The grant is saved before the response is returned.
    pub fn handle_vote(
        &mut self,
        request: &VoteRequest,
        now: Instant,
    ) -> Result<VoteResponse, RaftError> {
        if request.term > self.term() {
            self.step_down(request.term, now)?;
        }
        let term = self.term();
        let vote_free = match self.store.voted_for() {
            Some(voted_for) => voted_for == request.candidate,
            None => true,
        };
        let granted = request.term == term
            && self.member_type.is_active()
            && vote_free
            && self.is_log_up_to_date(request.last_entry_term, request.last_entry_position)?;
        if granted {
            self.store.set_voted_for(Some(&request.candidate))?;
            self.store.save()?;
            self.last_contact = Some(now);
            info!(
                "event=raft_vote_granted partition={} term={} candidate={}",
                self.config.partition_label(),
                term,
                request.candidate
            );
        } else {
            debug!(
                "event=raft_vote_denied partition={} term={} request_term={} candidate={} voted_for={:?}",
                self.config.partition_label(),
                term,
                request.term,
                request.candidate,
                self.store.voted_for()
            );
        }
        Ok(VoteResponse {
            term,
            granted,
            member: self.config.endpoint.clone(),
        })
    }

    fn is_log_up_to_date(&self, last_term: Term, last_position: Position) -> Result<bool, RaftError> {
        let own = match self.log.last_entry()? {
            Some(meta) => (meta.term, meta.position),
            None => (NO_TERM, NO_POSITION),
        };
        Ok((last_term, last_position) >= own)
    }

    /// Records a vote response while campaigning. Newer terms end the campaign.
    pub fn handle_vote_response(
        &mut self,
        response: VoteResponse,
        now: Instant,
    ) -> Result<(), RaftError> {
        if response.term > self.term() {
            return self.step_down(response.term, now);
        }
        if self.role != RaftRole::Candidate {
            trace!(
                "event=raft_vote_response_discarded partition={} member={} role={}",
                self.config.partition_label(),
                response.member,
                self.role
            );
            return Ok(());
        }
        let voter = self
            .sessions
            .get(&response.member)
            .map(|session| session.member_type().is_active())
            .unwrap_or(false);
        if !voter {
            debug!(
                "event=raft_vote_from_non_voter partition={} member={}",
                self.config.partition_label(),
                response.member
            );
            return Ok(());
        }
        if let Some(tally) = self.tally.as_mut() {
            if tally.record(response.term, &response.member, response.granted) {
                debug!(
                    "event=raft_vote_recorded partition={} term={} member={} granted={} total_granted={}",
                    self.config.partition_label(),
                    response.term,
                    response.member,
                    response.granted,
                    tally.granted()
                );
            }
        }
        Ok(())
    }

    /// Applies a leader's append: validates the term and the previous entry,
    /// truncates a conflicting suffix and appends the carried entry.
    pub fn handle_append_request(
        &mut self,
        request: &AppendRequest,
        now: Instant,
    ) -> Result<AppendResponse, RaftError> {
        let term = self.term();
        if request.term < term {
            debug!(
                "event=append_stale_term partition={} term={} request_term={} leader={}",
                self.config.partition_label(),
                term,
                request.term,
                request.leader
            );
            let last = self.log.last_position()?;
            return Ok(self.append_response(false, last));
        }
        if request.term > term {
            self.update_term(request.term)?;
        }
        if matches!(self.role, RaftRole::Candidate | RaftRole::Leader) {
            self.transition(RaftRole::Follower, now)?;
        }
        if self.leader.as_ref() != Some(&request.leader) {
            info!(
                "event=raft_leader partition={} term={} leader={}",
                self.config.partition_label(),
                request.term,
                request.leader
            );
            self.leader = Some(request.leader.clone());
        }
        self.last_contact = Some(now);

        let last_position = self.log.last_position()?;
        let previous = request.previous_entry_position;
        if previous > last_position {
            return Ok(self.reject_append(request, last_position + 1));
        }
        if previous >= 0 {
            let matches = self
                .log
                .entry_at(previous)?
                .map(|entry| entry.term == request.previous_entry_term)
                .unwrap_or(false);
            if !matches {
                return Ok(self.reject_append(request, previous));
            }
        }

        let confirmed = match &request.entry {
            None => previous,
            Some(entry) if entry.position != previous + 1 => {
                return Ok(self.reject_append(request, previous + 1));
            }
            Some(entry) => {
                self.accept_entry(entry, now)?;
                entry.position
            }
        };
        self.update_commit_position(request.commit_position.min(confirmed));
        Ok(self.append_response(true, confirmed))
    }

    fn accept_entry(&mut self, entry: &LoggedEntry, now: Instant) -> Result<(), RaftError> {
        match self.log.entry_at(entry.position)? {
            Some(existing) if existing.term == entry.term => return Ok(()),
            Some(existing) => {
                if entry.position <= self.commit_position {
                    return Err(RaftError::CommitTruncation {
                        position: entry.position,
                        commit_position: self.commit_position,
                    });
                }
                warn!(
                    "event=log_conflict partition={} position={} local_term={} leader_term={}",
                    self.config.partition_label(),
                    entry.position,
                    existing.term,
                    entry.term
                );
                self.log.truncate_from(entry.position)?;
                self.revert_configuration(entry.position, now)?;
            }
            None => {}
        }
        self.log.append_entry(entry)?;
        if entry.kind == EntryKind::Configuration {
            self.apply_configuration_entry(entry, now)?;
        }
        Ok(())
    }

    fn reject_append(&self, request: &AppendRequest, entry_position: Position) -> AppendResponse {
        warn!(
            "event=append_rejected partition={} term={} leader={} previous_position={} previous_term={} entry_position={}",
            self.config.partition_label(),
            request.term,
            request.leader,
            request.previous_entry_position,
            request.previous_entry_term,
            entry_position
        );
        self.append_response(false, entry_position)
    }

    fn append_response(&self, succeeded: bool, entry_position: Position) -> AppendResponse {
        AppendResponse {
            term: self.term(),
            succeeded,
            entry_position,
            member: self.config.endpoint.clone(),
        }
    }

    /// Leader-side handling of an append response: success clears the
    /// member's failures and records its match position, a newer term steps
    /// down, and a rejection counts a failure and backtracks the cursor.
    pub fn handle_append_response(
        &mut self,
        response: AppendResponse,
        now: Instant,
    ) -> Result<(), RaftError> {
        if response.term > self.term() {
            info!(
                "event=raft_newer_term partition={} term={} observed={} member={}",
                self.config.partition_label(),
                self.term(),
                response.term,
                response.member
            );
            return self.step_down(response.term, now);
        }
        if self.role != RaftRole::Leader || response.term < self.term() {
            trace!(
                "event=append_response_discarded partition={} member={} term={} response_term={}",
                self.config.partition_label(),
                response.member,
                self.term(),
                response.term
            );
            return Ok(());
        }
        let Some(session) = self.sessions.get_mut(&response.member) else {
            debug!(
                "event=append_response_unknown_member partition={} member={}",
                self.config.partition_label(),
                response.member
            );
            return Ok(());
        };
        if response.succeeded {
            session.reset_failures();
            session.record_match(response.entry_position);
        } else {
            session.increment_failures();
            session.reset_to_previous_entry(&self.log, response.entry_position)?;
            debug!(
                "event=append_backtrack partition={} member={} rejected_at={} cursor={} failures={}",
                self.config.partition_label(),
                response.member,
                response.entry_position,
                session.current_entry_position(),
                session.failures()
            );
        }
        Ok(())
    }

    /// Appends a data entry in the current term. Leader only.
    pub fn append(&mut self, payload: Vec<u8>) -> Result<Position, RaftError> {
        self.ensure_leader()?;
        Ok(self.log.append(self.term(), EntryKind::Data, payload)?)
    }

    pub(super) fn ensure_leader(&self) -> Result<(), RaftError> {
        if self.role == RaftRole::Leader {
            Ok(())
        } else {
            Err(RaftError::NotLeader {
                leader: self.leader.clone(),
            })
        }
    }
}

impl<L: RaftLog, T: RaftTransport> fmt::Debug for RaftNode<L, T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RaftNode")
            .field("endpoint", &self.config.endpoint)
            .field("role", &self.role)
            .field("term", &self.term())
            .field("leader", &self.leader)
            .field("commit_position", &self.commit_position)
            .field("sessions", &self.sessions.len())
            .finish()
    }
}
