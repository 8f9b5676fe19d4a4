//! Membership reconfiguration of a running node.

use super::node::RaftNode;
use super::session::ReplicationSession;
use crate::consensus::log::{EntryKind, LogError, LoggedEntry, RaftLog};
use crate::membership::{Configuration, Endpoint, Member, MemberType, Position, NO_POSITION};
use crate::transport::RaftTransport;
use crate::util::error::RaftError;
use log::{info, warn};
use std::collections::BTreeMap;
use std::time::Instant;

impl<L: RaftLog, T: RaftTransport> RaftNode<L, T> {
    /// Reconciles sessions with `configuration`, switches role when the own
    /// member type changed, and persists the member list.
    ///
    /// New members start with their cursor on the last local entry. Sessions
    /// of removed members are cancelled first; a failed cancellation is logged
    /// and the member is removed anyway.
    pub fn configure(
        &mut self,
        configuration: Configuration,
        now: Instant,
    ) -> Result<(), RaftError> {
        let own = self.config.endpoint.clone();
        let own_type = configuration
            .member(&own)
            .map(|member| member.member_type)
            .unwrap_or(MemberType::Inactive);
        let type_changed = own_type != self.member_type;

        // an inactive node keeps no sessions
        let keep_sessions = self.role.is_active() && own_type.is_active();
        let mut sessions = BTreeMap::new();
        let peers = configuration
            .new_members
            .iter()
            .filter(|member| keep_sessions && member.endpoint != own);
        for member in peers {
            let session = match self.sessions.get(&member.endpoint) {
                Some(existing) => {
                    let mut session = existing.clone();
                    session.set_member_type(member.member_type);
                    session
                }
                None => {
                    let mut session = ReplicationSession::new(
                        member.endpoint.clone(),
                        member.member_type,
                        &self.log,
                    );
                    session.reset_to_last_entry(&self.log)?;
                    info!(
                        "event=member_added partition={} member={} type={}",
                        self.config.partition_label(),
                        member.endpoint,
                        member.member_type
                    );
                    session
                }
            };
            sessions.insert(member.endpoint.clone(), session);
        }

        let previous = std::mem::replace(&mut self.sessions, sessions);
        for (endpoint, mut session) in previous {
            if self.sessions.contains_key(&endpoint) {
                continue;
            }
            if let Err(err) = session.cancel_all(&mut self.transport) {
                warn!(
                    "event=member_cancel_failed partition={} member={} error={}",
                    self.config.partition_label(),
                    endpoint,
                    err
                );
            }
            if !configuration.contains(&endpoint) {
                info!(
                    "event=member_removed partition={} member={}",
                    self.config.partition_label(),
                    endpoint
                );
            }
        }

        info!(
            "event=configuration_applied partition={} position={} members={} own_type={}",
            self.config.partition_label(),
            configuration.position,
            configuration.new_members.len(),
            own_type
        );
        self.configuration = configuration;

        let transitioned = if type_changed {
            self.transition_member_type(own_type, now)
        } else {
            Ok(())
        };

        self.store.clear_members();
        for member in &self.configuration.new_members {
            self.store.add_member(member);
        }
        self.store.save()?;
        transitioned
    }

    /// Appends a configuration entry carrying `members` and applies it.
    /// Leader only; returns the entry position.
    pub fn propose_configuration(
        &mut self,
        members: Vec<Member>,
        now: Instant,
    ) -> Result<Position, RaftError> {
        self.ensure_leader()?;
        let payload = serde_json::to_vec(&members)?;
        let position = self
            .log
            .append(self.term(), EntryKind::Configuration, payload)?;
        let old_members = self.configuration.new_members.clone();
        self.configure(Configuration::new(position, members, old_members), now)?;
        Ok(position)
    }

    /// Applies a configuration entry received from the leader.
    pub(super) fn apply_configuration_entry(
        &mut self,
        entry: &LoggedEntry,
        now: Instant,
    ) -> Result<(), RaftError> {
        let members: Vec<Member> = serde_json::from_slice(&entry.payload)?;
        let old_members = self.configuration.new_members.clone();
        self.configure(Configuration::new(entry.position, members, old_members), now)
    }

    /// Falls back to the newest configuration entry below `truncated_from` once
    /// the entry carrying the applied configuration was truncated. Without one,
    /// the member list loaded at open applies again.
    pub(super) fn revert_configuration(
        &mut self,
        truncated_from: Position,
        now: Instant,
    ) -> Result<(), RaftError> {
        if self.configuration.position < truncated_from {
            return Ok(());
        }
        let (position, members) = match latest_configuration_entry(&self.log, truncated_from)? {
            Some(entry) => (entry.position, serde_json::from_slice(&entry.payload)?),
            None => (NO_POSITION, self.bootstrap_members.clone()),
        };
        warn!(
            "event=configuration_reverted partition={} truncated={} from={} to={}",
            self.config.partition_label(),
            truncated_from,
            self.configuration.position,
            position
        );
        let old_members = self.configuration.new_members.clone();
        self.configure(Configuration::new(position, members, old_members), now)
    }

    /// Adds `member`, or updates its type when it is already configured.
    pub fn join(&mut self, member: Member, now: Instant) -> Result<Position, RaftError> {
        let mut members = self.configuration.new_members.clone();
        match members.iter_mut().find(|m| m.endpoint == member.endpoint) {
            Some(existing) => existing.member_type = member.member_type,
            None => members.push(member),
        }
        self.propose_configuration(members, now)
    }

    pub fn leave(&mut self, endpoint: &Endpoint, now: Instant) -> Result<Position, RaftError> {
        if !self.configuration.contains(endpoint) {
            return Err(RaftError::UnknownMember(endpoint.clone()));
        }
        let members = self
            .configuration
            .new_members
            .iter()
            .filter(|member| &member.endpoint != endpoint)
            .cloned()
            .collect();
        self.propose_configuration(members, now)
    }

    pub fn promote(&mut self, endpoint: &Endpoint, now: Instant) -> Result<Position, RaftError> {
        self.change_member_type(endpoint, MemberType::Active, now)
    }

    pub fn demote(&mut self, endpoint: &Endpoint, now: Instant) -> Result<Position, RaftError> {
        self.change_member_type(endpoint, MemberType::Inactive, now)
    }

    fn change_member_type(
        &mut self,
        endpoint: &Endpoint,
        member_type: MemberType,
        now: Instant,
    ) -> Result<Position, RaftError> {
        if !self.configuration.contains(endpoint) {
            return Err(RaftError::UnknownMember(endpoint.clone()));
        }
        self.join(Member::new(endpoint.clone(), member_type), now)
    }
}

/// Newest configuration entry positioned before `before`.
pub(crate) fn latest_configuration_entry<L: RaftLog + ?Sized>(
    log: &L,
    before: Position,
) -> Result<Option<LoggedEntry>, LogError> {
    let mut latest = None;
    let mut address = log.first_address();
    while let Some((entry, next)) = log.read(address)? {
        if entry.position >= before {
            break;
        }
        if entry.kind == EntryKind::Configuration {
            latest = Some(entry);
        }
        address = next;
    }
    Ok(latest)
}
