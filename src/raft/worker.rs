use super::election::{ElectionController, ElectionTimer};
use super::node::{RaftNode, RaftRole};
use crate::consensus::log::RaftLog;
use crate::transport::RaftTransport;
use crate::util::backoff::IdleBackoff;
use crate::util::error::RaftError;
use log::{error, info, warn};
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::Instant;

/// Cooperative driver of one partition: fires elections when the leader goes
/// quiet and hands the rest of each tick to [`RaftNode::do_work`].
pub struct PartitionWorker<L: RaftLog, T: RaftTransport> {
    node: RaftNode<L, T>,
    election: ElectionController,
    timer: ElectionTimer,
    observed_contact: Option<Instant>,
    backoff: IdleBackoff,
}

impl<L: RaftLog, T: RaftTransport> PartitionWorker<L, T> {
    pub fn new(node: RaftNode<L, T>, now: Instant) -> Self {
        let config = node.config();
        let mut election = ElectionController::new(
            config.election_timeout_min,
            config.election_timeout_max,
            config.election_seed,
        );
        let timer = election.start_timer(now);
        Self {
            node,
            election,
            timer,
            observed_contact: None,
            backoff: IdleBackoff::default(),
        }
    }

    pub fn with_backoff(mut self, backoff: IdleBackoff) -> Self {
        self.backoff = backoff;
        self
    }

    pub fn node(&self) -> &RaftNode<L, T> {
        &self.node
    }

    pub fn node_mut(&mut self) -> &mut RaftNode<L, T> {
        &mut self.node
    }

    pub fn into_node(self) -> RaftNode<L, T> {
        self.node
    }

    pub fn timer(&self) -> &ElectionTimer {
        &self.timer
    }

    /// One scheduler tick. Returns the work done; 0 means idle.
    pub fn tick(&mut self, now: Instant) -> Result<usize, RaftError> {
        self.observe_contact();
        let mut work = 0;
        let campaigning = matches!(self.node.role(), RaftRole::Follower | RaftRole::Candidate);
        if campaigning && self.timer.expired(now) {
            info!(
                "event=election_timeout partition={} role={} term={} timeout_ms={}",
                self.node.config().partition_label(),
                self.node.role(),
                self.node.term(),
                self.timer.timeout().as_millis()
            );
            let transitioned = self.node.transition(RaftRole::Candidate, now);
            self.observe_contact();
            transitioned?;
            work += 1;
        }
        work += self.node.do_work(now)?;
        Ok(work)
    }

    /// Restarts the election clock whenever the node saw a leader, granted a
    /// vote or changed role since the last tick.
    fn observe_contact(&mut self) {
        let contact = self.node.last_contact();
        if contact.is_some() && contact != self.observed_contact {
            self.observed_contact = contact;
            if let Some(at) = contact {
                let timeout = self.election.next_election_timeout();
                self.timer.reset(at, timeout);
            }
        }
    }

    /// Ticks until `shutdown` is raised, sleeping with exponential backoff while
    /// idle. Transport hiccups are logged and retried on the next tick; storage
    /// and log failures end the loop.
    pub fn run(&mut self, shutdown: &AtomicBool) -> Result<(), RaftError> {
        while !shutdown.load(Ordering::Acquire) {
            let work = match self.tick(Instant::now()) {
                Ok(work) => work,
                Err(RaftError::Transport(err)) => {
                    warn!(
                        "event=worker_retry partition={} error={}",
                        self.node.config().partition_label(),
                        err
                    );
                    0
                }
                Err(err) => {
                    error!(
                        "event=worker_failed partition={} error={}",
                        self.node.config().partition_label(),
                        err
                    );
                    return Err(err);
                }
            };
            let delay = self.backoff.observe(work);
            if !delay.is_zero() {
                thread::sleep(delay);
            }
        }
        info!(
            "event=worker_stopped partition={} role={} term={}",
            self.node.config().partition_label(),
            self.node.role(),
            self.node.term()
        );
        Ok(())
    }
}
