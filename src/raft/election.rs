use crate::membership::{Endpoint, Term};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha20Rng;
use std::collections::HashSet;
use std::time::{Duration, Instant};

/// Draws randomized election timeouts from a fixed window. Seeded so that a
/// cluster replayed with the same seeds times out in the same order.
#[derive(Debug, Clone)]
pub struct ElectionController {
    min: Duration,
    max: Duration,
    rng: ChaCha20Rng,
}

impl ElectionController {
    pub fn new(min: Duration, max: Duration, seed: u64) -> Self {
        Self {
            min,
            max: max.max(min),
            rng: ChaCha20Rng::seed_from_u64(seed),
        }
    }

    pub fn window(&self) -> (Duration, Duration) {
        (self.min, self.max)
    }

    pub fn next_election_timeout(&mut self) -> Duration {
        random_between(&mut self.rng, self.min, self.max)
    }

    pub fn start_timer(&mut self, now: Instant) -> ElectionTimer {
        let timeout = self.next_election_timeout();
        ElectionTimer::new(now, timeout)
    }
}

fn random_between(rng: &mut ChaCha20Rng, min: Duration, max: Duration) -> Duration {
    if max <= min {
        return min;
    }
    let delta = (max - min).as_millis() as u64;
    min + Duration::from_millis(rng.gen_range(0..=delta))
}

#[derive(Debug, Clone)]
pub struct ElectionTimer {
    timeout: Duration,
    deadline: Instant,
}

impl ElectionTimer {
    pub fn new(now: Instant, timeout: Duration) -> Self {
        Self {
            timeout,
            deadline: now + timeout,
        }
    }

    pub fn reset(&mut self, now: Instant, timeout: Duration) {
        self.timeout = timeout;
        self.deadline = now + timeout;
    }

    pub fn expired(&self, now: Instant) -> bool {
        now >= self.deadline
    }

    pub fn remaining(&self, now: Instant) -> Duration {
        self.deadline.saturating_duration_since(now)
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub fn deadline(&self) -> Instant {
        self.deadline
    }
}

/// Votes collected by a candidate for one term.
#[derive(Debug, Clone)]
pub struct VoteTally {
    term: Term,
    granted: HashSet<Endpoint>,
    rejected: HashSet<Endpoint>,
}

impl VoteTally {
    pub fn new(term: Term) -> Self {
        Self {
            term,
            granted: HashSet::new(),
            rejected: HashSet::new(),
        }
    }

    pub fn term(&self) -> Term {
        self.term
    }

    /// Records a vote. Votes for other terms are ignored and reported as not
    /// recorded.
    pub fn record(&mut self, term: Term, voter: &Endpoint, granted: bool) -> bool {
        if term != self.term {
            return false;
        }
        if granted {
            self.rejected.remove(voter);
            self.granted.insert(voter.clone());
        } else {
            self.granted.remove(voter);
            self.rejected.insert(voter.clone());
        }
        true
    }

    pub fn granted(&self) -> usize {
        self.granted.len()
    }

    pub fn rejected(&self) -> usize {
        self.rejected.len()
    }

    pub fn has_quorum(&self, quorum_size: usize) -> bool {
        self.granted.len() >= quorum_size
    }

    /// True once enough rejections arrived that `quorum_size` grants can no
    /// longer be reached among `voters`.
    pub fn is_lost(&self, voters: usize, quorum_size: usize) -> bool {
        voters.saturating_sub(self.rejected.len()) < quorum_size
    }
}
