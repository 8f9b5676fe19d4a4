use rand::{thread_rng, Rng};
use std::time::Duration;

/// Exponential backoff applied by a worker while `do_work` keeps returning 0.
#[derive(Clone, Debug)]
pub struct IdleBackoff {
    base_delay: Duration,
    max_delay: Duration,
    jitter_fraction: f64,
    idle_rounds: u32,
}

impl IdleBackoff {
    pub const DEFAULT_BASE: Duration = Duration::from_millis(1);
    pub const DEFAULT_MAX: Duration = Duration::from_millis(50);

    pub fn new(base_delay: Duration, max_delay: Duration) -> Self {
        Self {
            base_delay,
            max_delay: max_delay.max(base_delay),
            jitter_fraction: 0.0,
            idle_rounds: 0,
        }
    }

    pub fn with_jitter(mut self, fraction: f64) -> Self {
        self.jitter_fraction = fraction.max(0.0);
        self
    }

    pub fn idle_rounds(&self) -> u32 {
        self.idle_rounds
    }

    /// Records the outcome of one work step and returns how long to wait
    /// before the next one.
    pub fn observe(&mut self, work: usize) -> Duration {
        if work > 0 {
            self.reset();
            return Duration::ZERO;
        }
        self.idle_rounds = self.idle_rounds.saturating_add(1);
        self.delay_for_round(self.idle_rounds)
    }

    pub fn reset(&mut self) {
        self.idle_rounds = 0;
    }

    fn delay_for_round(&self, round: u32) -> Duration {
        if self.base_delay.is_zero() {
            return Duration::ZERO;
        }
        let shift = round.saturating_sub(1).min(31);
        let scaled = self.base_delay.as_millis().saturating_mul(1u128 << shift);
        let bounded = Duration::from_millis(scaled.min(u128::from(u64::MAX)) as u64)
            .min(self.max_delay);
        if self.jitter_fraction <= 0.0 {
            return bounded;
        }
        let jitter = self.jitter_fraction.min(1.0);
        let factor = thread_rng().gen_range((1.0 - jitter)..=(1.0 + jitter));
        let millis = (bounded.as_millis() as f64 * factor).round().max(0.0);
        Duration::from_millis(millis as u64)
    }
}

impl Default for IdleBackoff {
    fn default() -> Self {
        Self::new(Self::DEFAULT_BASE, Self::DEFAULT_MAX)
    }
}
