use crate::config::ProcessSpec;
use std::time::{Duration, SystemTime};

/// Restart policy for one supervised instance
///
/// Limits count consecutive crash-restarts: a run that stays up for
/// `stable_secs` resets the streak, so a crash loop reaches the limit
/// deterministically while long-lived processes are not penalized for
/// crashes spread over days.
#[derive(Debug, Clone)]
pub struct RestartPolicy {
    /// Whether automatic restart is enabled
    pub enabled: bool,
    /// Maximum consecutive crash-restarts before the instance is failed
    pub max_restarts: usize,
    /// Uptime after which the crash streak resets
    pub stable_secs: u64,
    /// Initial delay before the first restart (in seconds)
    pub initial_delay_secs: u64,
    /// Backoff strategy to use
    pub backoff: Backoff,
}

impl RestartPolicy {
    /// Create a restart policy from a process spec
    pub fn from_spec(spec: &ProcessSpec) -> Self {
        Self {
            enabled: spec.autorestart,
            max_restarts: spec.max_restarts,
            stable_secs: 60,
            initial_delay_secs: spec.restart_delay_secs,
            backoff: Backoff::Exponential { max_delay_secs: 60 },
        }
    }

    /// Whether another restart may be attempted
    pub fn allows(&self, history: &RestartHistory) -> bool {
        self.enabled && history.streak() < self.max_restarts
    }

    /// Delay before the next restart attempt
    pub fn delay(&self, history: &RestartHistory) -> Duration {
        self.backoff.delay(self.initial_delay_secs, history.streak())
    }

    /// Uptime threshold after which a run counts as stable
    pub fn stable_uptime(&self) -> Duration {
        Duration::from_secs(self.stable_secs)
    }
}

impl Default for RestartPolicy {
    fn default() -> Self {
        Self {
            enabled: true,
            max_restarts: 10,
            stable_secs: 60,
            initial_delay_secs: 1,
            backoff: Backoff::Exponential { max_delay_secs: 60 },
        }
    }
}

/// Backoff strategy for restart delays
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Backoff {
    /// Fixed delay between restarts
    Fixed,
    /// Exponential backoff with maximum delay
    Exponential { max_delay_secs: u64 },
}

impl Backoff {
    /// Delay for a given attempt number (0-based)
    pub fn delay(&self, initial_delay_secs: u64, attempt: usize) -> Duration {
        match self {
            Backoff::Fixed => Duration::from_secs(initial_delay_secs),
            Backoff::Exponential { max_delay_secs } => {
                // delay = initial * 2^attempt, capped
                let delay_secs = initial_delay_secs
                    .saturating_mul(2_u64.saturating_pow(attempt as u32))
                    .min(*max_delay_secs);
                Duration::from_secs(delay_secs)
            }
        }
    }
}

/// Crash-restart bookkeeping for one instance
#[derive(Debug, Clone, Default)]
pub struct RestartHistory {
    /// Consecutive crash-restarts since the last stable run
    streak: usize,
    /// All crash-restarts over the instance lifetime
    total: usize,
    last_restart: Option<SystemTime>,
}

impl RestartHistory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a crash-restart attempt
    pub fn record(&mut self) {
        self.streak += 1;
        self.total += 1;
        self.last_restart = Some(SystemTime::now());
    }

    /// Consecutive crash-restarts since the last stable run
    pub fn streak(&self) -> usize {
        self.streak
    }

    /// Total crash-restarts over the instance lifetime
    pub fn total(&self) -> usize {
        self.total
    }

    /// Time of the last crash-restart, if any
    pub fn last_restart(&self) -> Option<SystemTime> {
        self.last_restart
    }

    /// Reset the streak after a run that stayed up long enough
    pub fn mark_stable(&mut self) {
        self.streak = 0;
    }
}
