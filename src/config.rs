//! Scheduler configuration.
//!
//! All options are fixed at startup; the scheduler never resizes or retunes
//! its topology while running. Most workloads only ever set the worker count
//! and leave the rest at their defaults.

use thiserror::Error;

/// The widest partition the scheduler supports. Victim candidate sets are
/// 32-bit bitfields, so this is a hard cap.
pub const MAX_WORKERS: usize = 32;

/// Upper bound on the per-worker steal-request budget. Each outstanding
/// request pins one task inbox, so this also caps the number of task inboxes
/// allocated per worker.
pub const MAX_STEAL_LIMIT: usize = 8;

// -----------------------------------------------------------------------------
// Steal strategy

/// How much work a victim surrenders when it answers a steal request.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum StealStrategy {
    /// Hand over a single task.
    #[default]
    One,
    /// Hand over half of the deque.
    Half,
    /// Start with single tasks and switch between the two based on recent
    /// tasks-per-steal throughput.
    Adaptive,
}

// -----------------------------------------------------------------------------
// Config

/// Startup options for a scheduler partition.
///
/// ```rust,no_run
/// use filch::{Config, StealStrategy};
///
/// let config = Config::new(8)
///     .strategy(StealStrategy::Adaptive)
///     .victim_check(true);
/// ```
#[derive(Clone, Debug)]
pub struct Config {
    /// Number of worker threads, including the master. Must be in
    /// `1..=MAX_WORKERS`.
    pub num_workers: usize,
    /// The partition this scheduler instantiates. Partitions are isolated
    /// worker pools; requests never cross between them.
    pub partition: u32,
    /// Maximum concurrent outstanding steal requests per worker, and the
    /// number of task inboxes each worker owns. Must be in
    /// `1..=MAX_STEAL_LIMIT`.
    pub max_steal: usize,
    /// Maximum times a steal request is forwarded before it returns to its
    /// origin. Defaults to `num_workers - 1`.
    pub max_steal_attempts: Option<usize>,
    /// How much a victim surrenders per steal.
    pub strategy: StealStrategy,
    /// Completed steals per adaptive retune window.
    pub adaptive_interval: u32,
    /// Maintain a per-worker "has tasks" flag and consult it before sending
    /// a biased steal request to a hinted victim.
    pub victim_check: bool,
    /// Bias initial victim selection towards the worker that last donated
    /// tasks to us.
    pub steal_last_victim: bool,
    /// Bias initial victim selection towards the worker that last stole
    /// from us.
    pub steal_last_thief: bool,
}

impl Config {
    /// Creates a configuration for `num_workers` workers with every other
    /// option at its default.
    pub fn new(num_workers: usize) -> Config {
        Config {
            num_workers,
            partition: 0,
            max_steal: 1,
            max_steal_attempts: None,
            strategy: StealStrategy::One,
            adaptive_interval: 25,
            victim_check: false,
            steal_last_victim: false,
            steal_last_thief: false,
        }
    }

    /// Sets the outstanding steal-request budget.
    pub fn max_steal(mut self, max_steal: usize) -> Config {
        self.max_steal = max_steal;
        self
    }

    /// Sets the forwarding budget of a steal request.
    pub fn max_steal_attempts(mut self, attempts: usize) -> Config {
        self.max_steal_attempts = Some(attempts);
        self
    }

    /// Sets the steal strategy.
    pub fn strategy(mut self, strategy: StealStrategy) -> Config {
        self.strategy = strategy;
        self
    }

    /// Sets the adaptive retune window.
    pub fn adaptive_interval(mut self, interval: u32) -> Config {
        self.adaptive_interval = interval;
        self
    }

    /// Enables or disables the victim-check flag.
    pub fn victim_check(mut self, enabled: bool) -> Config {
        self.victim_check = enabled;
        self
    }

    /// Enables the last-victim bias.
    pub fn steal_last_victim(mut self, enabled: bool) -> Config {
        self.steal_last_victim = enabled;
        self
    }

    /// Enables the last-thief bias.
    pub fn steal_last_thief(mut self, enabled: bool) -> Config {
        self.steal_last_thief = enabled;
        self
    }

    /// The resolved forwarding budget.
    pub(crate) fn attempts(&self) -> usize {
        self.max_steal_attempts
            .unwrap_or(self.num_workers.saturating_sub(1))
    }

    /// Checks the configuration for values the scheduler cannot honor.
    pub(crate) fn validate(&self) -> Result<(), ConfigError> {
        if self.num_workers == 0 || self.num_workers > MAX_WORKERS {
            return Err(ConfigError::WorkerCount(self.num_workers));
        }
        if self.max_steal == 0 || self.max_steal > MAX_STEAL_LIMIT {
            return Err(ConfigError::StealBudget(self.max_steal));
        }
        if self.adaptive_interval == 0 {
            return Err(ConfigError::AdaptiveInterval);
        }
        if self.steal_last_victim && self.steal_last_thief {
            return Err(ConfigError::BiasConflict);
        }
        Ok(())
    }
}

// -----------------------------------------------------------------------------
// Errors

/// A configuration the scheduler refuses to start with.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    /// The worker count is zero or exceeds [`MAX_WORKERS`].
    #[error("worker count must be in 1..={MAX_WORKERS}, got {0}")]
    WorkerCount(usize),
    /// The steal budget is zero or exceeds [`MAX_STEAL_LIMIT`].
    #[error("steal budget must be in 1..={MAX_STEAL_LIMIT}, got {0}")]
    StealBudget(usize),
    /// The adaptive retune window is zero.
    #[error("adaptive interval must be nonzero")]
    AdaptiveInterval,
    /// Both victim-bias policies were requested at once.
    #[error("steal_last_victim and steal_last_thief are mutually exclusive")]
    BiasConflict,
}

// -----------------------------------------------------------------------------
// Tests

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let config = Config::new(4);
        assert_eq!(config.max_steal, 1);
        assert_eq!(config.attempts(), 3);
        assert_eq!(config.strategy, StealStrategy::One);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn attempts_override() {
        let config = Config::new(8).max_steal_attempts(2);
        assert_eq!(config.attempts(), 2);
    }

    #[test]
    fn single_worker_has_no_attempts() {
        assert_eq!(Config::new(1).attempts(), 0);
    }

    #[test]
    fn rejects_bad_values() {
        assert_eq!(
            Config::new(0).validate(),
            Err(ConfigError::WorkerCount(0))
        );
        assert_eq!(
            Config::new(MAX_WORKERS + 1).validate(),
            Err(ConfigError::WorkerCount(MAX_WORKERS + 1))
        );
        assert_eq!(
            Config::new(2).max_steal(0).validate(),
            Err(ConfigError::StealBudget(0))
        );
        assert_eq!(
            Config::new(2).adaptive_interval(0).validate(),
            Err(ConfigError::AdaptiveInterval)
        );
        assert_eq!(
            Config::new(2)
                .steal_last_victim(true)
                .steal_last_thief(true)
                .validate(),
            Err(ConfigError::BiasConflict)
        );
    }
}
