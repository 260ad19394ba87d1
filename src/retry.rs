//! Exponential backoff with jitter for transient signing-authority errors.
//!
//! The watcher owns its own poll loop (it has to interleave deadlines and
//! cancellation), so this module only computes delays: each call to
//! [`Backoff::next_delay`] returns the current delay with jitter applied and
//! grows the base delay for the next call, capped at `max_delay`.
//!
//! # Example
//!
//! ```
//! use std::time::Duration;
//! use webhook_certificator::retry::{Backoff, BackoffConfig};
//!
//! let mut backoff = Backoff::new(BackoffConfig {
//!     jitter: false,
//!     ..BackoffConfig::default()
//! });
//! assert_eq!(backoff.next_delay(), Duration::from_millis(500));
//! assert_eq!(backoff.next_delay(), Duration::from_secs(1));
//! ```

use std::time::Duration;

use rand::Rng;

/// Backoff parameters for retrying transient failures
#[derive(Clone, Debug, PartialEq)]
pub struct BackoffConfig {
    /// Delay before the first retry
    pub initial_delay: Duration,
    /// Upper bound for any single delay
    pub max_delay: Duration,
    /// Multiplier applied after each retry
    pub backoff_multiplier: f64,
    /// Scale each delay by a random factor in 0.5..1.5
    pub jitter: bool,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(5),
            backoff_multiplier: 2.0,
            jitter: true,
        }
    }
}

/// Stateful delay sequence built from a [`BackoffConfig`]
#[derive(Clone, Debug)]
pub struct Backoff {
    config: BackoffConfig,
    delay: Duration,
    attempt: u32,
}

impl Backoff {
    /// Start a new sequence at `initial_delay`
    pub fn new(config: BackoffConfig) -> Self {
        let delay = config.initial_delay;
        Self {
            config,
            delay,
            attempt: 0,
        }
    }

    /// Number of delays handed out since the last reset
    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    /// Return the next delay and advance the sequence
    pub fn next_delay(&mut self) -> Duration {
        self.attempt += 1;

        let current = if self.config.jitter {
            let jitter = rand::thread_rng().gen_range(0.5..1.5);
            Duration::from_secs_f64(self.delay.as_secs_f64() * jitter)
        } else {
            self.delay
        };

        self.delay = Duration::from_secs_f64(
            (self.delay.as_secs_f64() * self.config.backoff_multiplier)
                .min(self.config.max_delay.as_secs_f64()),
        );

        current.min(self.config.max_delay)
    }

    /// Go back to `initial_delay` after a successful call
    pub fn reset(&mut self) {
        self.delay = self.config.initial_delay;
        self.attempt = 0;
    }
}
