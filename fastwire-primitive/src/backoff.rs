/******************************************************************************
   Author: Joaquín Béjar García
   Email: jb@taunais.com
   Date: 19/10/26
******************************************************************************/

//! Retry pacing for empty fills and flushes.

use fastwire_core::BackoffConfig;
use std::hint;
use std::thread;
use tracing::trace;

/// Escalating wait used while an adapter moves zero bytes.
///
/// Spins first, then yields the thread, then sleeps. Progress resets the
/// escalation.
#[derive(Debug, Clone)]
pub struct Backoff {
    config: BackoffConfig,
    attempt: u32,
}

impl Backoff {
    /// Creates a backoff in its initial (spinning) state.
    #[must_use]
    pub const fn new(config: BackoffConfig) -> Self {
        Self { config, attempt: 0 }
    }

    /// Returns to the initial state after progress was made.
    #[inline]
    pub fn reset(&mut self) {
        self.attempt = 0;
    }

    /// Returns true once retries have escalated to sleeping.
    #[must_use]
    pub fn is_sleeping(&self) -> bool {
        self.attempt >= self.yield_limit()
    }

    /// Waits before the next retry.
    pub fn snooze(&mut self) {
        let yield_limit = self.yield_limit();
        if self.attempt < self.config.spin_retries {
            hint::spin_loop();
        } else if self.attempt < yield_limit {
            thread::yield_now();
        } else {
            if self.attempt == yield_limit {
                trace!(sleep = ?self.config.sleep, "adapter idle, backing off to sleep");
            }
            thread::sleep(self.config.sleep);
        }
        self.attempt = self.attempt.saturating_add(1);
    }

    fn yield_limit(&self) -> u32 {
        self.config
            .spin_retries
            .saturating_add(self.config.yield_retries)
    }
}
