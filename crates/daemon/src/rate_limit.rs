//! Sliding-window rate limiter for job submissions.
//!
//! Keeps the timestamps of accepted submissions inside the trailing window and
//! rejects new ones once the cap is reached. State is process-local.

use std::collections::VecDeque;
use std::sync::{Mutex, PoisonError};
use std::time::{Duration, Instant};

/// Sliding-window submission limiter.
#[derive(Debug)]
pub struct RateLimiter {
    cap: usize,
    window: Duration,
    accepted: Mutex<VecDeque<Instant>>,
}

impl RateLimiter {
    /// Create a limiter allowing `cap` submissions per `window`.
    pub fn new(cap: u32, window: Duration) -> Self {
        Self {
            cap: cap as usize,
            window,
            accepted: Mutex::new(VecDeque::new()),
        }
    }

    /// Limiter with the default 60-second window.
    pub fn per_minute(cap: u32) -> Self {
        Self::new(cap, Duration::from_secs(60))
    }

    pub fn cap(&self) -> u32 {
        self.cap as u32
    }

    pub fn window(&self) -> Duration {
        self.window
    }

    /// Record a submission now if the window has room.
    pub fn allow(&self) -> bool {
        self.allow_at(Instant::now())
    }

    /// Record a submission at `now` if the window has room.
    ///
    /// Pruning, the capacity check and the append happen under one lock.
    /// A rejected call leaves the window unchanged.
    pub fn allow_at(&self, now: Instant) -> bool {
        let mut accepted = self
            .accepted
            .lock()
            .unwrap_or_else(PoisonError::into_inner);

        while let Some(&oldest) = accepted.front() {
            if now.saturating_duration_since(oldest) >= self.window {
                accepted.pop_front();
            } else {
                break;
            }
        }

        if accepted.len() < self.cap {
            accepted.push_back(now);
            true
        } else {
            false
        }
    }

    /// Submissions currently counted against the window.
    pub fn in_window(&self) -> usize {
        let now = Instant::now();
        self.accepted
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .filter(|t| now.saturating_duration_since(**t) < self.window)
            .count()
    }
}
