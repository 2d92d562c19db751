//! Consecutive-failure tracking for human handoff.

use crate::config::EscalationPolicy;
use std::time::{Duration, Instant};

/// Counts consecutive turn failures inside a sliding window.
/// A successful turn resets the count. Fires at most once per call.
#[derive(Debug)]
pub(crate) struct FailureWindow {
    policy: Option<(u32, Duration)>,
    failures: Vec<Instant>,
    escalated: bool,
}

impl FailureWindow {
    pub fn new(policy: Option<&EscalationPolicy>) -> Self {
        Self {
            policy: policy.map(|p| (p.max_failures.max(1), p.window())),
            failures: Vec::new(),
            escalated: false,
        }
    }

    /// Record a failure at `now`. Returns the failure count when the
    /// threshold is crossed for the first time.
    pub fn record(&mut self, now: Instant) -> Option<u32> {
        let (max_failures, window) = self.policy?;
        self.failures
            .retain(|t| now.saturating_duration_since(*t) <= window);
        self.failures.push(now);

        let count = self.failures.len() as u32;
        if count >= max_failures && !self.escalated {
            self.escalated = true;
            return Some(count);
        }
        None
    }

    /// Escalate regardless of the count, e.g. for a backend that stays down.
    /// Returns the failures seen so far, at least one.
    pub fn escalate_now(&mut self) -> Option<u32> {
        if self.policy.is_none() || self.escalated {
            return None;
        }
        self.escalated = true;
        Some(self.consecutive().max(1) as u32)
    }

    pub fn reset(&mut self) {
        self.failures.clear();
    }

    pub fn consecutive(&self) -> usize {
        self.failures.len()
    }
}
