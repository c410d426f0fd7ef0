//! Per-slot quota tracking
//!
//! Remaining calls and the window reset come from response metadata when the
//! API reports them. Otherwise the tracker counts down from the credential's
//! ceiling and opens a local window of `fallback_window` at the first call.
//!
//! Windows roll over lazily: an expired reset is noticed the next time the
//! state is consulted, never by a timer.

use std::time::Duration;

use fetch_client::RateLimit;
use tokio::time::Instant;

/// Why a call failed, as far as quota accounting cares.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    /// The server refused the call for quota reasons.
    RateLimited { reset_after: Option<Duration> },
    /// The call went out and failed for another reason; it still counts.
    Other,
}

/// Remaining-call estimate for one credential.
#[derive(Debug, Clone)]
pub struct QuotaState {
    ceiling: u32,
    remaining: u32,
    reset_at: Option<Instant>,
    last_observed: Option<Instant>,
    fallback_window: Duration,
}

impl QuotaState {
    pub fn new(ceiling: u32, fallback_window: Duration) -> Self {
        Self {
            ceiling,
            remaining: ceiling,
            reset_at: None,
            last_observed: None,
            fallback_window,
        }
    }

    pub fn ceiling(&self) -> u32 {
        self.ceiling
    }

    pub fn remaining(&self) -> u32 {
        self.remaining
    }

    pub fn reset_at(&self) -> Option<Instant> {
        self.reset_at
    }

    pub fn last_observed(&self) -> Option<Instant> {
        self.last_observed
    }

    /// Whether a call may be issued at `now`. Rolls an expired window over
    /// to a full ceiling first.
    pub fn can_call(&mut self, now: Instant) -> bool {
        self.roll_window(now);
        self.remaining > 0
    }

    /// When the slot stops being exhausted, or `None` if it is usable now.
    pub fn exhausted_until(&self, now: Instant) -> Option<Instant> {
        match self.reset_at {
            Some(reset) if self.remaining == 0 && reset > now => Some(reset),
            _ => None,
        }
    }

    /// Account for a successful call and its reported metadata.
    ///
    /// A reported reset of zero (already elapsed) counts as unknown. If the
    /// window is empty at that point it stays empty for `fallback_window`.
    pub fn record(&mut self, rate_limit: Option<&RateLimit>, now: Instant) {
        self.last_observed = Some(now);
        match rate_limit.and_then(|rl| rl.remaining) {
            Some(remaining) => self.remaining = remaining,
            None => self.remaining = self.remaining.saturating_sub(1),
        }
        let reset_after = rate_limit
            .and_then(|rl| rl.reset_after)
            .filter(|d| !d.is_zero());
        match reset_after {
            Some(after) => self.reset_at = Some(now + after),
            None if self.remaining == 0 => {
                if self.reset_at.is_none_or(|reset| reset <= now) {
                    self.reset_at = Some(now + self.fallback_window);
                }
            }
            None => self.open_local_window(now),
        }
    }

    /// Account for a failed call.
    ///
    /// A rate-limit refusal empties the window until the reported reset. A
    /// missing or already-elapsed reset falls back to `fallback_window` so a
    /// stale header cannot make the slot spin on refusals.
    pub fn record_failure(&mut self, kind: FailureKind, now: Instant) {
        self.last_observed = Some(now);
        match kind {
            FailureKind::RateLimited { reset_after } => {
                let wait = reset_after
                    .filter(|d| !d.is_zero())
                    .unwrap_or(self.fallback_window);
                self.remaining = 0;
                self.reset_at = Some(now + wait);
            }
            FailureKind::Other => {
                self.remaining = self.remaining.saturating_sub(1);
                self.open_local_window(now);
            }
        }
    }

    fn open_local_window(&mut self, now: Instant) {
        if self.reset_at.is_none() {
            self.reset_at = Some(now + self.fallback_window);
        }
    }

    fn roll_window(&mut self, now: Instant) {
        if self.reset_at.is_some_and(|reset| reset <= now) {
            self.remaining = self.ceiling;
            self.reset_at = None;
        }
    }
}
