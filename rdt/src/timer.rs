//! Retransmission deadline management.
//!
//! The sender keeps exactly one authoritative deadline: the moment its oldest
//! in-flight frame has gone unacknowledged for a full timeout.  Every change
//! to window occupancy re-derives it through [`RetransmitTimer::rearm`] (or
//! [`RetransmitTimer::cancel`] once nothing is in flight), so a
//! stale deadline never survives an acknowledgment and timers never overlap.
//!
//! The timeout itself is fixed for the lifetime of a session (no RTT
//! estimation, no back-off).

use std::time::{Duration, Instant};

/// The sender's single retransmission deadline.
#[derive(Debug, Clone)]
pub struct RetransmitTimer {
    timeout: Duration,
    deadline: Option<Instant>,
}

impl RetransmitTimer {
    pub fn new(timeout: Duration) -> Self {
        Self {
            timeout,
            deadline: None,
        }
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Current deadline, or `None` when nothing is in flight.
    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    pub fn is_armed(&self) -> bool {
        self.deadline.is_some()
    }

    /// Derive the deadline from the send time of the oldest in-flight frame.
    pub fn rearm(&mut self, oldest_sent_at: Instant) {
        self.deadline = Some(oldest_sent_at + self.timeout);
    }

    pub fn cancel(&mut self) {
        self.deadline = None;
    }

    /// `true` once `now` has reached the deadline.
    pub fn is_expired(&self, now: Instant) -> bool {
        self.deadline.is_some_and(|deadline| now >= deadline)
    }

    /// Time left until the deadline, saturating at zero.
    pub fn remaining(&self, now: Instant) -> Option<Duration> {
        self.deadline
            .map(|deadline| deadline.saturating_duration_since(now))
    }
}
