//! Sliding-window send-side state machine.
//!
//! [`SenderWindow`] owns every frame that has been segmented but not yet
//! acknowledged.  Up to `window_size` of them are in flight; the rest wait in
//! sequence order until a slot opens.
//!
//! # Protocol contract
//!
//! - At most `window_size` frames are in flight at once.
//! - ACKs are **per frame**: an ack for `K` retires frame `K` only.  An ack
//!   for a later frame never slides the window past an earlier one.
//! - Retiring an in-flight frame promotes the oldest queued frame, if any.
//! - On timeout, **every** in-flight frame is retransmitted.
//! - One retransmission deadline exists, derived from the oldest in-flight
//!   frame; it is re-derived on every change and cancelled when idle.
//!
//! This module only manages state; handing frames to the channel is the
//! caller's responsibility.
//!
//! # Window layout
//!
//! ```text
//!  outstanding (sequence order)
//!  ┌────────────────────────────┬────────────────────────┐
//!  │  in flight (≤ window_size) │  queued                │
//!  └────────────────────────────┴────────────────────────┘
//!   front                                            back
//! ```

use std::collections::VecDeque;
use std::time::Instant;

use thiserror::Error;

use crate::config::{Config, ConfigError};
use crate::packet::Frame;
use crate::segmenter::{self, SegmentError};
use crate::timer::RetransmitTimer;

/// Errors returned by [`SenderWindow::submit`].  The window is left unchanged.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum SendError {
    /// Accepting the message would exceed `max_queued_frames`.
    #[error("send queue full: {outstanding} outstanding + {requested} new frames exceeds {limit}")]
    QueueFull {
        requested: usize,
        outstanding: usize,
        limit: usize,
    },
    /// The outstanding queue could not grow.
    #[error("out of memory queueing {0} frames")]
    ResourceExhausted(usize),
    #[error(transparent)]
    Segment(#[from] SegmentError),
}

/// Lifecycle of an outstanding frame.  Acknowledged frames are removed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameState {
    /// Segmented but waiting for a window slot.
    Queued,
    /// Transmitted, awaiting its acknowledgment.
    InFlight,
}

/// A frame the sender still owns.
#[derive(Debug, Clone)]
pub struct OutstandingEntry {
    pub frame: Frame,
    pub state: FrameState,
    /// Number of times this frame has been transmitted (0 while queued).
    pub tx_count: u32,
    /// Time of the most recent transmission.
    pub sent_at: Option<Instant>,
}

/// What an acknowledgment did to the window.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AckOutcome {
    /// No outstanding frame carries that sequence number.
    Ignored,
    /// The frame was retired; `promoted` must now be transmitted.
    Retired { promoted: Option<Frame> },
}

/// Cumulative counters, mostly for logging.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SenderStats {
    /// First transmissions (including promotions).
    pub transmitted: u64,
    /// Frames re-sent because of a timeout.
    pub retransmitted: u64,
    /// Frames retired by an acknowledgment.
    pub acked: u64,
    /// Acknowledgments that matched nothing.
    pub ignored_acks: u64,
}

/// Send-side state for one session.
#[derive(Debug)]
pub struct SenderWindow {
    /// Sequence number given to the next segmented frame.
    next_seq: u32,
    window_size: usize,
    max_payload: usize,
    max_queued: usize,
    /// Unacknowledged frames in sequence order; the first `in_flight` are sent.
    outstanding: VecDeque<OutstandingEntry>,
    in_flight: usize,
    timer: RetransmitTimer,
    stats: SenderStats,
}

impl SenderWindow {
    /// Create an idle window; sequence numbers start at 0.
    pub fn new(config: &Config) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self {
            next_seq: 0,
            window_size: config.window_size,
            max_payload: config.max_payload(),
            max_queued: config.max_queued_frames,
            outstanding: VecDeque::new(),
            in_flight: 0,
            timer: RetransmitTimer::new(config.timeout),
            stats: SenderStats::default(),
        })
    }

    fn check_rep(&self) {
        if !cfg!(debug_assertions) {
            return;
        }
        assert!(self.in_flight <= self.window_size);
        assert_eq!(
            self.in_flight,
            self.outstanding.len().min(self.window_size),
            "in-flight set must be the first W outstanding frames"
        );
        for (i, entry) in self.outstanding.iter().enumerate() {
            let expected = if i < self.in_flight {
                FrameState::InFlight
            } else {
                FrameState::Queued
            };
            assert_eq!(entry.state, expected);
        }
        for pair in self.outstanding.iter().zip(self.outstanding.iter().skip(1)) {
            assert!(pair.0.frame.seq() < pair.1.frame.seq());
        }
        assert_eq!(self.timer.is_armed(), self.in_flight > 0);
    }

    /// Segment `message` and admit its frames.
    ///
    /// Returns the frames that entered the window and must be transmitted
    /// now; the rest are queued.  On error nothing changes.
    pub fn submit(&mut self, message: &[u8], now: Instant) -> Result<Vec<Frame>, SendError> {
        let requested = segmenter::frame_count(message.len(), self.max_payload);
        if self.outstanding.len() + requested > self.max_queued {
            return Err(SendError::QueueFull {
                requested,
                outstanding: self.outstanding.len(),
                limit: self.max_queued,
            });
        }

        let frames = segmenter::segment(message, self.next_seq, self.max_payload)?;
        self.outstanding
            .try_reserve(frames.len())
            .map_err(|_| SendError::ResourceExhausted(frames.len()))?;
        // `segment` already proved the counter cannot overflow.
        self.next_seq += frames.len() as u32;

        let mut to_send = Vec::new();
        for frame in frames {
            if self.in_flight < self.window_size {
                to_send.push(frame.clone());
                self.outstanding.push_back(OutstandingEntry {
                    frame,
                    state: FrameState::InFlight,
                    tx_count: 1,
                    sent_at: Some(now),
                });
                self.in_flight += 1;
                self.stats.transmitted += 1;
            } else {
                self.outstanding.push_back(OutstandingEntry {
                    frame,
                    state: FrameState::Queued,
                    tx_count: 0,
                    sent_at: None,
                });
            }
        }

        self.rearm_timer();
        self.check_rep();
        Ok(to_send)
    }

    /// Retire the frame numbered `seq`, searching the whole outstanding set.
    pub fn on_ack(&mut self, seq: u32, now: Instant) -> AckOutcome {
        let Ok(index) = self
            .outstanding
            .binary_search_by_key(&seq, |entry| entry.frame.seq())
        else {
            self.stats.ignored_acks += 1;
            return AckOutcome::Ignored;
        };
        let Some(entry) = self.outstanding.remove(index) else {
            self.stats.ignored_acks += 1;
            return AckOutcome::Ignored;
        };
        self.stats.acked += 1;

        let mut promoted = None;
        if entry.state == FrameState::InFlight {
            self.in_flight -= 1;
            // The first queued frame sits right after the in-flight prefix.
            if let Some(next) = self.outstanding.get_mut(self.in_flight) {
                next.state = FrameState::InFlight;
                next.tx_count = 1;
                next.sent_at = Some(now);
                self.in_flight += 1;
                self.stats.transmitted += 1;
                promoted = Some(next.frame.clone());
            }
        }

        self.rearm_timer();
        self.check_rep();
        AckOutcome::Retired { promoted }
    }

    /// Retransmit the whole window and start a fresh deadline.
    pub fn on_timeout(&mut self, now: Instant) -> Vec<Frame> {
        let mut resend = Vec::with_capacity(self.in_flight);
        for entry in self.outstanding.iter_mut().take(self.in_flight) {
            entry.tx_count += 1;
            entry.sent_at = Some(now);
            resend.push(entry.frame.clone());
        }
        self.stats.retransmitted += resend.len() as u64;

        self.rearm_timer();
        self.check_rep();
        resend
    }

    /// Run [`on_timeout`](Self::on_timeout) only if the deadline has passed.
    ///
    /// A timer firing after its deadline was moved (or cancelled) is ignored.
    pub fn poll_timeout(&mut self, now: Instant) -> Vec<Frame> {
        if self.timer.is_expired(now) {
            self.on_timeout(now)
        } else {
            Vec::new()
        }
    }

    fn rearm_timer(&mut self) {
        let oldest = self
            .outstanding
            .iter()
            .take(self.in_flight)
            .filter_map(|entry| entry.sent_at)
            .min();
        match oldest {
            Some(sent_at) => self.timer.rearm(sent_at),
            None => self.timer.cancel(),
        }
    }

    // -----------------------------------------------------------------------
    // Accessors
    // -----------------------------------------------------------------------

    /// Sequence number the next segmented frame will receive.
    pub fn next_seq(&self) -> u32 {
        self.next_seq
    }

    pub fn window_size(&self) -> usize {
        self.window_size
    }

    /// Number of frames currently in flight.
    pub fn in_flight(&self) -> usize {
        self.in_flight
    }

    /// Number of frames waiting for a window slot.
    pub fn queued(&self) -> usize {
        self.outstanding.len() - self.in_flight
    }

    /// Number of unacknowledged frames (in flight + queued).
    pub fn outstanding(&self) -> usize {
        self.outstanding.len()
    }

    /// `true` when every submitted frame has been acknowledged.
    pub fn is_idle(&self) -> bool {
        self.outstanding.is_empty()
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.timer.deadline()
    }

    pub fn timer(&self) -> &RetransmitTimer {
        &self.timer
    }

    pub fn stats(&self) -> SenderStats {
        self.stats
    }

    /// Every outstanding frame, oldest first.
    pub fn entries(&self) -> impl Iterator<Item = &OutstandingEntry> {
        self.outstanding.iter()
    }

    /// Sequence numbers of the in-flight frames, in order.
    pub fn in_flight_seqs(&self) -> Vec<u32> {
        self.outstanding
            .iter()
            .take(self.in_flight)
            .map(|entry| entry.frame.seq())
            .collect()
    }

    /// Sequence numbers of the queued frames, in order.
    pub fn queued_seqs(&self) -> Vec<u32> {
        self.outstanding
            .iter()
            .skip(self.in_flight)
            .map(|entry| entry.frame.seq())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    const TIMEOUT: Duration = Duration::from_millis(300);

    fn config(window_size: usize, frame_capacity: usize) -> Config {
        Config {
            window_size,
            frame_capacity,
            timeout: TIMEOUT,
            ..Config::default()
        }
    }

    fn seqs(frames: &[Frame]) -> Vec<u32> {
        frames.iter().map(Frame::seq).collect()
    }

    #[test]
    fn initial_state() {
        let s = SenderWindow::new(&Config::default()).unwrap();
        assert_eq!(s.next_seq(), 0);
        assert_eq!(s.in_flight(), 0);
        assert!(s.is_idle());
        assert_eq!(s.deadline(), None);
    }

    #[test]
    fn invalid_config_rejected() {
        let err = SenderWindow::new(&config(0, 128)).unwrap_err();
        assert_eq!(err, ConfigError::ZeroWindow);
    }

    #[test]
    fn submit_fills_window_then_queues() {
        let now = Instant::now();
        // max payload 1: every byte becomes one frame.
        let mut s = SenderWindow::new(&config(3, 10)).unwrap();

        let sent = s.submit(b"abcde", now).unwrap();
        assert_eq!(seqs(&sent), vec![0, 1, 2]);
        assert_eq!(s.in_flight_seqs(), vec![0, 1, 2]);
        assert_eq!(s.queued_seqs(), vec![3, 4]);
        assert_eq!(s.next_seq(), 5);
        assert_eq!(s.deadline(), Some(now + TIMEOUT));
    }

    #[test]
    fn empty_message_changes_nothing() {
        let mut s = SenderWindow::new(&config(3, 10)).unwrap();
        assert!(s.submit(b"", Instant::now()).unwrap().is_empty());
        assert!(s.is_idle());
        assert_eq!(s.deadline(), None);
    }

    #[test]
    fn ack_of_oldest_promotes_exactly_one() {
        let now = Instant::now();
        let mut s = SenderWindow::new(&config(3, 10)).unwrap();
        s.submit(b"abcde", now).unwrap();

        let later = now + Duration::from_millis(50);
        let outcome = s.on_ack(0, later);
        let AckOutcome::Retired {
            promoted: Some(frame),
        } = outcome
        else {
            panic!("expected a promotion, got {outcome:?}");
        };
        assert_eq!(frame.seq(), 3);
        assert_eq!(s.in_flight_seqs(), vec![1, 2, 3]);
        assert_eq!(s.queued_seqs(), vec![4]);
    }

    #[test]
    fn ack_without_queue_shrinks_window() {
        let now = Instant::now();
        let mut s = SenderWindow::new(&config(4, 10)).unwrap();
        s.submit(b"ab", now).unwrap();

        assert_eq!(s.on_ack(1, now), AckOutcome::Retired { promoted: None });
        assert_eq!(s.in_flight(), 1);
        assert_eq!(s.on_ack(0, now), AckOutcome::Retired { promoted: None });
        assert!(s.is_idle());
        assert_eq!(s.deadline(), None, "idle sender must not keep a deadline");
    }

    #[test]
    fn unknown_and_duplicate_acks_ignored() {
        let now = Instant::now();
        let mut s = SenderWindow::new(&config(4, 10)).unwrap();
        s.submit(b"ab", now).unwrap();

        assert_eq!(s.on_ack(99, now), AckOutcome::Ignored);
        assert_eq!(s.on_ack(0, now), AckOutcome::Retired { promoted: None });
        assert_eq!(s.on_ack(0, now), AckOutcome::Ignored);
        assert_eq!(s.stats().ignored_acks, 2);
        assert_eq!(s.in_flight_seqs(), vec![1]);
    }

    #[test]
    fn ack_beyond_first_window_prefix_is_found() {
        let now = Instant::now();
        let mut s = SenderWindow::new(&config(2, 10)).unwrap();
        s.submit(b"abcdef", now).unwrap();
        // Frames 0,1 in flight; 2..=5 queued.  Acks arrive for 1, then 0.
        s.on_ack(1, now);
        s.on_ack(0, now);
        assert_eq!(s.in_flight_seqs(), vec![2, 3]);
        // Out-of-order ack for the newest in-flight frame.
        s.on_ack(3, now);
        assert_eq!(s.in_flight_seqs(), vec![2, 4]);
        assert_eq!(s.queued_seqs(), vec![5]);
    }

    #[test]
    fn timeout_retransmits_whole_window() {
        let now = Instant::now();
        let mut s = SenderWindow::new(&config(3, 10)).unwrap();
        s.submit(b"abcd", now).unwrap();

        let fire = now + TIMEOUT;
        let resent = s.on_timeout(fire);
        assert_eq!(seqs(&resent), vec![0, 1, 2]);
        assert_eq!(s.deadline(), Some(fire + TIMEOUT));
        assert_eq!(s.stats().retransmitted, 3);
        assert!(s.entries().take(3).all(|e| e.tx_count == 2));

        // Per-frame ack for 1 does not slide past 0.
        assert_eq!(s.on_ack(1, fire), AckOutcome::Retired {
            promoted: Some(Frame::new(3, b"d".to_vec()))
        });
        assert_eq!(s.in_flight_seqs(), vec![0, 2, 3]);
    }

    #[test]
    fn deadline_follows_oldest_in_flight() {
        let t0 = Instant::now();
        let mut s = SenderWindow::new(&config(2, 10)).unwrap();
        s.submit(b"a", t0).unwrap();

        let t1 = t0 + Duration::from_millis(100);
        s.submit(b"b", t1).unwrap();
        assert_eq!(s.deadline(), Some(t0 + TIMEOUT), "oldest frame drives the deadline");

        s.on_ack(0, t1);
        assert_eq!(s.deadline(), Some(t1 + TIMEOUT), "deadline moves to the new oldest");
    }

    #[test]
    fn poll_timeout_ignores_early_firing() {
        let now = Instant::now();
        let mut s = SenderWindow::new(&config(2, 10)).unwrap();
        s.submit(b"ab", now).unwrap();

        assert!(s.poll_timeout(now + Duration::from_millis(10)).is_empty());
        assert_eq!(seqs(&s.poll_timeout(now + TIMEOUT)), vec![0, 1]);
    }

    #[test]
    fn queue_cap_rejects_without_side_effects() {
        let now = Instant::now();
        let mut s = SenderWindow::new(&Config {
            window_size: 2,
            frame_capacity: 10,
            max_queued_frames: 4,
            ..Config::default()
        })
        .unwrap();
        s.submit(b"abc", now).unwrap();

        let err = s.submit(b"de", now).unwrap_err();
        assert_eq!(
            err,
            SendError::QueueFull {
                requested: 2,
                outstanding: 3,
                limit: 4
            }
        );
        assert_eq!(s.outstanding(), 3);
        assert_eq!(s.next_seq(), 3);
    }

    #[test]
    fn window_bound_holds_under_random_acks() {
        let now = Instant::now();
        let mut s = SenderWindow::new(&config(4, 10)).unwrap();
        s.submit(&[0u8; 40], now).unwrap();

        // Ack in a scrambled order; the window must never exceed 4 and the
        // in-flight set must always be the oldest unacknowledged frames.
        let order = [3u32, 0, 7, 1, 2, 5, 4, 6, 9, 8, 12, 10, 11];
        for seq in order {
            s.on_ack(seq, now);
            assert!(s.in_flight() <= 4);
        }
        assert_eq!(s.in_flight_seqs(), vec![13, 14, 15, 16]);
    }
}
