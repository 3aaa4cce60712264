//! Harness-facing entry points for the two protocol roles.
//!
//! An endpoint owns the complete state for one role of one session and is
//! driven entirely by events from the outside:
//!
//! | Role     | Event                        | Handler                          |
//! |----------|------------------------------|----------------------------------|
//! | sender   | message from the application | [`SenderEndpoint::on_message`]   |
//! | sender   | frame from the channel (ack) | [`SenderEndpoint::on_frame`]     |
//! | sender   | retransmission timer expired | [`SenderEndpoint::on_timeout`]   |
//! | receiver | frame from the channel       | [`ReceiverEndpoint::on_frame`]   |
//!
//! Handlers may be called concurrently.  Each endpoint keeps its state behind
//! one `Mutex`; every handler holds the guard for its whole body, so handlers
//! of one role never interleave while the two roles stay independent.  The
//! guard is released on every exit path, early discards included.
//!
//! Everything the protocol needs from the outside world goes through
//! [`SenderContext`] and [`ReceiverContext`].

use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use crate::config::{Config, ConfigError};
use crate::packet::{Codec, Packet};
use crate::receiver::{Reception, RecvError, ReceiverWindow};
use crate::sender::{AckOutcome, SendError, SenderWindow};

/// Services the sender role consumes from its harness.
pub trait SenderContext {
    /// Monotonic clock.
    fn now(&self) -> Instant;
    /// Arm the single-shot retransmission timer, replacing any pending one.
    fn start_timer(&self, after: Duration);
    /// Cancel the pending retransmission timer, if any.
    fn stop_timer(&self);
    /// Hand an encoded frame to the channel.
    fn to_lower_layer(&self, frame: Vec<u8>);
}

/// Services the receiver role consumes from its harness.
pub trait ReceiverContext {
    /// Hand an encoded acknowledgment to the channel.
    fn to_lower_layer(&self, frame: Vec<u8>);
    /// Deliver an in-order payload to the application.
    fn to_upper_layer(&self, payload: Vec<u8>);
}

// ---------------------------------------------------------------------------
// SenderEndpoint
// ---------------------------------------------------------------------------

/// The sender role: segmentation, sliding window, retransmission.
pub struct SenderEndpoint<C> {
    ctx: C,
    codec: Codec,
    window: Mutex<SenderWindow>,
}

impl<C: SenderContext> SenderEndpoint<C> {
    pub fn new(config: &Config, ctx: C) -> Result<Self, ConfigError> {
        let window = SenderWindow::new(config)?;
        Ok(Self {
            ctx,
            codec: Codec::new(config.frame_capacity),
            window: Mutex::new(window),
        })
    }

    pub fn init(&self) {
        let window = self.lock();
        log::info!(
            "[sender] initialising: window={} frame_capacity={} timeout={:?}",
            window.window_size(),
            self.codec.frame_capacity(),
            window.timer().timeout()
        );
    }

    pub fn teardown(&self) {
        let window = self.lock();
        if !window.is_idle() {
            log::warn!(
                "[sender] finalising with {} unacknowledged frame(s)",
                window.outstanding()
            );
        }
        log::info!("[sender] finalising: {:?}", window.stats());
    }

    /// Accept a message from the application.
    ///
    /// Frames that fit the window go out immediately; the rest wait.
    pub fn on_message(&self, message: &[u8]) -> Result<(), SendError> {
        let mut window = self.lock();
        let now = self.ctx.now();
        let before = window.deadline();

        let frames = window.submit(message, now).inspect_err(|e| {
            log::warn!("[sender] rejecting {}-byte message: {e}", message.len());
        })?;
        for frame in &frames {
            log::debug!(
                "[sender] → DATA seq={} len={} in_flight={}",
                frame.seq(),
                frame.payload_size(),
                window.in_flight()
            );
            self.ctx.to_lower_layer(self.codec.encode_frame(frame));
        }
        if window.queued() > 0 {
            log::debug!("[sender] window full; {} frame(s) queued", window.queued());
        }

        self.sync_timer(before, &window, now);
        Ok(())
    }

    /// Process a frame arriving from the channel; only acks are meaningful.
    pub fn on_frame(&self, bytes: &[u8]) {
        let mut window = self.lock();

        let seq = match self.codec.decode(bytes) {
            Ok(Packet::Ack(seq)) => seq,
            Ok(Packet::Data(frame)) => {
                log::trace!("[sender] ignoring data frame seq={}", frame.seq());
                return;
            }
            Err(e) => {
                log::trace!("[sender] dropping ack: {e}");
                return;
            }
        };

        let now = self.ctx.now();
        let before = window.deadline();
        match window.on_ack(seq, now) {
            AckOutcome::Ignored => {
                log::trace!("[sender] ← ACK seq={seq} matches nothing outstanding");
            }
            AckOutcome::Retired { promoted } => {
                log::debug!("[sender] ← ACK seq={seq} in_flight={}", window.in_flight());
                if let Some(frame) = promoted {
                    log::debug!(
                        "[sender] → DATA seq={} len={} (slot freed)",
                        frame.seq(),
                        frame.payload_size()
                    );
                    self.ctx.to_lower_layer(self.codec.encode_frame(&frame));
                }
            }
        }
        self.sync_timer(before, &window, now);
    }

    /// The retransmission timer fired.
    pub fn on_timeout(&self) {
        let mut window = self.lock();
        let now = self.ctx.now();

        let resend = window.poll_timeout(now);
        if !resend.is_empty() {
            log::debug!("[sender] timeout, retransmitting {} frame(s)", resend.len());
        }
        for frame in &resend {
            self.ctx.to_lower_layer(self.codec.encode_frame(frame));
        }

        // The single-shot timer is spent; re-arm it for whatever deadline holds.
        if let Some(after) = window.timer().remaining(now) {
            self.ctx.start_timer(after);
        }
    }

    /// Run `f` against the current window state.
    pub fn with_window<R>(&self, f: impl FnOnce(&SenderWindow) -> R) -> R {
        f(&self.lock())
    }

    pub fn context(&self) -> &C {
        &self.ctx
    }

    /// Tell the harness about a moved or cancelled deadline.
    fn sync_timer(&self, before: Option<Instant>, window: &SenderWindow, now: Instant) {
        if window.deadline() == before {
            return;
        }
        match window.timer().remaining(now) {
            Some(after) => self.ctx.start_timer(after),
            None => self.ctx.stop_timer(),
        }
    }

    fn lock(&self) -> MutexGuard<'_, SenderWindow> {
        self.window.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

// ---------------------------------------------------------------------------
// ReceiverEndpoint
// ---------------------------------------------------------------------------

/// The receiver role: verification, per-frame acks, in-order delivery.
pub struct ReceiverEndpoint<C> {
    ctx: C,
    codec: Codec,
    window: Mutex<ReceiverWindow>,
}

impl<C: ReceiverContext> ReceiverEndpoint<C> {
    pub fn new(config: &Config, ctx: C) -> Result<Self, ConfigError> {
        let window = ReceiverWindow::new(config)?;
        Ok(Self {
            ctx,
            codec: Codec::new(config.frame_capacity),
            window: Mutex::new(window),
        })
    }

    pub fn init(&self) {
        log::info!(
            "[receiver] initialising: frame_capacity={}",
            self.codec.frame_capacity()
        );
    }

    pub fn teardown(&self) {
        let window = self.lock();
        if window.buffered() > 0 {
            log::warn!(
                "[receiver] finalising with {} frame(s) still buffered",
                window.buffered()
            );
        }
        log::info!(
            "[receiver] finalising: {} payload(s) delivered",
            window.delivered()
        );
    }

    /// Process a frame arriving from the channel.
    ///
    /// Malformed and corrupted frames vanish without an ack.  Every verified
    /// frame is acked with its own sequence number before any delivery.
    /// [`RecvError`] means the frame was dropped unacknowledged for lack of
    /// buffer space.
    pub fn on_frame(&self, bytes: &[u8]) -> Result<(), RecvError> {
        let mut window = self.lock();

        let frame = match self.codec.decode(bytes) {
            Ok(Packet::Data(frame)) => frame,
            Ok(Packet::Ack(seq)) => {
                log::trace!("[receiver] dropping frame with zero payload size (seq={seq})");
                return Ok(());
            }
            Err(e) if e.is_malformed() => {
                log::trace!("[receiver] dropping malformed frame: {e}");
                return Ok(());
            }
            Err(e) => {
                log::trace!("[receiver] dropping corrupted frame: {e}");
                return Ok(());
            }
        };

        let seq = frame.seq();
        let len = frame.payload_size();
        let reception = window.on_frame(frame).inspect_err(|e| {
            log::warn!("[receiver] {e}");
        })?;

        self.ctx.to_lower_layer(self.codec.encode_ack(seq));

        match reception {
            Reception::Stale => {
                log::trace!("[receiver] ← DATA seq={seq} stale; → ACK");
            }
            Reception::Duplicate => {
                log::trace!("[receiver] ← DATA seq={seq} already buffered; → ACK");
            }
            Reception::Buffered => {
                log::debug!(
                    "[receiver] ← DATA seq={seq} len={len} buffered (expecting {}); → ACK",
                    window.expected()
                );
            }
            Reception::Delivered(payloads) => {
                log::debug!(
                    "[receiver] ← DATA seq={seq} len={len}; → ACK; delivering {} payload(s)",
                    payloads.len()
                );
                for payload in payloads {
                    self.ctx.to_upper_layer(payload);
                }
            }
        }
        Ok(())
    }

    /// Run `f` against the current window state.
    pub fn with_window<R>(&self, f: impl FnOnce(&ReceiverWindow) -> R) -> R {
        f(&self.lock())
    }

    pub fn context(&self) -> &C {
        &self.ctx
    }

    fn lock(&self) -> MutexGuard<'_, ReceiverWindow> {
        self.window.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
