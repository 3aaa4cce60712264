//! Receive-side reorder engine.
//!
//! [`ReceiverWindow`] accepts frames in any order and releases their payloads
//! strictly by sequence number:
//!
//! - `seq < expected`: stale duplicate, payload discarded.
//! - `seq == expected`: delivered, then the reorder buffer is drained of
//!   every frame that has become contiguous.
//! - `seq > expected`: held in the reorder buffer (once) until its
//!   predecessors arrive.
//!
//! Acknowledging is the caller's job: every verified frame is acked with its
//! own sequence number, unless [`ReceiverWindow::on_frame`] returns an error.
//! This module only manages state (same pattern as [`crate::sender`]).

use std::collections::BTreeMap;

use thiserror::Error;

use crate::config::{Config, ConfigError};
use crate::packet::Frame;

/// Errors returned by [`ReceiverWindow::on_frame`].  No state changes.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum RecvError {
    /// The frame is ahead of the cursor and the reorder buffer is full.
    ///
    /// The frame must not be acknowledged; the sender will retransmit it.
    #[error("reorder buffer full ({limit} frames); dropping seq {seq}")]
    BufferFull { seq: u32, limit: usize },
}

/// What happened to an accepted frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reception {
    /// Already delivered earlier; payload discarded.
    Stale,
    /// Ahead of the cursor and already buffered; payload discarded.
    Duplicate,
    /// Ahead of the cursor; held for later.
    Buffered,
    /// In order: these payloads go upward now, oldest first.
    Delivered(Vec<Vec<u8>>),
}

/// Receive-side state for one session.
#[derive(Debug)]
pub struct ReceiverWindow {
    /// Next sequence number to deliver.
    expected: u32,
    /// Frames ahead of `expected`, keyed by sequence number.
    buffer: BTreeMap<u32, Vec<u8>>,
    max_buffered: usize,
    delivered: u64,
}

impl ReceiverWindow {
    /// Create a receiver expecting sequence number 0.
    pub fn new(config: &Config) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self {
            expected: 0,
            buffer: BTreeMap::new(),
            max_buffered: config.max_reorder_frames,
            delivered: 0,
        })
    }

    fn check_rep(&self) {
        if !cfg!(debug_assertions) {
            return;
        }
        assert!(self.buffer.len() <= self.max_buffered);
        if let Some((&lowest, _)) = self.buffer.first_key_value() {
            assert!(lowest > self.expected, "buffered frame {lowest} not ahead of cursor");
        }
    }

    /// Process one verified frame.
    pub fn on_frame(&mut self, frame: Frame) -> Result<Reception, RecvError> {
        let seq = frame.seq();

        if seq < self.expected {
            return Ok(Reception::Stale);
        }

        if seq > self.expected {
            if self.buffer.contains_key(&seq) {
                return Ok(Reception::Duplicate);
            }
            if self.buffer.len() >= self.max_buffered {
                return Err(RecvError::BufferFull {
                    seq,
                    limit: self.max_buffered,
                });
            }
            self.buffer.insert(seq, frame.into_payload());
            self.check_rep();
            return Ok(Reception::Buffered);
        }

        let mut payloads = vec![frame.into_payload()];
        self.advance();
        self.drain(&mut payloads);
        self.delivered += payloads.len() as u64;
        self.check_rep();
        Ok(Reception::Delivered(payloads))
    }

    /// Release every buffered frame that has become contiguous.
    fn drain(&mut self, payloads: &mut Vec<Vec<u8>>) {
        loop {
            // Anything below the cursor is stale and goes away.
            while let Some(entry) = self.buffer.first_entry() {
                if *entry.key() >= self.expected {
                    break;
                }
                entry.remove();
            }
            match self.buffer.remove(&self.expected) {
                Some(payload) => {
                    payloads.push(payload);
                    self.advance();
                }
                None => break,
            }
        }
    }

    fn advance(&mut self) {
        // Sequence numbers stop one short of u32::MAX, so this cannot wrap.
        self.expected += 1;
    }

    /// Next sequence number the receiver will deliver.
    pub fn expected(&self) -> u32 {
        self.expected
    }

    /// Number of frames held in the reorder buffer.
    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    /// Sequence numbers held in the reorder buffer, ascending.
    pub fn buffered_seqs(&self) -> Vec<u32> {
        self.buffer.keys().copied().collect()
    }

    /// Total number of payloads delivered so far.
    pub fn delivered(&self) -> u64 {
        self.delivered
    }
}
