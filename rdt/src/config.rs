//! Protocol parameters shared by both roles of a session.
//!
//! Everything here is a constant for the lifetime of one communicating pair:
//! the window never grows or shrinks and the retransmission timeout is fixed.
//! [`Config::validate`] is called by every constructor that accepts a
//! [`Config`], so an invalid value never reaches the state machines.

use std::time::Duration;

use thiserror::Error;

use crate::packet::{HEADER_LEN, MAX_FRAME_CAPACITY};

/// Adjustable protocol parameters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    /// Maximum number of frames in flight at once (W).
    pub window_size: usize,
    /// Size of every frame on the wire (C); payloads carry at most `C - 9` bytes.
    pub frame_capacity: usize,
    /// Retransmission timeout, measured from the oldest in-flight frame.
    pub timeout: Duration,
    /// Upper bound on frames the sender keeps outstanding (in flight + queued).
    pub max_queued_frames: usize,
    /// Upper bound on frames held in the receiver's reorder buffer.
    pub max_reorder_frames: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            window_size: 10,
            frame_capacity: 128,
            timeout: Duration::from_millis(300),
            max_queued_frames: 65_536,
            max_reorder_frames: 1_024,
        }
    }
}

impl Config {
    /// Largest payload a single frame can carry.
    pub fn max_payload(&self) -> usize {
        self.frame_capacity.saturating_sub(HEADER_LEN)
    }

    /// Check every field against its allowed range.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.window_size == 0 {
            return Err(ConfigError::ZeroWindow);
        }
        if self.frame_capacity <= HEADER_LEN || self.frame_capacity > MAX_FRAME_CAPACITY {
            return Err(ConfigError::FrameCapacity(self.frame_capacity));
        }
        if self.timeout.is_zero() {
            return Err(ConfigError::ZeroTimeout);
        }
        if self.max_queued_frames < self.window_size {
            return Err(ConfigError::QueueSmallerThanWindow {
                queue: self.max_queued_frames,
                window: self.window_size,
            });
        }
        if self.max_reorder_frames == 0 {
            return Err(ConfigError::ZeroReorderBuffer);
        }
        Ok(())
    }
}

/// A [`Config`] field outside its allowed range.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("window size must be at least 1")]
    ZeroWindow,
    #[error("frame capacity {0} outside {min}..={max}", min = HEADER_LEN + 1, max = MAX_FRAME_CAPACITY)]
    FrameCapacity(usize),
    #[error("retransmission timeout must be non-zero")]
    ZeroTimeout,
    #[error("queue cap {queue} is smaller than the window ({window})")]
    QueueSmallerThanWindow { queue: usize, window: usize },
    #[error("reorder buffer cap must be at least 1")]
    ZeroReorderBuffer,
}
