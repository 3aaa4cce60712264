//! Deterministic fault-injecting channel.
//!
//! Real links drop, corrupt, duplicate and reorder frames.  To exercise the
//! reliability mechanisms without depending on actual network conditions,
//! [`FaultyChannel`] sits between the two roles and applies a configurable
//! fault model to every frame handed to it:
//!
//! | Fault       | Description                                              |
//! |-------------|----------------------------------------------------------|
//! | Loss        | Drop the frame with probability `loss_rate`.             |
//! | Corruption  | Flip one random bit with probability `corrupt_rate`.     |
//! | Duplication | Emit the frame twice with probability `duplicate_rate`.  |
//! | Reordering  | Hold the frame back with probability `reorder_rate`; it  |
//! |             | is released behind the next frame to pass through.       |
//!
//! All randomness comes from a `StdRng` seeded from [`SimulatorConfig::seed`],
//! so a failing run can be replayed exactly.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use thiserror::Error;

/// Configuration for the fault model.
///
/// All probabilities are in the range `[0.0, 1.0]`.
#[derive(Debug, Clone, PartialEq)]
pub struct SimulatorConfig {
    /// Probability that a frame is silently dropped.
    pub loss_rate: f64,
    /// Probability that a surviving frame has one bit flipped.
    pub corrupt_rate: f64,
    /// Probability that a surviving frame is delivered twice.
    pub duplicate_rate: f64,
    /// Probability that a frame is overtaken by its successor.
    pub reorder_rate: f64,
    /// RNG seed.
    pub seed: u64,
}

impl Default for SimulatorConfig {
    fn default() -> Self {
        // No faults: a transparent pass-through.
        Self {
            loss_rate: 0.0,
            corrupt_rate: 0.0,
            duplicate_rate: 0.0,
            reorder_rate: 0.0,
            seed: 0,
        }
    }
}

#[derive(Debug, Error, PartialEq)]
pub enum SimulatorError {
    #[error("{name} must be within [0, 1], got {value}")]
    RateOutOfRange { name: &'static str, value: f64 },
}

impl SimulatorConfig {
    pub fn validate(&self) -> Result<(), SimulatorError> {
        let rates = [
            ("loss_rate", self.loss_rate),
            ("corrupt_rate", self.corrupt_rate),
            ("duplicate_rate", self.duplicate_rate),
            ("reorder_rate", self.reorder_rate),
        ];
        for (name, value) in rates {
            if !(0.0..=1.0).contains(&value) {
                return Err(SimulatorError::RateOutOfRange { name, value });
            }
        }
        Ok(())
    }

    /// Same fault model with an independent random stream.
    ///
    /// Used to give each direction of a session its own channel.
    pub fn for_link(&self, link: u64) -> Self {
        Self {
            seed: self.seed.wrapping_add(link),
            ..self.clone()
        }
    }

    /// `true` when no fault can ever fire.
    pub fn is_transparent(&self) -> bool {
        self.loss_rate == 0.0
            && self.corrupt_rate == 0.0
            && self.duplicate_rate == 0.0
            && self.reorder_rate == 0.0
    }
}

/// Counters for everything the channel did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ChannelStats {
    pub offered: u64,
    pub lost: u64,
    pub corrupted: u64,
    pub duplicated: u64,
    pub reordered: u64,
    /// Held frames released by [`FaultyChannel::flush`].
    pub flushed: u64,
}

/// A one-directional lossy link.
#[derive(Debug)]
pub struct FaultyChannel {
    config: SimulatorConfig,
    rng: StdRng,
    /// Frame waiting to be overtaken.
    held: Option<Vec<u8>>,
    stats: ChannelStats,
}

impl FaultyChannel {
    pub fn new(config: SimulatorConfig) -> Result<Self, SimulatorError> {
        config.validate()?;
        Ok(Self {
            rng: StdRng::seed_from_u64(config.seed),
            config,
            held: None,
            stats: ChannelStats::default(),
        })
    }

    /// Offer one frame to the link.
    ///
    /// Returns the frames that come out of the far end, in arrival order.
    /// That may be nothing, this frame (possibly damaged or twice), and a
    /// previously held frame behind it.
    pub fn transmit(&mut self, frame: Vec<u8>) -> Vec<Vec<u8>> {
        self.stats.offered += 1;
        let overtaken = self.held.take();
        let mut out = Vec::with_capacity(3);

        if self.rng.random_bool(self.config.loss_rate) {
            self.stats.lost += 1;
            log::trace!("[sim] dropped {}-byte frame", frame.len());
        } else {
            let mut frame = frame;
            if !frame.is_empty() && self.rng.random_bool(self.config.corrupt_rate) {
                let byte = self.rng.random_range(0..frame.len());
                let bit = self.rng.random_range(0..8u32);
                frame[byte] ^= 1 << bit;
                self.stats.corrupted += 1;
                log::trace!("[sim] flipped bit {bit} of byte {byte}");
            }

            let copies = if self.rng.random_bool(self.config.duplicate_rate) {
                self.stats.duplicated += 1;
                2
            } else {
                1
            };
            for _ in 0..copies {
                if self.held.is_none() && self.rng.random_bool(self.config.reorder_rate) {
                    self.stats.reordered += 1;
                    self.held = Some(frame.clone());
                } else {
                    out.push(frame.clone());
                }
            }
        }

        out.extend(overtaken);
        out
    }

    /// Release the held frame, if any.
    pub fn flush(&mut self) -> Option<Vec<u8>> {
        let held = self.held.take();
        if let Some(frame) = &held {
            self.stats.flushed += 1;
            log::trace!("[sim] flushing held {}-byte frame", frame.len());
        }
        held
    }

    pub fn is_holding(&self) -> bool {
        self.held.is_some()
    }

    pub fn stats(&self) -> ChannelStats {
        self.stats
    }
}
