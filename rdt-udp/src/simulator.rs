//! Synthetic packet loss for exercising the reliability mechanisms.
//!
//! Real networks drop packets; to observe retransmission on a loopback link
//! the responder consults a [`LossPolicy`] for every DATA packet from an
//! established peer and silently discards the ones it selects.  A simulated
//! drop is counted, never reported as a protocol error or a rejection.
//!
//! | Policy            | Behaviour                                          |
//! |-------------------|----------------------------------------------------|
//! | [`NoLoss`]        | Transparent pass-through.                          |
//! | [`RandomLoss`]    | Drops each packet with probability `rate`.         |
//! | [`DropSequences`] | Drops the first arrival of each listed sequence.   |

use std::collections::HashSet;
use std::fmt;
use std::sync::{Mutex, PoisonError};

use rand::Rng;

use crate::config::{validate_drop_rate, ConfigError};

/// Decides which inbound DATA packets the responder pretends never arrived.
///
/// Shared by every peer task, hence `Send + Sync`.
pub trait LossPolicy: Send + Sync + fmt::Debug {
    /// `true` to discard the DATA packet carrying `seq`.
    fn should_drop(&self, seq: u16) -> bool;

    /// Nominal drop probability, advertised to initiators in CONFIG.
    fn drop_rate(&self) -> f64;

    /// [`drop_rate`](Self::drop_rate) as a whole percentage (0–100).
    fn drop_percent(&self) -> u8 {
        (self.drop_rate().clamp(0.0, 1.0) * 100.0).round() as u8
    }
}

/// Never drops anything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoLoss;

impl LossPolicy for NoLoss {
    fn should_drop(&self, _seq: u16) -> bool {
        false
    }

    fn drop_rate(&self) -> f64 {
        0.0
    }
}

/// Independent uniform loss: each packet is dropped when a fresh draw from
/// `[0, 1)` falls below `rate`.
#[derive(Debug, Clone, Copy)]
pub struct RandomLoss {
    rate: f64,
}

impl RandomLoss {
    pub fn new(rate: f64) -> Result<Self, ConfigError> {
        validate_drop_rate(rate)?;
        Ok(Self { rate })
    }
}

impl LossPolicy for RandomLoss {
    fn should_drop(&self, _seq: u16) -> bool {
        rand::rng().random::<f64>() < self.rate
    }

    fn drop_rate(&self) -> f64 {
        self.rate
    }
}

/// Deterministic loss: drops the first copy of each listed sequence number
/// and lets every retransmission through.
#[derive(Debug, Default)]
pub struct DropSequences {
    remaining: Mutex<HashSet<u16>>,
}

impl DropSequences {
    pub fn new(seqs: impl IntoIterator<Item = u16>) -> Self {
        Self {
            remaining: Mutex::new(seqs.into_iter().collect()),
        }
    }

    /// Sequences whose first copy has not been seen yet.
    pub fn outstanding(&self) -> usize {
        self.remaining
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }
}

impl LossPolicy for DropSequences {
    fn should_drop(&self, seq: u16) -> bool {
        self.remaining
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&seq)
    }

    fn drop_rate(&self) -> f64 {
        0.0
    }
}
