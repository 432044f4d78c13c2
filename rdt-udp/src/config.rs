//! Tunable protocol parameters.
//!
//! Every knob has a default matching the fixed parameters of the protocol:
//! a 400-byte window, 40–80 byte chunks, a 0.3 s initial RTO recomputed from
//! the median of the last 10 RTT samples, and 5 handshake attempts.
//! Tests shrink the timings; the CLI only exposes addresses, packet count
//! and drop rate.

use std::net::SocketAddr;
use std::time::Duration;

use thiserror::Error;

use crate::packet::{ADVERTISED_WINDOW, MAX_PAYLOAD};

/// Payload the initiator slices its chunks from.
pub const TEST_PAYLOAD_UNIT: &[u8] = b"TestData";
pub const TEST_PAYLOAD_REPEAT: usize = 1000;

/// Build the default transfer payload (`"TestData"` repeated 1000 times).
pub fn default_payload() -> Vec<u8> {
    TEST_PAYLOAD_UNIT.repeat(TEST_PAYLOAD_REPEAT)
}

/// Errors raised by [`ProtocolConfig::validate`] and friends.
#[derive(Debug, Error, PartialEq)]
pub enum ConfigError {
    #[error("drop rate {0} is outside [0.0, 1.0]")]
    DropRate(f64),
    #[error("target packet count must be at least 1")]
    ZeroTarget,
    #[error("chunk size range {min}..={max} is empty or exceeds {MAX_PAYLOAD} bytes")]
    ChunkRange { min: usize, max: usize },
    #[error("window of {0} bytes cannot hold a single minimum-size chunk")]
    Window(u16),
    #[error("handshake needs at least one attempt")]
    NoHandshakeAttempts,
    #[error("RTT sample depth must be at least 1")]
    SampleDepth,
}

/// Parameters shared by both ends of a transfer.
#[derive(Debug, Clone)]
pub struct ProtocolConfig {
    /// Byte budget for unacknowledged payload.
    pub window_bytes: u16,
    /// Smallest chunk the sender draws; also the stride used to locate a
    /// sequence number's bytes in the source payload.
    pub min_chunk: usize,
    /// Largest chunk the sender draws.
    pub max_chunk: usize,
    /// RTO before any samples exist.
    pub initial_rto: Duration,
    /// Number of recent RTT samples the median is taken over.
    pub rtt_sample_depth: usize,
    /// RTO = multiplier × median RTT.
    pub rto_multiplier: u32,
    /// SYNs sent before the handshake gives up.
    pub handshake_attempts: u32,
    /// Upper bound on each receive attempt inside the transfer loop.
    pub poll_interval: Duration,
}

impl Default for ProtocolConfig {
    fn default() -> Self {
        Self {
            window_bytes: ADVERTISED_WINDOW,
            min_chunk: 40,
            max_chunk: 80,
            initial_rto: Duration::from_millis(300),
            rtt_sample_depth: 10,
            rto_multiplier: 5,
            handshake_attempts: 5,
            poll_interval: Duration::from_millis(100),
        }
    }
}

impl ProtocolConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.min_chunk == 0 || self.min_chunk > self.max_chunk || self.max_chunk > MAX_PAYLOAD {
            return Err(ConfigError::ChunkRange {
                min: self.min_chunk,
                max: self.max_chunk,
            });
        }
        if (self.window_bytes as usize) < self.min_chunk {
            return Err(ConfigError::Window(self.window_bytes));
        }
        if self.handshake_attempts == 0 {
            return Err(ConfigError::NoHandshakeAttempts);
        }
        if self.rtt_sample_depth == 0 {
            return Err(ConfigError::SampleDepth);
        }
        Ok(())
    }
}

/// Initiator-side configuration.
#[derive(Debug, Clone)]
pub struct SenderConfig {
    pub server: SocketAddr,
    /// Number of DATA packets to deliver before sending FIN.
    pub target_packets: u16,
    pub protocol: ProtocolConfig,
}

impl SenderConfig {
    pub fn new(server: SocketAddr, target_packets: u16) -> Self {
        Self {
            server,
            target_packets,
            protocol: ProtocolConfig::default(),
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.target_packets == 0 {
            return Err(ConfigError::ZeroTarget);
        }
        self.protocol.validate()
    }
}

/// Responder-side configuration.
#[derive(Debug, Clone)]
pub struct ResponderConfig {
    pub bind: SocketAddr,
    /// Probability in `[0.0, 1.0]` that an inbound DATA packet is discarded.
    pub drop_rate: f64,
    pub protocol: ProtocolConfig,
}

impl ResponderConfig {
    pub fn new(bind: SocketAddr, drop_rate: f64) -> Self {
        Self {
            bind,
            drop_rate,
            protocol: ProtocolConfig::default(),
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        validate_drop_rate(self.drop_rate)?;
        self.protocol.validate()
    }
}

pub fn validate_drop_rate(rate: f64) -> Result<(), ConfigError> {
    if (0.0..=1.0).contains(&rate) {
        Ok(())
    } else {
        Err(ConfigError::DropRate(rate))
    }
}
