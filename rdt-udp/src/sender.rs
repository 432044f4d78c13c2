//! Sliding-window send-side state.
//!
//! [`SendWindow`] tracks every packet that has been transmitted but not yet
//! released, keyed by sequence number.  The window is bounded by a **byte**
//! budget rather than a packet count: new packets may be sent while the sum
//! of unacknowledged payload bytes is below `window_bytes`.
//!
//! # Protocol contract
//!
//! - ACKs are **cumulative**: `ack = K` means every packet with `seq < K`
//!   has arrived.
//! - A packet's bytes are released the moment it is acknowledged, but the
//!   entry itself is evicted only when it is the window base, so `base`
//!   moves strictly forward over a contiguous acknowledged prefix.
//! - On timeout the caller retransmits **every** unacknowledged entry.
//!
//! This module only manages state; all socket I/O is the caller's
//! responsibility.

use std::collections::BTreeMap;

use tokio::time::Instant;

// ---------------------------------------------------------------------------
// PendingPacket
// ---------------------------------------------------------------------------

/// A transmitted packet awaiting release from the window.
#[derive(Debug, Clone)]
pub struct PendingPacket {
    /// Encoded datagram, resent verbatim on timeout.
    pub bytes: Vec<u8>,
    /// Time of the most recent transmission (for RTT sampling).
    pub sent_at: Instant,
    /// Payload byte range `[start, end)` within the source data.
    pub start: usize,
    pub end: usize,
    pub acked: bool,
    /// Retransmissions so far (0 = sent once).
    pub retries: u32,
}

impl PendingPacket {
    /// Payload size; the amount charged against the window.
    pub fn len(&self) -> usize {
        self.end - self.start
    }

    pub fn is_empty(&self) -> bool {
        self.start == self.end
    }
}

/// What a single ACK did to the window.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct AckOutcome {
    /// RTT in milliseconds of every packet this ACK newly acknowledged.
    pub rtt_samples: Vec<f64>,
    /// How far `base` moved.
    pub base_advance: u16,
}

impl AckOutcome {
    pub fn newly_acked(&self) -> usize {
        self.rtt_samples.len()
    }
}

// ---------------------------------------------------------------------------
// SendWindow
// ---------------------------------------------------------------------------

/// Send-side window state for one transfer.
///
/// # Sequence-number layout
///
/// ```text
///  base               next_seq
///    │                    │
///  ──┼────────────────────┼──────────────────▶ seq space
///    │ <── outstanding ──▶│ <── sendable ───▶
/// ```
#[derive(Debug)]
pub struct SendWindow {
    /// Lowest sequence number not yet released (left window edge).
    pub base: u16,
    /// Sequence number to assign to the next new packet.
    pub next_seq: u16,
    bytes_in_flight: usize,
    window_bytes: usize,
    pending: BTreeMap<u16, PendingPacket>,
}

impl SendWindow {
    pub fn new(window_bytes: u16) -> Self {
        Self {
            base: 0,
            next_seq: 0,
            bytes_in_flight: 0,
            window_bytes: window_bytes as usize,
            pending: BTreeMap::new(),
        }
    }

    /// Forget everything and restart numbering at zero.
    pub fn reset(&mut self) {
        self.base = 0;
        self.next_seq = 0;
        self.bytes_in_flight = 0;
        self.pending.clear();
    }

    /// `true` when another packet may be sent toward a `target`-packet transfer.
    pub fn can_send(&self, target: u16) -> bool {
        self.next_seq < target && self.bytes_in_flight < self.window_bytes
    }

    /// Window bytes still available for new payload.
    pub fn remaining_window(&self) -> usize {
        self.window_bytes.saturating_sub(self.bytes_in_flight)
    }

    pub fn bytes_in_flight(&self) -> usize {
        self.bytes_in_flight
    }

    pub fn window_bytes(&self) -> usize {
        self.window_bytes
    }

    /// `true` while any entry is still buffered.
    pub fn has_unacked(&self) -> bool {
        !self.pending.is_empty()
    }

    pub fn pending(&self, seq: u16) -> Option<&PendingPacket> {
        self.pending.get(&seq)
    }

    /// Place a packet carrying `data[start..end]` into the window under
    /// `next_seq` and advance `next_seq`.
    ///
    /// Returns the sequence number it was recorded under.
    pub fn record_sent(&mut self, bytes: Vec<u8>, start: usize, end: usize) -> u16 {
        debug_assert!(start <= end);
        debug_assert!(
            self.bytes_in_flight + (end - start) <= self.window_bytes,
            "record_sent would overrun the window ({} + {} > {})",
            self.bytes_in_flight,
            end - start,
            self.window_bytes
        );
        let seq = self.next_seq;
        self.pending.insert(
            seq,
            PendingPacket {
                bytes,
                sent_at: Instant::now(),
                start,
                end,
                acked: false,
                retries: 0,
            },
        );
        self.bytes_in_flight += end - start;
        self.next_seq = self.next_seq.wrapping_add(1);
        seq
    }

    /// Process a cumulative ACK.
    ///
    /// Every buffered, not-yet-acknowledged packet with `seq < ack` is
    /// marked acknowledged, sampled for RTT, and has its bytes released.
    /// Then `base` advances over the contiguous acknowledged prefix and
    /// those entries are evicted.  A stale or duplicate ACK returns an
    /// empty outcome.
    pub fn on_ack(&mut self, ack: u16) -> AckOutcome {
        let now = Instant::now();
        let mut outcome = AckOutcome::default();

        for entry in self.pending.range_mut(..ack).map(|(_, e)| e) {
            if entry.acked {
                continue;
            }
            entry.acked = true;
            self.bytes_in_flight -= entry.end - entry.start;
            outcome
                .rtt_samples
                .push(now.duration_since(entry.sent_at).as_secs_f64() * 1000.0);
        }

        while self.pending.get(&self.base).is_some_and(|e| e.acked) {
            self.pending.remove(&self.base);
            self.base = self.base.wrapping_add(1);
            outcome.base_advance += 1;
        }
        outcome
    }

    /// Stamp every unacknowledged entry as resent now and return
    /// `(seq, bytes)` pairs in sequence order for the caller to transmit.
    pub fn prepare_retransmit(&mut self) -> Vec<(u16, Vec<u8>)> {
        let now = Instant::now();
        self.pending
            .iter_mut()
            .filter(|(_, e)| !e.acked)
            .map(|(&seq, e)| {
                e.sent_at = now;
                e.retries += 1;
                (seq, e.bytes.clone())
            })
            .collect()
    }
}

/// Byte range of the source payload that sequence number `seq` carries.
///
/// Chunks are located at `seq × stride` (the minimum chunk size) and are
/// `size` bytes long, both clamped to the end of a `data_len`-byte payload.
pub fn chunk_range(seq: u16, size: usize, stride: usize, data_len: usize) -> (usize, usize) {
    let start = (seq as usize * stride).min(data_len);
    let end = start + size.min(data_len - start);
    (start, end)
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------
