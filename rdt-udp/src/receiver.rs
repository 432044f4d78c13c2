//! Responder-side per-peer state machine and cumulative acknowledger.
//!
//! [`PeerConnection`] holds everything the responder knows about one remote
//! address and turns each inbound [`Packet`] into a [`PeerEvent`] describing
//! what to send back:
//!
//! - SYN → SYN-ACK, state `SYN_RECEIVED`.
//! - ACK while `SYN_RECEIVED` → `ESTABLISHED`, then a CONFIG packet
//!   advertising the simulated drop rate.
//! - DATA while `ESTABLISHED` → consult the [`LossPolicy`]; if kept, compare
//!   with `expected_seq` and answer with a cumulative ACK of `expected_seq`.
//!   Out-of-order and duplicate packets are counted but **not** buffered;
//!   the repeated ACK value is the sender's only hint.
//! - FIN in any state → FIN reply, and the caller forgets the peer.
//!
//! This module only manages state; all socket I/O is the caller's
//! responsibility.

use rand::Rng;

use crate::packet::{Packet, PacketType};
use crate::simulator::LossPolicy;
use crate::state::ConnectionState;

/// What the responder should do after feeding one packet to a peer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PeerEvent {
    /// SYN answered; send the SYN-ACK.
    SynAck(Packet),
    /// Handshake completed; send the CONFIG packet.
    Established(Packet),
    /// DATA kept; send the cumulative ACK.  `in_order` is `false` for gaps
    /// and duplicates.
    Data { seq: u16, in_order: bool, ack: Packet },
    /// DATA discarded by the loss policy; send nothing.
    Dropped { seq: u16 },
    /// DATA/ACK arrived before the handshake finished; send nothing.
    Rejected { ptype: PacketType, state: ConnectionState },
    /// FIN received; send the reply and delete this peer.
    Closed(Packet),
    /// Anything else (stray SYN-ACK, CONFIG, unknown kinds, late ACKs).
    Ignored,
}

/// Responder-side state for one remote address.
#[derive(Debug, Default, Clone)]
pub struct PeerConnection {
    pub state: ConnectionState,
    /// Next in-order sequence number this peer should send (`RCV.NXT`).
    pub expected_seq: u16,
    /// Responder's own handshake sequence number.
    pub local_seq: u16,
    pub in_order: u64,
    pub out_of_order: u64,
    pub dropped: u64,
}

impl PeerConnection {
    pub fn new() -> Self {
        Self::default()
    }

    /// Dispatch one inbound packet, drawing a random ISN for a SYN.
    pub fn handle(&mut self, packet: &Packet, loss: &dyn LossPolicy) -> PeerEvent {
        let h = packet.header;
        match h.ptype {
            PacketType::Syn => self.on_syn(h.seq, rand::rng().random()),
            PacketType::Ack => self.on_ack(loss.drop_percent()),
            PacketType::Data => self.on_data(h.seq, loss),
            PacketType::Fin => self.on_fin(h.seq),
            PacketType::SynAck | PacketType::Config | PacketType::Unknown(_) => PeerEvent::Ignored,
        }
    }

    /// Answer a SYN carrying `peer_seq` using `local_seq` as our ISN.
    ///
    /// A repeated SYN restarts the handshake.
    pub fn on_syn(&mut self, peer_seq: u16, local_seq: u16) -> PeerEvent {
        self.state = ConnectionState::SynReceived;
        self.local_seq = local_seq;
        self.expected_seq = 0;
        PeerEvent::SynAck(Packet::syn_ack(local_seq, peer_seq.wrapping_add(1)))
    }

    /// Handle an ACK.  Only meaningful as the last step of the handshake.
    pub fn on_ack(&mut self, drop_percent: u8) -> PeerEvent {
        match self.state {
            ConnectionState::SynReceived => {
                self.state = ConnectionState::Established;
                self.expected_seq = 0;
                PeerEvent::Established(Packet::config(drop_percent))
            }
            ConnectionState::Established => PeerEvent::Ignored,
            state => PeerEvent::Rejected {
                ptype: PacketType::Ack,
                state,
            },
        }
    }

    /// Handle a DATA packet carrying `seq`.
    pub fn on_data(&mut self, seq: u16, loss: &dyn LossPolicy) -> PeerEvent {
        if !self.state.is_established() {
            return PeerEvent::Rejected {
                ptype: PacketType::Data,
                state: self.state,
            };
        }
        if loss.should_drop(seq) {
            self.dropped += 1;
            return PeerEvent::Dropped { seq };
        }

        let in_order = seq == self.expected_seq;
        if in_order {
            self.expected_seq = self.expected_seq.wrapping_add(1);
            self.in_order += 1;
        } else {
            self.out_of_order += 1;
        }
        PeerEvent::Data {
            seq,
            in_order,
            ack: Packet::timestamped_ack(self.expected_seq),
        }
    }

    /// Handle a FIN carrying `seq`; the caller must delete this record.
    pub fn on_fin(&mut self, seq: u16) -> PeerEvent {
        self.state = ConnectionState::Closed;
        PeerEvent::Closed(Packet::fin(0, seq.wrapping_add(1)))
    }
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------
