//! Connection finite-state machine (FSM) types.
//!
//! The protocol models only the opening half of TCP's state diagram.
//! Teardown is one-sided: the initiator sends FIN and stops, and the
//! responder answers and forgets the peer, so there are no FIN-WAIT or
//! TIME-WAIT states.
//!
//! ```text
//!  initiator:  CLOSED ──SYN sent──▶ SYN_SENT ──SYN-ACK──▶ ESTABLISHED
//!  responder:  CLOSED ──SYN rcvd──▶ SYN_RECEIVED ──ACK──▶ ESTABLISHED ──FIN──▶ (removed)
//! ```
//!
//! Transitions live in [`crate::connection`] (initiator) and
//! [`crate::receiver`] (responder).

use std::fmt;

/// All possible states of the connection FSM.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConnectionState {
    /// No connection exists; initial state.
    #[default]
    Closed,
    /// Initiator has sent SYN and is waiting for SYN-ACK.
    SynSent,
    /// Responder has answered a SYN and is waiting for the final ACK.
    SynReceived,
    /// Handshake complete; data transfer in progress.
    Established,
}

impl ConnectionState {
    /// `true` once DATA may flow.
    pub fn is_established(self) -> bool {
        self == Self::Established
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Closed => "CLOSED",
            Self::SynSent => "SYN_SENT",
            Self::SynReceived => "SYN_RECEIVED",
            Self::Established => "ESTABLISHED",
        };
        f.write_str(name)
    }
}
