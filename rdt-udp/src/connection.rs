//! Initiator-side connection lifecycle.
//!
//! A [`Connection`] is the result of a successful active open: it owns the
//! socket, remembers the peer and both initial sequence numbers, and carries
//! the [`TimeoutController`] whose value the handshake may have backed off.
//! Hand it to [`crate::session::SenderSession::from_connection`] to start
//! transferring data.
//!
//! The responder's half of the state machine lives in [`crate::receiver`].

use std::net::SocketAddr;

use rand::Rng;
use thiserror::Error;
use tokio::time::Instant;

use crate::config::{ConfigError, ProtocolConfig};
use crate::packet::{Packet, PacketError, PacketType};
use crate::socket::{is_transient_io_error, Socket, SocketError};
use crate::state::ConnectionState;
use crate::timer::TimeoutController;

/// Errors surfaced by the initiator.
#[derive(Debug, Error)]
pub enum ConnError {
    #[error(transparent)]
    Socket(#[from] SocketError),
    /// An outbound packet could not be built.
    #[error(transparent)]
    Packet(#[from] PacketError),
    #[error("invalid configuration: {0}")]
    Config(#[from] ConfigError),
    /// Every SYN went unanswered (or was answered with the wrong ack).
    #[error("handshake failed: no valid SYN-ACK after {attempts} attempts")]
    HandshakeFailed { attempts: u32 },
    /// Operation not legal in the current FSM state.
    #[error("operation not permitted in state {0}")]
    BadState(ConnectionState),
}

/// An established initiator-side connection.
#[derive(Debug)]
pub struct Connection {
    pub state: ConnectionState,
    pub socket: Socket,
    pub peer: SocketAddr,
    /// Initiator's initial sequence number (sent in the SYN).
    pub isn: u16,
    /// Responder's initial sequence number (learned from the SYN-ACK).
    pub peer_isn: u16,
    /// RTO as left by the handshake (doubled once per unanswered SYN).
    pub rto: TimeoutController,
}

impl Connection {
    /// Active open with a random 16-bit ISN.
    pub async fn connect(
        socket: Socket,
        peer: SocketAddr,
        config: &ProtocolConfig,
    ) -> Result<Self, ConnError> {
        let isn: u16 = rand::rng().random();
        Self::connect_with_isn(socket, peer, config, isn).await
    }

    /// Active open with a caller-chosen ISN.
    ///
    /// Sends SYN and waits up to the current RTO for a SYN-ACK whose ack is
    /// `isn + 1`; any other reply is ignored without extending the wait.  Each
    /// unanswered SYN doubles the RTO.  After `config.handshake_attempts`
    /// failures returns [`ConnError::HandshakeFailed`].
    pub async fn connect_with_isn(
        socket: Socket,
        peer: SocketAddr,
        config: &ProtocolConfig,
        isn: u16,
    ) -> Result<Self, ConnError> {
        let mut rto = TimeoutController::from_config(config);
        let mut state = ConnectionState::Closed;
        let syn = Packet::syn(isn).with_window(config.window_bytes);
        let expected_ack = isn.wrapping_add(1);

        for attempt in 1..=config.handshake_attempts {
            socket.send_to(&syn, peer).await?;
            state = ConnectionState::SynSent;
            log::info!(
                "[handshake] → SYN seq={isn} to {peer} (attempt {attempt}/{}, waiting {:?})",
                config.handshake_attempts,
                rto.current_timeout()
            );

            let deadline = Instant::now() + rto.current_timeout();
            loop {
                let remaining = deadline.saturating_duration_since(Instant::now());
                if remaining.is_zero() {
                    break;
                }
                match socket.recv_timeout(remaining).await {
                    Ok(Some((pkt, addr))) => {
                        let h = pkt.header;
                        if addr == peer && h.ptype == PacketType::SynAck && h.ack == expected_ack {
                            let ack = Packet::ack(expected_ack, h.seq.wrapping_add(1))
                                .with_window(config.window_bytes);
                            socket.send_to(&ack, peer).await?;
                            state = ConnectionState::Established;
                            log::info!(
                                "[handshake] ← SYN-ACK seq={}; → ACK ack={}, now {state}",
                                h.seq,
                                ack.header.ack
                            );
                            return Ok(Self {
                                state,
                                socket,
                                peer,
                                isn,
                                peer_isn: h.seq,
                                rto,
                            });
                        }
                        log::debug!(
                            "[handshake] ignoring {} ack={} from {addr} (want SYN-ACK ack={expected_ack})",
                            h.ptype,
                            h.ack
                        );
                    }
                    Ok(None) => break,
                    Err(SocketError::Packet { from, source }) => {
                        log::debug!("[handshake] discarding malformed datagram from {from}: {source}");
                    }
                    Err(SocketError::Io(e)) if is_transient_io_error(&e) => {
                        log::debug!("[handshake] transient receive error: {e}");
                    }
                    Err(e) => return Err(e.into()),
                }
            }

            rto.back_off();
            log::warn!("[handshake] no SYN-ACK (attempt {attempt}, state {state})");
        }

        Err(ConnError::HandshakeFailed {
            attempts: config.handshake_attempts,
        })
    }
}
