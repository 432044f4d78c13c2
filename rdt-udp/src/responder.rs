//! Multi-peer responder.
//!
//! # Architecture
//!
//! ```text
//!            UDP socket (shared)
//!                  │ recv_from
//!           ┌──────▼──────┐
//!           │ Responder:: │   peers: Mutex<HashMap<addr, tx>>
//!           │    run      │───────────────┐
//!           └──────┬──────┘               │ route by source address
//!        unknown + SYN│ spawn            ▼
//!           ┌─────────▼───┐   ┌───────────────┐
//!           │ serve_peer  │   │  serve_peer   │  one task per peer,
//!           │ (PeerConn.) │   │  (PeerConn.)  │  packets handled in order
//!           └─────────────┘   └───────────────┘
//! ```
//!
//! The receive loop never blocks on a peer: it only pushes the packet down
//! that peer's unbounded channel.  Each task owns its [`PeerConnection`], so
//! per-peer state needs no lock.  On FIN the task unregisters itself while
//! holding the peer map lock and re-routes anything still queued, so a SYN
//! that raced the FIN starts a fresh session instead of being lost.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use thiserror::Error;
use tokio::sync::mpsc;

use crate::config::{ConfigError, ResponderConfig};
use crate::packet::{Packet, PacketType};
use crate::receiver::{PeerConnection, PeerEvent};
use crate::simulator::{LossPolicy, RandomLoss};
use crate::socket::{is_transient_io_error, Socket, SocketError};

#[derive(Debug, Error)]
pub enum ResponderError {
    #[error(transparent)]
    Socket(#[from] SocketError),
    #[error("invalid configuration: {0}")]
    Config(#[from] ConfigError),
}

/// A peer whose session ended with FIN.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClosedSession {
    pub peer: SocketAddr,
    /// Number of in-order DATA packets accepted.
    pub expected_seq: u16,
    pub in_order: u64,
    pub out_of_order: u64,
    pub dropped: u64,
}

/// Counters across every peer.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResponderStats {
    /// DATA packets routed to an established peer, dropped ones included.
    pub data_received: u64,
    pub dropped: u64,
    pub in_order: u64,
    pub out_of_order: u64,
    pub handshakes: u64,
    /// Packets refused because of the peer's state (or lack of one).
    pub rejected: u64,
    pub malformed: u64,
    /// Replies written to the socket.
    pub sent: u64,
    pub closed_sessions: Vec<ClosedSession>,
}

type PeerMap = HashMap<SocketAddr, mpsc::UnboundedSender<Packet>>;

#[derive(Debug)]
struct Shared {
    socket: Socket,
    loss: Arc<dyn LossPolicy>,
    peers: Mutex<PeerMap>,
    stats: Mutex<ResponderStats>,
}

impl Shared {
    fn peers(&self) -> MutexGuard<'_, PeerMap> {
        self.peers.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn stats(&self) -> MutexGuard<'_, ResponderStats> {
        self.stats.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Accepts connections from any number of initiators on one socket.
///
/// Cheap to clone; clones share the socket, peer table and counters.
#[derive(Debug, Clone)]
pub struct Responder {
    inner: Arc<Shared>,
}

impl Responder {
    /// Bind to `config.bind` with a [`RandomLoss`] policy at
    /// `config.drop_rate`.
    pub async fn bind(config: &ResponderConfig) -> Result<Self, ResponderError> {
        config.validate()?;
        let loss = RandomLoss::new(config.drop_rate)?;
        Self::with_policy(config.bind, Arc::new(loss)).await
    }

    /// Bind to `addr` with a caller-supplied loss policy.
    pub async fn with_policy(
        addr: SocketAddr,
        loss: Arc<dyn LossPolicy>,
    ) -> Result<Self, ResponderError> {
        let socket = Socket::bind(addr).await?;
        log::info!(
            "[responder] listening on {} (simulated drop rate {}%)",
            socket.local_addr,
            loss.drop_percent()
        );
        Ok(Self {
            inner: Arc::new(Shared {
                socket,
                loss,
                peers: Mutex::new(HashMap::new()),
                stats: Mutex::new(ResponderStats::default()),
            }),
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.inner.socket.local_addr
    }

    /// Snapshot of the counters.
    pub fn stats(&self) -> ResponderStats {
        self.inner.stats().clone()
    }

    /// Number of peers with a live session.
    pub fn peer_count(&self) -> usize {
        self.inner.peers().len()
    }

    /// Receive and dispatch datagrams forever.
    ///
    /// Malformed datagrams and transient receive errors are logged and
    /// skipped; only a hard socket failure returns.
    pub async fn run(&self) -> Result<(), ResponderError> {
        loop {
            match self.inner.socket.recv_from().await {
                Ok((packet, addr)) => {
                    let mut peers = self.inner.peers();
                    route(&self.inner, &mut peers, packet, addr);
                }
                Err(SocketError::Packet { from, source }) => {
                    self.inner.stats().malformed += 1;
                    log::warn!("[responder] malformed datagram from {from}: {source}");
                }
                Err(SocketError::Io(e)) if is_transient_io_error(&e) => {
                    log::debug!("[responder] transient receive error: {e}");
                }
                Err(e) => return Err(e.into()),
            }
        }
    }
}

/// Hand `packet` to the task serving `addr`, spawning one for a new SYN.
///
/// Callers hold the peer map lock, which keeps lookup, insert and removal
/// atomic with respect to each other.
fn route(shared: &Arc<Shared>, peers: &mut PeerMap, packet: Packet, addr: SocketAddr) {
    let packet = match peers.get(&addr) {
        Some(tx) => match tx.send(packet) {
            Ok(()) => return,
            // The task died without unregistering; treat the peer as unknown.
            Err(mpsc::error::SendError(packet)) => {
                peers.remove(&addr);
                packet
            }
        },
        None => packet,
    };

    if packet.header.ptype != PacketType::Syn {
        shared.stats().rejected += 1;
        log::debug!(
            "[responder] rejecting {} from unknown peer {addr}",
            packet.header.ptype
        );
        return;
    }

    let (tx, rx) = mpsc::unbounded_channel();
    // Cannot fail: rx is alive.
    let _ = tx.send(packet);
    peers.insert(addr, tx);
    log::debug!("[responder] new peer {addr} ({} active)", peers.len());
    tokio::spawn(serve_peer(Arc::clone(shared), addr, rx));
}

/// Drive one peer's [`PeerConnection`] until FIN.
async fn serve_peer(
    shared: Arc<Shared>,
    addr: SocketAddr,
    mut rx: mpsc::UnboundedReceiver<Packet>,
) {
    let mut conn = PeerConnection::new();

    while let Some(packet) = rx.recv().await {
        let event = conn.handle(&packet, shared.loss.as_ref());
        let reply = match event {
            PeerEvent::SynAck(reply) => {
                log::info!(
                    "[responder] ← SYN seq={} from {addr}; → SYN-ACK",
                    packet.header.seq
                );
                Some(reply)
            }
            PeerEvent::Established(config) => {
                shared.stats().handshakes += 1;
                log::info!("[responder] {addr} established; → CONFIG");
                Some(config)
            }
            PeerEvent::Data { seq, in_order, ack } => {
                let mut stats = shared.stats();
                stats.data_received += 1;
                if in_order {
                    stats.in_order += 1;
                } else {
                    stats.out_of_order += 1;
                }
                log::debug!(
                    "[responder] ← DATA seq={seq} from {addr} ({}); → ACK ack={}",
                    if in_order { "in order" } else { "out of order" },
                    ack.header.ack
                );
                Some(ack)
            }
            PeerEvent::Dropped { seq } => {
                let mut stats = shared.stats();
                stats.data_received += 1;
                stats.dropped += 1;
                log::debug!("[responder] simulated loss of DATA seq={seq} from {addr}");
                None
            }
            PeerEvent::Rejected { ptype, state } => {
                shared.stats().rejected += 1;
                log::debug!("[responder] rejecting {ptype} from {addr} in state {state}");
                None
            }
            PeerEvent::Closed(fin) => {
                send_reply(&shared, &fin, addr).await;
                unregister(&shared, addr, &mut rx, &conn);
                log::info!(
                    "[responder] ← FIN from {addr}; session closed after {} in-order packets",
                    conn.expected_seq
                );
                return;
            }
            PeerEvent::Ignored => None,
        };

        if let Some(reply) = reply {
            send_reply(&shared, &reply, addr).await;
        }
    }
}

async fn send_reply(shared: &Shared, packet: &Packet, addr: SocketAddr) {
    match shared.socket.send_to(packet, addr).await {
        Ok(()) => shared.stats().sent += 1,
        Err(e) => log::warn!("[responder] failed to send {} to {addr}: {e}", packet.header.ptype),
    }
}

/// Remove `addr` from the peer map and re-route whatever is still queued.
fn unregister(
    shared: &Arc<Shared>,
    addr: SocketAddr,
    rx: &mut mpsc::UnboundedReceiver<Packet>,
    conn: &PeerConnection,
) {
    let mut peers = shared.peers();
    peers.remove(&addr);
    rx.close();
    while let Ok(leftover) = rx.try_recv() {
        route(shared, &mut peers, leftover, addr);
    }
    drop(peers);

    shared.stats().closed_sessions.push(ClosedSession {
        peer: addr,
        expected_seq: conn.expected_seq,
        in_order: conn.in_order,
        out_of_order: conn.out_of_order,
        dropped: conn.dropped,
    });
}
