//! Initiator transfer loop: handshake + sliding-window data transfer + FIN.
//!
//! # Architecture
//!
//! ```text
//!  SenderSession::run
//!      │  loop until base == target
//!      ├── fill_window     ── DATA ──▶ responder
//!      ├── receive_ack     ◀── ACK / CONFIG ──
//!      └── check_timeout   ── DATA (all unacked) ──▶
//!      │
//!      └── FIN, then TransferReport
//!
//!  Arc<Mutex<SenderShared>>
//!    ├── SendWindow        (base, next_seq, bytes in flight, pending map)
//!    ├── TimeoutController (RTO + last 10 RTT samples)
//!    ├── RetransmitTimer
//!    └── counters          (sent, initial, retransmits, RTT log)
//! ```
//!
//! Every read-modify-write of the shared state happens under the one mutex.
//! The guard is never held across an `.await`.
//!
//! # Usage
//!
//! ```ignore
//! let config = SenderConfig::new("127.0.0.1:8080".parse()?, 30);
//! let mut session = SenderSession::connect(&config).await?;
//! let report = session.run().await?;
//! println!("{report}");
//! ```

use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use rand::Rng;

use crate::config::{default_payload, ProtocolConfig, SenderConfig};
use crate::connection::{ConnError, Connection};
use crate::packet::{Packet, PacketType};
use crate::sender::{chunk_range, SendWindow};
use crate::socket::{is_transient_io_error, Socket, SocketError};
use crate::state::ConnectionState;
use crate::stats::TransferReport;
use crate::timer::{RetransmitTimer, TimeoutController};

// ---------------------------------------------------------------------------
// Shared state
// ---------------------------------------------------------------------------

#[derive(Debug)]
struct SenderShared {
    window: SendWindow,
    rto: TimeoutController,
    timer: RetransmitTimer,
    rtt_log: Vec<f64>,
    sent: u64,
    initial_sent: u64,
    retransmits: u64,
    retransmitted: BTreeMap<u16, u32>,
    advertised_drop_percent: Option<u8>,
}

// ---------------------------------------------------------------------------
// SenderSession
// ---------------------------------------------------------------------------

/// The initiator's side of one transfer.
///
/// Obtain one via [`SenderSession::connect`] or
/// [`SenderSession::from_connection`] after completing the handshake with
/// [`Connection::connect`].
pub struct SenderSession {
    pub state: ConnectionState,
    socket: Arc<Socket>,
    peer: SocketAddr,
    config: ProtocolConfig,
    target_packets: u16,
    payload: Vec<u8>,
    shared: Arc<Mutex<SenderShared>>,
}

impl SenderSession {
    // -----------------------------------------------------------------------
    // Constructors
    // -----------------------------------------------------------------------

    /// Bind an ephemeral socket, perform the handshake with
    /// `config.server`, and return a session ready to [`run`](Self::run)
    /// over the default test payload.
    pub async fn connect(config: &SenderConfig) -> Result<Self, ConnError> {
        config.validate()?;
        let local: SocketAddr = if config.server.is_ipv4() {
            ([0, 0, 0, 0], 0).into()
        } else {
            (std::net::Ipv6Addr::UNSPECIFIED, 0).into()
        };
        let socket = Socket::bind(local).await?;
        let conn = Connection::connect(socket, config.server, &config.protocol).await?;
        Ok(Self::from_connection(
            conn,
            config.target_packets,
            config.protocol.clone(),
            default_payload(),
        ))
    }

    /// Build a session from an established [`Connection`].
    ///
    /// Window numbering restarts at zero; the RTO carries over whatever the
    /// handshake backed it off to.
    pub fn from_connection(
        conn: Connection,
        target_packets: u16,
        config: ProtocolConfig,
        payload: Vec<u8>,
    ) -> Self {
        let mut window = SendWindow::new(config.window_bytes);
        window.reset();
        let shared = SenderShared {
            window,
            rto: conn.rto,
            timer: RetransmitTimer::new(),
            rtt_log: Vec::new(),
            sent: 0,
            initial_sent: 0,
            retransmits: 0,
            retransmitted: BTreeMap::new(),
            advertised_drop_percent: None,
        };
        Self {
            state: conn.state,
            socket: Arc::new(conn.socket),
            peer: conn.peer,
            config,
            target_packets,
            payload,
            shared: Arc::new(Mutex::new(shared)),
        }
    }

    // -----------------------------------------------------------------------
    // Accessors
    // -----------------------------------------------------------------------

    pub fn peer(&self) -> SocketAddr {
        self.peer
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.socket.local_addr
    }

    /// Lowest unreleased sequence number.
    pub fn base(&self) -> u16 {
        self.lock().window.base
    }

    pub fn next_seq(&self) -> u16 {
        self.lock().window.next_seq
    }

    pub fn bytes_in_flight(&self) -> usize {
        self.lock().window.bytes_in_flight()
    }

    pub fn current_timeout(&self) -> std::time::Duration {
        self.lock().rto.current_timeout()
    }

    fn lock(&self) -> MutexGuard<'_, SenderShared> {
        self.shared.lock().unwrap_or_else(PoisonError::into_inner)
    }

    // -----------------------------------------------------------------------
    // Transfer
    // -----------------------------------------------------------------------

    /// Deliver `target_packets` DATA packets, then send FIN.
    ///
    /// Only socket failures end the loop early; lost packets and timeouts
    /// are handled by retransmission.
    pub async fn run(&mut self) -> Result<TransferReport, ConnError> {
        if !self.state.is_established() {
            return Err(ConnError::BadState(self.state));
        }
        log::info!(
            "[send] transferring {} packets to {}",
            self.target_packets,
            self.peer
        );

        while self.base() < self.target_packets {
            self.fill_window().await?;
            self.receive_ack().await?;
            self.check_timeout().await?;
        }

        let fin = Packet::fin(self.next_seq(), 0).with_window(self.config.window_bytes);
        self.socket.send_to(&fin, self.peer).await?;
        self.state = ConnectionState::Closed;
        log::info!(
            "[send] all {} packets acknowledged; → FIN seq={}",
            self.target_packets,
            fin.header.seq
        );

        Ok(self.report())
    }

    /// Step 1: transmit new DATA packets while the window has room.
    async fn fill_window(&self) -> Result<(), ConnError> {
        loop {
            let (seq, bytes, start, end) = {
                let mut shared = self.lock();
                if !shared.window.can_send(self.target_packets) {
                    return Ok(());
                }
                let size = rand::rng()
                    .random_range(self.config.min_chunk..=self.config.max_chunk)
                    .min(shared.window.remaining_window());
                let seq = shared.window.next_seq;
                let (start, end) =
                    chunk_range(seq, size, self.config.min_chunk, self.payload.len());
                let packet = Packet::data(seq, self.payload[start..end].to_vec())?
                    .with_window(self.config.window_bytes);
                let bytes = packet.encode();

                shared.window.record_sent(bytes.clone(), start, end);
                shared.sent += 1;
                shared.initial_sent += 1;
                if !shared.timer.is_running() {
                    shared.timer.start();
                }
                (seq, bytes, start, end)
            };

            self.socket.send_raw(&bytes, self.peer).await?;
            log::debug!("[send] → DATA seq={seq} bytes {start}..{end}");
        }
    }

    /// Step 2: wait briefly for one reply and apply it.
    async fn receive_ack(&self) -> Result<(), ConnError> {
        let wait = {
            let shared = self.lock();
            self.config
                .poll_interval
                .min(shared.rto.current_timeout())
        };

        let (packet, addr) = match self.socket.recv_timeout(wait).await {
            Ok(Some(received)) => received,
            Ok(None) => return Ok(()),
            Err(SocketError::Packet { from, source }) => {
                log::debug!("[ack] discarding malformed datagram from {from}: {source}");
                return Ok(());
            }
            Err(SocketError::Io(e)) if is_transient_io_error(&e) => {
                log::debug!("[ack] transient receive error: {e}");
                return Ok(());
            }
            Err(e) => return Err(e.into()),
        };
        if addr != self.peer {
            log::debug!("[ack] ignoring datagram from stranger {addr}");
            return Ok(());
        }

        let h = packet.header;
        match h.ptype {
            PacketType::Ack if h.ack > 0 => {
                let mut shared = self.lock();
                let outcome = shared.window.on_ack(h.ack);
                for &rtt in &outcome.rtt_samples {
                    shared.rto.record_sample(rtt);
                    shared.rtt_log.push(rtt);
                }
                if outcome.base_advance > 0 {
                    if shared.window.has_unacked() {
                        shared.timer.start();
                    } else {
                        shared.timer.stop();
                    }
                }
                if outcome.newly_acked() > 0 {
                    shared.rto.adjust();
                }
                log::debug!(
                    "[ack] ← ACK ack={} newly_acked={} base={} in_flight={}B",
                    h.ack,
                    outcome.newly_acked(),
                    shared.window.base,
                    shared.window.bytes_in_flight()
                );
            }
            PacketType::Config => {
                if let Some(percent) = packet.drop_percent() {
                    log::info!("[ack] responder simulates {percent}% DATA loss");
                    self.lock().advertised_drop_percent = Some(percent);
                }
            }
            other => log::debug!("[ack] ignoring {other} ack={}", h.ack),
        }
        Ok(())
    }

    /// Step 3: on RTO expiry resend every unacknowledged packet.
    async fn check_timeout(&self) -> Result<(), ConnError> {
        let resend = {
            let mut shared = self.lock();
            let rto = shared.rto.current_timeout();
            if !shared.timer.is_expired(rto) {
                return Ok(());
            }
            let resend = shared.window.prepare_retransmit();
            let count = resend.len() as u64;
            shared.sent += count;
            shared.retransmits += count;
            for (seq, _) in &resend {
                *shared.retransmitted.entry(*seq).or_default() += 1;
            }
            shared.timer.start();
            log::info!(
                "[timeout] RTO {:?} expired at base {}; retransmitting {count} packet(s)",
                rto,
                shared.window.base
            );
            resend
        };

        for (seq, bytes) in resend {
            self.socket.send_raw(&bytes, self.peer).await?;
            log::debug!("[timeout] → DATA seq={seq} (retransmit)");
        }
        Ok(())
    }

    /// Snapshot the counters into a [`TransferReport`].
    pub fn report(&self) -> TransferReport {
        let shared = self.lock();
        TransferReport {
            target_packets: self.target_packets,
            total_sent: shared.sent,
            initial_sent: shared.initial_sent,
            retransmits: shared.retransmits,
            rtt_samples: shared.rtt_log.clone(),
            advertised_drop_rate: shared
                .advertised_drop_percent
                .map(|p| f64::from(p) / 100.0),
            retransmitted: shared.retransmitted.clone(),
        }
    }
}
