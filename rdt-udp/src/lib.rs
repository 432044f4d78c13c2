//! `rdt-udp`: reliable data transfer over UDP.
//!
//! An initiator opens a connection with a three-way handshake, streams a
//! fixed number of DATA packets through a byte-budgeted sliding window with
//! cumulative ACKs and timeout-driven retransmission, and closes with FIN.
//! A responder serves any number of initiators concurrently and can drop
//! DATA on purpose to exercise recovery.
//!
//! # Architecture
//!
//! ```text
//!   initiator                                   responder
//!  ┌─────────────────┐                       ┌──────────────────┐
//!  │ SenderSession   │  SYN / ACK / DATA /FIN│ Responder::run   │
//!  │  ├ SendWindow   │──────────────────────▶│  └ route by addr │
//!  │  ├ Timeout-     │                       │     ┌───────────┐│
//!  │  │  Controller  │◀──────────────────────│     │ serve_peer││
//!  │  └ Retransmit-  │ SYN-ACK / CONFIG / ACK│     │ PeerConn. ││
//!  │     Timer       │                       │     │ LossPolicy││
//!  └───────┬─────────┘                       │     └───────────┘│
//!          │                                 └────────┬─────────┘
//!     ┌────▼─────┐         8-byte header         ┌────▼─────┐
//!     │  Socket  │◀─────────────────────────────▶│  Socket  │
//!     └──────────┘                               └──────────┘
//! ```
//!
//! Modules:
//! - [`packet`]: wire format (encode / decode)
//! - [`config`]: protocol parameters and validation
//! - [`connection`]: initiator handshake
//! - [`session`]: initiator transfer loop
//! - [`sender`]: send-window state
//! - [`receiver`]: per-peer responder state machine
//! - [`responder`]: multi-peer demultiplexer
//! - [`simulator`]: synthetic DATA loss
//! - [`state`]: connection states
//! - [`stats`]: transfer report
//! - [`timer`]: RTO estimation and the retransmit stopwatch
//! - [`socket`]: async UDP socket abstraction

pub mod config;
pub mod connection;
pub mod packet;
pub mod receiver;
pub mod responder;
pub mod sender;
pub mod session;
pub mod simulator;
pub mod socket;
pub mod state;
pub mod stats;
pub mod timer;
