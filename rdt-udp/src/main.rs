//! Entry point for `rdt-udp`.
//!
//! Parses CLI arguments and dispatches into either **server** (responder) or
//! **client** (initiator) mode.  All protocol work is delegated to library
//! modules; `main.rs` owns only process setup (logging, argument parsing).

use std::net::SocketAddr;

use anyhow::Context;
use clap::{Parser, Subcommand};

use rdt_udp::config::{ResponderConfig, SenderConfig};
use rdt_udp::responder::Responder;
use rdt_udp::session::SenderSession;

/// Reliable data transfer over UDP.
#[derive(Parser)]
#[command(author, version, about)]
struct Cli {
    #[command(subcommand)]
    mode: Mode,
}

#[derive(Subcommand)]
enum Mode {
    /// Run as a responder, serving any number of initiators.
    Server {
        /// Local address to bind.
        #[arg(short, long, default_value = "127.0.0.1:8080")]
        bind: SocketAddr,
        /// Probability (0.0–1.0) of discarding each inbound DATA packet.
        #[arg(short, long, default_value_t = 0.3)]
        drop_rate: f64,
    },
    /// Run as an initiator and transfer test data to a responder.
    Client {
        /// Responder address.
        #[arg(short, long, default_value = "127.0.0.1:8080")]
        server: SocketAddr,
        /// Number of DATA packets to deliver.
        #[arg(short, long, default_value_t = 30)]
        packets: u16,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialise env_logger; set RUST_LOG to control verbosity.
    env_logger::init();

    let cli = Cli::parse();

    match cli.mode {
        Mode::Server { bind, drop_rate } => {
            let config = ResponderConfig::new(bind, drop_rate);
            let responder = Responder::bind(&config)
                .await
                .with_context(|| format!("starting responder on {bind}"))?;
            println!("listening on {}", responder.local_addr());
            responder.run().await.context("responder stopped")?;
        }
        Mode::Client { server, packets } => {
            let config = SenderConfig::new(server, packets);
            let mut session = SenderSession::connect(&config)
                .await
                .with_context(|| format!("connecting to {server}"))?;
            let report = session.run().await.context("transfer failed")?;
            println!("{report}");
        }
    }
    Ok(())
}
