//! Integration tests for the 3-way handshake.
//!
//! Each test binds real `tokio::net::UdpSocket`s on loopback.  The far end is
//! either a full [`Responder`] or a hand-driven socket so individual replies
//! can be withheld or forged.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use rdt_udp::{
    config::ProtocolConfig,
    connection::{ConnError, Connection},
    packet::{Packet, PacketType},
    responder::Responder,
    simulator::NoLoss,
    socket::Socket,
    state::ConnectionState,
};

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

async fn ephemeral() -> Socket {
    Socket::bind("127.0.0.1:0".parse::<SocketAddr>().unwrap())
        .await
        .expect("bind ephemeral socket")
}

fn fast_protocol() -> ProtocolConfig {
    ProtocolConfig {
        initial_rto: Duration::from_millis(20),
        ..ProtocolConfig::default()
    }
}

async fn spawn_responder() -> Responder {
    let responder = Responder::with_policy("127.0.0.1:0".parse().unwrap(), Arc::new(NoLoss))
        .await
        .expect("bind responder");
    let r = responder.clone();
    tokio::spawn(async move { r.run().await });
    responder
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[tokio::test]
async fn handshake_with_responder_reaches_established() {
    let responder = spawn_responder().await;

    let conn = tokio::time::timeout(
        Duration::from_secs(5),
        Connection::connect(ephemeral().await, responder.local_addr(), &ProtocolConfig::default()),
    )
    .await
    .expect("connect timed out")
    .expect("connect failed");

    assert_eq!(conn.state, ConnectionState::Established);
    assert_eq!(conn.peer, responder.local_addr());

    // The final ACK is processed asynchronously on the responder.
    let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
    while responder.stats().handshakes == 0 {
        assert!(tokio::time::Instant::now() < deadline, "responder never saw the ACK");
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert_eq!(responder.peer_count(), 1);
}

/// A peer that never answers gets exactly five SYNs, spaced by a doubling RTO.
#[tokio::test]
async fn silent_peer_fails_after_five_attempts() {
    let silent = ephemeral().await;
    let silent_addr = silent.local_addr;
    let counter = tokio::spawn(async move {
        let mut syns = 0;
        while let Ok(Some((pkt, _))) = silent.recv_timeout(Duration::from_millis(300)).await {
            assert_eq!(pkt.header.ptype, PacketType::Syn);
            assert_eq!(pkt.header.seq, 1234);
            syns += 1;
        }
        syns
    });

    let config = fast_protocol();
    let started = tokio::time::Instant::now();
    let err = Connection::connect_with_isn(ephemeral().await, silent_addr, &config, 1234)
        .await
        .expect_err("handshake should fail");
    let elapsed = started.elapsed();

    assert!(matches!(err, ConnError::HandshakeFailed { attempts: 5 }), "got {err:?}");
    // 20 + 40 + 80 + 160 + 320 ms
    assert!(elapsed >= Duration::from_millis(620), "gave up after {elapsed:?}");
    assert_eq!(counter.await.unwrap(), 5);
}

/// A SYN-ACK acknowledging the wrong number is ignored; the right one
/// (with the ISN wrapped past 65535) completes the handshake.
#[tokio::test]
async fn mismatched_syn_ack_is_ignored() {
    let server = ephemeral().await;
    let server_addr = server.local_addr;

    let fake = tokio::spawn(async move {
        let (syn, client) = server.recv_from().await.unwrap();
        assert_eq!(syn.header.ptype, PacketType::Syn);
        assert_eq!(syn.header.seq, u16::MAX);

        server.send_to(&Packet::syn_ack(700, 5), client).await.unwrap();
        server.send_to(&Packet::syn_ack(700, 0), client).await.unwrap();

        let (ack, _) = server.recv_from().await.unwrap();
        ack
    });

    let conn = Connection::connect_with_isn(
        ephemeral().await,
        server_addr,
        &ProtocolConfig::default(),
        u16::MAX,
    )
    .await
    .expect("connect failed");
    assert_eq!(conn.state, ConnectionState::Established);
    assert_eq!(conn.peer_isn, 700);

    let ack = fake.await.unwrap();
    assert_eq!(ack.header.ptype, PacketType::Ack);
    assert_eq!(ack.header.seq, 0);
    assert_eq!(ack.header.ack, 701);
}

/// A reply arriving late (after one SYN timed out) still completes the
/// handshake, with the RTO left backed off.
#[tokio::test]
async fn late_syn_ack_after_retry_succeeds() {
    let server = ephemeral().await;
    let server_addr = server.local_addr;

    tokio::spawn(async move {
        // Swallow the first SYN, answer the second.
        let _ = server.recv_from().await.unwrap();
        let (syn, client) = server.recv_from().await.unwrap();
        server
            .send_to(&Packet::syn_ack(9, syn.header.seq.wrapping_add(1)), client)
            .await
            .unwrap();
    });

    let config = ProtocolConfig {
        initial_rto: Duration::from_millis(100),
        ..ProtocolConfig::default()
    };
    let conn = Connection::connect_with_isn(ephemeral().await, server_addr, &config, 50)
        .await
        .expect("connect failed");
    assert_eq!(conn.state, ConnectionState::Established);
    assert_eq!(conn.rto.current_timeout(), Duration::from_millis(200));
}
