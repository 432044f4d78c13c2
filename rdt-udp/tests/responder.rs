//! Responder behaviour observed from a hand-driven initiator socket.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use rdt_udp::{
    config::ResponderConfig,
    packet::{Packet, PacketType},
    responder::{Responder, ResponderError},
    simulator::NoLoss,
    socket::Socket,
};

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

async fn ephemeral() -> Socket {
    Socket::bind("127.0.0.1:0".parse::<SocketAddr>().unwrap())
        .await
        .unwrap()
}

fn spawn(responder: &Responder) {
    let r = responder.clone();
    tokio::spawn(async move { r.run().await });
}

async fn lossless_responder() -> Responder {
    let responder = Responder::with_policy("127.0.0.1:0".parse().unwrap(), Arc::new(NoLoss))
        .await
        .unwrap();
    spawn(&responder);
    responder
}

async fn recv(socket: &Socket) -> Packet {
    socket
        .recv_timeout(Duration::from_secs(2))
        .await
        .unwrap()
        .expect("no reply from responder")
        .0
}

/// Run the three-way handshake by hand and return the CONFIG packet.
async fn handshake(client: &Socket, server: SocketAddr) -> Packet {
    client.send_to(&Packet::syn(10), server).await.unwrap();
    let syn_ack = recv(client).await;
    assert_eq!(syn_ack.header.ptype, PacketType::SynAck);
    assert_eq!(syn_ack.header.ack, 11);

    client
        .send_to(&Packet::ack(11, syn_ack.header.seq.wrapping_add(1)), server)
        .await
        .unwrap();
    let config = recv(client).await;
    assert_eq!(config.header.ptype, PacketType::Config);
    config
}

async fn send_data(client: &Socket, server: SocketAddr, seq: u16) -> Packet {
    let data = Packet::data(seq, b"TestData".to_vec()).unwrap();
    client.send_to(&data, server).await.unwrap();
    recv(client).await
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[tokio::test]
async fn config_advertises_drop_percentage() {
    let config = ResponderConfig::new("127.0.0.1:0".parse().unwrap(), 0.25);
    let responder = Responder::bind(&config).await.unwrap();
    spawn(&responder);

    let client = ephemeral().await;
    let cfg = handshake(&client, responder.local_addr()).await;
    assert_eq!(cfg.drop_percent(), Some(25));
}

#[tokio::test]
async fn bind_rejects_invalid_drop_rate() {
    let config = ResponderConfig::new("127.0.0.1:0".parse().unwrap(), 1.5);
    assert!(matches!(
        Responder::bind(&config).await,
        Err(ResponderError::Config(_))
    ));
}

#[tokio::test]
async fn reordered_data_gets_cumulative_acks() {
    let responder = lossless_responder().await;
    let server = responder.local_addr();
    let client = ephemeral().await;
    handshake(&client, server).await;

    let mut got = Vec::new();
    for seq in [0u16, 2, 1] {
        let ack = send_data(&client, server, seq).await;
        assert_eq!(ack.header.ptype, PacketType::Ack);
        assert!(ack.ack_timestamp_millis().is_some());
        got.push(ack.header.ack);
    }
    assert_eq!(got, vec![1, 1, 2]);

    let stats = responder.stats();
    assert_eq!(stats.in_order, 2);
    assert_eq!(stats.out_of_order, 1);
}

#[tokio::test]
async fn data_from_unknown_peer_is_rejected() {
    let responder = lossless_responder().await;
    let client = ephemeral().await;

    let data = Packet::data(0, b"TestData".to_vec()).unwrap();
    client.send_to(&data, responder.local_addr()).await.unwrap();

    let reply = client.recv_timeout(Duration::from_millis(200)).await.unwrap();
    assert!(reply.is_none(), "unexpected reply {reply:?}");
    assert_eq!(responder.stats().rejected, 1);
    assert_eq!(responder.peer_count(), 0);
}

#[tokio::test]
async fn data_before_final_ack_is_rejected() {
    let responder = lossless_responder().await;
    let server = responder.local_addr();
    let client = ephemeral().await;

    client.send_to(&Packet::syn(1), server).await.unwrap();
    assert_eq!(recv(&client).await.header.ptype, PacketType::SynAck);

    let data = Packet::data(0, b"TestData".to_vec()).unwrap();
    client.send_to(&data, server).await.unwrap();
    let reply = client.recv_timeout(Duration::from_millis(200)).await.unwrap();
    assert!(reply.is_none(), "unexpected reply {reply:?}");
    assert_eq!(responder.stats().rejected, 1);
}

#[tokio::test]
async fn fin_closes_session_and_forgets_peer() {
    let responder = lossless_responder().await;
    let server = responder.local_addr();
    let client = ephemeral().await;
    handshake(&client, server).await;

    for seq in 0..3 {
        assert_eq!(send_data(&client, server, seq).await.header.ack, seq + 1);
    }

    client.send_to(&Packet::fin(3, 0), server).await.unwrap();
    let fin = recv(&client).await;
    assert_eq!(fin.header.ptype, PacketType::Fin);
    assert_eq!(fin.header.ack, 4);

    let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
    while responder.stats().closed_sessions.is_empty() {
        assert!(tokio::time::Instant::now() < deadline, "session never closed");
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert_eq!(responder.peer_count(), 0);
    let stats = responder.stats();
    assert_eq!(stats.closed_sessions.len(), 1);
    assert_eq!(stats.closed_sessions[0].expected_seq, 3);

    // The record is gone: DATA now comes from an unknown peer.
    let data = Packet::data(3, b"TestData".to_vec()).unwrap();
    client.send_to(&data, server).await.unwrap();
    let reply = client.recv_timeout(Duration::from_millis(200)).await.unwrap();
    assert!(reply.is_none());
    assert_eq!(responder.stats().rejected, 1);

    // And a fresh SYN starts over.
    handshake(&client, server).await;
    assert_eq!(send_data(&client, server, 0).await.header.ack, 1);
}
