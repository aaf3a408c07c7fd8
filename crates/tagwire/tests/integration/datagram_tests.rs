//! Datagram (UDP) sessions over loopback

use super::utils::{drive_until, inbox, loopback, next_frame, session};
use anyhow::Result;
use std::time::Duration;
use tagwire::proto::{encode_integer, encode_string, send_value_to};
use tagwire::{ErrorCode, Role, SessionBuilder, TransportKind, TypedValue};
use tokio::net::UdpSocket;

#[tokio::test]
async fn test_datagram_ping_then_reply() -> Result<()> {
    let (server_handler, mut server_inbox) = inbox();
    let mut server = session(TransportKind::Datagram, Role::Server);
    let addr = server
        .start_server_on("127.0.0.1:0".parse()?, server_handler)
        .await?;
    assert_eq!(server.connection_count(), 1);

    let (client_handler, mut client_inbox) = inbox();
    let mut client = session(TransportKind::Datagram, Role::Client);
    client
        .connect_to_server("127.0.0.1", addr.port(), client_handler)
        .await?;

    client.send_to_server(&encode_string(b"ping")?).await?;

    // First datagram from a new address pairs and delivers in one pass
    let report = drive_until(&mut server, |r| r.delivered == 1).await?;
    assert_eq!(report.accepted, 1);
    assert_eq!(server.connection_count(), 2);

    let (peer, frame) = server_inbox.try_next().expect("frame delivered");
    assert_eq!(frame.payload().as_ref(), b"ping");

    server.send_value(peer, &TypedValue::Integer(1)).await?;

    let (_, reply) = next_frame(&mut client, &mut client_inbox).await?;
    assert_eq!(reply.decode_integer()?, 1);
    Ok(())
}

#[tokio::test]
async fn test_known_peer_is_not_paired_twice() -> Result<()> {
    let (handler, mut inbox) = inbox();
    let mut server = session(TransportKind::Datagram, Role::Server);
    let addr = server.start_server_on("127.0.0.1:0".parse()?, handler).await?;

    let mut client = session(TransportKind::Datagram, Role::Client);
    client
        .connect_to_server("127.0.0.1", addr.port(), tagwire::handler_fn(|_, _| {}))
        .await?;

    client.send_to_server(&encode_integer(1)).await?;
    let (first, _) = next_frame(&mut server, &mut inbox).await?;

    client.send_to_server(&encode_integer(2)).await?;
    let (second, frame) = next_frame(&mut server, &mut inbox).await?;

    assert_eq!(first, second);
    assert_eq!(frame.decode_integer()?, 2);
    assert_eq!(server.connection_count(), 2);
    Ok(())
}

#[tokio::test]
async fn test_client_ignores_other_senders() -> Result<()> {
    let (server_handler, mut server_inbox) = inbox();
    let mut server = session(TransportKind::Datagram, Role::Server);
    let addr = server
        .start_server_on("127.0.0.1:0".parse()?, server_handler)
        .await?;

    let (handler, mut client_inbox) = inbox();
    let mut client = session(TransportKind::Datagram, Role::Client);
    client.connect_to_server("127.0.0.1", addr.port(), handler).await?;
    let client_addr = loopback(client.local_addr().expect("client endpoint bound"));

    let stranger = UdpSocket::bind("127.0.0.1:0").await?;
    send_value_to(&stranger, client_addr, &TypedValue::from("spoofed")).await?;

    // Let the stranger's datagram arrive and be dropped
    for _ in 0..10 {
        client.run_callbacks().await;
    }
    assert!(client_inbox.try_next().is_none());
    assert!(client.last_error().is_none());

    client.send_to_server(&encode_string(b"hello")?).await?;
    let (peer, _) = next_frame(&mut server, &mut server_inbox).await?;
    server.send_to(peer, &encode_string(b"real")?).await?;

    let (_, frame) = next_frame(&mut client, &mut client_inbox).await?;
    assert_eq!(frame.decode_string()?.as_ref(), b"real");
    Ok(())
}

#[tokio::test]
async fn test_broadcast_reaches_every_datagram_peer() -> Result<()> {
    let (server_handler, mut server_inbox) = inbox();
    let mut server = session(TransportKind::Datagram, Role::Server);
    let addr = server
        .start_server_on("127.0.0.1:0".parse()?, server_handler)
        .await?;

    let mut clients = Vec::new();
    for n in 0..2 {
        let (handler, inbox) = inbox();
        let mut client = session(TransportKind::Datagram, Role::Client);
        client.connect_to_server("127.0.0.1", addr.port(), handler).await?;
        client.send_to_server(&encode_integer(n)).await?;
        next_frame(&mut server, &mut server_inbox).await?;
        clients.push((client, inbox));
    }
    assert_eq!(server.connection_count(), 3);

    let report = server.send_to_all_clients(&encode_string(b"all")?).await;
    assert_eq!(report.delivered, 2);

    for (client, inbox) in clients.iter_mut() {
        let (_, frame) = next_frame(client, inbox).await?;
        assert_eq!(frame.decode_string()?.as_ref(), b"all");
    }
    Ok(())
}

#[tokio::test]
async fn test_peer_limit_drops_new_senders() -> Result<()> {
    let (handler, mut inbox) = inbox();
    let mut server = SessionBuilder::new(TransportKind::Datagram, Role::Server)
        .with_poll_timeout(Duration::from_millis(10))
        .with_max_peers(1)
        .build();
    let addr = server.start_server_on("127.0.0.1:0".parse()?, handler).await?;

    let first = UdpSocket::bind("127.0.0.1:0").await?;
    send_value_to(&first, addr, &TypedValue::Integer(1)).await?;
    next_frame(&mut server, &mut inbox).await?;

    let second = UdpSocket::bind("127.0.0.1:0").await?;
    send_value_to(&second, addr, &TypedValue::Integer(2)).await?;
    send_value_to(&first, addr, &TypedValue::Integer(3)).await?;

    // Only the known sender gets through
    let (_, frame) = next_frame(&mut server, &mut inbox).await?;
    assert_eq!(frame.decode_integer()?, 3);
    assert_eq!(server.connection_count(), 2);
    assert!(server.last_error().is_none());
    Ok(())
}

#[tokio::test]
async fn test_malformed_datagram_keeps_endpoint() -> Result<()> {
    let (handler, mut inbox) = inbox();
    let mut server = session(TransportKind::Datagram, Role::Server);
    let addr = server.start_server_on("127.0.0.1:0".parse()?, handler).await?;

    let sender = UdpSocket::bind("127.0.0.1:0").await?;
    sender.send_to(&[7, 0, 0, 0, 0], addr).await?;

    let report = drive_until(&mut server, |r| r.failed == 1).await?;
    assert_eq!(report.delivered, 0);
    assert_eq!(server.connection_count(), 1);
    assert_eq!(server.last_error().map(|e| e.code), Some(ErrorCode::UnknownType));

    // Still serving afterwards
    send_value_to(&sender, addr, &TypedValue::Integer(9)).await?;
    let (_, frame) = next_frame(&mut server, &mut inbox).await?;
    assert_eq!(frame.decode_integer()?, 9);
    Ok(())
}

#[tokio::test]
async fn test_datagram_shutdown() -> Result<()> {
    let mut server = session(TransportKind::Datagram, Role::Server);
    let addr = server
        .start_server_on("127.0.0.1:0".parse()?, tagwire::handler_fn(|_, _| {}))
        .await?;

    server.shutdown().await;
    assert_eq!(server.connection_count(), 0);

    // The port is free again
    let rebound = server
        .start_server_on(addr, tagwire::handler_fn(|_, _| {}))
        .await?;
    assert_eq!(rebound, addr);
    Ok(())
}
