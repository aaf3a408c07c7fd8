//! Stream (TCP) sessions over loopback

use super::utils::{drive_until, inbox, loopback, next_frame, session};
use anyhow::Result;
use serde_json::json;
use tagwire::proto::{encode_document, encode_float, encode_integer, encode_string};
use tagwire::{Document, ErrorCode, Role, SessionStatus, TransportKind, TypedValue};

#[tokio::test]
async fn test_ping_then_integer_reply() -> Result<()> {
    let (server_handler, mut server_inbox) = inbox();
    let mut server = session(TransportKind::Stream, Role::Server);
    let addr = server
        .start_server_on("127.0.0.1:0".parse()?, server_handler)
        .await?;

    let (client_handler, mut client_inbox) = inbox();
    let mut client = session(TransportKind::Stream, Role::Client);
    client
        .connect_to_server("127.0.0.1", addr.port(), client_handler)
        .await?;

    client.send_to_server(&encode_string(b"ping")?).await?;

    let (peer, frame) = next_frame(&mut server, &mut server_inbox).await?;
    assert_eq!(frame.payload().as_ref(), b"ping");

    server.send_to(peer, &encode_integer(1)).await?;

    let (_, reply) = next_frame(&mut client, &mut client_inbox).await?;
    assert_eq!(reply.decode_integer()?, 1);
    Ok(())
}

#[tokio::test]
async fn test_accept_registers_without_reading() -> Result<()> {
    let (handler, mut inbox) = inbox();
    let mut server = session(TransportKind::Stream, Role::Server);
    let addr = server.start_server_on("127.0.0.1:0".parse()?, handler).await?;

    let mut client = session(TransportKind::Stream, Role::Client);
    client
        .connect_to_server("127.0.0.1", addr.port(), tagwire::handler_fn(|_, _| {}))
        .await?;
    client.send_to_server(&encode_integer(3)).await?;

    let report = drive_until(&mut server, |r| r.accepted == 1).await?;
    assert_eq!(report.delivered, 0);
    assert_eq!(server.connection_count(), 2);
    assert!(inbox.try_next().is_none());

    let (_, frame) = next_frame(&mut server, &mut inbox).await?;
    assert_eq!(frame.decode_integer()?, 3);
    Ok(())
}

#[tokio::test]
async fn test_every_value_kind_arrives_intact() -> Result<()> {
    let (handler, mut inbox) = inbox();
    let mut server = session(TransportKind::Stream, Role::Server);
    let addr = server.start_server_on("127.0.0.1:0".parse()?, handler).await?;

    let mut client = session(TransportKind::Stream, Role::Client);
    client
        .connect_to_server("127.0.0.1", addr.port(), tagwire::handler_fn(|_, _| {}))
        .await?;

    let doc = Document::new(json!({"name": "probe", "values": [1, 2, 3]}));
    client.send_to_server(&encode_integer(-17)).await?;
    client.send_to_server(&encode_float(2.5)).await?;
    client.send_to_server(&encode_string(b"")?).await?;
    client.send_to_server(&encode_document(&doc)?).await?;

    let mut values = Vec::new();
    while values.len() < 4 {
        let (_, frame) = next_frame(&mut server, &mut inbox).await?;
        values.push(frame.to_value()?);
    }

    assert_eq!(values[0], TypedValue::Integer(-17));
    assert_eq!(values[1], TypedValue::Float(2.5));
    assert_eq!(values[2].as_bytes(), Some(&b""[..]));
    assert_eq!(values[3].as_document(), Some(&doc));
    Ok(())
}

#[tokio::test]
async fn test_broadcast_after_client_leaves() -> Result<()> {
    let mut server = session(TransportKind::Stream, Role::Server);
    let addr = server
        .start_server_on("127.0.0.1:0".parse()?, tagwire::handler_fn(|_, _| {}))
        .await?;

    let mut clients = Vec::new();
    let mut inboxes = Vec::new();
    for _ in 0..3 {
        let (handler, inbox) = inbox();
        let mut client = session(TransportKind::Stream, Role::Client);
        client.connect_to_server("127.0.0.1", addr.port(), handler).await?;
        clients.push(client);
        inboxes.push(inbox);
    }
    drive_until(&mut server, |r| r.accepted == 3).await?;

    let mut leaving = clients.remove(0);
    inboxes.remove(0);
    leaving.shutdown().await;
    drive_until(&mut server, |r| r.closed == 1).await?;
    assert_eq!(server.connection_count(), 3);

    let report = server.send_to_all_clients(&encode_string(b"news")?).await;
    assert_eq!(report.delivered, 2);
    assert!(report.is_complete());

    for (client, inbox) in clients.iter_mut().zip(inboxes.iter_mut()) {
        let (_, frame) = next_frame(client, inbox).await?;
        assert_eq!(frame.decode_string()?.as_ref(), b"news");
    }
    Ok(())
}

#[tokio::test]
async fn test_connect_refused_is_recorded() -> Result<()> {
    let port = {
        let probe = std::net::TcpListener::bind("127.0.0.1:0")?;
        probe.local_addr()?.port()
    };

    let mut client = session(TransportKind::Stream, Role::Client);
    let err = client
        .connect_to_server("127.0.0.1", port, tagwire::handler_fn(|_, _| {}))
        .await
        .unwrap_err();

    assert_eq!(err.code(), ErrorCode::ConnectFailure);
    assert_eq!(client.last_error().map(|e| e.code), Some(ErrorCode::ConnectFailure));
    assert_eq!(client.status(), SessionStatus::Idle);
    Ok(())
}

#[tokio::test]
async fn test_second_listener_on_same_port_fails() -> Result<()> {
    let mut first = session(TransportKind::Stream, Role::Server);
    let addr = first
        .start_server_on("127.0.0.1:0".parse()?, tagwire::handler_fn(|_, _| {}))
        .await?;

    let mut second = session(TransportKind::Stream, Role::Server);
    let err = second
        .start_server_on(loopback(addr), tagwire::handler_fn(|_, _| {}))
        .await
        .unwrap_err();
    assert_eq!(err.code(), ErrorCode::BindFailure);
    Ok(())
}

#[tokio::test]
async fn test_shutdown_closes_peers() -> Result<()> {
    let mut server = session(TransportKind::Stream, Role::Server);
    let addr = server
        .start_server_on("127.0.0.1:0".parse()?, tagwire::handler_fn(|_, _| {}))
        .await?;

    let (handler, _inbox) = inbox();
    let mut client = session(TransportKind::Stream, Role::Client);
    client.connect_to_server("127.0.0.1", addr.port(), handler).await?;
    drive_until(&mut server, |r| r.accepted == 1).await?;

    server.shutdown().await;
    assert_eq!(server.connection_count(), 0);

    let report = drive_until(&mut client, |r| r.closed == 1).await?;
    assert!(report.is_success());
    assert!(client.server_connection().is_none());
    Ok(())
}
