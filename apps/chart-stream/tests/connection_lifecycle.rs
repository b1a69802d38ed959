//! Connection lifecycle against a scripted quote service: open, authorize,
//! heartbeat, protocol errors, failover, and teardown.

#![allow(clippy::unwrap_used, clippy::expect_used)]

mod common;

use std::sync::Arc;
use std::time::Duration;

use chart_stream::{
    ChannelSink, ClientError, ConnectionState, ErrorKind, ReconnectConfig, StreamClient,
    StreamEvent, TickUpdate,
};
use common::{Behavior, ScriptedConnector, config, drain, next_event, next_peer, wait_for_state};
use proptest::prelude::*;
use serde_json::json;
use tokio::time::Instant;

fn status(state: ConnectionState, message: Option<&str>) -> StreamEvent {
    StreamEvent::Status {
        state,
        message: message.map(str::to_string),
    }
}

fn expect_error(event: StreamEvent) -> chart_stream::ErrorEvent {
    match event {
        StreamEvent::Error(error) => error,
        other => panic!("expected an error event, got {other:?}"),
    }
}

// =============================================================================
// Happy path
// =============================================================================

#[tokio::test]
async fn public_ticks_end_to_end() {
    let (connector, mut peers) = ScriptedConnector::new();
    let (sink, mut events) = ChannelSink::new();
    let (client, task) = StreamClient::spawn(connector.clone(), Arc::new(sink));

    client.open(config(&["ws://primary"])).await.unwrap();
    assert_eq!(
        next_event(&mut events).await,
        status(ConnectionState::Connecting, None)
    );

    let mut peer = next_peer(&mut peers).await;
    assert_eq!(peer.url, "ws://primary?app_id=1089");
    assert_eq!(
        next_event(&mut events).await,
        status(ConnectionState::Connected, None)
    );
    assert_eq!(
        peer.next_frame().await,
        json!({"ticks": "R_100", "subscribe": 1, "req_id": 2})
    );

    peer.send(json!({
        "msg_type": "tick",
        "echo_req": {"ticks": "R_100", "subscribe": 1},
        "tick": {"epoch": 1_700_000_000, "quote": 1234.56, "symbol": "R_100", "id": "sub-1"},
        "subscription": {"id": "sub-1"}
    }))
    .await;
    assert_eq!(
        next_event(&mut events).await,
        StreamEvent::Tick(TickUpdate::new(1_700_000_000, 1234.56))
    );

    let snapshot = client.status();
    assert_eq!(snapshot.state, ConnectionState::Connected);
    assert!(snapshot.live_socket);
    assert!(!snapshot.authenticated);
    assert_eq!(snapshot.endpoint.as_deref(), Some("ws://primary?app_id=1089"));

    client.close().await.unwrap();
    assert_eq!(
        next_event(&mut events).await,
        status(ConnectionState::Disconnected, None)
    );
    assert!(peer.client_gone());
    assert_eq!(connector.live_sockets(), 0);

    // Idempotent
    client.close().await.unwrap();
    assert!(drain(&mut events).is_empty());

    drop(client);
    task.await.unwrap();
}

#[tokio::test]
async fn answers_heartbeat_ping_with_pong() {
    let (connector, mut peers) = ScriptedConnector::new();
    let (sink, mut events) = ChannelSink::new();
    let (client, _task) = StreamClient::spawn(connector, Arc::new(sink));

    client.open(config(&["ws://primary"])).await.unwrap();
    let mut peer = next_peer(&mut peers).await;
    let _subscribe = peer.next_frame().await;

    peer.send(json!({"msg_type": "ping", "ping": "pong", "echo_req": {"ping": 1}}))
        .await;
    assert_eq!(peer.next_frame().await, json!({"pong": "pong"}));

    wait_for_state(&mut events, ConnectionState::Connected).await;
    assert!(drain(&mut events).is_empty());
}

// =============================================================================
// Errors on a live socket
// =============================================================================

#[tokio::test]
async fn unknown_frames_are_protocol_errors() {
    let (connector, mut peers) = ScriptedConnector::new();
    let (sink, mut events) = ChannelSink::new();
    let (client, _task) = StreamClient::spawn(connector, Arc::new(sink));

    client.open(config(&["ws://primary"])).await.unwrap();
    let mut peer = next_peer(&mut peers).await;
    let _subscribe = peer.next_frame().await;
    wait_for_state(&mut events, ConnectionState::Connected).await;

    peer.send(json!({"website_status": {"site_status": "up"}})).await;
    let error = expect_error(next_event(&mut events).await);
    assert_eq!(error.kind, ErrorKind::Protocol);
    assert!(!error.fatal);

    peer.send_text("not json at all").await;
    let error = expect_error(next_event(&mut events).await);
    assert_eq!(error.kind, ErrorKind::Protocol);

    assert_eq!(client.state(), ConnectionState::Connected);

    // Stream keeps flowing afterwards
    peer.send(json!({"tick": {"epoch": 10, "quote": "99.5"}})).await;
    assert_eq!(
        next_event(&mut events).await,
        StreamEvent::Tick(TickUpdate::new(10, 99.5))
    );
}

#[tokio::test]
async fn server_errors_outside_auth_are_not_fatal() {
    let (connector, mut peers) = ScriptedConnector::new();
    let (sink, mut events) = ChannelSink::new();
    let (client, _task) = StreamClient::spawn(connector, Arc::new(sink));

    client.open(config(&["ws://primary"])).await.unwrap();
    let mut peer = next_peer(&mut peers).await;
    let _subscribe = peer.next_frame().await;
    wait_for_state(&mut events, ConnectionState::Connected).await;

    peer.send(json!({
        "error": {"code": "MarketIsClosed", "message": "This market is presently closed."},
        "msg_type": "tick",
        "req_id": 2
    }))
    .await;

    let error = expect_error(next_event(&mut events).await);
    assert_eq!(error.kind, ErrorKind::Server);
    assert_eq!(error.code, "MarketIsClosed");
    assert!(!error.fatal);
    assert_eq!(client.state(), ConnectionState::Connected);
}

// =============================================================================
// Authorization
// =============================================================================

#[tokio::test]
async fn authorizes_before_subscribing() {
    let (connector, mut peers) = ScriptedConnector::new();
    let (sink, mut events) = ChannelSink::new();
    let (client, _task) = StreamClient::spawn(connector, Arc::new(sink));

    client
        .open(config(&["ws://primary"]).with_credential("a1b2c3d4e5f6"))
        .await
        .unwrap();
    let mut peer = next_peer(&mut peers).await;

    assert_eq!(
        peer.next_frame().await,
        json!({"authorize": "a1b2c3d4e5f6", "req_id": 1})
    );
    assert!(peer.try_frame().is_none());

    peer.send(json!({
        "authorize": {"loginid": "VRTC100", "currency": "USD", "email": "x@example.com"},
        "msg_type": "authorize",
        "req_id": 1
    }))
    .await;
    assert_eq!(
        peer.next_frame().await,
        json!({"ticks": "R_100", "subscribe": 1, "req_id": 2})
    );
    assert!(client.status().authenticated);

    wait_for_state(&mut events, ConnectionState::Connected).await;
    assert!(
        drain(&mut events)
            .iter()
            .all(|e| !matches!(e, StreamEvent::Error(_)))
    );
}

#[tokio::test]
async fn invalid_token_is_fatal_until_caller_acts() {
    let (connector, mut peers) = ScriptedConnector::new();
    let (sink, mut events) = ChannelSink::new();
    let (client, _task) = StreamClient::spawn(connector.clone(), Arc::new(sink));

    client
        .open(config(&["ws://primary"]).with_credential("a1b2c3d4e5f6"))
        .await
        .unwrap();
    let mut peer = next_peer(&mut peers).await;
    let _authorize = peer.next_frame().await;

    peer.send(json!({
        "error": {"code": "InvalidToken", "message": "The token is invalid."},
        "msg_type": "authorize",
        "req_id": 1
    }))
    .await;

    let message = wait_for_state(&mut events, ConnectionState::Error).await;
    assert!(message.is_some());
    let error = expect_error(next_event(&mut events).await);
    assert_eq!(error.kind, ErrorKind::Auth);
    assert_eq!(error.code, "InvalidToken");
    assert!(error.fatal);

    // No subscription on a rejected session, and ticks are not delivered
    assert!(peer.try_frame().is_none());
    peer.send(json!({"tick": {"epoch": 1, "quote": 1.0}})).await;
    assert!(!client.status().authenticated);
    assert_eq!(client.state(), ConnectionState::Error);

    // Caller supplies a new token and reconnects
    client
        .set_credential(Some("f6e5d4c3b2a1".to_string()))
        .await
        .unwrap();
    client.reconnect().await.unwrap();

    let mut retry = next_peer(&mut peers).await;
    assert_eq!(
        retry.next_frame().await,
        json!({"authorize": "f6e5d4c3b2a1", "req_id": 1})
    );
    assert!(peer.client_gone());
    assert_eq!(connector.live_sockets(), 1);

    let _ = drain(&mut events);
    retry
        .send(json!({"authorize": {"loginid": "VRTC100"}, "req_id": 1}))
        .await;
    assert_eq!(
        retry.next_frame().await,
        json!({"ticks": "R_100", "subscribe": 1, "req_id": 2})
    );
    assert!(
        drain(&mut events)
            .iter()
            .all(|e| !matches!(e, StreamEvent::Tick(_)))
    );
}

#[tokio::test]
async fn malformed_token_streams_public_data() {
    let (connector, mut peers) = ScriptedConnector::new();
    let (sink, mut events) = ChannelSink::new();
    let (client, _task) = StreamClient::spawn(connector, Arc::new(sink));

    client
        .open(config(&["ws://primary"]).with_credential("short"))
        .await
        .unwrap();
    let mut peer = next_peer(&mut peers).await;

    assert_eq!(
        peer.next_frame().await,
        json!({"ticks": "R_100", "subscribe": 1, "req_id": 2})
    );

    wait_for_state(&mut events, ConnectionState::Connected).await;
    let error = expect_error(next_event(&mut events).await);
    assert_eq!(error.kind, ErrorKind::Auth);
    assert_eq!(error.code, "InvalidTokenFormat");
    assert!(!error.fatal);
    assert_eq!(client.state(), ConnectionState::Connected);
}

// =============================================================================
// Handshake timeout and failover
// =============================================================================

fn fast_config(endpoints: &[&str]) -> chart_stream::StreamConfig {
    config(endpoints)
        .with_handshake_timeout(Duration::from_secs(2))
        .with_failover_delay(Duration::from_millis(500))
}

#[tokio::test(start_paused = true)]
async fn stalled_endpoint_fails_over() {
    let (connector, mut peers) = ScriptedConnector::new();
    connector.script("ws://primary", Behavior::Stall);
    let (sink, mut events) = ChannelSink::new();
    let (client, _task) = StreamClient::spawn(connector.clone(), Arc::new(sink));

    let started = Instant::now();
    client
        .open(fast_config(&["ws://primary", "ws://backup"]))
        .await
        .unwrap();

    assert_eq!(
        next_event(&mut events).await,
        status(ConnectionState::Connecting, None)
    );
    assert_eq!(
        next_event(&mut events).await,
        status(
            ConnectionState::Connecting,
            Some("handshake timed out, failing over in 500ms")
        )
    );
    assert_eq!(
        next_event(&mut events).await,
        status(
            ConnectionState::Connecting,
            Some("trying fallback endpoint ws://backup?app_id=1089")
        )
    );
    assert_eq!(
        next_event(&mut events).await,
        status(ConnectionState::Connected, None)
    );
    assert!(started.elapsed() >= Duration::from_millis(2500));

    let mut peer = next_peer(&mut peers).await;
    assert_eq!(peer.url, "ws://backup?app_id=1089");
    let _subscribe = peer.next_frame().await;

    assert_eq!(
        connector.connects(),
        vec!["ws://primary?app_id=1089", "ws://backup?app_id=1089"]
    );
    assert_eq!(connector.live_sockets(), 1);
}

#[tokio::test(start_paused = true)]
async fn every_endpoint_stalled_is_a_timeout() {
    let (connector, _peers) = ScriptedConnector::new();
    connector.script("ws://primary", Behavior::Stall);
    connector.script("ws://backup", Behavior::Stall);
    let (sink, mut events) = ChannelSink::new();
    let (client, _task) = StreamClient::spawn(connector.clone(), Arc::new(sink));

    client
        .open(fast_config(&["ws://primary", "ws://backup"]))
        .await
        .unwrap();

    let message = wait_for_state(&mut events, ConnectionState::Error).await;
    assert_eq!(message.as_deref(), Some("connection timeout"));
    let error = expect_error(next_event(&mut events).await);
    assert_eq!(error.kind, ErrorKind::Timeout);
    assert!(error.fatal);

    // Nothing retries on its own
    tokio::time::sleep(Duration::from_secs(60)).await;
    assert_eq!(connector.connects().len(), 2);
    assert!(drain(&mut events).is_empty());
}

#[tokio::test]
async fn refused_connect_does_not_fail_over() {
    let (connector, _peers) = ScriptedConnector::new();
    connector.script("ws://primary", Behavior::Refuse);
    let (sink, mut events) = ChannelSink::new();
    let (client, _task) = StreamClient::spawn(connector.clone(), Arc::new(sink));

    client
        .open(config(&["ws://primary", "ws://backup"]))
        .await
        .unwrap();

    let message = wait_for_state(&mut events, ConnectionState::Error)
        .await
        .unwrap();
    assert!(message.contains("connection refused"), "{message}");
    assert!(message.contains("no API token configured"), "{message}");

    let error = expect_error(next_event(&mut events).await);
    assert_eq!(error.kind, ErrorKind::Connection);
    assert!(error.fatal);
    assert_eq!(connector.connects(), vec!["ws://primary?app_id=1089"]);
}

#[tokio::test(start_paused = true)]
async fn close_cancels_pending_handshake() {
    let (connector, _peers) = ScriptedConnector::new();
    connector.script("ws://primary", Behavior::Stall);
    let (sink, mut events) = ChannelSink::new();
    let (client, _task) = StreamClient::spawn(connector.clone(), Arc::new(sink));

    client
        .open(fast_config(&["ws://primary", "ws://backup"]))
        .await
        .unwrap();
    client.close().await.unwrap();

    assert_eq!(
        next_event(&mut events).await,
        status(ConnectionState::Connecting, None)
    );
    assert_eq!(
        next_event(&mut events).await,
        status(ConnectionState::Disconnected, None)
    );

    tokio::time::sleep(Duration::from_secs(30)).await;
    assert!(drain(&mut events).is_empty());
    assert_eq!(connector.connects().len(), 1);
}

// =============================================================================
// Server close and reconnect
// =============================================================================

#[tokio::test(start_paused = true)]
async fn server_close_waits_for_caller() {
    let (connector, mut peers) = ScriptedConnector::new();
    let (sink, mut events) = ChannelSink::new();
    let (client, _task) = StreamClient::spawn(connector.clone(), Arc::new(sink));

    client.open(config(&["ws://primary"])).await.unwrap();
    let mut peer = next_peer(&mut peers).await;
    let _subscribe = peer.next_frame().await;
    wait_for_state(&mut events, ConnectionState::Connected).await;

    peer.close("going away").await;
    assert_eq!(
        next_event(&mut events).await,
        status(ConnectionState::Disconnected, Some("going away"))
    );
    assert_eq!(connector.live_sockets(), 0);

    tokio::time::sleep(Duration::from_secs(60)).await;
    assert_eq!(connector.connects().len(), 1);

    client.reconnect().await.unwrap();
    let mut again = next_peer(&mut peers).await;
    assert_eq!(
        again.next_frame().await,
        json!({"ticks": "R_100", "subscribe": 1, "req_id": 2})
    );
    wait_for_state(&mut events, ConnectionState::Connected).await;
}

#[tokio::test(start_paused = true)]
async fn auto_reconnect_backs_off() {
    let (connector, mut peers) = ScriptedConnector::new();
    let (sink, mut events) = ChannelSink::new();
    let (client, _task) = StreamClient::spawn(connector.clone(), Arc::new(sink));

    client
        .open(config(&["ws://primary"]).with_auto_reconnect(ReconnectConfig::default().without_jitter()))
        .await
        .unwrap();
    let peer = next_peer(&mut peers).await;
    wait_for_state(&mut events, ConnectionState::Connected).await;

    let dropped_at = Instant::now();
    peer.close("").await;
    wait_for_state(&mut events, ConnectionState::Disconnected).await;

    let mut again = next_peer(&mut peers).await;
    assert!(dropped_at.elapsed() >= Duration::from_millis(500));
    assert_eq!(
        again.next_frame().await,
        json!({"ticks": "R_100", "subscribe": 1, "req_id": 2})
    );
    wait_for_state(&mut events, ConnectionState::Connected).await;
    assert_eq!(connector.live_sockets(), 1);
}

#[tokio::test(start_paused = true)]
async fn auth_failure_never_auto_reconnects() {
    let (connector, mut peers) = ScriptedConnector::new();
    let (sink, mut events) = ChannelSink::new();
    let (client, _task) = StreamClient::spawn(connector.clone(), Arc::new(sink));

    client
        .open(
            config(&["ws://primary"])
                .with_credential("a1b2c3d4e5f6")
                .with_auto_reconnect(ReconnectConfig::default().without_jitter()),
        )
        .await
        .unwrap();
    let mut peer = next_peer(&mut peers).await;
    let _authorize = peer.next_frame().await;

    peer.send(json!({
        "error": {"code": "InvalidToken", "message": "The token is invalid."},
        "req_id": 1
    }))
    .await;
    wait_for_state(&mut events, ConnectionState::Error).await;

    peer.close("").await;
    wait_for_state(&mut events, ConnectionState::Disconnected).await;

    tokio::time::sleep(Duration::from_secs(120)).await;
    assert_eq!(connector.connects().len(), 1);
}

// =============================================================================
// Handle misuse
// =============================================================================

#[tokio::test]
async fn handle_rejects_misuse() {
    let (connector, _peers) = ScriptedConnector::new();
    let (sink, _events) = ChannelSink::new();
    let (client, task) = StreamClient::spawn(connector, Arc::new(sink));

    assert_eq!(client.reconnect().await, Err(ClientError::NotOpened));
    assert_eq!(
        client.set_credential(Some("a1b2c3d4e5f6".to_string())).await,
        Err(ClientError::NotOpened)
    );
    assert_eq!(client.open(config(&[])).await, Err(ClientError::NoEndpoints));
    assert_eq!(
        client.set_granularity(61).await,
        Err(ClientError::UnsupportedGranularity(61))
    );

    task.abort();
    let _ = task.await;
    assert_eq!(client.close().await, Err(ClientError::ManagerStopped));
}

// =============================================================================
// Single live socket
// =============================================================================

#[derive(Debug, Clone)]
enum Op {
    Open,
    Close,
    Reconnect,
    ServerClose,
    Retarget(&'static str),
    Settle,
}

fn op() -> impl Strategy<Value = Op> {
    prop_oneof![
        3 => Just(Op::Open),
        2 => Just(Op::Close),
        3 => Just(Op::Reconnect),
        2 => Just(Op::ServerClose),
        2 => prop::sample::select(vec!["R_50", "R_100", "1HZ100V"]).prop_map(Op::Retarget),
        2 => Just(Op::Settle),
    ]
}

async fn run_ops(ops: Vec<Op>) {
    let (connector, mut peers) = ScriptedConnector::new();
    let (sink, _events) = ChannelSink::new();
    let (client, task) = StreamClient::spawn(connector.clone(), Arc::new(sink));
    let mut latest: Option<common::Peer> = None;

    for op in ops {
        match op {
            Op::Open => client.open(config(&["ws://primary"])).await.unwrap(),
            Op::Close => client.close().await.unwrap(),
            Op::Reconnect => {
                let _ = client.reconnect().await;
            }
            Op::ServerClose => {
                if let Some(peer) = &latest {
                    peer.close("server restart").await;
                }
            }
            Op::Retarget(symbol) => client.set_symbol(symbol).await.unwrap(),
            Op::Settle => {
                for _ in 0..4 {
                    tokio::task::yield_now().await;
                }
            }
        }

        while let Ok(peer) = peers.try_recv() {
            latest = Some(peer);
        }
        assert!(
            connector.live_sockets() <= 1,
            "{} live sockets",
            connector.live_sockets()
        );
        assert!(!client.status().live_socket || connector.live_sockets() == 1);
    }

    client.close().await.unwrap();
    assert_eq!(connector.live_sockets(), 0);
    drop(client);
    task.await.unwrap();
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(48))]

    #[test]
    fn at_most_one_live_socket(ops in prop::collection::vec(op(), 1..32)) {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .unwrap();
        runtime.block_on(run_ops(ops));
    }
}
