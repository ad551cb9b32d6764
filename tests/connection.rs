#![allow(
    clippy::unwrap_used,
    clippy::missing_panics_doc,
    reason = "Do not need additional syntax for setting up tests"
)]

mod common;

use std::sync::{Arc, Mutex};
use std::time::Duration;

use rosbridge_client::events::{CLOSE, STATE};
use rosbridge_client::ws::config::{Config, ReconnectConfig};
use rosbridge_client::ws::{ConnectionManager, ConnectionState};
use rosbridge_client::{Event, ListenerId};
use serde_json::{Value, json};

use crate::common::{collector, memory, next_value, settle, wait_for_state};

const URL: &str = "ws://robot.local:9090";

fn record_states(connection: &ConnectionManager) -> (Arc<Mutex<Vec<ConnectionState>>>, ListenerId) {
    let states = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&states);
    let id = connection.on(STATE, move |event| {
        if let Some(state) = event.as_state() {
            sink.lock().unwrap().push(state);
        }
    });
    (states, id)
}

fn assert_no_repeats(states: &[ConnectionState]) {
    for pair in states.windows(2) {
        assert_ne!(pair[0], pair[1], "duplicate state event in {states:?}");
    }
}

#[tokio::test(start_paused = true)]
async fn connects_and_reports_lifecycle() {
    let (connector, mut server) = memory();
    let connection = ConnectionManager::with_connector(Config::default().with_url(URL), connector);
    assert_eq!(connection.state(), ConnectionState::Connecting);

    let attempt = server.next_attempt().await;
    assert_eq!(attempt.url, URL);
    let _socket = server.accept().await;
    wait_for_state(&connection, ConnectionState::Connected).await;

    assert!(connection.is_connected());
    assert_eq!(connection.url().as_deref(), Some(URL));
}

#[tokio::test(start_paused = true)]
async fn unexpected_close_reconnects() {
    let (connector, mut server) = memory();
    let connection = ConnectionManager::with_connector(Config::default(), connector);
    let (states, _) = record_states(&connection);

    connection.connect(URL);
    server.accept().await.disconnect();
    wait_for_state(&connection, ConnectionState::Reconnecting).await;

    let _socket = server.accept().await;
    wait_for_state(&connection, ConnectionState::Connected).await;

    let states = states.lock().unwrap().clone();
    assert_eq!(
        states,
        vec![
            ConnectionState::Connecting,
            ConnectionState::Connected,
            ConnectionState::Reconnecting,
            ConnectionState::Connecting,
            ConnectionState::Connected,
        ]
    );
}

#[tokio::test(start_paused = true)]
async fn reconnect_delays_double_up_to_the_cap() {
    let (connector, mut server) = memory();
    let config = Config::default().with_reconnect(ReconnectConfig::new(
        Duration::from_millis(1000),
        Duration::from_millis(8000),
    ));
    let connection = ConnectionManager::with_connector(config, connector);
    let (states, _) = record_states(&connection);
    server.refuse(true);

    connection.connect(URL);
    let mut previous = server.next_attempt().await.at;
    let mut delays = Vec::new();
    for _ in 0..6 {
        let at = server.next_attempt().await.at;
        delays.push(at.duration_since(previous));
        previous = at;
    }

    let expected = [1000, 2000, 4000, 8000, 8000, 8000];
    for (delay, expected) in delays.iter().zip(expected) {
        let expected = Duration::from_millis(expected);
        assert!(
            *delay >= expected && *delay < expected + Duration::from_millis(50),
            "delays {delays:?}"
        );
    }

    assert_no_repeats(&states.lock().unwrap());
    connection.close();
}

#[tokio::test(start_paused = true)]
async fn successful_open_resets_the_backoff() {
    let (connector, mut server) = memory();
    let connection = ConnectionManager::with_connector(Config::default(), connector);
    server.refuse(true);

    connection.connect(URL);
    let first = server.next_attempt().await.at;
    let second = server.next_attempt().await.at;
    let third = server.next_attempt().await.at;
    assert_eq!(third.duration_since(second), Duration::from_secs(2));
    assert_eq!(second.duration_since(first), Duration::from_secs(1));

    server.refuse(false);
    let opened = server.next_attempt().await.at;
    server.accept().await.disconnect();
    wait_for_state(&connection, ConnectionState::Reconnecting).await;

    let retried = server.next_attempt().await.at;
    assert_eq!(retried.duration_since(opened), Duration::from_secs(1));
}

#[tokio::test(start_paused = true)]
async fn queued_messages_flush_in_order_across_reconnect() {
    let (connector, mut server) = memory();
    let connection = ConnectionManager::with_connector(Config::default(), connector);

    connection.connect(URL);
    let mut socket = server.accept().await;
    wait_for_state(&connection, ConnectionState::Connected).await;

    connection.call_on_connection(json!({"op": "publish", "topic": "/seq", "msg": {"n": 0}}));
    assert_eq!(socket.recv().await.unwrap()["msg"]["n"], 0);

    socket.disconnect();
    wait_for_state(&connection, ConnectionState::Reconnecting).await;

    for n in 1..=3 {
        connection.call_on_connection(json!({"op": "publish", "topic": "/seq", "msg": {"n": n}}));
    }
    assert_eq!(connection.queued_len(), 3);

    let mut socket = server.accept().await;
    let received: Vec<Value> = vec![
        socket.recv().await.unwrap(),
        socket.recv().await.unwrap(),
        socket.recv().await.unwrap(),
    ];
    let order: Vec<i64> = received
        .iter()
        .map(|frame| frame["msg"]["n"].as_i64().unwrap())
        .collect();
    assert_eq!(order, vec![1, 2, 3]);

    settle().await;
    assert_eq!(connection.queued_len(), 0);
    assert!(socket.drain().is_empty());
}

#[tokio::test(start_paused = true)]
async fn manual_close_is_terminal() {
    let (connector, mut server) = memory();
    let connection = ConnectionManager::with_connector(Config::default(), connector);
    let closes = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&closes);
    connection.on(CLOSE, move |event| sink.lock().unwrap().push(event.clone()));

    connection.connect(URL);
    let mut socket = server.accept().await;
    wait_for_state(&connection, ConnectionState::Connected).await;

    connection.close();
    assert_eq!(connection.state(), ConnectionState::Closed);
    assert!(socket.recv().await.is_none());

    connection.call_on_connection(json!({"op": "unsubscribe", "topic": "/a"}));
    tokio::time::sleep(Duration::from_secs(120)).await;

    assert_eq!(connection.state(), ConnectionState::Closed);
    assert_eq!(*closes.lock().unwrap(), vec![Event::Close { manual: true }]);

    // Only the explicit connect and no reconnection attempt
    assert_eq!(server.pending_attempts().len(), 1);
    assert_eq!(connection.queued_len(), 1);

    connection.connect(URL);
    let _socket = server.accept().await;
    wait_for_state(&connection, ConnectionState::Connected).await;
    // A fresh connect discards what was queued after close
    assert_eq!(connection.queued_len(), 0);
}

#[tokio::test(start_paused = true)]
async fn reconnecting_to_a_new_url_drops_the_old_socket() {
    let (connector, mut server) = memory();
    let connection = ConnectionManager::with_connector(Config::default(), connector);

    connection.connect(URL);
    let mut old = server.accept().await;
    wait_for_state(&connection, ConnectionState::Connected).await;

    connection.connect("ws://backup.local:9090");
    assert!(old.recv().await.is_none());

    let attempt = {
        let _first = server.next_attempt().await;
        server.next_attempt().await
    };
    assert_eq!(attempt.url, "ws://backup.local:9090");

    let _socket = server.accept().await;
    wait_for_state(&connection, ConnectionState::Connected).await;

    // The old socket's close must not schedule a reconnect for the new session
    tokio::time::sleep(Duration::from_secs(120)).await;
    assert!(connection.is_connected());
}

#[tokio::test(start_paused = true)]
async fn heartbeat_expiry_forces_reconnect() {
    let (connector, mut server) = memory();
    let config = Config::default().with_heartbeat_interval(Duration::from_secs(1));
    let connection = ConnectionManager::with_connector(config, connector);

    connection.connect(URL);
    let mut socket = server.accept().await;
    wait_for_state(&connection, ConnectionState::Connected).await;

    let keepalive = socket.recv().await.unwrap();
    assert_eq!(keepalive["op"], "call_service");
    assert_eq!(keepalive["service"], "/rosapi/get_time");
    assert_eq!(keepalive["type"], "rosapi/GetTime");

    // The bridge never answers: after two silent periods the link is declared dead
    let mut keepalives = 1;
    while socket.recv().await.is_some() {
        keepalives += 1;
    }
    assert_eq!(keepalives, 2);
    assert_eq!(connection.state(), ConnectionState::Reconnecting);

    let _socket = server.accept().await;
    wait_for_state(&connection, ConnectionState::Connected).await;
}

#[tokio::test(start_paused = true)]
async fn inbound_messages_keep_the_heartbeat_alive() {
    let (connector, mut server) = memory();
    let config = Config::default().with_heartbeat_interval(Duration::from_secs(1));
    let connection = ConnectionManager::with_connector(config, connector);

    connection.connect(URL);
    let mut socket = server.accept().await;
    wait_for_state(&connection, ConnectionState::Connected).await;

    for _ in 0..5 {
        let keepalive = socket.recv().await.unwrap();
        socket.send(&json!({
            "op": "service_response",
            "id": keepalive["id"],
            "result": true,
            "values": {"secs": 0, "nsecs": 0}
        }));
    }

    assert!(connection.is_connected());
}

#[tokio::test(start_paused = true)]
async fn custom_heartbeat_replaces_keepalive() {
    let (connector, mut server) = memory();
    let config = Config::default()
        .with_heartbeat_interval(Duration::from_secs(1))
        .with_heartbeat_fn(|connection| {
            connection.cast(json!({"op": "status", "level": "info"}));
        });
    let connection = ConnectionManager::with_connector(config, connector);

    connection.connect(URL);
    let mut socket = server.accept().await;
    wait_for_state(&connection, ConnectionState::Connected).await;

    assert_eq!(socket.recv().await.unwrap()["op"], "status");
}

#[tokio::test(start_paused = true)]
async fn undecodable_frames_are_dropped() {
    let (connector, mut server) = memory();
    let connection = ConnectionManager::with_connector(Config::default(), connector);
    let (collect, mut messages) = collector();
    connection.on("/chatter", move |event| {
        if let Some(message) = event.as_message() {
            collect(message);
        }
    });

    connection.connect(URL);
    let socket = server.accept().await;
    wait_for_state(&connection, ConnectionState::Connected).await;

    socket.send_text("{ definitely not json");
    socket.send(&json!({"op": "publish", "topic": "/chatter", "msg": {"data": "hi"}}));

    assert_eq!(next_value(&mut messages).await, json!({"data": "hi"}));
    assert!(connection.is_connected());
}
