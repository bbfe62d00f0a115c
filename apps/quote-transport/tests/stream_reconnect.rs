//! Streaming Connection Integration Tests
//!
//! Reconnect, resubscribe and heartbeat behavior against an in-memory
//! connector, with tokio time paused.

#![allow(clippy::unwrap_used, clippy::expect_used)]

mod common;

use std::sync::Arc;
use std::time::Duration;

use rust_decimal_macros::dec;
use tokio::sync::mpsc;

use common::FakeConnector;
use quote_transport::infrastructure::config::{Credential, StreamSettings};
use quote_transport::infrastructure::provider::{
    ConnectionState, StreamClientConfig, StreamEvent, StreamingConnection,
};

const WAIT: Duration = Duration::from_secs(300);

fn settings() -> StreamSettings {
    StreamSettings {
        max_reconnect_attempts: 3,
        ..StreamSettings::default()
    }
}

fn connection(
    connector: &Arc<FakeConnector>,
) -> (StreamingConnection, mpsc::UnboundedReceiver<StreamEvent>) {
    let (tx, rx) = mpsc::unbounded_channel();
    let config = StreamClientConfig::from_stream_settings(
        "wss://stream.example.test",
        Credential::new("test-token"),
        &settings(),
    );
    let conn = StreamingConnection::new(config, Arc::clone(connector) as _, tx);
    (conn, rx)
}

async fn next_event(rx: &mut mpsc::UnboundedReceiver<StreamEvent>) -> StreamEvent {
    tokio::time::timeout(WAIT, rx.recv())
        .await
        .expect("timed out waiting for stream event")
        .expect("event channel closed")
}

async fn wait_for(
    rx: &mut mpsc::UnboundedReceiver<StreamEvent>,
    pred: impl Fn(&StreamEvent) -> bool,
) -> Vec<StreamEvent> {
    let mut seen = Vec::new();
    loop {
        let event = next_event(rx).await;
        let done = pred(&event);
        seen.push(event);
        if done {
            return seen;
        }
    }
}

fn is_subscribe(frame: &str) -> bool {
    frame.contains(r#""type":"subscribe""#)
}

#[tokio::test(start_paused = true)]
async fn resubscribes_everything_after_reconnect() {
    let connector = Arc::new(FakeConnector::healthy());
    let (conn, mut events) = connection(&connector);

    conn.subscribe(["MSFT".to_string(), "AAPL".to_string()]);
    conn.connect().unwrap();

    let mut first = connector.next_session(WAIT).await;
    assert!(first.url.contains("token=test-token"));
    let frames = first.collect_matching(2, WAIT, is_subscribe).await;
    assert_eq!(
        frames,
        vec![
            r#"{"type":"subscribe","symbol":"AAPL"}"#.to_string(),
            r#"{"type":"subscribe","symbol":"MSFT"}"#.to_string(),
        ]
    );
    assert!(matches!(next_event(&mut events).await, StreamEvent::Connected));
    assert!(conn.is_connected());

    // Peer goes away.
    drop(first);

    let seen = wait_for(&mut events, |e| matches!(e, StreamEvent::Connected)).await;
    assert!(matches!(seen[0], StreamEvent::Disconnected { .. }));
    assert!(matches!(
        seen[1],
        StreamEvent::Reconnecting { attempt: 1, delay } if delay == Duration::from_millis(500)
    ));

    let mut second = connector.next_session(WAIT).await;
    let frames = second.collect_matching(2, WAIT, is_subscribe).await;
    assert_eq!(frames.len(), 2);
    assert!(frames[0].contains("AAPL"));
    assert!(frames[1].contains("MSFT"));

    let subs = conn.subscriptions();
    assert_eq!(subs.active().len(), 2);
    assert!(subs.pending().is_empty());
    assert_eq!(conn.open_attempts(), 2);

    conn.stop().await;
}

#[tokio::test(start_paused = true)]
async fn gives_up_after_max_attempts() {
    let connector = Arc::new(FakeConnector::always_failing());
    let (conn, mut events) = connection(&connector);

    conn.connect().unwrap();

    let seen = wait_for(&mut events, |e| matches!(e, StreamEvent::GaveUp { .. })).await;

    let delays: Vec<Duration> = seen
        .iter()
        .filter_map(|e| match e {
            StreamEvent::Reconnecting { delay, .. } => Some(*delay),
            _ => None,
        })
        .collect();
    assert_eq!(
        delays,
        vec![
            Duration::from_millis(500),
            Duration::from_millis(1000),
            Duration::from_millis(2000),
        ]
    );
    let failures = seen
        .iter()
        .filter(|e| matches!(e, StreamEvent::ConnectFailed { .. }))
        .count();
    assert_eq!(failures, 4);
    assert!(matches!(seen.last(), Some(StreamEvent::GaveUp { attempts: 3 })));

    assert_eq!(conn.open_attempts(), 4);
    assert_eq!(connector.attempts(), 4);
    assert_eq!(conn.state(), ConnectionState::Stopped);

    // Nothing else is scheduled.
    tokio::time::sleep(Duration::from_secs(120)).await;
    assert_eq!(connector.attempts(), 4);
}

#[tokio::test(start_paused = true)]
async fn successful_open_resets_backoff() {
    let connector = Arc::new(FakeConnector::failing_first(2));
    let (conn, mut events) = connection(&connector);

    conn.connect().unwrap();
    let seen = wait_for(&mut events, |e| matches!(e, StreamEvent::Connected)).await;
    assert_eq!(
        seen.iter()
            .filter(|e| matches!(e, StreamEvent::Reconnecting { .. }))
            .count(),
        2
    );

    drop(connector.next_session(WAIT).await);

    let seen = wait_for(&mut events, |e| matches!(e, StreamEvent::Reconnecting { .. })).await;
    assert!(matches!(
        seen.last(),
        Some(StreamEvent::Reconnecting { attempt: 1, delay }) if *delay == Duration::from_millis(500)
    ));

    conn.stop().await;
}

#[tokio::test(start_paused = true)]
async fn silent_channel_times_out_and_reconnects() {
    let connector = Arc::new(FakeConnector::healthy());
    let (conn, mut events) = connection(&connector);

    conn.connect().unwrap();
    let mut first = connector.next_session(WAIT).await;
    assert!(matches!(next_event(&mut events).await, StreamEvent::Connected));

    let seen = wait_for(&mut events, |e| matches!(e, StreamEvent::Disconnected { .. })).await;
    let StreamEvent::Disconnected { reason } = seen.last().unwrap() else {
        unreachable!()
    };
    assert!(reason.contains("heartbeat"));

    // Pings went out before the timeout fired.
    assert_eq!(first.next_frame(WAIT).await, r#"{"type":"ping"}"#);

    let _second = connector.next_session(WAIT).await;
    conn.stop().await;
}

#[tokio::test(start_paused = true)]
async fn inbound_traffic_keeps_channel_alive() {
    let connector = Arc::new(FakeConnector::healthy());
    let (conn, mut events) = connection(&connector);

    conn.connect().unwrap();
    let session = connector.next_session(WAIT).await;
    assert!(matches!(next_event(&mut events).await, StreamEvent::Connected));

    for _ in 0..6 {
        tokio::time::sleep(Duration::from_secs(20)).await;
        session.push(r#"{"type":"pong"}"#);
    }

    assert!(conn.is_connected());
    assert_eq!(connector.attempts(), 1);
    conn.stop().await;
}

#[tokio::test(start_paused = true)]
async fn answers_provider_ping() {
    let connector = Arc::new(FakeConnector::healthy());
    let (conn, _events) = connection(&connector);

    conn.connect().unwrap();
    let mut session = connector.next_session(WAIT).await;

    session.push(r#"{"type":"ping"}"#);
    assert_eq!(
        session.next_frame(Duration::from_secs(1)).await,
        r#"{"type":"pong"}"#
    );

    conn.stop().await;
}

#[tokio::test(start_paused = true)]
async fn delivers_ticks_in_wire_order() {
    let connector = Arc::new(FakeConnector::healthy());
    let (conn, mut events) = connection(&connector);

    conn.subscribe(["AAPL".to_string(), "MSFT".to_string()]);
    conn.connect().unwrap();
    let session = connector.next_session(WAIT).await;
    assert!(matches!(next_event(&mut events).await, StreamEvent::Connected));

    session.push(
        r#"{"type":"trade","data":[
            {"s":"MSFT","p":410.1,"t":1700000000000,"v":5},
            {"s":"AAPL","p":189.5,"t":1700000000001,"v":100},
            {"s":"MSFT","p":410.2,"t":1700000000002}
        ]}"#,
    );
    session.push(r#"{"type":"error","msg":"Subscribing to too many symbols"}"#);

    let mut ticks = Vec::new();
    for _ in 0..3 {
        match next_event(&mut events).await {
            StreamEvent::Tick(tick) => ticks.push((tick.symbol, tick.price)),
            other => panic!("unexpected event: {other:?}"),
        }
    }
    assert_eq!(
        ticks,
        vec![
            ("MSFT".to_string(), dec!(410.1)),
            ("AAPL".to_string(), dec!(189.5)),
            ("MSFT".to_string(), dec!(410.2)),
        ]
    );
    assert!(matches!(
        next_event(&mut events).await,
        StreamEvent::ProviderError(msg) if msg.contains("too many")
    ));

    conn.stop().await;
}

#[tokio::test(start_paused = true)]
async fn malformed_frames_are_ignored() {
    let connector = Arc::new(FakeConnector::healthy());
    let (conn, mut events) = connection(&connector);

    conn.connect().unwrap();
    let session = connector.next_session(WAIT).await;
    assert!(matches!(next_event(&mut events).await, StreamEvent::Connected));

    session.push("not json");
    session.push(r#"{"type":"news","data":[]}"#);
    session.push(r#"{"type":"trade","data":[{"s":"AAPL","p":1.5,"t":1700000000000}]}"#);

    assert!(matches!(next_event(&mut events).await, StreamEvent::Tick(_)));
    assert!(conn.is_connected());
    conn.stop().await;
}

#[tokio::test(start_paused = true)]
async fn live_subscribe_and_unsubscribe_hit_the_wire() {
    let connector = Arc::new(FakeConnector::healthy());
    let (conn, mut events) = connection(&connector);

    conn.connect().unwrap();
    let mut session = connector.next_session(WAIT).await;
    assert!(matches!(next_event(&mut events).await, StreamEvent::Connected));

    conn.subscribe(["TSLA".to_string()]);
    assert_eq!(
        session.next_frame(Duration::from_secs(1)).await,
        r#"{"type":"subscribe","symbol":"TSLA"}"#
    );

    conn.unsubscribe([&"TSLA".to_string()]);
    assert_eq!(
        session.next_frame(Duration::from_secs(1)).await,
        r#"{"type":"unsubscribe","symbol":"TSLA"}"#
    );
    assert!(conn.subscriptions().is_empty());

    conn.stop().await;
}

#[tokio::test(start_paused = true)]
async fn auth_rejection_stops_without_retry() {
    let connector = Arc::new(FakeConnector::auth_rejecting());
    let (conn, mut events) = connection(&connector);

    conn.connect().unwrap();
    assert!(matches!(
        next_event(&mut events).await,
        StreamEvent::AuthRejected { .. }
    ));

    tokio::time::sleep(Duration::from_secs(60)).await;
    assert_eq!(connector.attempts(), 1);
    assert_eq!(conn.state(), ConnectionState::Stopped);
}

#[tokio::test(start_paused = true)]
async fn stop_suppresses_reconnects() {
    let connector = Arc::new(FakeConnector::always_failing());
    let (conn, mut events) = connection(&connector);

    conn.subscribe(["AAPL".to_string()]);
    conn.connect().unwrap();
    assert!(matches!(
        next_event(&mut events).await,
        StreamEvent::ConnectFailed { .. }
    ));

    conn.stop().await;
    let attempts = connector.attempts();

    tokio::time::sleep(Duration::from_secs(120)).await;
    assert_eq!(connector.attempts(), attempts);
    assert_eq!(conn.state(), ConnectionState::Stopped);
    assert!(conn.subscriptions().is_empty());
}
