//! End-to-end scenarios driven entirely through [`MockTransportDriver`] —
//! no real socket, no real clock once a test pauses it. These exercise the
//! same connect → upgrade → heartbeat → reconnect → resubscribe path a real
//! `TungsteniteDriver` would, just without the wire.

use std::sync::Arc;
use std::time::Duration;

use serde_json::json;
use wsconn::client_api::{self, ConnectOptions};
use wsconn::defaults::{DefaultSubscriptionHandler, HandlerBindingsBuilder};
use wsconn::Adapter;
use wsconn_core::{ConfigOptions, Frame, HandlerBindings, SubscriptionHandler};
use wsconn_transport::mock::MockTransportDriver;
use wsconn_transport::TransportEvent;

/// Test adapter whose subscription handler is shared (not rebuilt) across
/// every `handlers()` call, the way a real adapter stores its handler
/// `Arc`s as fields — required for subscription bookkeeping set up through
/// one `handlers()` call to still be visible to a later one.
struct TestAdapter {
    subscription: Arc<DefaultSubscriptionHandler>,
}

impl TestAdapter {
    fn new() -> Self {
        Self {
            subscription: Arc::new(DefaultSubscriptionHandler::new()),
        }
    }
}

impl Adapter for TestAdapter {
    fn default_config(&self) -> ConfigOptions {
        ConfigOptions::new(json!({ "host": "mock.test", "port": 443, "path": "/ws" }))
    }

    fn handlers(&self) -> HandlerBindings {
        HandlerBindingsBuilder::new()
            .subscription(self.subscription.clone() as Arc<dyn SubscriptionHandler>)
            .build()
    }
}

#[tokio::test]
async fn connect_reaches_websocket_connected_with_a_live_stream() {
    let driver = MockTransportDriver::new();
    let adapter = TestAdapter::new();

    let conn = client_api::connect(&adapter, ConnectOptions::new(driver))
        .await
        .expect("connect should succeed against the mock driver");

    assert!(conn.transport_handle.is_some());
    assert!(conn.stream_ref.is_some());
}

#[tokio::test]
async fn inbound_ping_gets_an_automatic_pong() {
    let driver = MockTransportDriver::new();
    let adapter = TestAdapter::new();

    let conn = client_api::connect(&adapter, ConnectOptions::new(driver.clone()))
        .await
        .unwrap();
    let handle = conn.transport_handle.clone().unwrap();
    let stream = conn.stream_ref.unwrap();

    driver.push_event(
        &handle,
        TransportEvent::Frame {
            handle: handle.clone(),
            stream,
            frame: Frame::Ping,
        },
    );

    for _ in 0..10 {
        tokio::task::yield_now().await;
    }

    let sent = driver.sent();
    assert!(
        sent.iter().any(|f| f.frame == Frame::Pong),
        "expected an automatic Pong in {sent:?}"
    );
}

#[tokio::test(start_paused = true)]
async fn reconnect_replays_the_subscribe_frame_on_the_new_stream() {
    let driver = MockTransportDriver::new();
    let adapter = TestAdapter::new();

    let mut conn = client_api::connect(&adapter, ConnectOptions::new(driver.clone()))
        .await
        .unwrap();
    let original_stream = conn.stream_ref.unwrap();

    let handlers = adapter.handlers();
    client_api::subscribe(&mut conn, &handlers, "ticker.BTC-PERPETUAL.raw", None)
        .await
        .unwrap();
    assert_eq!(handlers.subscription.active_subscriptions(), vec!["ticker.BTC-PERPETUAL.raw"]);

    let old_handle = conn.transport_handle.clone().unwrap();
    driver.push_event(
        &old_handle,
        TransportEvent::Down {
            handle: old_handle.clone(),
            reason: "connection reset".into(),
            pending: 0,
            killed: false,
        },
    );

    // Drive the paused clock through the default error handler's backoff
    // delay, giving the scheduler a chance to run the engine's reconnect
    // chain (dial -> upgrade -> resubscribe) between each step.
    for _ in 0..40 {
        tokio::time::advance(Duration::from_millis(50)).await;
        tokio::task::yield_now().await;
    }

    let snapshot = client_api::status(&conn).await.unwrap();
    let new_stream = snapshot
        .active_streams
        .iter()
        .find(|(_, kind)| *kind == wsconn_core::StreamKind::WebSocket)
        .map(|(stream, _)| *stream);
    assert_ne!(new_stream, Some(original_stream), "reconnect should mint a fresh stream");

    let sent = driver.sent();
    assert!(
        sent.iter().any(|f| matches!(
            &f.frame,
            Frame::Text(text) if text.contains("ticker.BTC-PERPETUAL.raw") && text.contains("subscribe")
        )),
        "expected the subscribe frame to be replayed after reconnect, got {sent:?}"
    );
}

#[tokio::test(start_paused = true)]
async fn stale_events_from_the_previous_handle_are_dropped_after_reconnect() {
    let driver = MockTransportDriver::new();
    let adapter = TestAdapter::new();

    let conn = client_api::connect(&adapter, ConnectOptions::new(driver.clone()))
        .await
        .unwrap();
    let old_handle = conn.transport_handle.clone().unwrap();

    driver.push_event(
        &old_handle,
        TransportEvent::Down {
            handle: old_handle.clone(),
            reason: "connection reset".into(),
            pending: 0,
            killed: false,
        },
    );
    for _ in 0..40 {
        tokio::time::advance(Duration::from_millis(50)).await;
        tokio::task::yield_now().await;
    }

    let snapshot = client_api::status(&conn).await.unwrap();
    let new_handle = snapshot.transport_handle.clone().unwrap();
    assert_ne!(new_handle, old_handle, "reconnect should have minted a fresh handle");
    assert_eq!(snapshot.status, wsconn_core::Status::WebsocketConnected);

    // Late-arriving Up/Down bearing the dead handle must be ignored: the
    // engine compares against its *current* handle and silently drops
    // anything else, per the stale-event filter.
    driver.push_event(
        &old_handle,
        TransportEvent::Up {
            handle: old_handle.clone(),
            protocol: "mock".into(),
        },
    );
    driver.push_event(
        &old_handle,
        TransportEvent::Down {
            handle: old_handle.clone(),
            reason: "late stale down".into(),
            pending: 0,
            killed: false,
        },
    );
    for _ in 0..10 {
        tokio::task::yield_now().await;
    }

    let after = client_api::status(&conn).await.unwrap();
    assert_eq!(after.status, wsconn_core::Status::WebsocketConnected, "stale events must not perturb status");
    assert_eq!(after.transport_handle, Some(new_handle), "stale events must not change the live handle");
}

#[tokio::test(start_paused = true)]
async fn reconnect_emits_a_synced_client_conn_to_event_subscribers() {
    let driver = MockTransportDriver::new();
    let adapter = TestAdapter::new();

    let mut conn = client_api::connect(&adapter, ConnectOptions::new(driver.clone()))
        .await
        .unwrap();
    conn.access_token = Some("tok-keep-me".into());
    let original_stream = conn.stream_ref.unwrap();

    let mut events = client_api::subscribe_events(&mut conn).await.unwrap();

    let old_handle = conn.transport_handle.clone().unwrap();
    driver.push_event(
        &old_handle,
        TransportEvent::Down {
            handle: old_handle.clone(),
            reason: "connection reset".into(),
            pending: 0,
            killed: false,
        },
    );

    // Same paused-clock drive pattern as the reconnect/resubscribe test above:
    // step the clock through the backoff delay, giving the engine's dial ->
    // upgrade -> reconnected-fanout chain room to run between each step,
    // while draining whatever events have landed so far.
    let mut reconnected = None;
    for _ in 0..40 {
        tokio::time::advance(Duration::from_millis(50)).await;
        tokio::task::yield_now().await;
        while let Ok(event) = events.try_recv() {
            if let wsconn_runtime::ClientEvent::Reconnected(updated) = event {
                reconnected = Some(updated);
            }
        }
        if reconnected.is_some() {
            break;
        }
    }
    let reconnected = reconnected.expect("should observe a Reconnected client event");

    assert_ne!(reconnected.stream_ref, Some(original_stream));
    assert_eq!(reconnected.access_token.as_deref(), Some("tok-keep-me"));
}

#[tokio::test]
async fn reconnect_exhaustion_emits_reconnect_exhausted_and_halts() {
    let driver = MockTransportDriver::new();
    let adapter = TestAdapter::new();

    let mut conn = client_api::connect(
        &adapter,
        ConnectOptions::new(driver.clone())
            .with_user_opts(ConfigOptions::new(json!({ "max_reconnect_attempts": 0 }))),
    )
    .await
    .unwrap();

    let mut events = client_api::subscribe_events(&mut conn).await.unwrap();
    let handle = conn.transport_handle.clone().unwrap();
    driver.push_event(
        &handle,
        TransportEvent::Down {
            handle: handle.clone(),
            reason: "connection reset".into(),
            pending: 0,
            killed: false,
        },
    );

    for _ in 0..10 {
        tokio::task::yield_now().await;
    }

    let mut saw_exhausted = false;
    while let Ok(event) = events.try_recv() {
        if let wsconn_runtime::ClientEvent::ConnectionDown(err) = event {
            if err.reason == "reconnect_exhausted" {
                saw_exhausted = true;
            }
        }
    }
    assert!(saw_exhausted, "expected a reconnect_exhausted ConnectionDown event with a zero-attempt ceiling");

    let snapshot = client_api::status(&conn).await.unwrap();
    assert_eq!(snapshot.status, wsconn_core::Status::Error, "exhaustion is terminal, same as a handler-classified error");
}

#[tokio::test]
async fn receive_ownership_redirects_the_handle_to_the_new_engine() {
    let driver = MockTransportDriver::new();
    let adapter_a = TestAdapter::new();
    let adapter_b = TestAdapter::new();

    let conn_a = client_api::connect(&adapter_a, ConnectOptions::new(driver.clone()))
        .await
        .unwrap();
    let conn_b = client_api::connect(&adapter_b, ConnectOptions::new(driver.clone()))
        .await
        .unwrap();

    let handle_a = conn_a.transport_handle.clone().unwrap();
    let stream_a = conn_a.stream_ref.unwrap();
    let snapshot_a = client_api::status(&conn_a).await.unwrap();

    conn_b
        .transport
        .receive_ownership(handle_a.clone(), snapshot_a)
        .await
        .expect("receiving engine should adopt the handed-over handle");

    // The driver now routes events for `handle_a` to engine B, not A: a
    // frame pushed on that handle should land in B's status/state, not A's.
    driver.push_event(
        &handle_a,
        TransportEvent::Frame {
            handle: handle_a.clone(),
            stream: stream_a,
            frame: Frame::Ping,
        },
    );
    for _ in 0..10 {
        tokio::task::yield_now().await;
    }

    let sent = driver.sent();
    assert!(
        sent.iter().any(|f| f.handle == handle_a && f.frame == Frame::Pong),
        "engine B should have driven the ping on the adopted handle, got {sent:?}"
    );

    let snapshot_b = client_api::status(&conn_b).await.unwrap();
    assert_eq!(snapshot_b.transport_handle, Some(handle_a), "engine B should now report the adopted handle");
}

#[tokio::test]
async fn close_is_idempotent_and_ends_the_engine_task() {
    let driver = MockTransportDriver::new();
    let adapter = TestAdapter::new();
    let conn = client_api::connect(&adapter, ConnectOptions::new(driver.clone()))
        .await
        .unwrap();

    client_api::close(&conn);
    client_api::close(&conn);

    for _ in 0..10 {
        tokio::task::yield_now().await;
    }
    assert_eq!(driver.live_handle_count(), 0);
}
