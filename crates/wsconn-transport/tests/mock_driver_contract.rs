//! Exercises [`MockTransportDriver`] against the [`TransportDriver`] trait
//! object boundary the way `wsconn-runtime`'s engine actually uses it —
//! through `&dyn TransportDriver`, not the concrete type — so a regression
//! that only shows up through dynamic dispatch (e.g. a method accidentally
//! dropped from the trait impl) would fail here even though the crate's own
//! `#[cfg(test)]` unit tests call the concrete type directly.

use std::sync::Arc;

use http::HeaderMap;
use tokio::sync::mpsc;
use wsconn_core::{Frame, StreamRef};
use wsconn_transport::mock::MockTransportDriver;
use wsconn_transport::{TransportDriver, TransportError, TransportEvent, TransportOpts};

fn as_trait_object(driver: &Arc<MockTransportDriver>) -> &dyn TransportDriver {
    driver.as_ref()
}

#[tokio::test]
async fn open_upgrade_send_round_trip_through_trait_object() {
    let driver = MockTransportDriver::new();
    let dyn_driver = as_trait_object(&driver);
    let (tx, mut rx) = mpsc::unbounded_channel();

    let handle = dyn_driver
        .open("venue.test", 443, &TransportOpts::default(), tx)
        .await
        .unwrap();
    let stream = dyn_driver.upgrade(&handle, "/ws", HeaderMap::new()).await.unwrap();
    dyn_driver
        .send(&handle, stream, Frame::Text("hello".into()))
        .await
        .unwrap();

    assert!(matches!(rx.try_recv().unwrap(), TransportEvent::Up { .. }));
    assert!(matches!(rx.try_recv().unwrap(), TransportEvent::Upgraded { .. }));
    let sent = driver.sent();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].frame, Frame::Text("hello".into()));
}

#[tokio::test]
async fn set_owner_redirects_subsequent_events_to_the_new_channel() {
    let driver = MockTransportDriver::new();
    let (old_tx, mut old_rx) = mpsc::unbounded_channel();
    let handle = driver
        .open("venue.test", 443, &TransportOpts::default(), old_tx)
        .await
        .unwrap();
    // Drain the Up event the open() call already queued.
    old_rx.try_recv().unwrap();

    let (new_tx, mut new_rx) = mpsc::unbounded_channel();
    driver.set_owner(&handle, new_tx).await.unwrap();

    driver.push_event(
        &handle,
        TransportEvent::StreamError {
            handle: handle.clone(),
            stream: StreamRef(0),
            reason: "boom".into(),
        },
    );

    assert!(old_rx.try_recv().is_err(), "old owner should receive nothing after transfer");
    match new_rx.try_recv().unwrap() {
        TransportEvent::StreamError { reason, .. } => assert_eq!(reason, "boom"),
        other => panic!("expected StreamError, got {other:?}"),
    }
}

#[tokio::test]
async fn close_removes_the_handle_and_further_sends_fail() {
    let driver = MockTransportDriver::new();
    let (tx, _rx) = mpsc::unbounded_channel();
    let handle = driver
        .open("venue.test", 443, &TransportOpts::default(), tx)
        .await
        .unwrap();
    let stream = driver.upgrade(&handle, "/ws", HeaderMap::new()).await.unwrap();

    driver.close(&handle).await;
    assert_eq!(driver.live_handle_count(), 0);

    let err = driver.send(&handle, stream, Frame::Text("late".into())).await.unwrap_err();
    assert!(matches!(err, TransportError::UnknownHandle));
}

#[tokio::test]
async fn forced_upgrade_failure_does_not_register_a_stream() {
    let driver = MockTransportDriver::new();
    let (tx, _rx) = mpsc::unbounded_channel();
    let handle = driver
        .open("venue.test", 443, &TransportOpts::default(), tx)
        .await
        .unwrap();

    driver.fail_next_upgrade();
    let err = driver.upgrade(&handle, "/ws", HeaderMap::new()).await.unwrap_err();
    assert!(matches!(err, TransportError::UpgradeFailed(_)));

    let err = driver.send(&handle, StreamRef(0), Frame::Text("x".into())).await.unwrap_err();
    assert!(matches!(err, TransportError::StreamNotFound));
}
