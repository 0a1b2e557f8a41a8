//! In-process mock [`TransportDriver`] for engine tests.
//!
//! No sockets: `open`/`upgrade` succeed immediately and record what the
//! engine asked for; tests drive the other side by pushing
//! [`TransportEvent`]s directly onto the owner channel the engine
//! registered, and assert on frames captured by `sent`.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use http::HeaderMap;
use parking_lot::Mutex;
use tokio::sync::mpsc;
use wsconn_core::{Frame, Handle, StreamRef};

use crate::driver::{TransportDriver, TransportError, TransportEvent, TransportOpts, TransportResult};

#[derive(Debug, Clone, PartialEq)]
pub struct SentFrame {
    pub handle: Handle,
    pub stream: StreamRef,
    pub frame: Frame,
}

struct MockHandleState {
    owner: mpsc::UnboundedSender<TransportEvent>,
    stream: Option<StreamRef>,
}

/// A [`TransportDriver`] that never touches a socket.
///
/// `open` and `upgrade` always succeed unless the handle was pre-seeded
/// with [`MockTransportDriver::fail_next_open`] / `fail_next_upgrade`.
/// Every call to `send` is captured in `sent()` for assertions.
#[derive(Default)]
pub struct MockTransportDriver {
    next_handle: AtomicU64,
    next_stream: AtomicU64,
    handles: Mutex<HashMap<Handle, MockHandleState>>,
    sent: Mutex<Vec<SentFrame>>,
    fail_open: Mutex<bool>,
    fail_upgrade: Mutex<bool>,
}

impl MockTransportDriver {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Makes the next `open` call fail with `ConnectFailed`.
    pub fn fail_next_open(&self) {
        *self.fail_open.lock() = true;
    }

    /// Makes the next `upgrade` call fail with `UpgradeFailed`.
    pub fn fail_next_upgrade(&self) {
        *self.fail_upgrade.lock() = true;
    }

    /// Every frame handed to `send`, in call order.
    pub fn sent(&self) -> Vec<SentFrame> {
        self.sent.lock().clone()
    }

    /// Pushes a [`TransportEvent`] directly to the registered owner of
    /// `handle`, simulating something arriving from the wire.
    pub fn push_event(&self, handle: &Handle, event: TransportEvent) {
        if let Some(state) = self.handles.lock().get(handle) {
            let _ = state.owner.send(event);
        }
    }

    /// Number of handles the driver still considers open.
    pub fn live_handle_count(&self) -> usize {
        self.handles.lock().len()
    }
}

#[async_trait]
impl TransportDriver for MockTransportDriver {
    async fn open(
        &self,
        _host: &str,
        _port: u16,
        _opts: &TransportOpts,
        owner: mpsc::UnboundedSender<TransportEvent>,
    ) -> TransportResult<Handle> {
        if std::mem::take(&mut *self.fail_open.lock()) {
            return Err(TransportError::ConnectFailed("mock: forced failure".into()));
        }
        let handle = Handle(self.next_handle.fetch_add(1, Ordering::Relaxed));
        self.handles.lock().insert(
            handle.clone(),
            MockHandleState {
                owner: owner.clone(),
                stream: None,
            },
        );
        let _ = owner.send(TransportEvent::Up {
            handle: handle.clone(),
            protocol: "mock".into(),
        });
        Ok(handle)
    }

    async fn upgrade(
        &self,
        handle: &Handle,
        _path: &str,
        headers: HeaderMap,
    ) -> TransportResult<StreamRef> {
        if std::mem::take(&mut *self.fail_upgrade.lock()) {
            return Err(TransportError::UpgradeFailed("mock: forced failure".into()));
        }
        let stream = StreamRef(self.next_stream.fetch_add(1, Ordering::Relaxed));
        let owner = {
            let mut handles = self.handles.lock();
            let entry = handles.get_mut(handle).ok_or(TransportError::UnknownHandle)?;
            entry.stream = Some(stream);
            entry.owner.clone()
        };
        let _ = owner.send(TransportEvent::Upgraded {
            handle: handle.clone(),
            stream,
            headers,
        });
        Ok(stream)
    }

    async fn send(&self, handle: &Handle, stream: StreamRef, frame: Frame) -> TransportResult<()> {
        let handles = self.handles.lock();
        let entry = handles.get(handle).ok_or(TransportError::UnknownHandle)?;
        if entry.stream != Some(stream) {
            return Err(TransportError::StreamNotFound);
        }
        drop(handles);
        self.sent.lock().push(SentFrame {
            handle: handle.clone(),
            stream,
            frame,
        });
        Ok(())
    }

    async fn set_owner(
        &self,
        handle: &Handle,
        new_owner: mpsc::UnboundedSender<TransportEvent>,
    ) -> TransportResult<()> {
        let mut handles = self.handles.lock();
        let entry = handles.get_mut(handle).ok_or(TransportError::UnknownHandle)?;
        entry.owner = new_owner;
        Ok(())
    }

    async fn close(&self, handle: &Handle) {
        self.handles.lock().remove(handle);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn open_then_upgrade_emits_up_then_upgraded() {
        let driver = MockTransportDriver::new();
        let (tx, mut rx) = mpsc::unbounded_channel();
        let handle = driver
            .open("example.test", 443, &TransportOpts::default(), tx)
            .await
            .unwrap();
        let stream = driver.upgrade(&handle, "/ws", HeaderMap::new()).await.unwrap();

        match rx.try_recv().unwrap() {
            TransportEvent::Up { handle: h, .. } => assert_eq!(h, handle),
            other => panic!("expected Up, got {other:?}"),
        }
        match rx.try_recv().unwrap() {
            TransportEvent::Upgraded { stream: s, .. } => assert_eq!(s, stream),
            other => panic!("expected Upgraded, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn send_before_upgrade_is_stream_not_found() {
        let driver = MockTransportDriver::new();
        let (tx, _rx) = mpsc::unbounded_channel();
        let handle = driver
            .open("example.test", 443, &TransportOpts::default(), tx)
            .await
            .unwrap();
        let err = driver
            .send(&handle, StreamRef(0), Frame::Text("hi".into()))
            .await
            .unwrap_err();
        assert!(matches!(err, TransportError::StreamNotFound));
    }

    #[tokio::test]
    async fn forced_open_failure_surfaces_connect_failed() {
        let driver = MockTransportDriver::new();
        driver.fail_next_open();
        let (tx, _rx) = mpsc::unbounded_channel();
        let err = driver
            .open("example.test", 443, &TransportOpts::default(), tx)
            .await
            .unwrap_err();
        assert!(matches!(err, TransportError::ConnectFailed(_)));
    }

    #[tokio::test]
    async fn sent_frames_are_captured_in_order() {
        let driver = MockTransportDriver::new();
        let (tx, _rx) = mpsc::unbounded_channel();
        let handle = driver
            .open("example.test", 443, &TransportOpts::default(), tx)
            .await
            .unwrap();
        let stream = driver.upgrade(&handle, "/ws", HeaderMap::new()).await.unwrap();
        driver
            .send(&handle, stream, Frame::Text("one".into()))
            .await
            .unwrap();
        driver
            .send(&handle, stream, Frame::Text("two".into()))
            .await
            .unwrap();

        let sent = driver.sent();
        assert_eq!(sent.len(), 2);
        assert_eq!(sent[0].frame, Frame::Text("one".into()));
        assert_eq!(sent[1].frame, Frame::Text("two".into()));
    }
}
