//! `tokio-tungstenite`-backed [`TransportDriver`] implementation.
//!
//! Ported from the teacher's WebSocket client capability: a dedicated task
//! owns the socket (split sink/stream), a `watch` channel carries shutdown,
//! and an `mpsc` channel carries outbound frames in. The difference from
//! the teacher is the two-phase open/upgrade split this crate's contract
//! requires: `open` dials a raw TCP stream only, `upgrade` performs the
//! TLS wrap (if requested) and HTTP handshake together via
//! `client_async_tls`, rather than `connect_async`'s one-shot dial+upgrade.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use http::{HeaderMap, Request};
use parking_lot::Mutex;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, client_async_tls};
use tracing::{debug, trace, warn};
use wsconn_core::{Frame, Handle, StreamRef};

use crate::driver::{TransportDriver, TransportError, TransportEvent, TransportOpts, TransportResult};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// The current owner of a handle's events, shared between the entry in
/// `TungsteniteDriver::handles` and any already-running `run_stream_loop`
/// task for that handle. A plain `mpsc::UnboundedSender` clone captured at
/// spawn time would go stale the moment `set_owner` ran — the loop would
/// keep shipping frames to the old owner forever. Swapping the sender
/// behind this lock is what makes ownership transfer actually redirect a
/// live stream's events, not just future ones.
type SharedOwner = Arc<Mutex<mpsc::UnboundedSender<TransportEvent>>>;

struct LiveHandle {
    host: String,
    port: u16,
    tls: bool,
    owner: SharedOwner,
    /// Outbound sender to the stream's write half, once upgraded.
    outbound: Option<mpsc::UnboundedSender<Message>>,
    stream_ref: Option<StreamRef>,
}

/// Concrete `tokio-tungstenite` transport driver.
///
/// One instance can own many handles; each handle's socket is driven by
/// its own spawned task.
#[derive(Default)]
pub struct TungsteniteDriver {
    next_handle: AtomicU64,
    next_stream: AtomicU64,
    handles: Mutex<HashMap<Handle, LiveHandle>>,
    /// Streams that have dialed but not yet upgraded.
    pending: Mutex<HashMap<Handle, TcpStream>>,
}

impl TungsteniteDriver {
    /// Creates a fresh driver with no live handles.
    pub fn new() -> Self {
        Self::default()
    }

    fn allocate_handle(&self) -> Handle {
        Handle(self.next_handle.fetch_add(1, Ordering::Relaxed))
    }

    fn allocate_stream(&self) -> StreamRef {
        StreamRef(self.next_stream.fetch_add(1, Ordering::Relaxed))
    }
}

fn to_driver_frame(message: Message) -> Option<Frame> {
    match message {
        Message::Text(text) => Some(Frame::Text(text.to_string())),
        Message::Binary(data) => Some(Frame::Binary(data.to_vec())),
        Message::Ping(data) if data.is_empty() => Some(Frame::Ping),
        Message::Ping(data) => Some(Frame::PingData(data.to_vec())),
        Message::Pong(data) if data.is_empty() => Some(Frame::Pong),
        Message::Pong(data) => Some(Frame::PongData(data.to_vec())),
        Message::Close(Some(frame)) => Some(Frame::CloseWithReason(
            frame.code.into(),
            frame.reason.to_string(),
        )),
        Message::Close(None) => Some(Frame::Close),
        Message::Frame(_) => None,
    }
}

fn from_driver_frame(frame: Frame) -> Message {
    match frame {
        Frame::Text(text) => Message::Text(text.into()),
        Frame::Binary(data) => Message::Binary(data.into()),
        Frame::Ping => Message::Ping(Vec::new().into()),
        Frame::PingData(data) => Message::Ping(data.into()),
        Frame::Pong => Message::Pong(Vec::new().into()),
        Frame::PongData(data) => Message::Pong(data.into()),
        Frame::Close => Message::Close(None),
        Frame::CloseCode(code) => Message::Close(Some(tokio_tungstenite::tungstenite::protocol::CloseFrame {
            code: code.into(),
            reason: "".into(),
        })),
        Frame::CloseWithReason(code, reason) => {
            Message::Close(Some(tokio_tungstenite::tungstenite::protocol::CloseFrame {
                code: code.into(),
                reason: reason.into(),
            }))
        }
    }
}

async fn run_stream_loop(
    handle: Handle,
    stream_ref: StreamRef,
    ws: WsStream,
    mut outbound_rx: mpsc::UnboundedReceiver<Message>,
    owner: SharedOwner,
) {
    let (mut write, mut read) = ws.split();
    loop {
        tokio::select! {
            outgoing = outbound_rx.recv() => {
                match outgoing {
                    Some(message) => {
                        if let Err(err) = write.send(message).await {
                            warn!(?handle, error = %err, "send failed");
                            let _ = owner.lock().send(TransportEvent::StreamError {
                                handle: handle.clone(),
                                stream: stream_ref,
                                reason: err.to_string(),
                            });
                        }
                    }
                    None => {
                        trace!(?handle, "outbound channel closed, ending stream loop");
                        break;
                    }
                }
            }
            incoming = read.next() => {
                match incoming {
                    Some(Ok(message)) => {
                        if let Some(frame) = to_driver_frame(message) {
                            let _ = owner.lock().send(TransportEvent::Frame {
                                handle: handle.clone(),
                                stream: stream_ref,
                                frame,
                            });
                        }
                    }
                    Some(Err(err)) => {
                        debug!(?handle, error = %err, "read error, transport going down");
                        let _ = owner.lock().send(TransportEvent::Down {
                            handle: handle.clone(),
                            reason: err.to_string(),
                            pending: 0,
                            killed: false,
                        });
                        break;
                    }
                    None => {
                        debug!(?handle, "peer closed stream");
                        let _ = owner.lock().send(TransportEvent::Down {
                            handle: handle.clone(),
                            reason: "stream ended".into(),
                            pending: 0,
                            killed: false,
                        });
                        break;
                    }
                }
            }
        }
    }
}

#[async_trait]
impl TransportDriver for TungsteniteDriver {
    async fn open(
        &self,
        host: &str,
        port: u16,
        opts: &TransportOpts,
        owner: mpsc::UnboundedSender<TransportEvent>,
    ) -> TransportResult<Handle> {
        let handle = self.allocate_handle();
        self.handles.lock().insert(
            handle.clone(),
            LiveHandle {
                host: host.to_string(),
                port,
                tls: opts.tls,
                owner: Arc::new(Mutex::new(owner.clone())),
                outbound: None,
                stream_ref: None,
            },
        );

        let tcp = tokio::net::TcpStream::connect((host, port))
            .await
            .map_err(|e| TransportError::ConnectFailed(e.to_string()))?;

        let protocol = if opts.tls { "https" } else { "http" };
        debug!(host, port, protocol, "transport dialed");
        let _ = owner.send(TransportEvent::Up {
            handle: handle.clone(),
            protocol: protocol.into(),
        });

        // The raw TCP stream is stashed plain regardless of `opts.tls`;
        // `client_async_tls` wraps it in the right `MaybeTlsStream` variant
        // during `upgrade`, once the request URI's scheme (`ws`/`wss`) is
        // known.
        self.pending.lock().insert(handle.clone(), tcp);

        Ok(handle)
    }

    async fn upgrade(
        &self,
        handle: &Handle,
        path: &str,
        headers: HeaderMap,
    ) -> TransportResult<StreamRef> {
        let (host, scheme) = {
            let handles = self.handles.lock();
            let entry = handles.get(handle).ok_or(TransportError::UnknownHandle)?;
            (
                format!("{}:{}", entry.host, entry.port),
                if entry.tls { "wss" } else { "ws" },
            )
        };

        let tcp = self
            .pending
            .lock()
            .remove(handle)
            .ok_or(TransportError::NotConnected)?;

        let uri: http::Uri = format!("{scheme}://{host}{path}")
            .parse()
            .map_err(|e: http::uri::InvalidUri| TransportError::UpgradeFailed(e.to_string()))?;
        let mut builder = Request::builder().uri(uri);
        for (name, value) in headers.iter() {
            builder = builder.header(name, value);
        }
        let request = builder
            .body(())
            .map_err(|e| TransportError::UpgradeFailed(e.to_string()))?;

        let (ws, response) = client_async_tls(request, tcp)
            .await
            .map_err(|e| TransportError::UpgradeFailed(e.to_string()))?;

        let stream_ref = self.allocate_stream();
        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();

        let owner = {
            let mut handles = self.handles.lock();
            let entry = handles.get_mut(handle).ok_or(TransportError::UnknownHandle)?;
            entry.outbound = Some(outbound_tx);
            entry.stream_ref = Some(stream_ref);
            entry.owner.clone()
        };

        let _ = owner.lock().send(TransportEvent::Upgraded {
            handle: handle.clone(),
            stream: stream_ref,
            headers: response.headers().clone(),
        });

        tokio::spawn(run_stream_loop(handle.clone(), stream_ref, ws, outbound_rx, owner));

        Ok(stream_ref)
    }

    async fn send(&self, handle: &Handle, stream: StreamRef, frame: Frame) -> TransportResult<()> {
        let outbound = {
            let handles = self.handles.lock();
            let entry = handles.get(handle).ok_or(TransportError::UnknownHandle)?;
            if entry.stream_ref != Some(stream) {
                return Err(TransportError::StreamNotFound);
            }
            entry.outbound.clone().ok_or(TransportError::NotConnected)?
        };
        outbound
            .send(from_driver_frame(frame))
            .map_err(|e| TransportError::SendFailed(e.to_string()))
    }

    async fn set_owner(
        &self,
        handle: &Handle,
        new_owner: mpsc::UnboundedSender<TransportEvent>,
    ) -> TransportResult<()> {
        let handles = self.handles.lock();
        let entry = handles.get(handle).ok_or(TransportError::UnknownHandle)?;
        *entry.owner.lock() = new_owner;
        Ok(())
    }

    async fn close(&self, handle: &Handle) {
        self.handles.lock().remove(handle);
        self.pending.lock().remove(handle);
    }
}

/// Convenience: dials and upgrades in one call, the common case for a
/// client that doesn't need the two phases observable separately.
pub async fn connect(
    driver: &Arc<dyn TransportDriver>,
    host: &str,
    port: u16,
    path: &str,
    opts: &TransportOpts,
    headers: HeaderMap,
    owner: mpsc::UnboundedSender<TransportEvent>,
) -> TransportResult<(Handle, StreamRef)> {
    let handle = driver.open(host, port, opts, owner).await?;
    let stream = driver.upgrade(&handle, path, headers).await?;
    Ok((handle, stream))
}
