//! The `TransportDriver` contract — the only interface the engine uses to
//! reach the wire. Concrete RFC 6455 framing and TLS/TCP plumbing live in
//! [`crate::tungstenite`]; this module defines the vocabulary the engine
//! (in `wsconn-runtime`) is written against, so it never imports
//! `tokio-tungstenite` itself.

use async_trait::async_trait;
use http::HeaderMap;
use thiserror::Error;
use tokio::sync::mpsc;
use wsconn_core::{Frame, Handle, StreamRef};

/// Errors a transport driver can report. Adapted one level below
/// `wsconn-runtime::EngineError`, which wraps these.
#[derive(Debug, Clone, Error)]
pub enum TransportError {
    /// The TCP/TLS dial failed.
    #[error("connect failed: {0}")]
    ConnectFailed(String),
    /// TLS handshake failed.
    #[error("TLS handshake failed: {0}")]
    TlsFailed(String),
    /// The HTTP → WebSocket upgrade failed.
    #[error("upgrade failed: {0}")]
    UpgradeFailed(String),
    /// `send` failed on an existing stream.
    #[error("send failed: {0}")]
    SendFailed(String),
    /// The driver's read loop ended with an error.
    #[error("read failed: {0}")]
    ReadFailed(String),
    /// The caller referenced a `Handle` the driver has no record of.
    #[error("unknown transport handle")]
    UnknownHandle,
    /// The caller referenced a `StreamRef` the driver has no record of.
    #[error("stream not found")]
    StreamNotFound,
    /// An operation was attempted on a handle with no live connection.
    #[error("not connected")]
    NotConnected,
}

/// Result alias for [`TransportError`].
pub type TransportResult<T> = Result<T, TransportError>;

/// TCP or TLS, and any driver-specific dial options.
#[derive(Debug, Clone, Default)]
pub struct TransportOpts {
    /// Whether to dial over TLS. `false` dials plain TCP.
    pub tls: bool,
    /// Connect timeout; `None` waits indefinitely.
    pub connect_timeout: Option<std::time::Duration>,
}

/// Events the driver pushes to whichever owner currently holds a handle's
/// `set_owner` registration.
#[derive(Debug, Clone)]
pub enum TransportEvent {
    /// The TCP/TLS dial completed.
    Up {
        /// The handle that came up.
        handle: Handle,
        /// The negotiated protocol, e.g. `"https"` or `"http"`.
        protocol: String,
    },
    /// The transport for `handle` went down.
    Down {
        /// The handle that went down.
        handle: Handle,
        /// A short reason string.
        reason: String,
        /// Requests that were in flight and are now abandoned.
        pending: usize,
        /// Whether the handle was killed deliberately (vs. dropped by peer).
        killed: bool,
    },
    /// The HTTP → WebSocket upgrade on `stream` completed.
    Upgraded {
        /// The handle the stream belongs to.
        handle: Handle,
        /// The newly upgraded stream.
        stream: StreamRef,
        /// Response headers from the upgrade handshake.
        headers: HeaderMap,
    },
    /// An inbound WebSocket frame arrived on `stream`.
    Frame {
        /// The handle the stream belongs to.
        handle: Handle,
        /// The stream the frame arrived on.
        stream: StreamRef,
        /// The decoded frame.
        frame: Frame,
    },
    /// `stream` failed (e.g. upgrade rejected, read error on that stream).
    StreamError {
        /// The handle the stream belongs to.
        handle: Handle,
        /// The stream that failed.
        stream: StreamRef,
        /// A short reason string.
        reason: String,
    },
    /// The previous owner of `handle` died before transferring ownership.
    OwnerDown {
        /// The handle whose owner died.
        handle: Handle,
    },
}

/// The contract the connection engine drives a WebSocket connection
/// through. The core never touches wire bytes; `Handle` and `StreamRef`
/// are opaque, equality-comparable tokens.
#[async_trait]
pub trait TransportDriver: Send + Sync {
    /// Non-blocking TCP/TLS dial. Returns once the handle is allocated;
    /// the actual dial result arrives later as a [`TransportEvent::Up`] or
    /// [`TransportEvent::Down`] sent to `owner`.
    async fn open(
        &self,
        host: &str,
        port: u16,
        opts: &TransportOpts,
        owner: mpsc::UnboundedSender<TransportEvent>,
    ) -> TransportResult<Handle>;

    /// Initiates the HTTP → WebSocket upgrade for an already-open handle.
    /// Success/failure arrives as [`TransportEvent::Upgraded`] or
    /// [`TransportEvent::StreamError`].
    async fn upgrade(
        &self,
        handle: &Handle,
        path: &str,
        headers: HeaderMap,
    ) -> TransportResult<StreamRef>;

    /// Sends a single frame on `stream`.
    async fn send(&self, handle: &Handle, stream: StreamRef, frame: Frame) -> TransportResult<()>;

    /// Transfers event routing for `handle` to `new_owner`. The caller is
    /// responsible for releasing the old monitor before installing a new
    /// one — the driver only swaps where events are sent.
    async fn set_owner(
        &self,
        handle: &Handle,
        new_owner: mpsc::UnboundedSender<TransportEvent>,
    ) -> TransportResult<()>;

    /// Tears down `handle` and every stream under it.
    async fn close(&self, handle: &Handle);
}
