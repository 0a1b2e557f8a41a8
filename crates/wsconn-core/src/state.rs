//! Transport-level connection state.
//!
//! `ConnectionState` is owned exclusively by a `ConnectionEngine` (in
//! `wsconn-runtime`) and carries *only* transport concerns — host, port,
//! the live handle, stream bookkeeping. It must never carry session data
//! (auth tokens, credentials, subscriptions): that lives in `ClientConn`.
//! Every mutation goes through a narrow setter below; there is no public
//! way to construct a `ConnectionState` with those fields populated,
//! because the type simply does not have them.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use crate::config::ConfigOptions;
use crate::handlers::HandlerBindings;

/// Opaque identity of a live transport connection.
///
/// Two handles are equal iff they identify the same underlying dial.
/// The engine uses this to filter stale events from a prior connection
/// (§4.8's "Ignoring stale Gun message" rule).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Handle(pub u64);

/// Opaque identity of an upgraded WebSocket stream within a [`Handle`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct StreamRef(pub u64);

/// A watch token observing a [`Handle`]'s liveness. Dropping it releases
/// the monitor; the engine must drop the old one before installing a new
/// one on reconnect or ownership transfer.
#[derive(Debug, Clone)]
pub struct MonitorToken(pub Arc<tokio::sync::Notify>);

impl MonitorToken {
    /// Creates a fresh, unfired monitor token.
    pub fn new() -> Self {
        Self(Arc::new(tokio::sync::Notify::new()))
    }

    /// Fires the monitor, as if the watched handle had died.
    pub fn fire(&self) {
        self.0.notify_waiters();
    }
}

impl Default for MonitorToken {
    fn default() -> Self {
        Self::new()
    }
}

/// An opaque handle to whoever should receive `Reconnected` / lifecycle
/// callbacks (a task's event sender, in this port).
pub type SubscriberHandle = tokio::sync::mpsc::UnboundedSender<crate::handlers::EngineEvent>;

/// Which transport the engine should dial.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportKind {
    /// Plain TCP.
    Tcp,
    /// TLS over TCP.
    Tls,
}

/// Whether a stream is mid-upgrade or fully promoted to WebSocket framing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamKind {
    /// HTTP upgrade request sent, response not yet received.
    Upgrading,
    /// Upgrade completed; frames flow as WebSocket frames.
    WebSocket,
}

/// Connection lifecycle status. See the transition table in
/// [`crate::state_machine::StateMachine`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Status {
    /// Freshly constructed, no dial attempted yet.
    Initialized,
    /// TCP/TLS dial in flight.
    Connecting,
    /// TCP/TLS dial succeeded; HTTP upgrade not yet attempted or pending.
    Connected,
    /// HTTP upgrade completed; frames may flow.
    WebsocketConnected,
    /// Transport is down; reconnection has not yet been scheduled.
    Disconnected,
    /// A reconnection attempt is scheduled or in flight.
    Reconnecting,
    /// Terminal: no further reconnection will be attempted.
    Error,
}

/// A lightweight, clonable description of the last transport failure.
/// Held by `ConnectionState` for the `ReconnectionPolicy` to classify, and
/// surfaced to callers as `last_error`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ErrorValue {
    /// A short machine-usable reason tag, e.g. `"econnrefused"`.
    pub reason: String,
    /// A human-readable detail message.
    pub detail: String,
}

impl ErrorValue {
    /// Builds an error value from a reason tag and a detail message.
    pub fn new(reason: impl Into<String>, detail: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
            detail: detail.into(),
        }
    }
}

impl fmt::Display for ErrorValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.reason, self.detail)
    }
}

/// Transport-only record of a connection's dialed configuration and live
/// wire resources. See the module doc for the no-session-data invariant.
#[derive(Clone)]
pub struct ConnectionState {
    /// Remote host.
    pub host: String,
    /// Remote port.
    pub port: u16,
    /// HTTP upgrade path, e.g. `/ws/api/v2`.
    pub path: String,
    /// TCP or TLS.
    pub transport_kind: TransportKind,
    /// Resolved, merged configuration (see [`ConfigOptions::merge`]).
    pub options: ConfigOptions,
    /// Current lifecycle status.
    pub status: Status,
    /// The live transport handle, if a dial has succeeded and not yet died.
    pub transport_handle: Option<Handle>,
    /// Liveness monitor for `transport_handle`.
    pub transport_monitor: Option<MonitorToken>,
    /// Streams opened under the current handle (upgrading or websocket).
    pub active_streams: HashMap<StreamRef, StreamKind>,
    /// The most recent transport-level failure, if any.
    pub last_error: Option<ErrorValue>,
    /// Consecutive reconnect attempts since the last successful connect.
    pub reconnect_attempts: u32,
    /// The handler trait objects this connection was configured with.
    pub handlers: HandlerBindings,
    /// Who to notify of `Reconnected` / lifecycle events.
    pub callback_subscriber: Option<SubscriberHandle>,
}

impl fmt::Debug for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionState")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("path", &self.path)
            .field("status", &self.status)
            .field("transport_handle", &self.transport_handle)
            .field("active_streams", &self.active_streams)
            .field("reconnect_attempts", &self.reconnect_attempts)
            .finish_non_exhaustive()
    }
}

impl ConnectionState {
    /// Constructs a fresh, unconnected state.
    pub fn new(
        host: impl Into<String>,
        port: u16,
        path: impl Into<String>,
        transport_kind: TransportKind,
        options: ConfigOptions,
        handlers: HandlerBindings,
    ) -> Self {
        Self {
            host: host.into(),
            port,
            path: path.into(),
            transport_kind,
            options,
            status: Status::Initialized,
            transport_handle: None,
            transport_monitor: None,
            active_streams: HashMap::new(),
            last_error: None,
            reconnect_attempts: 0,
            handlers,
            callback_subscriber: None,
        }
    }

    /// Returns a new state with `status` replaced.
    ///
    /// This does not validate the transition — that's
    /// [`crate::state_machine::StateMachine::transition_to`]'s job. This
    /// setter is the single place the field is ever written.
    pub fn update_status(mut self, status: Status) -> Self {
        self.status = status;
        self
    }

    /// Returns a new state with `transport_handle` replaced.
    pub fn update_handle(mut self, handle: Option<Handle>) -> Self {
        self.transport_handle = handle;
        self
    }

    /// Returns a new state with `transport_monitor` replaced.
    pub fn update_monitor(mut self, monitor: Option<MonitorToken>) -> Self {
        self.transport_monitor = monitor;
        self
    }

    /// Returns a new state recording `error` and bumping `reconnect_attempts`
    /// is left to the caller — recording an error does not by itself imply
    /// a reconnect attempt occurred.
    pub fn record_error(mut self, error: ErrorValue) -> Self {
        self.last_error = Some(error);
        self
    }

    /// Returns a new state with a single stream's kind set or updated.
    pub fn update_stream(mut self, stream: StreamRef, kind: StreamKind) -> Self {
        self.active_streams.insert(stream, kind);
        self
    }

    /// Returns a new state with a single stream removed.
    pub fn remove_stream(mut self, stream: StreamRef) -> Self {
        self.active_streams.remove(&stream);
        self
    }

    /// Returns a new state with several streams removed at once.
    pub fn remove_streams(mut self, streams: &[StreamRef]) -> Self {
        for stream in streams {
            self.active_streams.remove(stream);
        }
        self
    }

    /// Returns a new state with every stream removed — used when a handle
    /// dies and every stream under it is implicitly gone.
    pub fn clear_all_streams(mut self) -> Self {
        self.active_streams.clear();
        self
    }

    /// Increments the reconnect-attempt counter, returning the new state.
    pub fn increment_reconnect_attempts(mut self) -> Self {
        self.reconnect_attempts += 1;
        self
    }

    /// Resets the reconnect-attempt counter to zero.
    pub fn reset_reconnect_attempts(mut self) -> Self {
        self.reconnect_attempts = 0;
        self
    }
}
