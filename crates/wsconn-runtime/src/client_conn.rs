//! [`ClientConn`] — the session-level record a caller actually holds.
//!
//! Unlike [`wsconn_core::ConnectionState`] (owned exclusively by the engine
//! task), `ClientConn` is `Clone` and passed freely between callers; it
//! never mutates engine state directly, only through [`crate::EngineHandle`]
//! commands. Session fields here (`auth_status`, `access_token`,
//! `credentials`, `subscriptions`, `pending_requests`) are exactly what
//! [`crate::state_sync`] guarantees survives a reconnect.

use std::collections::{HashMap, HashSet};
use std::time::Instant;

use serde_json::Value;
use wsconn_core::{ConfigOptions, ErrorValue, Handle, StreamRef};

use crate::engine::EngineHandle;

/// Where authentication currently stands for a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthStatus {
    Unauthenticated,
    Authenticating,
    Authenticated,
    Failed,
}

/// A channel this connection has subscribed to, and whatever parameters
/// were used so a reconnect can replay the subscription verbatim.
#[derive(Debug, Clone)]
pub struct SubscriptionRecord {
    pub channel: String,
    pub params: Option<Value>,
}

/// Bookkeeping for a request awaiting a reply through the engine's
/// [`wsconn_core::RequestCorrelator`]. The correlator itself holds the
/// oneshot; this is the caller-visible metadata.
#[derive(Debug, Clone)]
pub struct PendingRequest {
    pub request_id: u64,
    pub sent_at: Instant,
}

/// Session-level handle a caller holds across the lifetime of a logical
/// connection. Survives transport replacement; see [`crate::state_sync`]
/// for the exact fields preserved across a reconnect.
#[derive(Clone)]
pub struct ClientConn {
    /// Handle to the engine task driving the actual transport.
    pub transport: EngineHandle,
    /// The engine's current transport handle, mirrored here for display;
    /// authoritative state lives in the engine.
    pub transport_handle: Option<Handle>,
    /// The currently active WebSocket stream, if upgraded.
    pub stream_ref: Option<StreamRef>,
    /// Resolved configuration snapshot (post config-precedence merge).
    pub connection_info: ConfigOptions,
    pub auth_status: AuthStatus,
    pub access_token: Option<String>,
    pub credentials: Option<Value>,
    pub subscriptions: HashMap<String, SubscriptionRecord>,
    /// Adapter-private scratch state, opaque to the engine.
    pub adapter_state: Option<Value>,
    /// Ids of callback subscribers registered with the engine, so they can
    /// be unregistered symmetrically.
    pub callback_ids: HashSet<u64>,
    pub last_error: Option<ErrorValue>,
    pub pending_requests: HashMap<u64, PendingRequest>,
}

impl ClientConn {
    pub fn new(transport: EngineHandle, connection_info: ConfigOptions) -> Self {
        Self {
            transport,
            transport_handle: None,
            stream_ref: None,
            connection_info,
            auth_status: AuthStatus::Unauthenticated,
            access_token: None,
            credentials: None,
            subscriptions: HashMap::new(),
            adapter_state: None,
            callback_ids: HashSet::new(),
            last_error: None,
            pending_requests: HashMap::new(),
        }
    }

    pub fn is_authenticated(&self) -> bool {
        self.auth_status == AuthStatus::Authenticated
    }
}

impl std::fmt::Debug for ClientConn {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientConn")
            .field("transport_handle", &self.transport_handle)
            .field("stream_ref", &self.stream_ref)
            .field("auth_status", &self.auth_status)
            .field("subscriptions", &self.subscriptions.keys().collect::<Vec<_>>())
            .field("pending_requests", &self.pending_requests.len())
            .finish_non_exhaustive()
    }
}
