//! # wsconn-runtime
//!
//! The [`engine::ConnectionEngine`] actor that owns one
//! [`wsconn_core::ConnectionState`] exclusively, the session-level
//! [`client_conn::ClientConn`] callers actually hold, the
//! [`reconnect::ReconnectionPolicy`] that bridges `StateMachine` failures to
//! a handler-supplied retry decision, and [`state_sync`]'s pure functions
//! for keeping `ClientConn` and `ConnectionState` consistent across a
//! reconnect without ever letting session data leak into the transport
//! side.
//!
//! `wsconn-runtime` knows how to *drive* a connection; it knows nothing
//! about the public `connect`/`send_text`/`subscribe` surface a caller
//! sees — that façade, along with default handler implementations, lives
//! one layer up in the `wsconn` crate.

pub mod client_conn;
pub mod engine;
pub mod error;
pub mod logging;
pub mod reconnect;
pub mod state_sync;

pub use client_conn::{AuthStatus, ClientConn, PendingRequest, SubscriptionRecord};
pub use engine::{ConnectionEngine, ConnectionStateSnapshot, EngineCommand, EngineHandle, HandleSnapshot};
pub use error::{AuthError, EngineError, EngineResult, ReconnectExhausted};
pub use logging::{LoggingBuilder, SpanEvents};
pub use reconnect::{PolicyOutcome, ReconnectionPolicy};
pub use state_sync::{ClientEvent, TransportConfig, subscribe_client_events, update_client_from_transport};

// Re-exported so downstream crates don't need a direct `tracing` dependency
// just to call `tracing::info!` inside a handler implementation.
pub use tracing;
