//! Engine-level error types.
//!
//! Lower layers (`wsconn-core`, `wsconn-transport`) report narrow,
//! kind-specific errors; `EngineError` is the single type the
//! [`crate::engine::ConnectionEngine`] and [`crate::ClientConn`] surface to
//! callers, wrapping whichever layer actually failed.

use thiserror::Error;
use wsconn_core::{CorrelationError, InvalidTransition, ProtocolError, RateLimitError};
use wsconn_transport::TransportError;

/// Authentication failures, distinct from generic protocol/transport errors
/// so an [`crate::AuthHandler`](wsconn_core::AuthHandler) implementation can
/// classify them independently.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum AuthError {
    /// The credentials offered were rejected by the remote end.
    #[error("bad credentials")]
    BadCredentials,
    /// A previously valid access token has expired.
    #[error("token expired")]
    TokenExpired,
    /// Refreshing the access token failed.
    #[error("refresh failed: {0}")]
    RefreshFailed(String),
}

/// The engine gave up reconnecting after exhausting its retry budget.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("reconnect attempts exhausted after {attempts} tries")]
pub struct ReconnectExhausted {
    pub attempts: u32,
}

/// Everything a [`crate::engine::ConnectionEngine`] or `ClientConn` can
/// return to a caller.
#[derive(Debug, Clone, Error)]
pub enum EngineError {
    #[error(transparent)]
    Transport(#[from] TransportError),
    #[error(transparent)]
    Protocol(#[from] ProtocolError),
    #[error(transparent)]
    Correlation(#[from] CorrelationError),
    #[error(transparent)]
    RateLimit(#[from] RateLimitError),
    #[error(transparent)]
    Auth(#[from] AuthError),
    #[error(transparent)]
    ReconnectExhausted(#[from] ReconnectExhausted),
    /// A state-machine transition was rejected. Logged as a warning at the
    /// call site; the connection is not torn down over this.
    #[error(transparent)]
    InvalidTransition(#[from] InvalidTransition),
    /// An operation that needs a live transport handle was issued while
    /// `transport_handle` was `None`.
    #[error("no live transport handle")]
    NoHandle,
    /// The engine's command channel has been closed (the engine task ended).
    #[error("connection engine is gone")]
    EngineGone,
}

/// Result alias for engine-level operations.
pub type EngineResult<T> = Result<T, EngineError>;
