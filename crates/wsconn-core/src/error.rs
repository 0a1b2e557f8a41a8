//! Error taxonomy for the connection-engine core.
//!
//! Each concern gets its own `thiserror` enum rather than one flat error
//! type, so callers can match on exactly the failure class they expect.
//! `wsconn-transport` and `wsconn-runtime` define their own error types on
//! top of these and wrap them where a lower layer's failure propagates up.

use thiserror::Error;

/// Errors raised while validating or interpreting a WebSocket frame.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ProtocolError {
    /// The frame failed structural validation (e.g. a text frame whose
    /// payload is not valid UTF-8 once decoded).
    #[error("invalid frame: {0}")]
    InvalidFrame(String),

    /// A ping/pong control frame payload exceeded 125 bytes.
    #[error("control frame payload exceeds 125 bytes ({len} bytes)")]
    ControlFrameTooLarge {
        /// The offending payload length.
        len: usize,
    },

    /// A close code outside `1000..=4999` was supplied.
    #[error("invalid close code: {0}")]
    InvalidCloseCode(u16),

    /// A close code in the reserved set `{1004, 1005, 1006}` was supplied.
    #[error("reserved close code: {0}")]
    ReservedCloseCode(u16),
}

/// Result alias for [`ProtocolError`].
pub type ProtocolResult<T> = Result<T, ProtocolError>;

/// Raised when a [`crate::state_machine::StateMachine`] transition is not
/// permitted by the transition table.
///
/// This is an engine-internal invariant violation: it never propagates to a
/// `ClientAPI` caller. The engine logs it at `warn` and discards the
/// operation, per the propagation policy.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("invalid transition: {from:?} -> {to:?}")]
pub struct InvalidTransition {
    /// The status the machine was in.
    pub from: crate::state::Status,
    /// The status that was rejected.
    pub to: crate::state::Status,
}

/// Errors surfaced by [`crate::correlator::RequestCorrelator`].
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CorrelationError {
    /// No matcher claimed the reply before the request's timeout elapsed.
    #[error("request {request_id} timed out waiting for a reply")]
    Timeout {
        /// The request id that timed out.
        request_id: u64,
    },

    /// A request was registered with no matcher and no default id-match
    /// could be derived from the outbound payload.
    #[error("no matcher available to correlate the reply")]
    NoMatcher,
}

/// Result alias for [`CorrelationError`].
pub type CorrelationResult<T> = Result<T, CorrelationError>;

/// Errors surfaced by [`crate::rate_limiter::RateLimiter`].
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum RateLimitError {
    /// The configured [`crate::handlers::RateLimitHandler`] rejected the
    /// request outright.
    #[error("rate limited: {0}")]
    Rejected(String),

    /// The request was eligible to queue but the queue was already at
    /// `queue_limit`.
    #[error("rate limiter queue is full")]
    QueueFull,
}

/// Result alias for [`RateLimitError`].
pub type RateLimitResult<T> = Result<T, RateLimitError>;
