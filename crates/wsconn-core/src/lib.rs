//! # wsconn-core
//!
//! Transport-independent core of the connection engine: frame validation,
//! the transport-level [`state::ConnectionState`] record, the
//! [`state_machine::StateMachine`] guarding its transitions, the handler
//! contracts adapters implement, the outbound [`rate_limiter::RateLimiter`],
//! and [`correlator::RequestCorrelator`] for matching async replies back to
//! their originating request.
//!
//! This crate knows nothing about sockets, TLS, or `tokio-tungstenite` —
//! that's `wsconn-transport`. It knows nothing about session state (auth,
//! subscriptions) surviving a reconnect — that's `wsconn-runtime`. What it
//! owns is the vocabulary both of those crates build on.

pub mod config;
pub mod correlator;
pub mod error;
pub mod frame;
pub mod handlers;
pub mod rate_limiter;
pub mod state;
pub mod state_machine;

pub use config::ConfigOptions;
pub use correlator::{MatchOutcome, Matcher, RequestCorrelator, default_matcher};
pub use error::{
    CorrelationError, CorrelationResult, InvalidTransition, ProtocolError, ProtocolResult,
    RateLimitError, RateLimitResult,
};
pub use frame::{Frame, FrameCodec};
pub use handlers::{
    AuthHandler, AuthOutcome, ConnectionHandler, DisconnectOutcome, EngineEvent, ErrorHandler,
    HandlerBindings, HandlerOutcome, MessageHandler, RateLimitDecision, RateLimitHandler,
    ReconnectDecision, ReplayResult, RequestCost, SubscriptionHandler,
};
pub use rate_limiter::{RateLimiter, RateLimiterConfig};
pub use state::{
    ConnectionState, ErrorValue, Handle, MonitorToken, Status, StreamKind, StreamRef,
    SubscriberHandle, TransportKind,
};
pub use state_machine::{StateMachine, TransitionContext};
