//! Handler contracts — the extension points adapters implement.
//!
//! Each trait is a capability set an adapter overrides selectively; the
//! rest fall back to defaults (`wsconn::defaults`). Handlers are stored as
//! `Arc<dyn Trait>` rather than boxed value types: the engine is the only
//! task that ever calls them (single-owner actor model, see the crate-level
//! concurrency notes), so interior mutability inside a handler — a
//! `parking_lot::Mutex<State>` field, typically — stands in for the
//! "handler returns updated state" shape the distilled spec describes.
//! This keeps the trait object boundary free of generics while still
//! letting a handler carry whatever bookkeeping it needs.

use std::sync::Arc;

use async_trait::async_trait;

use crate::config::ConfigOptions;
use crate::frame::Frame;
use crate::state::{ErrorValue, StreamRef};

/// Outcome of [`ConnectionHandler::handle_connect`] /
/// [`ConnectionHandler::handle_frame`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HandlerOutcome {
    /// Nothing further to do.
    Ok,
    /// Send `Frame` back out on the same stream.
    Reply(Frame),
}

/// Outcome of [`ConnectionHandler::handle_disconnect`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DisconnectOutcome {
    /// No reconnection desired by the handler.
    Ok,
    /// Ask the engine to consult [`ErrorHandler`] / `ReconnectionPolicy`.
    Reconnect,
}

/// Connection lifecycle hooks. The adapter's post-connect hook (re-auth,
/// resubscribe) lives in `handle_connect`, invoked identically on first
/// connect and on every reconnect — see §4.17's reconnection-path collapse.
#[async_trait]
pub trait ConnectionHandler: Send + Sync {
    /// Called once the transport has upgraded to a WebSocket stream,
    /// whether this is the first connect or a post-reconnect re-connect.
    /// `options` is the connection's resolved configuration, so the hook
    /// can read adapter-specific keys (e.g. `credentials`) without the
    /// engine needing to know what they mean.
    async fn handle_connect(&self, stream: StreamRef, options: &ConfigOptions) -> HandlerOutcome {
        let _ = (stream, options);
        HandlerOutcome::Ok
    }

    /// Called when the transport reports the connection down.
    async fn handle_disconnect(&self, reason: &ErrorValue) -> DisconnectOutcome {
        let _ = reason;
        DisconnectOutcome::Reconnect
    }

    /// Called for every inbound data frame (text/binary), after framing
    /// and control-frame handling have already been dispatched by the
    /// engine.
    async fn handle_frame(&self, stream: StreamRef, frame: &Frame) -> HandlerOutcome {
        let _ = (stream, frame);
        HandlerOutcome::Ok
    }

    /// Called when a scheduled heartbeat deadline elapses with no activity.
    async fn handle_timeout(&self) {}

    /// Produces the ping frame to send for a heartbeat on `stream`.
    fn ping(&self, stream: StreamRef) -> Frame {
        let _ = stream;
        Frame::Ping
    }
}

/// Application-message hooks, independent of connection lifecycle.
#[async_trait]
pub trait MessageHandler: Send + Sync {
    /// Validates an outbound message before it is handed to the rate
    /// limiter. Returning `Err` aborts the send with that message.
    fn validate(&self, message: &serde_json::Value) -> Result<(), String> {
        let _ = message;
        Ok(())
    }

    /// Encodes an application message into a frame.
    fn encode(&self, message: &serde_json::Value) -> Frame {
        Frame::Text(message.to_string())
    }

    /// Called for every inbound message after `ConnectionHandler::handle_frame`.
    async fn handle_message(&self, message: &serde_json::Value) -> HandlerOutcome {
        let _ = message;
        HandlerOutcome::Ok
    }
}

/// Decision returned by [`ErrorHandler::handle_error`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconnectDecision {
    /// Whether the engine should attempt to reconnect at all.
    pub reconnect: bool,
    /// How long to wait before the attempt, if `reconnect` is true.
    pub delay_ms: u64,
}

/// Delegate for reconnection policy — see
/// [`crate::state_machine::StateMachine`] and the spec's §4.5.
///
/// Unlike the other handler traits, this one is entirely synchronous: the
/// decision is pure backoff math over a handler's own in-memory state,
/// matching [`RateLimitHandler::check`]'s sync shape. Keeping it sync lets
/// the connection engine's failure path consult it without an `.await`.
pub trait ErrorHandler: Send + Sync {
    /// Classifies an error and decides whether/when to reconnect.
    ///
    /// `attempt_index` is the reconnect attempt about to be made (0 for the
    /// first attempt after the initial failure).
    fn handle_error(&self, error: &ErrorValue, attempt_index: u32) -> ReconnectDecision;

    /// Logs `error` through the handler's own channel (defaults to
    /// `tracing::warn!`). Separated from `handle_error` so adapters can
    /// override logging without touching reconnect policy, and vice versa.
    fn log_error(&self, error: &ErrorValue) {
        tracing::warn!(reason = %error.reason, detail = %error.detail, "connection error");
    }

    /// Classifies whether `error` is terminal (never reconnect) without
    /// computing a delay — used by the default handler, and available to
    /// adapters that want the classification without the backoff math.
    fn is_terminal(&self, error: &ErrorValue) -> bool {
        matches!(
            error.reason.as_str(),
            "fatal" | "econnrefused_after_upgrade" | "auth_permanent_failure" | "handshake_failed_bad_cert"
        )
    }
}

/// Outcome of [`AuthHandler::authenticate`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthOutcome {
    /// Authentication request sent; await `handle_auth_response`.
    Pending(Frame),
    /// No authentication is configured or required.
    NotRequired,
    /// Authentication cannot proceed (e.g. missing credentials).
    Failed(String),
}

/// Authentication lifecycle hooks.
#[async_trait]
pub trait AuthHandler: Send + Sync {
    /// Builds the authentication frame for `credentials`, if any.
    async fn authenticate(&self, credentials: Option<&serde_json::Value>) -> AuthOutcome {
        let _ = credentials;
        AuthOutcome::NotRequired
    }

    /// Interprets an inbound frame believed to be an auth response.
    /// Returns `true` if authentication succeeded.
    async fn handle_auth_response(&self, response: &serde_json::Value) -> bool {
        let _ = response;
        true
    }

    /// Whether the current token is stale enough to refresh proactively.
    fn needs_reauthentication(&self) -> bool {
        false
    }
}

/// A single subscription the handler wants replayed after reconnect: the
/// channel name, the frame to actually send, and whether the handler
/// considers the replay attempt itself well-formed (not whether the server
/// has confirmed it yet — that arrives later as an ordinary inbound frame).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReplayResult {
    /// The channel that was resubscribed.
    pub channel: String,
    /// The subscribe frame to send on the newly upgraded stream.
    pub frame: Frame,
    /// Whether the handler could build a replay frame for this channel.
    pub ok: bool,
}

/// Subscription bookkeeping, replayed verbatim after every reconnect.
#[async_trait]
pub trait SubscriptionHandler: Send + Sync {
    /// Records `channel` as subscribed and returns the frame to send.
    fn subscribe(&self, channel: &str, params: Option<&serde_json::Value>) -> Frame {
        let _ = params;
        Frame::Text(format!(r#"{{"op":"subscribe","channel":"{channel}"}}"#))
    }

    /// Removes `channel` from the tracked subscription set.
    fn unsubscribe(&self, channel: &str) -> Frame {
        Frame::Text(format!(r#"{{"op":"unsubscribe","channel":"{channel}"}}"#))
    }

    /// Currently tracked channel names.
    fn active_subscriptions(&self) -> Vec<String>;

    /// Called by the engine immediately before a reconnect dial — gives the
    /// handler a chance to snapshot state that `resubscribe_after_reconnect`
    /// will replay.
    fn prepare_for_reconnect(&self) {}

    /// Called by the engine once the post-reconnect upgrade completes.
    /// Re-sends a subscribe frame for every channel that was active before
    /// the disconnect.
    async fn resubscribe_after_reconnect(&self) -> Vec<ReplayResult>;
}

/// Decision returned by [`RateLimitHandler::check`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RateLimitDecision {
    /// Send immediately.
    Allow,
    /// Enqueue; will be sent once the limiter's token bucket refills.
    Queue,
    /// Reject synchronously with the given reason.
    Reject(String),
}

/// The cost category of an outbound frame, used to look up a per-category
/// token cost from `cost_map`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RequestCost {
    /// A channel subscription request.
    Subscription,
    /// An authentication request.
    Auth,
    /// A read-only query.
    Query,
    /// An order-placement request.
    Order,
    /// An order-cancellation request.
    Cancel,
    /// Anything not covered by a more specific category.
    Default,
}

impl RequestCost {
    /// Maps a `cost_map` key (spec.md §6's `rate_limit_opts.cost_map`) to its
    /// variant. Unrecognized keys are ignored by the caller rather than
    /// rejected outright, matching `ConfigOptions`'s general tolerance of
    /// unknown keys.
    pub fn from_cost_map_key(key: &str) -> Option<Self> {
        match key {
            "subscription" => Some(Self::Subscription),
            "auth" => Some(Self::Auth),
            "query" => Some(Self::Query),
            "order" => Some(Self::Order),
            "cancel" => Some(Self::Cancel),
            "default" => Some(Self::Default),
            _ => None,
        }
    }
}

/// Rate-limiting policy, consulted by [`crate::rate_limiter::RateLimiter`]
/// for every outbound frame.
pub trait RateLimitHandler: Send + Sync {
    /// Decides whether `cost` may be sent now, queued, or rejected, given
    /// `tokens_available`.
    fn check(&self, cost: RequestCost, tokens_available: f64) -> RateLimitDecision;
}

/// Events the engine emits to `callback_subscribers` — see spec.md §6.
#[derive(Debug, Clone)]
pub enum EngineEvent {
    /// The transport dial succeeded.
    ConnectionUp,
    /// The transport reported the connection down.
    ConnectionDown(ErrorValue),
    /// The HTTP upgrade to WebSocket completed.
    WebSocketUpgrade(StreamRef),
    /// An inbound frame arrived.
    Frame(StreamRef, Frame),
    /// A stream-level error occurred.
    StreamError(StreamRef, String),
    /// A reconnection cycle completed and the session was restored.
    Reconnected,
}

/// The full set of handler trait objects a connection is configured with.
///
/// Cloning a `HandlerBindings` clones the `Arc`s, not the handlers — every
/// clone shares the same underlying handler instances, which is required
/// for handler-local state (e.g. subscription bookkeeping) to survive a
/// `ConnectionState` replacement across reconnects.
#[derive(Clone)]
pub struct HandlerBindings {
    /// Connection lifecycle hooks.
    pub connection: Arc<dyn ConnectionHandler>,
    /// Application message hooks.
    pub message: Arc<dyn MessageHandler>,
    /// Reconnection policy delegate.
    pub error: Arc<dyn ErrorHandler>,
    /// Authentication hooks.
    pub auth: Arc<dyn AuthHandler>,
    /// Subscription bookkeeping.
    pub subscription: Arc<dyn SubscriptionHandler>,
    /// Outbound rate-limiting policy.
    pub rate_limit: Arc<dyn RateLimitHandler>,
}

/// Trivial no-op implementations used to satisfy the handler traits' few
/// required (non-defaulted) methods. `wsconn::defaults` builds the
/// production-quality defaults (real backoff, real subscription tracking)
/// on top of these traits; this module exists so `HandlerBindings` can
/// implement `Default` without `wsconn-core` depending on the facade crate.
mod noop {
    use super::*;

    pub struct NoopConnection;
    impl ConnectionHandler for NoopConnection {}

    pub struct NoopMessage;
    impl MessageHandler for NoopMessage {}

    pub struct NoopError;
    impl ErrorHandler for NoopError {
        fn handle_error(&self, _error: &ErrorValue, _attempt_index: u32) -> ReconnectDecision {
            ReconnectDecision {
                reconnect: false,
                delay_ms: 0,
            }
        }
    }

    pub struct NoopAuth;
    impl AuthHandler for NoopAuth {}

    pub struct NoopSubscription;
    #[async_trait]
    impl SubscriptionHandler for NoopSubscription {
        fn active_subscriptions(&self) -> Vec<String> {
            Vec::new()
        }

        async fn resubscribe_after_reconnect(&self) -> Vec<ReplayResult> {
            Vec::new()
        }
    }

    pub struct NoopRateLimit;
    impl RateLimitHandler for NoopRateLimit {
        fn check(&self, _cost: RequestCost, _tokens_available: f64) -> RateLimitDecision {
            RateLimitDecision::Allow
        }
    }
}

impl Default for HandlerBindings {
    fn default() -> Self {
        Self {
            connection: Arc::new(noop::NoopConnection),
            message: Arc::new(noop::NoopMessage),
            error: Arc::new(noop::NoopError),
            auth: Arc::new(noop::NoopAuth),
            subscription: Arc::new(noop::NoopSubscription),
            rate_limit: Arc::new(noop::NoopRateLimit),
        }
    }
}
