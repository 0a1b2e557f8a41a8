//! Default handler implementations and the builder that composes them with
//! user overrides.
//!
//! Every trait in `wsconn_core::handlers` has a sensible fallback here.
//! `HandlerBindingsBuilder` fills in whichever slot the caller left empty
//! with the corresponding `Default*` type below.

use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use rand::Rng;
use serde_json::Value;
use wsconn_core::{
    AuthHandler, AuthOutcome, ConnectionHandler, ErrorHandler, ErrorValue, Frame, HandlerBindings,
    MessageHandler, RateLimitDecision, RateLimitHandler, ReconnectDecision, ReplayResult, RequestCost,
    SubscriptionHandler,
};

/// Connection lifecycle hook that does nothing beyond the trait's own
/// defaults. Adapters that need post-connect re-auth or resubscription
/// override `ConnectionHandler::handle_connect` directly rather than this
/// type.
#[derive(Debug, Default)]
pub struct DefaultConnectionHandler;

impl ConnectionHandler for DefaultConnectionHandler {}

/// Treats every inbound message as opaque JSON and does nothing with it —
/// callers that want application behavior subscribe to `EngineEvent::Frame`
/// instead of overriding this handler.
#[derive(Debug, Default)]
pub struct DefaultMessageHandler;

impl MessageHandler for DefaultMessageHandler {}

/// Exponential backoff with a configurable ceiling and ±10% jitter, and the
/// terminal-reason classification from [`ErrorHandler::is_terminal`]'s
/// default (inherited, not overridden here).
pub struct DefaultErrorHandler {
    base_backoff_ms: u64,
    max_backoff_ms: u64,
}

impl DefaultErrorHandler {
    pub fn new(base_backoff_ms: u64, max_backoff_ms: u64) -> Self {
        Self {
            base_backoff_ms,
            max_backoff_ms,
        }
    }
}

impl Default for DefaultErrorHandler {
    fn default() -> Self {
        Self::new(500, 30_000)
    }
}

impl ErrorHandler for DefaultErrorHandler {
    fn handle_error(&self, error: &ErrorValue, attempt_index: u32) -> ReconnectDecision {
        if self.is_terminal(error) {
            return ReconnectDecision {
                reconnect: false,
                delay_ms: 0,
            };
        }
        let exp = self.base_backoff_ms.saturating_mul(1u64 << attempt_index.min(16));
        let capped = exp.min(self.max_backoff_ms);
        let jitter_frac = rand::rng().random_range(-0.1..=0.1);
        let jittered = (capped as f64) * (1.0 + jitter_frac);
        ReconnectDecision {
            reconnect: true,
            delay_ms: jittered.max(0.0) as u64,
        }
    }
}

/// No credentials configured; authentication is a no-op that always
/// succeeds. Adapters with a real auth handshake provide their own
/// `AuthHandler`.
#[derive(Debug, Default)]
pub struct DefaultAuthHandler;

impl AuthHandler for DefaultAuthHandler {}

/// Tracks subscribed channels in memory and replays every one of them after
/// a reconnect, reusing each channel's originally recorded `subscribe`
/// frame.
#[derive(Default)]
pub struct DefaultSubscriptionHandler {
    channels: Mutex<Vec<(String, Option<Value>)>>,
}

impl DefaultSubscriptionHandler {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SubscriptionHandler for DefaultSubscriptionHandler {
    fn subscribe(&self, channel: &str, params: Option<&Value>) -> Frame {
        self.channels.lock().push((channel.to_string(), params.cloned()));
        Frame::Text(
            serde_json::json!({ "op": "subscribe", "channel": channel, "params": params }).to_string(),
        )
    }

    fn unsubscribe(&self, channel: &str) -> Frame {
        self.channels.lock().retain(|(c, _)| c != channel);
        Frame::Text(serde_json::json!({ "op": "unsubscribe", "channel": channel }).to_string())
    }

    fn active_subscriptions(&self) -> Vec<String> {
        self.channels.lock().iter().map(|(c, _)| c.clone()).collect()
    }

    async fn resubscribe_after_reconnect(&self) -> Vec<ReplayResult> {
        let snapshot = self.channels.lock().clone();
        snapshot
            .into_iter()
            .map(|(channel, params)| {
                let frame = Frame::Text(
                    serde_json::json!({ "op": "subscribe", "channel": channel, "params": params }).to_string(),
                );
                ReplayResult {
                    channel,
                    frame,
                    ok: true,
                }
            })
            .collect()
    }
}

/// Never queues or rejects; every outbound frame is allowed immediately.
/// The rate limiter's token accounting still runs underneath — this handler
/// only controls what happens once tokens run out.
#[derive(Debug, Default)]
pub struct DefaultRateLimitHandler;

impl RateLimitHandler for DefaultRateLimitHandler {
    fn check(&self, _cost: RequestCost, _tokens_available: f64) -> RateLimitDecision {
        RateLimitDecision::Allow
    }
}

/// Builds a full [`HandlerBindings`] from whichever slots the caller
/// supplies, filling the rest with the `Default*` handlers above.
#[derive(Default)]
pub struct HandlerBindingsBuilder {
    connection: Option<Arc<dyn ConnectionHandler>>,
    message: Option<Arc<dyn MessageHandler>>,
    error: Option<Arc<dyn ErrorHandler>>,
    auth: Option<Arc<dyn AuthHandler>>,
    subscription: Option<Arc<dyn SubscriptionHandler>>,
    rate_limit: Option<Arc<dyn RateLimitHandler>>,
}

impl HandlerBindingsBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn connection(mut self, handler: Arc<dyn ConnectionHandler>) -> Self {
        self.connection = Some(handler);
        self
    }

    pub fn message(mut self, handler: Arc<dyn MessageHandler>) -> Self {
        self.message = Some(handler);
        self
    }

    pub fn error(mut self, handler: Arc<dyn ErrorHandler>) -> Self {
        self.error = Some(handler);
        self
    }

    pub fn auth(mut self, handler: Arc<dyn AuthHandler>) -> Self {
        self.auth = Some(handler);
        self
    }

    pub fn subscription(mut self, handler: Arc<dyn SubscriptionHandler>) -> Self {
        self.subscription = Some(handler);
        self
    }

    pub fn rate_limit(mut self, handler: Arc<dyn RateLimitHandler>) -> Self {
        self.rate_limit = Some(handler);
        self
    }

    pub fn build(self) -> HandlerBindings {
        HandlerBindings {
            connection: self.connection.unwrap_or_else(|| Arc::new(DefaultConnectionHandler)),
            message: self.message.unwrap_or_else(|| Arc::new(DefaultMessageHandler)),
            error: self.error.unwrap_or_else(|| Arc::new(DefaultErrorHandler::default())),
            auth: self.auth.unwrap_or_else(|| Arc::new(DefaultAuthHandler)),
            subscription: self
                .subscription
                .unwrap_or_else(|| Arc::new(DefaultSubscriptionHandler::new())),
            rate_limit: self.rate_limit.unwrap_or_else(|| Arc::new(DefaultRateLimitHandler)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_grows_and_saturates_at_ceiling() {
        let handler = DefaultErrorHandler::new(100, 1_000);
        let error = ErrorValue::new("transient", "reset");
        let first = handler.handle_error(&error, 0);
        assert!(first.reconnect);
        assert!((90..=110).contains(&first.delay_ms), "attempt 0: {}", first.delay_ms);

        let later = handler.handle_error(&error, 10);
        assert!(later.delay_ms <= 1_100, "ceiling respected: {}", later.delay_ms);
    }

    #[test]
    fn terminal_reason_never_reconnects() {
        let handler = DefaultErrorHandler::default();
        let error = ErrorValue::new("auth_permanent_failure", "bad key");
        let decision = handler.handle_error(&error, 0);
        assert!(!decision.reconnect);
        assert_eq!(decision.delay_ms, 0);
    }

    #[tokio::test]
    async fn subscription_handler_replays_recorded_channels() {
        let handler = DefaultSubscriptionHandler::new();
        handler.subscribe("ticker.BTC-PERPETUAL.raw", None);
        handler.subscribe("trades.BTC-PERPETUAL.raw", None);
        assert_eq!(handler.active_subscriptions().len(), 2);

        let replayed = handler.resubscribe_after_reconnect().await;
        assert_eq!(replayed.len(), 2);
        assert!(replayed.iter().all(|r| r.ok));
    }

    #[tokio::test]
    async fn subscription_handler_drops_unsubscribed_channel_from_replay() {
        let handler = DefaultSubscriptionHandler::new();
        handler.subscribe("ticker.BTC-PERPETUAL.raw", None);
        handler.unsubscribe("ticker.BTC-PERPETUAL.raw");
        assert!(handler.active_subscriptions().is_empty());
    }

    #[test]
    fn builder_fills_unset_slots_with_defaults() {
        let bindings = HandlerBindingsBuilder::new().build();
        assert_eq!(bindings.subscription.active_subscriptions().len(), 0);
    }
}
