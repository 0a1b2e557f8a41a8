//! Request/response correlation via opaque matcher functions.
//!
//! Outbound requests register a matcher; inbound frames are offered to
//! registered matchers in registration order until one claims the reply.
//! The default matcher decodes the frame as JSON and compares `msg["id"]`
//! to the request id, but adapters with concurrent, id-less protocols (the
//! spec's Deribit example) can supply a custom closure instead.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use serde_json::Value;
use tokio::sync::oneshot;
use tokio::time::timeout;

use crate::error::{CorrelationError, CorrelationResult};

/// What a matcher decides about an inbound value.
#[derive(Debug, Clone)]
pub enum MatchOutcome {
    /// This value is the reply to the request the matcher was registered for.
    Match(Value),
    /// This value is not the reply; keep offering it to later matchers.
    Skip,
    /// This value is malformed in a way the matcher can diagnose.
    Error(String),
}

/// A closure that inspects an inbound value and decides whether it answers
/// a specific outstanding request.
pub type Matcher = Arc<dyn Fn(&Value) -> MatchOutcome + Send + Sync>;

/// Builds the default matcher for `request_id`: decodes the frame as JSON
/// and checks `msg["id"] == request_id`.
pub fn default_matcher(request_id: u64) -> Matcher {
    Arc::new(move |value: &Value| {
        let Some(id) = value.get("id") else {
            return MatchOutcome::Skip;
        };
        let matches = id.as_u64() == Some(request_id) || id.as_str() == Some(&request_id.to_string());
        if matches {
            MatchOutcome::Match(value.clone())
        } else {
            MatchOutcome::Skip
        }
    })
}

struct Pending {
    matcher: Matcher,
    reply_tx: Option<oneshot::Sender<Value>>,
}

/// Assigns request ids and correlates inbound frames to the caller waiting
/// on them.
#[derive(Clone, Default)]
pub struct RequestCorrelator {
    next_id: Arc<AtomicU64>,
    pending: Arc<Mutex<HashMap<u64, Pending>>>,
}

impl RequestCorrelator {
    /// Creates an empty correlator; ids start at 1.
    pub fn new() -> Self {
        Self {
            next_id: Arc::new(AtomicU64::new(1)),
            pending: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Reserves the next monotonically increasing request id.
    pub fn next_request_id(&self) -> u64 {
        self.next_id.fetch_add(1, Ordering::Relaxed)
    }

    /// Synchronously registers a pending request, returning the receiver
    /// half of its reply channel.
    ///
    /// Split out from [`Self::await_reply`] so callers that must send the
    /// outbound frame *after* registering the waiter (to avoid a race
    /// against an immediate reply) can do so without spawning a task just
    /// to get the registration to run first — an `async fn`'s body, unlike
    /// this method, does not execute anything until first polled.
    ///
    /// If `matcher` is `None`, [`default_matcher`] is used.
    pub fn register(&self, request_id: u64, matcher: Option<Matcher>) -> oneshot::Receiver<Value> {
        let (tx, rx) = oneshot::channel();
        let matcher = matcher.unwrap_or_else(|| default_matcher(request_id));
        self.pending.lock().insert(
            request_id,
            Pending {
                matcher,
                reply_tx: Some(tx),
            },
        );
        rx
    }

    /// Awaits `rx` (from [`Self::register`]) for up to `timeout_after`,
    /// cleaning up the pending entry on timeout.
    pub async fn wait(
        &self,
        request_id: u64,
        rx: oneshot::Receiver<Value>,
        timeout_after: Duration,
    ) -> CorrelationResult<Value> {
        match timeout(timeout_after, rx).await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(_canceled)) => Err(CorrelationError::Timeout { request_id }),
            Err(_elapsed) => {
                self.pending.lock().remove(&request_id);
                Err(CorrelationError::Timeout { request_id })
            }
        }
    }

    /// Registers a pending request and returns a future that resolves once
    /// a matcher claims a reply or `timeout_after` elapses.
    ///
    /// If `matcher` is `None`, [`default_matcher`] is used.
    pub async fn await_reply(
        &self,
        request_id: u64,
        matcher: Option<Matcher>,
        timeout_after: Duration,
    ) -> CorrelationResult<Value> {
        let rx = self.register(request_id, matcher);
        self.wait(request_id, rx, timeout_after).await
    }

    /// Offers an inbound value to every pending matcher in registration
    /// order, stopping at the first `Match`. Returns `true` if some
    /// waiter was resolved.
    ///
    /// Registration order here is whatever order the `HashMap` yields,
    /// which is why adapters relying on strict ordering should use a
    /// matcher specific enough to never ambiguously match more than one
    /// request — the default id-matcher always satisfies this.
    pub fn dispatch(&self, value: &Value) -> bool {
        let mut pending = self.pending.lock();
        let mut matched_id = None;
        for (id, entry) in pending.iter() {
            match (entry.matcher)(value) {
                MatchOutcome::Match(_) => {
                    matched_id = Some(*id);
                    break;
                }
                MatchOutcome::Skip => continue,
                MatchOutcome::Error(_reason) => continue,
            }
        }
        let Some(id) = matched_id else {
            return false;
        };
        if let Some(mut entry) = pending.remove(&id)
            && let Some(tx) = entry.reply_tx.take()
        {
            let _ = tx.send(value.clone());
        }
        true
    }

    /// Expires a specific pending request without waiting for its timeout
    /// to elapse — used when the owning connection is closing.
    pub fn cancel(&self, request_id: u64) {
        self.pending.lock().remove(&request_id);
    }

    /// Number of requests currently awaiting a reply.
    pub fn pending_count(&self) -> usize {
        self.pending.lock().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn default_matcher_resolves_on_matching_id() {
        let correlator = RequestCorrelator::new();
        let id = correlator.next_request_id();

        let correlator2 = correlator.clone();
        let waiter = tokio::spawn(async move {
            correlator2
                .await_reply(id, None, Duration::from_millis(500))
                .await
        });

        tokio::task::yield_now().await;
        assert!(correlator.dispatch(&json!({ "id": id, "result": "ok" })));

        let result = waiter.await.unwrap().unwrap();
        assert_eq!(result["result"], "ok");
    }

    #[tokio::test]
    async fn mismatched_id_is_skipped_not_matched() {
        let correlator = RequestCorrelator::new();
        let id = correlator.next_request_id();
        let other_id = correlator.next_request_id();

        let dispatched = correlator.dispatch(&json!({ "id": other_id }));
        assert!(!dispatched);
        assert_eq!(correlator.pending_count(), 0, "no waiter registered yet");

        let correlator2 = correlator.clone();
        let waiter = tokio::spawn(async move {
            correlator2
                .await_reply(id, None, Duration::from_millis(50))
                .await
        });
        tokio::task::yield_now().await;
        assert!(!correlator.dispatch(&json!({ "id": other_id })));
        let result = waiter.await.unwrap();
        assert_eq!(result, Err(CorrelationError::Timeout { request_id: id }));
    }

    #[tokio::test]
    async fn custom_matcher_routes_replies_under_concurrent_requests() {
        let correlator = RequestCorrelator::new();
        let id_a = correlator.next_request_id();
        let id_b = correlator.next_request_id();

        let matcher_for = |expected_channel: &'static str| -> Matcher {
            Arc::new(move |value: &Value| {
                if value.get("channel").and_then(Value::as_str) == Some(expected_channel) {
                    MatchOutcome::Match(value.clone())
                } else {
                    MatchOutcome::Skip
                }
            })
        };

        let c1 = correlator.clone();
        let waiter_a = tokio::spawn(async move {
            c1.await_reply(id_a, Some(matcher_for("ticker")), Duration::from_millis(500))
                .await
        });
        let c2 = correlator.clone();
        let waiter_b = tokio::spawn(async move {
            c2.await_reply(id_b, Some(matcher_for("trades")), Duration::from_millis(500))
                .await
        });
        tokio::task::yield_now().await;

        assert!(correlator.dispatch(&json!({ "channel": "trades", "data": 1 })));
        assert!(correlator.dispatch(&json!({ "channel": "ticker", "data": 2 })));

        assert_eq!(waiter_a.await.unwrap().unwrap()["data"], 2);
        assert_eq!(waiter_b.await.unwrap().unwrap()["data"], 1);
    }

    #[tokio::test]
    async fn timeout_expires_pending_entry() {
        let correlator = RequestCorrelator::new();
        let id = correlator.next_request_id();
        let result = correlator
            .await_reply(id, None, Duration::from_millis(20))
            .await;
        assert_eq!(result, Err(CorrelationError::Timeout { request_id: id }));
        assert_eq!(correlator.pending_count(), 0);
    }
}
