//! Token-bucket gate for outbound frames, with a queued-callback replay
//! mechanism for requests that can't be sent immediately.
//!
//! The limiter itself holds no opinion about *whether* to allow, queue, or
//! reject — that's entirely [`RateLimitHandler::check`]'s call. The limiter
//! owns only the bucket math, the queue, and the periodic drain.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use serde_json::Value;

use crate::error::{RateLimitError, RateLimitResult};
use crate::handlers::{RateLimitDecision, RateLimitHandler, RequestCost};

/// Tunable parameters for a [`RateLimiter`].
#[derive(Debug, Clone)]
pub struct RateLimiterConfig {
    /// Maximum tokens the bucket can hold.
    pub capacity: f64,
    /// Tokens added per second.
    pub refill_rate: f64,
    /// How often the background drain tick fires.
    pub process_interval: Duration,
    /// Maximum queued (not-yet-sent) requests before `QueueFull`.
    pub queue_limit: usize,
    /// Per-category token cost, from `rate_limit_opts.cost_map`. A category
    /// absent from the map debits [`RateLimiter::DEFAULT_COST`].
    pub cost_map: HashMap<RequestCost, f64>,
}

impl Default for RateLimiterConfig {
    fn default() -> Self {
        Self {
            capacity: 10.0,
            refill_rate: 5.0,
            process_interval: Duration::from_millis(100),
            queue_limit: 100,
            cost_map: HashMap::new(),
        }
    }
}

impl RateLimiterConfig {
    /// Reads `rate_limit_opts.{capacity, refill_rate, refill_interval,
    /// queue_limit, cost_map}` from resolved configuration, falling back to
    /// [`Default::default`] for any key that is absent.
    pub fn from_options(opts: &crate::config::ConfigOptions) -> Self {
        let defaults = Self::default();
        let Some(rl) = opts.rate_limit_opts() else {
            return defaults;
        };
        Self {
            capacity: rl.get_f64("capacity").unwrap_or(defaults.capacity),
            refill_rate: rl.get_f64("refill_rate").unwrap_or(defaults.refill_rate),
            process_interval: rl
                .get_u64("refill_interval")
                .map(Duration::from_millis)
                .unwrap_or(defaults.process_interval),
            queue_limit: rl
                .get_u64("queue_limit")
                .map(|n| n as usize)
                .unwrap_or(defaults.queue_limit),
            cost_map: Self::parse_cost_map(&rl),
        }
    }

    fn parse_cost_map(rl: &crate::config::ConfigOptions) -> HashMap<RequestCost, f64> {
        let mut map = HashMap::new();
        if let Some(Value::Object(entries)) = rl.as_object().get("cost_map") {
            for (key, value) in entries {
                if let (Some(cost), Some(tokens)) = (RequestCost::from_cost_map_key(key), value.as_f64()) {
                    map.insert(cost, tokens);
                }
            }
        }
        map
    }
}

/// A queued request awaiting token availability. `cost` is re-checked
/// against the handler on every drain tick so a handler that changes its
/// mind (e.g. `always_reject` mid-flight) is honored.
struct Queued {
    cost: RequestCost,
    tokens: f64,
    callback: Box<dyn FnOnce() + Send>,
}

struct Bucket {
    tokens: f64,
    last_refill: Instant,
}

/// Token-bucket outbound gate.
///
/// Cloning a `RateLimiter` shares the same bucket and queue (it wraps an
/// `Arc`), which is what lets one limiter be shared across connections via
/// `rate_limit_opts.shared` in the spec's configuration keys.
#[derive(Clone)]
pub struct RateLimiter {
    inner: Arc<Mutex<Inner>>,
}

struct Inner {
    config: RateLimiterConfig,
    bucket: Bucket,
    queue: VecDeque<Queued>,
    handler: Arc<dyn RateLimitHandler>,
}

impl RateLimiter {
    /// Token cost for a category absent from `rate_limit_opts.cost_map`.
    const DEFAULT_COST: f64 = 1.0;

    /// Looks up `cost`'s token price in the configured `cost_map`, falling
    /// back to [`Self::DEFAULT_COST`].
    fn cost_of(inner: &Inner, cost: RequestCost) -> f64 {
        inner.config.cost_map.get(&cost).copied().unwrap_or(Self::DEFAULT_COST)
    }

    /// Creates a new limiter with a full bucket.
    pub fn new(config: RateLimiterConfig, handler: Arc<dyn RateLimitHandler>) -> Self {
        let capacity = config.capacity;
        Self {
            inner: Arc::new(Mutex::new(Inner {
                config,
                bucket: Bucket {
                    tokens: capacity,
                    last_refill: Instant::now(),
                },
                queue: VecDeque::new(),
                handler,
            })),
        }
    }

    fn refill_locked(inner: &mut Inner) {
        let now = Instant::now();
        let elapsed = now.duration_since(inner.bucket.last_refill).as_secs_f64();
        if elapsed <= 0.0 {
            return;
        }
        inner.bucket.tokens =
            (inner.bucket.tokens + elapsed * inner.config.refill_rate).min(inner.config.capacity);
        inner.bucket.last_refill = now;
    }

    /// Gates a single outbound request of category `cost`.
    ///
    /// - `Allow`: tokens are debited now and the caller may send immediately.
    /// - `Queue`: `on_send` is stored and invoked once the drain tick frees
    ///   enough tokens; `check` returns `Ok(())` immediately (the spec's
    ///   "every send returns `ok`" contract for queued sends).
    /// - `Reject`: returns `Err` synchronously; `on_send` is never called.
    pub fn check(
        &self,
        cost: RequestCost,
        on_send: impl FnOnce() + Send + 'static,
    ) -> RateLimitResult<()> {
        let mut inner = self.inner.lock();
        Self::refill_locked(&mut inner);
        let available = inner.bucket.tokens;
        match inner.handler.check(cost, available) {
            RateLimitDecision::Allow => {
                let price = Self::cost_of(&inner, cost);
                inner.bucket.tokens = (inner.bucket.tokens - price).max(0.0);
                drop(inner);
                on_send();
                Ok(())
            }
            RateLimitDecision::Queue => {
                if inner.queue.len() >= inner.config.queue_limit {
                    return Err(RateLimitError::QueueFull);
                }
                let price = Self::cost_of(&inner, cost);
                inner.queue.push_back(Queued {
                    cost,
                    tokens: price,
                    callback: Box::new(on_send),
                });
                Ok(())
            }
            RateLimitDecision::Reject(reason) => Err(RateLimitError::Rejected(reason)),
        }
    }

    /// Drains as many queued requests as the refreshed bucket allows.
    /// Intended to be called on every `process_interval` tick by the
    /// connection engine's timer.
    pub fn tick(&self) {
        let mut inner = self.inner.lock();
        Self::refill_locked(&mut inner);
        let mut ready = Vec::new();
        while let Some(front) = inner.queue.front() {
            if inner.bucket.tokens < front.tokens {
                break;
            }
            inner.bucket.tokens -= front.tokens;
            ready.push(inner.queue.pop_front().unwrap());
        }
        drop(inner);
        for item in ready {
            (item.callback)();
        }
    }

    /// Current queue depth, for observability/tests.
    pub fn queue_len(&self) -> usize {
        self.inner.lock().queue.len()
    }

    /// `process_interval` this limiter was configured with.
    pub fn process_interval(&self) -> Duration {
        self.inner.lock().config.process_interval
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct AlwaysAllow;
    impl RateLimitHandler for AlwaysAllow {
        fn check(&self, _cost: RequestCost, _tokens_available: f64) -> RateLimitDecision {
            RateLimitDecision::Allow
        }
    }

    struct AlwaysQueue;
    impl RateLimitHandler for AlwaysQueue {
        fn check(&self, _cost: RequestCost, _tokens_available: f64) -> RateLimitDecision {
            RateLimitDecision::Queue
        }
    }

    struct AlwaysReject;
    impl RateLimitHandler for AlwaysReject {
        fn check(&self, _cost: RequestCost, _tokens_available: f64) -> RateLimitDecision {
            RateLimitDecision::Reject("always_reject".into())
        }
    }

    #[test]
    fn always_allow_sends_synchronously() {
        let limiter = RateLimiter::new(RateLimiterConfig::default(), Arc::new(AlwaysAllow));
        let sent = Arc::new(AtomicUsize::new(0));
        let sent_clone = sent.clone();
        limiter
            .check(RequestCost::Default, move || {
                sent_clone.fetch_add(1, Ordering::SeqCst);
            })
            .unwrap();
        assert_eq!(sent.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn always_reject_fails_synchronously_with_reason() {
        let limiter = RateLimiter::new(RateLimiterConfig::default(), Arc::new(AlwaysReject));
        let err = limiter.check(RequestCost::Default, || {}).unwrap_err();
        assert_eq!(err, RateLimitError::Rejected("always_reject".into()));
    }

    #[test]
    fn always_queue_defers_the_callback_until_a_tick() {
        let limiter = RateLimiter::new(RateLimiterConfig::default(), Arc::new(AlwaysQueue));
        let sent = Arc::new(AtomicUsize::new(0));
        let sent_clone = sent.clone();
        limiter
            .check(RequestCost::Default, move || {
                sent_clone.fetch_add(1, Ordering::SeqCst);
            })
            .unwrap();
        assert_eq!(sent.load(Ordering::SeqCst), 0, "queued, not sent yet");
        assert_eq!(limiter.queue_len(), 1);

        limiter.tick();
        assert_eq!(sent.load(Ordering::SeqCst), 1, "drained on tick");
        assert_eq!(limiter.queue_len(), 0);
    }

    #[test]
    fn queue_overflow_rejects_with_queue_full() {
        let mut config = RateLimiterConfig::default();
        config.queue_limit = 1;
        let limiter = RateLimiter::new(config, Arc::new(AlwaysQueue));
        limiter.check(RequestCost::Default, || {}).unwrap();
        let err = limiter.check(RequestCost::Default, || {}).unwrap_err();
        assert_eq!(err, RateLimitError::QueueFull);
    }

    #[test]
    fn cost_map_parses_from_rate_limit_opts() {
        let opts = crate::config::ConfigOptions::new(serde_json::json!({
            "rate_limit_opts": {
                "cost_map": { "subscription": 3.0, "order": 5.0, "bogus_key": 9.0 },
            },
        }));
        let config = RateLimiterConfig::from_options(&opts);
        assert_eq!(config.cost_map.get(&RequestCost::Subscription), Some(&3.0));
        assert_eq!(config.cost_map.get(&RequestCost::Order), Some(&5.0));
        assert_eq!(config.cost_map.get(&RequestCost::Query), None);
    }

    #[test]
    fn allow_debits_the_category_specific_cost() {
        let mut config = RateLimiterConfig::default();
        config.capacity = 10.0;
        config.cost_map.insert(RequestCost::Order, 4.0);
        let limiter = RateLimiter::new(config, Arc::new(AlwaysAllow));

        limiter.check(RequestCost::Order, || {}).unwrap();
        let available = limiter.inner.lock().bucket.tokens;
        assert_eq!(available, 6.0, "order should debit its cost_map price, not the flat default");

        limiter.check(RequestCost::Query, || {}).unwrap();
        let available = limiter.inner.lock().bucket.tokens;
        assert_eq!(available, 5.0, "a category absent from cost_map falls back to DEFAULT_COST");
    }

    #[test]
    fn queued_cost_map_price_is_debited_on_drain() {
        let mut config = RateLimiterConfig::default();
        config.capacity = 10.0;
        config.cost_map.insert(RequestCost::Subscription, 7.0);
        let limiter = RateLimiter::new(config, Arc::new(AlwaysQueue));

        limiter.check(RequestCost::Subscription, || {}).unwrap();
        limiter.tick();
        let available = limiter.inner.lock().bucket.tokens;
        assert_eq!(available, 3.0, "drain should debit the subscription's cost_map price");
    }
}
