//! Reconnection policy: delegates the reconnect/backoff decision entirely to
//! the active [`ErrorHandler`](wsconn_core::ErrorHandler).
//!
//! The policy itself holds no state beyond the ceiling it enforces —
//! `reconnect_attempts` lives on [`wsconn_core::ConnectionState`], and the
//! per-attempt backoff shape is the handler's business (§4.5 collapses the
//! two reconnect code paths the original exhibited into this single
//! engine-level path; see the open question resolution in DESIGN.md).

use std::sync::Arc;
use std::time::Duration;

use wsconn_core::{ErrorHandler, ErrorValue};

/// Outcome of consulting the reconnection policy for one failure.
#[derive(Debug, Clone, PartialEq)]
pub enum PolicyOutcome {
    /// Give up: the handler classified the error as terminal, or declined
    /// to reconnect outright. The engine should transition to `Error` and
    /// stop, fanning out the original error.
    GiveUp,
    /// Give up because the retry ceiling (`max_reconnect_attempts`) was
    /// reached, distinct from `GiveUp` so the engine can surface
    /// `ReconnectExhausted` instead of the triggering error.
    Exhausted { attempts: u32 },
    /// Retry after `delay`. `attempt` is the attempt index being scheduled.
    Retry { delay: Duration, attempt: u32 },
}

/// Stateless wrapper around an [`ErrorHandler`] plus the ceiling the engine
/// enforces independently of what the handler itself would allow.
pub struct ReconnectionPolicy {
    handler: Arc<dyn ErrorHandler>,
    max_reconnect_attempts: Option<u32>,
}

impl ReconnectionPolicy {
    pub fn new(handler: Arc<dyn ErrorHandler>, max_reconnect_attempts: Option<u32>) -> Self {
        Self {
            handler,
            max_reconnect_attempts,
        }
    }

    /// Decides what to do after `error`, given `reconnect_attempts` already
    /// made (0 before the first retry).
    pub fn decide(&self, error: &ErrorValue, reconnect_attempts: u32) -> PolicyOutcome {
        if self.handler.is_terminal(error) {
            return PolicyOutcome::GiveUp;
        }
        if let Some(max) = self.max_reconnect_attempts
            && reconnect_attempts >= max
        {
            return PolicyOutcome::Exhausted {
                attempts: reconnect_attempts,
            };
        }

        let decision = self.handler.handle_error(error, reconnect_attempts);
        if !decision.reconnect {
            return PolicyOutcome::GiveUp;
        }

        PolicyOutcome::Retry {
            delay: Duration::from_millis(decision.delay_ms),
            attempt: reconnect_attempts + 1,
        }
    }

    pub fn log_error(&self, error: &ErrorValue) {
        self.handler.log_error(error);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wsconn_core::ReconnectDecision;

    struct FixedHandler {
        reconnect: bool,
        delay_ms: u64,
    }

    impl ErrorHandler for FixedHandler {
        fn handle_error(&self, _error: &ErrorValue, _attempt_index: u32) -> ReconnectDecision {
            ReconnectDecision {
                reconnect: self.reconnect,
                delay_ms: self.delay_ms,
            }
        }
    }

    #[test]
    fn ceiling_overrides_a_handler_that_would_keep_retrying() {
        let policy = ReconnectionPolicy::new(
            Arc::new(FixedHandler {
                reconnect: true,
                delay_ms: 10,
            }),
            Some(3),
        );
        let error = ErrorValue::new("transient", "connection reset");
        assert_eq!(
            policy.decide(&error, 3),
            PolicyOutcome::Exhausted { attempts: 3 },
            "ceiling reached, handler's own preference is overridden"
        );
        assert!(matches!(
            policy.decide(&error, 2),
            PolicyOutcome::Retry { attempt: 3, .. }
        ));
    }

    #[test]
    fn terminal_reason_short_circuits_the_handler() {
        let policy = ReconnectionPolicy::new(
            Arc::new(FixedHandler {
                reconnect: true,
                delay_ms: 10,
            }),
            None,
        );
        let error = ErrorValue::new("auth_permanent_failure", "bad api key");
        assert_eq!(policy.decide(&error, 0), PolicyOutcome::GiveUp);
    }

    #[test]
    fn handler_declining_to_reconnect_is_respected() {
        let policy = ReconnectionPolicy::new(
            Arc::new(FixedHandler {
                reconnect: false,
                delay_ms: 0,
            }),
            None,
        );
        let error = ErrorValue::new("transient", "reset");
        assert_eq!(policy.decide(&error, 0), PolicyOutcome::GiveUp);
    }
}
