//! Guarded transitions over [`Status`].
//!
//! The transition table is the single source of truth for which moves are
//! legal; nothing else in the crate is allowed to set `ConnectionState.status`
//! directly (see [`crate::state::ConnectionState::update_status`] — it's a
//! dumb setter precisely because the *caller*, here, is responsible for
//! checking legality first).

use crate::error::InvalidTransition;
use crate::state::Status;

/// Context accompanying a transition, threaded through to the caller so it
/// can hand `reason` to `ReconnectionPolicy` without a second lookup.
#[derive(Debug, Clone, Default)]
pub struct TransitionContext {
    /// A short machine-usable reason tag for the transition, if any.
    pub reason: Option<String>,
}

/// A pure function over [`Status`] — carries no state of its own.
pub struct StateMachine;

impl StateMachine {
    /// Attempts to move from `from` to `target`.
    ///
    /// Any transition into [`Status::Error`] is always permitted. Every
    /// other (from, to) pair must appear in the table below or the
    /// transition is rejected and `from` is returned unchanged by the
    /// caller (this function does not mutate anything; it only judges).
    pub fn transition_to(
        from: Status,
        target: Status,
        _context: &TransitionContext,
    ) -> Result<Status, InvalidTransition> {
        if target == Status::Error {
            return Ok(Status::Error);
        }
        if Self::is_allowed(from, target) {
            Ok(target)
        } else {
            Err(InvalidTransition { from, to: target })
        }
    }

    /// The transition table from spec.md §4.4, excluding the
    /// always-allowed `-> Error` row.
    fn is_allowed(from: Status, target: Status) -> bool {
        use Status::*;
        matches!(
            (from, target),
            (Initialized, Connecting)
                | (Connecting, Connected)
                | (Connecting, Disconnected)
                | (Connected, WebsocketConnected)
                | (Connected, Disconnected)
                | (WebsocketConnected, Disconnected)
                | (Disconnected, Reconnecting)
                | (Reconnecting, Connecting)
                | (Reconnecting, Disconnected)
                | (Error, Connecting)
                | (Error, Reconnecting)
        )
    }
}
