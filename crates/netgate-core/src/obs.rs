//! Structured lifecycle events for pending actions.
//!
//! Each transition of the confirmation workflow is emitted as one
//! `tracing` event with an `event` field, so the log stream doubles as the
//! audit trail. Secrets (tokens, tool arguments) are never logged.

use tracing::{debug, info, warn};

use crate::action::{ActionId, PendingAction};
use crate::metrics::METRICS;

/// RAII guard that enters an action-scoped tracing span.
///
/// ```ignore
/// let _span = ActionSpan::enter(&action.action_id);
/// // every event below carries action_id
/// ```
pub struct ActionSpan {
    _span: tracing::span::EnteredSpan,
}

impl ActionSpan {
    pub fn enter(action_id: &ActionId) -> Self {
        Self {
            _span: action_span(action_id).entered(),
        }
    }
}

/// The action-scoped span, for `Instrument`ing futures. [`ActionSpan`]
/// must not be held across an `.await`.
pub fn action_span(action_id: &ActionId) -> tracing::Span {
    tracing::info_span!("netgate.action", action_id = %action_id)
}

pub fn emit_action_created(action: &PendingAction) {
    METRICS.inc_created();
    info!(
        event = "action.created",
        action_id = %action.action_id,
        tool_name = %action.tool_name,
        risk = %action.risk_level,
        requester = %action.requester_identity,
        expires_at = %action.expires_at.to_rfc3339(),
        description = %action.description,
    );
}

pub fn emit_mfa_requested(action_id: &ActionId, requester: &str) {
    METRICS.inc_pushes_sent();
    info!(event = "action.mfa_requested", action_id = %action_id, requester = %requester);
}

pub fn emit_mfa_failed(action_id: &ActionId, reason: &dyn std::fmt::Display) {
    METRICS.inc_pushes_failed();
    warn!(event = "action.mfa_failed", action_id = %action_id, reason = %reason);
}

pub fn emit_action_approved(action_id: &ActionId, mfa: bool, mfa_transaction_id: Option<&str>) {
    METRICS.inc_approved();
    info!(
        event = "action.approved",
        action_id = %action_id,
        mfa = mfa,
        mfa_transaction_id = mfa_transaction_id.unwrap_or("-"),
    );
}

pub fn emit_action_denied(action_id: &ActionId, by: &str, reason: &str) {
    METRICS.inc_denied();
    info!(event = "action.denied", action_id = %action_id, by = %by, reason = %reason);
}

pub fn emit_actions_expired(count: usize) {
    if count > 0 {
        METRICS.add_expired(count as u64);
        debug!(event = "action.expired", count = count);
    }
}

pub fn emit_token_consumed(action_id: &ActionId, tool_name: &str) {
    METRICS.inc_consumed();
    info!(event = "token.consumed", action_id = %action_id, tool_name = %tool_name);
}

pub fn emit_token_rejected(tool_name: &str) {
    METRICS.inc_rejected();
    warn!(event = "token.rejected", tool_name = %tool_name);
}

pub fn emit_confirm_refused(action_id: &ActionId, identity: &str, error: &dyn std::fmt::Display) {
    warn!(
        event = "action.confirm_refused",
        action_id = %action_id,
        identity = %identity,
        error = %error,
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_action_span_create() {
        let _span = ActionSpan::enter(&ActionId::from("test-action"));
    }
}
