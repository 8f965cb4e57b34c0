//! Pending actions: the only stateful entity of the approval gate.

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use chrono::{DateTime, Duration, Utc};
use rand::rngs::OsRng;
use rand::RngCore;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use subtle::ConstantTimeEq;

use crate::risk::RiskLevel;

/// Entropy of an action identifier, in bytes.
pub const ACTION_ID_BYTES: usize = 16;
/// Entropy of a confirmation token, in bytes.
pub const CONFIRM_TOKEN_BYTES: usize = 32;

fn random_urlsafe(n: usize) -> String {
    let mut bytes = vec![0u8; n];
    OsRng.fill_bytes(&mut bytes);
    URL_SAFE_NO_PAD.encode(bytes)
}

/// Opaque, URL-safe identifier of a pending action.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ActionId(String);

impl ActionId {
    /// A fresh random identifier.
    pub fn generate() -> Self {
        Self(random_urlsafe(ACTION_ID_BYTES))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for ActionId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for ActionId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl std::fmt::Display for ActionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Single-use secret authorizing execution of one pending action.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ConfirmToken(String);

impl ConfirmToken {
    pub fn generate() -> Self {
        Self(random_urlsafe(CONFIRM_TOKEN_BYTES))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Constant-time comparison against a presented token.
    pub fn matches(&self, presented: &str) -> bool {
        self.0.as_bytes().ct_eq(presented.as_bytes()).into()
    }
}

impl std::fmt::Debug for ConfirmToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("ConfirmToken(<redacted>)")
    }
}

/// Routing information for the notification collaborator (which
/// conversation or channel to post to). The gate only stores and returns it.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct OriginContext(pub Value);

impl OriginContext {
    pub fn new(value: Value) -> Self {
        Self(value)
    }
}

/// Position of an action in the confirmation workflow.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionStage {
    /// Waiting for the requester to confirm.
    Created,
    /// A step-up push is outstanding.
    MfaPending,
    /// Token issued; waiting for the command to be resubmitted.
    Approved,
}

/// A command awaiting confirmation.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PendingAction {
    pub action_id: ActionId,
    pub tool_name: String,
    /// Opaque argument bag; copied, never inspected.
    pub tool_args: Value,
    /// Only this identity may confirm the action.
    pub requester_identity: String,
    pub origin_context: OriginContext,
    pub risk_level: RiskLevel,
    pub description: String,
    pub impact: String,
    pub created_at: DateTime<Utc>,
    /// Fixed at creation; never extended.
    pub expires_at: DateTime<Utc>,
    pub stage: ActionStage,
    #[serde(skip)]
    pub(crate) confirm_token: Option<ConfirmToken>,
    pub mfa_approved: bool,
    pub mfa_transaction_id: Option<String>,
}

/// Fields supplied by the caller when creating a pending action.
#[derive(Debug, Clone, PartialEq)]
pub struct NewAction {
    pub tool_name: String,
    pub tool_args: Value,
    pub requester_identity: String,
    pub origin_context: OriginContext,
    pub risk_level: RiskLevel,
    pub description: String,
    pub impact: String,
}

impl PendingAction {
    pub(crate) fn new(
        action_id: ActionId,
        spec: NewAction,
        now: DateTime<Utc>,
        ttl: Duration,
    ) -> Self {
        Self {
            action_id,
            tool_name: spec.tool_name,
            tool_args: spec.tool_args,
            requester_identity: spec.requester_identity,
            origin_context: spec.origin_context,
            risk_level: spec.risk_level,
            description: spec.description,
            impact: spec.impact,
            created_at: now,
            expires_at: now.checked_add_signed(ttl).unwrap_or(DateTime::<Utc>::MAX_UTC),
            stage: ActionStage::Created,
            confirm_token: None,
            mfa_approved: false,
            mfa_transaction_id: None,
        }
    }

    /// Expired strictly after `expires_at`.
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        now > self.expires_at
    }

    /// Whether a confirmation token has been issued.
    pub fn is_confirmed(&self) -> bool {
        self.confirm_token.is_some()
    }

    /// The issued token, if any.
    pub fn confirm_token(&self) -> Option<&ConfirmToken> {
        self.confirm_token.as_ref()
    }

    /// Time left before expiry, clamped at zero.
    pub fn remaining_at(&self, now: DateTime<Utc>) -> Duration {
        (self.expires_at - now).max(Duration::zero())
    }
}
