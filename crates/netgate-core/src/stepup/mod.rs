//! Step-up (out-of-band push) authentication for high-risk actions.
//!
//! [`StepUpAuthenticator`] wraps an [`MfaProvider`] and enforces the
//! fail-closed policy: only an explicit provider "allow" approves. The push
//! round-trip runs on a spawned task bounded by a timeout, so the caller's
//! task is never blocked on the provider and no store lock is held while
//! waiting.

pub mod duo;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::risk::RiskLevel;

pub use duo::{DuoClient, DuoConfig};

/// Errors raised by an MFA provider adapter. Never surfaced past the
/// authenticator; they resolve to a failed push.
#[derive(Debug, thiserror::Error)]
pub enum MfaError {
    #[error("MFA provider request failed: {0}")]
    Http(String),

    #[error("MFA provider returned {status}: {message}")]
    Provider { status: String, message: String },

    #[error("could not decode MFA provider response: {0}")]
    Decode(String),

    #[error("invalid MFA provider configuration: {0}")]
    Config(String),
}

impl From<reqwest::Error> for MfaError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            MfaError::Decode(err.to_string())
        } else {
            MfaError::Http(err.to_string())
        }
    }
}

/// Raw answer from a provider to a push request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProviderResponse {
    /// `true` only for an explicit allow.
    pub allowed: bool,
    pub transaction_id: Option<String>,
    /// Provider's human-readable status, for logs.
    pub status_message: Option<String>,
}

/// Out-of-band push provider (e.g. Duo).
#[async_trait]
pub trait MfaProvider: Send + Sync + 'static {
    /// Send a push to `user` and wait for the provider's own verdict.
    async fn push(
        &self,
        user: &str,
        description: &str,
        correlation_id: &str,
    ) -> Result<ProviderResponse, MfaError>;

    /// Check a previously issued transaction.
    async fn poll(&self, transaction_id: &str) -> Result<bool, MfaError>;

    /// The provider-side identity pushes are sent to.
    fn default_user(&self) -> &str;
}

/// Why a push did not approve.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind", content = "reason")]
pub enum PushFailure {
    /// The human (or provider policy) said no.
    Denied(String),
    /// Provider error, timeout, or crashed task.
    Unavailable(String),
}

/// Result of a step-up attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PushOutcome {
    pub approved: bool,
    pub transaction_id: Option<String>,
    pub failure: Option<PushFailure>,
}

impl PushOutcome {
    pub fn allowed(transaction_id: Option<String>) -> Self {
        Self {
            approved: true,
            transaction_id,
            failure: None,
        }
    }

    pub fn denied(reason: impl Into<String>) -> Self {
        Self {
            approved: false,
            transaction_id: None,
            failure: Some(PushFailure::Denied(reason.into())),
        }
    }

    pub fn unavailable(reason: impl Into<String>) -> Self {
        Self {
            approved: false,
            transaction_id: None,
            failure: Some(PushFailure::Unavailable(reason.into())),
        }
    }
}

/// Default bound on a push round-trip.
pub const DEFAULT_PUSH_TIMEOUT: Duration = Duration::from_secs(60);

/// Fail-closed step-up authenticator.
#[derive(Clone)]
pub struct StepUpAuthenticator {
    provider: Option<Arc<dyn MfaProvider>>,
    timeout: Duration,
}

impl std::fmt::Debug for StepUpAuthenticator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StepUpAuthenticator")
            .field("enabled", &self.is_enabled())
            .field("timeout", &self.timeout)
            .finish()
    }
}

impl StepUpAuthenticator {
    pub fn new(provider: Arc<dyn MfaProvider>, timeout: Duration) -> Self {
        Self {
            provider: Some(provider),
            timeout,
        }
    }

    /// Step-up globally disabled; dangerous and critical actions fall back
    /// to confirmation only.
    pub fn disabled() -> Self {
        Self {
            provider: None,
            timeout: DEFAULT_PUSH_TIMEOUT,
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.provider.is_some()
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// True only when a provider is configured and the level is
    /// dangerous or critical.
    pub fn requires_step_up(&self, level: RiskLevel) -> bool {
        self.is_enabled() && level.is_step_up_eligible()
    }

    /// Push to the provider's default user and wait for a verdict.
    pub async fn send_push(&self, description: &str, correlation_id: &str) -> PushOutcome {
        let Some(provider) = self.provider.clone() else {
            return PushOutcome::unavailable("step-up authentication is not configured");
        };

        let description = description.to_string();
        let correlation_id = correlation_id.to_string();
        let timeout = self.timeout;

        info!(
            correlation_id = %correlation_id,
            user = %provider.default_user(),
            "sending step-up push"
        );

        let task = tokio::spawn(async move {
            let user = provider.default_user().to_string();
            tokio::time::timeout(timeout, provider.push(&user, &description, &correlation_id))
                .await
        });

        match task.await {
            Ok(Ok(Ok(resp))) if resp.allowed => PushOutcome::allowed(resp.transaction_id),
            Ok(Ok(Ok(resp))) => PushOutcome::denied(
                resp.status_message
                    .unwrap_or_else(|| "push was not approved".to_string()),
            ),
            Ok(Ok(Err(e))) => {
                warn!(error = %e, "step-up provider error");
                PushOutcome::unavailable(e.to_string())
            }
            Ok(Err(_)) => {
                warn!(timeout_secs = timeout.as_secs(), "step-up push timed out");
                PushOutcome::unavailable(format!("no response within {}s", timeout.as_secs()))
            }
            Err(e) => {
                warn!(error = %e, "step-up task failed");
                PushOutcome::unavailable(format!("push task failed: {e}"))
            }
        }
    }

    /// Poll a transaction. Errors and a missing provider read as not approved.
    pub async fn check_status(&self, transaction_id: &str) -> bool {
        let Some(provider) = &self.provider else {
            return false;
        };
        match tokio::time::timeout(self.timeout, provider.poll(transaction_id)).await {
            Ok(Ok(approved)) => approved,
            Ok(Err(e)) => {
                warn!(error = %e, transaction_id = %transaction_id, "step-up status check failed");
                false
            }
            Err(_) => false,
        }
    }
}
