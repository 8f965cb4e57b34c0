//! Confirmation engine: drives a pending action through
//! `created -> [mfa_pending] -> approved -> consumed`.
//!
//! Store mutations go through the store lock. The step-up push happens with
//! the lock released; the result is applied only after re-checking that the
//! action is still live and still waiting on that push.

use std::sync::Arc;

use serde_json::Value;
use tracing::Instrument;

use crate::action::{ActionId, ActionStage, ConfirmToken, NewAction, PendingAction};
use crate::config::DenyPolicy;
use crate::error::{ApprovalError, ApprovalResult};
use crate::obs::{self, ActionSpan};
use crate::risk::RiskLevel;
use crate::stepup::{PushFailure, StepUpAuthenticator};
use crate::store::PendingActionStore;

/// What the first (locked) phase of a confirm decided.
enum ConfirmPhase {
    Minted(ConfirmToken),
    AwaitPush { description: String, requester: String },
}

/// Owns the confirmation workflow over a shared [`PendingActionStore`].
#[derive(Debug, Clone)]
pub struct ConfirmationEngine {
    store: Arc<PendingActionStore>,
    stepup: StepUpAuthenticator,
    deny_policy: DenyPolicy,
}

impl ConfirmationEngine {
    pub fn new(store: Arc<PendingActionStore>, stepup: StepUpAuthenticator) -> Self {
        Self {
            store,
            stepup,
            deny_policy: DenyPolicy::default(),
        }
    }

    pub fn with_deny_policy(mut self, deny_policy: DenyPolicy) -> Self {
        self.deny_policy = deny_policy;
        self
    }

    pub fn store(&self) -> &Arc<PendingActionStore> {
        &self.store
    }

    pub fn step_up(&self) -> &StepUpAuthenticator {
        &self.stepup
    }

    pub fn deny_policy(&self) -> DenyPolicy {
        self.deny_policy
    }

    pub fn requires_step_up(&self, level: RiskLevel) -> bool {
        self.stepup.requires_step_up(level)
    }

    /// Register a command that needs confirmation.
    pub fn request(&self, spec: NewAction) -> PendingAction {
        self.store.create(spec)
    }

    /// Confirm an action on behalf of `identity` and mint its token.
    ///
    /// Only the requester may confirm. When the risk level calls for step-up
    /// the action moves to `MfaPending` and a push is sent; a denied or failed
    /// push removes the action. The returned token is the only copy handed
    /// out; it is redeemed through [`Self::validate_token`].
    ///
    /// # Errors
    ///
    /// `NotFoundOrExpired`, `Unauthorized`, `AlreadyConfirmed`,
    /// `StepUpInProgress`, `MfaDenied`, `MfaUnavailable`.
    pub async fn confirm(
        &self,
        action_id: &ActionId,
        identity: &str,
    ) -> ApprovalResult<ConfirmToken> {
        self.confirm_inner(action_id, identity)
            .instrument(obs::action_span(action_id))
            .await
    }

    async fn confirm_inner(
        &self,
        action_id: &ActionId,
        identity: &str,
    ) -> ApprovalResult<ConfirmToken> {
        let phase = self
            .store
            .update(action_id, |action| self.begin_confirm(action, identity))
            .unwrap_or_else(|| {
                Err(ApprovalError::NotFoundOrExpired {
                    action_id: action_id.to_string(),
                })
            });

        let phase = match phase {
            Ok(phase) => phase,
            Err(err) => {
                obs::emit_confirm_refused(action_id, identity, &err);
                return Err(err);
            }
        };

        let (description, requester) = match phase {
            ConfirmPhase::Minted(token) => {
                obs::emit_action_approved(action_id, false, None);
                return Ok(token);
            }
            ConfirmPhase::AwaitPush {
                description,
                requester,
            } => (description, requester),
        };

        obs::emit_mfa_requested(action_id, &requester);
        let outcome = self.stepup.send_push(&description, action_id.as_str()).await;

        if !outcome.approved {
            self.store.deny(action_id);
            return Err(match outcome.failure {
                Some(PushFailure::Unavailable(reason)) => {
                    obs::emit_mfa_failed(action_id, &reason);
                    ApprovalError::MfaUnavailable {
                        action_id: action_id.to_string(),
                        reason,
                    }
                }
                Some(PushFailure::Denied(reason)) => {
                    obs::emit_action_denied(action_id, "step-up", &reason);
                    ApprovalError::MfaDenied {
                        action_id: action_id.to_string(),
                    }
                }
                None => {
                    obs::emit_action_denied(action_id, "step-up", "not approved");
                    ApprovalError::MfaDenied {
                        action_id: action_id.to_string(),
                    }
                }
            });
        }

        // The action may have been denied, expired or consumed while the
        // push was outstanding.
        let transaction_id = outcome.transaction_id;
        let minted = self
            .store
            .update(action_id, |action| {
                if action.stage != ActionStage::MfaPending || action.confirm_token.is_some() {
                    return None;
                }
                let token = ConfirmToken::generate();
                action.confirm_token = Some(token.clone());
                action.mfa_approved = true;
                action.mfa_transaction_id = transaction_id.clone();
                action.stage = ActionStage::Approved;
                Some(token)
            })
            .flatten();

        match minted {
            Some(token) => {
                obs::emit_action_approved(action_id, true, transaction_id.as_deref());
                Ok(token)
            }
            None => {
                let err = ApprovalError::NotFoundOrExpired {
                    action_id: action_id.to_string(),
                };
                obs::emit_confirm_refused(action_id, identity, &err);
                Err(err)
            }
        }
    }

    /// Runs under the store lock.
    fn begin_confirm(
        &self,
        action: &mut PendingAction,
        identity: &str,
    ) -> ApprovalResult<ConfirmPhase> {
        if action.requester_identity != identity {
            return Err(ApprovalError::Unauthorized {
                action_id: action.action_id.to_string(),
                identity: identity.to_string(),
            });
        }
        if action.confirm_token.is_some() {
            return Err(ApprovalError::AlreadyConfirmed {
                action_id: action.action_id.to_string(),
            });
        }
        if action.stage == ActionStage::MfaPending {
            return Err(ApprovalError::StepUpInProgress {
                action_id: action.action_id.to_string(),
            });
        }

        if self.stepup.requires_step_up(action.risk_level) {
            action.stage = ActionStage::MfaPending;
            return Ok(ConfirmPhase::AwaitPush {
                description: action.description.clone(),
                requester: action.requester_identity.clone(),
            });
        }

        let token = ConfirmToken::generate();
        action.confirm_token = Some(token.clone());
        action.stage = ActionStage::Approved;
        Ok(ConfirmPhase::Minted(token))
    }

    /// Cancel an action, subject to the configured [`DenyPolicy`].
    ///
    /// Allowed in any stage before the token is redeemed, including while a
    /// push is outstanding.
    pub fn deny(&self, action_id: &ActionId, identity: &str) -> ApprovalResult<()> {
        let _span = ActionSpan::enter(action_id);
        let not_found = || ApprovalError::NotFoundOrExpired {
            action_id: action_id.to_string(),
        };

        if self.deny_policy == DenyPolicy::RequesterOnly {
            let is_requester = self
                .store
                .update(action_id, |action| action.requester_identity == identity)
                .ok_or_else(not_found)?;
            if !is_requester {
                let err = ApprovalError::Unauthorized {
                    action_id: action_id.to_string(),
                    identity: identity.to_string(),
                };
                obs::emit_confirm_refused(action_id, identity, &err);
                return Err(err);
            }
        }

        if !self.store.deny(action_id) {
            return Err(not_found());
        }
        obs::emit_action_denied(action_id, identity, "cancelled");
        Ok(())
    }

    /// Redeem a token for `tool_name`, returning the stored arguments.
    pub fn validate_token(&self, tool_name: &str, token: &str) -> ApprovalResult<Value> {
        self.store
            .validate_token(tool_name, token)
            .ok_or_else(|| ApprovalError::InvalidToken {
                tool_name: tool_name.to_string(),
            })
    }

    /// Poll the provider about an earlier step-up transaction.
    pub async fn check_step_up_status(&self, transaction_id: &str) -> bool {
        self.stepup.check_status(transaction_id).await
    }

    pub fn get(&self, action_id: &ActionId) -> ApprovalResult<PendingAction> {
        self.store
            .get(action_id)
            .ok_or_else(|| ApprovalError::NotFoundOrExpired {
                action_id: action_id.to_string(),
            })
    }

    pub fn list_pending(&self, requester: Option<&str>) -> Vec<PendingAction> {
        self.store.list_pending(requester)
    }

    pub fn cleanup_expired(&self) -> usize {
        self.store.cleanup_expired()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::action::OriginContext;
    use crate::stepup::{MfaError, MfaProvider, ProviderResponse};
    use async_trait::async_trait;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    struct CountingAllow(AtomicUsize);

    #[async_trait]
    impl MfaProvider for CountingAllow {
        async fn push(&self, _: &str, _: &str, _: &str) -> Result<ProviderResponse, MfaError> {
            self.0.fetch_add(1, Ordering::SeqCst);
            Ok(ProviderResponse {
                allowed: true,
                transaction_id: Some("txid-1".into()),
                status_message: None,
            })
        }

        async fn poll(&self, _: &str) -> Result<bool, MfaError> {
            Ok(true)
        }

        fn default_user(&self) -> &str {
            "netops"
        }
    }

    fn spec(level: RiskLevel) -> NewAction {
        NewAction {
            tool_name: "reboot_device".into(),
            tool_args: json!({"mac": "aa:bb:cc:dd:ee:ff"}),
            requester_identity: "U1".into(),
            origin_context: OriginContext::default(),
            risk_level: level,
            description: "Reboot device aa:bb:cc:dd:ee:ff".into(),
            impact: "offline for a few minutes".into(),
        }
    }

    fn engine(stepup: StepUpAuthenticator) -> ConfirmationEngine {
        ConfirmationEngine::new(Arc::new(PendingActionStore::default()), stepup)
    }

    #[tokio::test]
    async fn test_confirm_without_step_up_mints_token() {
        let engine = engine(StepUpAuthenticator::disabled());
        let action = engine.request(spec(RiskLevel::Critical));
        let token = engine.confirm(&action.action_id, "U1").await.unwrap();

        let stored = engine.get(&action.action_id).unwrap();
        assert_eq!(stored.stage, ActionStage::Approved);
        assert_eq!(stored.confirm_token(), Some(&token));
        assert!(!stored.mfa_approved);
    }

    #[tokio::test]
    async fn test_step_up_records_transaction() {
        let provider = Arc::new(CountingAllow(AtomicUsize::new(0)));
        let engine = engine(StepUpAuthenticator::new(
            provider.clone(),
            Duration::from_secs(5),
        ));
        let action = engine.request(spec(RiskLevel::Dangerous));
        engine.confirm(&action.action_id, "U1").await.unwrap();

        let stored = engine.get(&action.action_id).unwrap();
        assert!(stored.mfa_approved);
        assert_eq!(stored.mfa_transaction_id.as_deref(), Some("txid-1"));
        assert_eq!(provider.0.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_moderate_skips_step_up_even_when_enabled() {
        let provider = Arc::new(CountingAllow(AtomicUsize::new(0)));
        let engine = engine(StepUpAuthenticator::new(
            provider.clone(),
            Duration::from_secs(5),
        ));
        let action = engine.request(spec(RiskLevel::Moderate));
        engine.confirm(&action.action_id, "U1").await.unwrap();
        assert_eq!(provider.0.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_reconfirm_is_rejected_without_second_push() {
        let provider = Arc::new(CountingAllow(AtomicUsize::new(0)));
        let engine = engine(StepUpAuthenticator::new(
            provider.clone(),
            Duration::from_secs(5),
        ));
        let action = engine.request(spec(RiskLevel::Critical));
        engine.confirm(&action.action_id, "U1").await.unwrap();
        let err = engine.confirm(&action.action_id, "U1").await.unwrap_err();
        assert!(matches!(err, ApprovalError::AlreadyConfirmed { .. }));
        assert_eq!(provider.0.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_deny_requester_only() {
        let engine = engine(StepUpAuthenticator::disabled());
        let action = engine.request(spec(RiskLevel::Moderate));
        let err = engine.deny(&action.action_id, "U2").unwrap_err();
        assert!(matches!(err, ApprovalError::Unauthorized { .. }));
        assert!(engine.get(&action.action_id).is_ok());
        engine.deny(&action.action_id, "U1").unwrap();
        assert!(engine.get(&action.action_id).is_err());
    }

    #[test]
    fn test_deny_any_participant() {
        let engine =
            engine(StepUpAuthenticator::disabled()).with_deny_policy(DenyPolicy::AnyParticipant);
        let action = engine.request(spec(RiskLevel::Moderate));
        engine.deny(&action.action_id, "U2").unwrap();
        let again = engine.deny(&action.action_id, "U2").unwrap_err();
        assert!(matches!(again, ApprovalError::NotFoundOrExpired { .. }));
    }

    #[test]
    fn test_validate_token_maps_to_invalid_token() {
        let engine = engine(StepUpAuthenticator::disabled());
        let err = engine.validate_token("block_client", "bogus").unwrap_err();
        assert_eq!(
            err,
            ApprovalError::InvalidToken {
                tool_name: "block_client".into()
            }
        );
    }
}
