//! Integration tests for the confirmation workflow.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration as StdDuration;

use async_trait::async_trait;
use chrono::Duration;
use serde_json::{json, Value};

use netgate_core::{
    ActionStage, ApprovalError, ConfirmationEngine, DenyPolicy, ManualClock, MfaError,
    MfaProvider, NewAction, OriginContext, PendingActionStore, ProviderResponse, RiskLevel,
    StepUpAuthenticator,
};

/// Provider double answering every push the same way.
struct ScriptedMfa {
    allow: bool,
    fail: bool,
    pushes: AtomicUsize,
}

impl ScriptedMfa {
    fn allowing() -> Arc<Self> {
        Arc::new(Self {
            allow: true,
            fail: false,
            pushes: AtomicUsize::new(0),
        })
    }

    fn denying() -> Arc<Self> {
        Arc::new(Self {
            allow: false,
            fail: false,
            pushes: AtomicUsize::new(0),
        })
    }

    fn failing() -> Arc<Self> {
        Arc::new(Self {
            allow: true,
            fail: true,
            pushes: AtomicUsize::new(0),
        })
    }

    fn pushes(&self) -> usize {
        self.pushes.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl MfaProvider for ScriptedMfa {
    async fn push(&self, _: &str, _: &str, _: &str) -> Result<ProviderResponse, MfaError> {
        self.pushes.fetch_add(1, Ordering::SeqCst);
        if self.fail {
            return Err(MfaError::Http("connection reset by peer".into()));
        }
        Ok(ProviderResponse {
            allowed: self.allow,
            transaction_id: Some("txid-42".into()),
            status_message: Some(
                (if self.allow { "Success" } else { "Login request denied." }).to_string(),
            ),
        })
    }

    async fn poll(&self, _: &str) -> Result<bool, MfaError> {
        Ok(self.allow)
    }

    fn default_user(&self) -> &str {
        "netops"
    }
}

fn args() -> Value {
    json!({"mac": "aa:bb:cc:dd:ee:ff"})
}

fn new_action(tool: &str, level: RiskLevel) -> NewAction {
    NewAction {
        tool_name: tool.into(),
        tool_args: args(),
        requester_identity: "U_ALICE".into(),
        origin_context: OriginContext::new(json!({"channel": "C_NETOPS", "thread_ts": "1700.01"})),
        risk_level: level,
        description: format!("{tool} aa:bb:cc:dd:ee:ff"),
        impact: "test impact".into(),
    }
}

fn engine_with(stepup: StepUpAuthenticator) -> (ConfirmationEngine, Arc<ManualClock>) {
    let clock = Arc::new(ManualClock::default());
    let store = Arc::new(PendingActionStore::with_clock(
        Duration::minutes(5),
        clock.clone(),
    ));
    (ConfirmationEngine::new(store, stepup), clock)
}

fn with_mfa(provider: Arc<ScriptedMfa>) -> StepUpAuthenticator {
    StepUpAuthenticator::new(provider, StdDuration::from_secs(10))
}

// ── Round trip ──

#[tokio::test]
async fn confirm_then_validate_returns_exact_args() {
    let (engine, _) = engine_with(StepUpAuthenticator::disabled());
    let action = engine.request(new_action("block_client", RiskLevel::Moderate));

    let token = engine.confirm(&action.action_id, "U_ALICE").await.unwrap();
    let released = engine.validate_token("block_client", token.as_str()).unwrap();
    assert_eq!(released, args());
}

#[tokio::test]
async fn moderate_scenario_wrong_tool_then_right_tool() {
    let (engine, _) = engine_with(StepUpAuthenticator::disabled());
    let action = engine.request(new_action("block_client", RiskLevel::Moderate));
    let token = engine.confirm(&action.action_id, "U_ALICE").await.unwrap();

    let wrong = engine.validate_token("forget_device", token.as_str());
    assert!(matches!(wrong, Err(ApprovalError::InvalidToken { .. })));

    assert_eq!(
        engine.validate_token("block_client", token.as_str()).unwrap(),
        args()
    );
    assert!(engine.list_pending(None).is_empty());
}

// ── Token invariants ──

#[tokio::test]
async fn token_is_single_use() {
    let (engine, _) = engine_with(StepUpAuthenticator::disabled());
    let action = engine.request(new_action("kick_client", RiskLevel::Moderate));
    let token = engine.confirm(&action.action_id, "U_ALICE").await.unwrap();

    assert!(engine.validate_token("kick_client", token.as_str()).is_ok());
    assert!(matches!(
        engine.validate_token("kick_client", token.as_str()),
        Err(ApprovalError::InvalidToken { .. })
    ));
}

#[tokio::test]
async fn token_never_changes_after_issue() {
    let (engine, _) = engine_with(StepUpAuthenticator::disabled());
    let action = engine.request(new_action("kick_client", RiskLevel::Moderate));
    let token = engine.confirm(&action.action_id, "U_ALICE").await.unwrap();

    let err = engine.confirm(&action.action_id, "U_ALICE").await.unwrap_err();
    assert!(matches!(err, ApprovalError::AlreadyConfirmed { .. }));

    let stored = engine.get(&action.action_id).unwrap();
    assert_eq!(stored.confirm_token(), Some(&token));
}

// ── Authorization ──

#[tokio::test]
async fn non_requester_cannot_confirm_and_nothing_changes() {
    let provider = ScriptedMfa::allowing();
    let (engine, _) = engine_with(with_mfa(provider.clone()));
    let action = engine.request(new_action("forget_device", RiskLevel::Critical));

    let err = engine.confirm(&action.action_id, "U_MALLORY").await.unwrap_err();
    assert!(matches!(err, ApprovalError::Unauthorized { .. }));
    assert_eq!(err.user_message(), "Only the original requester can confirm this action.");

    let after = engine.get(&action.action_id).unwrap();
    assert_eq!(after, action);
    assert_eq!(after.stage, ActionStage::Created);
    assert_eq!(provider.pushes(), 0);
}

#[tokio::test]
async fn deny_policy_requester_only_is_enforced() {
    let (engine, _) = engine_with(StepUpAuthenticator::disabled());
    let action = engine.request(new_action("block_client", RiskLevel::Moderate));

    assert!(matches!(
        engine.deny(&action.action_id, "U_BOB"),
        Err(ApprovalError::Unauthorized { .. })
    ));
    assert!(engine.get(&action.action_id).is_ok());

    engine.deny(&action.action_id, "U_ALICE").unwrap();
    assert!(engine.get(&action.action_id).is_err());
}

#[tokio::test]
async fn deny_policy_any_participant_allows_bystander() {
    let (engine, _) = engine_with(StepUpAuthenticator::disabled());
    let engine = engine.with_deny_policy(DenyPolicy::AnyParticipant);
    let action = engine.request(new_action("block_client", RiskLevel::Moderate));

    engine.deny(&action.action_id, "U_BOB").unwrap();
    let err = engine.confirm(&action.action_id, "U_ALICE").await.unwrap_err();
    assert!(matches!(err, ApprovalError::NotFoundOrExpired { .. }));
}

#[tokio::test]
async fn deny_after_token_issued_cancels_the_approval() {
    let (engine, _) = engine_with(StepUpAuthenticator::disabled());
    let action = engine.request(new_action("reboot_device", RiskLevel::Dangerous));
    let token = engine.confirm(&action.action_id, "U_ALICE").await.unwrap();
    assert_eq!(
        engine.get(&action.action_id).unwrap().stage,
        ActionStage::Approved
    );

    engine.deny(&action.action_id, "U_ALICE").unwrap();
    assert!(matches!(
        engine.validate_token("reboot_device", token.as_str()),
        Err(ApprovalError::InvalidToken { .. })
    ));
}

// ── Step-up ──

#[tokio::test]
async fn critical_with_mfa_denied_removes_action_and_mints_nothing() {
    let provider = ScriptedMfa::denying();
    let (engine, _) = engine_with(with_mfa(provider.clone()));
    let action = engine.request(new_action("forget_device", RiskLevel::Critical));

    let err = engine.confirm(&action.action_id, "U_ALICE").await.unwrap_err();
    assert!(matches!(err, ApprovalError::MfaDenied { .. }));
    assert!(err.terminates_action());
    assert_eq!(provider.pushes(), 1);

    assert!(engine.get(&action.action_id).is_err());
    assert!(engine.list_pending(None).is_empty());
}

#[tokio::test]
async fn provider_failure_is_fail_closed() {
    let provider = ScriptedMfa::failing();
    let (engine, _) = engine_with(with_mfa(provider.clone()));
    let action = engine.request(new_action("reboot_device", RiskLevel::Dangerous));

    let err = engine.confirm(&action.action_id, "U_ALICE").await.unwrap_err();
    match err {
        ApprovalError::MfaUnavailable { reason, .. } => assert!(reason.contains("connection reset")),
        other => panic!("expected MfaUnavailable, got {other:?}"),
    }
    assert!(engine.get(&action.action_id).is_err());
}

#[tokio::test]
async fn mfa_approved_action_carries_transaction_id() {
    let provider = ScriptedMfa::allowing();
    let (engine, _) = engine_with(with_mfa(provider.clone()));
    let action = engine.request(new_action("reboot_device", RiskLevel::Dangerous));

    let token = engine.confirm(&action.action_id, "U_ALICE").await.unwrap();
    let stored = engine.get(&action.action_id).unwrap();
    assert!(stored.mfa_approved);
    assert_eq!(stored.mfa_transaction_id.as_deref(), Some("txid-42"));
    assert_eq!(stored.stage, ActionStage::Approved);

    assert_eq!(
        engine.validate_token("reboot_device", token.as_str()).unwrap(),
        args()
    );
}

#[tokio::test]
async fn step_up_disabled_falls_back_to_confirmation_only() {
    let (engine, _) = engine_with(StepUpAuthenticator::disabled());
    let action = engine.request(new_action("forget_device", RiskLevel::Critical));
    assert!(!engine.requires_step_up(RiskLevel::Critical));

    engine.confirm(&action.action_id, "U_ALICE").await.unwrap();
    assert!(!engine.get(&action.action_id).unwrap().mfa_approved);
}

// ── Expiry ──

#[tokio::test]
async fn expired_action_reads_as_not_found() {
    let (engine, clock) = engine_with(StepUpAuthenticator::disabled());
    let action = engine.request(new_action("block_client", RiskLevel::Moderate));
    let token = engine.confirm(&action.action_id, "U_ALICE").await.unwrap();

    clock.advance(Duration::minutes(5) + Duration::seconds(1));

    assert!(matches!(
        engine.get(&action.action_id),
        Err(ApprovalError::NotFoundOrExpired { .. })
    ));
    assert!(matches!(
        engine.validate_token("block_client", token.as_str()),
        Err(ApprovalError::InvalidToken { .. })
    ));
}

#[tokio::test]
async fn deny_after_expiry_is_not_found_under_either_policy() {
    for policy in [DenyPolicy::RequesterOnly, DenyPolicy::AnyParticipant] {
        let (engine, clock) = engine_with(StepUpAuthenticator::disabled());
        let engine = engine.with_deny_policy(policy);
        let action = engine.request(new_action("block_client", RiskLevel::Moderate));

        clock.advance(Duration::minutes(6));

        for identity in ["U_ALICE", "U_BOB"] {
            let err = engine.deny(&action.action_id, identity).unwrap_err();
            assert!(
                matches!(err, ApprovalError::NotFoundOrExpired { .. }),
                "{policy} / {identity}: {err:?}"
            );
        }
        assert!(engine.store().is_empty());
    }
}

#[tokio::test]
async fn expiry_is_absolute_from_creation() {
    let (engine, clock) = engine_with(StepUpAuthenticator::disabled());
    let action = engine.request(new_action("block_client", RiskLevel::Moderate));

    clock.advance(Duration::minutes(4));
    engine.confirm(&action.action_id, "U_ALICE").await.unwrap();
    assert_eq!(
        engine.get(&action.action_id).unwrap().expires_at,
        action.expires_at
    );

    clock.advance(Duration::minutes(2));
    assert!(engine.get(&action.action_id).is_err());
}

#[tokio::test]
async fn one_second_ttl_with_real_time() {
    let store = Arc::new(PendingActionStore::new(Duration::seconds(1)));
    let engine = ConfirmationEngine::new(store, StepUpAuthenticator::disabled());
    let action = engine.request(new_action("block_client", RiskLevel::Moderate));

    tokio::time::sleep(StdDuration::from_millis(1_200)).await;

    let err = engine.confirm(&action.action_id, "U_ALICE").await.unwrap_err();
    assert!(matches!(err, ApprovalError::NotFoundOrExpired { .. }));
    assert_eq!(err.user_message(), "Action expired or not found.");
    assert!(engine.validate_token("block_client", "anything").is_err());
}

// ── Listing ──

#[tokio::test]
async fn list_pending_filters_by_requester_in_creation_order() {
    let (engine, clock) = engine_with(StepUpAuthenticator::disabled());
    let first = engine.request(new_action("block_client", RiskLevel::Moderate));
    let mut other = new_action("kick_client", RiskLevel::Moderate);
    other.requester_identity = "U_BOB".into();
    engine.request(other);
    clock.advance(Duration::seconds(1));
    let third = engine.request(new_action("reboot_device", RiskLevel::Dangerous));

    let mine: Vec<_> = engine
        .list_pending(Some("U_ALICE"))
        .into_iter()
        .map(|a| a.action_id)
        .collect();
    assert_eq!(mine, vec![first.action_id, third.action_id]);
    assert_eq!(engine.list_pending(None).len(), 3);
}
