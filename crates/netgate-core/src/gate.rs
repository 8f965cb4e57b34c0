//! Executor boundary: the single place commands pass through on their way
//! to the network controller.
//!
//! - tier `none` commands run immediately
//! - a command carrying a `confirm_token` runs with the arguments stored
//!   when approval was requested
//! - anything else is parked as a pending action and returned as
//!   [`GateOutcome::ApprovalRequired`]

use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;
use tracing::{info, warn};

use crate::action::{ActionId, NewAction, OriginContext};
use crate::command::{confirm_token_of, AdminCommand};
use crate::config::GateConfig;
use crate::engine::ConfirmationEngine;
use crate::error::{ApprovalError, ApprovalResult};
use crate::render::{render, ApprovalPrompt};
use crate::risk::{classify_command, RiskLevel, RiskTier};
use crate::stepup::{DuoClient, StepUpAuthenticator};
use crate::store::PendingActionStore;

/// Slack added to the push timeout for the HTTP client's own bound.
const MFA_HTTP_GRACE: Duration = Duration::from_secs(5);

/// Performs a validated command against the network controller.
#[async_trait]
pub trait CommandExecutor: Send + Sync + 'static {
    async fn execute(&self, command: &AdminCommand) -> std::result::Result<Value, String>;
}

#[async_trait]
impl<T: CommandExecutor + ?Sized> CommandExecutor for Arc<T> {
    async fn execute(&self, command: &AdminCommand) -> std::result::Result<Value, String> {
        (**self).execute(command).await
    }
}

/// A command parked until a human approves it.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ApprovalRequest {
    pub action_id: ActionId,
    pub tool_name: String,
    pub args: Value,
    pub risk_level: RiskLevel,
    pub description: String,
    pub impact: String,
    pub step_up_required: bool,
    pub expires_at: DateTime<Utc>,
    pub origin_context: OriginContext,
    pub prompt: ApprovalPrompt,
}

/// Result of passing a command through the gate.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum GateOutcome {
    Executed {
        tool_name: String,
        risk: RiskTier,
        output: Value,
        duration_ms: u64,
    },
    ApprovalRequired(ApprovalRequest),
}

impl GateOutcome {
    pub fn is_executed(&self) -> bool {
        matches!(self, Self::Executed { .. })
    }
}

/// Reply to an approve/deny interaction, for posting back to the thread.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ApprovalReply {
    pub action_id: ActionId,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output: Option<Value>,
}

/// Risk-aware command gate.
pub struct CommandGate<E: CommandExecutor> {
    engine: ConfirmationEngine,
    executor: E,
    command_timeout: Duration,
}

impl<E: CommandExecutor> CommandGate<E> {
    pub fn new(engine: ConfirmationEngine, executor: E, command_timeout: Duration) -> Self {
        Self {
            engine,
            executor,
            command_timeout,
        }
    }

    /// Wire a store, step-up authenticator and engine from configuration.
    pub fn from_config(config: &GateConfig, executor: E) -> ApprovalResult<Self> {
        config.validate()?;

        let stepup = match &config.mfa {
            Some(duo) => {
                let client = DuoClient::new(duo.clone(), config.mfa_timeout + MFA_HTTP_GRACE)
                    .map_err(|e| ApprovalError::Config(format!("Duo client: {e}")))?;
                StepUpAuthenticator::new(Arc::new(client), config.mfa_timeout)
            }
            None => {
                warn!("Duo credentials not configured; step-up authentication disabled");
                StepUpAuthenticator::disabled()
            }
        };

        let store = Arc::new(PendingActionStore::new(config.ttl));
        let engine = ConfirmationEngine::new(store, stepup).with_deny_policy(config.deny_policy);
        Ok(Self::new(engine, executor, config.command_timeout))
    }

    pub fn engine(&self) -> &ConfirmationEngine {
        &self.engine
    }

    /// Pass a command through the gate on behalf of `requester`.
    ///
    /// # Errors
    ///
    /// `UnknownCommand` / `InvalidArguments` for bad input, `InvalidToken`
    /// for a token that does not redeem, `Execution` when the executor
    /// fails or times out.
    pub async fn execute(
        &self,
        tool_name: &str,
        args: &Value,
        requester: &str,
        origin: OriginContext,
    ) -> ApprovalResult<GateOutcome> {
        let command = AdminCommand::parse(tool_name, args)?;
        let decision = classify_command(&command);

        let Some(level) = decision.tier.pending_level() else {
            return self.run(&command, decision.tier).await;
        };

        if let Some(token) = confirm_token_of(args) {
            // Resubmitted arguments are discarded; only what was approved runs.
            let stored = self.engine.validate_token(tool_name, token)?;
            let approved = AdminCommand::parse(tool_name, &stored)?;
            return self.run(&approved, decision.tier).await;
        }

        let action = self.engine.request(NewAction {
            tool_name: tool_name.to_string(),
            tool_args: command.to_args(),
            requester_identity: requester.to_string(),
            origin_context: origin,
            risk_level: level,
            description: decision.description,
            impact: decision.impact,
        });
        let step_up_required = self.engine.requires_step_up(level);
        let prompt = render(&action, step_up_required, self.engine.store().now());

        Ok(GateOutcome::ApprovalRequired(ApprovalRequest {
            action_id: action.action_id,
            tool_name: action.tool_name,
            args: action.tool_args,
            risk_level: action.risk_level,
            description: action.description,
            impact: action.impact,
            step_up_required,
            expires_at: action.expires_at,
            origin_context: action.origin_context,
            prompt,
        }))
    }

    /// Approval callback: confirm, redeem the token and execute.
    pub async fn on_approve(
        &self,
        action_id: &ActionId,
        approver: &str,
    ) -> ApprovalResult<ApprovalReply> {
        let action = self.engine.get(action_id)?;
        let token = self.engine.confirm(action_id, approver).await?;
        let args = self.engine.validate_token(&action.tool_name, token.as_str())?;
        let command = AdminCommand::parse(&action.tool_name, &args)?;

        match self.run(&command, action.risk_level.into()).await? {
            GateOutcome::Executed { output, .. } => Ok(ApprovalReply {
                action_id: action_id.clone(),
                message: format!("Approved and executed: {}", action.description),
                output: Some(output),
            }),
            GateOutcome::ApprovalRequired(_) => Err(ApprovalError::Execution {
                tool_name: action.tool_name,
                message: "command was not executed".into(),
            }),
        }
    }

    /// Denial callback.
    pub fn on_deny(&self, action_id: &ActionId, identity: &str) -> ApprovalResult<ApprovalReply> {
        self.engine.deny(action_id, identity)?;
        Ok(ApprovalReply {
            action_id: action_id.clone(),
            message: format!("Action cancelled by {identity}."),
            output: None,
        })
    }

    async fn run(&self, command: &AdminCommand, risk: RiskTier) -> ApprovalResult<GateOutcome> {
        let tool_name = command.tool_name();
        let started = Instant::now();

        let result = tokio::time::timeout(self.command_timeout, self.executor.execute(command)).await;
        let duration_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);

        match result {
            Ok(Ok(output)) => {
                info!(
                    event = "command.executed",
                    tool_name = %tool_name,
                    risk = %risk,
                    duration_ms = duration_ms,
                );
                Ok(GateOutcome::Executed {
                    tool_name: tool_name.to_string(),
                    risk,
                    output,
                    duration_ms,
                })
            }
            Ok(Err(message)) => {
                warn!(event = "command.failed", tool_name = %tool_name, error = %message);
                Err(ApprovalError::Execution {
                    tool_name: tool_name.to_string(),
                    message,
                })
            }
            Err(_) => {
                let timeout_ms = self.command_timeout.as_millis();
                warn!(event = "command.timeout", tool_name = %tool_name, timeout_ms = timeout_ms as u64);
                Err(ApprovalError::Execution {
                    tool_name: tool_name.to_string(),
                    message: format!("timed out after {timeout_ms}ms"),
                })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::Mutex;

    #[derive(Default)]
    struct Recorder {
        calls: Mutex<Vec<AdminCommand>>,
    }

    #[async_trait]
    impl CommandExecutor for Recorder {
        async fn execute(&self, command: &AdminCommand) -> Result<Value, String> {
            self.calls.lock().unwrap().push(command.clone());
            Ok(json!({"ok": true}))
        }
    }

    fn gate() -> (CommandGate<Arc<Recorder>>, Arc<Recorder>) {
        let recorder = Arc::new(Recorder::default());
        let engine = ConfirmationEngine::new(
            Arc::new(PendingActionStore::default()),
            StepUpAuthenticator::disabled(),
        );
        (
            CommandGate::new(engine, recorder.clone(), Duration::from_secs(5)),
            recorder,
        )
    }

    #[tokio::test]
    async fn test_tier_none_runs_immediately() {
        let (gate, rec) = gate();
        let out = gate
            .execute(
                "locate_device",
                &json!({"mac": "aa:bb:cc:dd:ee:ff", "enabled": true}),
                "U1",
                OriginContext::default(),
            )
            .await
            .unwrap();
        assert!(out.is_executed());
        assert_eq!(rec.calls.lock().unwrap().len(), 1);
        assert!(gate.engine().list_pending(None).is_empty());
    }

    #[tokio::test]
    async fn test_moderate_parks_action() {
        let (gate, rec) = gate();
        let out = gate
            .execute(
                "block_client",
                &json!({"mac": "aa:bb:cc:dd:ee:ff"}),
                "U1",
                OriginContext::default(),
            )
            .await
            .unwrap();
        let GateOutcome::ApprovalRequired(req) = out else {
            panic!("expected approval request");
        };
        assert_eq!(req.risk_level, RiskLevel::Moderate);
        assert!(!req.step_up_required);
        assert_eq!(req.prompt.approve_control.value, req.action_id.as_str());
        assert!(rec.calls.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_unknown_command() {
        let (gate, _) = gate();
        let err = gate
            .execute("format_controller", &json!({}), "U1", OriginContext::default())
            .await
            .unwrap_err();
        assert!(matches!(err, ApprovalError::UnknownCommand { .. }));
    }

    #[tokio::test]
    async fn test_on_approve_executes_once() {
        let (gate, rec) = gate();
        let GateOutcome::ApprovalRequired(req) = gate
            .execute(
                "kick_client",
                &json!({"mac": "aa:bb:cc:dd:ee:ff"}),
                "U1",
                OriginContext::default(),
            )
            .await
            .unwrap()
        else {
            panic!("expected approval request");
        };

        let reply = gate.on_approve(&req.action_id, "U1").await.unwrap();
        assert_eq!(reply.output, Some(json!({"ok": true})));
        assert_eq!(rec.calls.lock().unwrap().len(), 1);

        let again = gate.on_approve(&req.action_id, "U1").await.unwrap_err();
        assert!(matches!(again, ApprovalError::NotFoundOrExpired { .. }));
        assert_eq!(rec.calls.lock().unwrap().len(), 1);
    }
}
