//! Approval gate for network administration commands issued by an AI
//! assistant.
//!
//! Every command is classified into a risk tier. Risky commands become
//! short-lived pending actions that the requester must confirm; the most
//! dangerous ones additionally need an out-of-band Duo push. Confirmation
//! mints a single-use token that authorizes exactly one execution of the
//! exact arguments that were approved.

pub mod action;
pub mod clock;
pub mod command;
pub mod config;
pub mod engine;
pub mod error;
pub mod gate;
pub mod metrics;
pub mod obs;
pub mod render;
pub mod risk;
pub mod stepup;
pub mod store;
pub mod telemetry;

pub use action::{ActionId, ActionStage, ConfirmToken, NewAction, OriginContext, PendingAction};
pub use clock::{Clock, ManualClock, SystemClock};
pub use command::{confirm_token_of, AdminCommand, CONFIRM_TOKEN_FIELD, KNOWN_COMMANDS};
pub use config::{ttl_from_minutes, DenyPolicy, GateConfig, MAX_TTL_MINUTES};
pub use engine::ConfirmationEngine;
pub use error::{ApprovalError, ApprovalResult};
pub use gate::{ApprovalReply, ApprovalRequest, CommandExecutor, CommandGate, GateOutcome};
pub use metrics::{MetricsSnapshot, METRICS};
pub use render::{render, ApprovalPrompt, Control, ControlKind};
pub use risk::{classify, classify_command, RiskDecision, RiskLevel, RiskTier};
pub use stepup::{
    DuoClient, DuoConfig, MfaError, MfaProvider, ProviderResponse, PushFailure, PushOutcome,
    StepUpAuthenticator,
};
pub use store::PendingActionStore;

/// Crate version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
