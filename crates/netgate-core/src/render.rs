//! Approval prompt rendering for the chat/notification collaborator.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::action::PendingAction;

/// Which way a control resolves the action.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ControlKind {
    Approve,
    Deny,
}

/// A button (or equivalent) attached to the prompt. `value` carries the
/// action identifier back through the approval callback.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Control {
    pub kind: ControlKind,
    pub label: String,
    pub value: String,
}

/// Everything a chat surface needs to ask for approval.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApprovalPrompt {
    pub text: String,
    pub approve_control: Control,
    pub deny_control: Control,
    pub ttl_hint: String,
}

/// Render `action` as of `now`. `step_up_required` adds a notice that a
/// push will follow approval.
pub fn render(action: &PendingAction, step_up_required: bool, now: DateTime<Utc>) -> ApprovalPrompt {
    let mut text = format!(
        "{} *{} action requires confirmation*\n*Action:* {}\n*Impact:* {}",
        action.risk_level.badge(),
        capitalize(&action.risk_level.to_string()),
        action.description,
        action.impact,
    );
    if step_up_required {
        text.push_str("\n_Approving will send a Duo push to verify your identity._");
    }

    let value = action.action_id.to_string();
    ApprovalPrompt {
        text,
        approve_control: Control {
            kind: ControlKind::Approve,
            label: "Approve".to_string(),
            value: value.clone(),
        },
        deny_control: Control {
            kind: ControlKind::Deny,
            label: "Deny".to_string(),
            value,
        },
        ttl_hint: ttl_hint(action, now),
    }
}

fn ttl_hint(action: &PendingAction, now: DateTime<Utc>) -> String {
    let secs = action.remaining_at(now).num_seconds();
    if secs <= 0 {
        return "This request has expired.".to_string();
    }
    let minutes = (secs + 59) / 60;
    if minutes <= 1 {
        "This request expires in less than a minute.".to_string()
    } else {
        format!("This request expires in {minutes} minutes.")
    }
}

fn capitalize(s: &str) -> String {
    let mut chars = s.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}
