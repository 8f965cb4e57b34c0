//! Error taxonomy for the approval gate.

/// Errors produced by the confirmation and step-up layer.
///
/// Every variant is an expected outcome that the chat or API layer turns
/// into a short user-visible message via [`ApprovalError::user_message`].
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ApprovalError {
    #[error("pending action not found or expired: {action_id}")]
    NotFoundOrExpired { action_id: String },

    #[error("{identity} is not the requester of action {action_id}")]
    Unauthorized { action_id: String, identity: String },

    #[error("action {action_id} already confirmed")]
    AlreadyConfirmed { action_id: String },

    #[error("step-up authentication already in progress for action {action_id}")]
    StepUpInProgress { action_id: String },

    #[error("step-up authentication denied for action {action_id}")]
    MfaDenied { action_id: String },

    #[error("step-up authentication unavailable for action {action_id}: {reason}")]
    MfaUnavailable { action_id: String, reason: String },

    #[error("unknown command: {tool_name}")]
    UnknownCommand { tool_name: String },

    #[error("invalid arguments for {tool_name}: {reason}")]
    InvalidArguments { tool_name: String, reason: String },

    #[error("invalid or already used confirmation token for {tool_name}")]
    InvalidToken { tool_name: String },

    #[error("{tool_name} failed after approval: {message}")]
    Execution { tool_name: String, message: String },

    #[error("invalid configuration: {0}")]
    Config(String),
}

impl ApprovalError {
    /// Short message suitable for showing to the human in the chat thread.
    pub fn user_message(&self) -> String {
        match self {
            Self::NotFoundOrExpired { .. } => "Action expired or not found.".to_string(),
            Self::Unauthorized { .. } => {
                "Only the original requester can confirm this action.".to_string()
            }
            Self::AlreadyConfirmed { .. } => "Action already confirmed.".to_string(),
            Self::StepUpInProgress { .. } => {
                "A Duo push for this action is already waiting for a response.".to_string()
            }
            Self::MfaDenied { .. } => "Duo MFA verification was denied.".to_string(),
            Self::MfaUnavailable { .. } => {
                "Duo MFA verification failed; the action was cancelled.".to_string()
            }
            Self::UnknownCommand { tool_name } => format!("Unknown command: {tool_name}"),
            Self::InvalidArguments { tool_name, reason } => {
                format!("Invalid arguments for {tool_name}: {reason}")
            }
            Self::InvalidToken { .. } => {
                "Confirmation token is invalid, expired, or already used.".to_string()
            }
            Self::Execution { tool_name, message } => format!(
                "{tool_name} failed: {message}. The approval was used up; \
                 re-issue the command to request a new one."
            ),
            Self::Config(msg) => format!("Configuration error: {msg}"),
        }
    }

    /// Stable machine-readable code, for API and console replies.
    pub fn code(&self) -> &'static str {
        match self {
            Self::NotFoundOrExpired { .. } => "not_found_or_expired",
            Self::Unauthorized { .. } => "unauthorized",
            Self::AlreadyConfirmed { .. } => "already_confirmed",
            Self::StepUpInProgress { .. } => "step_up_in_progress",
            Self::MfaDenied { .. } => "mfa_denied",
            Self::MfaUnavailable { .. } => "mfa_unavailable",
            Self::UnknownCommand { .. } => "unknown_command",
            Self::InvalidArguments { .. } => "invalid_arguments",
            Self::InvalidToken { .. } => "invalid_token",
            Self::Execution { .. } => "execution_failed",
            Self::Config(_) => "config",
        }
    }

    /// Whether the pending action was removed as part of producing this error.
    pub fn terminates_action(&self) -> bool {
        matches!(
            self,
            Self::NotFoundOrExpired { .. } | Self::MfaDenied { .. } | Self::MfaUnavailable { .. }
        )
    }
}

/// Result type for approval operations.
pub type ApprovalResult<T> = std::result::Result<T, ApprovalError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_includes_identifiers() {
        let err = ApprovalError::Unauthorized {
            action_id: "abc".into(),
            identity: "U999".into(),
        };
        let msg = err.to_string();
        assert!(msg.contains("abc"));
        assert!(msg.contains("U999"));
    }

    #[test]
    fn test_user_message_hides_internal_reason() {
        let err = ApprovalError::MfaUnavailable {
            action_id: "abc".into(),
            reason: "HTTP 500 from api-xxxx.duosecurity.com".into(),
        };
        assert!(!err.user_message().contains("duosecurity"));
    }

    #[test]
    fn test_execution_message_mentions_reissue() {
        let err = ApprovalError::Execution {
            tool_name: "reboot_device".into(),
            message: "controller unreachable".into(),
        };
        assert!(err.user_message().contains("re-issue"));
    }

    #[test]
    fn test_codes_are_snake_case() {
        let err = ApprovalError::InvalidToken {
            tool_name: "reboot_device".into(),
        };
        assert_eq!(err.code(), "invalid_token");
        assert_eq!(ApprovalError::Config("x".into()).code(), "config");
    }

    #[test]
    fn test_terminates_action() {
        assert!(ApprovalError::MfaDenied {
            action_id: "a".into()
        }
        .terminates_action());
        assert!(!ApprovalError::Unauthorized {
            action_id: "a".into(),
            identity: "b".into()
        }
        .terminates_action());
    }
}
