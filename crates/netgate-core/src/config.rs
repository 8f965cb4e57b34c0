//! Environment-driven configuration for the approval gate.

use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{ApprovalError, ApprovalResult};
use crate::stepup::{DuoConfig, DEFAULT_PUSH_TIMEOUT};
use crate::store::DEFAULT_TTL_MINUTES;

/// Longest lifetime a pending action may be configured with.
pub const MAX_TTL_MINUTES: i64 = 24 * 60;

/// Default bound on a single executor call.
pub const DEFAULT_COMMAND_TIMEOUT: Duration = Duration::from_millis(30_000);

/// Who may cancel a pending action.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DenyPolicy {
    /// Only the identity that issued the command may cancel it.
    #[default]
    RequesterOnly,
    /// Anyone who can see the approval prompt may cancel it.
    AnyParticipant,
}

impl FromStr for DenyPolicy {
    type Err = ApprovalError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "requester_only" | "requester" => Ok(Self::RequesterOnly),
            "any_participant" | "any" => Ok(Self::AnyParticipant),
            other => Err(ApprovalError::Config(format!(
                "DENY_POLICY must be requester_only or any_participant, got {other:?}"
            ))),
        }
    }
}

impl std::fmt::Display for DenyPolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::RequesterOnly => write!(f, "requester_only"),
            Self::AnyParticipant => write!(f, "any_participant"),
        }
    }
}

/// Everything needed to wire a gate together.
#[derive(Debug, Clone, PartialEq)]
pub struct GateConfig {
    /// Lifetime of a pending action.
    pub ttl: chrono::Duration,
    /// Step-up credentials; `None` disables step-up globally.
    pub mfa: Option<DuoConfig>,
    /// Bound on one push round-trip. Strictly smaller than `ttl`.
    pub mfa_timeout: Duration,
    pub deny_policy: DenyPolicy,
    pub command_timeout: Duration,
}

impl Default for GateConfig {
    fn default() -> Self {
        Self {
            ttl: chrono::Duration::minutes(DEFAULT_TTL_MINUTES),
            mfa: None,
            mfa_timeout: DEFAULT_PUSH_TIMEOUT,
            deny_policy: DenyPolicy::default(),
            command_timeout: DEFAULT_COMMAND_TIMEOUT,
        }
    }
}

impl GateConfig {
    /// Load from the process environment.
    ///
    /// Reads `CONFIRMATION_TTL_MINUTES`, `MFA_TIMEOUT_SECS`, `DENY_POLICY`,
    /// `COMMAND_TIMEOUT_MS` and the `DUO_*` credentials.
    pub fn from_env() -> ApprovalResult<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load from an arbitrary key lookup. Unset keys take their defaults.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> ApprovalResult<Self> {
        let defaults = Self::default();

        let ttl = match parse_num::<i64>(&lookup, "CONFIRMATION_TTL_MINUTES")? {
            Some(m) => ttl_from_minutes(m)?,
            None => defaults.ttl,
        };

        let mfa_timeout = parse_num::<u64>(&lookup, "MFA_TIMEOUT_SECS")?
            .map(Duration::from_secs)
            .unwrap_or(defaults.mfa_timeout);

        let command_timeout = parse_num::<u64>(&lookup, "COMMAND_TIMEOUT_MS")?
            .map(Duration::from_millis)
            .unwrap_or(defaults.command_timeout);

        let deny_policy = match lookup("DENY_POLICY").filter(|s| !s.trim().is_empty()) {
            Some(raw) => raw.parse()?,
            None => defaults.deny_policy,
        };

        let mfa = DuoConfig::from_parts(
            lookup("DUO_INTEGRATION_KEY"),
            lookup("DUO_SECRET_KEY"),
            lookup("DUO_API_HOST"),
            lookup("DUO_MFA_USER"),
        );

        let config = Self {
            ttl,
            mfa,
            mfa_timeout,
            deny_policy,
            command_timeout,
        };
        config.validate()?;
        Ok(config)
    }

    /// Reject combinations the workflow cannot honour.
    pub fn validate(&self) -> ApprovalResult<()> {
        if self.ttl <= chrono::Duration::zero() {
            return Err(ApprovalError::Config("TTL must be positive".into()));
        }
        if self.ttl > chrono::Duration::minutes(MAX_TTL_MINUTES) {
            return Err(ApprovalError::Config(format!(
                "TTL must be at most {MAX_TTL_MINUTES} minutes"
            )));
        }
        if self.mfa_timeout.is_zero() {
            return Err(ApprovalError::Config("MFA timeout must be positive".into()));
        }
        let ttl = self
            .ttl
            .to_std()
            .map_err(|e| ApprovalError::Config(format!("TTL out of range: {e}")))?;
        if self.mfa_timeout >= ttl {
            return Err(ApprovalError::Config(format!(
                "MFA timeout ({}s) must be shorter than the action TTL ({}s)",
                self.mfa_timeout.as_secs(),
                ttl.as_secs()
            )));
        }
        if self.command_timeout.is_zero() {
            return Err(ApprovalError::Config("command timeout must be positive".into()));
        }
        Ok(())
    }

    pub fn step_up_enabled(&self) -> bool {
        self.mfa.is_some()
    }
}

/// Build a pending-action lifetime from a minute count, rejecting zero,
/// negative and out-of-range values.
pub fn ttl_from_minutes(minutes: i64) -> ApprovalResult<chrono::Duration> {
    if !(1..=MAX_TTL_MINUTES).contains(&minutes) {
        return Err(ApprovalError::Config(format!(
            "CONFIRMATION_TTL_MINUTES must be between 1 and {MAX_TTL_MINUTES}, got {minutes}"
        )));
    }
    chrono::Duration::try_minutes(minutes).ok_or_else(|| {
        ApprovalError::Config(format!("CONFIRMATION_TTL_MINUTES out of range: {minutes}"))
    })
}

fn parse_num<T>(lookup: &impl Fn(&str) -> Option<String>, key: &str) -> ApprovalResult<Option<T>>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match lookup(key).filter(|s| !s.trim().is_empty()) {
        Some(raw) => raw
            .trim()
            .parse::<T>()
            .map(Some)
            .map_err(|e| ApprovalError::Config(format!("{key}={raw:?}: {e}"))),
        None => Ok(None),
    }
}
