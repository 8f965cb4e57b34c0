//! Risk tiers and the classification table for administrative commands.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::command::AdminCommand;
use crate::error::ApprovalResult;

/// Risk tier assigned to an administrative command.
///
/// Higher tiers require more stringent approval workflows.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RiskTier {
    /// Executes immediately without confirmation.
    None,
    /// Requester confirmation required.
    Moderate,
    /// Confirmation plus step-up authentication when configured.
    Dangerous,
    /// Confirmation plus step-up authentication when configured.
    Critical,
}

impl RiskTier {
    /// Whether a pending action must be created for this tier.
    pub fn requires_confirmation(self) -> bool {
        self != Self::None
    }

    /// The pending-action risk level, or `None` for commands that run
    /// without confirmation.
    pub fn pending_level(self) -> Option<RiskLevel> {
        match self {
            Self::None => None,
            Self::Moderate => Some(RiskLevel::Moderate),
            Self::Dangerous => Some(RiskLevel::Dangerous),
            Self::Critical => Some(RiskLevel::Critical),
        }
    }
}

impl std::fmt::Display for RiskTier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::None => write!(f, "none"),
            Self::Moderate => write!(f, "moderate"),
            Self::Dangerous => write!(f, "dangerous"),
            Self::Critical => write!(f, "critical"),
        }
    }
}

/// Risk level carried by a pending action. Commands below `moderate`
/// never create one, so the type has no `none` case.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RiskLevel {
    Moderate,
    Dangerous,
    Critical,
}

impl RiskLevel {
    /// Whether this level escalates to step-up authentication.
    pub fn is_step_up_eligible(self) -> bool {
        matches!(self, Self::Dangerous | Self::Critical)
    }

    /// Badge shown next to the description in approval prompts.
    pub fn badge(self) -> &'static str {
        match self {
            Self::Moderate => ":warning:",
            Self::Dangerous => ":rotating_light:",
            Self::Critical => ":skull_and_crossbones:",
        }
    }
}

impl std::fmt::Display for RiskLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", RiskTier::from(*self))
    }
}

impl From<RiskLevel> for RiskTier {
    fn from(level: RiskLevel) -> Self {
        match level {
            RiskLevel::Moderate => Self::Moderate,
            RiskLevel::Dangerous => Self::Dangerous,
            RiskLevel::Critical => Self::Critical,
        }
    }
}

/// Outcome of classifying a command.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RiskDecision {
    pub tier: RiskTier,
    /// What the command does, in one line.
    pub description: String,
    /// What the operator should expect to happen.
    pub impact: String,
}

impl RiskDecision {
    fn new(tier: RiskTier, description: impl Into<String>, impact: impl Into<String>) -> Self {
        Self {
            tier,
            description: description.into(),
            impact: impact.into(),
        }
    }
}

/// Classify a raw `(tool_name, params)` pair.
///
/// Unknown tool names and malformed arguments are reported as errors; a
/// known command always yields a decision.
pub fn classify(tool_name: &str, params: &Value) -> ApprovalResult<RiskDecision> {
    AdminCommand::parse(tool_name, params).map(|cmd| classify_command(&cmd))
}

/// Classify an already-validated command. Pure and deterministic.
///
/// | Command                       | Tier                                   |
/// |-------------------------------|----------------------------------------|
/// | locate_device                 | none                                   |
/// | unblock_client                | none                                   |
/// | block_client, kick_client     | moderate                               |
/// | set_wlan_enabled              | none (enable) / moderate (disable)     |
/// | set_firewall_rule_enabled     | moderate (enable) / dangerous (disable)|
/// | reboot_device                 | dangerous                              |
/// | power_cycle_port              | dangerous                              |
/// | upgrade_device_firmware       | dangerous                              |
/// | set_wlan_password             | dangerous                              |
/// | forget_device                 | critical                               |
pub fn classify_command(command: &AdminCommand) -> RiskDecision {
    match command {
        AdminCommand::LocateDevice { mac, enabled } => RiskDecision::new(
            RiskTier::None,
            format!(
                "{} locate LED on device {mac}",
                if *enabled { "Enable" } else { "Disable" }
            ),
            "The device LED blinks; no traffic is affected.",
        ),
        AdminCommand::UnblockClient { mac } => RiskDecision::new(
            RiskTier::None,
            format!("Unblock client {mac}"),
            "The client may reconnect to the network.",
        ),
        AdminCommand::BlockClient { mac } => RiskDecision::new(
            RiskTier::Moderate,
            format!("Block client {mac}"),
            "The client is disconnected and cannot rejoin until unblocked.",
        ),
        AdminCommand::KickClient { mac } => RiskDecision::new(
            RiskTier::Moderate,
            format!("Disconnect client {mac}"),
            "The client drops its connection and must re-associate.",
        ),
        AdminCommand::SetWlanEnabled { wlan_id, enabled } => {
            if *enabled {
                RiskDecision::new(
                    RiskTier::None,
                    format!("Enable WLAN {wlan_id}"),
                    "The SSID starts broadcasting.",
                )
            } else {
                RiskDecision::new(
                    RiskTier::Moderate,
                    format!("Disable WLAN {wlan_id}"),
                    "All clients on this SSID are disconnected.",
                )
            }
        }
        AdminCommand::SetFirewallRuleEnabled { rule_id, enabled } => {
            if *enabled {
                RiskDecision::new(
                    RiskTier::Moderate,
                    format!("Enable firewall rule {rule_id}"),
                    "Traffic matching the rule is filtered immediately.",
                )
            } else {
                RiskDecision::new(
                    RiskTier::Dangerous,
                    format!("Disable firewall rule {rule_id}"),
                    "Traffic the rule was blocking is allowed through.",
                )
            }
        }
        AdminCommand::RebootDevice { mac } => RiskDecision::new(
            RiskTier::Dangerous,
            format!("Reboot device {mac}"),
            "The device is offline for several minutes and its clients lose connectivity.",
        ),
        AdminCommand::PowerCyclePort { mac, port_idx } => RiskDecision::new(
            RiskTier::Dangerous,
            format!("Power-cycle port {port_idx} on switch {mac}"),
            "The PoE device on this port loses power and restarts.",
        ),
        AdminCommand::UpgradeDeviceFirmware { mac } => RiskDecision::new(
            RiskTier::Dangerous,
            format!("Upgrade firmware on device {mac}"),
            "The device reboots during the upgrade; a failed upgrade may need manual recovery.",
        ),
        AdminCommand::SetWlanPassword { wlan_id, .. } => RiskDecision::new(
            RiskTier::Dangerous,
            format!("Change the password of WLAN {wlan_id}"),
            "Every client on this SSID must re-authenticate with the new password.",
        ),
        AdminCommand::ForgetDevice { mac } => RiskDecision::new(
            RiskTier::Critical,
            format!("Forget device {mac}"),
            "The device is removed from the controller and must be factory reset and re-adopted.",
        ),
    }
}
