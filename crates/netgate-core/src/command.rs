//! Typed administrative commands.
//!
//! The assistant hands commands to the gate as a `(tool_name, args)` pair
//! where `args` is a JSON object. [`AdminCommand::parse`] validates that
//! pair into one variant per command. The pending-action store never looks
//! inside the arguments; only the executor boundary does.

use std::sync::OnceLock;

use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{ApprovalError, ApprovalResult};

/// Argument key carrying a confirmation token on resubmission.
pub const CONFIRM_TOKEN_FIELD: &str = "confirm_token";

/// Every tool name the gate knows how to classify.
pub const KNOWN_COMMANDS: &[&str] = &[
    "locate_device",
    "unblock_client",
    "block_client",
    "kick_client",
    "set_wlan_enabled",
    "set_firewall_rule_enabled",
    "reboot_device",
    "power_cycle_port",
    "upgrade_device_firmware",
    "set_wlan_password",
    "forget_device",
];

/// An administrative command against the network controller.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "tool", content = "args", rename_all = "snake_case")]
pub enum AdminCommand {
    /// Blink the locate LED on a device.
    LocateDevice { mac: String, enabled: bool },
    /// Restore network access for a blocked client.
    UnblockClient { mac: String },
    /// Block a client from the network.
    BlockClient { mac: String },
    /// Disconnect a client, forcing it to reconnect.
    KickClient { mac: String },
    /// Enable or disable a WLAN (SSID).
    SetWlanEnabled { wlan_id: String, enabled: bool },
    /// Enable or disable a firewall rule.
    SetFirewallRuleEnabled { rule_id: String, enabled: bool },
    /// Reboot a device.
    RebootDevice { mac: String },
    /// Power-cycle a PoE port on a switch.
    PowerCyclePort { mac: String, port_idx: u32 },
    /// Upgrade device firmware to the latest release.
    UpgradeDeviceFirmware { mac: String },
    /// Change the WPA passphrase of a WLAN.
    SetWlanPassword { wlan_id: String, passphrase: String },
    /// Remove (un-adopt) a device from the controller.
    ForgetDevice { mac: String },
}

impl AdminCommand {
    /// Parse and validate a `(tool_name, args)` pair.
    ///
    /// A `confirm_token` key in `args` is ignored here; it belongs to the
    /// gate, not to the command.
    pub fn parse(tool_name: &str, args: &Value) -> ApprovalResult<Self> {
        if !KNOWN_COMMANDS.contains(&tool_name) {
            return Err(ApprovalError::UnknownCommand {
                tool_name: tool_name.to_string(),
            });
        }

        let args = match args {
            Value::Null => Value::Object(Default::default()),
            Value::Object(map) => {
                let mut map = map.clone();
                map.remove(CONFIRM_TOKEN_FIELD);
                Value::Object(map)
            }
            other => {
                return Err(ApprovalError::InvalidArguments {
                    tool_name: tool_name.to_string(),
                    reason: format!("expected an object, got {other}"),
                })
            }
        };

        let tagged = serde_json::json!({ "tool": tool_name, "args": args });
        let command: Self =
            serde_json::from_value(tagged).map_err(|e| ApprovalError::InvalidArguments {
                tool_name: tool_name.to_string(),
                reason: e.to_string(),
            })?;
        command.validate()?;
        Ok(command)
    }

    /// The tool name this command was parsed from.
    pub fn tool_name(&self) -> &'static str {
        match self {
            Self::LocateDevice { .. } => "locate_device",
            Self::UnblockClient { .. } => "unblock_client",
            Self::BlockClient { .. } => "block_client",
            Self::KickClient { .. } => "kick_client",
            Self::SetWlanEnabled { .. } => "set_wlan_enabled",
            Self::SetFirewallRuleEnabled { .. } => "set_firewall_rule_enabled",
            Self::RebootDevice { .. } => "reboot_device",
            Self::PowerCyclePort { .. } => "power_cycle_port",
            Self::UpgradeDeviceFirmware { .. } => "upgrade_device_firmware",
            Self::SetWlanPassword { .. } => "set_wlan_password",
            Self::ForgetDevice { .. } => "forget_device",
        }
    }

    /// The argument object for this command, without the tool tag.
    pub fn to_args(&self) -> Value {
        serde_json::to_value(self)
            .ok()
            .and_then(|mut v| v.get_mut("args").map(Value::take))
            .unwrap_or(Value::Null)
    }

    fn validate(&self) -> ApprovalResult<()> {
        let invalid = |reason: String| ApprovalError::InvalidArguments {
            tool_name: self.tool_name().to_string(),
            reason,
        };

        match self {
            Self::LocateDevice { mac, .. }
            | Self::UnblockClient { mac }
            | Self::BlockClient { mac }
            | Self::KickClient { mac }
            | Self::RebootDevice { mac }
            | Self::PowerCyclePort { mac, .. }
            | Self::UpgradeDeviceFirmware { mac }
            | Self::ForgetDevice { mac } => {
                if !is_mac_address(mac) {
                    return Err(invalid(format!("'{mac}' is not a MAC address")));
                }
            }
            Self::SetWlanEnabled { wlan_id, .. } => {
                if wlan_id.trim().is_empty() {
                    return Err(invalid("wlan_id must not be empty".into()));
                }
            }
            Self::SetFirewallRuleEnabled { rule_id, .. } => {
                if rule_id.trim().is_empty() {
                    return Err(invalid("rule_id must not be empty".into()));
                }
            }
            Self::SetWlanPassword {
                wlan_id,
                passphrase,
            } => {
                if wlan_id.trim().is_empty() {
                    return Err(invalid("wlan_id must not be empty".into()));
                }
                // WPA-PSK passphrases are 8..=63 printable ASCII characters.
                let len = passphrase.chars().count();
                let printable = passphrase
                    .chars()
                    .all(|c| c.is_ascii_graphic() || c == ' ');
                if !(8..=63).contains(&len) || !printable {
                    return Err(invalid(
                        "passphrase must be 8-63 printable ASCII characters".into(),
                    ));
                }
            }
        }
        Ok(())
    }
}

fn is_mac_address(value: &str) -> bool {
    static MAC: OnceLock<Option<Regex>> = OnceLock::new();
    MAC.get_or_init(|| Regex::new(r"^[0-9A-Fa-f]{2}([:-][0-9A-Fa-f]{2}){5}$").ok())
        .as_ref()
        .is_some_and(|re| re.is_match(value))
}

/// Extract a confirmation token from a resubmitted argument bag, if any.
pub fn confirm_token_of(args: &Value) -> Option<&str> {
    args.get(CONFIRM_TOKEN_FIELD)
        .and_then(Value::as_str)
        .filter(|t| !t.is_empty())
}
