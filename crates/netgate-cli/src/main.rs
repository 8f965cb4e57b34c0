//! netgate - operator CLI for the network command approval gate.
//!
//! ## Commands
//!
//! - `classify`: show the risk decision for a command without running it
//! - `console`: drive a gate over line-delimited JSON on stdin/stdout
//! - `mfa-check`: send one Duo push to verify step-up credentials

mod console;

use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use serde_json::{json, Value};
use tracing::{info, Level};

use netgate_core::telemetry::{init_tracing, parse_level};
use netgate_core::{
    classify, ttl_from_minutes, ActionId, CommandGate, DenyPolicy, DuoClient, GateConfig,
    StepUpAuthenticator, METRICS,
};

use crate::console::DryRunExecutor;

/// Interval between background sweeps of expired actions.
const SWEEP_INTERVAL: Duration = Duration::from_secs(30);

#[derive(Parser)]
#[command(name = "netgate")]
#[command(author = "Stevedores Org")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Approval gate for AI-issued network admin commands", long_about = None)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Emit JSON-formatted log lines
    #[arg(long, global = true)]
    json: bool,

    /// Log format; `json` is equivalent to --json
    #[arg(long, global = true, env = "LOG_FORMAT", hide = true)]
    log_format: Option<String>,

    /// Default log level when RUST_LOG is unset
    #[arg(long, global = true, env = "LOG_LEVEL")]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Classify a command and print the risk decision as JSON
    Classify {
        /// Tool name, e.g. `reboot_device`
        tool: String,

        /// Arguments as a JSON object
        #[arg(short, long, default_value = "{}")]
        args: String,
    },

    /// Run an interactive gate reading JSON requests from stdin
    Console {
        /// Pending action lifetime in minutes
        #[arg(long)]
        ttl_minutes: Option<i64>,

        /// Who may cancel a pending action
        #[arg(long, value_parser = parse_deny_policy)]
        deny_policy: Option<DenyPolicy>,

        /// Disable step-up even when Duo credentials are present
        #[arg(long)]
        no_mfa: bool,
    },

    /// Send a single Duo push to verify step-up configuration
    MfaCheck {
        /// Text shown in the push
        #[arg(short, long, default_value = "netgate MFA check")]
        description: String,

        /// Poll the transaction status afterwards
        #[arg(long)]
        poll: bool,
    },
}

fn parse_deny_policy(raw: &str) -> std::result::Result<DenyPolicy, String> {
    raw.parse::<DenyPolicy>().map_err(|e| e.to_string())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let level = if cli.verbose {
        Level::DEBUG
    } else {
        parse_level(cli.log_level.as_deref())
    };
    let json_logs = cli.json || cli.log_format.as_deref() == Some("json");
    init_tracing(json_logs, level);

    match cli.command {
        Commands::Classify { tool, args } => cmd_classify(&tool, &args),
        Commands::Console {
            ttl_minutes,
            deny_policy,
            no_mfa,
        } => cmd_console(ttl_minutes, deny_policy, no_mfa).await,
        Commands::MfaCheck { description, poll } => cmd_mfa_check(&description, poll).await,
    }
}

fn cmd_classify(tool: &str, raw_args: &str) -> Result<()> {
    let args: Value = serde_json::from_str(raw_args).context("--args must be a JSON object")?;
    let decision = classify(tool, &args).map_err(|e| anyhow::anyhow!(e.user_message()))?;
    println!("{}", serde_json::to_string_pretty(&decision)?);
    Ok(())
}

fn load_config(
    ttl_minutes: Option<i64>,
    deny_policy: Option<DenyPolicy>,
    no_mfa: bool,
) -> Result<GateConfig> {
    let mut config = GateConfig::from_env().context("invalid gate configuration")?;
    if let Some(minutes) = ttl_minutes {
        config.ttl = chrono_minutes(minutes)?;
    }
    if let Some(policy) = deny_policy {
        config.deny_policy = policy;
    }
    if no_mfa {
        config.mfa = None;
    }
    config.validate().context("invalid gate configuration")?;
    Ok(config)
}

fn chrono_minutes(minutes: i64) -> Result<chrono::Duration> {
    ttl_from_minutes(minutes).map_err(|e| anyhow::anyhow!("--ttl-minutes: {e}"))
}

async fn cmd_console(
    ttl_minutes: Option<i64>,
    deny_policy: Option<DenyPolicy>,
    no_mfa: bool,
) -> Result<()> {
    let config = load_config(ttl_minutes, deny_policy, no_mfa)?;
    info!(
        ttl_secs = config.ttl.num_seconds(),
        step_up = config.step_up_enabled(),
        deny_policy = %config.deny_policy,
        "starting netgate console"
    );

    let gate = Arc::new(
        CommandGate::from_config(&config, DryRunExecutor).context("failed to build gate")?,
    );

    let sweeper = {
        let gate = gate.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(SWEEP_INTERVAL);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                gate.engine().cleanup_expired();
                METRICS.flush();
            }
        })
    };

    let result = console::run(gate, tokio::io::stdin(), tokio::io::stdout()).await;

    sweeper.abort();
    METRICS.flush();
    result
}

async fn cmd_mfa_check(description: &str, poll: bool) -> Result<()> {
    let config = GateConfig::from_env().context("invalid gate configuration")?;
    let Some(duo) = config.mfa.clone() else {
        bail!(
            "Duo is not configured; set DUO_INTEGRATION_KEY, DUO_SECRET_KEY, DUO_API_HOST and DUO_MFA_USER"
        );
    };
    info!(api_host = %duo.api_host, user = %duo.mfa_user, "sending test push");

    let client = DuoClient::new(duo, config.mfa_timeout + Duration::from_secs(5))
        .context("failed to build Duo client")?;
    let stepup = StepUpAuthenticator::new(Arc::new(client), config.mfa_timeout);

    let correlation_id = ActionId::generate();
    let outcome = stepup
        .send_push(description, correlation_id.as_str())
        .await;

    let polled = match (&outcome.transaction_id, poll) {
        (Some(txid), true) => Some(stepup.check_status(txid).await),
        _ => None,
    };

    println!(
        "{}",
        serde_json::to_string_pretty(&json!({
            "correlation_id": correlation_id,
            "approved": outcome.approved,
            "transaction_id": outcome.transaction_id,
            "failure": outcome.failure,
            "polled_status": polled,
        }))?
    );

    if !outcome.approved {
        bail!("step-up push was not approved");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ttl_minutes_out_of_range_is_an_error() {
        assert!(chrono_minutes(0).is_err());
        assert!(chrono_minutes(i64::MAX).is_err());
        assert_eq!(chrono_minutes(10).unwrap(), chrono::Duration::minutes(10));
    }
}
