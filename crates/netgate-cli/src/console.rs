//! Line-delimited JSON console over a [`CommandGate`].
//!
//! Each input line is one request tagged by `op`; each reply is one JSON
//! line. Requests run concurrently, so a reply to an `approve` waiting on a
//! Duo push does not hold up other requests.

use std::sync::Arc;

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

use netgate_core::{
    ActionId, AdminCommand, ApprovalError, CommandExecutor, CommandGate, GateOutcome, OriginContext,
    METRICS,
};

/// Executor that logs and echoes commands instead of contacting a controller.
pub struct DryRunExecutor;

#[async_trait]
impl CommandExecutor for DryRunExecutor {
    async fn execute(&self, command: &AdminCommand) -> Result<Value, String> {
        info!(
            event = "command.dry_run",
            tool_name = %command.tool_name(),
            "controller not contacted"
        );
        Ok(json!({
            "dry_run": true,
            "tool": command.tool_name(),
            "args": redacted_args(command),
        }))
    }
}

const REDACTED: &str = "********";

fn redacted_args(command: &AdminCommand) -> Value {
    let mut args = command.to_args();
    mask_passphrase(&mut args);
    args
}

/// Replace a `passphrase` argument before it reaches console output.
fn mask_passphrase(args: &mut Value) {
    if let Some(map) = args.as_object_mut() {
        if map.contains_key("passphrase") {
            map.insert("passphrase".into(), json!(REDACTED));
        }
    }
}

/// One console request.
#[derive(Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum ConsoleRequest {
    Execute {
        tool: String,
        #[serde(default)]
        args: Value,
        requester: String,
        #[serde(default)]
        origin: Value,
    },
    Approve {
        action_id: ActionId,
        identity: String,
    },
    Deny {
        action_id: ActionId,
        identity: String,
    },
    List {
        #[serde(default)]
        requester: Option<String>,
    },
    Sweep,
    Metrics,
}

impl ConsoleRequest {
    fn op(&self) -> &'static str {
        match self {
            Self::Execute { .. } => "execute",
            Self::Approve { .. } => "approve",
            Self::Deny { .. } => "deny",
            Self::List { .. } => "list",
            Self::Sweep => "sweep",
            Self::Metrics => "metrics",
        }
    }
}

fn ok(result: impl serde::Serialize) -> Value {
    match serde_json::to_value(result) {
        Ok(result) => json!({ "ok": true, "result": result }),
        Err(e) => json!({ "ok": false, "error": "internal", "message": e.to_string() }),
    }
}

fn failed(err: &ApprovalError) -> Value {
    json!({
        "ok": false,
        "error": err.code(),
        "message": err.user_message(),
    })
}

/// Handle one raw input line and produce its reply.
pub async fn handle_line<E: CommandExecutor>(gate: &CommandGate<E>, line: &str) -> Value {
    let request: ConsoleRequest = match serde_json::from_str(line) {
        Ok(request) => request,
        Err(e) => {
            return json!({ "ok": false, "error": "bad_request", "message": e.to_string() });
        }
    };
    debug!(op = request.op(), "console request");

    match request {
        ConsoleRequest::Execute {
            tool,
            args,
            requester,
            origin,
        } => match gate
            .execute(&tool, &args, &requester, OriginContext::new(origin))
            .await
        {
            Ok(GateOutcome::ApprovalRequired(mut request)) => {
                mask_passphrase(&mut request.args);
                ok(GateOutcome::ApprovalRequired(request))
            }
            Ok(outcome) => ok(outcome),
            Err(e) => failed(&e),
        },
        ConsoleRequest::Approve {
            action_id,
            identity,
        } => match gate.on_approve(&action_id, &identity).await {
            Ok(reply) => ok(reply),
            Err(e) => failed(&e),
        },
        ConsoleRequest::Deny {
            action_id,
            identity,
        } => match gate.on_deny(&action_id, &identity) {
            Ok(reply) => ok(reply),
            Err(e) => failed(&e),
        },
        ConsoleRequest::List { requester } => {
            let mut actions = gate.engine().list_pending(requester.as_deref());
            for action in &mut actions {
                mask_passphrase(&mut action.tool_args);
            }
            ok(actions)
        }
        ConsoleRequest::Sweep => ok(json!({ "removed": gate.engine().cleanup_expired() })),
        ConsoleRequest::Metrics => ok(METRICS.snapshot()),
    }
}

/// Serve requests from `input` until EOF or Ctrl-C.
pub async fn run<E, R, W>(gate: Arc<CommandGate<E>>, input: R, output: W) -> Result<()>
where
    E: CommandExecutor,
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin + Send + 'static,
{
    let (tx, mut rx) = mpsc::unbounded_channel::<String>();
    let writer = tokio::spawn(async move {
        let mut output = output;
        while let Some(line) = rx.recv().await {
            output.write_all(line.as_bytes()).await?;
            output.write_all(b"\n").await?;
            output.flush().await?;
        }
        output.shutdown().await
    });

    let mut lines = BufReader::new(input).lines();
    let mut in_flight = JoinSet::new();

    loop {
        tokio::select! {
            line = lines.next_line() => {
                let Some(line) = line.context("failed to read console input")? else {
                    break;
                };
                if line.trim().is_empty() {
                    continue;
                }
                let gate = gate.clone();
                let tx = tx.clone();
                in_flight.spawn(async move {
                    let reply = handle_line(&gate, &line).await;
                    if tx.send(reply.to_string()).is_err() {
                        warn!("console output closed; dropping reply");
                    }
                });
            }
            _ = tokio::signal::ctrl_c() => {
                info!("interrupted; abandoning in-flight requests");
                in_flight.abort_all();
                break;
            }
        }
    }

    while in_flight.join_next().await.is_some() {}
    drop(tx);
    writer
        .await
        .context("console writer task failed")?
        .context("failed to write console output")?;
    Ok(())
}
