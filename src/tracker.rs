use std::path::PathBuf;
use std::process::Stdio;

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde_json::Value;
use tokio::process::Command;
use tracing::debug;

use crate::command::{long_flag, InterpretedCommand};

/// Captured result of one tracker invocation.
#[derive(Debug, Clone, PartialEq)]
pub struct CliOutput {
    /// Exit status was zero.
    pub success: bool,
    pub raw: String,
    /// Stdout decoded as JSON, when it is JSON.
    pub parsed: Option<Value>,
}

impl CliOutput {
    pub fn from_streams(success: bool, stdout: &str, stderr: &str) -> Self {
        let parsed = serde_json::from_str::<Value>(stdout.trim()).ok();
        let raw = if stdout.trim().is_empty() {
            stderr.trim().to_string()
        } else {
            stdout.trim().to_string()
        };
        Self {
            success,
            raw,
            parsed,
        }
    }
}

/// The task-tracker command line tool.
#[async_trait]
pub trait TrackerCli: Send + Sync {
    /// Run the tracker with `args` (not including the binary itself).
    async fn run(&self, args: &[String]) -> Result<CliOutput>;

    /// How the invocation reads in logs and replies.
    fn command_line(&self, args: &[String]) -> String {
        display_command_line("lattice", args)
    }
}

/// Runs the `lattice` binary inside the project root, without a shell.
pub struct LatticeCli {
    binary: String,
    project_root: PathBuf,
}

impl LatticeCli {
    pub fn new(binary: &str, project_root: PathBuf) -> Self {
        Self {
            binary: binary.to_string(),
            project_root,
        }
    }
}

#[async_trait]
impl TrackerCli for LatticeCli {
    async fn run(&self, args: &[String]) -> Result<CliOutput> {
        debug!("Running {} in {}", self.command_line(args), self.project_root.display());

        let output = Command::new(&self.binary)
            .args(args)
            .current_dir(&self.project_root)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .output()
            .await
            .with_context(|| format!("Failed to run {}", self.binary))?;

        Ok(CliOutput::from_streams(
            output.status.success(),
            &String::from_utf8_lossy(&output.stdout),
            &String::from_utf8_lossy(&output.stderr),
        ))
    }

    fn command_line(&self, args: &[String]) -> String {
        display_command_line(&self.binary, args)
    }
}

/// Build the argv for one command: name, positionals, `--key value` pairs,
/// boolean flags, `--json` exactly once, and `--actor` on writes.
pub fn build_args(cmd: &InterpretedCommand, actor: &str) -> Vec<String> {
    let mut args = vec![cmd.name.as_str().to_string()];
    args.extend(cmd.positional.iter().cloned());

    let mut has_actor = false;
    for (key, value) in &cmd.named {
        let key = long_flag(key);
        if key == "--json" {
            continue;
        }
        has_actor |= key == "--actor";
        args.push(key);
        args.push(value.clone());
    }

    let mut seen = Vec::new();
    for flag in &cmd.flags {
        let flag = long_flag(flag);
        if flag == "--json" || seen.contains(&flag) {
            continue;
        }
        seen.push(flag.clone());
        args.push(flag);
    }

    args.push("--json".to_string());
    if cmd.name.is_mutating() && !has_actor {
        args.push("--actor".to_string());
        args.push(actor.to_string());
    }
    args
}

/// Shell-like rendering of an argv, quoting arguments that need it.
pub fn display_command_line(binary: &str, args: &[String]) -> String {
    let mut parts = vec![binary.to_string()];
    for arg in args {
        if arg.is_empty() || arg.chars().any(|c| c.is_whitespace() || "\"'$\\".contains(c)) {
            parts.push(format!("\"{}\"", arg.replace('\\', "\\\\").replace('"', "\\\"")));
        } else {
            parts.push(arg.clone());
        }
    }
    parts.join(" ")
}

/// Whether `data` is a tracker event (`{"id": "ev_...", "task_id": ..., "type": ...}`)
/// rather than a task snapshot.
pub fn is_event(data: &Value) -> bool {
    data.get("type").is_some()
        && (data.get("task_id").is_some()
            || data
                .get("id")
                .and_then(Value::as_str)
                .is_some_and(|id| id.starts_with(EVENT_ID_PREFIX)))
}

const EVENT_ID_PREFIX: &str = "ev_";

/// Task identifier from a successful `{"ok": true, "data": {...}}` envelope.
/// Task snapshots give the short id, then the full id. Events give the task
/// they belong to, never their own id.
pub fn extract_id(parsed: &Value) -> Option<String> {
    if parsed.get("ok").and_then(Value::as_bool) == Some(false) {
        return None;
    }
    let data = parsed.get("data")?;
    let keys: &[&str] = if is_event(data) {
        &["task_id"]
    } else {
        &["short_id", "id"]
    };
    keys.iter()
        .filter_map(|key| data.get(key).and_then(Value::as_str))
        .map(str::trim)
        .find(|id| !id.is_empty() && !id.starts_with(EVENT_ID_PREFIX))
        .map(str::to_string)
}
