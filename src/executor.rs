use std::sync::Arc;

use serde_json::Value;
use tracing::{debug, info, warn};

use crate::board::{board_tasks, generate_board_markup, BoardRenderer};
use crate::command::{CommandName, InterpretedCommand, PREV_ID};
use crate::format::format_result;
use crate::tracker::{build_args, extract_id, CliOutput, TrackerCli};

/// What running one chain step produced.
#[derive(Debug, Clone, PartialEq)]
pub struct ExecutionResult {
    pub success: bool,
    pub command: CommandName,
    pub command_line: String,
    pub raw_output: String,
    pub parsed_output: Option<Value>,
    pub formatted_text: String,
}

#[derive(Debug, Clone, PartialEq)]
pub enum StepOutcome {
    Executed(ExecutionResult),
    /// `$PREV_ID` had nothing to resolve to; the step and the rest of the
    /// chain were not run.
    ResolutionFailed { command: CommandName, message: String },
}

impl StepOutcome {
    pub fn text(&self) -> &str {
        match self {
            StepOutcome::Executed(result) => &result.formatted_text,
            StepOutcome::ResolutionFailed { message, .. } => message,
        }
    }
}

/// The single reply for one triggered message.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct WorkflowResult {
    pub text: String,
    pub board_image: Option<Vec<u8>>,
}

impl WorkflowResult {
    pub fn text_only(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            board_image: None,
        }
    }
}

/// Runs command chains against the tracker, one step at a time.
pub struct ChainExecutor {
    cli: Arc<dyn TrackerCli>,
    renderer: Option<Arc<dyn BoardRenderer>>,
    actor: String,
}

impl ChainExecutor {
    /// `renderer` is `None` when board images are turned off.
    pub fn new(
        cli: Arc<dyn TrackerCli>,
        renderer: Option<Arc<dyn BoardRenderer>>,
        actor: &str,
    ) -> Self {
        Self {
            cli,
            renderer,
            actor: actor.to_string(),
        }
    }

    /// Run the chain in order and assemble the reply. Any write command in the
    /// chain triggers one board refresh, whether or not its step succeeded.
    pub async fn execute(&self, chain: &[InterpretedCommand]) -> WorkflowResult {
        let steps = self.run_steps(chain).await;
        for step in &steps {
            match step {
                StepOutcome::Executed(r) if !r.success => {
                    debug!("{} ({}) failed: {}", r.command, r.command_line, r.raw_output)
                }
                StepOutcome::Executed(_) => {}
                StepOutcome::ResolutionFailed { command, .. } => debug!("{} was not run", command),
            }
        }
        let text = steps
            .iter()
            .map(StepOutcome::text)
            .collect::<Vec<_>>()
            .join("\n");

        let board_image = if chain.iter().any(|c| c.name.is_mutating()) {
            self.refresh_board().await
        } else {
            None
        };

        WorkflowResult { text, board_image }
    }

    pub async fn run_steps(&self, chain: &[InterpretedCommand]) -> Vec<StepOutcome> {
        let mut outcomes = Vec::with_capacity(chain.len());
        let mut prev_id: Option<String> = None;

        for cmd in chain {
            let resolved = match resolve_placeholder(cmd, prev_id.as_deref()) {
                Some(resolved) => resolved,
                None => {
                    warn!("Cannot resolve {} for {}; aborting the rest of the chain", PREV_ID, cmd.name);
                    outcomes.push(StepOutcome::ResolutionFailed {
                        command: cmd.name,
                        message: format!(
                            "Skipped {} and anything after it: the previous step did not produce a task id.",
                            cmd.name
                        ),
                    });
                    break;
                }
            };

            let result = self.run_step(&resolved).await;
            prev_id = if result.success {
                result.parsed_output.as_ref().and_then(extract_id)
            } else {
                None
            };
            outcomes.push(StepOutcome::Executed(result));
        }
        outcomes
    }

    async fn run_step(&self, cmd: &InterpretedCommand) -> ExecutionResult {
        let args = build_args(cmd, &self.actor);
        let command_line = self.cli.command_line(&args);
        info!("Executing: {}", command_line);

        let output = match self.cli.run(&args).await {
            Ok(output) => output,
            Err(e) => {
                warn!("Tracker invocation failed: {:#}", e);
                CliOutput {
                    success: false,
                    raw: format!("{:#}", e),
                    parsed: None,
                }
            }
        };

        // An {"ok": false} envelope is a failure even on a zero exit.
        let success = output.success
            && output.parsed.as_ref().and_then(|p| p.get("ok")).and_then(Value::as_bool)
                != Some(false);

        ExecutionResult {
            success,
            command: cmd.name,
            formatted_text: format_result(cmd.name, &output),
            command_line,
            raw_output: output.raw,
            parsed_output: output.parsed,
        }
    }

    /// List the board, render it, and hand back the PNG. Failures only cost
    /// the image.
    async fn refresh_board(&self) -> Option<Vec<u8>> {
        let renderer = self.renderer.as_ref()?;

        let args = vec!["list".to_string(), "--json".to_string()];
        let tasks = match self.cli.run(&args).await {
            Ok(output) => board_tasks(&output),
            Err(e) => Err(e),
        };
        let tasks = match tasks {
            Ok(tasks) => tasks,
            Err(e) => {
                warn!("Skipping board image, listing failed: {:#}", e);
                return None;
            }
        };

        match renderer.render(&generate_board_markup(&tasks)).await {
            Ok(png) => {
                info!("Board image rendered ({} tasks)", tasks.len());
                Some(png)
            }
            Err(e) => {
                warn!("Failed to render board image: {:#}", e);
                None
            }
        }
    }
}

/// Substitute `$PREV_ID` positionals. `None` when a placeholder is present
/// but there is no identifier to put in its place.
fn resolve_placeholder(cmd: &InterpretedCommand, prev_id: Option<&str>) -> Option<InterpretedCommand> {
    if !cmd.uses_placeholder() {
        return Some(cmd.clone());
    }
    let id = prev_id?;
    let mut resolved = cmd.clone();
    for arg in resolved.positional.iter_mut().filter(|a| a.as_str() == PREV_ID) {
        *arg = id.to_string();
    }
    Some(resolved)
}
