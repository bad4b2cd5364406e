use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use tracing::info;

use crate::executor::{ChainExecutor, WorkflowResult};
use crate::interpret::prompt::default_help_text;
use crate::interpret::{interpret_message, ChatContext, Interpretation, Interpreter};

/// Per-message callback the poll loop hands triggered messages to.
#[async_trait]
pub trait MessageHandler: Send + Sync {
    async fn on_triggered(&self, context: &ChatContext) -> Result<WorkflowResult>;
}

/// Interpret, execute, reply.
pub struct Workflow {
    interpreter: Arc<dyn Interpreter>,
    executor: ChainExecutor,
    help_text: Option<String>,
    first_prefix: String,
}

impl Workflow {
    pub fn new(
        interpreter: Arc<dyn Interpreter>,
        executor: ChainExecutor,
        help_text: Option<String>,
        first_prefix: &str,
    ) -> Self {
        Self {
            interpreter,
            executor,
            help_text,
            first_prefix: first_prefix.to_string(),
        }
    }

    fn help(&self) -> String {
        self.help_text
            .clone()
            .unwrap_or_else(|| default_help_text(&self.first_prefix))
    }

    /// Explanation, then configured help, then a generic apology.
    fn not_understood(&self, explanation: Option<String>) -> String {
        explanation
            .or_else(|| self.help_text.clone())
            .unwrap_or_else(|| format!("I didn't understand that. Try {} help", self.first_prefix))
    }
}

#[async_trait]
impl MessageHandler for Workflow {
    async fn on_triggered(&self, context: &ChatContext) -> Result<WorkflowResult> {
        info!(
            "Processing \"{}\" from {}",
            context.triggered.text, context.triggered.sender_name
        );

        let result = match interpret_message(self.interpreter.as_ref(), context).await {
            Interpretation::NotUnderstood { explanation } => {
                WorkflowResult::text_only(self.not_understood(explanation))
            }
            Interpretation::Help => WorkflowResult::text_only(self.help()),
            Interpretation::Chain(chain) => self.executor.execute(&chain).await,
        };
        Ok(result)
    }
}
