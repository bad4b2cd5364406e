pub mod prompt;

use std::collections::BTreeMap;

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;
use tracing::{info, warn};

use crate::command::{CommandName, InterpretedCommand};
use crate::history::ChatMessage;
use crate::llm::{LlmClient, Message};
use crate::platform::IncomingMessage;

/// What the interpreter sees for one triggered message.
///
/// `recent` is an owned copy of the group history taken when the message was
/// dispatched; later chat does not change it.
#[derive(Debug, Clone)]
pub struct ChatContext {
    /// The triggering message with its prefix stripped.
    pub triggered: IncomingMessage,
    pub recent: Vec<ChatMessage>,
}

/// Natural-language engine. Returns the raw structured answer, which is
/// validated separately.
#[async_trait]
pub trait Interpreter: Send + Sync {
    async fn interpret(&self, context: &ChatContext) -> Result<Value>;
}

/// Validated outcome of interpreting one message.
#[derive(Debug, Clone, PartialEq)]
pub enum Interpretation {
    Chain(Vec<InterpretedCommand>),
    Help,
    NotUnderstood { explanation: Option<String> },
}

#[derive(Debug, Deserialize)]
struct ChainWire {
    understood: bool,
    commands: Vec<CommandWire>,
    #[serde(default)]
    explanation: String,
}

#[derive(Debug, Deserialize)]
struct CommandWire {
    command: CommandName,
    #[serde(default)]
    positional: Vec<String>,
    #[serde(default)]
    args: BTreeMap<String, String>,
    #[serde(default)]
    flags: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct SingleWire {
    understood: bool,
    #[serde(flatten)]
    command: CommandWire,
    #[serde(default)]
    explanation: String,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum Wire {
    Chain(ChainWire),
    Single(SingleWire),
}

/// Check an engine answer against the command-chain schema.
pub fn validate(value: Value) -> Result<Vec<InterpretedCommand>> {
    let wire: Wire = serde_json::from_value(value)
        .context("Interpreter answer does not match the command schema")?;

    let (understood, explanation, commands) = match wire {
        Wire::Chain(c) => (c.understood, c.explanation, c.commands),
        Wire::Single(s) => (s.understood, s.explanation, vec![s.command]),
    };

    Ok(commands
        .into_iter()
        .map(|c| {
            let mut cmd = InterpretedCommand::new(c.command);
            cmd.positional = c.positional;
            cmd.named = c.args;
            for flag in &c.flags {
                cmd = cmd.with_flag(flag);
            }
            cmd.understood = understood;
            cmd.explanation = explanation.clone();
            cmd
        })
        .collect())
}

/// Reduce a validated chain to what the bot should do with it.
pub fn classify(chain: Vec<InterpretedCommand>) -> Interpretation {
    let explanation = chain
        .iter()
        .map(|c| c.explanation.trim())
        .find(|e| !e.is_empty())
        .map(str::to_string);

    if chain.is_empty()
        || chain
            .iter()
            .any(|c| !c.understood || c.name == CommandName::None)
    {
        return Interpretation::NotUnderstood { explanation };
    }
    if chain.iter().any(|c| c.name == CommandName::Help) {
        return Interpretation::Help;
    }
    Interpretation::Chain(chain)
}

/// Ask the engine and validate its answer. Engine failures and schema
/// violations come back as `NotUnderstood`, never as errors.
pub async fn interpret_message(engine: &dyn Interpreter, context: &ChatContext) -> Interpretation {
    let value = match engine.interpret(context).await {
        Ok(v) => v,
        Err(e) => {
            warn!("Interpreter failed: {:#}", e);
            return Interpretation::NotUnderstood { explanation: None };
        }
    };

    let chain = match validate(value) {
        Ok(c) => c,
        Err(e) => {
            warn!("Rejected interpreter answer: {:#}", e);
            return Interpretation::NotUnderstood { explanation: None };
        }
    };

    let names: Vec<&str> = chain.iter().map(|c| c.name.as_str()).collect();
    info!(
        "Interpreted \"{}\" as [{}] (understood={})",
        context.triggered.text,
        names.join(", "),
        chain.iter().all(|c| c.understood)
    );

    classify(chain)
}

/// Pull the JSON object out of a model reply that may be fenced or chatty.
pub fn extract_json(text: &str) -> Option<&str> {
    let trimmed = text.trim();
    let unfenced = match trimmed.strip_prefix("```") {
        Some(rest) => {
            let body = rest.split_once('\n').map(|(_, b)| b).unwrap_or(rest);
            body.trim_end().trim_end_matches("```").trim()
        }
        None => trimmed,
    };
    let start = unfenced.find('{')?;
    let end = unfenced.rfind('}')?;
    if end < start {
        return None;
    }
    Some(&unfenced[start..=end])
}

/// Engine backed by a chat-completions model.
pub struct LlmInterpreter {
    llm: LlmClient,
    system_prompt: String,
}

impl LlmInterpreter {
    pub fn new(llm: LlmClient) -> Self {
        Self {
            llm,
            system_prompt: prompt::SYSTEM_PROMPT.to_string(),
        }
    }
}

#[async_trait]
impl Interpreter for LlmInterpreter {
    async fn interpret(&self, context: &ChatContext) -> Result<Value> {
        let messages = vec![
            Message::system(&self.system_prompt),
            Message::user(&prompt::format_context(context)),
        ];
        let reply = self.llm.chat_json(&messages).await?;
        let json = extract_json(&reply)
            .with_context(|| format!("No JSON object in {} reply", self.llm.model()))?;
        serde_json::from_str(json).context("Model reply is not valid JSON")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    struct FixedEngine(Result<Value, String>);

    #[async_trait]
    impl Interpreter for FixedEngine {
        async fn interpret(&self, _context: &ChatContext) -> Result<Value> {
            self.0.clone().map_err(|e| anyhow::anyhow!(e))
        }
    }

    fn context() -> ChatContext {
        ChatContext {
            triggered: IncomingMessage {
                text: "create a bug and assign it to alice".to_string(),
                sender_name: "bob".to_string(),
                sender_id: "uuid-bob".to_string(),
                group_id: "G".to_string(),
                timestamp: 1,
            },
            recent: Vec::new(),
        }
    }

    #[test]
    fn test_validates_chain() {
        let chain = validate(json!({
            "understood": true,
            "commands": [
                { "command": "create", "positional": ["Login bug"], "args": { "--type": "bug" }, "flags": ["--json"] },
                { "command": "assign", "positional": ["$PREV_ID", "human:alice"], "args": {}, "flags": [] }
            ],
            "explanation": "Create then assign"
        }))
        .unwrap();
        assert_eq!(chain.len(), 2);
        assert_eq!(chain[0].name, CommandName::Create);
        assert_eq!(chain[0].named.get("--type").map(String::as_str), Some("bug"));
        assert_eq!(chain[0].flags, vec!["--json"]);
        assert_eq!(chain[1].positional, vec!["$PREV_ID", "human:alice"]);
        assert!(chain.iter().all(|c| c.understood && c.explanation == "Create then assign"));
    }

    #[test]
    fn test_validates_single_command_shape() {
        let chain = validate(json!({
            "understood": true,
            "command": "show",
            "positional": ["LAT-42"],
            "explanation": "Show it"
        }))
        .unwrap();
        assert_eq!(chain.len(), 1);
        assert_eq!(chain[0].name, CommandName::Show);
        assert!(chain[0].named.is_empty());
    }

    #[test]
    fn test_rejects_unknown_command_and_bad_shapes() {
        assert!(validate(json!({ "understood": true, "commands": [{ "command": "delete" }] })).is_err());
        assert!(validate(json!({ "understood": "yes", "commands": [] })).is_err());
        assert!(validate(json!({ "understood": true, "commands": [{ "command": "show", "positional": [42] }] })).is_err());
        assert!(validate(json!({ "understood": true, "commands": [{ "command": "list", "args": { "--limit": 5 } }] })).is_err());
        assert!(validate(json!("create a task")).is_err());
    }

    #[test]
    fn test_classify() {
        let create = InterpretedCommand::new(CommandName::Create);
        assert_eq!(
            classify(vec![create.clone()]),
            Interpretation::Chain(vec![create.clone()])
        );
        assert_eq!(classify(Vec::new()), Interpretation::NotUnderstood { explanation: None });

        let mut none = InterpretedCommand::new(CommandName::None);
        none.explanation = "Just chatting".to_string();
        assert_eq!(
            classify(vec![none]),
            Interpretation::NotUnderstood {
                explanation: Some("Just chatting".to_string())
            }
        );

        let mut unclear = InterpretedCommand::new(CommandName::List);
        unclear.understood = false;
        assert!(matches!(
            classify(vec![unclear]),
            Interpretation::NotUnderstood { explanation: None }
        ));

        assert_eq!(
            classify(vec![InterpretedCommand::new(CommandName::Help)]),
            Interpretation::Help
        );
    }

    #[tokio::test]
    async fn test_engine_failure_is_not_understood() {
        let engine = FixedEngine(Err("timeout".to_string()));
        assert_eq!(
            interpret_message(&engine, &context()).await,
            Interpretation::NotUnderstood { explanation: None }
        );
    }

    #[tokio::test]
    async fn test_schema_violation_is_not_understood() {
        let engine = FixedEngine(Ok(json!({ "understood": true, "commands": [{ "command": "rm -rf" }] })));
        assert_eq!(
            interpret_message(&engine, &context()).await,
            Interpretation::NotUnderstood { explanation: None }
        );
    }

    #[tokio::test]
    async fn test_valid_answer_becomes_chain() {
        let engine = FixedEngine(Ok(json!({
            "understood": true,
            "commands": [{ "command": "stats", "positional": [], "args": {}, "flags": [] }],
            "explanation": "Stats"
        })));
        match interpret_message(&engine, &context()).await {
            Interpretation::Chain(chain) => assert_eq!(chain[0].name, CommandName::Stats),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_extract_json() {
        assert_eq!(extract_json("{\"a\":1}"), Some("{\"a\":1}"));
        assert_eq!(
            extract_json("```json\n{\"a\": {\"b\": 2}}\n```"),
            Some("{\"a\": {\"b\": 2}}")
        );
        assert_eq!(extract_json("Sure! {\"a\":1} hope that helps"), Some("{\"a\":1}"));
        assert_eq!(extract_json("no json here"), None);
        assert_eq!(extract_json("} backwards {"), None);
    }
}
