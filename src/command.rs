use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Placeholder token resolved to the identifier produced by the preceding step.
pub const PREV_ID: &str = "$PREV_ID";

/// The fixed set of tracker commands the interpreter may emit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CommandName {
    Create,
    List,
    Show,
    Status,
    Update,
    Comment,
    Assign,
    Complete,
    Next,
    Weather,
    Stats,
    Help,
    None,
}

impl CommandName {
    pub fn as_str(&self) -> &'static str {
        match self {
            CommandName::Create => "create",
            CommandName::List => "list",
            CommandName::Show => "show",
            CommandName::Status => "status",
            CommandName::Update => "update",
            CommandName::Comment => "comment",
            CommandName::Assign => "assign",
            CommandName::Complete => "complete",
            CommandName::Next => "next",
            CommandName::Weather => "weather",
            CommandName::Stats => "stats",
            CommandName::Help => "help",
            CommandName::None => "none",
        }
    }

    /// Commands that change tracker state and therefore refresh the board.
    pub fn is_mutating(&self) -> bool {
        matches!(
            self,
            CommandName::Create
                | CommandName::Status
                | CommandName::Update
                | CommandName::Assign
                | CommandName::Complete
                | CommandName::Comment
                | CommandName::Next
        )
    }
}

impl std::fmt::Display for CommandName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One validated step of a command chain.
#[derive(Debug, Clone, PartialEq)]
pub struct InterpretedCommand {
    pub name: CommandName,
    pub positional: Vec<String>,
    /// Named arguments, emitted as `--key value` pairs in key order.
    pub named: BTreeMap<String, String>,
    /// Boolean flags, in the order the interpreter listed them (deduplicated).
    pub flags: Vec<String>,
    pub understood: bool,
    pub explanation: String,
}

impl InterpretedCommand {
    pub fn new(name: CommandName) -> Self {
        Self {
            name,
            positional: Vec::new(),
            named: BTreeMap::new(),
            flags: Vec::new(),
            understood: true,
            explanation: String::new(),
        }
    }

    #[cfg(test)]
    pub fn with_positional(mut self, args: &[&str]) -> Self {
        self.positional = args.iter().map(|a| a.to_string()).collect();
        self
    }

    #[cfg(test)]
    pub fn with_named(mut self, key: &str, value: &str) -> Self {
        self.named.insert(key.to_string(), value.to_string());
        self
    }

    pub fn with_flag(mut self, flag: &str) -> Self {
        if !self.flags.iter().any(|f| f == flag) {
            self.flags.push(flag.to_string());
        }
        self
    }

    pub fn uses_placeholder(&self) -> bool {
        self.positional.iter().any(|p| p == PREV_ID)
    }
}

/// Normalise a flag or argument key to its `--long` form.
pub fn long_flag(key: &str) -> String {
    if key.starts_with("--") {
        key.to_string()
    } else {
        format!("--{}", key.trim_start_matches('-'))
    }
}
