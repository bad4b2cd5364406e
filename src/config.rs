use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq, Default)]
#[serde(rename_all = "lowercase")]
pub enum LlmProvider {
    #[default]
    Openrouter,
    Ollama,
    Openai,
}

impl std::fmt::Display for LlmProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LlmProvider::Openrouter => write!(f, "openrouter"),
            LlmProvider::Ollama => write!(f, "ollama"),
            LlmProvider::Openai => write!(f, "openai"),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct LlmConfig {
    #[serde(default)]
    pub provider: LlmProvider,
    #[serde(default = "default_model")]
    pub model: String,
    #[serde(default)]
    pub base_url: String,
    #[serde(default)]
    pub api_key: String,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    #[serde(default = "default_llm_timeout")]
    pub timeout_secs: u64,
}

impl LlmConfig {
    /// Returns the effective base_url: if the stored value is empty,
    /// fall back to the canonical URL for the configured provider.
    pub fn effective_base_url(&self) -> &str {
        if !self.base_url.is_empty() {
            return self.base_url.trim_end_matches('/');
        }
        match self.provider {
            LlmProvider::Openrouter => "https://openrouter.ai/api/v1",
            LlmProvider::Ollama => "http://localhost:11434/v1",
            LlmProvider::Openai => "https://api.openai.com/v1",
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub signal: SignalConfig,
    pub lattice: LatticeConfig,
    #[serde(default = "default_llm_config")]
    pub llm: LlmConfig,
    #[serde(default)]
    pub bot: BotConfig,
    #[serde(default = "default_board_config")]
    pub board: BoardConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct SignalConfig {
    pub api_url: String,
    pub phone_number: String,
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    /// Allow-listed group ids; messages from any other group are ignored.
    pub groups: Vec<String>,
    #[serde(default = "default_trigger_prefixes")]
    pub trigger_prefixes: Vec<String>,
    #[serde(default = "default_max_history_messages")]
    pub max_history_messages: usize,
}

#[derive(Debug, Deserialize, Clone)]
pub struct LatticeConfig {
    pub project_root: PathBuf,
    /// Attribution for every write, in `prefix:identifier` form.
    pub actor: String,
    #[serde(default = "default_lattice_binary")]
    pub binary: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct BotConfig {
    #[serde(default = "default_bot_name")]
    pub name: String,
    #[serde(default)]
    pub help_text: Option<String>,
}

impl Default for BotConfig {
    fn default() -> Self {
        Self {
            name: default_bot_name(),
            help_text: None,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct BoardConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_renderer")]
    pub renderer: String,
    #[serde(default = "default_render_timeout")]
    pub timeout_secs: u64,
}

fn default_model() -> String {
    "anthropic/claude-sonnet-4.5".to_string()
}

fn default_max_tokens() -> u32 {
    2048
}

fn default_llm_timeout() -> u64 {
    60
}

fn default_poll_interval_ms() -> u64 {
    1000
}

fn default_trigger_prefixes() -> Vec<String> {
    vec!["@lattice".to_string(), "/lat".to_string()]
}

fn default_max_history_messages() -> usize {
    crate::history::DEFAULT_CAPACITY
}

fn default_lattice_binary() -> String {
    "lattice".to_string()
}

fn default_bot_name() -> String {
    "LatticeBot".to_string()
}

fn default_true() -> bool {
    true
}

fn default_renderer() -> String {
    "mmdc".to_string()
}

fn default_render_timeout() -> u64 {
    30
}

fn default_llm_config() -> LlmConfig {
    LlmConfig {
        provider: LlmProvider::default(),
        model: default_model(),
        base_url: String::new(),
        api_key: String::new(),
        max_tokens: default_max_tokens(),
        timeout_secs: default_llm_timeout(),
    }
}

fn default_board_config() -> BoardConfig {
    BoardConfig {
        enabled: true,
        renderer: default_renderer(),
        timeout_secs: default_render_timeout(),
    }
}

impl Config {
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        Self::parse(&content)
    }

    pub fn parse(content: &str) -> Result<Self> {
        let config: Config = toml::from_str(content).context("Failed to parse config file")?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        let signal = &self.signal;
        if !(signal.api_url.starts_with("http://") || signal.api_url.starts_with("https://")) {
            anyhow::bail!(
                "signal.api_url must be an http(s) URL, got '{}'",
                signal.api_url
            );
        }
        if !signal.phone_number.starts_with('+') {
            anyhow::bail!("signal.phone_number must start with '+'");
        }
        if signal.groups.is_empty() {
            anyhow::bail!("signal.groups must list at least one group id");
        }
        if signal.max_history_messages == 0 {
            anyhow::bail!("signal.max_history_messages must be greater than zero");
        }
        if signal.trigger_prefixes.iter().all(|p| p.trim().is_empty()) {
            anyhow::bail!("signal.trigger_prefixes must contain a non-empty prefix");
        }
        if !is_valid_actor(&self.lattice.actor) {
            anyhow::bail!(
                "lattice.actor must be prefix:identifier (e.g. agent:lattice-bot), got '{}'",
                self.lattice.actor
            );
        }
        Ok(())
    }

    /// Help text shown for `help` and as the fallback for unclear requests.
    pub fn help_text(&self) -> Option<&str> {
        self.bot.help_text.as_deref().filter(|t| !t.trim().is_empty())
    }
}

/// `prefix:identifier` with a lowercase alphabetic prefix and a non-empty identifier.
pub fn is_valid_actor(actor: &str) -> bool {
    match actor.split_once(':') {
        Some((prefix, id)) => {
            !prefix.is_empty() && prefix.chars().all(|c| c.is_ascii_lowercase()) && !id.is_empty()
        }
        None => false,
    }
}
