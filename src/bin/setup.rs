//! lattice-bot setup wizard.
//!
//! Prompts for the Signal, Lattice and LLM settings in the terminal and writes
//! a commented `config.toml` to the project root (`LATTICE_BOT_ROOT`, or the
//! current directory).

use anyhow::{Context, Result};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

// ── Config formatting ──────────────────────────────────────────────────────────

struct ConfigParams<'a> {
    api_url: &'a str,
    phone_number: &'a str,
    groups: &'a str,
    project_root: &'a str,
    actor: &'a str,
    api_key: &'a str,
    model: &'a str,
    help_text: &'a str,
}

/// Quote a value as a TOML string, escaping whatever the value needs.
fn toml_string(value: &str) -> String {
    toml::Value::String(value.to_string()).to_string()
}

/// Produces a valid config.toml string. Extracted so it can be unit-tested.
fn format_config(p: &ConfigParams<'_>) -> String {
    let groups: Vec<String> = p
        .groups
        .split([',', ' '])
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(toml_string)
        .collect();
    let groups = groups.join(", ");

    let help_line = if p.help_text.is_empty() {
        "# help_text = \"Ask me to create, list or move tasks.\"".to_owned()
    } else {
        format!("help_text = {}", toml_string(p.help_text))
    };

    let api_url = toml_string(p.api_url);
    let phone_number = toml_string(p.phone_number);
    let project_root = toml_string(p.project_root);
    let actor = toml_string(p.actor);
    let api_key = toml_string(p.api_key);
    let model = toml_string(p.model);

    format!(
        r#"[signal]
# signal-cli REST API and the number it is registered with
api_url = {api_url}
phone_number = {phone_number}
poll_interval_ms = 1000
# Only these groups are listened to
groups = [{groups}]
trigger_prefixes = ["@lattice", "/lat"]
max_history_messages = 50

[lattice]
project_root = {project_root}
# Recorded as the author of every change
actor = {actor}
binary = "lattice"

[llm]
provider = "openrouter"
api_key = {api_key}
model = {model}
max_tokens = 2048
timeout_secs = 60

[bot]
name = "LatticeBot"
{help_line}

[board]
# Kanban image after every change, rendered with mermaid-cli
enabled = true
renderer = "mmdc"
timeout_secs = 30
"#
    )
}

// ── Prompts ────────────────────────────────────────────────────────────────────

fn read_line(prompt: &str) -> Result<String> {
    print!("{prompt}");
    io::stdout().flush()?;
    let mut buf = String::new();
    io::stdin().read_line(&mut buf)?;
    Ok(buf.trim().to_owned())
}

fn or_default(s: String, default: &str) -> String {
    if s.is_empty() {
        default.to_owned()
    } else {
        s
    }
}

fn run(project_root: &Path) -> Result<()> {
    println!("=== lattice-bot setup ===\n");

    let api_url = or_default(
        read_line("Signal REST API URL [http://localhost:8080]: ")?,
        "http://localhost:8080",
    );
    let phone_number = read_line("Bot phone number (e.g. +15550001111): ")?;
    if !phone_number.starts_with('+') {
        anyhow::bail!("Phone number must start with '+'");
    }
    let groups = read_line("Group ids to listen to (comma-separated): ")?;
    let lattice_root = or_default(read_line("Lattice project root [.]: ")?, ".");
    let actor = or_default(
        read_line("Actor for changes [agent:lattice-bot]: ")?,
        "agent:lattice-bot",
    );
    let api_key = read_line("OpenRouter API key: ")?;
    let model = or_default(
        read_line("Model [anthropic/claude-sonnet-4.5]: ")?,
        "anthropic/claude-sonnet-4.5",
    );
    let help_text = read_line("Custom help text (optional): ")?;

    let config = format_config(&ConfigParams {
        api_url: &api_url,
        phone_number: &phone_number,
        groups: &groups,
        project_root: &lattice_root,
        actor: &actor,
        api_key: &api_key,
        model: &model,
        help_text: &help_text,
    });

    let config_path = project_root.join("config.toml");
    std::fs::write(&config_path, &config)
        .with_context(|| format!("Could not write {}", config_path.display()))?;

    println!("\n✓  config.toml saved to {}", config_path.display());
    println!("   Run the bot with:  cargo run --bin lattice-bot");
    Ok(())
}

// ── Entry point ────────────────────────────────────────────────────────────────

fn main() -> Result<()> {
    let project_root =
        PathBuf::from(std::env::var("LATTICE_BOT_ROOT").unwrap_or_else(|_| ".".to_string()));
    run(&project_root)
}

// ── Tests ──────────────────────────────────────────────────────────────────────
