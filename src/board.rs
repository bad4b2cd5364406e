use std::path::Path;
use std::process::Stdio;
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde_json::Value;
use tokio::process::Command;
use tracing::debug;

use crate::tracker::CliOutput;

/// Workflow columns, left to right.
pub const COLUMNS: &[(&str, &str)] = &[
    ("backlog", "Backlog"),
    ("in_planning", "In Planning"),
    ("planned", "Planned"),
    ("in_progress", "In Progress"),
    ("review", "Review"),
    ("blocked", "Blocked"),
    ("needs_human", "Needs Human"),
    ("done", "Done"),
];

const MAX_TITLE_CHARS: usize = 60;
const MAX_CARDS_PER_COLUMN: usize = 15;

/// Turns board markup into a PNG.
#[async_trait]
pub trait BoardRenderer: Send + Sync {
    async fn render(&self, markup: &str) -> Result<Vec<u8>>;
}

/// Task list out of a `list --json` result.
pub fn board_tasks(output: &CliOutput) -> Result<Vec<Value>> {
    let parsed = output
        .parsed
        .as_ref()
        .with_context(|| format!("Task listing was not JSON: {}", output.raw))?;
    if !output.success || parsed.get("ok").and_then(Value::as_bool) == Some(false) {
        anyhow::bail!("Task listing failed: {}", output.raw);
    }
    parsed
        .get("data")
        .and_then(Value::as_array)
        .cloned()
        .context("Task listing has no data array")
}

fn sanitize(text: &str) -> String {
    let cleaned: String = text
        .chars()
        .map(|c| match c {
            '\n' | '\r' | '\t' => ' ',
            c => c,
        })
        .filter(|c| !matches!(c, '[' | ']' | '(' | ')' | '{' | '}' | '"' | '\'' | '`'))
        .collect();
    let cleaned = cleaned.split_whitespace().collect::<Vec<_>>().join(" ");

    if cleaned.chars().count() > MAX_TITLE_CHARS {
        let cut: String = cleaned.chars().take(MAX_TITLE_CHARS - 3).collect();
        format!("{}...", cut.trim_end())
    } else {
        cleaned
    }
}

fn card_label(task: &Value) -> String {
    let field = |key: &str| task.get(key).and_then(Value::as_str).unwrap_or("");
    let id = if field("short_id").is_empty() {
        field("id")
    } else {
        field("short_id")
    };
    let title = field("title");
    match (id.is_empty(), title.is_empty()) {
        (false, false) => sanitize(&format!("{}: {}", id, title)),
        (false, true) => sanitize(id),
        _ => sanitize(title),
    }
}

/// Mermaid `kanban` markup with one column per non-empty status.
pub fn generate_board_markup(tasks: &[Value]) -> String {
    let mut out = String::from("kanban\n");
    let mut card = 0usize;

    for (status, title) in COLUMNS {
        let in_column: Vec<&Value> = tasks
            .iter()
            .filter(|t| t.get("status").and_then(Value::as_str) == Some(*status))
            .collect();
        if in_column.is_empty() {
            continue;
        }

        out.push_str(&format!("  {}[{}]\n", status, title));
        for task in in_column.iter().take(MAX_CARDS_PER_COLUMN) {
            card += 1;
            out.push_str(&format!("    card{}[{}]\n", card, card_label(task)));
        }
        if in_column.len() > MAX_CARDS_PER_COLUMN {
            card += 1;
            out.push_str(&format!(
                "    card{}[+{} more]\n",
                card,
                in_column.len() - MAX_CARDS_PER_COLUMN
            ));
        }
    }

    if card == 0 {
        out.push_str("  empty[Board]\n    card0[No tasks]\n");
    }
    out
}

/// Renders with the mermaid-cli `mmdc` binary through temporary files.
pub struct MermaidRenderer {
    binary: String,
    timeout: Duration,
}

impl MermaidRenderer {
    pub fn new(binary: &str, timeout: Duration) -> Self {
        Self {
            binary: binary.to_string(),
            timeout,
        }
    }

    async fn run(&self, input: &Path, output: &Path) -> Result<Vec<u8>> {
        let mut cmd = Command::new(&self.binary);
        cmd.arg("-i")
            .arg(input)
            .arg("-o")
            .arg(output)
            .arg("-b")
            .arg("white")
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let result = tokio::time::timeout(self.timeout, cmd.output())
            .await
            .with_context(|| format!("{} timed out after {:?}", self.binary, self.timeout))?
            .with_context(|| format!("Failed to run {}", self.binary))?;

        if !result.status.success() {
            anyhow::bail!(
                "{} exited with {}: {}",
                self.binary,
                result.status,
                String::from_utf8_lossy(&result.stderr).trim()
            );
        }

        tokio::fs::read(output)
            .await
            .with_context(|| format!("Failed to read rendered board {}", output.display()))
    }
}

#[async_trait]
impl BoardRenderer for MermaidRenderer {
    async fn render(&self, markup: &str) -> Result<Vec<u8>> {
        let stem = format!("lattice-board-{}", uuid::Uuid::new_v4());
        let dir = std::env::temp_dir();
        let input = dir.join(format!("{}.mmd", stem));
        let output = dir.join(format!("{}.png", stem));

        tokio::fs::write(&input, markup)
            .await
            .with_context(|| format!("Failed to write {}", input.display()))?;

        let result = self.run(&input, &output).await;

        for path in [&input, &output] {
            if let Err(e) = tokio::fs::remove_file(path).await {
                debug!("Could not remove {}: {}", path.display(), e);
            }
        }

        let png = result?;
        debug!("Rendered board: {} bytes", png.len());
        Ok(png)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn task(short_id: &str, title: &str, status: &str) -> Value {
        json!({ "id": format!("task_{}", short_id), "short_id": short_id, "title": title, "status": status })
    }

    #[test]
    fn test_columns_follow_workflow_order() {
        let markup = generate_board_markup(&[
            task("LAT-2", "Ship it", "done"),
            task("LAT-1", "Plan it", "backlog"),
            task("LAT-3", "Gone", "cancelled"),
        ]);
        assert_eq!(
            markup,
            "kanban\n  backlog[Backlog]\n    card1[LAT-1: Plan it]\n  done[Done]\n    card2[LAT-2: Ship it]\n"
        );
    }

    #[test]
    fn test_empty_board_has_placeholder_card() {
        let markup = generate_board_markup(&[]);
        assert!(markup.starts_with("kanban\n"));
        assert!(markup.contains("[No tasks]"));
    }

    #[test]
    fn test_titles_are_sanitized_and_truncated() {
        let long = format!("Fix [auth] \"bug\"\nnow {}", "x".repeat(80));
        let markup = generate_board_markup(&[task("LAT-5", &long, "review")]);
        let card = markup.lines().find(|l| l.contains("card1")).unwrap();
        let label = card.trim().trim_start_matches("card1[").trim_end_matches(']');
        assert!(label.starts_with("LAT-5: Fix auth bug now x"));
        assert!(label.ends_with("..."));
        assert_eq!(label.chars().count(), MAX_TITLE_CHARS);
        assert!(!label.contains('"'));
    }

    #[test]
    fn test_overflowing_column() {
        let tasks: Vec<Value> = (0..18)
            .map(|i| task(&format!("LAT-{}", i), "t", "in_progress"))
            .collect();
        let markup = generate_board_markup(&tasks);
        let cards = markup.lines().filter(|l| l.starts_with("    card")).count();
        assert_eq!(cards, MAX_CARDS_PER_COLUMN + 1);
        assert!(markup.contains("[+3 more]"));
    }

    #[test]
    fn test_board_tasks() {
        let raw = json!({ "ok": true, "data": [task("LAT-1", "a", "backlog")] });
        let output = CliOutput {
            success: true,
            raw: raw.to_string(),
            parsed: Some(raw),
        };
        assert_eq!(board_tasks(&output).unwrap().len(), 1);

        let failed = CliOutput {
            success: false,
            raw: "boom".to_string(),
            parsed: None,
        };
        assert!(board_tasks(&failed).is_err());
    }

    #[tokio::test]
    async fn test_missing_renderer_fails() {
        let renderer = MermaidRenderer::new("definitely-not-mmdc", Duration::from_secs(5));
        assert!(renderer.render("kanban\n").await.is_err());
    }
}
