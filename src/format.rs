use serde_json::Value;

use crate::command::CommandName;
use crate::tracker::{is_event, CliOutput};

/// Most tasks listed in a single reply.
const MAX_LISTED: usize = 25;

/// Human-readable reply line(s) for one tracker result. Never fails: output
/// that doesn't look like what the command normally returns is dumped as-is.
pub fn format_result(name: CommandName, output: &CliOutput) -> String {
    let Some(parsed) = output.parsed.as_ref() else {
        return if output.success {
            fallback_text(name, &output.raw)
        } else if output.raw.is_empty() {
            format!("{} failed", name)
        } else {
            format!("{} failed: {}", name, output.raw)
        };
    };

    if parsed.get("ok").and_then(Value::as_bool) == Some(false) {
        return format_error(name, parsed.get("error"));
    }

    let data = parsed.get("data").unwrap_or(parsed);
    let formatted = match name {
        CommandName::Create => task_action("Created", data),
        CommandName::List => format_list(data),
        CommandName::Show => format_show(data),
        CommandName::Status => format_status(data),
        CommandName::Assign => format_assign(data),
        CommandName::Update => task_action("Updated", data),
        CommandName::Comment => format_comment(data),
        CommandName::Complete => task_action("Completed", data),
        CommandName::Next => format_next(data),
        CommandName::Weather => format_weather(data),
        CommandName::Stats => format_stats(data),
        CommandName::Help | CommandName::None => None,
    };

    formatted.unwrap_or_else(|| fallback_json(name, data))
}

fn format_error(name: CommandName, error: Option<&Value>) -> String {
    let message = error
        .and_then(|e| e.get("message"))
        .and_then(Value::as_str)
        .unwrap_or("unknown error");
    match error.and_then(|e| e.get("code")).and_then(Value::as_str) {
        Some(code) => format!("{} failed ({}): {}", name, code, message),
        None => format!("{} failed: {}", name, message),
    }
}

fn fallback_text(name: CommandName, raw: &str) -> String {
    if raw.is_empty() {
        format!("{}: done", name)
    } else {
        raw.to_string()
    }
}

fn fallback_json(name: CommandName, data: &Value) -> String {
    match serde_json::to_string_pretty(data) {
        Ok(text) if !data.is_null() => format!("{}:\n{}", name, text),
        _ => format!("{}: done", name),
    }
}

fn str_field<'a>(value: &'a Value, key: &str) -> Option<&'a str> {
    value
        .get(key)
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|s| !s.is_empty())
}

/// Events are labelled by the task they touched.
fn task_id(task: &Value) -> Option<&str> {
    if is_event(task) {
        return str_field(task, "task_id");
    }
    str_field(task, "short_id").or_else(|| str_field(task, "id"))
}

/// `LAT-7: Fix login` or whichever half is present.
fn task_label(task: &Value) -> Option<String> {
    match (task_id(task), str_field(task, "title")) {
        (Some(id), Some(title)) => Some(format!("{}: {}", id, title)),
        (Some(id), None) => Some(id.to_string()),
        (None, Some(title)) => Some(title.to_string()),
        (None, None) => None,
    }
}

/// One list row: label followed by the fields that differ between tasks.
fn task_line(task: &Value) -> Option<String> {
    let label = task_label(task)?;
    let details: Vec<&str> = ["status", "priority", "assigned_to"]
        .iter()
        .filter_map(|key| str_field(task, key))
        .collect();
    if details.is_empty() {
        Some(label)
    } else {
        Some(format!("{} [{}]", label, details.join(", ")))
    }
}

fn task_action(verb: &str, task: &Value) -> Option<String> {
    let label = task_label(task)?;
    if is_event(task) {
        return Some(format!("{} {}", verb, label));
    }
    let mut extras = Vec::new();
    for key in ["type", "priority", "status"] {
        if let Some(v) = str_field(task, key) {
            extras.push(v);
        }
    }
    if extras.is_empty() {
        Some(format!("{} {}", verb, label))
    } else {
        Some(format!("{} {} ({})", verb, label, extras.join(", ")))
    }
}

fn format_list(data: &Value) -> Option<String> {
    let tasks = data.as_array()?;
    if tasks.is_empty() {
        return Some("No tasks found.".to_string());
    }

    let mut lines = vec![format!(
        "{} task{}:",
        tasks.len(),
        if tasks.len() == 1 { "" } else { "s" }
    )];
    lines.extend(
        tasks
            .iter()
            .take(MAX_LISTED)
            .filter_map(task_line)
            .map(|line| format!("- {}", line)),
    );
    if tasks.len() > MAX_LISTED {
        lines.push(format!("...and {} more", tasks.len() - MAX_LISTED));
    }
    Some(lines.join("\n"))
}

fn format_show(task: &Value) -> Option<String> {
    let mut lines = vec![task_label(task)?];

    let meta: Vec<String> = [
        ("Status", "status"),
        ("Priority", "priority"),
        ("Urgency", "urgency"),
        ("Type", "type"),
    ]
    .iter()
    .filter_map(|(label, key)| str_field(task, key).map(|v| format!("{}: {}", label, v)))
    .collect();
    if !meta.is_empty() {
        lines.push(meta.join(" | "));
    }

    lines.push(format!(
        "Assigned: {}",
        str_field(task, "assigned_to").unwrap_or("nobody")
    ));

    if let Some(tags) = task.get("tags").and_then(Value::as_array) {
        let tags: Vec<&str> = tags.iter().filter_map(Value::as_str).collect();
        if !tags.is_empty() {
            lines.push(format!("Tags: {}", tags.join(", ")));
        }
    }

    if let Some(description) = str_field(task, "description") {
        lines.push(String::new());
        lines.push(description.to_string());
    }

    if let Some(comments) = task.get("comments").and_then(Value::as_array) {
        if !comments.is_empty() {
            lines.push(format!("{} comment(s)", comments.len()));
        }
    }

    Some(lines.join("\n"))
}

fn format_status(task: &Value) -> Option<String> {
    let label = task_label(task)?;
    Some(match str_field(task, "status") {
        Some(status) => format!("{} is now {}", label, status),
        None => format!("Updated status of {}", label),
    })
}

fn format_assign(task: &Value) -> Option<String> {
    let label = task_label(task)?;
    Some(match str_field(task, "assigned_to") {
        Some(actor) => format!("{} assigned to {}", label, actor),
        None => format!("{} is now unassigned", label),
    })
}

fn format_comment(data: &Value) -> Option<String> {
    // Either the comment event, which names its task, or the updated task.
    let target = str_field(data, "task_id").or_else(|| task_id(data))?;
    Some(format!("Comment added to {}", target))
}

fn format_next(data: &Value) -> Option<String> {
    if data.is_null() {
        return Some("Nothing is ready to pick up.".to_string());
    }
    task_line(data).map(|line| format!("Next up: {}", line))
}

fn format_weather(data: &Value) -> Option<String> {
    let report = data.as_object()?;
    let mut lines = vec!["Project weather".to_string()];
    for (key, value) in report {
        let rendered = match value {
            Value::String(s) => s.clone(),
            Value::Number(n) => n.to_string(),
            Value::Bool(b) => b.to_string(),
            Value::Array(items) => format!("{} item(s)", items.len()),
            Value::Object(_) => continue,
            Value::Null => continue,
        };
        lines.push(format!("{}: {}", key.replace('_', " "), rendered));
    }
    if lines.len() == 1 {
        return None;
    }
    Some(lines.join("\n"))
}

/// `[["backlog", 3], ["done", 5]]` as `backlog 3, done 5`.
fn count_pairs(value: Option<&Value>) -> Option<String> {
    let pairs: Vec<String> = value?
        .as_array()?
        .iter()
        .filter_map(|pair| {
            let pair = pair.as_array()?;
            let name = pair.first()?.as_str()?;
            let count = pair.get(1)?.as_u64()?;
            Some(format!("{} {}", name, count))
        })
        .collect();
    if pairs.is_empty() {
        None
    } else {
        Some(pairs.join(", "))
    }
}

fn format_stats(data: &Value) -> Option<String> {
    let summary = data.get("summary")?;
    let count = |key: &str| summary.get(key).and_then(Value::as_u64).unwrap_or(0);

    let mut lines = vec![format!(
        "Tasks: {} active, {} archived, {} total",
        count("active_tasks"),
        count("archived_tasks"),
        count("total_tasks")
    )];
    if let Some(by_status) = count_pairs(data.get("by_status")) {
        lines.push(format!("By status: {}", by_status));
    }
    if let Some(by_priority) = count_pairs(data.get("by_priority")) {
        lines.push(format!("By priority: {}", by_priority));
    }
    if let Some(by_assignee) = count_pairs(data.get("by_assignee")) {
        lines.push(format!("By assignee: {}", by_assignee));
    }
    Some(lines.join("\n"))
}
