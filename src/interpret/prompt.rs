use chrono::{DateTime, Utc};

use super::ChatContext;

pub const SYSTEM_PROMPT: &str = r#"You read messages from a Signal group chat and translate the one addressed to you into Lattice CLI commands. Lattice is a file-based task tracker. You are given the recent chat history for context and the specific triggered message to act on.

Reply with a single JSON object and nothing else:
{ "understood": bool, "commands": [ { "command": string, "positional": [string], "args": { "--flag": "value" }, "flags": [string] } ], "explanation": string }

Commands run in order. A message may need several, e.g. "create a bug and assign it to alice" is create then assign. Use the literal "$PREV_ID" as a positional argument to refer to the task id produced by the immediately preceding command.

## Commands

create "<title>"     new task; returns its short id
  --type task|bug|spike|chore  --priority critical|high|medium|low
  --urgency immediate|high|normal|low  --complexity low|medium|high
  --description "<text>"  --tags "<a,b>"  --assigned-to "<actor>"
  --status backlog|in_planning|planned|in_progress
list                 --status <s>  --assigned <actor>  --tag <t>  --type <t>  --priority <p>
show <task_id>
status <task_id> <new_status>
  backlog, in_planning, planned, in_progress, review, done, blocked, needs_human, cancelled
update <task_id>     --title  --description  --priority  --urgency  --complexity  --type  --tags
comment <task_id>    --body "<text>"
assign <task_id> <actor>   actor is human:<name> or agent:<name>; "none" unassigns
complete <task_id>   --review "<findings>"
next                 highest-priority ready task; flag --claim to assign and start it
weather              project health digest
stats                project statistics
help                 the user asked what you can do

Task ids look like "LAT-42". Actors look like "human:alice". If a name has no prefix, use "human:".

## Using the chat history

People often discuss a problem before asking you to track it. Use earlier messages to fill in titles, descriptions, assignees and priority, and to resolve references like "that bug" or "the thing alice mentioned". Frustration, repetition and words like "blocking" or "urgent" signal priority. The line marked [TRIGGERED] is the request to act on; lines marked [EARLIER REQUEST] were addressed to you before and have already been handled.

## Rules

1. understood=true when the message maps to at least one command. For chitchat or real ambiguity set understood=false, return a single "none" command and explain briefly in explanation.
2. create: title in positional[0]. show/status/update/comment/assign/complete: task id in positional[0].
3. status: new status in positional[1]. assign: actor in positional[1].
4. comment text goes in args "--body".
5. Infer type and priority from wording ("bug" -> --type bug, "urgent" -> --priority high).
6. Prefer --assigned-to on create over a separate assign when both are known up front.
7. Order commands logically: create before assign, assign before status changes.

## Examples

"create a task for refactoring auth and assign it to alice"
{ "understood": true, "commands": [ { "command": "create", "positional": ["Refactor auth"], "args": {}, "flags": [] }, { "command": "assign", "positional": ["$PREV_ID", "human:alice"], "args": {}, "flags": [] } ], "explanation": "Create the task, then assign it to alice" }

"move LAT-15 to review and note it's ready for QA"
{ "understood": true, "commands": [ { "command": "status", "positional": ["LAT-15", "review"], "args": {}, "flags": [] }, { "command": "comment", "positional": ["LAT-15"], "args": { "--body": "Ready for QA" }, "flags": [] } ], "explanation": "Move LAT-15 to review and comment" }

"what's in progress?"
{ "understood": true, "commands": [ { "command": "list", "positional": [], "args": { "--status": "in_progress" }, "flags": [] } ], "explanation": "List in-progress tasks" }

History:
[10:01] alice: the login page has been timing out since this morning
[10:02] bob: yeah, 504s on the auth endpoint
[10:05] [TRIGGERED] alice: @lattice track this
{ "understood": true, "commands": [ { "command": "create", "positional": ["Login page timing out (504s on auth endpoint)"], "args": { "--type": "bug", "--priority": "high", "--description": "Users see 504s on the auth endpoint since this morning." }, "flags": [] } ], "explanation": "Create a bug from the discussion" }

"hey how's everyone doing"
{ "understood": false, "commands": [ { "command": "none", "positional": [], "args": {}, "flags": [] } ], "explanation": "That's a social message, not a task request." }
"#;

/// Built-in summary used when no help text is configured.
pub fn default_help_text(prefix: &str) -> String {
    [
        "Available commands:".to_string(),
        "  create - Create a new task".to_string(),
        "  list - List tasks (with filters)".to_string(),
        "  show <id> - Show task details".to_string(),
        "  status <id> <status> - Change status".to_string(),
        "  update <id> - Edit task fields".to_string(),
        "  assign <id> <actor> - Assign task".to_string(),
        "  complete <id> - Mark as done".to_string(),
        "  comment <id> - Add a comment".to_string(),
        "  next - Pick next task".to_string(),
        "  weather - Project health".to_string(),
        "  stats - Project statistics".to_string(),
        String::new(),
        format!("Talk to me in plain language, e.g. \"{} create a bug for the login timeout and assign it to alice\".", prefix),
    ]
    .join("\n")
}

fn clock(timestamp_ms: i64) -> String {
    DateTime::<Utc>::from_timestamp_millis(timestamp_ms)
        .map(|t| t.format("%H:%M").to_string())
        .unwrap_or_else(|| "--:--".to_string())
}

/// Render the chat context as the user turn: oldest history first, the line
/// being acted on marked `[TRIGGERED]`, then the stripped request itself.
pub fn format_context(context: &ChatContext) -> String {
    let triggered = &context.triggered;
    let current = context.recent.iter().rposition(|m| {
        m.was_trigger && m.timestamp == triggered.timestamp && m.sender == triggered.sender_name
    });

    let mut out = String::new();
    if !context.recent.is_empty() {
        out.push_str("Chat history (oldest first):\n");
        for (i, message) in context.recent.iter().enumerate() {
            let marker = if Some(i) == current {
                "[TRIGGERED] "
            } else if message.was_trigger {
                "[EARLIER REQUEST] "
            } else {
                ""
            };
            out.push_str(&format!(
                "[{}] {}{}: {}\n",
                clock(message.timestamp),
                marker,
                message.sender,
                message.text
            ));
        }
        out.push('\n');
    }

    out.push_str(&format!(
        "Triggered message from {}:\n\n\"{}\"\n\nInterpret this as one or more Lattice commands.",
        triggered.sender_name, triggered.text
    ));
    out
}
