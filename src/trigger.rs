/// Classification of an inbound chat line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Trigger {
    /// Addressed to the bot; holds the prefix-stripped, trimmed command text.
    Command(String),
    /// A prefix matched but nothing followed it.
    Empty,
    /// Ordinary chatter.
    NotTriggered,
}

impl Trigger {
    /// A prefix matched, whether or not a command followed it.
    pub fn matched(&self) -> bool {
        !matches!(self, Trigger::NotTriggered)
    }
}

/// Decides whether a message is addressed to the bot by its configured prefixes.
#[derive(Debug, Clone)]
pub struct TriggerDetector {
    prefixes: Vec<String>,
}

impl TriggerDetector {
    pub fn new(prefixes: Vec<String>) -> Self {
        let prefixes = prefixes.into_iter().filter(|p| !p.is_empty()).collect();
        Self { prefixes }
    }

    pub fn prefixes(&self) -> &[String] {
        &self.prefixes
    }

    /// First configured prefix that matches (case-insensitively) wins.
    pub fn detect(&self, text: &str) -> Trigger {
        for prefix in &self.prefixes {
            if let Some(rest) = strip_prefix_ignore_case(text, prefix) {
                let command = rest.trim();
                if command.is_empty() {
                    return Trigger::Empty;
                }
                return Trigger::Command(command.to_string());
            }
        }
        Trigger::NotTriggered
    }
}

/// Strip `prefix` from the start of `text`, comparing character by character
/// with Unicode lowercasing. Returns the untouched remainder.
fn strip_prefix_ignore_case<'a>(text: &'a str, prefix: &str) -> Option<&'a str> {
    let mut chars = text.char_indices();
    let mut end = 0;
    for p in prefix.chars() {
        let (idx, c) = chars.next()?;
        if !c.to_lowercase().eq(p.to_lowercase()) {
            return None;
        }
        end = idx + c.len_utf8();
    }
    Some(&text[end..])
}
