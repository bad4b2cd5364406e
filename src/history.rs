use std::collections::{HashMap, VecDeque};

pub const DEFAULT_CAPACITY: usize = 50;

/// A chat line kept as interpretation context, whether or not it addressed the bot.
#[derive(Debug, Clone, PartialEq)]
pub struct ChatMessage {
    pub sender: String,
    pub text: String,
    /// Epoch milliseconds as reported by the transport.
    pub timestamp: i64,
    pub was_trigger: bool,
}

/// Per-group ring buffer of recent chat messages, oldest first.
#[derive(Debug)]
pub struct HistoryStore {
    capacity: usize,
    groups: HashMap<String, VecDeque<ChatMessage>>,
}

impl HistoryStore {
    /// A zero capacity is raised to one so the newest message is always kept.
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            groups: HashMap::new(),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Append a message, evicting from the front until the buffer fits.
    pub fn record(&mut self, group_id: &str, message: ChatMessage) {
        let buffer = self
            .groups
            .entry(group_id.to_string())
            .or_insert_with(|| VecDeque::with_capacity(self.capacity));
        buffer.push_back(message);
        while buffer.len() > self.capacity {
            buffer.pop_front();
        }
    }

    /// Independent copy of a group's buffer; empty for unseen groups.
    pub fn snapshot(&self, group_id: &str) -> Vec<ChatMessage> {
        self.groups
            .get(group_id)
            .map(|buffer| buffer.iter().cloned().collect())
            .unwrap_or_default()
    }

    pub fn groups(&self) -> impl Iterator<Item = &str> {
        self.groups.keys().map(String::as_str)
    }
}

impl Default for HistoryStore {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn msg(text: &str, timestamp: i64) -> ChatMessage {
        ChatMessage {
            sender: "alice".to_string(),
            text: text.to_string(),
            timestamp,
            was_trigger: false,
        }
    }

    fn texts(messages: &[ChatMessage]) -> Vec<&str> {
        messages.iter().map(|m| m.text.as_str()).collect()
    }

    #[test]
    fn test_keeps_last_messages_in_arrival_order() {
        let mut store = HistoryStore::new(3);
        for (i, text) in ["one", "two", "three", "four"].iter().enumerate() {
            store.record("G", msg(text, i as i64));
        }
        assert_eq!(texts(&store.snapshot("G")), vec!["two", "three", "four"]);
    }

    #[test]
    fn test_length_never_exceeds_capacity() {
        let mut store = HistoryStore::new(5);
        for total in 1..=20usize {
            store.record("G", msg(&total.to_string(), total as i64));
            let snapshot = store.snapshot("G");
            assert_eq!(snapshot.len(), total.min(5));
            assert_eq!(snapshot.last().unwrap().text, total.to_string());
            let first = total.saturating_sub(5) + 1;
            assert_eq!(snapshot[0].text, first.to_string());
        }
    }

    #[test]
    fn test_snapshot_is_not_affected_by_later_records() {
        let mut store = HistoryStore::new(2);
        store.record("G", msg("a", 1));
        let before = store.snapshot("G");
        store.record("G", msg("b", 2));
        store.record("G", msg("c", 3));
        assert_eq!(texts(&before), vec!["a"]);
        assert_eq!(texts(&store.snapshot("G")), vec!["b", "c"]);
    }

    #[test]
    fn test_unseen_group_is_empty() {
        let mut store = HistoryStore::default();
        store.record("G", msg("hello", 1));
        assert!(store.snapshot("other").is_empty());
        assert_eq!(store.capacity(), DEFAULT_CAPACITY);
    }

    #[test]
    fn test_groups_are_isolated() {
        let mut store = HistoryStore::new(2);
        store.record("A", msg("a1", 1));
        store.record("B", msg("b1", 2));
        store.record("A", msg("a2", 3));
        store.record("A", msg("a3", 4));
        assert_eq!(texts(&store.snapshot("A")), vec!["a2", "a3"]);
        assert_eq!(texts(&store.snapshot("B")), vec!["b1"]);
        let mut groups: Vec<&str> = store.groups().collect();
        groups.sort();
        assert_eq!(groups, vec!["A", "B"]);
    }
}
