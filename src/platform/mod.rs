pub mod signal;

use anyhow::Result;
use async_trait::async_trait;

pub use signal::Envelope;

/// A group text message extracted from a transport envelope.
#[derive(Debug, Clone, PartialEq)]
pub struct IncomingMessage {
    pub text: String,
    /// Display name of the sender, falling back to their number
    pub sender_name: String,
    /// Stable sender identifier (Signal UUID)
    pub sender_id: String,
    pub group_id: String,
    /// Epoch milliseconds
    pub timestamp: i64,
}

/// Chat transport the poll loop drives.
#[async_trait]
pub trait ChatTransport: Send + Sync {
    /// Fetch pending envelopes, oldest first. An empty batch is normal.
    async fn retrieve(&self) -> Result<Vec<Envelope>>;

    /// Send a text reply to a group with optional PNG attachments.
    async fn send(&self, group_id: &str, text: &str, images: &[Vec<u8>]) -> Result<()>;
}

/// Split long text into chunks of at most `max_len` bytes, preferring to break
/// after a newline, then after a space, and never inside a UTF-8 character.
pub fn split_message(text: &str, max_len: usize) -> Vec<String> {
    let max_len = max_len.max(4);
    let mut chunks = Vec::new();
    let mut rest = text;

    while rest.len() > max_len {
        let mut cut = max_len;
        while !rest.is_char_boundary(cut) {
            cut -= 1;
        }
        let window = &rest[..cut];
        let split_at = window
            .rfind('\n')
            .or_else(|| window.rfind(' '))
            .map(|pos| pos + 1)
            .unwrap_or(cut);
        chunks.push(rest[..split_at].to_string());
        rest = &rest[split_at..];
    }

    if !rest.is_empty() || chunks.is_empty() {
        chunks.push(rest.to_string());
    }
    chunks
}
