use anyhow::{Context, Result};
use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::{split_message, ChatTransport, IncomingMessage};

/// Longest single message body sent before splitting.
const MAX_MESSAGE_LEN: usize = 4000;

/// Envelope returned by signal-cli-rest-api `GET /v1/receive/{number}`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Envelope {
    #[allow(dead_code)]
    #[serde(default)]
    pub account: Option<String>,
    #[serde(default)]
    pub envelope: EnvelopeBody,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EnvelopeBody {
    #[serde(default)]
    pub source: Option<String>,
    #[serde(default)]
    pub source_uuid: Option<String>,
    #[serde(default)]
    pub source_name: Option<String>,
    #[serde(default)]
    pub timestamp: Option<i64>,
    #[serde(default)]
    pub data_message: Option<DataMessage>,
    #[allow(dead_code)]
    #[serde(default)]
    pub sync_message: Option<serde_json::Value>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DataMessage {
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub group_info: Option<GroupInfo>,
    #[serde(default)]
    pub timestamp: Option<i64>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GroupInfo {
    #[serde(default)]
    pub group_id: Option<String>,
    #[allow(dead_code)]
    #[serde(default, rename = "type")]
    pub group_type: Option<String>,
}

impl Envelope {
    /// Extract a group text message; direct messages, sync messages and
    /// receipts yield `None`.
    pub fn normalize(&self) -> Option<IncomingMessage> {
        let body = &self.envelope;
        let data = body.data_message.as_ref()?;
        let text = data.message.as_deref().filter(|m| !m.is_empty())?;
        let group_id = data
            .group_info
            .as_ref()
            .and_then(|g| g.group_id.as_deref())
            .filter(|g| !g.is_empty())?;

        let sender_name = body
            .source_name
            .as_deref()
            .filter(|n| !n.is_empty())
            .or(body.source.as_deref())
            .unwrap_or("unknown")
            .to_string();
        let sender_id = body
            .source_uuid
            .clone()
            .or_else(|| body.source.clone())
            .unwrap_or_default();

        Some(IncomingMessage {
            text: text.to_string(),
            sender_name,
            sender_id,
            group_id: group_id.to_string(),
            timestamp: data.timestamp.or(body.timestamp).unwrap_or_default(),
        })
    }

    /// A group text envelope, as the REST API would deliver it.
    #[cfg(test)]
    pub fn group_text(group_id: &str, sender: &str, text: &str, timestamp: i64) -> Self {
        Self {
            account: None,
            envelope: EnvelopeBody {
                source: Some(format!("+1555{}", timestamp)),
                source_uuid: Some(format!("uuid-{}", sender)),
                source_name: Some(sender.to_string()),
                timestamp: Some(timestamp),
                data_message: Some(DataMessage {
                    message: Some(text.to_string()),
                    group_info: Some(GroupInfo {
                        group_id: Some(group_id.to_string()),
                        group_type: Some("DELIVER".to_string()),
                    }),
                    timestamp: Some(timestamp),
                }),
                sync_message: None,
            },
        }
    }
}

#[derive(Debug, Serialize)]
struct SendRequest<'a> {
    message: &'a str,
    number: &'a str,
    recipients: Vec<&'a str>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    base64_attachments: Vec<String>,
}

/// Client for a signal-cli REST API instance bound to one phone number.
pub struct SignalClient {
    client: reqwest::Client,
    api_url: String,
    phone_number: String,
}

impl SignalClient {
    pub fn new(api_url: &str, phone_number: &str) -> Self {
        Self {
            client: reqwest::Client::new(),
            api_url: api_url.trim_end_matches('/').to_string(),
            phone_number: phone_number.to_string(),
        }
    }

    fn receive_url(&self) -> String {
        format!(
            "{}/v1/receive/{}",
            self.api_url,
            urlencoding::encode(&self.phone_number)
        )
    }

    async fn send_one(&self, group_id: &str, text: &str, images: &[Vec<u8>]) -> Result<()> {
        let body = SendRequest {
            message: text,
            number: &self.phone_number,
            recipients: vec![group_id],
            base64_attachments: images.iter().map(|img| STANDARD.encode(img)).collect(),
        };

        let response = self
            .client
            .post(format!("{}/v2/send", self.api_url))
            .json(&body)
            .send()
            .await
            .context("Failed to send message to Signal API")?;

        let status = response.status();
        if !status.is_success() {
            let error_body = response.text().await.unwrap_or_default();
            anyhow::bail!("Signal send failed ({}): {}", status, error_body);
        }
        Ok(())
    }
}

#[async_trait]
impl ChatTransport for SignalClient {
    async fn retrieve(&self) -> Result<Vec<Envelope>> {
        let response = self
            .client
            .get(self.receive_url())
            .send()
            .await
            .context("Failed to poll Signal API")?;

        let status = response.status();
        if !status.is_success() {
            anyhow::bail!("Signal receive failed ({})", status);
        }

        let raw: Vec<serde_json::Value> = response
            .json()
            .await
            .context("Failed to parse Signal receive response")?;
        Ok(parse_envelopes(raw))
    }

    async fn send(&self, group_id: &str, text: &str, images: &[Vec<u8>]) -> Result<()> {
        for (i, chunk) in split_message(text, MAX_MESSAGE_LEN).iter().enumerate() {
            let attachments: &[Vec<u8>] = if i == 0 { images } else { &[] };
            self.send_one(group_id, chunk, attachments).await?;
        }
        Ok(())
    }
}

/// Decode each envelope on its own so one malformed entry doesn't sink the batch.
fn parse_envelopes(raw: Vec<serde_json::Value>) -> Vec<Envelope> {
    raw.into_iter()
        .filter_map(|value| match serde_json::from_value::<Envelope>(value) {
            Ok(env) => Some(env),
            Err(e) => {
                debug!("Dropping malformed envelope: {}", e);
                None
            }
        })
        .collect()
}
