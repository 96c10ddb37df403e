/// HTTP gateway to the remote chat backend
///
/// Stateless request/response wrapper. Every transport, status, and
/// decode failure is converted to a `ChatError` at this boundary; the
/// caller decides the fallback.
use crate::config::Config;
use crate::error::{ChatError, Result};
use crate::types::{HistoryEnvelope, OutgoingMessage, SendEnvelope, WireMessage};
use reqwest::Client;
use tracing::debug;

pub struct ChatGateway {
    client: Client,
    base_url: String,
}

impl ChatGateway {
    pub fn new(config: &Config) -> Result<Self> {
        let client = Client::builder()
            .timeout(config.request_timeout)
            .build()
            .map_err(ChatError::Http)?;
        Ok(Self {
            client,
            base_url: config.backend_url.trim_end_matches('/').to_string(),
        })
    }

    /// Fetch the full message list for a conversation, in server order.
    ///
    /// An empty conversation id means "no conversation yet": the call
    /// is skipped entirely and the list is empty.
    pub async fn list_messages(&self, conversation_id: &str) -> Result<Vec<WireMessage>> {
        if conversation_id.is_empty() {
            return Ok(Vec::new());
        }

        let url = format!(
            "{}/api/v1/chat-history?conversationId={}",
            self.base_url,
            urlencoding::encode(conversation_id)
        );
        debug!("GET {}", url);

        let response = self.client.get(&url).send().await?;
        if !response.status().is_success() {
            return Err(ChatError::Backend(format!(
                "chat-history returned HTTP {}",
                response.status().as_u16()
            )));
        }

        let envelope: HistoryEnvelope = response.json().await?;
        if !envelope.success {
            return Err(ChatError::Backend(envelope.message.unwrap_or_else(|| {
                "chat-history reported failure".to_string()
            })));
        }

        Ok(envelope.data)
    }

    /// Append a message to the conversation and return the confirmed
    /// copy. On a first send the payload omits the conversation id and
    /// the returned message carries the server-issued one.
    pub async fn append_message(&self, outgoing: &OutgoingMessage) -> Result<WireMessage> {
        let url = format!("{}/api/v1/send-message", self.base_url);
        debug!("POST {}", url);

        let response = self.client.post(&url).json(outgoing).send().await?;
        if !response.status().is_success() {
            return Err(ChatError::Backend(format!(
                "send-message returned HTTP {}",
                response.status().as_u16()
            )));
        }

        let envelope: SendEnvelope = response.json().await?;
        match envelope.data {
            Some(data) if envelope.success => Ok(data.result),
            _ => Err(ChatError::Backend(envelope.message.unwrap_or_else(|| {
                "send-message reported failure".to_string()
            }))),
        }
    }
}
