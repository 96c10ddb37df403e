/// Shared types: timeline entries, wire contract, events
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Author of a message. The counterpart is the fixed support agent
/// on the other side of the conversation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Role {
    #[serde(alias = "user")]
    User,
    #[serde(alias = "admin", alias = "Agent", alias = "agent")]
    Admin,
}

/// Delivery state of a timeline entry. Snapshot messages are always
/// `Confirmed`; only locally-sent entries pass through the other two.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Delivery {
    Pending,
    Confirmed,
    Failed,
}

/// A message as the backend returns it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WireMessage {
    pub id: String,
    pub text: String,
    pub role: Role,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub conversation_id: Option<String>,
}

/// Payload for the send endpoint. `conversation_id` is omitted (not
/// null) on the first message of a session; the server issues one and
/// returns it in the result.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OutgoingMessage {
    pub user_id: String,
    pub admin_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub conversation_id: Option<String>,
    pub text: String,
    pub role: Role,
}

/// Envelope for `GET /api/v1/chat-history`.
#[derive(Debug, Deserialize)]
pub struct HistoryEnvelope {
    pub success: bool,
    #[serde(default)]
    pub data: Vec<WireMessage>,
    #[serde(default)]
    pub message: Option<String>,
}

/// Envelope for `POST /api/v1/send-message`.
#[derive(Debug, Deserialize)]
pub struct SendEnvelope {
    pub success: bool,
    #[serde(default)]
    pub data: Option<SendResult>,
    #[serde(default)]
    pub message: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct SendResult {
    pub result: WireMessage,
}

/// One entry of the chat timeline.
///
/// `client_key` is the local reconciliation handle: generated at send
/// time for outgoing entries, derived from the server id for snapshot
/// entries so repeated polls produce identical state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub client_key: String,
    pub id: Option<String>,
    pub text: String,
    pub role: Role,
    pub created_at: DateTime<Utc>,
    pub conversation_id: Option<String>,
    pub delivery: Delivery,
}

impl ChatMessage {
    /// A fresh optimistic entry for locally-submitted text.
    pub fn outgoing(text: &str) -> Self {
        Self {
            client_key: Uuid::new_v4().to_string(),
            id: None,
            text: text.to_string(),
            role: Role::User,
            created_at: Utc::now(),
            conversation_id: None,
            delivery: Delivery::Pending,
        }
    }

    /// A confirmed entry built from a server snapshot message.
    pub fn from_wire(wire: &WireMessage) -> Self {
        Self {
            client_key: wire.id.clone(),
            id: Some(wire.id.clone()),
            text: wire.text.clone(),
            role: wire.role,
            created_at: wire.created_at,
            conversation_id: wire.conversation_id.clone(),
            delivery: Delivery::Confirmed,
        }
    }
}

/// Synchronizer state as observed by consumers. `Sending` is derived:
/// it is reported whenever any timeline entry is still pending.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncState {
    Uninitialized,
    Synced,
    Sending,
}

/// Events broadcast by the synchronizer to subscribers.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ChatEvent {
    /// A poll completed and the timeline was replaced with the server
    /// snapshot
    Synced { message_count: usize },
    /// The server issued a conversation id for this session's first
    /// message
    ConversationEstablished { conversation_id: String },
    /// A message was appended optimistically and is awaiting the server
    MessagePending { client_key: String },
    /// The server accepted a message and assigned it an id
    MessageConfirmed {
        client_key: String,
        message_id: String,
    },
    /// A send failed; the entry stays visible and can be resent
    MessageFailed { client_key: String, reason: String },
}
