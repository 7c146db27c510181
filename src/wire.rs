use crate::types::message::{ChatMessage, DeliveryState, UserId};
use crate::types::user::MatchSummary;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A persisted chat row, as returned by the history endpoint and echoed
/// by the direct send endpoint. Timestamps are RFC 3339.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatRecord {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<i64>,
    pub sender_id: String,
    pub receiver_id: String,
    pub message: String,
    pub timestamp: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_id: Option<String>,
}

impl ChatRecord {
    /// Converts a persisted record into its in-log representation.
    /// Server rows are authoritative, so they land confirmed.
    pub fn into_message(self) -> ChatMessage {
        ChatMessage {
            sender_id: UserId::new(self.sender_id),
            receiver_id: UserId::new(self.receiver_id),
            text: self.message,
            timestamp: self.timestamp,
            server_assigned: true,
            state: DeliveryState::Confirmed,
            client_id: self.client_id,
        }
    }
}

/// Body of `GET /chats`.
#[derive(Debug, Clone, Deserialize)]
pub struct ChatsResponse {
    pub chats: Vec<ChatRecord>,
}

/// Body of `GET /match-users`.
#[derive(Debug, Clone, Deserialize)]
pub struct MatchesResponse {
    pub matches: Vec<MatchSummary>,
}

/// Body of `POST /chats`.
#[derive(Debug, Clone, Serialize)]
pub struct SendChatBody<'a> {
    pub sender_id: &'a str,
    pub receiver_id: &'a str,
    pub message: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub client_id: Option<&'a str>,
}

/// One frame on the live channel. Inbound frames carry sender and
/// timestamp; outbound frames omit both (the server assigns them) and
/// carry the correlation id, which the server round-trips on the echo.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatFrame {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sender_id: Option<String>,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_id: Option<String>,
}

impl ChatFrame {
    pub fn parse(text: &str) -> Result<Self, crate::error::ProtocolError> {
        Ok(serde_json::from_str(text)?)
    }
}
