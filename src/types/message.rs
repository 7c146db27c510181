use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Stable identifier of a user, as resolved from the bearer
/// credential's subject claim.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UserId(String);

impl UserId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for UserId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

/// Canonical identity of a two-party conversation. The pair is stored
/// in lexicographic order, so both participants derive the same key.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ConversationKey {
    first: UserId,
    second: UserId,
}

impl ConversationKey {
    pub fn new(a: UserId, b: UserId) -> Self {
        if a <= b {
            Self { first: a, second: b }
        } else {
            Self { first: b, second: a }
        }
    }

    pub fn contains(&self, user: &UserId) -> bool {
        &self.first == user || &self.second == user
    }

    /// The other participant, or `None` if `me` is not part of the pair.
    pub fn peer_of(&self, me: &UserId) -> Option<&UserId> {
        if &self.first == me {
            Some(&self.second)
        } else if &self.second == me {
            Some(&self.first)
        } else {
            None
        }
    }
}

impl fmt::Display for ConversationKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}<->{}", self.first, self.second)
    }
}

/// Delivery state of a message as known locally. Remote messages and
/// history rows are always `Confirmed`; only this client's own sends
/// pass through `Pending` and possibly `Failed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DeliveryState {
    Pending,
    Confirmed,
    Failed,
}

/// One chat message as held in the conversation log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub sender_id: UserId,
    pub receiver_id: UserId,
    pub text: String,
    pub timestamp: DateTime<Utc>,
    /// Whether `timestamp` came from the server. Optimistic local sends
    /// carry a provisional client clock reading until their echo lands.
    pub server_assigned: bool,
    pub state: DeliveryState,
    /// Correlation id generated at send time and echoed by the server.
    pub client_id: Option<String>,
}

impl ChatMessage {
    pub fn conversation_key(&self) -> ConversationKey {
        ConversationKey::new(self.sender_id.clone(), self.receiver_id.clone())
    }

    /// Whether two messages denote the same server-persisted record.
    /// Only meaningful when both sides carry a server timestamp.
    pub fn same_server_record(&self, other: &ChatMessage) -> bool {
        self.server_assigned
            && other.server_assigned
            && self.sender_id == other.sender_id
            && self.receiver_id == other.receiver_id
            && self.text == other.text
            && self.timestamp == other.timestamp
    }
}
