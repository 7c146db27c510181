pub mod auth;
pub mod channel;
pub mod chatlog;
pub mod client;
pub mod config;
pub mod error;
pub mod history;
pub mod http;
pub mod matches;
pub mod send;
pub mod session;
pub mod spotify;
pub mod store;
pub mod transport;
pub mod wire;

pub mod types {
    pub mod events;
    pub mod message;
    pub mod user;
}

#[cfg(test)]
pub(crate) mod test_utils;

pub use client::Client;
pub use config::{ChannelConfig, ClientConfig};
pub use session::ChatSession;
pub use types::message::{ChatMessage, ConversationKey, DeliveryState, UserId};
pub use types::user::MatchSummary;
