use crate::types::message::{ChatMessage, UserId};
use crate::types::user::MatchSummary;
use std::sync::Arc;
use tokio::sync::broadcast;

// The size of the broadcast channel buffer.
const CHANNEL_CAPACITY: usize = 100;

/// The live channel for a conversation reached the open state.
#[derive(Debug, Clone)]
pub struct ChannelOpened {
    pub peer_id: UserId,
}

/// The live channel dropped. `will_retry` is false once the retry
/// budget is spent; a manual reopen is then required.
#[derive(Debug, Clone)]
pub struct ChannelClosed {
    pub peer_id: UserId,
    pub will_retry: bool,
}

/// A message was inserted into or updated in the conversation log.
#[derive(Debug, Clone)]
pub struct MessageApplied {
    pub peer_id: UserId,
    pub message: ChatMessage,
}

/// An outbound send could not be delivered; the log entry is marked
/// failed and waits for a manual resend.
#[derive(Debug, Clone)]
pub struct SendFailed {
    pub peer_id: UserId,
    pub client_id: String,
    pub reason: String,
}

/// History could not be loaded; the session continues live-only.
#[derive(Debug, Clone)]
pub struct HistoryUnavailable {
    pub peer_id: UserId,
    pub detail: String,
}

/// The ranked match list was refreshed.
#[derive(Debug, Clone)]
pub struct MatchesUpdated {
    pub matches: Vec<MatchSummary>,
}

/// The stored credential was purged, either by an explicit logout or
/// because the server rejected it.
#[derive(Debug, Clone)]
pub struct LoggedOut;

// Macro to generate EventBus fields and constructor
macro_rules! define_event_bus {
    ($(($field:ident, $type:ty)),* $(,)?) => {
        /// Typed event bus with a separate broadcast channel per event
        /// type. Subscribers take only the streams they care about.
        #[derive(Debug)]
        pub struct EventBus {
            $(
                pub $field: broadcast::Sender<$type>,
            )*
        }

        impl EventBus {
            pub fn new() -> Self {
                Self {
                    $(
                        $field: broadcast::channel(CHANNEL_CAPACITY).0,
                    )*
                }
            }
        }
    };
}

define_event_bus! {
    // Channel lifecycle
    (channel_opened, Arc<ChannelOpened>),
    (channel_closed, Arc<ChannelClosed>),

    // Conversation updates
    (message, Arc<MessageApplied>),
    (send_failed, Arc<SendFailed>),
    (history_unavailable, Arc<HistoryUnavailable>),

    // Account-level events
    (matches_updated, Arc<MatchesUpdated>),
    (logged_out, Arc<LoggedOut>),
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}
