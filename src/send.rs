use crate::config::ClientConfig;
use crate::error::{AuthError, FetchError, NetworkError};
use crate::http::{HttpClient, HttpRequest, execute_with_timeout};
use crate::types::message::ChatMessage;
use crate::wire::{ChatFrame, ChatRecord, SendChatBody};
use log::debug;
use std::sync::Arc;

/// Fresh correlation id for an outbound message. Random, unique per
/// send attempt's message (resends keep the original id).
pub fn new_client_id() -> String {
    hex::encode(rand::random::<[u8; 8]>())
}

/// Delivers one message over the request/response path and returns the
/// persisted record the server echoes back. Used when the live channel
/// is not open.
pub async fn send_chat(
    http: &Arc<dyn HttpClient>,
    config: &ClientConfig,
    credential: &str,
    message: &ChatMessage,
) -> Result<ChatRecord, FetchError> {
    let url = format!("{}/chats", config.backend_url.trim_end_matches('/'));
    let body = SendChatBody {
        sender_id: message.sender_id.as_str(),
        receiver_id: message.receiver_id.as_str(),
        message: &message.text,
        client_id: message.client_id.as_deref(),
    };
    let request = HttpRequest::post(url)
        .with_bearer(credential)
        .with_json_body(&body)
        .map_err(|e| NetworkError::Transport(e.to_string()))?;

    debug!(target: "Session", "Delivering message via direct send");
    let response = execute_with_timeout(http, request, config.request_timeout).await?;

    if response.is_success() {
        let record: ChatRecord = response
            .json()
            .map_err(|e| NetworkError::Transport(format!("bad send echo body: {e}")))?;
        return Ok(record);
    }

    match response.status_code {
        code @ (401 | 403) => Err(AuthError::Unauthorized(code).into()),
        code => Err(NetworkError::Status(code).into()),
    }
}

/// The live-channel frame for an outbound message. Sender and timestamp
/// stay unset; the server fills both in and round-trips the correlation
/// id.
pub fn outbound_frame(message: &ChatMessage) -> ChatFrame {
    ChatFrame {
        sender_id: None,
        message: message.text.clone(),
        timestamp: None,
        client_id: message.client_id.clone(),
    }
}
