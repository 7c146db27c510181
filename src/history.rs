use crate::config::ClientConfig;
use crate::error::{AuthError, FetchError, NetworkError};
use crate::http::{HttpClient, HttpRequest, execute_with_timeout};
use crate::types::message::{ChatMessage, UserId};
use crate::wire::ChatsResponse;
use log::debug;
use std::sync::Arc;

/// Fetches the persisted conversation between `user_id` and `peer_id`.
/// The server returns rows ascending by timestamp; they are converted
/// as-is and the log re-sorts on seed, so row order is not load-bearing.
pub async fn load_history(
    http: &Arc<dyn HttpClient>,
    config: &ClientConfig,
    credential: &str,
    user_id: &UserId,
    peer_id: &UserId,
) -> Result<Vec<ChatMessage>, FetchError> {
    let url = format!(
        "{}/chats?sender_id={}&receiver_id={}",
        config.backend_url.trim_end_matches('/'),
        urlencoding::encode(user_id.as_str()),
        urlencoding::encode(peer_id.as_str())
    );
    debug!(target: "History", "Fetching history for {user_id} <-> {peer_id}");

    let request = HttpRequest::get(url).with_bearer(credential);
    let response = execute_with_timeout(http, request, config.request_timeout).await?;

    if response.is_success() {
        let parsed: ChatsResponse = response
            .json()
            .map_err(|e| NetworkError::Transport(format!("bad history body: {e}")))?;
        debug!(target: "History", "Loaded {} persisted messages", parsed.chats.len());
        return Ok(parsed.chats.into_iter().map(|r| r.into_message()).collect());
    }

    match response.status_code {
        code @ (401 | 403) => Err(AuthError::Unauthorized(code).into()),
        code => Err(NetworkError::Status(code).into()),
    }
}
