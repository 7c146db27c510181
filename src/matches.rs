use crate::config::ClientConfig;
use crate::error::{AuthError, FetchError, NetworkError};
use crate::http::{HttpClient, HttpRequest, execute_with_timeout};
use crate::types::message::UserId;
use crate::types::user::MatchSummary;
use crate::wire::MatchesResponse;
use log::debug;
use std::sync::Arc;
use tokio::sync::RwLock;

/// Display name used when a peer is not in the match list. Chat works
/// fine without the metadata.
pub const UNKNOWN_USER: &str = "Unknown User";

/// What a chat view needs to label a conversation.
#[derive(Debug, Clone, PartialEq)]
pub struct ChatHeader {
    pub peer_id: UserId,
    pub display_name: String,
    pub profile_image_url: Option<String>,
}

/// The most recently fetched ranked match list. `replace` is the only
/// mutator and swaps the whole list, so readers never observe a partial
/// update.
#[derive(Default)]
pub struct MatchCache {
    matches: RwLock<Vec<MatchSummary>>,
}

impl MatchCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn replace(&self, matches: Vec<MatchSummary>) {
        *self.matches.write().await = matches;
    }

    pub async fn clear(&self) {
        self.matches.write().await.clear();
    }

    pub async fn all(&self) -> Vec<MatchSummary> {
        self.matches.read().await.clone()
    }

    pub async fn lookup(&self, peer_id: &UserId) -> Option<MatchSummary> {
        self.matches
            .read()
            .await
            .iter()
            .find(|m| &m.peer_id == peer_id)
            .cloned()
    }

    /// Header metadata for a conversation with `peer_id`. A peer absent
    /// from the cache gets a placeholder name, never an error.
    pub async fn header_for(&self, peer_id: &UserId) -> ChatHeader {
        match self.lookup(peer_id).await {
            Some(summary) => ChatHeader {
                peer_id: summary.peer_id,
                display_name: summary.display_name,
                profile_image_url: summary.profile_image_url,
            },
            None => ChatHeader {
                peer_id: peer_id.clone(),
                display_name: UNKNOWN_USER.to_string(),
                profile_image_url: None,
            },
        }
    }
}

/// Fetches the ranked match list for the authenticated user.
pub async fn fetch_matches(
    http: &Arc<dyn HttpClient>,
    config: &ClientConfig,
    credential: &str,
) -> Result<Vec<MatchSummary>, FetchError> {
    let url = format!("{}/match-users", config.backend_url.trim_end_matches('/'));
    let request = HttpRequest::get(url).with_bearer(credential);
    let response = execute_with_timeout(http, request, config.request_timeout).await?;

    if response.is_success() {
        let parsed: MatchesResponse = response
            .json()
            .map_err(|e| NetworkError::Transport(format!("bad match list body: {e}")))?;
        debug!(target: "Client", "Fetched {} matches", parsed.matches.len());
        return Ok(parsed.matches);
    }

    match response.status_code {
        code @ (401 | 403) => Err(AuthError::Unauthorized(code).into()),
        code => Err(NetworkError::Status(code).into()),
    }
}
