use crate::auth;
use crate::config::ClientConfig;
use crate::error::{AuthError, FetchError};
use crate::http::HttpClient;
use crate::matches::{self, MatchCache};
use crate::session::{self, ChatSession, SessionParams};
use crate::spotify::{self, NowPlaying};
use crate::store::PersistenceManager;
use crate::store::commands::SessionCommand;
use crate::transport::TransportFactory;
use crate::types::events::{EventBus, LoggedOut, MatchesUpdated};
use crate::types::message::UserId;
use crate::types::user::MatchSummary;
use log::{debug, info, warn};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;

struct ActiveSession {
    peer_id: UserId,
    session: ChatSession,
    task: JoinHandle<()>,
}

/// The top-level entry point: owns the credential, the match cache and
/// at most one chat session at a time.
///
/// Opening a chat supersedes the previous one. Sessions carry a
/// generation number; bumping the live generation is what retires an
/// old session's background task, so a slow task from a superseded
/// session can never write into the current conversation.
pub struct Client {
    config: ClientConfig,
    http_client: Arc<dyn HttpClient>,
    transport_factory: Arc<dyn TransportFactory>,
    persistence_manager: Arc<PersistenceManager>,
    match_cache: Arc<MatchCache>,
    event_bus: Arc<EventBus>,
    session_generation: Arc<AtomicU64>,
    active_session: Mutex<Option<ActiveSession>>,
}

impl Client {
    pub async fn new(
        persistence_manager: Arc<PersistenceManager>,
        transport_factory: Arc<dyn TransportFactory>,
        http_client: Arc<dyn HttpClient>,
        config: ClientConfig,
    ) -> Arc<Self> {
        let match_cache = Arc::new(MatchCache::new());
        let snapshot = persistence_manager.get_session_snapshot().await;
        if !snapshot.matches.is_empty() {
            debug!(target: "Client", "Restored {} cached matches", snapshot.matches.len());
            match_cache.replace(snapshot.matches).await;
        }

        Arc::new(Self {
            config,
            http_client,
            transport_factory,
            persistence_manager,
            match_cache,
            event_bus: Arc::new(EventBus::new()),
            session_generation: Arc::new(AtomicU64::new(0)),
            active_session: Mutex::new(None),
        })
    }

    /// All events the client emits, for the caller to subscribe to.
    pub fn event_bus(&self) -> Arc<EventBus> {
        self.event_bus.clone()
    }

    /// Accepts a bearer credential, derives the user identity from its
    /// claim set and persists both. No server round-trip happens here;
    /// a bad credential surfaces on the first authenticated request.
    pub async fn login(&self, credential: &str) -> Result<UserId, AuthError> {
        let user_id = auth::resolve_user_id(credential)?;
        self.persistence_manager
            .process_command(SessionCommand::SetCredential(Some(credential.to_string())))
            .await;
        self.persistence_manager
            .process_command(SessionCommand::SetUserId(Some(user_id.clone())))
            .await;
        info!(target: "Client", "Logged in as {user_id}");
        Ok(user_id)
    }

    /// The authenticated user, if a credential is stored.
    pub async fn current_user(&self) -> Option<UserId> {
        let snapshot = self.persistence_manager.get_session_snapshot().await;
        if snapshot.is_logged_in() {
            snapshot.user_id
        } else {
            None
        }
    }

    async fn credential_pair(&self) -> Result<(String, UserId), AuthError> {
        let snapshot = self.persistence_manager.get_session_snapshot().await;
        let credential = snapshot.credential.ok_or(AuthError::Missing)?;
        let user_id = snapshot.user_id.ok_or(AuthError::Missing)?;
        Ok((credential, user_id))
    }

    /// The last known ranked match list, without touching the network.
    pub async fn matches(&self) -> Vec<MatchSummary> {
        self.match_cache.all().await
    }

    /// Fetches the ranked match list, replacing the cache and the
    /// persisted snapshot. A rejected credential logs the client out.
    pub async fn refresh_matches(&self) -> Result<Vec<MatchSummary>, FetchError> {
        let (credential, _) = self.credential_pair().await?;
        match matches::fetch_matches(&self.http_client, &self.config, &credential).await {
            Ok(list) => {
                self.match_cache.replace(list.clone()).await;
                self.persistence_manager
                    .process_command(SessionCommand::SetMatches(list.clone()))
                    .await;
                let _ = self.event_bus.matches_updated.send(Arc::new(MatchesUpdated {
                    matches: list.clone(),
                }));
                Ok(list)
            }
            Err(FetchError::Auth(e)) => {
                warn!(target: "Client", "Match refresh rejected the credential: {e}");
                self.logout().await;
                Err(FetchError::Auth(e))
            }
            Err(e) => Err(e),
        }
    }

    /// Opens a conversation with `peer_id`, superseding any open chat.
    /// The returned handle is live immediately; history loading and the
    /// channel connection happen behind it.
    pub async fn open_chat(&self, peer_id: &UserId) -> Result<ChatSession, AuthError> {
        let (credential, user_id) = self.credential_pair().await?;
        self.close_chat().await;

        let header = self.match_cache.header_for(peer_id).await;
        let generation = self.session_generation.fetch_add(1, Ordering::SeqCst) + 1;
        info!(target: "Client", "Opening chat with {peer_id} (generation {generation})");

        let (session, task) = session::spawn(SessionParams {
            user_id,
            peer_id: peer_id.clone(),
            credential,
            config: self.config.clone(),
            http: self.http_client.clone(),
            transport_factory: self.transport_factory.clone(),
            persistence: self.persistence_manager.clone(),
            bus: self.event_bus.clone(),
            generation,
            live_generation: self.session_generation.clone(),
            header,
        });

        *self.active_session.lock().await = Some(ActiveSession {
            peer_id: peer_id.clone(),
            session: session.clone(),
            task,
        });
        Ok(session)
    }

    /// Closes the open chat, if any, and waits for its task to finish.
    pub async fn close_chat(&self) {
        let active = self.active_session.lock().await.take();
        if let Some(active) = active {
            self.session_generation.fetch_add(1, Ordering::SeqCst);
            active.session.request_close().await;
            if let Err(e) = active.task.await {
                warn!(target: "Client", "Chat session task ended abnormally: {e}");
            }
            debug!(target: "Client", "Closed chat with {}", active.peer_id);
        }
    }

    /// Discards the credential and everything derived from it.
    pub async fn logout(&self) {
        self.close_chat().await;
        self.match_cache.clear().await;
        if let Err(e) = self.persistence_manager.clear_session().await {
            warn!(target: "Client", "Failed to clear persisted session: {e}");
        }
        let _ = self.event_bus.logged_out.send(Arc::new(LoggedOut));
        info!(target: "Client", "Logged out");
    }

    /// What the listener is playing right now, via a separate playback
    /// token. A rejection here does not log the client out.
    pub async fn now_playing(
        &self,
        playback_token: &str,
    ) -> Result<Option<NowPlaying>, FetchError> {
        spotify::fetch_now_playing(&self.http_client, &self.config, playback_token).await
    }

    /// Closes the chat and flushes pending persistence writes.
    pub async fn shutdown(&self) {
        self.close_chat().await;
        if let Err(e) = self.persistence_manager.flush().await {
            warn!(target: "Client", "Failed to flush session state: {e}");
        }
        debug!(target: "Client", "Client shut down");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::SessionError;
    use crate::store::MemoryStore;
    use crate::test_utils::{MockHttpClient, MockTransportFactory, test_credential};

    async fn test_client(
        http: Arc<MockHttpClient>,
        factory: Arc<MockTransportFactory>,
    ) -> Arc<Client> {
        let backend = Arc::new(MemoryStore::new());
        let persistence = Arc::new(PersistenceManager::new(backend).await.unwrap());
        Client::new(
            persistence,
            factory,
            http,
            ClientConfig::new("http://backend:8000", "ws://backend:8000"),
        )
        .await
    }

    fn matches_body() -> &'static str {
        r#"{"matches":[{"spotify_id":"bob","display_name":"Bob","similarity":0.93,"shared_artists":["Radiohead"]}]}"#
    }

    #[tokio::test]
    async fn login_persists_credential_and_identity() {
        let client = test_client(MockHttpClient::new(), MockTransportFactory::new()).await;

        let user_id = client.login(&test_credential("alice")).await.unwrap();
        assert_eq!(user_id, UserId::new("alice"));
        assert_eq!(client.current_user().await, Some(UserId::new("alice")));
    }

    #[tokio::test]
    async fn login_rejects_malformed_credential() {
        let client = test_client(MockHttpClient::new(), MockTransportFactory::new()).await;

        assert!(client.login("not-a-token").await.is_err());
        assert_eq!(client.current_user().await, None);
    }

    #[tokio::test]
    async fn refresh_matches_updates_cache_and_snapshot() {
        let http = MockHttpClient::new();
        http.push_json(200, matches_body());
        let client = test_client(http, MockTransportFactory::new()).await;
        client.login(&test_credential("alice")).await.unwrap();
        let mut updates = client.event_bus().matches_updated.subscribe();

        let list = client.refresh_matches().await.unwrap();
        assert_eq!(list.len(), 1);
        assert_eq!(list[0].peer_id, UserId::new("bob"));
        assert_eq!(client.matches().await, list);

        let event = updates.recv().await.unwrap();
        assert_eq!(event.matches, list);
    }

    #[tokio::test]
    async fn refresh_matches_requires_login() {
        let client = test_client(MockHttpClient::new(), MockTransportFactory::new()).await;
        assert_eq!(
            client.refresh_matches().await,
            Err(FetchError::Auth(AuthError::Missing))
        );
    }

    #[tokio::test]
    async fn rejected_refresh_forces_logout() {
        let http = MockHttpClient::new();
        http.push_status(401);
        let client = test_client(http, MockTransportFactory::new()).await;
        client.login(&test_credential("alice")).await.unwrap();
        let mut logged_out = client.event_bus().logged_out.subscribe();

        let result = client.refresh_matches().await;
        assert_eq!(
            result,
            Err(FetchError::Auth(AuthError::Unauthorized(401)))
        );
        logged_out.recv().await.unwrap();
        assert_eq!(client.current_user().await, None);
        assert!(client.matches().await.is_empty());
    }

    #[tokio::test]
    async fn open_chat_requires_login() {
        let client = test_client(MockHttpClient::new(), MockTransportFactory::new()).await;
        assert!(matches!(
            client.open_chat(&UserId::new("bob")).await,
            Err(AuthError::Missing)
        ));
    }

    #[tokio::test]
    async fn open_chat_resolves_header_from_cache() {
        let http = MockHttpClient::new();
        http.push_json(200, matches_body());
        http.push_json(200, r#"{"chats":[]}"#);
        let client = test_client(http, MockTransportFactory::new()).await;
        client.login(&test_credential("alice")).await.unwrap();
        client.refresh_matches().await.unwrap();

        let session = client.open_chat(&UserId::new("bob")).await.unwrap();
        assert_eq!(session.header().display_name, "Bob");

        client.close_chat().await;
        assert_eq!(session.send("late").await, Err(SessionError::Closed));
    }

    #[tokio::test]
    async fn opening_second_chat_supersedes_first() {
        let http = MockHttpClient::new();
        http.push_json(200, r#"{"chats":[]}"#);
        http.push_json(200, r#"{"chats":[]}"#);
        let client = test_client(http, MockTransportFactory::new()).await;
        client.login(&test_credential("alice")).await.unwrap();

        let first = client.open_chat(&UserId::new("bob")).await.unwrap();
        let second = client.open_chat(&UserId::new("carol")).await.unwrap();

        assert_eq!(first.send("hello").await, Err(SessionError::Closed));
        assert!(second.snapshot().await.is_ok());

        client.shutdown().await;
    }

    #[tokio::test]
    async fn logout_discards_everything() {
        let http = MockHttpClient::new();
        http.push_json(200, matches_body());
        let client = test_client(http, MockTransportFactory::new()).await;
        client.login(&test_credential("alice")).await.unwrap();
        client.refresh_matches().await.unwrap();

        client.logout().await;
        assert_eq!(client.current_user().await, None);
        assert!(client.matches().await.is_empty());
    }
}
