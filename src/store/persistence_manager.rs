use super::commands::{SessionCommand, apply_command_to_session};
use super::error::StoreError;
use super::traits::Backend;
use super::{KEY_CREDENTIAL, KEY_MATCHES, KEY_USER_ID, SessionData};
use crate::types::message::UserId;
use log::{debug, error, warn};
use std::sync::Arc;
use tokio::sync::{Mutex, Notify, RwLock};
use tokio::time::{Duration, sleep};

/// Owns the in-memory session state and writes it through to the
/// backend. Mutations go through [`modify_session`], which marks the
/// state dirty; a background task (or an explicit [`flush`]) persists
/// it.
///
/// [`modify_session`]: PersistenceManager::modify_session
/// [`flush`]: PersistenceManager::flush
pub struct PersistenceManager {
    session: Arc<RwLock<SessionData>>,
    backend: Arc<dyn Backend>,
    dirty: Arc<Mutex<bool>>,
    save_notify: Arc<Notify>,
}

impl PersistenceManager {
    pub async fn new(backend: Arc<dyn Backend>) -> Result<Self, StoreError> {
        debug!("PersistenceManager: loading session state from backend.");
        let credential = backend.get(KEY_CREDENTIAL).await?;
        let user_id = backend.get(KEY_USER_ID).await?.map(UserId::new);
        let matches = match backend.get(KEY_MATCHES).await? {
            Some(raw) => serde_json::from_str(&raw).unwrap_or_else(|e| {
                warn!("Stored match list is unreadable, starting empty: {e}");
                Vec::new()
            }),
            None => Vec::new(),
        };

        if credential.is_some() {
            debug!("PersistenceManager: found a stored credential; session resumes logged in.");
        } else {
            debug!("PersistenceManager: no stored credential; session starts logged out.");
        }

        Ok(Self {
            session: Arc::new(RwLock::new(SessionData {
                credential,
                user_id,
                matches,
            })),
            backend,
            dirty: Arc::new(Mutex::new(false)),
            save_notify: Arc::new(Notify::new()),
        })
    }

    pub async fn get_session_snapshot(&self) -> SessionData {
        self.session.read().await.clone()
    }

    pub async fn modify_session<F, R>(&self, modifier: F) -> R
    where
        F: FnOnce(&mut SessionData) -> R,
    {
        let mut session_guard = self.session.write().await;
        let result = modifier(&mut session_guard);
        drop(session_guard);
        let mut dirty_guard = self.dirty.lock().await;
        *dirty_guard = true;
        self.save_notify.notify_one();
        result
    }

    pub async fn process_command(&self, command: SessionCommand) {
        self.modify_session(|session| {
            apply_command_to_session(session, command);
        })
        .await;
    }

    async fn save_to_disk(&self) -> Result<(), StoreError> {
        let mut dirty_guard = self.dirty.lock().await;
        if !*dirty_guard {
            return Ok(());
        }
        debug!("Session state is dirty, saving to backend.");
        let snapshot = self.session.read().await.clone();

        match &snapshot.credential {
            Some(credential) => self.backend.set(KEY_CREDENTIAL, credential).await?,
            None => self.backend.remove(KEY_CREDENTIAL).await?,
        }
        match &snapshot.user_id {
            Some(user_id) => self.backend.set(KEY_USER_ID, user_id.as_str()).await?,
            None => self.backend.remove(KEY_USER_ID).await?,
        }
        let matches_json = serde_json::to_string(&snapshot.matches)
            .map_err(|e| StoreError::Serialization(e.to_string()))?;
        self.backend.set(KEY_MATCHES, &matches_json).await?;

        *dirty_guard = false;
        debug!("Session state saved successfully.");
        Ok(())
    }

    /// Persists any pending changes immediately. Called on shutdown so
    /// the background saver's interval can't drop the last mutation.
    pub async fn flush(&self) -> Result<(), StoreError> {
        self.save_to_disk().await
    }

    /// Wipes both the in-memory session and the backend. Used when the
    /// credential is rejected or the user logs out.
    pub async fn clear_session(&self) -> Result<(), StoreError> {
        {
            let mut session_guard = self.session.write().await;
            *session_guard = SessionData::default();
        }
        self.backend.clear().await?;
        let mut dirty_guard = self.dirty.lock().await;
        *dirty_guard = false;
        Ok(())
    }

    pub fn run_background_saver(self: Arc<Self>, interval: Duration) {
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = self.save_notify.notified() => {
                        debug!("Save notification received.");
                    }
                    _ = sleep(interval) => {}
                }

                if let Err(e) = self.save_to_disk().await {
                    error!("Error saving session state in background: {e}");
                }
            }
        });
        debug!("Background saver task started with interval {interval:?}");
    }
}
