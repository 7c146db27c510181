pub mod commands;
pub mod error;
pub mod filestore;
pub mod memory;
pub mod persistence_manager;
pub mod traits;

use crate::types::message::UserId;
use crate::types::user::MatchSummary;

pub use error::StoreError;
pub use filestore::FileStore;
pub use memory::MemoryStore;
pub use persistence_manager::PersistenceManager;

/// Backend key holding the raw bearer credential.
pub const KEY_CREDENTIAL: &str = "credential";
/// Backend key holding the resolved user id.
pub const KEY_USER_ID: &str = "user_id";
/// Backend key holding the cached match list as JSON.
pub const KEY_MATCHES: &str = "matches";

/// Everything this client remembers between runs. Loaded once at
/// startup and written back by the persistence manager when dirty.
#[derive(Debug, Clone, Default)]
pub struct SessionData {
    pub credential: Option<String>,
    pub user_id: Option<UserId>,
    pub matches: Vec<MatchSummary>,
}

impl SessionData {
    pub fn is_logged_in(&self) -> bool {
        self.credential.is_some()
    }
}
