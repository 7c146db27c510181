use crate::store::error::Result;
use async_trait::async_trait;

/// Key-value port over whatever holds session state between runs.
/// Values are opaque strings; structured state is serialized before it
/// reaches the backend.
#[async_trait]
pub trait Backend: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>>;
    async fn set(&self, key: &str, value: &str) -> Result<()>;
    async fn remove(&self, key: &str) -> Result<()>;
    /// Drops every stored key. Used on logout.
    async fn clear(&self) -> Result<()>;
}
