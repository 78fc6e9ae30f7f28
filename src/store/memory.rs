use super::registry::SessionRegistry;
use super::{SessionStore, StoreStats};
use crate::aggregator::SessionSummary;
use crate::error::StoreError;
use async_trait::async_trait;
use tokio::sync::RwLock;
use tracing::debug;

/// Volatile store, used for tests and `backend = "memory"`
#[derive(Debug)]
pub struct MemorySessionStore {
    registry: RwLock<SessionRegistry>,
}

impl MemorySessionStore {
    pub fn new(quota_bytes: u64) -> Self {
        Self {
            registry: RwLock::new(SessionRegistry::new(quota_bytes)),
        }
    }
}

#[async_trait]
impl SessionStore for MemorySessionStore {
    async fn save(&self, summary: &SessionSummary) -> Result<(), StoreError> {
        let mut registry = self.registry.write().await;
        let (name, collection, bytes) = registry.prepare_insert(summary)?;
        registry.commit(name, collection, bytes.len() as u64);
        debug!("Saved session {} in memory", summary.session_id);
        Ok(())
    }

    async fn list(&self, dance_id: Option<&str>) -> Result<Vec<SessionSummary>, StoreError> {
        Ok(self.registry.read().await.list(dance_id))
    }

    async fn get(&self, session_id: &str) -> Result<SessionSummary, StoreError> {
        self.registry
            .read()
            .await
            .find(session_id)
            .cloned()
            .ok_or_else(|| StoreError::NotFound {
                session_id: session_id.to_string(),
            })
    }

    async fn mark_verified(
        &self,
        session_id: &str,
        verified: bool,
    ) -> Result<SessionSummary, StoreError> {
        let mut registry = self.registry.write().await;
        let (name, collection, bytes) = registry.prepare_verify(session_id, verified)?;
        registry.commit(name, collection, bytes.len() as u64);
        registry
            .find(session_id)
            .cloned()
            .ok_or_else(|| StoreError::NotFound {
                session_id: session_id.to_string(),
            })
    }

    async fn stats(&self) -> StoreStats {
        self.registry.read().await.stats()
    }

    fn name(&self) -> &'static str {
        "memory"
    }
}
