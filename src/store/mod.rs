//! Persistence of completed session summaries.
//!
//! Summaries are grouped into one collection per dance form. Both backends
//! share the same registry and quota accounting; the file backend also keeps
//! each collection in `sessions_<dance>.json` under the configured directory.

mod file;
mod memory;
mod registry;


pub use file::JsonFileSessionStore;
pub use memory::MemorySessionStore;

use crate::aggregator::SessionSummary;
use crate::config::{StoreBackend, StoreConfig};
use crate::error::{Result, StoreError};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use tracing::info;

const COLLECTION_PREFIX: &str = "sessions_";

/// Storage for session summaries
#[async_trait]
pub trait SessionStore: Send + Sync {
    /// Append a summary to its dance collection
    async fn save(&self, summary: &SessionSummary) -> std::result::Result<(), StoreError>;

    /// All summaries, newest first, optionally limited to one dance form
    async fn list(&self, dance_id: Option<&str>)
        -> std::result::Result<Vec<SessionSummary>, StoreError>;

    async fn get(&self, session_id: &str) -> std::result::Result<SessionSummary, StoreError>;

    /// Record the verification outcome, returning the updated summary
    async fn mark_verified(
        &self,
        session_id: &str,
        verified: bool,
    ) -> std::result::Result<SessionSummary, StoreError>;

    async fn stats(&self) -> StoreStats;

    fn name(&self) -> &'static str;
}

/// Statistics about stored sessions
#[derive(Debug, Clone, PartialEq)]
pub struct StoreStats {
    pub total_sessions: usize,
    pub collections: usize,
    pub total_bytes: u64,
    pub quota_bytes: u64,
    pub verified_sessions: usize,
    pub newest_session: Option<DateTime<Utc>>,
}

/// Collection key for a dance form, e.g. `Hip Hop` -> `sessions_hip_hop`
pub fn collection_name(dance_id: &str) -> String {
    let slug: String = dance_id
        .trim()
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() {
                c.to_ascii_lowercase()
            } else {
                '_'
            }
        })
        .collect();
    format!("{}{}", COLLECTION_PREFIX, slug)
}

/// Open the backend selected by configuration
pub async fn open_store(config: &StoreConfig) -> Result<Arc<dyn SessionStore>> {
    let store: Arc<dyn SessionStore> = match config.backend {
        StoreBackend::Memory => Arc::new(MemorySessionStore::new(config.quota_bytes)),
        StoreBackend::File => {
            Arc::new(JsonFileSessionStore::open(&config.path, config.quota_bytes).await?)
        }
    };
    info!("Session store ready: {} backend", store.name());
    Ok(store)
}
