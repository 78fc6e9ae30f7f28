use super::{collection_name, StoreStats};
use crate::aggregator::SessionSummary;
use crate::error::StoreError;
use std::collections::HashMap;
use tracing::debug;

/// In-memory view of every collection, shared by both backends
#[derive(Debug, Clone, Default)]
pub(crate) struct SessionRegistry {
    collections: HashMap<String, Vec<SessionSummary>>,
    sizes: HashMap<String, u64>,
    quota_bytes: u64,
}

impl SessionRegistry {
    pub(crate) fn new(quota_bytes: u64) -> Self {
        Self {
            collections: HashMap::new(),
            sizes: HashMap::new(),
            quota_bytes,
        }
    }

    /// Load a collection read from disk; bypasses the quota
    pub(crate) fn load_collection(
        &mut self,
        name: String,
        sessions: Vec<SessionSummary>,
    ) -> Result<(), StoreError> {
        let size = encode(&sessions)?.len() as u64;
        self.sizes.insert(name.clone(), size);
        self.collections.insert(name, sessions);
        Ok(())
    }

    pub(crate) fn total_bytes(&self) -> u64 {
        self.sizes.values().sum()
    }

    /// Build the collection that would result from appending `summary`,
    /// without touching the registry. Returns its name and encoded bytes.
    pub(crate) fn prepare_insert(
        &self,
        summary: &SessionSummary,
    ) -> Result<(String, Vec<SessionSummary>, Vec<u8>), StoreError> {
        if self.find(&summary.session_id).is_some() {
            return Err(StoreError::persistence(format!(
                "session {} already stored",
                summary.session_id
            )));
        }

        let name = collection_name(&summary.dance_id);
        let mut collection = self.collections.get(&name).cloned().unwrap_or_default();
        collection.push(summary.clone());
        let bytes = encode(&collection)?;

        let current = self.sizes.get(&name).copied().unwrap_or(0);
        let projected = self.total_bytes() - current + bytes.len() as u64;
        if projected > self.quota_bytes {
            return Err(StoreError::persistence(format!(
                "quota exceeded: {} bytes needed, {} allowed",
                projected, self.quota_bytes
            )));
        }

        Ok((name, collection, bytes))
    }

    /// Locate a session and build its collection with `verified` applied
    pub(crate) fn prepare_verify(
        &self,
        session_id: &str,
        verified: bool,
    ) -> Result<(String, Vec<SessionSummary>, Vec<u8>), StoreError> {
        let (name, index) = self
            .position(session_id)
            .ok_or_else(|| StoreError::NotFound {
                session_id: session_id.to_string(),
            })?;

        let mut collection = self.collections.get(&name).cloned().unwrap_or_default();
        collection[index].verified = verified;
        let bytes = encode(&collection)?;
        Ok((name, collection, bytes))
    }

    /// Replace a collection with a prepared version
    pub(crate) fn commit(&mut self, name: String, collection: Vec<SessionSummary>, size: u64) {
        debug!("Collection {} now holds {} sessions", name, collection.len());
        self.sizes.insert(name.clone(), size);
        self.collections.insert(name, collection);
    }

    pub(crate) fn find(&self, session_id: &str) -> Option<&SessionSummary> {
        self.collections
            .values()
            .flat_map(|sessions| sessions.iter())
            .find(|s| s.session_id == session_id)
    }

    fn position(&self, session_id: &str) -> Option<(String, usize)> {
        self.collections.iter().find_map(|(name, sessions)| {
            sessions
                .iter()
                .position(|s| s.session_id == session_id)
                .map(|index| (name.clone(), index))
        })
    }

    /// Newest first, optionally limited to one dance form
    pub(crate) fn list(&self, dance_id: Option<&str>) -> Vec<SessionSummary> {
        let mut sessions: Vec<SessionSummary> = match dance_id {
            Some(dance) => self
                .collections
                .get(&collection_name(dance))
                .map(|sessions| {
                    sessions
                        .iter()
                        .filter(|s| s.dance_id == dance)
                        .cloned()
                        .collect()
                })
                .unwrap_or_default(),
            None => self.collections.values().flatten().cloned().collect(),
        };
        sessions.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        sessions
    }

    pub(crate) fn stats(&self) -> StoreStats {
        let sessions = || self.collections.values().flatten();
        StoreStats {
            total_sessions: sessions().count(),
            collections: self.collections.len(),
            total_bytes: self.total_bytes(),
            quota_bytes: self.quota_bytes,
            verified_sessions: sessions().filter(|s| s.verified).count(),
            newest_session: sessions().map(|s| s.created_at).max(),
        }
    }
}

/// Serialized form of a collection, as written to disk and counted against the quota
pub(crate) fn encode(sessions: &[SessionSummary]) -> Result<Vec<u8>, StoreError> {
    serde_json::to_vec_pretty(sessions)
        .map_err(|e| StoreError::persistence(format!("serialization failed: {}", e)))
}
