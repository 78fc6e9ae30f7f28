use super::registry::SessionRegistry;
use super::{SessionStore, StoreStats, COLLECTION_PREFIX};
use crate::aggregator::SessionSummary;
use crate::error::{DanceflowError, Result, StoreError};
use async_trait::async_trait;
use chrono::Utc;
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

/// Store keeping one pretty-printed JSON array per dance collection
#[derive(Debug)]
pub struct JsonFileSessionStore {
    root: PathBuf,
    registry: RwLock<SessionRegistry>,
}

impl JsonFileSessionStore {
    /// Open the store, creating the directory and loading existing collections
    pub async fn open<P: AsRef<Path>>(root: P, quota_bytes: u64) -> Result<Self> {
        let root = root.as_ref().to_path_buf();
        if !fs::try_exists(&root).await? {
            fs::create_dir_all(&root).await.map_err(|e| {
                DanceflowError::component(
                    "session_store".to_string(),
                    format!("Failed to create store directory {}: {}", root.display(), e),
                )
            })?;
            info!("Created store directory: {}", root.display());
        }

        let mut registry = SessionRegistry::new(quota_bytes);
        let loaded = Self::scan_collections(&root, &mut registry).await?;
        info!(
            "Loaded {} collections ({} bytes) from {}",
            loaded,
            registry.total_bytes(),
            root.display()
        );

        Ok(Self {
            root,
            registry: RwLock::new(registry),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Register every `sessions_*.json` file. Unreadable files are moved aside
    /// so a later save cannot overwrite them.
    async fn scan_collections(root: &Path, registry: &mut SessionRegistry) -> Result<usize> {
        let mut entries = fs::read_dir(root).await?;
        let mut loaded = 0;

        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            let Some(name) = collection_from_path(&path) else {
                continue;
            };

            match Self::read_collection(&path).await {
                Ok(sessions) => {
                    debug!("Loaded {} sessions from {}", sessions.len(), path.display());
                    registry.load_collection(name, sessions)?;
                    loaded += 1;
                }
                Err(e) => {
                    let quarantined = Self::quarantine(root, &name, &path).await?;
                    warn!(
                        "Unreadable collection {} moved to {}: {}",
                        path.display(),
                        quarantined.display(),
                        e
                    );
                }
            }
        }

        Ok(loaded)
    }

    /// Rename a collection file to `.<name>.<timestamp>.corrupt`, which the scan ignores
    async fn quarantine(root: &Path, name: &str, path: &Path) -> Result<PathBuf> {
        let target = root.join(format!(
            ".{}.{}.corrupt",
            name,
            Utc::now().format("%Y%m%d%H%M%S%3f")
        ));
        fs::rename(path, &target).await.map_err(|e| {
            DanceflowError::component(
                "session_store".to_string(),
                format!("Failed to move aside {}: {}", path.display(), e),
            )
        })?;
        Ok(target)
    }

    async fn read_collection(path: &Path) -> Result<Vec<SessionSummary>> {
        let content = fs::read(path).await?;
        Ok(serde_json::from_slice(&content)?)
    }

    fn collection_path(&self, name: &str) -> PathBuf {
        self.root.join(format!("{}.json", name))
    }

    /// Write through a temporary file so a crash never leaves a torn collection
    async fn write_collection(&self, name: &str, bytes: &[u8]) -> std::result::Result<(), StoreError> {
        let path = self.collection_path(name);
        let tmp = self.root.join(format!(".{}.json.tmp", name));

        fs::write(&tmp, bytes)
            .await
            .map_err(|e| StoreError::persistence(format!("write {}: {}", tmp.display(), e)))?;
        if let Err(e) = fs::rename(&tmp, &path).await {
            let _ = fs::remove_file(&tmp).await;
            return Err(StoreError::persistence(format!(
                "rename to {}: {}",
                path.display(),
                e
            )));
        }
        Ok(())
    }
}

fn collection_from_path(path: &Path) -> Option<String> {
    if path.extension().and_then(|e| e.to_str()) != Some("json") {
        return None;
    }
    let stem = path.file_stem()?.to_str()?;
    stem.starts_with(COLLECTION_PREFIX).then(|| stem.to_string())
}

#[async_trait]
impl SessionStore for JsonFileSessionStore {
    async fn save(&self, summary: &SessionSummary) -> std::result::Result<(), StoreError> {
        let mut registry = self.registry.write().await;
        let (name, collection, bytes) = registry.prepare_insert(summary)?;
        self.write_collection(&name, &bytes).await?;
        registry.commit(name, collection, bytes.len() as u64);
        debug!("Saved session {} to disk", summary.session_id);
        Ok(())
    }

    async fn list(
        &self,
        dance_id: Option<&str>,
    ) -> std::result::Result<Vec<SessionSummary>, StoreError> {
        Ok(self.registry.read().await.list(dance_id))
    }

    async fn get(&self, session_id: &str) -> std::result::Result<SessionSummary, StoreError> {
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
    ) -> std::result::Result<SessionSummary, StoreError> {
        let mut registry = self.registry.write().await;
        let (name, collection, bytes) = registry.prepare_verify(session_id, verified)?;
        self.write_collection(&name, &bytes).await?;
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
        "file"
    }
}
