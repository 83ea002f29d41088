//! Agent identity and secret rotation

use anyhow::Result;
use async_trait::async_trait;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::RwLock;

/// Identity presented to the controller at connect time.
///
/// The secret is replaced by a `key_rotation` command and consumed on the
/// next connect attempt; the active connection is never interrupted.
#[derive(Debug, Clone)]
pub struct AgentIdentity {
    pub agent_id: String,
    pub shared_secret: String,
}

/// Written only by the rotation handler, read only when connecting
pub type SharedIdentity = Arc<RwLock<AgentIdentity>>;

/// Collaborator that persists a rotated secret.
///
/// The agent config file itself is never rewritten; rotated keys live in
/// their own store.
#[async_trait]
pub trait SecretStore: Send + Sync {
    async fn persist(&self, new_key: &str) -> Result<()>;
}

/// Keeps the rotated key in a standalone file
pub struct FileSecretStore {
    path: PathBuf,
}

impl FileSecretStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Load a previously rotated key, if one was persisted
    pub async fn load(&self) -> Option<String> {
        match tokio::fs::read_to_string(&self.path).await {
            Ok(contents) => {
                let key = contents.trim().to_string();
                (!key.is_empty()).then_some(key)
            }
            Err(_) => None,
        }
    }
}

#[async_trait]
impl SecretStore for FileSecretStore {
    async fn persist(&self, new_key: &str) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(&self.path, new_key).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_persist_and_load_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileSecretStore::new(dir.path().join("agent.key"));

        assert_eq!(store.load().await, None);

        store.persist("rotated-key").await.unwrap();
        assert_eq!(store.load().await, Some("rotated-key".to_string()));
    }

    #[tokio::test]
    async fn test_empty_key_file_is_ignored() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("agent.key");
        tokio::fs::write(&path, "\n").await.unwrap();

        let store = FileSecretStore::new(path);
        assert_eq!(store.load().await, None);
    }
}
