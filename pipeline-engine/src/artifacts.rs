// Artifact Interface
// Publish/fetch contract for named artifacts exchanged between units

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::RwLock;

/// Referential identity of a published artifact
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ArtifactRef {
    pub name: String,
    /// Lowercase hex sha256 of the payload
    pub digest: String,
    pub size: u64,
}

impl ArtifactRef {
    pub fn for_payload(name: impl Into<String>, payload: &[u8]) -> Self {
        Self {
            name: name.into(),
            digest: format!("{:x}", Sha256::digest(payload)),
            size: payload.len() as u64,
        }
    }
}

#[derive(Debug, Error)]
pub enum ArtifactError {
    #[error("artifact '{name}' not found")]
    NotFound { name: String },

    #[error("artifact '{name}' was already published with different content")]
    Conflict { name: String },

    #[error("artifact '{name}': {source}")]
    Io {
        name: String,
        #[source]
        source: std::io::Error,
    },
}

/// Storage contract the scheduler uses on a unit's behalf.
///
/// Publishing the same name twice is idempotent when the content is
/// identical and a conflict otherwise.
#[async_trait]
pub trait ArtifactStore: Send + Sync {
    async fn publish(&self, name: &str, payload: Vec<u8>) -> Result<ArtifactRef, ArtifactError>;

    async fn fetch(&self, reference: &ArtifactRef) -> Result<Vec<u8>, ArtifactError>;

    async fn lookup(&self, name: &str) -> Option<ArtifactRef>;
}

/// Process-local artifact store
#[derive(Debug, Default)]
pub struct InMemoryArtifactStore {
    entries: RwLock<HashMap<String, (ArtifactRef, Arc<Vec<u8>>)>>,
}

impl InMemoryArtifactStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// All published references, sorted by name
    pub async fn list(&self) -> Vec<ArtifactRef> {
        let entries = self.entries.read().await;
        let mut refs: Vec<ArtifactRef> = entries.values().map(|(r, _)| r.clone()).collect();
        refs.sort_by(|a, b| a.name.cmp(&b.name));
        refs
    }
}

#[async_trait]
impl ArtifactStore for InMemoryArtifactStore {
    async fn publish(&self, name: &str, payload: Vec<u8>) -> Result<ArtifactRef, ArtifactError> {
        let reference = ArtifactRef::for_payload(name, &payload);
        let mut entries = self.entries.write().await;

        if let Some((existing, _)) = entries.get(name) {
            if existing.digest == reference.digest {
                return Ok(existing.clone());
            }
            return Err(ArtifactError::Conflict {
                name: name.to_string(),
            });
        }

        tracing::debug!(artifact = name, digest = %reference.digest, size = reference.size, "artifact published");
        entries.insert(name.to_string(), (reference.clone(), Arc::new(payload)));
        Ok(reference)
    }

    async fn fetch(&self, reference: &ArtifactRef) -> Result<Vec<u8>, ArtifactError> {
        let entries = self.entries.read().await;
        match entries.get(&reference.name) {
            Some((stored, payload)) if stored.digest == reference.digest => {
                Ok(payload.as_ref().clone())
            }
            _ => Err(ArtifactError::NotFound {
                name: reference.name.clone(),
            }),
        }
    }

    async fn lookup(&self, name: &str) -> Option<ArtifactRef> {
        self.entries
            .read()
            .await
            .get(name)
            .map(|(reference, _)| reference.clone())
    }
}
