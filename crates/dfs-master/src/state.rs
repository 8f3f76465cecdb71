//! Coordinator snapshot
//!
//! A full copy of the namespace and block map written to
//! `master_node_state.json`. Entries logged after the snapshot are replayed on
//! top of it at startup.

use crate::namespace::Namespace;
use dfs_common::{BlockId, BlockMetadata, Inode, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use tracing::{debug, info};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MasterNodeState {
    pub id: String,
    pub namespace: HashMap<String, Inode>,
    pub block_map: HashMap<BlockId, BlockMetadata>,
}

impl MasterNodeState {
    pub fn capture(id: &str, namespace: &Namespace) -> Self {
        Self {
            id: id.to_string(),
            namespace: namespace.inodes.clone(),
            block_map: namespace.block_map.clone(),
        }
    }

    pub fn into_namespace(self) -> (String, Namespace) {
        (
            self.id,
            Namespace {
                inodes: self.namespace,
                block_map: self.block_map,
            },
        )
    }

    /// Load the snapshot; `None` when no snapshot has been written yet
    pub async fn load(path: &Path) -> Result<Option<Self>> {
        match tokio::fs::read(path).await {
            Ok(data) => {
                let state: Self = serde_json::from_slice(&data)?;
                debug!(
                    "Loaded snapshot from {} ({} inodes, {} blocks)",
                    path.display(),
                    state.namespace.len(),
                    state.block_map.len()
                );
                Ok(Some(state))
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Write atomically through a temporary file
    pub async fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let data = serde_json::to_vec_pretty(self)?;
        let tmp = path.with_extension("json.tmp");
        tokio::fs::write(&tmp, data).await?;
        tokio::fs::rename(&tmp, path).await?;
        info!(
            "Saved snapshot to {} ({} inodes, {} blocks)",
            path.display(),
            self.namespace.len(),
            self.block_map.len()
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;
    use uuid::Uuid;

    #[tokio::test]
    async fn test_snapshot_round_trip() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("master_node_state.json");
        assert!(MasterNodeState::load(&path).await.unwrap().is_none());

        let mut namespace = Namespace::new();
        namespace
            .inodes
            .insert("proj".to_string(), Inode::directory("proj", "proj", "proj"));
        let block = Uuid::new_v4();
        let mut metadata = BlockMetadata::new(block, 7);
        metadata.add_replica(Uuid::new_v4());
        namespace.block_map.insert(block, metadata);

        let state = MasterNodeState::capture("master-0", &namespace);
        state.save(&path).await.unwrap();
        assert!(!path.with_extension("json.tmp").exists());

        let (id, restored) = MasterNodeState::load(&path).await.unwrap().unwrap().into_namespace();
        assert_eq!(id, "master-0");
        assert_eq!(restored, namespace);
    }
}
