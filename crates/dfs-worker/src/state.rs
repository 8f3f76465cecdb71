//! Persisted identity and block inventory of a data-node

use crate::worker::WorkerNode;
use dfs_common::{Result, WorkerId};
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::{debug, info};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WorkerNodeState {
    pub id: Option<WorkerId>,
    /// Block IDs found on disk at the last save
    pub stored_blocks: Vec<String>,
}

impl WorkerNodeState {
    /// Load the state file; a missing file yields an empty state
    pub async fn load(path: &Path) -> Result<Self> {
        match tokio::fs::read(path).await {
            Ok(data) => {
                let state: Self = serde_json::from_slice(&data)?;
                debug!("Loaded worker state from {} ({} blocks)", path.display(), state.stored_blocks.len());
                Ok(state)
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Self::default()),
            Err(e) => Err(e.into()),
        }
    }

    /// Refresh from the worker's identity and a scan of its storage directory
    pub async fn update(&mut self, worker: &WorkerNode) -> Result<()> {
        self.id = Some(worker.id());
        self.stored_blocks = worker.list_blocks().await?;
        Ok(())
    }

    /// Write atomically through a temporary file
    pub async fn save(&self, path: &Path) -> Result<()> {
        let data = serde_json::to_vec_pretty(self)?;
        let tmp = path.with_extension("json.tmp");
        tokio::fs::write(&tmp, data).await?;
        tokio::fs::rename(&tmp, path).await?;
        info!("Saved worker state to {} ({} blocks)", path.display(), self.stored_blocks.len());
        Ok(())
    }
}
