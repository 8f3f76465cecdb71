//! Entry point of the client library

use crate::reader::Reader;
use crate::writer::Writer;
use dfs_common::config::NetworkConfig;
use dfs_common::rpc::CoordinatorClient;
use dfs_common::ensure;
use dfs_common::{DfsError, Result, DEFAULT_BLOCK_SIZE, DEFAULT_FORMAT, DEFAULT_PROJECT, DEFAULT_STREAM_CHUNK_SIZE};
use std::sync::Arc;
use tracing::{debug, info};

/// Options for a new file
#[derive(Debug, Clone)]
pub struct CreateOptions {
    pub project_id: String,
    pub owner_id: String,
    pub format: String,
    /// Bytes buffered before a block is flushed
    pub block_size: usize,
    /// Size of the chunks a block is streamed in
    pub chunk_size: usize,
}

impl Default for CreateOptions {
    fn default() -> Self {
        Self {
            project_id: DEFAULT_PROJECT.to_string(),
            owner_id: String::new(),
            format: DEFAULT_FORMAT.to_string(),
            block_size: DEFAULT_BLOCK_SIZE,
            chunk_size: DEFAULT_STREAM_CHUNK_SIZE,
        }
    }
}

impl CreateOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_project(mut self, project_id: impl Into<String>) -> Self {
        self.project_id = project_id.into();
        self
    }

    pub fn with_owner(mut self, owner_id: impl Into<String>) -> Self {
        self.owner_id = owner_id.into();
        self
    }

    pub fn with_format(mut self, format: impl Into<String>) -> Self {
        self.format = format.into();
        self
    }

    pub fn with_block_size(mut self, block_size: usize) -> Self {
        self.block_size = block_size;
        self
    }

    pub fn with_chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = chunk_size;
        self
    }

    fn validate(&self) -> Result<()> {
        ensure!(!self.project_id.is_empty(), InvalidArgument, "project_id is required");
        ensure!(
            self.block_size > 0 && self.chunk_size > 0,
            InvalidArgument,
            "block_size and chunk_size must be positive"
        );
        Ok(())
    }
}

pub struct DfsClient {
    coordinator: Arc<CoordinatorClient>,
    network: NetworkConfig,
}

impl DfsClient {
    /// Connect to the coordinator at `master_address`
    pub async fn connect(master_address: impl Into<String>) -> Result<Self> {
        Self::connect_with(master_address, NetworkConfig::default()).await
    }

    pub async fn connect_with(master_address: impl Into<String>, network: NetworkConfig) -> Result<Self> {
        let coordinator = CoordinatorClient::connect(master_address, network.clone()).await?;
        info!("Connected to coordinator at {}", coordinator.address());
        Ok(Self {
            coordinator: Arc::new(coordinator),
            network,
        })
    }

    /// Start writing a new file; nothing is visible until the writer is closed
    pub fn create(&self, path: &str, options: CreateOptions) -> Result<Writer> {
        if path.is_empty() {
            return Err(DfsError::InvalidArgument("path is required".to_string()));
        }
        options.validate()?;
        debug!("Creating {}/{}", options.project_id, path);
        Ok(Writer::new(
            self.coordinator.clone(),
            self.network.clone(),
            path.to_string(),
            options,
        ))
    }

    pub async fn open(&self, project_id: &str, path: &str) -> Result<Reader> {
        let metadata = self.coordinator.get_file_metadata(project_id, path).await?;
        debug!(
            "Opened {}/{} ({} blocks, {} bytes)",
            project_id,
            path,
            metadata.blocks.len(),
            metadata.total_size()
        );
        Ok(Reader::new(self.network.clone(), path.to_string(), metadata))
    }

    pub async fn list(&self, project_id: &str, prefix: &str) -> Result<Vec<String>> {
        self.coordinator.list_files(project_id, prefix).await
    }

    pub async fn delete(&self, project_id: &str, path: &str) -> Result<()> {
        self.coordinator.delete_file(project_id, path).await
    }

    pub async fn rename(&self, project_id: &str, from: &str, to: &str) -> Result<()> {
        self.coordinator.rename_file(project_id, from, to).await
    }

    pub async fn close(&self) {
        self.coordinator.close().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_create_options_defaults() {
        let options = CreateOptions::new();
        assert_eq!(options.project_id, "default");
        assert_eq!(options.format, "bin");
        assert_eq!(options.block_size, 64 * 1024 * 1024);
        assert_eq!(options.chunk_size, 2 * 1024 * 1024);
        assert!(options.validate().is_ok());
    }

    #[test]
    fn test_create_options_builder() {
        let options = CreateOptions::new()
            .with_project("analytics")
            .with_owner("bob")
            .with_format("avro")
            .with_block_size(1024);
        assert_eq!(options.project_id, "analytics");
        assert_eq!(options.owner_id, "bob");
        assert_eq!(options.format, "avro");
        assert_eq!(options.block_size, 1024);

        assert!(CreateOptions::new().with_block_size(0).validate().is_err());
        assert!(CreateOptions::new().with_project("").validate().is_err());
    }
}
