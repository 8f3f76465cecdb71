//! Write-only file handle

use crate::client::CreateOptions;
use crate::file::{BlockSummary, File, FileInfo};
use async_trait::async_trait;
use dfs_common::config::NetworkConfig;
use dfs_common::rpc::{CommitFileRequest, CoordinatorClient, DataNodeClient};
use dfs_common::{BlockRef, DfsError, Inode, Result};
use std::io::SeekFrom;
use std::sync::Arc;
use tracing::{debug, info};

pub struct Writer {
    coordinator: Arc<CoordinatorClient>,
    network: NetworkConfig,
    path: String,
    options: CreateOptions,
    buffer: Vec<u8>,
    written_blocks: Vec<BlockSummary>,
    committed: Option<Inode>,
}

impl Writer {
    pub(crate) fn new(
        coordinator: Arc<CoordinatorClient>,
        network: NetworkConfig,
        path: String,
        options: CreateOptions,
    ) -> Self {
        Self {
            coordinator,
            network,
            path,
            options,
            buffer: Vec::new(),
            written_blocks: Vec::new(),
            committed: None,
        }
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    /// Inode returned by the coordinator once the file is closed
    pub fn inode(&self) -> Option<&Inode> {
        self.committed.as_ref()
    }

    fn ensure_open(&self) -> Result<()> {
        if self.committed.is_some() {
            return Err(DfsError::InvalidArgument(format!("{} is already closed", self.path)));
        }
        Ok(())
    }

    /// Place the buffered bytes as one block and push them to its data-node
    async fn flush_block(&mut self) -> Result<()> {
        if self.buffer.is_empty() {
            return Ok(());
        }

        let size = self.buffer.len() as u64;
        let (block_id, targets) = self
            .coordinator
            .allocate_block(&self.options.project_id, size)
            .await?;
        let target = targets
            .into_iter()
            .next()
            .ok_or_else(|| DfsError::Unavailable(format!("no target returned for block {}", block_id)))?;

        let result = DataNodeClient::new(target.address.clone(), self.network.clone())
            .push_block(&block_id, &self.buffer, self.options.chunk_size)
            .await?;
        if !result.success {
            return Err(DfsError::InternalError(format!(
                "push of block {} to {} failed: {}",
                block_id, target.address, result.message
            )));
        }

        self.coordinator
            .update_block_location(&block_id, &target.worker_id)
            .await?;

        debug!("Flushed block {} ({} bytes) to {}", block_id, size, target.address);
        self.written_blocks.push(BlockSummary {
            block_id,
            size,
            worker_id: target.worker_id,
            address: target.address,
        });
        self.buffer.clear();
        Ok(())
    }
}

#[async_trait]
impl File for Writer {
    async fn read(&mut self, _buf: &mut [u8]) -> Result<usize> {
        Err(DfsError::NotSupported("read on a file opened for writing".to_string()))
    }

    /// Buffer `data`, flushing a block each time the buffer fills
    async fn write(&mut self, mut data: &[u8]) -> Result<usize> {
        self.ensure_open()?;
        let mut total = 0;
        while !data.is_empty() {
            let available = self.options.block_size.saturating_sub(self.buffer.len());
            if available == 0 {
                self.flush_block().await?;
                continue;
            }
            let take = available.min(data.len());
            self.buffer.extend_from_slice(&data[..take]);
            data = &data[take..];
            total += take;
        }
        Ok(total)
    }

    async fn seek(&mut self, _pos: SeekFrom) -> Result<u64> {
        Err(DfsError::NotSupported("seek on a file opened for writing".to_string()))
    }

    /// Flush the buffered bytes without committing the file
    async fn sync(&mut self) -> Result<()> {
        self.ensure_open()?;
        self.flush_block().await
    }

    /// Flush the remainder and commit the file
    async fn close(&mut self) -> Result<()> {
        self.ensure_open()?;
        self.flush_block().await?;

        let request = CommitFileRequest {
            project_id: self.options.project_id.clone(),
            owner_id: self.options.owner_id.clone(),
            file_path: self.path.clone(),
            format: self.options.format.clone(),
            blocks: self
                .written_blocks
                .iter()
                .map(|b| BlockRef {
                    block_id: b.block_id.clone(),
                    size: b.size,
                })
                .collect(),
        };
        let inode = self.coordinator.commit_file(request).await?;
        info!("Committed {} ({} blocks, {} bytes)", inode.path, inode.blocks.len(), inode.size);
        self.committed = Some(inode);
        Ok(())
    }

    async fn stat(&self) -> Result<FileInfo> {
        let flushed: u64 = self.written_blocks.iter().map(|b| b.size).sum();
        Ok(FileInfo {
            name: self.path.clone(),
            size: flushed + self.buffer.len() as u64,
            is_dir: false,
            blocks: self.written_blocks.clone(),
        })
    }
}
