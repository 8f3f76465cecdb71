//! Typed clients for the coordinator and data-node gRPC services

use crate::config::NetworkConfig;
use crate::error::{DfsError, Result};
use crate::network::{connect, with_timeout};
use crate::proto::coordinator_client::CoordinatorClient as CoordinatorGrpcClient;
use crate::proto::data_node_client::DataNodeClient as DataNodeGrpcClient;
use crate::proto::{self, push_block_request};
use crate::types::{BlockInfo, BlockLocation, BlockRef, Inode, WorkerInfo};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;
use tokio::sync::Mutex;
use tonic::transport::Channel;
use tonic::Streaming;
use tracing::debug;

/// Request to register a file from previously pushed blocks
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommitFileRequest {
    pub project_id: String,
    pub owner_id: String,
    pub file_path: String,
    pub format: String,
    pub blocks: Vec<BlockRef>,
}

impl From<CommitFileRequest> for proto::CommitFileRequest {
    fn from(request: CommitFileRequest) -> Self {
        Self {
            project_id: request.project_id,
            owner_id: request.owner_id,
            file_path: request.file_path,
            format: request.format,
            blocks: request.blocks.into_iter().map(Into::into).collect(),
        }
    }
}

impl From<proto::CommitFileRequest> for CommitFileRequest {
    fn from(request: proto::CommitFileRequest) -> Self {
        Self {
            project_id: request.project_id,
            owner_id: request.owner_id,
            file_path: request.file_path,
            format: request.format,
            blocks: request.blocks.into_iter().map(Into::into).collect(),
        }
    }
}

/// Block list and locations of a committed file
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FileMetadata {
    pub blocks: Vec<BlockInfo>,
    /// Keyed by block ID; blocks without a reachable replica are absent
    pub locations: HashMap<String, BlockLocation>,
}

impl FileMetadata {
    pub fn total_size(&self) -> u64 {
        self.blocks.iter().map(|b| b.size).sum()
    }
}

impl From<FileMetadata> for proto::GetFileMetadataResponse {
    fn from(metadata: FileMetadata) -> Self {
        Self {
            blocks: metadata.blocks.into_iter().map(Into::into).collect(),
            locations: metadata
                .locations
                .into_iter()
                .map(|(id, location)| (id, location.into()))
                .collect(),
        }
    }
}

impl From<proto::GetFileMetadataResponse> for FileMetadata {
    fn from(response: proto::GetFileMetadataResponse) -> Self {
        Self {
            blocks: response.blocks.into_iter().map(Into::into).collect(),
            locations: response
                .locations
                .into_iter()
                .map(|(id, location)| (id, location.into()))
                .collect(),
        }
    }
}

/// One message of a block upload as seen by the receiving data-node
#[derive(Debug, Clone, PartialEq)]
pub enum PushBlockFrame {
    Metadata { block_id: String, total_size: u64 },
    Chunk(Vec<u8>),
}

impl TryFrom<proto::PushBlockRequest> for PushBlockFrame {
    type Error = DfsError;

    fn try_from(request: proto::PushBlockRequest) -> Result<Self> {
        match request.frame {
            Some(push_block_request::Frame::Metadata(metadata)) => Ok(PushBlockFrame::Metadata {
                block_id: metadata.block_id,
                total_size: metadata.total_size,
            }),
            Some(push_block_request::Frame::Chunk(data)) => Ok(PushBlockFrame::Chunk(data)),
            None => Err(DfsError::ProtocolError("upload message without a frame".to_string())),
        }
    }
}

impl From<PushBlockFrame> for proto::PushBlockRequest {
    fn from(frame: PushBlockFrame) -> Self {
        let frame = match frame {
            PushBlockFrame::Metadata { block_id, total_size } => {
                push_block_request::Frame::Metadata(proto::BlockUploadMetadata { block_id, total_size })
            }
            PushBlockFrame::Chunk(data) => push_block_request::Frame::Chunk(data),
        };
        Self { frame: Some(frame) }
    }
}

/// Outcome of a block upload
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PushBlockResult {
    pub success: bool,
    pub message: String,
    pub bytes_written: u64,
    pub checksum: u32,
}

impl From<PushBlockResult> for proto::PushBlockResponse {
    fn from(result: PushBlockResult) -> Self {
        Self {
            success: result.success,
            message: result.message,
            bytes_written: result.bytes_written,
            checksum: result.checksum,
        }
    }
}

impl From<proto::PushBlockResponse> for PushBlockResult {
    fn from(response: proto::PushBlockResponse) -> Self {
        Self {
            success: response.success,
            message: response.message,
            bytes_written: response.bytes_written,
            checksum: response.checksum,
        }
    }
}

/// Client for the coordinator service over one shared channel
pub struct CoordinatorClient {
    address: String,
    network: NetworkConfig,
    channel: Mutex<Option<Channel>>,
}

impl CoordinatorClient {
    /// Create a client that dials lazily on the first request
    pub fn new(address: impl Into<String>, network: NetworkConfig) -> Self {
        Self {
            address: address.into(),
            network,
            channel: Mutex::new(None),
        }
    }

    /// Create a client and verify the coordinator answers
    pub async fn connect(address: impl Into<String>, network: NetworkConfig) -> Result<Self> {
        let client = Self::new(address, network);
        client.health_check().await?;
        Ok(client)
    }

    pub fn address(&self) -> &str {
        &self.address
    }

    async fn client(&self) -> Result<CoordinatorGrpcClient<Channel>> {
        let mut slot = self.channel.lock().await;
        let channel = match slot.as_ref() {
            Some(channel) => channel.clone(),
            None => {
                let channel = connect(&self.address, &self.network).await?;
                *slot = Some(channel.clone());
                channel
            }
        };
        let limit = self.network.max_message_size as usize;
        Ok(CoordinatorGrpcClient::new(channel)
            .max_decoding_message_size(limit)
            .max_encoding_message_size(limit))
    }

    pub async fn allocate_block(&self, project_id: &str, size_bytes: u64) -> Result<(String, Vec<BlockLocation>)> {
        let mut client = self.client().await?;
        let request = proto::AllocateBlockRequest {
            project_id: project_id.to_string(),
            size_bytes,
        };
        let response = with_timeout(self.network.request_timeout(), "allocate block", async {
            Ok(client.allocate_block(request).await?.into_inner())
        })
        .await?;
        Ok((
            response.block_id,
            response.targets.into_iter().map(Into::into).collect(),
        ))
    }

    pub async fn commit_file(&self, request: CommitFileRequest) -> Result<Inode> {
        let mut client = self.client().await?;
        let response = with_timeout(self.network.request_timeout(), "commit file", async {
            Ok(client
                .commit_file(proto::CommitFileRequest::from(request))
                .await?
                .into_inner())
        })
        .await?;
        response
            .inode
            .ok_or_else(|| DfsError::ProtocolError("commit response without an inode".to_string()))?
            .try_into()
    }

    pub async fn get_file_metadata(&self, project_id: &str, file_path: &str) -> Result<FileMetadata> {
        let mut client = self.client().await?;
        let request = proto::GetFileMetadataRequest {
            project_id: project_id.to_string(),
            file_path: file_path.to_string(),
        };
        let response = with_timeout(self.network.request_timeout(), "get file metadata", async {
            Ok(client.get_file_metadata(request).await?.into_inner())
        })
        .await?;
        Ok(response.into())
    }

    pub async fn list_files(&self, project_id: &str, prefix: &str) -> Result<Vec<String>> {
        let mut client = self.client().await?;
        let request = proto::ListFilesRequest {
            project_id: project_id.to_string(),
            prefix: prefix.to_string(),
        };
        let response = with_timeout(self.network.request_timeout(), "list files", async {
            Ok(client.list_files(request).await?.into_inner())
        })
        .await?;
        Ok(response.paths)
    }

    pub async fn commit_compaction(&self, new_file: CommitFileRequest, old_file_paths: Vec<String>) -> Result<()> {
        let mut client = self.client().await?;
        let request = proto::CommitCompactionRequest {
            new_file: Some(new_file.into()),
            old_file_paths,
        };
        with_timeout(self.network.request_timeout(), "commit compaction", async {
            client.commit_compaction(request).await?;
            Ok(())
        })
        .await
    }

    pub async fn update_block_location(&self, block_id: &str, worker_id: &str) -> Result<()> {
        let mut client = self.client().await?;
        let request = proto::UpdateBlockLocationRequest {
            block_id: block_id.to_string(),
            worker_id: worker_id.to_string(),
        };
        with_timeout(self.network.request_timeout(), "update block location", async {
            client.update_block_location(request).await?;
            Ok(())
        })
        .await
    }

    pub async fn delete_file(&self, project_id: &str, file_path: &str) -> Result<()> {
        let mut client = self.client().await?;
        let request = proto::DeleteFileRequest {
            project_id: project_id.to_string(),
            file_path: file_path.to_string(),
        };
        with_timeout(self.network.request_timeout(), "delete file", async {
            client.delete_file(request).await?;
            Ok(())
        })
        .await
    }

    pub async fn rename_file(&self, project_id: &str, from: &str, to: &str) -> Result<()> {
        let mut client = self.client().await?;
        let request = proto::RenameFileRequest {
            project_id: project_id.to_string(),
            from_path: from.to_string(),
            to_path: to.to_string(),
        };
        with_timeout(self.network.request_timeout(), "rename file", async {
            client.rename_file(request).await?;
            Ok(())
        })
        .await
    }

    pub async fn replicate_log(&self, entry: Vec<u8>) -> Result<()> {
        let mut client = self.client().await?;
        with_timeout(self.network.request_timeout(), "replicate log", async {
            client.replicate_log(proto::ReplicateLogRequest { entry }).await?;
            Ok(())
        })
        .await
    }

    /// Returns the coordinator's node ID
    pub async fn health_check(&self) -> Result<String> {
        let mut client = self.client().await?;
        let response = with_timeout(self.network.request_timeout(), "health check", async {
            Ok(client.health_check(proto::Empty {}).await?.into_inner())
        })
        .await?;
        Ok(response.node_id)
    }

    /// Drop the shared channel; the next request dials again
    pub async fn close(&self) {
        self.channel.lock().await.take();
    }
}

/// Client for a data-node; every call opens its own channel
#[derive(Debug, Clone)]
pub struct DataNodeClient {
    address: String,
    network: NetworkConfig,
}

impl DataNodeClient {
    pub fn new(address: impl Into<String>, network: NetworkConfig) -> Self {
        Self {
            address: address.into(),
            network,
        }
    }

    /// Same client with a different request timeout
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.network.request_timeout_ms = timeout.as_millis() as u64;
        self
    }

    pub fn address(&self) -> &str {
        &self.address
    }

    async fn client(&self) -> Result<DataNodeGrpcClient<Channel>> {
        let channel = connect(&self.address, &self.network).await?;
        let limit = self.network.max_message_size as usize;
        Ok(DataNodeGrpcClient::new(channel)
            .max_decoding_message_size(limit)
            .max_encoding_message_size(limit))
    }

    pub async fn get_worker_info(&self) -> Result<WorkerInfo> {
        with_timeout(self.network.request_timeout(), "get worker info", async {
            let response = self.client().await?.get_worker_info(proto::Empty {}).await?.into_inner();
            let worker_id = response.worker_id.parse().map_err(|e| {
                DfsError::ProtocolError(format!("invalid worker ID {}: {}", response.worker_id, e))
            })?;
            Ok(WorkerInfo {
                worker_id,
                address: response.address,
            })
        })
        .await
    }

    /// Returns `None` when the block has no checksum on the data-node
    pub async fn get_block_checksum(&self, block_id: &str) -> Result<Option<u32>> {
        let request = proto::BlockIdRequest {
            block_id: block_id.to_string(),
        };
        with_timeout(self.network.request_timeout(), "get block checksum", async {
            let response = self.client().await?.get_block_checksum(request).await?.into_inner();
            Ok(response.exists.then_some(response.checksum))
        })
        .await
    }

    pub async fn delete_block(&self, block_id: &str) -> Result<()> {
        let request = proto::BlockIdRequest {
            block_id: block_id.to_string(),
        };
        with_timeout(self.network.request_timeout(), "delete block", async {
            self.client().await?.delete_block(request).await?;
            Ok(())
        })
        .await
    }

    pub async fn health_check(&self) -> Result<()> {
        with_timeout(self.network.request_timeout(), "data-node health check", async {
            self.client().await?.health_check(proto::Empty {}).await?;
            Ok(())
        })
        .await
    }

    /// Upload `data` as one block, split into `chunk_size` messages
    ///
    /// The deadline grows with the payload so slow links can still finish
    /// large blocks.
    pub async fn push_block(&self, block_id: &str, data: &[u8], chunk_size: usize) -> Result<PushBlockResult> {
        let mut frames = Vec::with_capacity(data.len() / chunk_size.max(1) + 2);
        frames.push(proto::PushBlockRequest::from(PushBlockFrame::Metadata {
            block_id: block_id.to_string(),
            total_size: data.len() as u64,
        }));
        for chunk in data.chunks(chunk_size.max(1)) {
            frames.push(PushBlockFrame::Chunk(chunk.to_vec()).into());
        }

        let timeout = self.network.transfer_timeout(data.len() as u64);
        with_timeout(timeout, "block upload", async {
            let response = self
                .client()
                .await?
                .push_block(tokio_stream::iter(frames))
                .await?
                .into_inner();
            Ok(response.into())
        })
        .await
    }

    /// Open a download stream for a block
    pub async fn fetch_block(&self, block_id: &str) -> Result<BlockStream> {
        let request = proto::BlockIdRequest {
            block_id: block_id.to_string(),
        };
        let timeout = self.network.request_timeout();
        let inner = with_timeout(timeout, "open block download", async {
            Ok(self.client().await?.fetch_block(request).await?.into_inner())
        })
        .await?;
        debug!("Opened fetch stream for block {} from {}", block_id, self.address);
        Ok(BlockStream { inner, timeout })
    }

    /// Download a whole block into memory
    pub async fn fetch_block_bytes(&self, block_id: &str) -> Result<Vec<u8>> {
        let mut stream = self.fetch_block(block_id).await?;
        let mut data = Vec::new();
        while let Some(chunk) = stream.next_chunk().await? {
            data.extend_from_slice(&chunk);
        }
        Ok(data)
    }
}

/// Chunks of a block arriving from a data-node
pub struct BlockStream {
    inner: Streaming<proto::FetchBlockResponse>,
    /// Deadline for each chunk, not for the whole block
    timeout: Duration,
}

impl BlockStream {
    /// Next chunk, or `None` once the block has been fully received
    pub async fn next_chunk(&mut self) -> Result<Option<Vec<u8>>> {
        let inner = &mut self.inner;
        let message = with_timeout(self.timeout, "block download", async {
            Ok(inner.message().await?)
        })
        .await?;
        Ok(message.map(|m| m.data))
    }
}
