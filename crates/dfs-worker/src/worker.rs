//! Block storage on a data-node
//!
//! Each block lives in the storage directory as `<id>.bin` with its CRC32 in
//! a `<id>.checksum` sidecar. A block is healthy only when both files exist
//! and agree.

use dfs_common::checksum::{self, StreamingChecksum};
use dfs_common::config::WorkerConfig;
use dfs_common::metrics::{VerificationOutcome, WorkerMetrics};
use dfs_common::rpc::{PushBlockFrame, PushBlockResult};
use dfs_common::{DfsError, Result, WorkerId, WorkerInfo, FETCH_CHUNK_SIZE};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::fs::{self, File};
use tokio::io::{AsyncReadExt, AsyncWriteExt, BufWriter};
use tracing::{debug, error, info, warn};

const DATA_EXTENSION: &str = "bin";
const CHECKSUM_EXTENSION: &str = "checksum";

/// Reject IDs that are empty or could escape the storage directory
pub fn validate_block_id(block_id: &str) -> Result<()> {
    if block_id.is_empty() {
        return Err(DfsError::InvalidArgument("block ID is required".to_string()));
    }
    if block_id.contains("..") || block_id.contains('/') || block_id.contains('\\') || block_id.contains('\0') {
        return Err(DfsError::InvalidArgument(format!(
            "block ID {:?} is not a valid file name",
            block_id
        )));
    }
    Ok(())
}

/// A data-node's local block store
pub struct WorkerNode {
    /// Worker ID reported to the coordinator
    id: WorkerId,
    /// Address other nodes dial
    address: String,
    storage_dir: PathBuf,
    verify_on_read: bool,
    metrics: Arc<WorkerMetrics>,
}

impl WorkerNode {
    /// Open (creating if needed) the storage directory
    pub async fn new(config: &WorkerConfig, id: WorkerId) -> Result<Self> {
        fs::create_dir_all(&config.storage_dir).await?;
        let address = config.resolved_advertise_address();
        info!(
            "Worker {} storing blocks in {} (advertised as {})",
            id,
            config.storage_dir.display(),
            address
        );

        Ok(Self {
            id,
            address,
            storage_dir: config.storage_dir.clone(),
            verify_on_read: config.verify_on_read,
            metrics: Arc::new(WorkerMetrics::new()),
        })
    }

    pub fn id(&self) -> WorkerId {
        self.id
    }

    pub fn address(&self) -> &str {
        &self.address
    }

    pub fn storage_dir(&self) -> &Path {
        &self.storage_dir
    }

    pub fn metrics(&self) -> Arc<WorkerMetrics> {
        self.metrics.clone()
    }

    pub fn block_path(&self, block_id: &str) -> PathBuf {
        self.storage_dir.join(format!("{}.{}", block_id, DATA_EXTENSION))
    }

    pub fn checksum_path(&self, block_id: &str) -> PathBuf {
        self.storage_dir.join(format!("{}.{}", block_id, CHECKSUM_EXTENSION))
    }

    pub fn worker_info(&self) -> WorkerInfo {
        WorkerInfo {
            worker_id: self.id,
            address: self.address.clone(),
        }
    }

    /// Start receiving a streamed block upload
    pub fn begin_push(&self) -> PushSession {
        PushSession {
            storage_dir: self.storage_dir.clone(),
            metrics: self.metrics.clone(),
            block_id: None,
            expected_size: 0,
            file: None,
            hasher: StreamingChecksum::new(),
        }
    }

    /// Open a block for streaming, verifying it first when configured to
    pub async fn open_block(&self, block_id: &str) -> Result<BlockReader> {
        validate_block_id(block_id)?;

        if self.verify_on_read {
            if let Err(e) = self.verify_block_integrity(block_id).await {
                warn!("Block integrity check failed for {}: {}", block_id, e);
                self.metrics.record_read(false, 0);
                return Err(e);
            }
        }

        let file = match File::open(self.block_path(block_id)).await {
            Ok(file) => file,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                debug!("Block not found: {}", block_id);
                self.metrics.record_read(false, 0);
                return Err(DfsError::NotFound(format!("block {}", block_id)));
            }
            Err(e) => {
                self.metrics.record_read(false, 0);
                return Err(e.into());
            }
        };

        info!("Streaming block {}", block_id);
        Ok(BlockReader {
            block_id: block_id.to_string(),
            file,
            bytes_read: 0,
            metrics: self.metrics.clone(),
        })
    }

    async fn stored_checksum(&self, block_id: &str) -> Result<Option<u32>> {
        match fs::read_to_string(self.checksum_path(block_id)).await {
            Ok(contents) => checksum::decode_sidecar(block_id, &contents).map(Some),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Recompute a block's checksum and compare it with the sidecar
    pub async fn verify_block_integrity(&self, block_id: &str) -> Result<u32> {
        validate_block_id(block_id)?;

        let mut file = match File::open(self.block_path(block_id)).await {
            Ok(file) => file,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                self.metrics.record_verification(VerificationOutcome::Missing);
                return Err(DfsError::NotFound(format!("block {}", block_id)));
            }
            Err(e) => return Err(e.into()),
        };

        let mut hasher = StreamingChecksum::new();
        let mut buffer = vec![0u8; FETCH_CHUNK_SIZE];
        loop {
            let n = file.read(&mut buffer).await?;
            if n == 0 {
                break;
            }
            hasher.update(&buffer[..n]);
        }
        let calculated = hasher.finalize();

        let stored = match self.stored_checksum(block_id).await {
            Ok(Some(stored)) => stored,
            Ok(None) => {
                self.metrics.record_verification(VerificationOutcome::Missing);
                return Err(DfsError::ChecksumUnavailable(format!(
                    "no checksum recorded for block {}",
                    block_id
                )));
            }
            Err(e) => {
                self.metrics.record_verification(VerificationOutcome::Missing);
                return Err(e);
            }
        };

        if let Err(e) = checksum::verify(block_id, calculated, stored) {
            self.metrics.record_verification(VerificationOutcome::Corrupted);
            error!("{}", e);
            return Err(e);
        }

        self.metrics.record_verification(VerificationOutcome::Valid);
        debug!("Block {} integrity verified (checksum: {})", block_id, calculated);
        Ok(calculated)
    }

    /// Stored checksum without reading the block; `None` if there is no sidecar
    pub async fn get_block_checksum(&self, block_id: &str) -> Result<Option<u32>> {
        validate_block_id(block_id)?;
        self.stored_checksum(block_id).await
    }

    /// Remove a block and its sidecar; deleting a missing block succeeds
    pub async fn delete_block(&self, block_id: &str) -> Result<()> {
        validate_block_id(block_id)?;
        info!("Deleting block {}", block_id);

        match fs::remove_file(self.block_path(block_id)).await {
            Ok(()) => {}
            Err(e) if e.kind() == ErrorKind::NotFound => {
                debug!("Block {} not found during deletion (already deleted?)", block_id);
            }
            Err(e) => {
                error!("Failed to delete block {}: {}", block_id, e);
                return Err(e.into());
            }
        }

        if let Err(e) = fs::remove_file(self.checksum_path(block_id)).await {
            if e.kind() != ErrorKind::NotFound {
                warn!("Failed to delete checksum file for block {}: {}", block_id, e);
            }
        }

        self.metrics.record_delete();
        Ok(())
    }

    /// Check the storage directory is writable
    pub async fn health_check(&self) -> Result<()> {
        fs::write(self.storage_dir.join(".health"), b"ok").await?;
        Ok(())
    }

    /// IDs of every `<id>.bin` in the storage directory, sorted
    pub async fn list_blocks(&self) -> Result<Vec<String>> {
        let mut entries = fs::read_dir(&self.storage_dir).await?;
        let mut blocks = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            if !entry.file_type().await?.is_file() {
                continue;
            }
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some(DATA_EXTENSION) {
                continue;
            }
            if let Some(stem) = path.file_stem().and_then(|s| s.to_str()) {
                blocks.push(stem.to_string());
            }
        }
        blocks.sort();
        Ok(blocks)
    }
}

/// Receiving side of a block upload
///
/// The first frame must be metadata naming the block; chunks are appended
/// and hashed as they arrive and the sidecar is written on `finish`, once
/// the client closes its stream.
pub struct PushSession {
    storage_dir: PathBuf,
    metrics: Arc<WorkerMetrics>,
    block_id: Option<String>,
    expected_size: u64,
    file: Option<BufWriter<File>>,
    hasher: StreamingChecksum,
}

impl PushSession {
    /// Apply one frame of the upload
    pub async fn handle(&mut self, frame: PushBlockFrame) -> Result<()> {
        match frame {
            PushBlockFrame::Metadata { block_id, total_size } => self.metadata(&block_id, total_size).await,
            PushBlockFrame::Chunk(data) => self.chunk(&data).await,
        }
    }

    pub async fn metadata(&mut self, block_id: &str, total_size: u64) -> Result<()> {
        if let Some(existing) = &self.block_id {
            return Err(DfsError::InvalidArgument(format!(
                "duplicate metadata frame for block {} (already receiving {})",
                block_id, existing
            )));
        }
        validate_block_id(block_id)?;

        // A sidecar left by an earlier upload no longer describes the data
        let sidecar = self.storage_dir.join(format!("{}.{}", block_id, CHECKSUM_EXTENSION));
        match fs::remove_file(&sidecar).await {
            Ok(()) => debug!("Removed stale checksum for re-uploaded block {}", block_id),
            Err(e) if e.kind() == ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }

        let path = self.storage_dir.join(format!("{}.{}", block_id, DATA_EXTENSION));
        let file = File::create(&path).await?;
        info!("Starting upload for block {} ({} bytes expected)", block_id, total_size);

        self.block_id = Some(block_id.to_string());
        self.expected_size = total_size;
        self.file = Some(BufWriter::new(file));
        Ok(())
    }

    pub async fn chunk(&mut self, data: &[u8]) -> Result<()> {
        let file = self
            .file
            .as_mut()
            .ok_or_else(|| DfsError::InvalidArgument("received chunk before metadata".to_string()))?;
        file.write_all(data).await?;
        self.hasher.update(data);
        Ok(())
    }

    /// Flush the data file and record its checksum
    pub async fn finish(mut self) -> Result<PushBlockResult> {
        let block_id = self
            .block_id
            .take()
            .ok_or_else(|| DfsError::InvalidArgument("stream ended before metadata".to_string()))?;
        if let Some(mut file) = self.file.take() {
            file.flush().await?;
            file.get_ref().sync_all().await?;
        }

        let bytes_written = self.hasher.bytes();
        if bytes_written != self.expected_size {
            warn!(
                "Block {} announced {} bytes but received {}",
                block_id, self.expected_size, bytes_written
            );
        }
        let value = self.hasher.finalize();

        let sidecar = self.storage_dir.join(format!("{}.{}", block_id, CHECKSUM_EXTENSION));
        if let Err(e) = fs::write(&sidecar, checksum::encode_sidecar(value)).await {
            warn!("Failed to write checksum file for block {}: {}", block_id, e);
            self.metrics.record_write(false, 0);
            return Err(e.into());
        }

        self.metrics.record_write(true, bytes_written);
        info!("Stored block {} ({} bytes, checksum: {})", block_id, bytes_written, value);

        Ok(PushBlockResult {
            success: true,
            message: format!("Stored {} bytes, checksum: {}", bytes_written, value),
            bytes_written,
            checksum: value,
        })
    }

    /// Record an upload that did not complete; the partial data file stays
    /// without a sidecar
    pub fn abort(self, reason: &DfsError) {
        self.metrics.record_write(false, 0);
        match &self.block_id {
            Some(block_id) => warn!("Upload of block {} failed: {}", block_id, reason),
            None => warn!("Upload failed before metadata: {}", reason),
        }
    }
}

/// Streams a stored block in fixed-size chunks
pub struct BlockReader {
    block_id: String,
    file: File,
    bytes_read: u64,
    metrics: Arc<WorkerMetrics>,
}

impl BlockReader {
    pub fn block_id(&self) -> &str {
        &self.block_id
    }

    /// Next chunk of at most 64KB, or `None` at end of block
    pub async fn next_chunk(&mut self) -> Result<Option<Vec<u8>>> {
        let mut buffer = vec![0u8; FETCH_CHUNK_SIZE];
        let n = match self.file.read(&mut buffer).await {
            Ok(n) => n,
            Err(e) => {
                self.metrics.record_read(false, 0);
                return Err(e.into());
            }
        };
        if n == 0 {
            self.metrics.record_read(true, self.bytes_read);
            return Ok(None);
        }
        buffer.truncate(n);
        self.bytes_read += n as u64;
        Ok(Some(buffer))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;
    use uuid::Uuid;

    async fn test_node(dir: &TempDir) -> WorkerNode {
        let config = WorkerConfig {
            storage_dir: dir.path().to_path_buf(),
            advertise_address: Some("127.0.0.1:50051".to_string()),
            ..Default::default()
        };
        WorkerNode::new(&config, Uuid::new_v4()).await.unwrap()
    }

    async fn push(node: &WorkerNode, block_id: &str, data: &[u8]) -> PushBlockResult {
        let mut session = node.begin_push();
        session.metadata(block_id, data.len() as u64).await.unwrap();
        for chunk in data.chunks(1000) {
            session.chunk(chunk).await.unwrap();
        }
        session.finish().await.unwrap()
    }

    #[tokio::test]
    async fn test_push_writes_data_and_checksum() {
        let dir = TempDir::new().unwrap();
        let node = test_node(&dir).await;
        let data: Vec<u8> = (0..5000u32).map(|i| (i % 256) as u8).collect();

        let result = push(&node, "block-1", &data).await;
        assert!(result.success);
        assert_eq!(result.bytes_written, 5000);
        assert_eq!(result.checksum, checksum::checksum(&data));

        let stored = std::fs::read(node.block_path("block-1")).unwrap();
        assert_eq!(stored, data);
        let sidecar = std::fs::read_to_string(node.checksum_path("block-1")).unwrap();
        assert_eq!(sidecar, result.checksum.to_string());

        assert_eq!(node.verify_block_integrity("block-1").await.unwrap(), result.checksum);
        assert_eq!(node.get_block_checksum("block-1").await.unwrap(), Some(result.checksum));
    }

    #[tokio::test]
    async fn test_chunk_before_metadata_rejected() {
        let dir = TempDir::new().unwrap();
        let node = test_node(&dir).await;

        let mut session = node.begin_push();
        let err = session.handle(PushBlockFrame::Chunk(vec![1, 2, 3])).await.unwrap_err();
        assert!(matches!(err, DfsError::InvalidArgument(_)));
        assert!(node.list_blocks().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_duplicate_metadata_rejected() {
        let dir = TempDir::new().unwrap();
        let node = test_node(&dir).await;

        let mut session = node.begin_push();
        session.metadata("a", 1).await.unwrap();
        assert!(matches!(
            session.metadata("b", 1).await,
            Err(DfsError::InvalidArgument(_))
        ));
    }

    #[tokio::test]
    async fn test_failed_reupload_is_unverifiable_not_corrupt() {
        let dir = TempDir::new().unwrap();
        let node = test_node(&dir).await;
        push(&node, "block-6", b"first version").await;

        let mut session = node.begin_push();
        session.metadata("block-6", 100).await.unwrap();
        session.chunk(b"partial").await.unwrap();
        session.abort(&DfsError::Unavailable("client went away".to_string()));

        assert!(!node.checksum_path("block-6").exists());
        assert!(matches!(
            node.verify_block_integrity("block-6").await,
            Err(DfsError::ChecksumUnavailable(_))
        ));
    }

    #[tokio::test]
    async fn test_corruption_detected() {
        let dir = TempDir::new().unwrap();
        let node = test_node(&dir).await;
        push(&node, "block-2", b"original payload").await;

        std::fs::write(node.block_path("block-2"), b"tampered payload").unwrap();

        let err = node.verify_block_integrity("block-2").await.unwrap_err();
        assert!(err.is_corruption());
        assert!(matches!(node.open_block("block-2").await, Err(e) if e.is_corruption()));
        assert_eq!(node.metrics().snapshot().corruption_total, 2);
    }

    #[tokio::test]
    async fn test_missing_sidecar_is_unverifiable() {
        let dir = TempDir::new().unwrap();
        let node = test_node(&dir).await;
        push(&node, "block-3", b"data").await;
        std::fs::remove_file(node.checksum_path("block-3")).unwrap();

        assert!(matches!(
            node.verify_block_integrity("block-3").await,
            Err(DfsError::ChecksumUnavailable(_))
        ));
        assert_eq!(node.get_block_checksum("block-3").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_fetch_streams_in_chunks() {
        let dir = TempDir::new().unwrap();
        let node = test_node(&dir).await;
        let data = vec![7u8; FETCH_CHUNK_SIZE * 2 + 10];
        push(&node, "block-4", &data).await;

        let mut reader = node.open_block("block-4").await.unwrap();
        let mut sizes = Vec::new();
        while let Some(chunk) = reader.next_chunk().await.unwrap() {
            sizes.push(chunk.len());
        }
        assert_eq!(sizes.iter().sum::<usize>(), data.len());
        assert!(sizes.iter().all(|s| *s <= FETCH_CHUNK_SIZE));

        assert!(matches!(
            node.open_block("nope").await,
            Err(DfsError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_delete_is_idempotent() {
        let dir = TempDir::new().unwrap();
        let node = test_node(&dir).await;
        push(&node, "block-5", b"bytes").await;

        node.delete_block("block-5").await.unwrap();
        assert!(!node.block_path("block-5").exists());
        assert!(!node.checksum_path("block-5").exists());

        node.delete_block("block-5").await.unwrap();
    }

    #[tokio::test]
    async fn test_block_id_validation() {
        assert!(validate_block_id("0b5c8a7e-1d2f-4c3b-9a8e-7f6d5c4b3a21").is_ok());
        assert!(validate_block_id("").is_err());
        assert!(validate_block_id("../etc/passwd").is_err());
        assert!(validate_block_id("a/b").is_err());

        let dir = TempDir::new().unwrap();
        let node = test_node(&dir).await;
        assert!(matches!(
            node.delete_block("../x").await,
            Err(DfsError::InvalidArgument(_))
        ));
    }

    #[tokio::test]
    async fn test_health_check_and_listing() {
        let dir = TempDir::new().unwrap();
        let node = test_node(&dir).await;
        push(&node, "b", b"1").await;
        push(&node, "a", b"2").await;

        node.health_check().await.unwrap();
        assert!(dir.path().join(".health").exists());
        assert_eq!(node.list_blocks().await.unwrap(), vec!["a", "b"]);
        assert_eq!(node.worker_info().address, "127.0.0.1:50051");
    }
}
