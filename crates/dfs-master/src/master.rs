//! Coordinator node
//!
//! Owns the namespace and block map behind one async mutex. Every mutation is
//! planned against the current state, appended to the operation log (and
//! replicated when peers are configured), and only then applied in memory.

use crate::load_balancer::{LoadBalancer, WorkerMetadata};
use crate::namespace::{full_key, Namespace};
use crate::oplog::{Operation, OperationLog, OperationLogEntry};
use crate::replication::Replicator;
use crate::state::MasterNodeState;
use dfs_common::config::MasterConfig;
use dfs_common::metrics::MasterMetrics;
use dfs_common::rpc::{CommitFileRequest, FileMetadata};
use dfs_common::types::parse_block_id;
use dfs_common::{BlockId, BlockInfo, BlockLocation, BlockMetadata, DfsError, Inode, Result, WorkerId};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// Timeout for best-effort block removal on data-nodes
const BLOCK_DELETE_TIMEOUT: Duration = Duration::from_secs(2);

pub struct MasterNode {
    id: String,
    snapshot_path: PathBuf,
    namespace: Mutex<Namespace>,
    oplog: OperationLog,
    load_balancer: Arc<LoadBalancer>,
    replicator: Option<Replicator>,
    metrics: Arc<MasterMetrics>,
}

impl MasterNode {
    /// Restore from the last snapshot, replay the operation log on top of it
    /// and open the log for appending
    pub async fn open(
        config: &MasterConfig,
        load_balancer: Arc<LoadBalancer>,
        replicator: Option<Replicator>,
    ) -> Result<Self> {
        tokio::fs::create_dir_all(&config.data_dir).await?;

        let snapshot_path = config.snapshot_path();
        let (restored_id, mut namespace) = match MasterNodeState::load(&snapshot_path).await? {
            Some(state) => {
                let (id, namespace) = state.into_namespace();
                (Some(id), namespace)
            }
            None => (None, Namespace::new()),
        };

        let oplog_path = config.oplog_path();
        let entries = OperationLog::read_entries(&oplog_path).await?;
        for entry in &entries {
            namespace.apply(&entry.operation);
        }
        if !entries.is_empty() {
            info!("Replayed {} operation log entries", entries.len());
        }

        let id = config
            .node_id
            .clone()
            .or(restored_id.filter(|id| !id.is_empty()))
            .unwrap_or_else(|| Uuid::new_v4().to_string());

        info!(
            "Master node {} ready with {} files and {} blocks",
            id,
            namespace.file_count(),
            namespace.block_map.len()
        );

        Ok(Self {
            id,
            snapshot_path,
            namespace: Mutex::new(namespace),
            oplog: OperationLog::open(&oplog_path).await?,
            load_balancer,
            replicator,
            metrics: Arc::new(MasterMetrics::new()),
        })
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn metrics(&self) -> Arc<MasterMetrics> {
        self.metrics.clone()
    }

    pub fn load_balancer(&self) -> &Arc<LoadBalancer> {
        &self.load_balancer
    }

    /// Append `operation` to the log, replicate it, then apply it
    ///
    /// An entry that misses its quorum is cut from the local log again, so a
    /// rejected mutation cannot reappear on replay.
    async fn log_and_apply(&self, namespace: &mut Namespace, operation: Operation) -> Result<()> {
        let entry = OperationLogEntry::new(operation);
        let offset = self.oplog.append(&entry).await?;
        self.metrics.record_oplog_append();

        if let Some(replicator) = &self.replicator {
            if let Err(e) = replicator.replicate(&entry).await {
                self.metrics.record_replication_failure();
                if let Err(rollback) = self.oplog.rollback(offset).await {
                    error!(
                        "Failed to roll back unreplicated {} entry: {}",
                        entry.operation.name(),
                        rollback
                    );
                }
                return Err(e);
            }
        }

        namespace.apply(&entry.operation);
        Ok(())
    }

    /// Pick a data-node for a new block
    pub async fn allocate_block(&self, project_id: &str, size_bytes: u64) -> Result<(BlockId, BlockLocation)> {
        let mut namespace = self.namespace.lock().await;

        let (worker_id, worker) = self.load_balancer.get_next_client()?;
        let block_id = Uuid::new_v4();

        let mut metadata = BlockMetadata::new(block_id, size_bytes);
        metadata.primary_node = Some(worker_id);
        namespace.block_map.insert(block_id, metadata);
        self.metrics.record_allocation();

        debug!(
            "Allocated block {} for project {} on worker {} ({} bytes)",
            block_id, project_id, worker_id, size_bytes
        );
        Ok((
            block_id,
            BlockLocation {
                block_id: block_id.to_string(),
                worker_id: worker_id.to_string(),
                address: worker.address(),
            },
        ))
    }

    /// Register a file made of previously pushed blocks
    pub async fn commit_file(&self, request: CommitFileRequest) -> Result<Inode> {
        let mut namespace = self.namespace.lock().await;
        let inode = self.commit_locked(&mut namespace, &request).await?;
        info!("Committed file {} ({} blocks, {} bytes)", inode.path, inode.blocks.len(), inode.size);
        Ok(inode)
    }

    async fn commit_locked(&self, namespace: &mut Namespace, request: &CommitFileRequest) -> Result<Inode> {
        let operations = namespace.plan_commit(request)?;
        let inode = match operations.last() {
            Some(Operation::RegisterFile { inode, .. }) => inode.clone(),
            _ => return Err(DfsError::InternalError("commit plan without a file".to_string())),
        };

        for operation in operations {
            self.log_and_apply(namespace, operation).await?;
        }
        self.metrics.record_commit();
        Ok(inode)
    }

    /// Blocks of a file and where to read each of them
    pub async fn get_file_metadata(&self, project_id: &str, file_path: &str) -> Result<FileMetadata> {
        let key = full_key(project_id, file_path)?;
        let namespace = self.namespace.lock().await;
        self.metrics.record_lookup();

        let inode = match namespace.get(&key) {
            Some(inode) if inode.is_file() => inode,
            Some(_) => return Err(DfsError::InvalidArgument(format!("{} is a directory", key))),
            None => return Err(DfsError::NotFound(format!("file not found: {}", key))),
        };

        let mut metadata = FileMetadata::default();
        for block_id in &inode.blocks {
            let block = namespace.block_map.get(block_id);
            metadata.blocks.push(BlockInfo {
                block_id: block_id.to_string(),
                size: block.map(|b| b.size).unwrap_or(0),
                checksum: block.map(|b| b.checksum).unwrap_or(0),
            });

            match block.and_then(|b| self.resolve_holder(b)) {
                Some((worker_id, worker)) => {
                    metadata.locations.insert(
                        block_id.to_string(),
                        BlockLocation {
                            block_id: block_id.to_string(),
                            worker_id: worker_id.to_string(),
                            address: worker.address(),
                        },
                    );
                }
                None => warn!("No reachable replica for block {} of {}", block_id, key),
            }
        }
        Ok(metadata)
    }

    /// First known holder of a block, replicas before the allocation target
    fn resolve_holder(&self, block: &BlockMetadata) -> Option<(WorkerId, WorkerMetadata)> {
        block
            .replicas
            .iter()
            .chain(block.primary_node.iter())
            .find_map(|worker_id| {
                self.load_balancer
                    .get_client_by_worker_id(worker_id)
                    .ok()
                    .map(|worker| (*worker_id, worker))
            })
    }

    /// Committed file paths under `project_id`, relative to the project
    pub async fn list_files(&self, project_id: &str, prefix: &str) -> Result<Vec<String>> {
        dfs_common::ensure!(!project_id.is_empty(), InvalidArgument, "project_id is required");
        Ok(self.namespace.lock().await.list_files(project_id, prefix))
    }

    /// Record a data-node as holding a block
    pub async fn update_block_location(&self, block_id: &str, worker_id: &str) -> Result<()> {
        let block_id = parse_block_id(block_id)?;
        let worker_id = Uuid::parse_str(worker_id)
            .map_err(|_| DfsError::InvalidArgument(format!("invalid worker ID {:?}", worker_id)))?;

        if self.namespace.lock().await.add_block_location(&block_id, worker_id) {
            debug!("Block {} now has a replica on {}", block_id, worker_id);
        }
        Ok(())
    }

    pub async fn delete_file(&self, project_id: &str, file_path: &str) -> Result<()> {
        let doomed = {
            let mut namespace = self.namespace.lock().await;
            self.delete_locked(&mut namespace, project_id, file_path).await?
        };
        self.purge_blocks(doomed).await;
        Ok(())
    }

    /// Log and apply a file deletion; returns the blocks to purge from workers
    async fn delete_locked(
        &self,
        namespace: &mut Namespace,
        project_id: &str,
        file_path: &str,
    ) -> Result<Vec<BlockMetadata>> {
        let operation = namespace.plan_delete(project_id, file_path)?;
        let doomed = match &operation {
            Operation::DeleteFile { inode } => inode
                .blocks
                .iter()
                .filter_map(|id| namespace.block_map.get(id).cloned())
                .collect(),
            _ => Vec::new(),
        };

        self.log_and_apply(namespace, operation).await?;
        self.metrics.record_delete();
        info!("Deleted file {}/{}", project_id, file_path);
        Ok(doomed)
    }

    /// Remove blocks from every worker that may hold them; failures are logged
    async fn purge_blocks(&self, blocks: Vec<BlockMetadata>) {
        for block in blocks {
            let mut holders: Vec<WorkerId> = block.replicas.clone();
            if let Some(primary) = block.primary_node {
                if !holders.contains(&primary) {
                    holders.push(primary);
                }
            }

            for worker_id in holders {
                let worker = match self.load_balancer.get_client_by_worker_id(&worker_id) {
                    Ok(worker) => worker,
                    Err(e) => {
                        warn!("Cannot delete block {} from worker {}: {}", block.block_id, worker_id, e);
                        continue;
                    }
                };
                let client = worker.client.with_request_timeout(BLOCK_DELETE_TIMEOUT);
                if let Err(e) = client.delete_block(&block.block_id.to_string()).await {
                    warn!(
                        "Failed to delete block {} from worker {}: {}",
                        block.block_id, worker_id, e
                    );
                }
            }
        }
    }

    pub async fn rename_file(&self, project_id: &str, from: &str, to: &str) -> Result<()> {
        let mut namespace = self.namespace.lock().await;
        for operation in namespace.plan_rename(project_id, from, to)? {
            self.log_and_apply(&mut namespace, operation).await?;
        }
        info!("Renamed {}/{} to {}", project_id, from, to);
        Ok(())
    }

    /// Commit a compacted file and drop the files it replaces
    pub async fn commit_compaction(&self, new_file: CommitFileRequest, old_file_paths: Vec<String>) -> Result<()> {
        let new_key = full_key(&new_file.project_id, &new_file.file_path)?;

        let doomed = {
            let mut namespace = self.namespace.lock().await;
            self.commit_locked(&mut namespace, &new_file).await?;

            let mut doomed = Vec::new();
            for old_path in &old_file_paths {
                if full_key(&new_file.project_id, old_path).ok().as_deref() == Some(new_key.as_str()) {
                    warn!("Compaction output {} is also listed as an input; keeping it", new_key);
                    continue;
                }
                match self
                    .delete_locked(&mut namespace, &new_file.project_id, old_path)
                    .await
                {
                    Ok(blocks) => doomed.extend(blocks),
                    Err(DfsError::NotFound(_)) => {
                        warn!("Compaction input {} not found; skipping", old_path);
                    }
                    Err(e) => return Err(e),
                }
            }
            doomed
        };

        info!(
            "Committed compaction of {} files into {}",
            old_file_paths.len(),
            new_key
        );
        self.purge_blocks(doomed).await;
        Ok(())
    }

    /// Apply an entry forwarded by a peer coordinator without re-replicating it
    pub async fn apply_replicated(&self, entry: &[u8]) -> Result<()> {
        let entry = OperationLogEntry::from_bytes(entry)?;
        let mut namespace = self.namespace.lock().await;
        self.oplog.append(&entry).await?;
        self.metrics.record_oplog_append();
        namespace.apply(&entry.operation);
        debug!("Applied replicated {} entry", entry.operation.name());
        Ok(())
    }

    pub async fn health_check(&self) -> Result<String> {
        Ok(self.id.clone())
    }

    /// Write a snapshot and truncate the operation log it covers
    pub async fn snapshot(&self) -> Result<()> {
        let namespace = self.namespace.lock().await;
        MasterNodeState::capture(&self.id, &namespace)
            .save(&self.snapshot_path)
            .await?;
        self.oplog.truncate().await
    }

    /// Counts of files and blocks currently tracked
    pub async fn stats(&self) -> (usize, usize) {
        let namespace = self.namespace.lock().await;
        (namespace.file_count(), namespace.block_map.len())
    }

    /// Replica sets of the blocks of a file, keyed by block ID
    pub async fn block_replicas(&self, project_id: &str, file_path: &str) -> Result<HashMap<BlockId, Vec<WorkerId>>> {
        let key = full_key(project_id, file_path)?;
        let namespace = self.namespace.lock().await;
        let inode = namespace
            .get(&key)
            .ok_or_else(|| DfsError::NotFound(format!("file not found: {}", key)))?;
        Ok(inode
            .blocks
            .iter()
            .filter_map(|id| namespace.block_map.get(id).map(|b| (*id, b.replicas.clone())))
            .collect())
    }
}
