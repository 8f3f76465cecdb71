//! Core types for the DFS namespace and block map

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Unique identifier for a stored block
pub type BlockId = Uuid;

/// Unique identifier for a data-node
pub type WorkerId = Uuid;

/// Kind of namespace entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum InodeType {
    File,
    Directory,
}

impl fmt::Display for InodeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            InodeType::File => write!(f, "file"),
            InodeType::Directory => write!(f, "directory"),
        }
    }
}

/// A namespace entry: a file or a directory
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Inode {
    /// Unique inode ID
    pub id: String,
    /// Last path component
    pub name: String,
    /// Full namespace key, `<project>/<path>`
    pub path: String,
    pub owner_id: String,
    pub project_id: String,
    pub inode_type: InodeType,
    /// Format tag (e.g. "bin", "avro", "parquet")
    pub format: String,
    /// Size in bytes, sum of block sizes for files
    pub size: u64,
    /// Blocks in byte order
    pub blocks: Vec<BlockId>,
    /// IDs of child inodes (directories only)
    pub children: Vec<String>,
    pub created_at: DateTime<Utc>,
    pub modified_at: DateTime<Utc>,
}

impl Inode {
    /// Build a new directory inode
    pub fn directory(path: &str, name: &str, project_id: &str) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4().to_string(),
            name: name.to_string(),
            path: path.to_string(),
            owner_id: "system".to_string(),
            project_id: project_id.to_string(),
            inode_type: InodeType::Directory,
            format: String::new(),
            size: 0,
            blocks: Vec::new(),
            children: Vec::new(),
            created_at: now,
            modified_at: now,
        }
    }

    pub fn is_file(&self) -> bool {
        self.inode_type == InodeType::File
    }

    pub fn is_directory(&self) -> bool {
        self.inode_type == InodeType::Directory
    }
}

/// Coordinator record for one block
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockMetadata {
    pub block_id: BlockId,
    pub size: u64,
    /// CRC32 of the payload, 0 when unknown to the coordinator
    pub checksum: u32,
    /// Worker chosen at allocation time
    pub primary_node: Option<WorkerId>,
    /// Workers confirmed to hold the block
    pub replicas: Vec<WorkerId>,
}

impl BlockMetadata {
    pub fn new(block_id: BlockId, size: u64) -> Self {
        Self {
            block_id,
            size,
            checksum: 0,
            primary_node: None,
            replicas: Vec::new(),
        }
    }

    /// Record a replica; returns false if it was already known
    pub fn add_replica(&mut self, worker_id: WorkerId) -> bool {
        if self.replicas.contains(&worker_id) {
            return false;
        }
        self.replicas.push(worker_id);
        true
    }
}

/// Block description returned to readers
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockInfo {
    pub block_id: String,
    pub size: u64,
    pub checksum: u32,
}

/// Where a block can be fetched from
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockLocation {
    pub block_id: String,
    pub worker_id: String,
    /// `host:port` of the data-node RPC listener
    pub address: String,
}

/// Block reference supplied by a writer when committing a file
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockRef {
    pub block_id: String,
    pub size: u64,
}

/// Identity of a data-node
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkerInfo {
    pub worker_id: WorkerId,
    pub address: String,
}

/// Parse a block ID received as text
pub fn parse_block_id(raw: &str) -> crate::Result<BlockId> {
    Uuid::parse_str(raw)
        .map_err(|e| crate::DfsError::InvalidBlockId(format!("invalid block uuid {}: {}", raw, e)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_add_replica_dedups() {
        let mut meta = BlockMetadata::new(Uuid::new_v4(), 10);
        let worker = Uuid::new_v4();

        assert!(meta.add_replica(worker));
        assert!(!meta.add_replica(worker));
        assert_eq!(meta.replicas, vec![worker]);
    }

    #[test]
    fn test_parse_block_id() {
        let id = Uuid::new_v4();
        assert_eq!(parse_block_id(&id.to_string()).unwrap(), id);
        assert!(matches!(
            parse_block_id("not-a-uuid"),
            Err(crate::DfsError::InvalidBlockId(_))
        ));
    }

    #[test]
    fn test_directory_inode() {
        let dir = Inode::directory("proj/raw", "raw", "proj");
        assert!(dir.is_directory());
        assert!(dir.children.is_empty());
        assert_eq!(dir.owner_id, "system");
    }
}
