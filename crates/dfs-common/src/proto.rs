//! gRPC messages and generated service stubs
//!
//! Messages are declared with prost derives; the `Coordinator` and `DataNode`
//! service clients and servers are generated by `build.rs`.

use crate::error::{DfsError, Result};
use crate::types::{self, parse_block_id, InodeType};
use chrono::{DateTime, Utc};
use std::collections::HashMap;

include!(concat!(env!("OUT_DIR"), "/dfs.Coordinator.rs"));
include!(concat!(env!("OUT_DIR"), "/dfs.DataNode.rs"));

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct Empty {}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct BlockLocation {
    #[prost(string, tag = "1")]
    pub block_id: String,
    #[prost(string, tag = "2")]
    pub worker_id: String,
    #[prost(string, tag = "3")]
    pub address: String,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct BlockInfo {
    #[prost(string, tag = "1")]
    pub block_id: String,
    #[prost(uint64, tag = "2")]
    pub size: u64,
    #[prost(uint32, tag = "3")]
    pub checksum: u32,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct BlockRef {
    #[prost(string, tag = "1")]
    pub block_id: String,
    #[prost(uint64, tag = "2")]
    pub size: u64,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, ::prost::Enumeration)]
#[repr(i32)]
pub enum InodeKind {
    File = 0,
    Directory = 1,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct Inode {
    #[prost(string, tag = "1")]
    pub id: String,
    #[prost(string, tag = "2")]
    pub name: String,
    #[prost(string, tag = "3")]
    pub path: String,
    #[prost(string, tag = "4")]
    pub owner_id: String,
    #[prost(string, tag = "5")]
    pub project_id: String,
    #[prost(enumeration = "InodeKind", tag = "6")]
    pub kind: i32,
    #[prost(string, tag = "7")]
    pub format: String,
    #[prost(uint64, tag = "8")]
    pub size: u64,
    #[prost(string, repeated, tag = "9")]
    pub blocks: Vec<String>,
    #[prost(string, repeated, tag = "10")]
    pub children: Vec<String>,
    /// Milliseconds since the Unix epoch
    #[prost(int64, tag = "11")]
    pub created_at: i64,
    #[prost(int64, tag = "12")]
    pub modified_at: i64,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct AllocateBlockRequest {
    #[prost(string, tag = "1")]
    pub project_id: String,
    #[prost(uint64, tag = "2")]
    pub size_bytes: u64,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct AllocateBlockResponse {
    #[prost(string, tag = "1")]
    pub block_id: String,
    #[prost(message, repeated, tag = "2")]
    pub targets: Vec<BlockLocation>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct CommitFileRequest {
    #[prost(string, tag = "1")]
    pub project_id: String,
    #[prost(string, tag = "2")]
    pub owner_id: String,
    #[prost(string, tag = "3")]
    pub file_path: String,
    #[prost(string, tag = "4")]
    pub format: String,
    #[prost(message, repeated, tag = "5")]
    pub blocks: Vec<BlockRef>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct CommitFileResponse {
    #[prost(message, optional, tag = "1")]
    pub inode: Option<Inode>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct GetFileMetadataRequest {
    #[prost(string, tag = "1")]
    pub project_id: String,
    #[prost(string, tag = "2")]
    pub file_path: String,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct GetFileMetadataResponse {
    #[prost(message, repeated, tag = "1")]
    pub blocks: Vec<BlockInfo>,
    /// Keyed by block ID
    #[prost(map = "string, message", tag = "2")]
    pub locations: HashMap<String, BlockLocation>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ListFilesRequest {
    #[prost(string, tag = "1")]
    pub project_id: String,
    #[prost(string, tag = "2")]
    pub prefix: String,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ListFilesResponse {
    #[prost(string, repeated, tag = "1")]
    pub paths: Vec<String>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct CommitCompactionRequest {
    #[prost(message, optional, tag = "1")]
    pub new_file: Option<CommitFileRequest>,
    #[prost(string, repeated, tag = "2")]
    pub old_file_paths: Vec<String>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct UpdateBlockLocationRequest {
    #[prost(string, tag = "1")]
    pub block_id: String,
    #[prost(string, tag = "2")]
    pub worker_id: String,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct DeleteFileRequest {
    #[prost(string, tag = "1")]
    pub project_id: String,
    #[prost(string, tag = "2")]
    pub file_path: String,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct RenameFileRequest {
    #[prost(string, tag = "1")]
    pub project_id: String,
    #[prost(string, tag = "2")]
    pub from_path: String,
    #[prost(string, tag = "3")]
    pub to_path: String,
}

/// Operation log entry (JSON) forwarded by a peer coordinator
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ReplicateLogRequest {
    #[prost(bytes = "vec", tag = "1")]
    pub entry: Vec<u8>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct HealthCheckResponse {
    #[prost(string, tag = "1")]
    pub node_id: String,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct BlockUploadMetadata {
    #[prost(string, tag = "1")]
    pub block_id: String,
    #[prost(uint64, tag = "2")]
    pub total_size: u64,
}

/// One message of a client-streamed upload: metadata first, then chunks
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct PushBlockRequest {
    #[prost(oneof = "push_block_request::Frame", tags = "1, 2")]
    pub frame: Option<push_block_request::Frame>,
}

pub mod push_block_request {
    #[derive(Clone, PartialEq, ::prost::Oneof)]
    pub enum Frame {
        #[prost(message, tag = "1")]
        Metadata(super::BlockUploadMetadata),
        #[prost(bytes, tag = "2")]
        Chunk(Vec<u8>),
    }
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct PushBlockResponse {
    #[prost(bool, tag = "1")]
    pub success: bool,
    #[prost(string, tag = "2")]
    pub message: String,
    #[prost(uint64, tag = "3")]
    pub bytes_written: u64,
    #[prost(uint32, tag = "4")]
    pub checksum: u32,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct BlockIdRequest {
    #[prost(string, tag = "1")]
    pub block_id: String,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct FetchBlockResponse {
    #[prost(bytes = "vec", tag = "1")]
    pub data: Vec<u8>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct WorkerInfoResponse {
    #[prost(string, tag = "1")]
    pub worker_id: String,
    #[prost(string, tag = "2")]
    pub address: String,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct BlockChecksumResponse {
    #[prost(bool, tag = "1")]
    pub exists: bool,
    #[prost(uint32, tag = "2")]
    pub checksum: u32,
}

impl From<types::BlockLocation> for BlockLocation {
    fn from(location: types::BlockLocation) -> Self {
        Self {
            block_id: location.block_id,
            worker_id: location.worker_id,
            address: location.address,
        }
    }
}

impl From<BlockLocation> for types::BlockLocation {
    fn from(location: BlockLocation) -> Self {
        Self {
            block_id: location.block_id,
            worker_id: location.worker_id,
            address: location.address,
        }
    }
}

impl From<types::BlockInfo> for BlockInfo {
    fn from(info: types::BlockInfo) -> Self {
        Self {
            block_id: info.block_id,
            size: info.size,
            checksum: info.checksum,
        }
    }
}

impl From<BlockInfo> for types::BlockInfo {
    fn from(info: BlockInfo) -> Self {
        Self {
            block_id: info.block_id,
            size: info.size,
            checksum: info.checksum,
        }
    }
}

impl From<types::BlockRef> for BlockRef {
    fn from(block: types::BlockRef) -> Self {
        Self {
            block_id: block.block_id,
            size: block.size,
        }
    }
}

impl From<BlockRef> for types::BlockRef {
    fn from(block: BlockRef) -> Self {
        Self {
            block_id: block.block_id,
            size: block.size,
        }
    }
}

fn timestamp(millis: i64) -> Result<DateTime<Utc>> {
    DateTime::from_timestamp_millis(millis)
        .ok_or_else(|| DfsError::ProtocolError(format!("timestamp {} out of range", millis)))
}

impl From<types::Inode> for Inode {
    fn from(inode: types::Inode) -> Self {
        let kind = match inode.inode_type {
            InodeType::File => InodeKind::File,
            InodeType::Directory => InodeKind::Directory,
        };
        Self {
            id: inode.id,
            name: inode.name,
            path: inode.path,
            owner_id: inode.owner_id,
            project_id: inode.project_id,
            kind: kind as i32,
            format: inode.format,
            size: inode.size,
            blocks: inode.blocks.iter().map(|b| b.to_string()).collect(),
            children: inode.children,
            created_at: inode.created_at.timestamp_millis(),
            modified_at: inode.modified_at.timestamp_millis(),
        }
    }
}

impl TryFrom<Inode> for types::Inode {
    type Error = DfsError;

    fn try_from(inode: Inode) -> Result<Self> {
        let inode_type = match InodeKind::try_from(inode.kind) {
            Ok(InodeKind::File) => InodeType::File,
            Ok(InodeKind::Directory) => InodeType::Directory,
            Err(_) => {
                return Err(DfsError::ProtocolError(format!("unknown inode kind {}", inode.kind)));
            }
        };
        let blocks = inode
            .blocks
            .iter()
            .map(|b| parse_block_id(b))
            .collect::<Result<Vec<_>>>()?;
        Ok(Self {
            id: inode.id,
            name: inode.name,
            path: inode.path,
            owner_id: inode.owner_id,
            project_id: inode.project_id,
            inode_type,
            format: inode.format,
            size: inode.size,
            blocks,
            children: inode.children,
            created_at: timestamp(inode.created_at)?,
            modified_at: timestamp(inode.modified_at)?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use prost::Message;
    use uuid::Uuid;

    #[test]
    fn test_inode_conversion_keeps_blocks_and_kind() {
        let mut inode = types::Inode::directory("proj/raw", "raw", "proj");
        inode.inode_type = InodeType::File;
        inode.blocks = vec![Uuid::new_v4(), Uuid::new_v4()];
        inode.size = 42;

        let wire = Inode::from(inode.clone());
        assert_eq!(wire.kind, InodeKind::File as i32);
        let bytes = wire.encode_to_vec();
        let back = types::Inode::try_from(Inode::decode(bytes.as_slice()).unwrap()).unwrap();

        assert_eq!(back.blocks, inode.blocks);
        assert_eq!(back.inode_type, InodeType::File);
        assert_eq!(back.created_at.timestamp_millis(), inode.created_at.timestamp_millis());
    }

    #[test]
    fn test_malformed_inode_rejected() {
        let wire = Inode {
            blocks: vec!["not-a-uuid".to_string()],
            ..Default::default()
        };
        assert!(matches!(types::Inode::try_from(wire), Err(DfsError::InvalidBlockId(_))));

        let wire = Inode {
            kind: 7,
            ..Default::default()
        };
        assert!(matches!(types::Inode::try_from(wire), Err(DfsError::ProtocolError(_))));
    }
}
