//! Read-only file handle

use crate::file::{BlockSummary, File, FileInfo};
use async_trait::async_trait;
use dfs_common::config::NetworkConfig;
use dfs_common::rpc::{DataNodeClient, FileMetadata};
use dfs_common::{BlockInfo, DfsError, Result};
use std::io::SeekFrom;

pub struct Reader {
    network: NetworkConfig,
    path: String,
    metadata: FileMetadata,
    size: u64,
    offset: u64,
}

/// Index of the block holding `offset` and the offset inside that block
fn locate_block(blocks: &[BlockInfo], offset: u64) -> Option<(usize, u64)> {
    let mut start = 0u64;
    for (index, block) in blocks.iter().enumerate() {
        if offset >= start && offset < start + block.size {
            return Some((index, offset - start));
        }
        start += block.size;
    }
    None
}

impl Reader {
    pub(crate) fn new(network: NetworkConfig, path: String, metadata: FileMetadata) -> Self {
        let size = metadata.total_size();
        Self {
            network,
            path,
            metadata,
            size,
            offset: 0,
        }
    }

    pub fn size(&self) -> u64 {
        self.size
    }

    pub fn position(&self) -> u64 {
        self.offset
    }
}

#[async_trait]
impl File for Reader {
    /// Read from the block under the current offset; never crosses a block
    /// boundary, so a short read does not mean end of file
    async fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        if buf.is_empty() || self.offset >= self.size {
            return Ok(0);
        }
        let Some((index, block_offset)) = locate_block(&self.metadata.blocks, self.offset) else {
            return Ok(0);
        };

        let block = &self.metadata.blocks[index];
        let location = self.metadata.locations.get(&block.block_id).ok_or_else(|| {
            DfsError::Unavailable(format!("no location for block {}", block.block_id))
        })?;
        let wanted = (buf.len() as u64).min(block.size - block_offset) as usize;

        let mut stream = DataNodeClient::new(location.address.clone(), self.network.clone())
            .fetch_block(&block.block_id)
            .await?;

        let mut skipped = 0u64;
        let mut filled = 0usize;
        while filled < wanted {
            let Some(chunk) = stream.next_chunk().await? else {
                break;
            };

            let mut chunk = chunk.as_slice();
            if skipped < block_offset {
                let skip = (block_offset - skipped).min(chunk.len() as u64);
                skipped += skip;
                chunk = &chunk[skip as usize..];
            }

            let take = chunk.len().min(wanted - filled);
            buf[filled..filled + take].copy_from_slice(&chunk[..take]);
            filled += take;
        }

        self.offset += filled as u64;
        Ok(filled)
    }

    async fn write(&mut self, _data: &[u8]) -> Result<usize> {
        Err(DfsError::ReadOnly(format!("{} is open for reading", self.path)))
    }

    async fn seek(&mut self, pos: SeekFrom) -> Result<u64> {
        let target = match pos {
            SeekFrom::Start(offset) => offset as i128,
            SeekFrom::Current(delta) => self.offset as i128 + delta as i128,
            SeekFrom::End(delta) => self.size as i128 + delta as i128,
        };
        if target < 0 || target > self.size as i128 {
            return Err(DfsError::InvalidArgument(format!(
                "offset {} outside file of {} bytes",
                target, self.size
            )));
        }
        self.offset = target as u64;
        Ok(self.offset)
    }

    async fn sync(&mut self) -> Result<()> {
        Ok(())
    }

    async fn close(&mut self) -> Result<()> {
        Ok(())
    }

    async fn stat(&self) -> Result<FileInfo> {
        let blocks = self
            .metadata
            .blocks
            .iter()
            .map(|b| {
                let location = self.metadata.locations.get(&b.block_id);
                BlockSummary {
                    block_id: b.block_id.clone(),
                    size: b.size,
                    worker_id: location.map(|l| l.worker_id.clone()).unwrap_or_default(),
                    address: location.map(|l| l.address.clone()).unwrap_or_default(),
                }
            })
            .collect();
        Ok(FileInfo {
            name: self.path.clone(),
            size: self.size,
            is_dir: false,
            blocks,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn blocks(sizes: &[u64]) -> Vec<BlockInfo> {
        sizes
            .iter()
            .enumerate()
            .map(|(i, size)| BlockInfo {
                block_id: format!("b{}", i),
                size: *size,
                checksum: 0,
            })
            .collect()
    }

    #[test]
    fn test_locate_block() {
        let blocks = blocks(&[10, 0, 5]);
        assert_eq!(locate_block(&blocks, 0), Some((0, 0)));
        assert_eq!(locate_block(&blocks, 9), Some((0, 9)));
        // Empty blocks are skipped
        assert_eq!(locate_block(&blocks, 10), Some((2, 0)));
        assert_eq!(locate_block(&blocks, 14), Some((2, 4)));
        assert_eq!(locate_block(&blocks, 15), None);
    }

    fn reader(sizes: &[u64]) -> Reader {
        Reader::new(
            NetworkConfig::default(),
            "f".to_string(),
            FileMetadata {
                blocks: blocks(sizes),
                locations: Default::default(),
            },
        )
    }

    #[tokio::test]
    async fn test_seek_bounds() {
        let mut reader = reader(&[10, 5]);
        assert_eq!(reader.size(), 15);
        assert_eq!(reader.seek(SeekFrom::Start(15)).await.unwrap(), 15);
        assert_eq!(reader.seek(SeekFrom::Current(-5)).await.unwrap(), 10);
        assert_eq!(reader.seek(SeekFrom::End(-15)).await.unwrap(), 0);
        assert!(matches!(
            reader.seek(SeekFrom::Start(16)).await,
            Err(DfsError::InvalidArgument(_))
        ));
        assert!(matches!(
            reader.seek(SeekFrom::Current(-1)).await,
            Err(DfsError::InvalidArgument(_))
        ));
        assert_eq!(reader.position(), 0);
    }

    #[tokio::test]
    async fn test_missing_location_is_unavailable() {
        let mut reader = reader(&[4]);
        let mut buf = [0u8; 4];
        assert!(matches!(reader.read(&mut buf).await, Err(DfsError::Unavailable(_))));
    }

    #[tokio::test]
    async fn test_eof_and_read_only() {
        let mut reader = reader(&[3]);
        reader.seek(SeekFrom::End(0)).await.unwrap();
        let mut buf = [0u8; 4];
        assert_eq!(reader.read(&mut buf).await.unwrap(), 0);
        assert!(matches!(reader.write(b"x").await, Err(DfsError::ReadOnly(_))));
        assert_eq!(reader.stat().await.unwrap().size, 3);
    }
}
