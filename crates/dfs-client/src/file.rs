//! File handle abstraction shared by readers and writers

use async_trait::async_trait;
use dfs_common::{DfsError, Result};
use std::io::SeekFrom;

/// Where one block of a file lives
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlockSummary {
    pub block_id: String,
    pub size: u64,
    pub worker_id: String,
    pub address: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileInfo {
    pub name: String,
    pub size: u64,
    pub is_dir: bool,
    pub blocks: Vec<BlockSummary>,
}

/// An open DFS file
///
/// Files are either write-only ([`crate::Writer`]) or read-only
/// ([`crate::Reader`]); the unsupported half returns an error.
#[async_trait]
pub trait File: Send {
    /// Read into `buf`, returning 0 at end of file
    async fn read(&mut self, buf: &mut [u8]) -> Result<usize>;

    async fn write(&mut self, data: &[u8]) -> Result<usize>;

    async fn seek(&mut self, pos: SeekFrom) -> Result<u64>;

    async fn sync(&mut self) -> Result<()>;

    async fn close(&mut self) -> Result<()>;

    async fn stat(&self) -> Result<FileInfo>;

    /// Read until end of file, appending to `out`
    async fn read_to_end(&mut self, out: &mut Vec<u8>) -> Result<usize> {
        let mut buf = vec![0u8; 64 * 1024];
        let mut total = 0;
        loop {
            let n = self.read(&mut buf).await?;
            if n == 0 {
                return Ok(total);
            }
            out.extend_from_slice(&buf[..n]);
            total += n;
        }
    }

    /// Write all of `data`
    async fn write_all(&mut self, mut data: &[u8]) -> Result<()> {
        while !data.is_empty() {
            let n = self.write(data).await?;
            if n == 0 {
                return Err(DfsError::InternalError("write accepted no bytes".to_string()));
            }
            data = &data[n..];
        }
        Ok(())
    }
}
