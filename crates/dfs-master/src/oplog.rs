//! Append-only operation log for namespace mutations
//!
//! One JSON record per line, fsynced on every append. Replayed on startup on
//! top of the last snapshot and truncated once a new snapshot is on disk.

use chrono::{DateTime, Utc};
use dfs_common::{BlockMetadata, Inode, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tokio::fs::{File, OpenOptions};
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

/// A namespace mutation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op_type", content = "payload")]
pub enum Operation {
    RegisterFile {
        inode: Inode,
        blocks: Vec<BlockMetadata>,
    },
    DeleteFile {
        inode: Inode,
    },
    RegisterDirectory {
        inode: Inode,
    },
    RenameFile {
        from: String,
        to: String,
    },
}

impl Operation {
    pub fn name(&self) -> &'static str {
        match self {
            Operation::RegisterFile { .. } => "RegisterFile",
            Operation::DeleteFile { .. } => "DeleteFile",
            Operation::RegisterDirectory { .. } => "RegisterDirectory",
            Operation::RenameFile { .. } => "RenameFile",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OperationLogEntry {
    pub timestamp: DateTime<Utc>,
    pub operation: Operation,
}

impl OperationLogEntry {
    pub fn new(operation: Operation) -> Self {
        Self {
            timestamp: Utc::now(),
            operation,
        }
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }

    pub fn from_bytes(data: &[u8]) -> Result<Self> {
        Ok(serde_json::from_slice(data)?)
    }
}

pub struct OperationLog {
    path: PathBuf,
    file: Mutex<File>,
}

impl OperationLog {
    pub async fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let file = OpenOptions::new().create(true).append(true).open(path).await?;
        info!("Operation log opened at {}", path.display());
        Ok(Self {
            path: path.to_path_buf(),
            file: Mutex::new(file),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append one entry and fsync before returning
    ///
    /// Returns the log length before the append, for `rollback`.
    pub async fn append(&self, entry: &OperationLogEntry) -> Result<u64> {
        let mut line = entry.to_bytes()?;
        line.push(b'\n');

        let mut file = self.file.lock().await;
        let offset = file.metadata().await?.len();
        file.write_all(&line).await?;
        file.sync_data().await?;
        debug!("Logged {} operation", entry.operation.name());
        Ok(offset)
    }

    /// Drop everything appended after `offset`
    pub async fn rollback(&self, offset: u64) -> Result<()> {
        let file = self.file.lock().await;
        file.set_len(offset).await?;
        file.sync_all().await?;
        warn!("Operation log rolled back to {} bytes", offset);
        Ok(())
    }

    /// Discard every entry; called once a snapshot covers them
    pub async fn truncate(&self) -> Result<()> {
        let file = self.file.lock().await;
        file.set_len(0).await?;
        file.sync_all().await?;
        info!("Operation log truncated");
        Ok(())
    }

    /// Read all entries; a torn or unparsable line is skipped with a warning
    pub async fn read_entries(path: &Path) -> Result<Vec<OperationLogEntry>> {
        let contents = match tokio::fs::read(path).await {
            Ok(contents) => contents,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut entries = Vec::new();
        for (line_no, line) in contents.split(|b| *b == b'\n').enumerate() {
            if line.iter().all(u8::is_ascii_whitespace) {
                continue;
            }
            match OperationLogEntry::from_bytes(line) {
                Ok(entry) => entries.push(entry),
                Err(e) => warn!("Skipping unreadable operation log line {}: {}", line_no + 1, e),
            }
        }
        Ok(entries)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_entry_json_shape() {
        let entry = OperationLogEntry::new(Operation::RenameFile {
            from: "p/a".to_string(),
            to: "p/b".to_string(),
        });
        let value: serde_json::Value = serde_json::from_slice(&entry.to_bytes().unwrap()).unwrap();
        assert_eq!(value["operation"]["op_type"], "RenameFile");
        assert_eq!(value["operation"]["payload"]["to"], "p/b");
        assert!(value["timestamp"].is_string());
    }

    #[tokio::test]
    async fn test_append_read_truncate() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("master_op.log");
        let log = OperationLog::open(&path).await.unwrap();

        let dir_entry = OperationLogEntry::new(Operation::RegisterDirectory {
            inode: Inode::directory("proj", "proj", "proj"),
        });
        let rename = OperationLogEntry::new(Operation::RenameFile {
            from: "proj/a".to_string(),
            to: "proj/b".to_string(),
        });
        log.append(&dir_entry).await.unwrap();
        log.append(&rename).await.unwrap();

        let entries = OperationLog::read_entries(&path).await.unwrap();
        assert_eq!(entries, vec![dir_entry, rename]);

        log.truncate().await.unwrap();
        assert!(OperationLog::read_entries(&path).await.unwrap().is_empty());

        // Appends after truncation land at the start of the file
        let again = OperationLogEntry::new(Operation::RenameFile {
            from: "proj/b".to_string(),
            to: "proj/c".to_string(),
        });
        log.append(&again).await.unwrap();
        assert_eq!(OperationLog::read_entries(&path).await.unwrap(), vec![again]);
    }

    #[tokio::test]
    async fn test_rollback_drops_last_entry() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("master_op.log");
        let log = OperationLog::open(&path).await.unwrap();

        let kept = OperationLogEntry::new(Operation::RenameFile {
            from: "proj/a".to_string(),
            to: "proj/b".to_string(),
        });
        let dropped = OperationLogEntry::new(Operation::RenameFile {
            from: "proj/b".to_string(),
            to: "proj/c".to_string(),
        });
        assert_eq!(log.append(&kept).await.unwrap(), 0);
        let offset = log.append(&dropped).await.unwrap();
        assert!(offset > 0);

        log.rollback(offset).await.unwrap();
        assert_eq!(OperationLog::read_entries(&path).await.unwrap(), vec![kept.clone()]);

        log.append(&dropped).await.unwrap();
        assert_eq!(OperationLog::read_entries(&path).await.unwrap(), vec![kept, dropped]);
    }

    #[tokio::test]
    async fn test_torn_line_skipped() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("master_op.log");
        let entry = OperationLogEntry::new(Operation::RenameFile {
            from: "x/1".to_string(),
            to: "x/2".to_string(),
        });
        let mut contents = entry.to_bytes().unwrap();
        contents.extend_from_slice(b"\n{\"timestamp\":\"2024-");
        std::fs::write(&path, contents).unwrap();

        assert_eq!(OperationLog::read_entries(&path).await.unwrap(), vec![entry]);
    }
}
