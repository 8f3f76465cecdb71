//! In-memory namespace and block map
//!
//! Mutations are planned against the current state as [`Operation`]s, logged,
//! and only then applied. Startup replay goes through the same `apply`.

use crate::oplog::Operation;
use chrono::Utc;
use dfs_common::rpc::CommitFileRequest;
use dfs_common::types::parse_block_id;
use dfs_common::{BlockId, BlockMetadata, DfsError, Inode, InodeType, Result, DEFAULT_FORMAT};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tracing::{debug, warn};
use uuid::Uuid;

/// Normalize a slash-separated path: drops empty and `.` components and
/// resolves `..`. Paths that climb above their root are rejected.
pub fn clean_path(path: &str) -> Result<String> {
    let mut parts: Vec<&str> = Vec::new();
    for component in path.split('/') {
        match component {
            "" | "." => {}
            ".." => {
                if parts.pop().is_none() {
                    return Err(DfsError::InvalidArgument(format!(
                        "path {} escapes the project root",
                        path
                    )));
                }
            }
            other => parts.push(other),
        }
    }
    if parts.is_empty() {
        return Err(DfsError::InvalidArgument(format!("path {:?} is empty", path)));
    }
    Ok(parts.join("/"))
}

/// Namespace key of `file_path` inside `project_id`
pub fn full_key(project_id: &str, file_path: &str) -> Result<String> {
    if project_id.is_empty() || file_path.is_empty() {
        return Err(DfsError::InvalidArgument(
            "invalid project_id or file_path".to_string(),
        ));
    }
    if project_id.contains('/') || project_id == "." || project_id == ".." {
        return Err(DfsError::InvalidArgument(format!(
            "invalid project_id {:?}",
            project_id
        )));
    }
    Ok(format!("{}/{}", project_id, clean_path(file_path)?))
}

fn parent_key(key: &str) -> Option<&str> {
    key.rsplit_once('/').map(|(parent, _)| parent)
}

fn base_name(key: &str) -> &str {
    key.rsplit_once('/').map(|(_, name)| name).unwrap_or(key)
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Namespace {
    /// Namespace key -> inode
    pub inodes: HashMap<String, Inode>,
    pub block_map: HashMap<BlockId, BlockMetadata>,
}

impl Namespace {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &str) -> Option<&Inode> {
        self.inodes.get(key)
    }

    pub fn file_count(&self) -> usize {
        self.inodes.values().filter(|i| i.is_file()).count()
    }

    /// `RegisterDirectory` operations for every missing ancestor of `key`
    fn plan_directories(&self, key: &str, project_id: &str) -> Result<Vec<Operation>> {
        let mut ops = Vec::new();
        let mut prefix = String::new();
        let components: Vec<&str> = key.split('/').collect();

        for component in &components[..components.len().saturating_sub(1)] {
            if !prefix.is_empty() {
                prefix.push('/');
            }
            prefix.push_str(component);

            match self.inodes.get(&prefix) {
                Some(existing) if existing.is_file() => {
                    return Err(DfsError::InvalidArgument(format!(
                        "{} is a file, not a directory",
                        prefix
                    )));
                }
                Some(_) => {}
                None => ops.push(Operation::RegisterDirectory {
                    inode: Inode::directory(&prefix, component, project_id),
                }),
            }
        }
        Ok(ops)
    }

    /// Operations that register `request` as a file
    pub fn plan_commit(&self, request: &CommitFileRequest) -> Result<Vec<Operation>> {
        let key = full_key(&request.project_id, &request.file_path)?;
        if matches!(self.inodes.get(&key), Some(existing) if existing.is_directory()) {
            return Err(DfsError::InvalidArgument(format!("{} is a directory", key)));
        }

        let mut ops = self.plan_directories(&key, &request.project_id)?;

        let mut blocks = Vec::with_capacity(request.blocks.len());
        let mut block_ids = Vec::with_capacity(request.blocks.len());
        let mut total_size = 0u64;
        for block in &request.blocks {
            let block_id = parse_block_id(&block.block_id)?;
            let mut metadata = self
                .block_map
                .get(&block_id)
                .cloned()
                .unwrap_or_else(|| BlockMetadata::new(block_id, block.size));
            metadata.size = block.size;
            total_size += block.size;
            block_ids.push(block_id);
            blocks.push(metadata);
        }

        let now = Utc::now();
        let format = if request.format.is_empty() {
            DEFAULT_FORMAT.to_string()
        } else {
            request.format.clone()
        };
        let inode = Inode {
            id: Uuid::new_v4().to_string(),
            name: base_name(&key).to_string(),
            path: key,
            owner_id: request.owner_id.clone(),
            project_id: request.project_id.clone(),
            inode_type: InodeType::File,
            format,
            size: total_size,
            blocks: block_ids,
            children: Vec::new(),
            created_at: now,
            modified_at: now,
        };
        ops.push(Operation::RegisterFile { inode, blocks });
        Ok(ops)
    }

    /// Operation that removes the file at `file_path`
    pub fn plan_delete(&self, project_id: &str, file_path: &str) -> Result<Operation> {
        let key = full_key(project_id, file_path)?;
        match self.inodes.get(&key) {
            Some(inode) if inode.is_file() => Ok(Operation::DeleteFile { inode: inode.clone() }),
            Some(_) => Err(DfsError::InvalidArgument(format!("{} is a directory", key))),
            None => Err(DfsError::NotFound(format!("file not found: {}", key))),
        }
    }

    /// Operations that move a file to a new path in the same project
    pub fn plan_rename(&self, project_id: &str, from: &str, to: &str) -> Result<Vec<Operation>> {
        let from_key = full_key(project_id, from)?;
        let to_key = full_key(project_id, to)?;

        match self.inodes.get(&from_key) {
            Some(inode) if inode.is_file() => {}
            Some(_) => return Err(DfsError::InvalidArgument(format!("{} is a directory", from_key))),
            None => return Err(DfsError::NotFound(format!("file not found: {}", from_key))),
        }
        if self.inodes.contains_key(&to_key) {
            return Err(DfsError::InvalidArgument(format!("{} already exists", to_key)));
        }

        let mut ops = self.plan_directories(&to_key, project_id)?;
        ops.push(Operation::RenameFile {
            from: from_key,
            to: to_key,
        });
        Ok(ops)
    }

    /// Apply a logged operation; applying the same operation twice is harmless
    pub fn apply(&mut self, operation: &Operation) {
        match operation {
            Operation::RegisterDirectory { inode } => {
                if self.inodes.contains_key(&inode.path) {
                    return;
                }
                self.inodes.insert(inode.path.clone(), inode.clone());
                self.link(&inode.path, &inode.id);
                debug!("Created directory: {}", inode.path);
            }
            Operation::RegisterFile { inode, blocks } => {
                if let Some(previous) = self.inodes.remove(&inode.path) {
                    self.unlink(&inode.path, &previous.id);
                }
                for block in blocks {
                    match self.block_map.get_mut(&block.block_id) {
                        Some(existing) => {
                            existing.size = block.size;
                            for replica in &block.replicas {
                                existing.add_replica(*replica);
                            }
                        }
                        None => {
                            self.block_map.insert(block.block_id, block.clone());
                        }
                    }
                }
                self.inodes.insert(inode.path.clone(), inode.clone());
                self.link(&inode.path, &inode.id);
            }
            Operation::DeleteFile { inode } => {
                let Some(removed) = self.inodes.remove(&inode.path) else {
                    return;
                };
                for block_id in &removed.blocks {
                    self.block_map.remove(block_id);
                }
                self.unlink(&removed.path, &removed.id);
            }
            Operation::RenameFile { from, to } => {
                let Some(mut inode) = self.inodes.remove(from) else {
                    return;
                };
                self.unlink(from, &inode.id);
                inode.path = to.clone();
                inode.name = base_name(to).to_string();
                inode.modified_at = Utc::now();
                let id = inode.id.clone();
                self.inodes.insert(to.clone(), inode);
                self.link(to, &id);
            }
        }
    }

    fn link(&mut self, key: &str, child_id: &str) {
        let Some(parent) = parent_key(key) else {
            return;
        };
        match self.inodes.get_mut(parent) {
            Some(dir) => {
                if !dir.children.iter().any(|c| c == child_id) {
                    dir.children.push(child_id.to_string());
                }
            }
            None => warn!("Parent directory {} not found for {}", parent, key),
        }
    }

    fn unlink(&mut self, key: &str, child_id: &str) {
        if let Some(dir) = parent_key(key).and_then(|parent| self.inodes.get_mut(parent)) {
            dir.children.retain(|c| c != child_id);
        }
    }

    /// File paths in `project_id`, relative to the project, filtered by prefix
    pub fn list_files(&self, project_id: &str, prefix: &str) -> Vec<String> {
        let root = format!("{}/", project_id);
        let mut files: Vec<String> = self
            .inodes
            .values()
            .filter(|inode| inode.is_file())
            .filter_map(|inode| inode.path.strip_prefix(&root))
            .filter(|rel| prefix.is_empty() || rel.starts_with(prefix))
            .map(str::to_string)
            .collect();
        files.sort();
        files
    }

    /// Record `worker_id` as holding `block_id`; unknown blocks are ignored
    pub fn add_block_location(&mut self, block_id: &BlockId, worker_id: Uuid) -> bool {
        match self.block_map.get_mut(block_id) {
            Some(metadata) => metadata.add_replica(worker_id),
            None => {
                warn!("Received location update for unknown block {}", block_id);
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use dfs_common::BlockRef;

    fn commit_request(project: &str, path: &str, blocks: &[(Uuid, u64)]) -> CommitFileRequest {
        CommitFileRequest {
            project_id: project.to_string(),
            owner_id: "owner".to_string(),
            file_path: path.to_string(),
            format: String::new(),
            blocks: blocks
                .iter()
                .map(|(id, size)| BlockRef {
                    block_id: id.to_string(),
                    size: *size,
                })
                .collect(),
        }
    }

    fn apply_all(ns: &mut Namespace, ops: &[Operation]) {
        for op in ops {
            ns.apply(op);
        }
    }

    #[test]
    fn test_clean_path() {
        assert_eq!(clean_path("a//b/./c").unwrap(), "a/b/c");
        assert_eq!(clean_path("/a/b/../c").unwrap(), "a/c");
        assert!(clean_path("../x").is_err());
        assert!(clean_path("./").is_err());
        assert_eq!(full_key("proj", "raw/file.avro").unwrap(), "proj/raw/file.avro");
        assert!(full_key("", "x").is_err());
        assert!(full_key("a/b", "x").is_err());
    }

    #[test]
    fn test_commit_creates_parents() {
        let mut ns = Namespace::new();
        let block = Uuid::new_v4();
        let ops = ns.plan_commit(&commit_request("proj", "raw/2024/data.bin", &[(block, 42)])).unwrap();
        assert_eq!(ops.len(), 4);
        apply_all(&mut ns, &ops);

        let file = ns.get("proj/raw/2024/data.bin").unwrap();
        assert_eq!(file.size, 42);
        assert_eq!(file.name, "data.bin");
        assert_eq!(file.format, "bin");
        assert_eq!(file.blocks, vec![block]);

        let parent = ns.get("proj/raw/2024").unwrap();
        assert!(parent.is_directory());
        assert_eq!(parent.children, vec![file.id.clone()]);
        assert!(ns.get("proj/raw").unwrap().children.contains(&parent.id));
        assert!(ns.get("proj").unwrap().is_directory());

        // Second commit in the same directory does not recreate it
        let ops = ns.plan_commit(&commit_request("proj", "raw/2024/other.bin", &[])).unwrap();
        assert_eq!(ops.len(), 1);
    }

    #[test]
    fn test_commit_rejects_bad_input() {
        let ns = Namespace::new();
        assert!(matches!(
            ns.plan_commit(&commit_request("", "a", &[])),
            Err(DfsError::InvalidArgument(_))
        ));
        assert!(matches!(
            ns.plan_commit(&commit_request("p", "", &[])),
            Err(DfsError::InvalidArgument(_))
        ));

        let mut request = commit_request("p", "a", &[]);
        request.blocks.push(BlockRef {
            block_id: "not-a-uuid".to_string(),
            size: 1,
        });
        assert!(matches!(ns.plan_commit(&request), Err(DfsError::InvalidBlockId(_))));
        assert!(ns.inodes.is_empty());
    }

    #[test]
    fn test_overwrite_replaces_child_link() {
        let mut ns = Namespace::new();
        let ops = ns.plan_commit(&commit_request("p", "d/f", &[])).unwrap();
        apply_all(&mut ns, &ops);
        let first_id = ns.get("p/d/f").unwrap().id.clone();

        let ops = ns.plan_commit(&commit_request("p", "d/f", &[])).unwrap();
        apply_all(&mut ns, &ops);
        let second_id = ns.get("p/d/f").unwrap().id.clone();

        assert_ne!(first_id, second_id);
        assert_eq!(ns.get("p/d").unwrap().children, vec![second_id]);
    }

    #[test]
    fn test_commit_keeps_known_replicas() {
        let mut ns = Namespace::new();
        let block = Uuid::new_v4();
        let worker = Uuid::new_v4();
        let mut metadata = BlockMetadata::new(block, 0);
        metadata.primary_node = Some(worker);
        ns.block_map.insert(block, metadata);
        assert!(ns.add_block_location(&block, worker));

        let ops = ns.plan_commit(&commit_request("p", "f", &[(block, 9)])).unwrap();
        apply_all(&mut ns, &ops);

        let stored = &ns.block_map[&block];
        assert_eq!(stored.size, 9);
        assert_eq!(stored.replicas, vec![worker]);
        assert_eq!(stored.primary_node, Some(worker));
    }

    #[test]
    fn test_delete_and_rename() {
        let mut ns = Namespace::new();
        let block = Uuid::new_v4();
        let ops = ns.plan_commit(&commit_request("p", "a/f1", &[(block, 3)])).unwrap();
        apply_all(&mut ns, &ops);

        let ops = ns.plan_rename("p", "a/f1", "b/f2").unwrap();
        apply_all(&mut ns, &ops);
        assert!(ns.get("p/a/f1").is_none());
        let moved = ns.get("p/b/f2").unwrap().clone();
        assert_eq!(moved.name, "f2");
        assert!(ns.get("p/a").unwrap().children.is_empty());
        assert_eq!(ns.get("p/b").unwrap().children, vec![moved.id.clone()]);

        assert!(matches!(ns.plan_rename("p", "a/missing", "c"), Err(DfsError::NotFound(_))));

        let op = ns.plan_delete("p", "b/f2").unwrap();
        ns.apply(&op);
        assert!(ns.get("p/b/f2").is_none());
        assert!(!ns.block_map.contains_key(&block));
        assert!(ns.get("p/b").unwrap().children.is_empty());

        assert!(matches!(ns.plan_delete("p", "b/f2"), Err(DfsError::NotFound(_))));
        assert!(matches!(ns.plan_delete("p", "b"), Err(DfsError::InvalidArgument(_))));
    }

    #[test]
    fn test_list_files() {
        let mut ns = Namespace::new();
        for (project, path) in [("p", "raw/a"), ("p", "raw/b"), ("p", "curated/c"), ("q", "raw/d")] {
            let ops = ns.plan_commit(&commit_request(project, path, &[])).unwrap();
            apply_all(&mut ns, &ops);
        }

        assert_eq!(ns.list_files("p", ""), vec!["curated/c", "raw/a", "raw/b"]);
        assert_eq!(ns.list_files("p", "raw/"), vec!["raw/a", "raw/b"]);
        assert_eq!(ns.list_files("q", ""), vec!["raw/d"]);
        assert!(ns.list_files("missing", "").is_empty());
    }

    #[test]
    fn test_unknown_block_location_ignored() {
        let mut ns = Namespace::new();
        assert!(!ns.add_block_location(&Uuid::new_v4(), Uuid::new_v4()));
        assert!(ns.block_map.is_empty());
    }
}
