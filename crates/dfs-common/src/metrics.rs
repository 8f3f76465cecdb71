//! Operational counters for DFS nodes

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};

/// Result of a checksum verification, used as a metrics label
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VerificationOutcome {
    Valid,
    Corrupted,
    Missing,
}

/// Counters maintained by a data-node
#[derive(Debug, Default)]
pub struct WorkerMetrics {
    block_writes_success: AtomicU64,
    block_writes_failed: AtomicU64,
    block_reads_success: AtomicU64,
    block_reads_failed: AtomicU64,
    bytes_written: AtomicU64,
    bytes_read: AtomicU64,
    block_deletes: AtomicU64,
    checksum_valid: AtomicU64,
    checksum_corrupted: AtomicU64,
    checksum_missing: AtomicU64,
    corruption_total: AtomicU64,
    integrity_checks: AtomicU64,
}

/// Point-in-time copy of [`WorkerMetrics`]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkerMetricsSnapshot {
    pub block_writes_success: u64,
    pub block_writes_failed: u64,
    pub block_reads_success: u64,
    pub block_reads_failed: u64,
    pub bytes_written: u64,
    pub bytes_read: u64,
    pub block_deletes: u64,
    pub checksum_valid: u64,
    pub checksum_corrupted: u64,
    pub checksum_missing: u64,
    pub corruption_total: u64,
    pub integrity_checks: u64,
    pub captured_at: DateTime<Utc>,
}

impl WorkerMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_write(&self, success: bool, bytes: u64) {
        if success {
            self.block_writes_success.fetch_add(1, Ordering::Relaxed);
            self.bytes_written.fetch_add(bytes, Ordering::Relaxed);
        } else {
            self.block_writes_failed.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn record_read(&self, success: bool, bytes: u64) {
        if success {
            self.block_reads_success.fetch_add(1, Ordering::Relaxed);
            self.bytes_read.fetch_add(bytes, Ordering::Relaxed);
        } else {
            self.block_reads_failed.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn record_delete(&self) {
        self.block_deletes.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_verification(&self, outcome: VerificationOutcome) {
        match outcome {
            VerificationOutcome::Valid => {
                self.checksum_valid.fetch_add(1, Ordering::Relaxed);
            }
            VerificationOutcome::Corrupted => {
                self.checksum_corrupted.fetch_add(1, Ordering::Relaxed);
                self.corruption_total.fetch_add(1, Ordering::Relaxed);
            }
            VerificationOutcome::Missing => {
                self.checksum_missing.fetch_add(1, Ordering::Relaxed);
            }
        }
    }

    pub fn record_integrity_check(&self) {
        self.integrity_checks.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> WorkerMetricsSnapshot {
        WorkerMetricsSnapshot {
            block_writes_success: self.block_writes_success.load(Ordering::Relaxed),
            block_writes_failed: self.block_writes_failed.load(Ordering::Relaxed),
            block_reads_success: self.block_reads_success.load(Ordering::Relaxed),
            block_reads_failed: self.block_reads_failed.load(Ordering::Relaxed),
            bytes_written: self.bytes_written.load(Ordering::Relaxed),
            bytes_read: self.bytes_read.load(Ordering::Relaxed),
            block_deletes: self.block_deletes.load(Ordering::Relaxed),
            checksum_valid: self.checksum_valid.load(Ordering::Relaxed),
            checksum_corrupted: self.checksum_corrupted.load(Ordering::Relaxed),
            checksum_missing: self.checksum_missing.load(Ordering::Relaxed),
            corruption_total: self.corruption_total.load(Ordering::Relaxed),
            integrity_checks: self.integrity_checks.load(Ordering::Relaxed),
            captured_at: Utc::now(),
        }
    }
}

/// Counters maintained by the coordinator
#[derive(Debug, Default)]
pub struct MasterMetrics {
    blocks_allocated: AtomicU64,
    files_committed: AtomicU64,
    files_deleted: AtomicU64,
    metadata_lookups: AtomicU64,
    oplog_appends: AtomicU64,
    replication_failures: AtomicU64,
}

/// Point-in-time copy of [`MasterMetrics`]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MasterMetricsSnapshot {
    pub blocks_allocated: u64,
    pub files_committed: u64,
    pub files_deleted: u64,
    pub metadata_lookups: u64,
    pub oplog_appends: u64,
    pub replication_failures: u64,
}

impl MasterMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_allocation(&self) {
        self.blocks_allocated.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_commit(&self) {
        self.files_committed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_delete(&self) {
        self.files_deleted.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_lookup(&self) {
        self.metadata_lookups.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_oplog_append(&self) {
        self.oplog_appends.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_replication_failure(&self) {
        self.replication_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> MasterMetricsSnapshot {
        MasterMetricsSnapshot {
            blocks_allocated: self.blocks_allocated.load(Ordering::Relaxed),
            files_committed: self.files_committed.load(Ordering::Relaxed),
            files_deleted: self.files_deleted.load(Ordering::Relaxed),
            metadata_lookups: self.metadata_lookups.load(Ordering::Relaxed),
            oplog_appends: self.oplog_appends.load(Ordering::Relaxed),
            replication_failures: self.replication_failures.load(Ordering::Relaxed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_worker_counters() {
        let metrics = WorkerMetrics::new();
        metrics.record_write(true, 100);
        metrics.record_write(false, 50);
        metrics.record_read(true, 10);
        metrics.record_verification(VerificationOutcome::Valid);
        metrics.record_verification(VerificationOutcome::Corrupted);
        metrics.record_verification(VerificationOutcome::Missing);

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.block_writes_success, 1);
        assert_eq!(snapshot.block_writes_failed, 1);
        assert_eq!(snapshot.bytes_written, 100);
        assert_eq!(snapshot.bytes_read, 10);
        assert_eq!(snapshot.checksum_valid, 1);
        assert_eq!(snapshot.checksum_corrupted, 1);
        assert_eq!(snapshot.checksum_missing, 1);
        assert_eq!(snapshot.corruption_total, 1);
    }

    #[test]
    fn test_master_counters() {
        let metrics = MasterMetrics::new();
        metrics.record_allocation();
        metrics.record_allocation();
        metrics.record_commit();

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.blocks_allocated, 2);
        assert_eq!(snapshot.files_committed, 1);
        assert_eq!(snapshot.replication_failures, 0);
    }
}
