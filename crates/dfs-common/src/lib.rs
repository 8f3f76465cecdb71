//! # DFS Common
//!
//! Shared building blocks for the distributed block store: identifiers and
//! namespace types, the error model, node configuration, and the gRPC
//! messages and clients spoken between coordinator, data-nodes and clients.

pub mod checksum;
pub mod config;
pub mod error;
pub mod metrics;
pub mod network;
pub mod proto;
pub mod rpc;
pub mod types;

pub use error::{DfsError, Result};
pub use types::*;

/// Default block size for the client writer (64MB)
pub const DEFAULT_BLOCK_SIZE: usize = 64 * 1024 * 1024;

/// Size of a single chunk in a client push stream (2MB)
pub const DEFAULT_STREAM_CHUNK_SIZE: usize = 2 * 1024 * 1024;

/// Size of a single chunk in a data-node fetch stream (64KB)
pub const FETCH_CHUNK_SIZE: usize = 64 * 1024;

/// Largest gRPC message accepted on the wire (80MB)
pub const DEFAULT_MAX_MESSAGE_SIZE: u32 = 80 * 1024 * 1024;

/// Default project when the caller does not name one
pub const DEFAULT_PROJECT: &str = "default";

/// Default format tag for committed files
pub const DEFAULT_FORMAT: &str = "bin";

/// Minimum acknowledgements for a replicated coordinator log entry
pub const DEFAULT_REPLICATION_QUORUM: usize = 2;
