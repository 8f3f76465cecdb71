//! # DFS Worker
//!
//! Data-node of the block store. Blocks are kept on local disk next to a
//! CRC32 sidecar, served over gRPC and a plain HTTP read
//! path, and scanned periodically for corruption.

pub mod http;
pub mod integrity;
pub mod server;
pub mod state;
pub mod worker;

pub use integrity::{IntegrityChecker, IntegrityReport};
pub use server::DataNodeServer;
pub use state::WorkerNodeState;
pub use worker::{validate_block_id, BlockReader, PushSession, WorkerNode};
