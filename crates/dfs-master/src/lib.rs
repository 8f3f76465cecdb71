//! # DFS Master
//!
//! Coordinator of the block store. Keeps the file namespace and the block
//! map in memory, makes them durable through a snapshot plus an append-only
//! operation log, places new blocks on data-nodes in round-robin order and
//! optionally replicates its log to peer coordinators.

pub mod load_balancer;
pub mod master;
pub mod namespace;
pub mod oplog;
pub mod replication;
pub mod server;
pub mod state;

pub use load_balancer::{LoadBalancer, WorkerMetadata};
pub use master::MasterNode;
pub use namespace::Namespace;
pub use oplog::{Operation, OperationLog, OperationLogEntry};
pub use replication::Replicator;
pub use server::CoordinatorServer;
pub use state::MasterNodeState;
