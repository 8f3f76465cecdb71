//! # DFS Client
//!
//! Streams files into the block store and back out. A [`Writer`] buffers up
//! to one block in memory, places it through the coordinator and pushes it
//! to the chosen data-node; closing it commits the file. A [`Reader`] maps
//! byte offsets onto the file's blocks and fetches them from their holders.

pub mod client;
pub mod file;
pub mod reader;
pub mod writer;

pub use client::{CreateOptions, DfsClient};
pub use file::{BlockSummary, File, FileInfo};
pub use reader::Reader;
pub use writer::Writer;
