//! Error handling for the DFS

use std::io;
use thiserror::Error;

/// Result type for DFS operations
pub type Result<T> = std::result::Result<T, DfsError>;

/// Main error type for the DFS
#[derive(Error, Debug)]
pub enum DfsError {
    /// I/O related errors
    #[error("I/O error: {0}")]
    IoError(#[from] io::Error),

    /// Malformed caller input
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// Block identifier that does not parse or is unsafe as a file name
    #[error("Invalid block ID: {0}")]
    InvalidBlockId(String),

    /// Resource not found errors
    #[error("Not found: {0}")]
    NotFound(String),

    /// Stored data does not match its recorded checksum
    #[error("CORRUPTION DETECTED: checksum mismatch for block {block_id} (calculated {calculated}, stored {stored})")]
    ChecksumMismatch {
        block_id: String,
        calculated: u32,
        stored: u32,
    },

    /// A peer reported corrupted data without the checksum details
    #[error("Corrupted: {0}")]
    Corrupted(String),

    /// Checksum sidecar missing or unreadable
    #[error("Checksum unavailable: {0}")]
    ChecksumUnavailable(String),

    /// Not enough peers acknowledged a replicated log entry
    #[error("Replication quorum not reached: {acks} of {required} acknowledgements")]
    QuorumFailure { acks: usize, required: usize },

    /// No node can serve the request
    #[error("Unavailable: {0}")]
    Unavailable(String),

    /// Timeout errors
    #[error("Timeout: {0}")]
    Timeout(String),

    /// Malformed or incomplete RPC messages
    #[error("Protocol error: {0}")]
    ProtocolError(String),

    /// Write attempted on a read-only handle
    #[error("Read-only: {0}")]
    ReadOnly(String),

    /// Operation the handle does not support
    #[error("Not supported: {0}")]
    NotSupported(String),

    /// Serialization/deserialization errors
    #[error("Serialization error: {0}")]
    SerializationError(String),

    /// Configuration errors
    #[error("Configuration error: {0}")]
    ConfigError(String),

    /// Internal errors that should not normally occur
    #[error("Internal error: {0}")]
    InternalError(String),
}

impl From<serde_json::Error> for DfsError {
    fn from(err: serde_json::Error) -> Self {
        DfsError::SerializationError(format!("JSON error: {}", err))
    }
}

impl From<uuid::Error> for DfsError {
    fn from(err: uuid::Error) -> Self {
        DfsError::InvalidBlockId(format!("UUID error: {}", err))
    }
}

impl From<std::num::ParseIntError> for DfsError {
    fn from(err: std::num::ParseIntError) -> Self {
        DfsError::InvalidArgument(format!("Parse error: {}", err))
    }
}

impl From<tokio::time::error::Elapsed> for DfsError {
    fn from(err: tokio::time::error::Elapsed) -> Self {
        DfsError::Timeout(err.to_string())
    }
}

impl From<tonic::transport::Error> for DfsError {
    fn from(err: tonic::transport::Error) -> Self {
        DfsError::Unavailable(format!("transport error: {}", err))
    }
}

/// Convert DfsError to a gRPC status for network transmission
impl From<DfsError> for tonic::Status {
    fn from(err: DfsError) -> Self {
        use tonic::Code;

        let code = match &err {
            DfsError::InvalidArgument(_) | DfsError::InvalidBlockId(_) => Code::InvalidArgument,
            DfsError::NotFound(_) => Code::NotFound,
            DfsError::ChecksumMismatch { .. } => Code::DataLoss,
            DfsError::ChecksumUnavailable(_) => Code::FailedPrecondition,
            DfsError::ReadOnly(_) => Code::PermissionDenied,
            DfsError::QuorumFailure { .. } => Code::Aborted,
            DfsError::Unavailable(_) => Code::Unavailable,
            DfsError::Timeout(_) => Code::DeadlineExceeded,
            DfsError::NotSupported(_) => Code::Unimplemented,
            _ => Code::Internal,
        };
        tonic::Status::new(code, err.to_string())
    }
}

/// Rebuild a typed error from a status received off the wire. Structured
/// payloads (checksums, ack counts) do not survive the trip and only the
/// message is kept.
impl From<tonic::Status> for DfsError {
    fn from(status: tonic::Status) -> Self {
        use tonic::Code;

        let message = status.message().to_string();
        match status.code() {
            Code::InvalidArgument => DfsError::InvalidArgument(message),
            Code::NotFound => DfsError::NotFound(message),
            Code::DataLoss => DfsError::Corrupted(message),
            Code::FailedPrecondition => DfsError::ChecksumUnavailable(message),
            Code::PermissionDenied => DfsError::ReadOnly(message),
            Code::Aborted | Code::Unavailable => DfsError::Unavailable(message),
            Code::DeadlineExceeded => DfsError::Timeout(message),
            Code::Unimplemented => DfsError::NotSupported(message),
            _ => DfsError::InternalError(message),
        }
    }
}

impl DfsError {
    /// True for errors that report on-disk corruption
    pub fn is_corruption(&self) -> bool {
        matches!(self, DfsError::ChecksumMismatch { .. } | DfsError::Corrupted(_))
    }
}

/// Macro for creating errors with a formatted message
#[macro_export]
macro_rules! dfs_error {
    ($kind:ident, $($arg:tt)*) => {
        $crate::error::DfsError::$kind(format!($($arg)*))
    };
}

/// Macro for returning early with an error
#[macro_export]
macro_rules! bail {
    ($kind:ident, $($arg:tt)*) => {
        return Err($crate::dfs_error!($kind, $($arg)*))
    };
}

/// Macro for ensuring a condition or returning an error
#[macro_export]
macro_rules! ensure {
    ($cond:expr, $kind:ident, $($arg:tt)*) => {
        if !($cond) {
            $crate::bail!($kind, $($arg)*);
        }
    };
}
