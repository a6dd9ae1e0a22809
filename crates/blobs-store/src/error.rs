use common::error::WireError;

/// Errors from the blob store itself.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("short read: expected {expected} bytes, got {got}")]
    ShortRead { expected: u64, got: u64 },
}

/// Errors while pulling a blob from a peer.
#[derive(Debug, thiserror::Error)]
pub enum FetchError {
    #[error("wire error: {0}")]
    Wire(#[from] WireError),

    #[error("store error: {0}")]
    Store(#[from] StoreError),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("protocol error: {0}")]
    Protocol(String),
}

pub type Result<T, E = StoreError> = std::result::Result<T, E>;
