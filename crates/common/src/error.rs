//! Error types shared by the replication layer.

pub type Result<T, E = WireError> = std::result::Result<T, E>;

/// Failure moving a frame across a connection.
#[derive(Debug, thiserror::Error)]
pub enum WireError {
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
    #[error("codec error: {0}")]
    Codec(#[from] bincode::Error),
    #[error("frame of {0} bytes exceeds the limit")]
    FrameTooLarge(usize),
    #[error("connection closed")]
    Closed,
    #[error("remote error: {0}")]
    Remote(String),
    #[error("unexpected response: {0}")]
    UnexpectedResponse(String),
}

/// Failure in the per-client delivery queue.
#[derive(Debug, thiserror::Error)]
pub enum FanoutError {
    #[error("client {0:?} is already registered")]
    DuplicateClient(String),
    #[error("client {0:?} disappeared")]
    UnknownClient(String),
    #[error("delivery to {id:?} failed: {source}")]
    Delivery {
        id: String,
        #[source]
        source: WireError,
    },
}

/// Failure while waiting for a file set to arrive.
#[derive(Debug, thiserror::Error)]
pub enum WaitError {
    #[error("files for task {0} were never sent")]
    NeverSent(u64),
    #[error("processing file set failed: {0}")]
    Process(String),
}
