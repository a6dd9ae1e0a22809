//! Chunked blob transfer between peers.
//!
//! A transfer is a sequence of request/response pairs starting at offset 0.
//! It ends when a response has `last` set, or `have` cleared if the peer
//! does not store the blob.

use std::io::{Read, Write};
use std::sync::Arc;

use bytes::Bytes;
use common::error::WireError;
use common::wire::{read_frame, write_frame};
use common::ContentHash;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::FetchError;
use crate::store::Store;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChunkRequest {
    pub hash: ContentHash,
    pub start: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChunkResponse {
    pub have: bool,
    pub chunk: Bytes,
    pub size: u64,
    pub last: bool,
}

impl ChunkResponse {
    /// Answer for a blob the peer does not have.
    pub fn missing() -> Self {
        Self {
            have: false,
            chunk: Bytes::new(),
            size: 0,
            last: true,
        }
    }
}

/// Somewhere chunks can be requested from.
pub trait ChunkSource: Send + Sync {
    fn fetch_chunk(&self, req: &ChunkRequest) -> Result<ChunkResponse, FetchError>;
}

/// Another store in the same process.
impl ChunkSource for Store {
    fn fetch_chunk(&self, req: &ChunkRequest) -> Result<ChunkResponse, FetchError> {
        Ok(self.serve(req)?)
    }
}

impl<T: ChunkSource + ?Sized> ChunkSource for Arc<T> {
    fn fetch_chunk(&self, req: &ChunkRequest) -> Result<ChunkResponse, FetchError> {
        (**self).fetch_chunk(req)
    }
}

/// A peer at the other end of a stream.
pub struct RemoteChunkSource<S> {
    stream: Mutex<S>,
}

impl<S: Read + Write> RemoteChunkSource<S> {
    pub fn new(stream: S) -> Self {
        Self {
            stream: Mutex::new(stream),
        }
    }
}

impl<S: Read + Write + Send> ChunkSource for RemoteChunkSource<S> {
    fn fetch_chunk(&self, req: &ChunkRequest) -> Result<ChunkResponse, FetchError> {
        let mut stream = self.stream.lock();
        write_frame(&mut *stream, req)?;
        let rep: ChunkResponse = read_frame(&mut *stream)?;
        if rep.size != rep.chunk.len() as u64 {
            return Err(FetchError::Protocol(format!(
                "chunk declares {} bytes but carries {}",
                rep.size,
                rep.chunk.len()
            )));
        }
        Ok(rep)
    }
}

/// Serves chunk requests from a [`Store`].
pub struct ChunkServer {
    store: Arc<Store>,
}

impl ChunkServer {
    pub fn new(store: Arc<Store>) -> Self {
        Self { store }
    }

    /// Answer one request. A blob that cannot be read is reported missing.
    pub fn handle(&self, req: &ChunkRequest) -> ChunkResponse {
        match self.store.serve(req) {
            Ok(rep) => rep,
            Err(e) => {
                warn!(hash = %req.hash, start = req.start, error = %e, "serving chunk failed");
                ChunkResponse::missing()
            }
        }
    }

    /// Serve requests on `stream` until the peer hangs up.
    pub fn serve_conn<S: Read + Write>(&self, stream: &mut S) -> Result<(), WireError> {
        loop {
            let req: ChunkRequest = match read_frame(stream) {
                Ok(req) => req,
                Err(WireError::Closed) => {
                    debug!("chunk connection closed");
                    return Ok(());
                }
                Err(e) => return Err(e),
            };
            write_frame(stream, &self.handle(&req))?;
        }
    }
}
