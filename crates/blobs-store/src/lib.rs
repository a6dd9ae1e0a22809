//! Content-addressed blob store
//!
//! Blobs live on disk under their BLAKE3 digest, sharded by the first two
//! hex characters. Small blobs are also kept in a bounded in-memory layer so
//! hot content can be served without touching the filesystem.
//!
//! Peers exchange blobs with a chunked protocol: [`ChunkServer`] answers
//! [`ChunkRequest`]s from a local [`Store`], and [`Client`] pulls a blob from
//! any [`ChunkSource`], verifying the digest once the transfer completes.
//!
//! # Example
//!
//! ```rust,no_run
//! use blobs_store::{Client, Store, StoreConfig};
//! use std::sync::Arc;
//!
//! # fn example() -> Result<(), blobs_store::FetchError> {
//! let remote = Arc::new(Store::open(StoreConfig::new("/tmp/remote"))?);
//! let local = Arc::new(Store::open(StoreConfig::new("/tmp/local"))?);
//!
//! let hash = remote.save(b"hello world")?;
//!
//! // Any ChunkSource works; another in-process store is the simplest.
//! let client = Client::new(local.clone(), remote);
//! assert!(client.fetch_once(&hash, 11)?);
//! assert!(local.has_hash(&hash));
//! # Ok(())
//! # }
//! ```

mod client;
mod error;
mod lru;
mod protocol;
mod store;
mod writer;

pub use client::Client;
pub use error::{FetchError, Result, StoreError};
pub use lru::LruCache;
pub use protocol::{ChunkRequest, ChunkResponse, ChunkServer, ChunkSource, RemoteChunkSource};
pub use store::{Store, StoreConfig, StoreStats};
pub use writer::HashWriter;
