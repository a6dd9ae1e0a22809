use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

use clap::Args;
use owo_colors::OwoColorize;

use blobs_store::{Client, FetchError, RemoteChunkSource, Store, StoreError};
use common::error::WireError;
use common::ContentHash;
use hive_daemon::{connect, ConfigError, Hello};

#[derive(Args, Debug, Clone)]
pub struct Fetch {
    /// Node to fetch from, host:port
    #[arg(long)]
    pub peer: String,

    /// Hex digest of the blob
    #[arg(long)]
    pub hash: ContentHash,

    /// Expected size in bytes
    #[arg(long)]
    pub size: u64,
}

#[derive(Debug)]
pub struct FetchOutput {
    pub hash: ContentHash,
    pub size: u64,
    pub stored_at: PathBuf,
}

impl fmt::Display for FetchOutput {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {} ({} bytes) -> {}",
            "Fetched".green().bold(),
            self.hash.short(),
            self.size,
            self.stored_at.display()
        )
    }
}

#[derive(Debug, thiserror::Error)]
pub enum FetchOpError {
    #[error("config error: {0}")]
    Config(#[from] ConfigError),

    #[error("store error: {0}")]
    Store(#[from] StoreError),

    #[error("could not reach {peer}: {source}")]
    Connect { peer: String, source: WireError },

    #[error("fetch failed: {0}")]
    Fetch(#[from] FetchError),

    #[error("{peer} does not have {hash}")]
    NotFound { peer: String, hash: ContentHash },
}

impl crate::cli::op::Op for Fetch {
    type Error = FetchOpError;
    type Output = FetchOutput;

    fn execute(&self, ctx: &crate::cli::op::OpContext) -> Result<Self::Output, Self::Error> {
        let store = Arc::new(Store::open(ctx.config.store_config()?)?);
        let stream =
            connect(self.peer.as_str(), Hello::Chunk).map_err(|source| FetchOpError::Connect {
                peer: self.peer.clone(),
                source,
            })?;

        let client = Client::new(store.clone(), RemoteChunkSource::new(stream));
        if !client.fetch_once(&self.hash, self.size)? {
            return Err(FetchOpError::NotFound {
                peer: self.peer.clone(),
                hash: self.hash,
            });
        }
        Ok(FetchOutput {
            hash: self.hash,
            size: store.blob_size(&self.hash).unwrap_or(self.size),
            stored_at: store.path(&self.hash),
        })
    }
}
