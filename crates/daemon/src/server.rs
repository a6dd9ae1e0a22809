//! TCP front end of a node.
//!
//! A connection opens with one [`Hello`] frame naming the protocol it will
//! speak; every later frame belongs to that protocol.

use std::io;
use std::net::{SocketAddr, TcpListener, TcpStream, ToSocketAddrs};
use std::path::Path;
use std::sync::Arc;
use std::thread;

use blobs_store::{ChunkServer, Client, RemoteChunkSource, Store, StoreError};
use common::attr::{AttrServer, AttributeCache, FileSet, LocalTree, ProcessError, UpdateHandler};
use common::error::WireError;
use common::wire::{read_frame, write_frame};
use common::ContentHash;
use serde::{Deserialize, Serialize};

use crate::config::{Config, ConfigError};
use crate::replay;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Hello {
    /// Blob transfer, see [`blobs_store::ChunkRequest`].
    Chunk,
    /// Attribute lookups and updates, see [`common::attr::AttrRequest`].
    Attr,
}

#[derive(Debug, thiserror::Error)]
pub enum ServiceSetupError {
    #[error("config error: {0}")]
    Config(#[from] ConfigError),

    #[error("store error: {0}")]
    Store(#[from] StoreError),

    #[error("failed to bind {addr}: {source}")]
    Bind { addr: SocketAddr, source: io::Error },
}

/// Everything a node serves: its blob store and the attribute cache over
/// its source tree.
pub struct Service {
    store: Arc<Store>,
    chunks: ChunkServer,
    attrs: AttrServer,
}

impl Service {
    /// Updates received from peers are replayed: content they name is
    /// fetched from the sender before the cache applies and re-queues them.
    pub fn new(store: Arc<Store>, cache: Arc<AttributeCache>) -> Self {
        let handler = replay_handler(store.clone(), cache.clone());
        Self {
            chunks: ChunkServer::new(store.clone()),
            attrs: AttrServer::with_update_handler(cache, handler),
            store,
        }
    }

    /// Open the configured store and mirror `[attr].root`, saving the content
    /// of every regular file the cache reads into the store so peers can
    /// fetch it by hash.
    pub fn from_config(config: &Config) -> Result<Self, ServiceSetupError> {
        let store = Arc::new(Store::open(config.store_config()?)?);

        let sink_store = store.clone();
        let sink = Arc::new(move |path: &Path| -> Option<ContentHash> {
            match sink_store.save_path(path) {
                Ok(hash) => Some(hash),
                Err(e) => {
                    tracing::warn!(path = %path.display(), error = %e, "failed to store file content");
                    None
                }
            }
        });
        let tree = LocalTree::new(config.attr_root()).with_content_sink(sink);
        tracing::info!(root = %tree.root().display(), "mirroring source tree");

        let cache = Arc::new(AttributeCache::with_config(
            tree.getter(),
            tree.statter(),
            config.attr_config(),
        ));
        Ok(Self::new(store, cache))
    }

    pub fn store(&self) -> &Arc<Store> {
        &self.store
    }

    pub fn cache(&self) -> &Arc<AttributeCache> {
        self.attrs.cache()
    }

    pub fn bind(addr: SocketAddr) -> Result<TcpListener, ServiceSetupError> {
        TcpListener::bind(addr).map_err(|source| ServiceSetupError::Bind { addr, source })
    }

    /// Accept connections until the listener fails, one thread each.
    pub fn serve(self: Arc<Self>, listener: TcpListener) -> io::Result<()> {
        tracing::info!(addr = %listener.local_addr()?, "listening");
        for conn in listener.incoming() {
            let conn = match conn {
                Ok(conn) => conn,
                Err(e) => {
                    tracing::warn!(error = %e, "accept failed");
                    continue;
                }
            };
            let service = self.clone();
            thread::spawn(move || service.handle_conn(conn));
        }
        Ok(())
    }

    /// Serve one connection to completion.
    pub fn handle_conn(&self, mut conn: TcpStream) {
        let peer = conn
            .peer_addr()
            .map(|a| a.to_string())
            .unwrap_or_else(|_| "unknown".to_string());
        let hello: Hello = match read_frame(&mut conn) {
            Ok(hello) => hello,
            Err(WireError::Closed) => return,
            Err(e) => {
                tracing::warn!(peer = %peer, error = %e, "bad hello");
                return;
            }
        };
        tracing::debug!(peer = %peer, protocol = ?hello, "connection opened");

        let result = match hello {
            Hello::Chunk => self.chunks.serve_conn(&mut conn),
            Hello::Attr => self.attrs.serve_conn(&mut conn),
        };
        match result {
            Ok(()) => tracing::debug!(peer = %peer, "connection closed"),
            Err(e) => tracing::warn!(peer = %peer, error = %e, "connection failed"),
        }
    }
}

/// Replay each update, pulling missing content from the chunk service at
/// the update's origin.
fn replay_handler(store: Arc<Store>, cache: Arc<AttributeCache>) -> UpdateHandler {
    Box::new(move |origin: &str, files: &FileSet| -> Result<(), ProcessError> {
        if replay::missing_content(files, &store).is_empty() {
            replay::apply(files, &cache);
            return Ok(());
        }
        tracing::debug!(origin = %origin, "fetching content for update");
        let stream = connect(origin, Hello::Chunk)?;
        let client = Client::new(store.clone(), RemoteChunkSource::new(stream));
        replay::replay(files, &client, &cache)?;
        Ok(())
    })
}

/// Open a connection to a node and select `protocol`.
pub fn connect(addr: impl ToSocketAddrs, protocol: Hello) -> Result<TcpStream, WireError> {
    let mut stream = TcpStream::connect(addr)?;
    stream.set_nodelay(true)?;
    write_frame(&mut stream, &protocol)?;
    Ok(stream)
}
