#![allow(dead_code)]

use std::net::{SocketAddr, TcpListener};
use std::path::Path;
use std::sync::Arc;
use std::thread;

use blobs_store::{ChunkServer, Store, StoreConfig};

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("debug")),
        )
        .with_test_writer()
        .try_init();
}

/// Store with small chunks so multi-chunk transfers are cheap to set up.
pub fn small_store(dir: &Path) -> Arc<Store> {
    Arc::new(
        Store::open(StoreConfig {
            serve_chunk_size: 64,
            memory_limit: 100,
            memory_entries: 8,
            ..StoreConfig::new(dir)
        })
        .unwrap(),
    )
}

/// Serve `store` on an ephemeral port, one thread per connection.
pub fn serve_chunks(store: Arc<Store>) -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();
    let server = Arc::new(ChunkServer::new(store));
    thread::spawn(move || {
        for conn in listener.incoming() {
            let Ok(mut conn) = conn else { break };
            let server = server.clone();
            thread::spawn(move || {
                let _ = server.serve_conn(&mut conn);
            });
        }
    });
    addr
}
