#![allow(dead_code)]

use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;
use std::thread;

use hive_daemon::{Config, Service};

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("debug")),
        )
        .with_test_writer()
        .try_init();
}

/// Config rooted entirely under `dir`: blobs in `dir/blobs`, source tree in
/// `dir/src`.
pub fn node_config(dir: &Path) -> Config {
    let mut config = Config::default();
    config.store.dir = Some(dir.join("blobs"));
    config.attr.root = Some(dir.join("src"));
    config.server.listen_addr = SocketAddr::from(([127, 0, 0, 1], 0));
    config
}

/// Start a node on an ephemeral port.
pub fn start_node(config: &Config) -> (Arc<Service>, SocketAddr) {
    let service = Arc::new(Service::from_config(config).unwrap());
    let listener = Service::bind(config.server.listen_addr).unwrap();
    let addr = listener.local_addr().unwrap();
    let serving = service.clone();
    thread::spawn(move || serving.serve(listener));
    (service, addr)
}
