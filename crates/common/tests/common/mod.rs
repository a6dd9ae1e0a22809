#![allow(dead_code)]

use std::net::{SocketAddr, TcpListener, TcpStream};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;

use ::common::attr::{AttrClient, AttrServer, AttributeCache, FileAttr, Getter};

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("debug")),
        )
        .with_test_writer()
        .try_init();
}

/// Serve `cache` on an ephemeral port, one thread per connection.
pub fn serve_attrs(cache: Arc<AttributeCache>) -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();
    let server = Arc::new(AttrServer::new(cache));
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

pub fn attr_client(addr: SocketAddr, id: &str) -> AttrClient<TcpStream> {
    AttrClient::new(TcpStream::connect(addr).unwrap(), id)
}

/// Getter that asks the cache at `addr`, counting round trips.
pub fn remote_getter(addr: SocketAddr, id: &str, calls: Arc<AtomicUsize>) -> Getter {
    let client = attr_client(addr, id);
    Box::new(move |path| {
        calls.fetch_add(1, Ordering::SeqCst);
        client
            .get_attr(path)
            .unwrap_or_else(|_| FileAttr::deletion(path))
    })
}
