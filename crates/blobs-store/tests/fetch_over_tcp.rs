mod common;

use std::fs;
use std::net::TcpStream;
use std::sync::Arc;
use std::thread;

use blobs_store::{ChunkRequest, ChunkSource, Client, RemoteChunkSource};
use ::common::ContentHash;

use crate::common::{init_tracing, serve_chunks, small_store};

#[test]
fn test_fetch_multi_chunk_blob() {
    init_tracing();
    let remote_dir = tempfile::tempdir().unwrap();
    let local_dir = tempfile::tempdir().unwrap();
    let remote = small_store(remote_dir.path());
    let local = small_store(local_dir.path());

    let content: Vec<u8> = (0..1000u32).map(|i| (i % 251) as u8).collect();
    let hash = remote.save(&content).unwrap();
    let addr = serve_chunks(remote.clone());

    let source = RemoteChunkSource::new(TcpStream::connect(addr).unwrap());
    let client = Client::new(local.clone(), source);
    assert!(client.fetch_once(&hash, content.len() as u64).unwrap());

    assert_eq!(fs::read(local.path(&hash)).unwrap(), content);
    assert_eq!(local.stats().bytes_received, 1000);
}

#[test]
fn test_exact_multiple_ends_with_empty_chunk() {
    init_tracing();
    let remote_dir = tempfile::tempdir().unwrap();
    let remote = small_store(remote_dir.path());
    let hash = remote.save(&[7u8; 128]).unwrap();
    let addr = serve_chunks(remote);

    let source = RemoteChunkSource::new(TcpStream::connect(addr).unwrap());
    let mut start = 0;
    let mut sizes = Vec::new();
    loop {
        let rep = source.fetch_chunk(&ChunkRequest { hash, start }).unwrap();
        assert!(rep.have);
        sizes.push(rep.size);
        start += rep.size;
        if rep.last {
            break;
        }
    }
    assert_eq!(sizes, vec![64, 64, 0]);
}

#[test]
fn test_missing_blob_over_tcp() {
    init_tracing();
    let remote_dir = tempfile::tempdir().unwrap();
    let local_dir = tempfile::tempdir().unwrap();
    let addr = serve_chunks(small_store(remote_dir.path()));

    let source = RemoteChunkSource::new(TcpStream::connect(addr).unwrap());
    let client = Client::new(small_store(local_dir.path()), source);
    let hash = ContentHash::of(b"never stored");
    assert!(!client.fetch_once(&hash, 12).unwrap());
}

#[test]
fn test_concurrent_clients_share_one_server() {
    init_tracing();
    let remote_dir = tempfile::tempdir().unwrap();
    let local_dir = tempfile::tempdir().unwrap();
    let remote = small_store(remote_dir.path());
    let local = small_store(local_dir.path());

    let hashes: Vec<(ContentHash, u64)> = (0..4u8)
        .map(|i| {
            let content = vec![i; 300];
            (remote.save(&content).unwrap(), 300)
        })
        .collect();
    let addr = serve_chunks(remote);

    let source = RemoteChunkSource::new(TcpStream::connect(addr).unwrap());
    let client = Arc::new(Client::new(local.clone(), source));
    let handles: Vec<_> = hashes
        .iter()
        .copied()
        .map(|(hash, size)| {
            let client = client.clone();
            thread::spawn(move || client.fetch_once(&hash, size).unwrap())
        })
        .collect();
    for h in handles {
        assert!(h.join().unwrap());
    }
    for (hash, _) in &hashes {
        assert!(local.has_hash(hash));
    }
    assert_eq!(local.stats().blobs, 4);
}
