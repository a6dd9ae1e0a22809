use std::io::Write;
use std::sync::Arc;

use common::{ContentHash, SingleFlight};
use tracing::{debug, error, info, warn};

use crate::error::{FetchError, StoreError};
use crate::protocol::{ChunkRequest, ChunkSource};
use crate::store::Store;

/// Pulls blobs from one peer into a local [`Store`].
///
/// Safe to share between threads; concurrent requests for the same hash
/// result in a single transfer.
pub struct Client<S> {
    store: Arc<Store>,
    source: S,
    fetching: SingleFlight<ContentHash, ()>,
}

impl<S: ChunkSource> Client<S> {
    pub fn new(store: Arc<Store>, source: S) -> Self {
        Self {
            store,
            source,
            fetching: SingleFlight::new(()),
        }
    }

    pub fn store(&self) -> &Arc<Store> {
        &self.store
    }

    /// Make sure `hash` is stored locally, fetching it at most once across
    /// concurrent callers.
    ///
    /// Returns `Ok(false)` if the peer does not have it.
    pub fn fetch_once(&self, hash: &ContentHash, size: u64) -> Result<bool, FetchError> {
        self.fetching.run(
            *hash,
            |_| self.store.has_hash(hash).then_some(Ok(true)),
            || self.fetch(hash, size),
            |_, fetched| fetched,
        )
    }

    /// Fetch `hash` from the peer chunk by chunk, without deduplication.
    ///
    /// # Panics
    ///
    /// If the received bytes do not hash to `hash`.
    pub fn fetch(&self, hash: &ContentHash, size: u64) -> Result<bool, FetchError> {
        debug!(hash = %hash, size = size, "fetching blob");
        let first = self.source.fetch_chunk(&ChunkRequest {
            hash: *hash,
            start: 0,
        })?;
        if !first.have {
            debug!(hash = %hash, "peer does not have blob");
            return Ok(false);
        }

        let (saved, written) = if first.last {
            (self.store.save(&first.chunk)?, first.chunk.len() as u64)
        } else {
            let mut output = self.store.new_hash_writer()?;
            output.write_all(&first.chunk).map_err(StoreError::from)?;
            loop {
                let rep = self.source.fetch_chunk(&ChunkRequest {
                    hash: *hash,
                    start: output.size(),
                })?;
                if !rep.have {
                    warn!(hash = %hash, offset = output.size(), "peer lost blob mid-transfer");
                    return Ok(false);
                }
                if rep.chunk.is_empty() && !rep.last {
                    return Err(FetchError::Protocol(format!(
                        "empty chunk at offset {} of {}",
                        output.size(),
                        hash
                    )));
                }
                output.write_all(&rep.chunk).map_err(StoreError::from)?;
                if rep.last {
                    break;
                }
            }
            let written = output.size();
            (output.finish()?, written)
        };

        self.store.add_received(written);
        if saved != *hash {
            error!(want = %hash, got = %saved, "file corruption");
            panic!("file corruption: got {} want {}", saved, hash);
        }
        if written != size {
            warn!(hash = %hash, expected = size, got = written, "blob size differs from announced size");
        }
        info!(hash = %hash, size = written, "fetched blob");
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::ChunkResponse;
    use crate::store::StoreConfig;
    use bytes::Bytes;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Barrier;
    use std::thread;
    use std::time::Duration;

    fn store(dir: &std::path::Path) -> Arc<Store> {
        Arc::new(
            Store::open(StoreConfig {
                serve_chunk_size: 8,
                memory_limit: 16,
                ..StoreConfig::new(dir)
            })
            .unwrap(),
        )
    }

    /// Counts requests and optionally stalls each one.
    struct Counting {
        inner: Arc<Store>,
        requests: AtomicUsize,
        delay: Duration,
    }

    impl ChunkSource for Counting {
        fn fetch_chunk(&self, req: &ChunkRequest) -> Result<ChunkResponse, FetchError> {
            self.requests.fetch_add(1, Ordering::SeqCst);
            thread::sleep(self.delay);
            self.inner.fetch_chunk(req)
        }
    }

    /// Answers every request with the same bytes, whatever was asked for.
    struct Liar;

    impl ChunkSource for Liar {
        fn fetch_chunk(&self, _req: &ChunkRequest) -> Result<ChunkResponse, FetchError> {
            Ok(ChunkResponse {
                have: true,
                chunk: Bytes::from_static(b"not what you wanted"),
                size: 19,
                last: true,
            })
        }
    }

    #[test]
    fn test_fetch_small_and_large() {
        let remote_dir = tempfile::tempdir().unwrap();
        let local_dir = tempfile::tempdir().unwrap();
        let remote = store(remote_dir.path());
        let local = store(local_dir.path());

        let small = remote.save(b"tiny").unwrap();
        let big_content: Vec<u8> = (0..100u8).collect();
        let big = remote.save(&big_content).unwrap();

        let client = Client::new(local.clone(), remote.clone());
        assert!(client.fetch(&small, 4).unwrap());
        assert!(client.fetch(&big, 100).unwrap());

        assert!(local.has_hash(&small));
        assert_eq!(std::fs::read(local.path(&big)).unwrap(), big_content);
        assert_eq!(local.stats().bytes_received, 104);
        assert_eq!(remote.stats().bytes_served, 104);
    }

    #[test]
    fn test_fetch_missing() {
        let remote_dir = tempfile::tempdir().unwrap();
        let local_dir = tempfile::tempdir().unwrap();
        let client = Client::new(store(local_dir.path()), store(remote_dir.path()));

        let hash = ContentHash::of(b"nobody has this");
        assert!(!client.fetch_once(&hash, 15).unwrap());
        assert!(!client.store().has_hash(&hash));
    }

    #[test]
    fn test_fetch_once_deduplicates() {
        let remote_dir = tempfile::tempdir().unwrap();
        let local_dir = tempfile::tempdir().unwrap();
        let remote = store(remote_dir.path());
        let hash = remote.save(b"shared by everyone").unwrap();

        let source = Counting {
            inner: remote,
            requests: AtomicUsize::new(0),
            delay: Duration::from_millis(20),
        };
        let client = Arc::new(Client::new(store(local_dir.path()), source));

        let barrier = Arc::new(Barrier::new(6));
        let handles: Vec<_> = (0..6)
            .map(|_| {
                let client = client.clone();
                let barrier = barrier.clone();
                thread::spawn(move || {
                    barrier.wait();
                    client.fetch_once(&hash, 18).unwrap()
                })
            })
            .collect();
        for h in handles {
            assert!(h.join().unwrap());
        }

        // 18 bytes in chunks of 8: three requests for the one transfer.
        assert_eq!(client.source.requests.load(Ordering::SeqCst), 3);
        assert!(client.fetch_once(&hash, 18).unwrap());
        assert_eq!(client.source.requests.load(Ordering::SeqCst), 3);
    }

    #[test]
    #[should_panic(expected = "file corruption")]
    fn test_corrupt_transfer_is_fatal() {
        let local_dir = tempfile::tempdir().unwrap();
        let client = Client::new(store(local_dir.path()), Liar);
        let _ = client.fetch(&ContentHash::of(b"the real content"), 16);
    }
}
