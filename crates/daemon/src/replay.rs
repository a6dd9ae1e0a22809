//! Applying file sets received from a peer.
//!
//! Content comes first: every hash a set names is fetched into the local
//! store before the cache learns about it, so no one is ever told about a
//! file whose bytes this node cannot serve.

use blobs_store::{ChunkSource, Client, FetchError, Store};
use common::attr::{AttributeCache, FileAttr, FileSet};
use tracing::{debug, error};

/// Entries of `files` naming content `store` does not have.
pub fn missing_content<'a>(files: &'a FileSet, store: &Store) -> Vec<&'a FileAttr> {
    files
        .iter()
        .filter(|attr| attr.hash().is_some_and(|hash| !store.has_hash(&hash)))
        .collect()
}

/// Fetch the content `files` names through `client`, then merge `files`
/// into `cache` and queue it for fan-out.
///
/// # Panics
///
/// If the peer that sent `files` does not have the content they name.
pub fn replay<S: ChunkSource>(
    files: &FileSet,
    client: &Client<S>,
    cache: &AttributeCache,
) -> Result<(), FetchError> {
    for attr in missing_content(files, client.store()) {
        let Some(hash) = attr.hash() else { continue };
        let size = attr.stat().map_or(0, |stat| stat.size);
        if !client.fetch_once(&hash, size)? {
            error!(path = %attr.path, hash = %hash, "peer does not have content it announced");
            panic!("replay: remote does not have {} for {}", hash, attr.path);
        }
    }
    apply(files, cache);
    Ok(())
}

/// Merge `files` into `cache` and queue them for fan-out.
pub fn apply(files: &FileSet, cache: &AttributeCache) {
    debug!(entries = files.len(), "replaying file set");
    cache.update(&files.files);
    cache.queue(files);
}
