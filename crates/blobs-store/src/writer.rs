use std::fs;
use std::io::{self, ErrorKind, Write};
use std::os::unix::fs::PermissionsExt;

use bytes::Bytes;
use common::ContentHash;
use tracing::{debug, error};

use crate::error::Result;
use crate::store::Store;

/// Streams content into a temp file in the store directory while hashing
/// it. [`finish`](Self::finish) moves the file to its content address.
///
/// Dropping an unfinished writer removes the temp file.
pub struct HashWriter<'a> {
    store: &'a Store,
    dest: tempfile::NamedTempFile,
    hasher: blake3::Hasher,
    size: u64,
}

impl<'a> HashWriter<'a> {
    pub(crate) fn new(store: &'a Store) -> Result<Self> {
        let dest = tempfile::Builder::new()
            .prefix(".hashtemp")
            .tempfile_in(store.dir())?;
        Ok(Self {
            store,
            dest,
            hasher: blake3::Hasher::new(),
            size: 0,
        })
    }

    /// Bytes written so far.
    pub fn size(&self) -> u64 {
        self.size
    }

    /// Commit the content and return its digest.
    pub fn finish(self) -> Result<ContentHash> {
        self.finish_with(None)
    }

    /// Commit, also placing `content` in the memory layer.
    pub(crate) fn finish_with(mut self, content: Option<Bytes>) -> Result<ContentHash> {
        self.dest.flush()?;
        let hash = ContentHash::from(self.hasher.finalize());
        self.dest
            .as_file()
            .set_permissions(fs::Permissions::from_mode(0o444))?;

        let target = self.store.path(&hash);
        if let Some(shard) = target.parent() {
            fs::create_dir_all(shard)?;
        }

        match self.dest.persist_noclobber(&target) {
            Ok(_) => debug!(hash = %hash, size = self.size, "saved blob"),
            Err(e) if e.error.kind() == ErrorKind::AlreadyExists => {
                // Same name, same bytes. The temp file goes away with `e`.
                debug!(hash = %hash, "blob already stored, discarding copy");
            }
            Err(e) => {
                error!(hash = %hash, error = %e.error, "moving blob into place failed");
                panic!("rename into store failed for {}: {}", hash, e.error);
            }
        }

        self.store.register(hash, content);
        Ok(hash)
    }
}

impl Write for HashWriter<'_> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let n = self.dest.write(buf)?;
        self.hasher.update(&buf[..n]);
        self.size += n as u64;
        Ok(n)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.dest.flush()
    }
}
