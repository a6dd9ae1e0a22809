//! Disk-backed content-addressed store with an in-memory hot layer.

use std::collections::HashSet;
use std::fs;
use std::io::{self, Read, Seek, SeekFrom};
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use bytes::Bytes;
use common::hash::HASH_LEN;
use common::{ContentHash, SingleFlight};
use serde::Serialize;
use tracing::{debug, error, info, warn};

use crate::error::{Result, StoreError};
use crate::lru::LruCache;
use crate::protocol::{ChunkRequest, ChunkResponse};
use crate::writer::HashWriter;

/// Options for [`Store::open`].
#[derive(Debug, Clone)]
pub struct StoreConfig {
    /// Root of the two-level hex shard layout.
    pub dir: PathBuf,
    /// Payloads smaller than this many bytes are saved through memory and
    /// kept in the memory layer.
    pub memory_limit: u64,
    /// Number of blobs kept in memory. Zero disables the memory layer.
    pub memory_entries: usize,
    /// Bytes answered per chunk request.
    pub serve_chunk_size: usize,
}

impl StoreConfig {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            ..Default::default()
        }
    }
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            dir: PathBuf::from("blobs"),
            memory_limit: 128 * 1024,
            memory_entries: 1024,
            serve_chunk_size: 256 * 1024,
        }
    }
}

/// Point-in-time counters of a [`Store`].
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct StoreStats {
    /// Blobs on disk
    pub blobs: usize,
    /// Blobs resident in memory
    pub memory_entries: usize,
    pub memory_hit_rate: f64,
    pub mean_hit_age: f64,
    pub bytes_served: u64,
    pub bytes_received: u64,
}

/// What the store lock guards. Keys being faulted in are the busy set of
/// the surrounding [`SingleFlight`].
struct Resident {
    have: HashSet<ContentHash>,
    lru: Option<LruCache<ContentHash, Bytes>>,
    memory_tries: u64,
    memory_hits: u64,
}

/// Content-addressed blob storage.
///
/// Blobs live at `<dir>/<first two hex chars>/<remaining hex chars>` and are
/// immutable once written. A bounded set of small blobs is also kept in
/// memory.
pub struct Store {
    config: StoreConfig,
    flights: SingleFlight<ContentHash, Resident>,
    bytes_served: AtomicU64,
    bytes_received: AtomicU64,
}

impl Store {
    /// Open (creating if needed) the store at `config.dir` and index the
    /// blobs already there.
    pub fn open(config: StoreConfig) -> Result<Self> {
        fs::create_dir_all(&config.dir)?;
        fs::set_permissions(&config.dir, fs::Permissions::from_mode(0o700))?;
        let have = scan(&config.dir)?;
        info!(dir = %config.dir.display(), blobs = have.len(), "opened blob store");

        let lru = (config.memory_entries > 0).then(|| LruCache::new(config.memory_entries));
        Ok(Self {
            flights: SingleFlight::new(Resident {
                have,
                lru,
                memory_tries: 0,
                memory_hits: 0,
            }),
            config,
            bytes_served: AtomicU64::new(0),
            bytes_received: AtomicU64::new(0),
        })
    }

    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    pub fn dir(&self) -> &Path {
        &self.config.dir
    }

    /// On-disk location of `hash`, whether or not it is stored.
    pub fn path(&self, hash: &ContentHash) -> PathBuf {
        let (shard, name) = hash.shard();
        self.config.dir.join(shard).join(name)
    }

    pub fn has_hash(&self, hash: &ContentHash) -> bool {
        self.flights.lock().have.contains(hash)
    }

    /// Size of a stored blob.
    pub fn blob_size(&self, hash: &ContentHash) -> Option<u64> {
        if !self.has_hash(hash) {
            return None;
        }
        fs::metadata(self.path(hash)).ok().map(|m| m.len())
    }

    pub fn new_hash_writer(&self) -> Result<HashWriter<'_>> {
        HashWriter::new(self)
    }

    /// Record a committed blob, optionally keeping its bytes in memory.
    pub(crate) fn register(&self, hash: ContentHash, content: Option<Bytes>) {
        let mut resident = self.flights.lock();
        resident.have.insert(hash);
        if let (Some(content), Some(lru)) = (content, resident.lru.as_mut()) {
            lru.add(hash, content);
        }
    }

    /// Store `content` and return its digest. Saving the same bytes twice
    /// yields the same digest and one blob.
    pub fn save(&self, content: &[u8]) -> Result<ContentHash> {
        let mut writer = self.new_hash_writer()?;
        io::Write::write_all(&mut writer, content)?;
        let keep = ((content.len() as u64) < self.config.memory_limit)
            .then(|| Bytes::copy_from_slice(content));
        writer.finish_with(keep)
    }

    /// Store exactly `size` bytes read from `input`.
    pub fn save_stream(&self, input: impl Read, size: u64) -> Result<ContentHash> {
        let mut input = input.take(size);
        if size < self.config.memory_limit {
            let mut content = Vec::with_capacity(size as usize);
            input.read_to_end(&mut content)?;
            if content.len() as u64 != size {
                return Err(StoreError::ShortRead {
                    expected: size,
                    got: content.len() as u64,
                });
            }
            return self.save(&content);
        }

        let mut writer = self.new_hash_writer()?;
        let copied = io::copy(&mut input, &mut writer)?;
        if copied != size {
            return Err(StoreError::ShortRead {
                expected: size,
                got: copied,
            });
        }
        writer.finish()
    }

    /// Copy the file at `path` into the store.
    pub fn save_path(&self, path: &Path) -> Result<ContentHash> {
        let file = fs::File::open(path)?;
        let size = file.metadata()?.len();
        self.save_stream(file, size)
    }

    /// Move the file at `path` into the store instead of copying it.
    ///
    /// If the content is already stored, `path` is removed. The file must not
    /// change while it is hashed; if it does, the process aborts.
    pub fn destructive_save_path(&self, path: &Path) -> Result<ContentHash> {
        let mut file = fs::File::open(path)?;
        let before = file.metadata()?;

        let mut content = None;
        let hash = if before.len() < self.config.memory_limit {
            let mut buf = Vec::with_capacity(before.len() as usize);
            file.read_to_end(&mut buf)?;
            let hash = ContentHash::of(&buf);
            content = Some(Bytes::from(buf));
            hash
        } else {
            let mut hasher = blake3::Hasher::new();
            io::copy(&mut file, &mut hasher)?;
            ContentHash::from(hasher.finalize())
        };

        self.adopt(path, &file, &before, hash, content)
    }

    /// Link the hashed file at `path` to its content address and unlink
    /// `path`. An existing blob is never replaced.
    fn adopt(
        &self,
        path: &Path,
        file: &fs::File,
        before: &fs::Metadata,
        hash: ContentHash,
        content: Option<Bytes>,
    ) -> Result<ContentHash> {
        if self.has_hash(&hash) {
            fs::remove_file(path)?;
            debug!(path = %path.display(), hash = %hash, "content already stored, removed source");
            return Ok(hash);
        }

        let target = self.path(&hash);
        if let Some(shard) = target.parent() {
            fs::create_dir_all(shard)?;
        }
        match fs::hard_link(path, &target) {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists => {
                fs::remove_file(path)?;
                self.register(hash, content);
                debug!(path = %path.display(), hash = %hash, "blob appeared concurrently, removed source");
                return Ok(hash);
            }
            Err(e) => {
                error!(path = %path.display(), hash = %hash, error = %e, "link into store failed");
                panic!("link of {} into store failed: {}", path.display(), e);
            }
        }
        fs::remove_file(path)?;
        file.set_permissions(fs::Permissions::from_mode(0o444))?;

        let after = file.metadata()?;
        if after.len() != before.len() || after.modified()? != before.modified()? {
            error!(
                path = %path.display(),
                before = before.len(),
                after = after.len(),
                "file changed during save"
            );
            panic!("file {} changed during save", path.display());
        }

        self.register(hash, content);
        info!(path = %path.display(), hash = %hash, "saved destructively");
        Ok(hash)
    }

    /// Load a stored blob into the memory layer. Concurrent calls for the
    /// same hash read the disk once.
    pub fn fault_in(&self, hash: &ContentHash) {
        if self.config.memory_entries == 0 {
            return;
        }
        let path = self.path(hash);
        self.flights.run(
            *hash,
            |resident| {
                resident
                    .lru
                    .as_ref()
                    .filter(|lru| lru.has(hash))
                    .map(|_| ())
            },
            || match fs::read(&path) {
                Ok(content) => Bytes::from(content),
                Err(e) => {
                    error!(hash = %hash, error = %e, "reading blob from disk failed");
                    panic!("fault in {}: {}", hash, e);
                }
            },
            |resident, content| {
                if let Some(lru) = resident.lru.as_mut() {
                    lru.add(*hash, content);
                }
            },
        );
    }

    /// Contents of `hash` if they are in memory. Waits out an in-flight
    /// fault-in of the same hash.
    pub fn contents_if_loaded(&self, hash: &ContentHash) -> Option<Bytes> {
        let mut guard = self.flights.lock();
        guard.wait_while_busy(hash);
        let resident = &mut *guard;
        resident.memory_tries += 1;
        let found = resident.lru.as_mut()?.get(hash).cloned();
        if found.is_some() {
            resident.memory_hits += 1;
        }
        found
    }

    /// Bytes `[start, end)` of a stored blob, clipped to its length. An
    /// inverted range is empty.
    pub fn serve_chunk(&self, hash: &ContentHash, start: u64, end: u64) -> Result<Bytes> {
        let end = end.max(start);
        if let Some(content) = self.contents_if_loaded(hash) {
            let len = content.len() as u64;
            let (start, end) = (start.min(len), end.min(len));
            return Ok(content.slice(start as usize..end as usize));
        }

        let mut file = fs::File::open(self.path(hash))?;
        let len = file.metadata()?.len();
        if start >= len {
            return Ok(Bytes::new());
        }
        file.seek(SeekFrom::Start(start))?;
        let mut chunk = Vec::with_capacity((end.min(len) - start) as usize);
        file.take(end - start).read_to_end(&mut chunk)?;
        Ok(Bytes::from(chunk))
    }

    /// Answer one chunk request.
    pub fn serve(&self, req: &ChunkRequest) -> Result<ChunkResponse> {
        if !self.has_hash(&req.hash) {
            debug!(hash = %req.hash, "chunk requested for unknown blob");
            return Ok(ChunkResponse::missing());
        }
        let chunk_size = self.config.serve_chunk_size as u64;
        let chunk = self.serve_chunk(&req.hash, req.start, req.start.saturating_add(chunk_size))?;
        let size = chunk.len() as u64;
        self.bytes_served.fetch_add(size, Ordering::Relaxed);
        Ok(ChunkResponse {
            have: true,
            chunk,
            size,
            last: size < chunk_size,
        })
    }

    pub(crate) fn add_received(&self, n: u64) {
        self.bytes_received.fetch_add(n, Ordering::Relaxed);
    }

    /// Fraction of memory lookups that hit.
    pub fn memory_hit_rate(&self) -> f64 {
        let resident = self.flights.lock();
        if resident.memory_tries == 0 {
            return 0.0;
        }
        resident.memory_hits as f64 / resident.memory_tries as f64
    }

    pub fn stats(&self) -> StoreStats {
        let resident = self.flights.lock();
        let memory_hit_rate = if resident.memory_tries == 0 {
            0.0
        } else {
            resident.memory_hits as f64 / resident.memory_tries as f64
        };
        StoreStats {
            blobs: resident.have.len(),
            memory_entries: resident.lru.as_ref().map_or(0, |l| l.len()),
            memory_hit_rate,
            mean_hit_age: resident.lru.as_ref().map_or(0.0, |l| l.mean_hit_age()),
            bytes_served: self.bytes_served.load(Ordering::Relaxed),
            bytes_received: self.bytes_received.load(Ordering::Relaxed),
        }
    }
}

/// Collect every blob under the shard layout in `dir`.
fn scan(dir: &Path) -> Result<HashSet<ContentHash>> {
    let mut have = HashSet::new();
    for shard in fs::read_dir(dir)? {
        let shard = shard?;
        let prefix = shard.file_name().to_string_lossy().into_owned();
        if prefix.len() != 2 || !shard.file_type()?.is_dir() {
            continue;
        }
        for blob in fs::read_dir(shard.path())? {
            let name = blob?.file_name().to_string_lossy().into_owned();
            if name.len() != 2 * HASH_LEN - 2 {
                continue;
            }
            match format!("{}{}", prefix, name).parse::<ContentHash>() {
                Ok(hash) => {
                    have.insert(hash);
                }
                Err(_) => warn!(shard = %prefix, name = %name, "ignoring stray file in store"),
            }
        }
    }
    Ok(have)
}
