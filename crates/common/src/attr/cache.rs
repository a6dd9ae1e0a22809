//! In-memory mirror of the project tree's metadata.
//!
//! Entries are fetched lazily through an injected getter, one fetch per path
//! no matter how many threads ask, and always parent before child. Deltas
//! from peers are spliced in with [`AttributeCache::update`] and handed on to
//! connected clients through the embedded [`FanoutRegistry`].

use std::collections::HashMap;
use std::sync::Arc;

use super::{
    is_valid_child_name, split_path, Entry, FanoutClient, FanoutRegistry, FileAttr, FileSet,
    Metadata,
};
use crate::error::FanoutError;
use crate::single_flight::{FlightGuard, SingleFlight};
use crate::stat::StatBlock;

/// Produces the current attributes of a path. Must return a deletion on any
/// failure.
pub type Getter = Box<dyn Fn(&str) -> FileAttr + Send + Sync>;

/// Stats a path for [`AttributeCache::refresh`]. `None` means it vanished.
pub type Statter = Box<dyn Fn(&str) -> Option<StatBlock> + Send + Sync>;

#[derive(Debug, Clone)]
pub struct AttrCacheConfig {
    /// Re-check every invariant after each mutation.
    pub paranoia: bool,
    /// Worker threads used by `refresh`.
    pub refresh_parallelism: usize,
}

impl Default for AttrCacheConfig {
    fn default() -> Self {
        Self {
            paranoia: false,
            refresh_parallelism: 10,
        }
    }
}

/// Resident entries, keyed by path. Deletions are never stored.
#[derive(Default)]
struct Tree {
    attributes: HashMap<String, Metadata>,
}

pub struct AttributeCache {
    flights: SingleFlight<String, Tree>,
    getter: Getter,
    statter: Statter,
    fanout: FanoutRegistry,
    config: AttrCacheConfig,
}

impl AttributeCache {
    pub fn new(getter: Getter, statter: Statter) -> Self {
        Self::with_config(getter, statter, AttrCacheConfig::default())
    }

    pub fn with_config(getter: Getter, statter: Statter, config: AttrCacheConfig) -> Self {
        Self {
            flights: SingleFlight::new(Tree::default()),
            getter,
            statter,
            fanout: FanoutRegistry::new(),
            config,
        }
    }

    /// Attributes of `path`, fetching them if they are not resident.
    ///
    /// The listing of a directory is only included when `with_dir` is set.
    pub fn get(&self, path: &str, with_dir: bool) -> FileAttr {
        check_path(path);
        if let Some(found) = lookup(&self.flights.lock(), path, with_dir) {
            return found;
        }
        if !path.is_empty() {
            let (dir, base) = split_path(path);
            let parent = self.get(dir, true);
            if parent.child_mode(base) == 0 {
                return FileAttr::deletion(path);
            }
        }
        let found = self.fetch(path, with_dir);
        if self.config.paranoia {
            self.verify();
        }
        found
    }

    pub fn get_dir(&self, path: &str) -> FileAttr {
        self.get(path, true)
    }

    /// Whether `path` is resident. Never fetches.
    pub fn have(&self, path: &str) -> bool {
        self.flights.lock().attributes.contains_key(path)
    }

    fn fetch(&self, path: &str, with_dir: bool) -> FileAttr {
        self.flights.run(
            path.to_string(),
            |tree| lookup(tree, path, with_dir),
            || {
                tracing::debug!(path = %path, "fetching attributes");
                let attr = (self.getter)(path);
                if attr.path != path {
                    tracing::error!(path = %path, got = %attr.path, "getter answered for the wrong path");
                    panic!("getter returned {:?} when asked for {:?}", attr.path, path);
                }
                attr
            },
            |tree, attr| self.commit_fetched(tree, attr).copy(with_dir),
        )
    }

    /// Store a freshly fetched entry if its parent still vouches for it.
    fn commit_fetched(&self, tree: &mut Tree, attr: FileAttr) -> FileAttr {
        let path = attr.path.clone();
        if let Some(existing) = tree.attributes.get(&path) {
            // An update landed while the getter ran; it is newer.
            return FileAttr::new(path, existing.clone());
        }
        let (dir, base) = split_path(&path);
        let metadata = match attr.entry {
            Entry::Present(metadata) => metadata,
            Entry::Deleted => {
                if !path.is_empty() {
                    if let Some(children) = tree
                        .attributes
                        .get_mut(dir)
                        .and_then(|p| p.children.as_mut())
                    {
                        children.remove(base);
                    }
                }
                return FileAttr::deletion(path);
            }
        };
        check_listing(&path, &metadata);

        let vouched = path.is_empty()
            || tree
                .attributes
                .get(dir)
                .and_then(|p| p.children.as_ref())
                .is_some_and(|c| c.get(base).copied().unwrap_or(0) != 0);
        if !vouched {
            tracing::debug!(path = %path, "parent changed during fetch, not storing");
            return FileAttr::new(path, metadata);
        }
        tree.attributes.insert(path.clone(), metadata.clone());
        let attr = FileAttr::new(path, metadata);
        self.fanout.append(std::slice::from_ref(&attr));
        attr
    }

    /// Apply `files` in order, under one critical section.
    ///
    /// Callers pass deltas in canonical [`FileSet`] order. A delta whose
    /// parent is not resident describes a subtree this cache never saw and is
    /// dropped.
    pub fn update(&self, files: &[FileAttr]) {
        let mut guard = self.flights.lock();
        for file in files {
            apply(&mut guard, file);
        }
        guard.notify_on_drop();
        if self.config.paranoia {
            verify_locked(&guard);
        }
    }

    /// Re-stat every resident path under `prefix` and apply what changed.
    ///
    /// Paths whose stat no longer matches are fetched again through the
    /// getter; vanished paths become deletions. The returned set is in
    /// canonical order and has already been applied.
    pub fn refresh(&self, prefix: &str) -> FileSet {
        check_path(prefix);
        let snapshot: Vec<(String, StatBlock)> = {
            let tree = self.flights.lock();
            tree.attributes
                .iter()
                .filter(|(path, _)| path.starts_with(prefix))
                .map(|(path, m)| (path.clone(), m.stat))
                .collect()
        };
        tracing::debug!(prefix = %prefix, entries = snapshot.len(), "refreshing");

        let changed = FileSet::sorted(self.restat(snapshot));
        if !changed.is_empty() {
            tracing::info!(prefix = %prefix, changed = changed.len(), "refresh found changes");
            self.update(&changed.files);
        }
        changed
    }

    fn restat(&self, snapshot: Vec<(String, StatBlock)>) -> Vec<FileAttr> {
        let (work_tx, work_rx) = flume::unbounded();
        for item in snapshot {
            let _ = work_tx.send(item);
        }
        drop(work_tx);

        let (out_tx, out_rx) = flume::unbounded();
        std::thread::scope(|s| {
            for _ in 0..self.config.refresh_parallelism.max(1) {
                let work_rx = work_rx.clone();
                let out_tx = out_tx.clone();
                s.spawn(move || {
                    for (path, old) in work_rx.iter() {
                        let fresh = match (self.statter)(&path) {
                            None => Some(FileAttr::deletion(path)),
                            Some(stat) if !stat.fast_eq(&old) => Some((self.getter)(&path)),
                            Some(_) => None,
                        };
                        if let Some(fresh) = fresh {
                            let _ = out_tx.send(fresh);
                        }
                    }
                });
            }
        });
        drop(out_tx);
        out_rx.try_iter().collect()
    }

    /// Consistent snapshot of every resident entry, in canonical order.
    pub fn copy(&self) -> FileSet {
        snapshot(&self.flights.lock())
    }

    /// Register a client and seed its queue with the current snapshot.
    pub fn add_client(&self, client: Arc<dyn FanoutClient>) -> Result<(), FanoutError> {
        // Hold the tree so no fetched entry lands between snapshot and
        // registration.
        let tree = self.flights.lock();
        self.fanout.add(client, snapshot(&tree).files)
    }

    pub fn rm_client(&self, id: &str) -> bool {
        self.fanout.remove(id)
    }

    /// Queue `files` for every connected client.
    pub fn queue(&self, files: &FileSet) {
        self.fanout.queue(&files.files);
    }

    /// Deliver everything queued for client `id`.
    pub fn send(&self, id: &str) -> Result<(), FanoutError> {
        self.fanout.send(id)
    }

    pub fn fanout(&self) -> &FanoutRegistry {
        &self.fanout
    }

    /// Check every structural invariant, panicking on the first violation.
    pub fn verify(&self) {
        verify_locked(&self.flights.lock());
    }
}

fn check_path(path: &str) {
    if path.starts_with('/') {
        tracing::error!(path = %path, "path has a leading slash");
        panic!("path {:?} has a leading slash", path);
    }
}

fn check_listing(path: &str, m: &Metadata) {
    if !m.is_dir() {
        return;
    }
    let Some(children) = &m.children else {
        tracing::error!(path = %path, "directory without listing");
        panic!("directory {:?} has no listing", path);
    };
    if let Some(bad) = children.keys().find(|n| !is_valid_child_name(n)) {
        tracing::error!(path = %path, name = ?bad, "illegal child name");
        panic!("directory {:?} lists illegal child {:?}", path, bad);
    }
}

/// Resident copy of `path`, or a deletion derived from its parent's listing.
fn lookup(tree: &Tree, path: &str, with_dir: bool) -> Option<FileAttr> {
    if let Some(m) = tree.attributes.get(path) {
        return Some(FileAttr::new(path, m.copy(with_dir)));
    }
    if path.is_empty() {
        return None;
    }
    let (dir, base) = split_path(path);
    let parent = tree.attributes.get(dir)?;
    let known = parent
        .children
        .as_ref()
        .and_then(|c| c.get(base).copied())
        .unwrap_or(0);
    (known == 0).then(|| FileAttr::deletion(path))
}

fn snapshot(tree: &Tree) -> FileSet {
    FileSet::sorted(
        tree.attributes
            .iter()
            .map(|(path, m)| FileAttr::new(path.clone(), m.clone()))
            .collect(),
    )
}

fn apply(guard: &mut FlightGuard<'_, String, Tree>, file: &FileAttr) {
    let path = file.path.as_str();
    check_path(path);

    if path.is_empty() {
        match &file.entry {
            Entry::Present(m) => store(guard, path, m),
            Entry::Deleted => {
                tracing::warn!("root deleted, dropping every entry");
                guard.attributes.clear();
            }
        }
        guard.release(&file.path);
        return;
    }

    let (dir, base) = split_path(path);
    if !is_valid_child_name(base) {
        tracing::error!(path = %path, "illegal child name in update");
        panic!("update for {:?} has an illegal basename", path);
    }
    // A delta that overtakes the fetch of its parent is lost here, and the
    // fetch may return the pre-delta state.
    let Some(parent) = guard.attributes.get_mut(dir) else {
        tracing::debug!(path = %path, "parent not resident, discarding delta");
        return;
    };
    let Some(children) = parent.children.as_mut() else {
        tracing::error!(path = %dir, "resident parent has no listing");
        panic!("parent {:?} of {:?} has no listing", dir, path);
    };

    match &file.entry {
        Entry::Deleted => {
            children.remove(base);
            guard.attributes.remove(path);
        }
        Entry::Present(m) => {
            children.insert(base.to_string(), m.type_bits());
            store(guard, path, m);
        }
    }
    guard.release(&file.path);
}

fn store(guard: &mut FlightGuard<'_, String, Tree>, path: &str, m: &Metadata) {
    match guard.attributes.get_mut(path) {
        Some(existing) => existing.merge(m.clone()),
        None if m.is_dir() && m.children.is_none() => {
            tracing::debug!(path = %path, "metadata-only directory delta with nothing resident");
        }
        None => {
            check_listing(path, m);
            guard.attributes.insert(path.to_string(), m.clone());
        }
    }
}

fn fail(path: &str, what: &str) -> ! {
    tracing::error!(path = %path, problem = %what, "attribute cache invariant violated");
    panic!("attribute cache invariant violated at {:?}: {}", path, what);
}

fn verify_locked(guard: &FlightGuard<'_, String, Tree>) {
    for (path, m) in guard.attributes.iter() {
        if m.is_dir() && m.children.is_none() {
            fail(path, "directory without listing");
        }
        if let Some(children) = &m.children {
            if children.keys().any(|n| !is_valid_child_name(n)) {
                fail(path, "illegal child name");
            }
        }
        if guard.is_busy(path) {
            fail(path, "both busy and resident");
        }
        if path.is_empty() {
            continue;
        }
        let (dir, base) = split_path(path);
        match guard.attributes.get(dir) {
            None => fail(path, "parent not resident"),
            Some(parent) => {
                let mode = parent
                    .children
                    .as_ref()
                    .and_then(|c| c.get(base).copied())
                    .unwrap_or(0);
                if mode == 0 {
                    fail(path, "missing from parent listing");
                }
            }
        }
    }
}
