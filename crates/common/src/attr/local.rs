//! Attribute source backed by a directory on the local disk.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use super::{FileAttr, Getter, Statter};
use crate::hash::ContentHash;
use crate::stat::StatBlock;

/// Stores a regular file's content somewhere and returns its digest.
pub type ContentSink = Arc<dyn Fn(&Path) -> Option<ContentHash> + Send + Sync>;

/// Getter and statter over `root`.
#[derive(Clone)]
pub struct LocalTree {
    root: PathBuf,
    sink: Option<ContentSink>,
}

impl LocalTree {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            sink: None,
        }
    }

    /// Hand every regular file the getter reads to `sink`, and record the
    /// digest it returns.
    pub fn with_content_sink(mut self, sink: ContentSink) -> Self {
        self.sink = Some(sink);
        self
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn full_path(&self, path: &str) -> PathBuf {
        if path.is_empty() {
            self.root.clone()
        } else {
            self.root.join(path)
        }
    }

    /// Current attributes of `path`; a deletion if it cannot be read.
    pub fn get(&self, path: &str) -> FileAttr {
        let mut attr = FileAttr::read_from_fs(&self.root, path);
        if let Some(sink) = &self.sink {
            if attr.is_regular() {
                let full = self.full_path(path);
                match sink(&full) {
                    Some(hash) => {
                        if let Some(m) = attr.metadata_mut() {
                            m.hash = Some(hash);
                        }
                    }
                    None => {
                        tracing::warn!(path = %path, "saving content failed");
                        return FileAttr::deletion(path);
                    }
                }
            }
        }
        attr
    }

    pub fn stat(&self, path: &str) -> Option<StatBlock> {
        StatBlock::lstat(&self.full_path(path)).ok()
    }

    pub fn getter(&self) -> Getter {
        let tree = self.clone();
        Box::new(move |path| tree.get(path))
    }

    pub fn statter(&self) -> Statter {
        let tree = self.clone();
        Box::new(move |path| tree.stat(path))
    }
}
