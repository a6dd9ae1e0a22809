use std::cmp::Ordering;
use std::fmt;

use serde::{Deserialize, Serialize};

use super::FileAttr;

/// Ordered batch of attribute deltas exchanged between peers.
///
/// The canonical order puts all deletions first, deepest path first, then
/// all other entries, shallowest path first. Replaying a sorted set in order
/// always finds a creation's parent already present and a deleted
/// directory already emptied.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileSet {
    pub files: Vec<FileAttr>,
}

/// Canonical ordering of two deltas.
pub fn canonical_order(a: &FileAttr, b: &FileAttr) -> Ordering {
    match (a.is_deletion(), b.is_deletion()) {
        (true, false) => Ordering::Less,
        (false, true) => Ordering::Greater,
        (true, true) => b.path.cmp(&a.path),
        (false, false) => a.path.cmp(&b.path),
    }
}

impl FileSet {
    pub fn new(files: Vec<FileAttr>) -> Self {
        Self { files }
    }

    /// Build a set already in canonical order.
    pub fn sorted(files: Vec<FileAttr>) -> Self {
        let mut fs = Self { files };
        fs.sort();
        fs
    }

    pub fn sort(&mut self) {
        self.files.sort_by(canonical_order);
    }

    pub fn is_sorted(&self) -> bool {
        self.files
            .windows(2)
            .all(|w| canonical_order(&w[0], &w[1]) != Ordering::Greater)
    }

    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &FileAttr> {
        self.files.iter()
    }
}

impl From<Vec<FileAttr>> for FileSet {
    fn from(files: Vec<FileAttr>) -> Self {
        Self::new(files)
    }
}

impl IntoIterator for FileSet {
    type Item = FileAttr;
    type IntoIter = std::vec::IntoIter<FileAttr>;

    fn into_iter(self) -> Self::IntoIter {
        self.files.into_iter()
    }
}

impl fmt::Display for FileSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[")?;
        for (i, attr) in self.files.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{}", attr)?;
        }
        write!(f, "]")
    }
}
