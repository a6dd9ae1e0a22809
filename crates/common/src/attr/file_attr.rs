use std::collections::BTreeMap;
use std::fmt;
use std::fs;
use std::io;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::hash::ContentHash;
use crate::stat::{StatBlock, PERM_MASK};

/// Child name → child file-type bits. Only directories carry one.
pub type NameModeMap = BTreeMap<String, u32>;

/// Metadata of a path that exists.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Metadata {
    pub stat: StatBlock,
    /// Digest of the contents, for regular files whose bytes are known.
    pub hash: Option<ContentHash>,
    /// Target of a symlink.
    pub link: Option<String>,
    /// Directory listing. `None` for non-directories, and for directory
    /// deltas that only carry a metadata change.
    pub children: Option<NameModeMap>,
}

/// Whether a path exists.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Entry {
    Present(Metadata),
    Deleted,
}

/// Metadata snapshot of one path in the tree, or a tombstone for it.
///
/// Paths are slash-separated and relative; the root is the empty string.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileAttr {
    pub path: String,
    pub entry: Entry,
}

/// Split a relative path into its parent directory and basename.
///
/// `"a/b/c"` → `("a/b", "c")`, `"a"` → `("", "a")`, `""` → `("", "")`.
pub fn split_path(path: &str) -> (&str, &str) {
    match path.rfind('/') {
        Some(i) => (&path[..i], &path[i + 1..]),
        None => ("", path),
    }
}

/// Join a parent path and a child name.
pub fn join_path(dir: &str, name: &str) -> String {
    if dir.is_empty() {
        name.to_string()
    } else {
        format!("{}/{}", dir, name)
    }
}

/// Child names are never empty and never contain `/` or NUL.
pub fn is_valid_child_name(name: &str) -> bool {
    !name.is_empty() && !name.contains('/') && !name.contains('\0')
}

impl Metadata {
    pub fn new(stat: StatBlock) -> Self {
        Self {
            stat,
            hash: None,
            link: None,
            children: None,
        }
    }

    /// Directory metadata with a complete listing.
    pub fn dir(stat: StatBlock, children: NameModeMap) -> Self {
        Self {
            children: Some(children),
            ..Self::new(stat)
        }
    }

    pub fn is_dir(&self) -> bool {
        self.stat.is_dir()
    }

    /// Type bits of this entry as recorded in its parent's listing.
    pub fn type_bits(&self) -> u32 {
        self.stat.mode & !PERM_MASK
    }

    /// Copy, keeping the directory listing only when `with_dir` is set.
    pub fn copy(&self, with_dir: bool) -> Self {
        Self {
            stat: self.stat,
            hash: self.hash,
            link: self.link.clone(),
            children: if with_dir { self.children.clone() } else { None },
        }
    }

    /// Fold a newer snapshot of the same path into this one.
    ///
    /// Scalar fields are replaced wholesale. A directory listing is merged
    /// additively: names carried by `incoming` are overlaid on the ones
    /// already known, and a delta without a listing keeps the current one.
    /// Removed children arrive as separate deletion deltas.
    pub fn merge(&mut self, incoming: Metadata) {
        let known = self.children.take();
        *self = incoming;
        if !self.is_dir() {
            self.children = None;
            return;
        }
        self.children = match (known, self.children.take()) {
            (Some(mut known), Some(overlay)) => {
                known.extend(overlay);
                Some(known)
            }
            (known, None) => known,
            (None, overlay) => overlay,
        };
    }
}

impl FileAttr {
    pub fn new(path: impl Into<String>, metadata: Metadata) -> Self {
        Self {
            path: path.into(),
            entry: Entry::Present(metadata),
        }
    }

    /// Tombstone for `path`.
    pub fn deletion(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            entry: Entry::Deleted,
        }
    }

    pub fn is_deletion(&self) -> bool {
        matches!(self.entry, Entry::Deleted)
    }

    pub fn metadata(&self) -> Option<&Metadata> {
        match &self.entry {
            Entry::Present(m) => Some(m),
            Entry::Deleted => None,
        }
    }

    pub fn metadata_mut(&mut self) -> Option<&mut Metadata> {
        match &mut self.entry {
            Entry::Present(m) => Some(m),
            Entry::Deleted => None,
        }
    }

    pub fn stat(&self) -> Option<&StatBlock> {
        self.metadata().map(|m| &m.stat)
    }

    pub fn hash(&self) -> Option<ContentHash> {
        self.metadata().and_then(|m| m.hash)
    }

    pub fn children(&self) -> Option<&NameModeMap> {
        self.metadata().and_then(|m| m.children.as_ref())
    }

    pub fn is_dir(&self) -> bool {
        self.stat().is_some_and(StatBlock::is_dir)
    }

    pub fn is_regular(&self) -> bool {
        self.stat().is_some_and(StatBlock::is_regular)
    }

    pub fn is_symlink(&self) -> bool {
        self.stat().is_some_and(StatBlock::is_symlink)
    }

    /// Mode bits recorded for `name` in this directory's listing, 0 if absent.
    pub fn child_mode(&self, name: &str) -> u32 {
        self.children()
            .and_then(|c| c.get(name).copied())
            .unwrap_or(0)
    }

    /// Copy, keeping the directory listing only when `with_dir` is set.
    pub fn copy(&self, with_dir: bool) -> Self {
        Self {
            path: self.path.clone(),
            entry: match &self.entry {
                Entry::Present(m) => Entry::Present(m.copy(with_dir)),
                Entry::Deleted => Entry::Deleted,
            },
        }
    }

    /// Snapshot `root/path` from the local filesystem.
    ///
    /// Regular files are hashed, symlinks read and directories listed. Any
    /// failure, including the path not existing, yields a deletion.
    pub fn read_from_fs(root: &Path, path: &str) -> FileAttr {
        let full = if path.is_empty() {
            root.to_path_buf()
        } else {
            root.join(path)
        };
        let stat = match StatBlock::lstat(&full) {
            Ok(stat) => stat,
            Err(_) => return FileAttr::deletion(path),
        };
        match read_contents(&full, stat) {
            Ok(metadata) => FileAttr::new(path, metadata),
            Err(e) => {
                tracing::warn!(path = %path, error = %e, "reading attributes failed");
                FileAttr::deletion(path)
            }
        }
    }
}

fn read_contents(full: &Path, stat: StatBlock) -> io::Result<Metadata> {
    let mut metadata = Metadata::new(stat);
    if stat.is_regular() {
        let mut file = fs::File::open(full)?;
        let mut hasher = blake3::Hasher::new();
        io::copy(&mut file, &mut hasher)?;
        metadata.hash = Some(hasher.finalize().into());
    } else if stat.is_dir() {
        let mut children = NameModeMap::new();
        for entry in fs::read_dir(full)? {
            let entry = entry?;
            let name = entry.file_name().to_string_lossy().into_owned();
            // Entries can vanish between readdir and lstat.
            if let Ok(child) = fs::symlink_metadata(entry.path()) {
                let child = StatBlock::from(&child);
                children.insert(name, child.mode & !PERM_MASK);
            }
        }
        metadata.children = Some(children);
    } else if stat.is_symlink() {
        let target = fs::read_link(full)?;
        metadata.link = Some(target.to_string_lossy().into_owned());
    }
    Ok(metadata)
}

impl fmt::Display for FileAttr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self.path)?;
        let m = match &self.entry {
            Entry::Present(m) => m,
            Entry::Deleted => return write!(f, " (del)"),
        };
        if let Some(h) = &m.hash {
            write!(f, " sz {} hash {}..", m.stat.size, h.short())?;
        }
        if let Some(link) = &m.link {
            write!(f, " -> {}", link)?;
        }
        write!(f, " {:o}:{:o}", m.type_bits(), m.stat.mode & PERM_MASK)?;
        if m.children.is_some() {
            write!(f, "+names")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stat::{S_IFDIR, S_IFLNK, S_IFREG};

    fn dir_meta(names: &[(&str, u32)]) -> Metadata {
        Metadata::dir(
            StatBlock::with_mode(S_IFDIR | 0o755),
            names.iter().map(|(n, m)| (n.to_string(), *m)).collect(),
        )
    }

    #[test]
    fn test_split_path() {
        assert_eq!(split_path("a/b/c"), ("a/b", "c"));
        assert_eq!(split_path("a"), ("", "a"));
        assert_eq!(split_path(""), ("", ""));
        assert_eq!(join_path("", "a"), "a");
        assert_eq!(join_path("a/b", "c"), "a/b/c");
    }

    #[test]
    fn test_child_names() {
        assert!(is_valid_child_name("file.txt"));
        assert!(!is_valid_child_name(""));
        assert!(!is_valid_child_name("a/b"));
        assert!(!is_valid_child_name("a\0b"));
    }

    #[test]
    fn test_copy_strips_listing() {
        let attr = FileAttr::new("d", dir_meta(&[("a", S_IFREG)]));
        assert!(attr.copy(false).children().is_none());
        assert_eq!(attr.copy(true), attr);
        assert_eq!(attr.child_mode("a"), S_IFREG);
        assert_eq!(attr.child_mode("b"), 0);
    }

    #[test]
    fn test_merge_is_additive_for_directories() {
        let mut existing = dir_meta(&[("a", S_IFREG), ("b", S_IFDIR)]);
        let mut incoming = dir_meta(&[("c", S_IFLNK)]);
        incoming.stat.mtime = 10;

        existing.merge(incoming);

        let names: Vec<_> = existing.children.as_ref().unwrap().keys().cloned().collect();
        assert_eq!(names, vec!["a", "b", "c"]);
        assert_eq!(existing.stat.mtime, 10);
    }

    #[test]
    fn test_merge_metadata_only_keeps_listing() {
        let mut existing = dir_meta(&[("a", S_IFREG)]);
        let mut incoming = Metadata::new(StatBlock::with_mode(S_IFDIR | 0o700));
        incoming.stat.ctime = 100;

        existing.merge(incoming);

        assert_eq!(existing.stat.mode, S_IFDIR | 0o700);
        assert_eq!(existing.children.unwrap().len(), 1);
    }

    #[test]
    fn test_merge_into_file_drops_listing() {
        let mut existing = dir_meta(&[("a", S_IFREG)]);
        existing.merge(Metadata::new(StatBlock::with_mode(S_IFREG | 0o644)));
        assert!(existing.children.is_none());
    }

    #[test]
    fn test_read_from_fs() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("file.txt"), b"hello").unwrap();
        std::fs::create_dir(dir.path().join("sub")).unwrap();
        std::os::unix::fs::symlink("file.txt", dir.path().join("link")).unwrap();

        let root = FileAttr::read_from_fs(dir.path(), "");
        assert!(root.is_dir());
        assert_eq!(root.child_mode("file.txt"), S_IFREG);
        assert_eq!(root.child_mode("sub"), S_IFDIR);
        assert_eq!(root.child_mode("link"), S_IFLNK);

        let file = FileAttr::read_from_fs(dir.path(), "file.txt");
        assert_eq!(file.hash(), Some(ContentHash::of(b"hello")));

        let link = FileAttr::read_from_fs(dir.path(), "link");
        assert_eq!(link.metadata().unwrap().link.as_deref(), Some("file.txt"));

        assert!(FileAttr::read_from_fs(dir.path(), "missing").is_deletion());
    }

    #[test]
    fn test_display() {
        assert_eq!(FileAttr::deletion("x").to_string(), "\"x\" (del)");
        let attr = FileAttr::new("d", dir_meta(&[]));
        assert_eq!(attr.to_string(), "\"d\" 40000:755+names");
    }
}
