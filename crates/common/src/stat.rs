//! POSIX-style stat blocks.

use std::fs::Metadata;
use std::os::unix::fs::MetadataExt;

use serde::{Deserialize, Serialize};

pub const S_IFMT: u32 = 0o170000;
pub const S_IFSOCK: u32 = 0o140000;
pub const S_IFLNK: u32 = 0o120000;
pub const S_IFREG: u32 = 0o100000;
pub const S_IFBLK: u32 = 0o060000;
pub const S_IFDIR: u32 = 0o040000;
pub const S_IFCHR: u32 = 0o020000;
pub const S_IFIFO: u32 = 0o010000;

/// Permission bits (including setuid/setgid/sticky).
pub const PERM_MASK: u32 = 0o7777;

/// Metadata snapshot of a single filesystem object.
///
/// Access times are deliberately absent: they change on every read and
/// would make every refresh report the whole tree as modified.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatBlock {
    pub mode: u32,
    pub size: u64,
    pub blocks: u64,
    pub blksize: u32,
    pub uid: u32,
    pub gid: u32,
    pub nlink: u32,
    pub mtime: i64,
    pub mtime_nsec: u32,
    pub ctime: i64,
    pub ctime_nsec: u32,
}

impl StatBlock {
    /// Stat block with only the mode set. Handy for deltas and tests.
    pub fn with_mode(mode: u32) -> Self {
        Self {
            mode,
            ..Default::default()
        }
    }

    /// `lstat(2)` a path.
    pub fn lstat(path: &std::path::Path) -> std::io::Result<Self> {
        std::fs::symlink_metadata(path).map(|m| Self::from(&m))
    }

    /// File-type bits only (`mode & S_IFMT`).
    pub fn file_type(&self) -> u32 {
        self.mode & S_IFMT
    }

    pub fn is_dir(&self) -> bool {
        self.file_type() == S_IFDIR
    }

    pub fn is_regular(&self) -> bool {
        self.file_type() == S_IFREG
    }

    pub fn is_symlink(&self) -> bool {
        self.file_type() == S_IFLNK
    }

    /// Equality over the fields a rebuild cares about.
    pub fn fast_eq(&self, other: &StatBlock) -> bool {
        self.eq_ignoring_ctime(other)
            && self.ctime == other.ctime
            && self.ctime_nsec == other.ctime_nsec
    }

    /// Like [`fast_eq`](Self::fast_eq), but ignores ctime, which changes
    /// whenever attributes are written back.
    pub fn eq_ignoring_ctime(&self, other: &StatBlock) -> bool {
        self.mode == other.mode
            && self.size == other.size
            && self.blocks == other.blocks
            && self.mtime == other.mtime
            && self.mtime_nsec == other.mtime_nsec
            && self.uid == other.uid
            && self.gid == other.gid
            && self.blksize == other.blksize
    }
}

impl From<&Metadata> for StatBlock {
    fn from(m: &Metadata) -> Self {
        Self {
            mode: m.mode(),
            size: m.size(),
            blocks: m.blocks(),
            blksize: m.blksize() as u32,
            uid: m.uid(),
            gid: m.gid(),
            nlink: m.nlink() as u32,
            mtime: m.mtime(),
            mtime_nsec: m.mtime_nsec() as u32,
            ctime: m.ctime(),
            ctime_nsec: m.ctime_nsec() as u32,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_file_types() {
        assert!(StatBlock::with_mode(S_IFDIR | 0o755).is_dir());
        assert!(StatBlock::with_mode(S_IFREG | 0o644).is_regular());
        assert!(StatBlock::with_mode(S_IFLNK | 0o777).is_symlink());
        assert!(!StatBlock::with_mode(S_IFREG | 0o644).is_dir());
        assert_eq!(StatBlock::with_mode(S_IFDIR | 0o755).file_type(), S_IFDIR);
    }

    #[test]
    fn test_ctime_sensitivity() {
        let a = StatBlock::with_mode(S_IFREG | 0o644);
        let mut b = a;
        b.ctime = 100;
        assert!(!a.fast_eq(&b));
        assert!(a.eq_ignoring_ctime(&b));

        b.size = 1;
        assert!(!a.eq_ignoring_ctime(&b));
    }

    #[test]
    fn test_lstat_directory() {
        let dir = tempfile::tempdir().unwrap();
        let st = StatBlock::lstat(dir.path()).unwrap();
        assert!(st.is_dir());

        let file = dir.path().join("f");
        std::fs::write(&file, b"abc").unwrap();
        let st = StatBlock::lstat(&file).unwrap();
        assert!(st.is_regular());
        assert_eq!(st.size, 3);
    }
}
