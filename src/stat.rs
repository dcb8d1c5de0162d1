//! `stat`-like records and node/dirent type tags.

use crate::param::{FS_DEV, FS_GID, FS_UID, ST_BLKSIZE};

/// The type tag carried by a node and surfaced through `stat`/`readdir`.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum NodeKind {
    Regular,
    Directory,
    Symlink,
    Pipe,
    /// A slab slot that is not currently backing any node.
    Free,
}

/// Wall-clock timestamps, nanosecond resolution.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
pub struct Timestamps {
    pub created: std::time::Duration,
    pub accessed: std::time::Duration,
    pub modified: std::time::Duration,
    pub changed: std::time::Duration,
}

impl Timestamps {
    pub fn now() -> Self {
        let now = now_since_epoch();
        Self {
            created: now,
            accessed: now,
            modified: now,
            changed: now,
        }
    }
}

pub fn now_since_epoch() -> std::time::Duration {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
}

/// Populated by `stat`/`lstat`/`fstat`.
#[derive(Copy, Clone, Debug)]
pub struct Stat {
    pub dev: i32,
    pub ino: u32,
    pub kind: NodeKind,
    pub mode: crate::fcntl::Mode,
    pub nlink: u32,
    pub uid: u32,
    pub gid: u32,
    pub size: u64,
    pub blksize: i64,
    pub atime: std::time::Duration,
    pub mtime: std::time::Duration,
    pub ctime: std::time::Duration,
}

impl Stat {
    pub fn new(ino: u32, kind: NodeKind, mode: crate::fcntl::Mode, size: u64, ts: Timestamps) -> Self {
        Self {
            dev: FS_DEV,
            ino,
            kind,
            mode,
            nlink: 1,
            uid: FS_UID,
            gid: FS_GID,
            size,
            blksize: ST_BLKSIZE,
            atime: ts.accessed,
            mtime: ts.modified,
            ctime: ts.changed,
        }
    }
}
