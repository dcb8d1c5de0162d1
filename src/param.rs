//! Bit-exact limits shared by every module.

/// Capacity of the global node slab (`st_ino` values are indices into it).
pub const MAX_NODES: usize = 1024;

/// Per-cage descriptor table capacity.
pub const MAX_FDS: usize = 1024;

/// Standard streams occupy fds 0, 1, 2 in every cage's table.
pub const RESERVED_FDS: usize = 3;

/// Maximum number of path components between the root and a leaf.
pub const MAX_DEPTH: usize = 10;

/// Maximum bytes in one path component, not including the NUL terminator.
pub const NAME_MAX: usize = 63;

/// Fixed size of one file-content chunk.
pub const CHUNK_SIZE: usize = 1024;

/// Maximum number of live cages.
pub const MAX_CAGES: usize = 128;

/// Size of a pipe's shared backing buffer.
pub const PIPE_SIZE: usize = 4096;

/// Device number reported by stat: there is exactly one backing device.
pub const FS_DEV: i32 = 1;

/// uid/gid reported by stat: the library does not model multiple users.
pub const FS_UID: u32 = 501;
pub const FS_GID: u32 = 20;

/// Block size reported by stat (`st_blksize`).
pub const ST_BLKSIZE: i64 = 512;
