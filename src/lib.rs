//! An in-memory POSIX-like filesystem shared by a population of isolated
//! cages: one process-global node slab, per-cage descriptor tables, chunked
//! regular files, symlink-aware path resolution, and anonymous pipes with a
//! busy-wait read.
//!
//! Everything lives in RAM for the life of the process: a node allocator
//! with a free-hole list, a resolver that walks path components one at a
//! time, and per-cage descriptor tables with alias-by-slot `dup` semantics.

#![deny(rust_2018_idioms)]
#![deny(unused_must_use)]
#![warn(missing_debug_implementations)]

mod chunk;
mod error;
mod fcntl;
mod fd;
mod fs;
mod loader;
mod node;
mod param;
mod path;
mod pipe;
mod resolve;
mod stat;
mod state;
mod syscall;

pub use error::{ImfsError, Result};
pub use fcntl::{Mode, OFlag, Whence, AT_FDCWD, F_GETFL};
pub use fs::DirEntry;
pub use loader::{copy_fd_tables, dump_file, load_file, preloads};
pub use stat::{NodeKind, Stat};
pub use syscall::{
    imfs_chmod, imfs_chown, imfs_close, imfs_closedir, imfs_copy_fd_tables, imfs_creat, imfs_dup, imfs_dup2, imfs_fchmod,
    imfs_fcntl, imfs_fstat, imfs_init, imfs_link, imfs_linkat, imfs_lseek, imfs_lstat, imfs_mkdir, imfs_mkdirat, imfs_open,
    imfs_openat, imfs_opendir, imfs_pipe, imfs_pipe2, imfs_pread, imfs_preadv, imfs_pwrite, imfs_pwritev, imfs_read,
    imfs_readdir, imfs_readv, imfs_remove, imfs_rename, imfs_rmdir, imfs_stat, imfs_symlink, imfs_symlinkat, imfs_unlink,
    imfs_write, imfs_writev, last_error, DirStream,
};
