//! Public entry points: argument checking, the last-error sink, the
//! directory-stream cursor, and the pipe busy-wait.
//!
//! Validates raw arguments (cage ids, fd ranges) before calling into
//! `fs.rs`: turning `i32` cage ids and fds into the `usize`s `Imfs` expects,
//! and turning its `Result<T>` into the "negative return plus a thread-local
//! last-error" convention callers embedding this crate behind a C-shaped ABI
//! expect.

use std::cell::Cell;

use crate::error::{ImfsError, Result};
use crate::fcntl::{Mode, OFlag, Whence, AT_FDCWD, F_GETFL};
use crate::fs::DirEntry;
use crate::pipe::ReadOutcome;
use crate::state::with_state;

thread_local! {
    static LAST_ERROR: Cell<Option<ImfsError>> = Cell::new(None);
}

/// The calling thread's most recent failure. `None` after a successful call.
pub fn last_error() -> Option<ImfsError> {
    LAST_ERROR.with(Cell::get)
}

fn ok(value: i64) -> i64 {
    LAST_ERROR.with(|cell| cell.set(None));
    value
}

fn fail(e: ImfsError) -> i64 {
    LAST_ERROR.with(|cell| cell.set(Some(e)));
    -1
}

fn as_index(raw: i32) -> Result<usize> {
    usize::try_from(raw).map_err(|_| ImfsError::InvalidArgument)
}

/// Spins on `attempt` until it reports `Ready`, re-acquiring the global
/// lock on every iteration. Holding the lock across the spin would starve
/// a writer running on another thread, so each retry is its own
/// independent call into `with_state`.
fn spin_until_ready(mut attempt: impl FnMut() -> Result<ReadOutcome>) -> Result<usize> {
    loop {
        match attempt()? {
            ReadOutcome::Ready(n) => return Ok(n),
            ReadOutcome::WouldBlock => continue,
        }
    }
}

pub fn imfs_init() {
    crate::state::init();
}

pub fn imfs_openat(cage_id: i32, dirfd: i32, path: &str, flags: OFlag, mode: Mode) -> i64 {
    let cage_id = match as_index(cage_id) {
        Ok(c) => c,
        Err(e) => return fail(e),
    };
    match with_state(|imfs| imfs.openat(cage_id, dirfd, path, flags, mode)) {
        Ok(fd) => ok(fd as i64),
        Err(e) => fail(e),
    }
}

pub fn imfs_open(cage_id: i32, path: &str, flags: OFlag, mode: Mode) -> i64 {
    imfs_openat(cage_id, AT_FDCWD, path, flags, mode)
}

pub fn imfs_creat(cage_id: i32, path: &str, mode: Mode) -> i64 {
    imfs_openat(cage_id, AT_FDCWD, path, OFlag::O_CREAT | OFlag::O_WRONLY, mode)
}

pub fn imfs_close(cage_id: i32, fd: i32) -> i64 {
    let (cage_id, fd) = match (as_index(cage_id), as_index(fd)) {
        (Ok(c), Ok(f)) => (c, f),
        _ => return fail(ImfsError::InvalidArgument),
    };
    match with_state(|imfs| imfs.close(cage_id, fd)) {
        Ok(()) => ok(0),
        Err(e) => fail(e),
    }
}

pub fn imfs_read(cage_id: i32, fd: i32, buf: &mut [u8]) -> i64 {
    let (cage_id, fd) = match (as_index(cage_id), as_index(fd)) {
        (Ok(c), Ok(f)) => (c, f),
        _ => return fail(ImfsError::InvalidArgument),
    };
    match spin_until_ready(|| with_state(|imfs| imfs.read(cage_id, fd, buf))) {
        Ok(n) => ok(n as i64),
        Err(e) => fail(e),
    }
}

pub fn imfs_pread(cage_id: i32, fd: i32, buf: &mut [u8], offset: u64) -> i64 {
    let (cage_id, fd) = match (as_index(cage_id), as_index(fd)) {
        (Ok(c), Ok(f)) => (c, f),
        _ => return fail(ImfsError::InvalidArgument),
    };
    match spin_until_ready(|| with_state(|imfs| imfs.pread(cage_id, fd, buf, offset))) {
        Ok(n) => ok(n as i64),
        Err(e) => fail(e),
    }
}

pub fn imfs_readv(cage_id: i32, fd: i32, bufs: &mut [&mut [u8]]) -> i64 {
    let (cage_id, fd) = match (as_index(cage_id), as_index(fd)) {
        (Ok(c), Ok(f)) => (c, f),
        _ => return fail(ImfsError::InvalidArgument),
    };
    match spin_until_ready(|| with_state(|imfs| imfs.readv(cage_id, fd, bufs))) {
        Ok(n) => ok(n as i64),
        Err(e) => fail(e),
    }
}

pub fn imfs_preadv(cage_id: i32, fd: i32, bufs: &mut [&mut [u8]], offset: u64) -> i64 {
    let (cage_id, fd) = match (as_index(cage_id), as_index(fd)) {
        (Ok(c), Ok(f)) => (c, f),
        _ => return fail(ImfsError::InvalidArgument),
    };
    match spin_until_ready(|| with_state(|imfs| imfs.preadv(cage_id, fd, bufs, offset))) {
        Ok(n) => ok(n as i64),
        Err(e) => fail(e),
    }
}

pub fn imfs_write(cage_id: i32, fd: i32, buf: &[u8]) -> i64 {
    let (cage_id, fd) = match (as_index(cage_id), as_index(fd)) {
        (Ok(c), Ok(f)) => (c, f),
        _ => return fail(ImfsError::InvalidArgument),
    };
    match with_state(|imfs| imfs.write(cage_id, fd, buf)) {
        Ok(n) => ok(n as i64),
        Err(e) => fail(e),
    }
}

pub fn imfs_pwrite(cage_id: i32, fd: i32, buf: &[u8], offset: u64) -> i64 {
    let (cage_id, fd) = match (as_index(cage_id), as_index(fd)) {
        (Ok(c), Ok(f)) => (c, f),
        _ => return fail(ImfsError::InvalidArgument),
    };
    match with_state(|imfs| imfs.pwrite(cage_id, fd, buf, offset)) {
        Ok(n) => ok(n as i64),
        Err(e) => fail(e),
    }
}

pub fn imfs_writev(cage_id: i32, fd: i32, bufs: &[&[u8]]) -> i64 {
    let (cage_id, fd) = match (as_index(cage_id), as_index(fd)) {
        (Ok(c), Ok(f)) => (c, f),
        _ => return fail(ImfsError::InvalidArgument),
    };
    match with_state(|imfs| imfs.writev(cage_id, fd, bufs)) {
        Ok(n) => ok(n as i64),
        Err(e) => fail(e),
    }
}

pub fn imfs_pwritev(cage_id: i32, fd: i32, bufs: &[&[u8]], offset: u64) -> i64 {
    let (cage_id, fd) = match (as_index(cage_id), as_index(fd)) {
        (Ok(c), Ok(f)) => (c, f),
        _ => return fail(ImfsError::InvalidArgument),
    };
    match with_state(|imfs| imfs.pwritev(cage_id, fd, bufs, offset)) {
        Ok(n) => ok(n as i64),
        Err(e) => fail(e),
    }
}

pub fn imfs_mkdirat(cage_id: i32, dirfd: i32, path: &str, mode: Mode) -> i64 {
    let cage_id = match as_index(cage_id) {
        Ok(c) => c,
        Err(e) => return fail(e),
    };
    match with_state(|imfs| imfs.mkdirat(cage_id, dirfd, path, mode)) {
        Ok(()) => ok(0),
        Err(e) => fail(e),
    }
}

pub fn imfs_mkdir(cage_id: i32, path: &str, mode: Mode) -> i64 {
    imfs_mkdirat(cage_id, AT_FDCWD, path, mode)
}

pub fn imfs_linkat(cage_id: i32, old_dirfd: i32, old_path: &str, new_dirfd: i32, new_path: &str) -> i64 {
    let cage_id = match as_index(cage_id) {
        Ok(c) => c,
        Err(e) => return fail(e),
    };
    match with_state(|imfs| imfs.linkat(cage_id, old_dirfd, old_path, new_dirfd, new_path)) {
        Ok(()) => ok(0),
        Err(e) => fail(e),
    }
}

pub fn imfs_link(cage_id: i32, old_path: &str, new_path: &str) -> i64 {
    imfs_linkat(cage_id, AT_FDCWD, old_path, AT_FDCWD, new_path)
}

pub fn imfs_symlinkat(cage_id: i32, old_path: &str, new_dirfd: i32, new_path: &str) -> i64 {
    let cage_id = match as_index(cage_id) {
        Ok(c) => c,
        Err(e) => return fail(e),
    };
    match with_state(|imfs| imfs.symlinkat(cage_id, old_path, new_dirfd, new_path)) {
        Ok(()) => ok(0),
        Err(e) => fail(e),
    }
}

pub fn imfs_symlink(cage_id: i32, old_path: &str, new_path: &str) -> i64 {
    imfs_symlinkat(cage_id, old_path, AT_FDCWD, new_path)
}

fn imfs_remove_like(cage_id: i32, path: &str) -> i64 {
    let cage_id = match as_index(cage_id) {
        Ok(c) => c,
        Err(e) => return fail(e),
    };
    match with_state(|imfs| imfs.remove(cage_id, path)) {
        Ok(()) => ok(0),
        Err(e) => fail(e),
    }
}

pub fn imfs_unlink(cage_id: i32, path: &str) -> i64 {
    imfs_remove_like(cage_id, path)
}

pub fn imfs_rmdir(cage_id: i32, path: &str) -> i64 {
    imfs_remove_like(cage_id, path)
}

pub fn imfs_remove(cage_id: i32, path: &str) -> i64 {
    imfs_remove_like(cage_id, path)
}

pub fn imfs_lseek(cage_id: i32, fd: i32, offset: i64, whence: Whence) -> i64 {
    let (cage_id, fd) = match (as_index(cage_id), as_index(fd)) {
        (Ok(c), Ok(f)) => (c, f),
        _ => return fail(ImfsError::InvalidArgument),
    };
    match with_state(|imfs| imfs.lseek(cage_id, fd, offset, whence)) {
        Ok(pos) => ok(pos as i64),
        Err(e) => fail(e),
    }
}

pub fn imfs_dup(cage_id: i32, fd: i32) -> i64 {
    let (cage_id, fd) = match (as_index(cage_id), as_index(fd)) {
        (Ok(c), Ok(f)) => (c, f),
        _ => return fail(ImfsError::InvalidArgument),
    };
    match with_state(|imfs| imfs.dup(cage_id, fd)) {
        Ok(new_fd) => ok(new_fd as i64),
        Err(e) => fail(e),
    }
}

pub fn imfs_dup2(cage_id: i32, old: i32, new: i32) -> i64 {
    let (cage_id, old, new) = match (as_index(cage_id), as_index(old), as_index(new)) {
        (Ok(c), Ok(o), Ok(n)) => (c, o, n),
        _ => return fail(ImfsError::InvalidArgument),
    };
    match with_state(|imfs| imfs.dup2(cage_id, old, new)) {
        Ok(fd) => ok(fd as i64),
        Err(e) => fail(e),
    }
}

pub fn imfs_stat(cage_id: i32, path: &str) -> Result<crate::stat::Stat> {
    let cage_id = as_index(cage_id)?;
    with_state(|imfs| imfs.stat(cage_id, path))
}

pub fn imfs_lstat(cage_id: i32, path: &str) -> Result<crate::stat::Stat> {
    let cage_id = as_index(cage_id)?;
    with_state(|imfs| imfs.lstat(cage_id, path))
}

pub fn imfs_fstat(cage_id: i32, fd: i32) -> Result<crate::stat::Stat> {
    let cage_id = as_index(cage_id)?;
    let fd = as_index(fd)?;
    with_state(|imfs| imfs.fstat(cage_id, fd))
}

/// A directory stream: a cage id, an open fd, and a cursor offset.
/// `readdir` resolves the fd to its node fresh on every call rather than
/// caching it, so `fd` stays the only handle this struct needs to carry.
#[derive(Debug)]
pub struct DirStream {
    cage_id: usize,
    fd: usize,
    offset: usize,
}

pub fn imfs_opendir(cage_id: i32, path: &str) -> Result<DirStream> {
    let cage_id = as_index(cage_id)?;
    let fd = with_state(|imfs| imfs.opendir(cage_id, path))?;
    Ok(DirStream { cage_id, fd, offset: 0 })
}

pub fn imfs_readdir(stream: &mut DirStream) -> Result<Option<DirEntry>> {
    let entry = with_state(|imfs| imfs.readdir(stream.cage_id, stream.fd, stream.offset))?;
    if entry.is_some() {
        stream.offset += 1;
    }
    Ok(entry)
}

pub fn imfs_closedir(stream: DirStream) -> Result<()> {
    with_state(|imfs| imfs.closedir(stream.cage_id, stream.fd))
}

pub fn imfs_pipe(cage_id: i32) -> Result<(usize, usize)> {
    let cage_id = as_index(cage_id)?;
    with_state(|imfs| imfs.pipe(cage_id))
}

pub fn imfs_pipe2(cage_id: i32, _flags: OFlag) -> Result<(usize, usize)> {
    imfs_pipe(cage_id)
}

pub fn imfs_fcntl(cage_id: i32, fd: i32, op: i32, _arg: i32) -> i64 {
    let (cage_id, fd) = match (as_index(cage_id), as_index(fd)) {
        (Ok(c), Ok(f)) => (c, f),
        _ => return fail(ImfsError::InvalidArgument),
    };
    if op != F_GETFL {
        return fail(ImfsError::NotSupported);
    }
    match with_state(|imfs| imfs.fcntl_getfl(cage_id, fd)) {
        Ok(flags) => ok(flags.bits() as i64),
        Err(e) => fail(e),
    }
}

pub fn imfs_chmod(cage_id: i32, path: &str, mode: Mode) -> i64 {
    let cage_id = match as_index(cage_id) {
        Ok(c) => c,
        Err(e) => return fail(e),
    };
    match with_state(|imfs| imfs.chmod(cage_id, path, mode)) {
        Ok(()) => ok(0),
        Err(e) => fail(e),
    }
}

pub fn imfs_fchmod(cage_id: i32, fd: i32, mode: Mode) -> i64 {
    let (cage_id, fd) = match (as_index(cage_id), as_index(fd)) {
        (Ok(c), Ok(f)) => (c, f),
        _ => return fail(ImfsError::InvalidArgument),
    };
    match with_state(|imfs| imfs.fchmod(cage_id, fd, mode)) {
        Ok(()) => ok(0),
        Err(e) => fail(e),
    }
}

pub fn imfs_chown(cage_id: i32, path: &str, _owner: u32, _group: u32) -> i64 {
    let cage_id = match as_index(cage_id) {
        Ok(c) => c,
        Err(e) => return fail(e),
    };
    match with_state(|imfs| imfs.chown(cage_id, path)) {
        Ok(()) => ok(0),
        Err(e) => fail(e),
    }
}

pub fn imfs_rename(cage_id: i32, old_path: &str, new_path: &str) -> i64 {
    let cage_id = match as_index(cage_id) {
        Ok(c) => c,
        Err(e) => return fail(e),
    };
    match with_state(|imfs| imfs.rename(cage_id, old_path, new_path)) {
        Ok(()) => ok(0),
        Err(e) => fail(e),
    }
}

pub fn imfs_copy_fd_tables(src_cage: i32, dst_cage: i32) -> i64 {
    let (src, dst) = match (as_index(src_cage), as_index(dst_cage)) {
        (Ok(s), Ok(d)) => (s, d),
        _ => return fail(ImfsError::InvalidArgument),
    };
    match with_state(|imfs| imfs.copy_fd_tables(src, dst)) {
        Ok(()) => ok(0),
        Err(e) => fail(e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fresh() {
        crate::state::init();
    }

    #[test]
    fn open_write_close_read_roundtrip() {
        fresh();
        let fd = imfs_open(90, "/syscall_a.txt", OFlag::O_CREAT | OFlag::O_WRONLY, crate::fcntl::default_file_mode());
        assert!(fd >= 0);
        assert_eq!(imfs_write(90, fd as i32, b"hi"), 2);
        assert_eq!(imfs_close(90, fd as i32), 0);

        let fd = imfs_open(90, "/syscall_a.txt", OFlag::O_RDONLY, Mode::empty());
        assert!(fd >= 0);
        let mut buf = [0u8; 2];
        assert_eq!(imfs_read(90, fd as i32, &mut buf), 2);
        assert_eq!(&buf, b"hi");
    }

    #[test]
    fn bad_descriptor_sets_last_error() {
        fresh();
        let mut buf = [0u8; 1];
        assert_eq!(imfs_read(91, 999, &mut buf), -1);
        assert_eq!(last_error(), Some(ImfsError::BadDescriptor));
    }

    #[test]
    fn dirstream_lists_dot_and_dotdot_on_fresh_directory() {
        fresh();
        imfs_mkdir(92, "/d", crate::fcntl::default_dir_mode());
        let mut stream = imfs_opendir(92, "/d").unwrap();
        let mut names = Vec::new();
        while let Some(entry) = imfs_readdir(&mut stream).unwrap() {
            names.push(entry.name.as_str().to_owned());
        }
        imfs_closedir(stream).unwrap();
        assert_eq!(names, vec![".".to_owned(), "..".to_owned()]);
    }

    #[test]
    fn pipe_roundtrip_through_syscall_surface() {
        fresh();
        let (read_fd, write_fd) = imfs_pipe(93).unwrap();
        assert_eq!(imfs_write(93, write_fd as i32, b"msg"), 3);
        assert_eq!(imfs_close(93, write_fd as i32), 0);
        let mut buf = [0u8; 4];
        assert_eq!(imfs_read(93, read_fd as i32, &mut buf[..3]), 3);
        assert_eq!(&buf[..3], b"msg");
    }
}
