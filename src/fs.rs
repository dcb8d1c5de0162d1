//! FS entry points and the doomed-node lifecycle sweep.
//!
//! `Imfs` owns every table: the node slab, the pipe table, and each cage's
//! descriptor table, reached through a single accessor (see `state.rs`).
//! Mutation funnels through a handful of entry points that resolve a path
//! and then dispatch on node type; every method here is one of them.

use crate::error::{ImfsError, Result};
use crate::fcntl::{default_dir_mode, default_file_mode, Mode, OFlag, Whence, AT_FDCWD};
use crate::fd::{Dup2Plan, FdTable, FileDesc};
use crate::node::{self, DirEnt, NodeSlab, Payload, ROOT_INDEX};
use crate::param::MAX_CAGES;
use crate::path::{self, Name, ParsedPath};
use crate::pipe::{PipeTable, ReadOutcome};
use crate::stat::{NodeKind, Stat};

/// A directory entry as surfaced by `readdir`.
#[derive(Clone, Debug)]
pub struct DirEntry {
    pub ino: u32,
    pub kind: NodeKind,
    pub name: Name,
}

struct Cage {
    fds: FdTable,
    cwd: usize,
}

/// The whole of the shared, process-global filesystem state. A single instance lives behind `state.rs`'s
/// `spin::Once<Mutex<Imfs>>`.
pub struct Imfs {
    nodes: NodeSlab,
    pipes: PipeTable,
    cages: Vec<Cage>,
}

impl Imfs {
    /// Zeros every table, creates root at index 0
    /// (mode 0755), installs `.`/`..` on it. Cage tables are allocated
    /// eagerly up to `MAX_CAGES`, mirroring the source's fixed
    /// `g_fdtable[MAX_PROCS][MAX_FDS]` array.
    pub fn new() -> Self {
        let mut nodes = NodeSlab::new();
        let root = nodes
            .allocate(Name::new(), ROOT_INDEX, default_dir_mode(), Payload::Directory(Vec::new()))
            .expect("an empty node slab always has room for the root");
        debug_assert_eq!(root, ROOT_INDEX);
        node::install_dot_entries(&mut nodes, root, root, default_dir_mode())
            .expect("a freshly allocated root directory accepts its own . and ..");

        let cages = (0..MAX_CAGES)
            .map(|_| Cage {
                fds: FdTable::new(),
                cwd: ROOT_INDEX,
            })
            .collect();

        log::debug!("imfs initialized: root at node 0, {MAX_CAGES} cages");
        Self {
            nodes,
            pipes: PipeTable::new(),
            cages,
        }
    }

    fn cage(&self, cage_id: usize) -> Result<&Cage> {
        self.cages.get(cage_id).ok_or(ImfsError::InvalidArgument)
    }

    fn cage_mut(&mut self, cage_id: usize) -> Result<&mut Cage> {
        self.cages.get_mut(cage_id).ok_or(ImfsError::InvalidArgument)
    }

    /// Resolves the starting directory for a `*at` call: the root for an
    /// absolute path, the cage's cwd for the `AT_FDCWD` sentinel, or the
    /// directory named by an open `dirfd` otherwise.
    fn base_dir(&self, cage_id: usize, dirfd: i32, parsed: &ParsedPath) -> Result<usize> {
        if parsed.absolute {
            return Ok(ROOT_INDEX);
        }
        if dirfd == AT_FDCWD {
            return Ok(self.cage(cage_id)?.cwd);
        }
        let (_, node, _, _) = self.cage(cage_id)?.fds.resolve(dirfd as usize)?;
        if self.nodes.get(node)?.kind() != NodeKind::Directory {
            return Err(ImfsError::NotADirectory);
        }
        Ok(node)
    }

    fn check_open_permission(&self, node_index: usize, flags: OFlag) -> Result<()> {
        let mode = self.nodes.get(node_index)?.mode;
        if flags.wants_read() && !mode.contains(Mode::OTHER_R) {
            return Err(ImfsError::PermissionDenied);
        }
        if flags.wants_write() && !mode.contains(Mode::OTHER_W) {
            return Err(ImfsError::PermissionDenied);
        }
        Ok(())
    }

    fn install_fd(&mut self, cage_id: usize, node_index: usize, flags: OFlag) -> Result<usize> {
        self.nodes.retain(node_index)?;
        match self.cage_mut(cage_id)?.fds.open_direct(node_index, flags) {
            Ok(fd) => Ok(fd),
            Err(e) => {
                let _ = self.nodes.release(node_index);
                Err(e)
            }
        }
    }

    /// `openat(dirfd, path, flags, mode)`.
    pub fn openat(&mut self, cage_id: usize, dirfd: i32, path: &str, flags: OFlag, mode: Mode) -> Result<usize> {
        let (parent_parsed, name) = path::parse_parent(path)?;
        let base = self.base_dir(cage_id, dirfd, &parent_parsed)?;
        let parent = crate::resolve::resolve_parent(&self.nodes, base, &parent_parsed.components)?;

        match crate::resolve::lookup_one(&self.nodes, parent, &name) {
            Ok(existing) => {
                if flags.contains(OFlag::O_CREAT) && flags.contains(OFlag::O_EXCL) {
                    return Err(ImfsError::AlreadyExists);
                }
                let kind = self.nodes.get(existing)?.kind();
                if kind == NodeKind::Directory && !flags.contains(OFlag::O_DIRECTORY) {
                    return Err(ImfsError::IsADirectory);
                }
                if kind != NodeKind::Directory && flags.contains(OFlag::O_DIRECTORY) {
                    return Err(ImfsError::NotADirectory);
                }
                self.check_open_permission(existing, flags)?;
                self.install_fd(cage_id, existing, flags)
            }
            Err(ImfsError::NoSuchEntry) => {
                if !flags.contains(OFlag::O_CREAT) {
                    return Err(ImfsError::NoSuchEntry);
                }
                let created = self.nodes.allocate(name, parent, mode, Payload::Regular(Default::default()))?;
                self.nodes.get_mut(parent)?.as_dir_mut()?.push(DirEnt { name, node: created });
                self.install_fd(cage_id, created, flags)
            }
            Err(e) => Err(e),
        }
    }

    /// `open`/`creat`: thin wrappers over `openat` with the cwd sentinel
    ///.
    pub fn open(&mut self, cage_id: usize, path: &str, flags: OFlag, mode: Mode) -> Result<usize> {
        self.openat(cage_id, AT_FDCWD, path, flags, mode)
    }

    pub fn creat(&mut self, cage_id: usize, path: &str, mode: Mode) -> Result<usize> {
        self.open(cage_id, path, OFlag::O_CREAT | OFlag::O_WRONLY, mode)
    }

    /// `close(fd)`: drops the descriptor table slot, plus anonymous-pipe
    /// reclamation once both endpoints are closed.
    pub fn close(&mut self, cage_id: usize, fd: usize) -> Result<()> {
        let desc = self.cage_mut(cage_id)?.fds.close(fd)?;
        if let FileDesc::Direct { node, flags, .. } = desc {
            let pipe_buffer = match self.nodes.get(node)?.payload {
                Payload::Pipe { buffer } => Some(buffer),
                _ => None,
            };
            if let Some(buffer) = pipe_buffer {
                let buf = self.pipes.get_mut(buffer);
                if flags.wants_write() {
                    buf.close_writer();
                } else {
                    buf.close_reader();
                }
            }
            let reclaimed = self.nodes.release(node)?;
            if reclaimed {
                if let Some(buffer) = pipe_buffer {
                    self.pipes.free(buffer);
                }
            }
        }
        Ok(())
    }

    fn read_impl(&mut self, cage_id: usize, fd: usize, buf: &mut [u8], offset_override: Option<u64>) -> Result<ReadOutcome> {
        let (direct_fd, node, offset, _flags) = self.cage(cage_id)?.fds.resolve(fd)?;
        let pipe_buffer = match self.nodes.get(node)?.payload {
            Payload::Pipe { buffer } => Some(buffer),
            _ => None,
        };
        if let Some(buffer) = pipe_buffer {
            return Ok(self.pipes.get_mut(buffer).read(buf));
        }

        let effective_offset = offset_override.unwrap_or(offset);
        let n = self.nodes.get(node)?.as_regular()?.read(effective_offset, buf);
        if offset_override.is_none() {
            self.cage_mut(cage_id)?.fds.set_offset(direct_fd, effective_offset + n as u64);
        }
        Ok(ReadOutcome::Ready(n))
    }

    /// `read(fd, buf, count)`. Returns `ReadOutcome::WouldBlock` for a pipe
    /// fd with an empty buffer and the write end still open; `syscall.rs`
    /// spins on that outcome outside the global lock.
    pub fn read(&mut self, cage_id: usize, fd: usize, buf: &mut [u8]) -> Result<ReadOutcome> {
        self.read_impl(cage_id, fd, buf, None)
    }

    /// `pread(fd, buf, count, offset)`: positional, does not advance the
    /// descriptor's offset.
    pub fn pread(&mut self, cage_id: usize, fd: usize, buf: &mut [u8], offset: u64) -> Result<ReadOutcome> {
        self.read_impl(cage_id, fd, buf, Some(offset))
    }

    fn readv_impl(
        &mut self,
        cage_id: usize,
        fd: usize,
        bufs: &mut [&mut [u8]],
        offset_override: Option<u64>,
    ) -> Result<ReadOutcome> {
        let mut total = 0u64;
        for (i, buf) in bufs.iter_mut().enumerate() {
            let iov_offset = offset_override.map(|o| o + total);
            match self.read_impl(cage_id, fd, buf, iov_offset) {
                Ok(ReadOutcome::Ready(n)) => total += n as u64,
                Ok(ReadOutcome::WouldBlock) => {
                    if i == 0 {
                        return Ok(ReadOutcome::WouldBlock);
                    }
                    break;
                }
                Err(e) => {
                    if i == 0 {
                        return Err(e);
                    }
                    break;
                }
            }
        }
        Ok(ReadOutcome::Ready(total as usize))
    }

    /// `readv`/`preadv`: iterate the iovec, summing byte counts; a failure
    /// on the first buffer propagates, a failure on a later one stops the
    /// loop and returns what was gathered so far.
    pub fn readv(&mut self, cage_id: usize, fd: usize, bufs: &mut [&mut [u8]]) -> Result<ReadOutcome> {
        self.readv_impl(cage_id, fd, bufs, None)
    }

    pub fn preadv(&mut self, cage_id: usize, fd: usize, bufs: &mut [&mut [u8]], offset: u64) -> Result<ReadOutcome> {
        self.readv_impl(cage_id, fd, bufs, Some(offset))
    }

    fn write_impl(&mut self, cage_id: usize, fd: usize, buf: &[u8], offset_override: Option<u64>) -> Result<usize> {
        let (direct_fd, node, offset, _flags) = self.cage(cage_id)?.fds.resolve(fd)?;
        let pipe_buffer = match self.nodes.get(node)?.payload {
            Payload::Pipe { buffer } => Some(buffer),
            _ => None,
        };
        if let Some(buffer) = pipe_buffer {
            return Ok(self.pipes.get_mut(buffer).write(buf));
        }

        let effective_offset = offset_override.unwrap_or(offset);
        self.nodes.get_mut(node)?.as_regular_mut()?.write(effective_offset, buf);
        let n = buf.len();
        if offset_override.is_none() {
            self.cage_mut(cage_id)?.fds.set_offset(direct_fd, effective_offset + n as u64);
        }
        Ok(n)
    }

    pub fn write(&mut self, cage_id: usize, fd: usize, buf: &[u8]) -> Result<usize> {
        self.write_impl(cage_id, fd, buf, None)
    }

    pub fn pwrite(&mut self, cage_id: usize, fd: usize, buf: &[u8], offset: u64) -> Result<usize> {
        self.write_impl(cage_id, fd, buf, Some(offset))
    }

    fn writev_impl(&mut self, cage_id: usize, fd: usize, bufs: &[&[u8]], offset_override: Option<u64>) -> Result<usize> {
        let mut total = 0u64;
        for (i, buf) in bufs.iter().enumerate() {
            let iov_offset = offset_override.map(|o| o + total);
            match self.write_impl(cage_id, fd, buf, iov_offset) {
                Ok(n) => total += n as u64,
                Err(e) => {
                    if i == 0 {
                        return Err(e);
                    }
                    break;
                }
            }
        }
        Ok(total as usize)
    }

    pub fn writev(&mut self, cage_id: usize, fd: usize, bufs: &[&[u8]]) -> Result<usize> {
        self.writev_impl(cage_id, fd, bufs, None)
    }

    pub fn pwritev(&mut self, cage_id: usize, fd: usize, bufs: &[&[u8]], offset: u64) -> Result<usize> {
        self.writev_impl(cage_id, fd, bufs, Some(offset))
    }

    /// `mkdirat(dirfd, path, mode)`.
    pub fn mkdirat(&mut self, cage_id: usize, dirfd: i32, path: &str, mode: Mode) -> Result<()> {
        let (parent_parsed, name) = path::parse_parent(path)?;
        if name.as_str() == "." || name.as_str() == ".." {
            return Err(ImfsError::InvalidArgument);
        }
        let base = self.base_dir(cage_id, dirfd, &parent_parsed)?;
        let parent = crate::resolve::resolve_parent(&self.nodes, base, &parent_parsed.components)?;
        if crate::resolve::lookup_immediate(&self.nodes, parent, &name).is_ok() {
            return Err(ImfsError::AlreadyExists);
        }

        let child = self.nodes.allocate(name, parent, mode, Payload::Directory(Vec::new()))?;
        node::install_dot_entries(&mut self.nodes, child, parent, mode)?;
        self.nodes.get_mut(parent)?.as_dir_mut()?.push(DirEnt { name, node: child });
        Ok(())
    }

    pub fn mkdir(&mut self, cage_id: usize, path: &str, mode: Mode) -> Result<()> {
        self.mkdirat(cage_id, AT_FDCWD, path, mode)
    }

    /// Shared by `link`/`linkat`/`symlink`/`symlinkat`: hard-link semantics
    /// are not realized, so every one of these creates a symlink node
    /// targeting the pre-resolved source.
    fn create_symlink(
        &mut self,
        cage_id: usize,
        old_dirfd: i32,
        old_path: &str,
        new_dirfd: i32,
        new_path: &str,
    ) -> Result<()> {
        let old_parsed = path::parse(old_path)?;
        let old_base = self.base_dir(cage_id, old_dirfd, &old_parsed)?;
        let source = crate::resolve::resolve(&self.nodes, old_base, &old_parsed.components)?;

        let (new_parent_parsed, name) = path::parse_parent(new_path)?;
        let new_base = self.base_dir(cage_id, new_dirfd, &new_parent_parsed)?;
        let parent = crate::resolve::resolve_parent(&self.nodes, new_base, &new_parent_parsed.components)?;
        if crate::resolve::lookup_immediate(&self.nodes, parent, &name).is_ok() {
            return Err(ImfsError::InvalidArgument);
        }

        let child = self.nodes.allocate(name, parent, Mode::all(), Payload::Symlink { target: source })?;
        self.nodes.get_mut(parent)?.as_dir_mut()?.push(DirEnt { name, node: child });
        Ok(())
    }

    pub fn linkat(&mut self, cage_id: usize, old_dirfd: i32, old_path: &str, new_dirfd: i32, new_path: &str) -> Result<()> {
        self.create_symlink(cage_id, old_dirfd, old_path, new_dirfd, new_path)
    }

    pub fn symlinkat(&mut self, cage_id: usize, old_path: &str, new_dirfd: i32, new_path: &str) -> Result<()> {
        self.create_symlink(cage_id, AT_FDCWD, old_path, new_dirfd, new_path)
    }

    pub fn link(&mut self, cage_id: usize, old_path: &str, new_path: &str) -> Result<()> {
        self.create_symlink(cage_id, AT_FDCWD, old_path, AT_FDCWD, new_path)
    }

    pub fn symlink(&mut self, cage_id: usize, old_path: &str, new_path: &str) -> Result<()> {
        self.link(cage_id, old_path, new_path)
    }

    /// Shared by `unlink`/`rmdir`/`remove`: resolve without dereferencing,
    /// dispatch on node type.
    pub fn remove(&mut self, cage_id: usize, path: &str) -> Result<()> {
        let (parent_parsed, name) = path::parse_parent(path)?;
        let base = self.base_dir(cage_id, AT_FDCWD, &parent_parsed)?;
        let parent = crate::resolve::resolve_parent(&self.nodes, base, &parent_parsed.components)?;
        let target = crate::resolve::lookup_immediate(&self.nodes, parent, &name)?;

        if target == ROOT_INDEX {
            return Err(ImfsError::Busy);
        }

        if self.nodes.get(target)?.kind() == NodeKind::Directory {
            if self.nodes.get(target)?.live_child_count() > 0 {
                return Err(ImfsError::Busy);
            }
            // The directory's own "." and ".." are symlink children nothing
            // else ever resolves to directly, so their in_use is always 0;
            // doom them alongside the directory itself rather than leaking
            // their slots.
            let dots: Vec<usize> = self.nodes.get(target)?.as_dir()?.iter().map(|e| e.node).collect();
            for dot in dots {
                self.nodes.doom(dot)?;
            }
        }

        self.nodes.get_mut(parent)?.as_dir_mut()?.retain(|e| e.node != target);
        self.nodes.doom(target)?;
        Ok(())
    }

    pub fn unlink(&mut self, cage_id: usize, path: &str) -> Result<()> {
        self.remove(cage_id, path)
    }

    pub fn rmdir(&mut self, cage_id: usize, path: &str) -> Result<()> {
        self.remove(cage_id, path)
    }

    /// `lseek(fd, offset, whence)`.
    pub fn lseek(&mut self, cage_id: usize, fd: usize, offset: i64, whence: Whence) -> Result<u64> {
        let (direct_fd, node, current, _flags) = self.cage(cage_id)?.fds.resolve(fd)?;
        let new_offset = match whence {
            Whence::Set => offset,
            Whence::Cur => current as i64 + offset,
            Whence::End => self.nodes.get(node)?.total_size() as i64 + offset,
            Whence::Hole | Whence::Data => return Err(ImfsError::InvalidArgument),
        };
        if new_offset < 0 {
            return Err(ImfsError::InvalidArgument);
        }
        self.cage_mut(cage_id)?.fds.set_offset(direct_fd, new_offset as u64);
        Ok(new_offset as u64)
    }

    pub fn dup(&mut self, cage_id: usize, fd: usize) -> Result<usize> {
        self.cage_mut(cage_id)?.fds.dup(fd)
    }

    pub fn dup2(&mut self, cage_id: usize, old: usize, new: usize) -> Result<usize> {
        match self.cage_mut(cage_id)?.fds.dup2_prepare(old, new)? {
            Dup2Plan::NoOp => Ok(new),
            Dup2Plan::Installed { closed } => {
                if let Some(FileDesc::Direct { node, .. }) = closed {
                    let _ = self.nodes.release(node);
                }
                Ok(new)
            }
        }
    }

    fn stat_node(&self, node_index: usize) -> Result<Stat> {
        let node = self.nodes.get(node_index)?;
        Ok(Stat::new(node.index as u32, node.kind(), node.mode, node.total_size(), node.timestamps))
    }

    /// `stat`: dereferences symlinks.
    pub fn stat(&self, cage_id: usize, path: &str) -> Result<Stat> {
        let parsed = path::parse(path)?;
        let base = self.base_dir(cage_id, AT_FDCWD, &parsed)?;
        let node = crate::resolve::resolve(&self.nodes, base, &parsed.components)?;
        self.stat_node(node)
    }

    /// `lstat`: does not dereference the terminal component.
    pub fn lstat(&self, cage_id: usize, path: &str) -> Result<Stat> {
        let (parent_parsed, name) = path::parse_parent(path)?;
        let base = self.base_dir(cage_id, AT_FDCWD, &parent_parsed)?;
        let parent = crate::resolve::resolve_parent(&self.nodes, base, &parent_parsed.components)?;
        let node = crate::resolve::lookup_immediate(&self.nodes, parent, &name)?;
        self.stat_node(node)
    }

    pub fn fstat(&self, cage_id: usize, fd: usize) -> Result<Stat> {
        let (_, node, _, _) = self.cage(cage_id)?.fds.resolve(fd)?;
        self.stat_node(node)
    }

    /// `opendir(name)`: opens the directory through the ordinary `open` path
    /// with `O_DIRECTORY`, so the resulting fd is a real, closeable
    /// descriptor. The caller always gets back a valid fd or an error, never
    /// a stream handle assigned before its backing allocation succeeds.
    pub fn opendir(&mut self, cage_id: usize, path: &str) -> Result<usize> {
        self.openat(cage_id, AT_FDCWD, path, OFlag::O_DIRECTORY, Mode::empty())
    }

    /// `readdir`: returns the entry at `offset` without mutating any
    /// stream state itself; `syscall.rs`'s `DirStream` owns and advances
    /// the offset.
    pub fn readdir(&self, cage_id: usize, fd: usize, offset: usize) -> Result<Option<DirEntry>> {
        let (_, dir_node, _, _) = self.cage(cage_id)?.fds.resolve(fd)?;
        let dir = self.nodes.get(dir_node)?.as_dir()?;
        match dir.get(offset) {
            Some(ent) => {
                let child = self.nodes.get(ent.node)?;
                Ok(Some(DirEntry {
                    ino: child.index as u32,
                    kind: child.kind(),
                    name: ent.name,
                }))
            }
            None => Ok(None),
        }
    }

    pub fn closedir(&mut self, cage_id: usize, fd: usize) -> Result<()> {
        self.close(cage_id, fd)
    }

    /// `pipe(out[2])`: the pipe node is never attached to any
    /// directory, so nothing will ever unlink it by path; it is born
    /// already doomed, and reclaims itself the moment both descriptor
    /// references drop.
    pub fn pipe(&mut self, cage_id: usize) -> Result<(usize, usize)> {
        let buffer = self.pipes.allocate();
        let node = match self.nodes.allocate(Name::new(), ROOT_INDEX, default_file_mode(), Payload::Pipe { buffer }) {
            Ok(n) => n,
            Err(e) => {
                self.pipes.free(buffer);
                return Err(e);
            }
        };
        self.nodes.retain(node)?;
        self.nodes.retain(node)?;
        self.nodes.doom(node)?;

        let read_fd = match self.cage_mut(cage_id)?.fds.open_direct(node, OFlag::O_RDONLY) {
            Ok(fd) => fd,
            Err(e) => {
                let _ = self.nodes.release(node);
                let _ = self.nodes.release(node);
                self.pipes.free(buffer);
                return Err(e);
            }
        };
        let write_fd = match self.cage_mut(cage_id)?.fds.open_direct(node, OFlag::O_WRONLY) {
            Ok(fd) => fd,
            Err(e) => {
                let _ = self.cage_mut(cage_id)?.fds.close(read_fd);
                let _ = self.nodes.release(node);
                let _ = self.nodes.release(node);
                self.pipes.free(buffer);
                return Err(e);
            }
        };
        Ok((read_fd, write_fd))
    }

    /// `fcntl(fd, F_GETFL)`: the only operation this core supports.
    pub fn fcntl_getfl(&self, cage_id: usize, fd: usize) -> Result<OFlag> {
        self.cage(cage_id)?.fds.flags(fd)
    }

    pub fn chmod(&mut self, cage_id: usize, path: &str, mode: Mode) -> Result<()> {
        let parsed = path::parse(path)?;
        let base = self.base_dir(cage_id, AT_FDCWD, &parsed)?;
        let node = crate::resolve::resolve(&self.nodes, base, &parsed.components)?;
        self.nodes.get_mut(node)?.mode = mode;
        Ok(())
    }

    pub fn fchmod(&mut self, cage_id: usize, fd: usize, mode: Mode) -> Result<()> {
        let (_, node, _, _) = self.cage(cage_id)?.fds.resolve(fd)?;
        self.nodes.get_mut(node)?.mode = mode;
        Ok(())
    }

    /// `chown`: accepted but a no-op. Non-goal "access-control beyond a
    /// permission-bit check": uid/gid are the fixed constants `stat.rs`
    /// reports, so there is nothing per-node to change.
    pub fn chown(&mut self, cage_id: usize, path: &str) -> Result<()> {
        let parsed = path::parse(path)?;
        let base = self.base_dir(cage_id, AT_FDCWD, &parsed)?;
        let _ = crate::resolve::resolve(&self.nodes, base, &parsed.components)?;
        Ok(())
    }

    /// `rename`: deliberately unimplemented, reported as unsupported.
    pub fn rename(&mut self, _cage_id: usize, _old_path: &str, _new_path: &str) -> Result<()> {
        Err(ImfsError::NotSupported)
    }

    /// `copy_fd_tables(src, dst)`: bulk-copies one cage's
    /// descriptor table into another, then bumps `in_use` for every node a
    /// `Direct` descriptor newly reaches through `dst`.
    pub fn copy_fd_tables(&mut self, src_cage: usize, dst_cage: usize) -> Result<()> {
        if src_cage >= self.cages.len() || dst_cage >= self.cages.len() {
            return Err(ImfsError::InvalidArgument);
        }
        if src_cage == dst_cage {
            return Ok(());
        }

        let Imfs { nodes, cages, .. } = self;
        let (lo, hi) = if src_cage < dst_cage { (src_cage, dst_cage) } else { (dst_cage, src_cage) };
        let (left, right) = cages.split_at_mut(hi);
        let (src, dst) = if src_cage < dst_cage {
            (&left[lo], &mut right[0])
        } else {
            (&right[0], &mut left[lo])
        };

        src.fds.copy_into(&mut dst.fds);
        let targets: Vec<usize> = dst.fds.direct_nodes().collect();
        for node_index in targets {
            nodes.retain(node_index)?;
        }
        Ok(())
    }

    /// Creates `path`'s intermediate directories (mode 0755) if missing and
    /// returns the final parent's node index, for `loader.rs`'s
    /// `load_file`.
    pub(crate) fn ensure_parent_dirs(&mut self, path: &str) -> Result<()> {
        let (parent_parsed, _) = path::parse_parent(path)?;
        let mut current = ROOT_INDEX;
        for component in &parent_parsed.components {
            match crate::resolve::lookup_immediate(&self.nodes, current, component) {
                Ok(existing) => current = existing,
                Err(ImfsError::NoSuchEntry) => {
                    let child = self.nodes.allocate(*component, current, default_dir_mode(), Payload::Directory(Vec::new()))?;
                    node::install_dot_entries(&mut self.nodes, child, current, default_dir_mode())?;
                    self.nodes.get_mut(current)?.as_dir_mut()?.push(DirEnt {
                        name: *component,
                        node: child,
                    });
                    current = child;
                }
                Err(e) => return Err(e),
            }
        }
        Ok(())
    }

    /// Writes `contents` verbatim to `path`, creating the node (and, via
    /// `ensure_parent_dirs`, any missing intermediate directories) if it
    /// doesn't exist yet. Cage-agnostic: `load_file` runs before any cage
    /// has a descriptor table worth using.
    pub(crate) fn write_whole_file(&mut self, path: &str, contents: &[u8]) -> Result<()> {
        self.ensure_parent_dirs(path)?;
        let (parent_parsed, name) = path::parse_parent(path)?;
        let parent = crate::resolve::resolve_parent(&self.nodes, ROOT_INDEX, &parent_parsed.components)?;
        let node = match crate::resolve::lookup_one(&self.nodes, parent, &name) {
            Ok(existing) => existing,
            Err(ImfsError::NoSuchEntry) => {
                let created = self.nodes.allocate(name, parent, default_file_mode(), Payload::Regular(Default::default()))?;
                self.nodes.get_mut(parent)?.as_dir_mut()?.push(DirEnt { name, node: created });
                created
            }
            Err(e) => return Err(e),
        };
        let chain = self.nodes.get_mut(node)?.as_regular_mut()?;
        chain.truncate();
        chain.write(0, contents);
        Ok(())
    }

    /// Reads the whole content of a regular file at `path` (`dump_file`'s
    /// IMFS-side half).
    pub(crate) fn read_whole_file(&self, path: &str) -> Result<Vec<u8>> {
        let parsed = path::parse(path)?;
        let node = crate::resolve::resolve(&self.nodes, ROOT_INDEX, &parsed.components)?;
        let chain = self.nodes.get(node)?.as_regular()?;
        let mut buf = vec![0u8; chain.total_size()];
        chain.read(0, &mut buf);
        Ok(buf)
    }
}

impl Default for Imfs {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn create_write_read_roundtrip() {
        let mut fs = Imfs::new();
        let fd = fs.open(1, "/a.txt", OFlag::O_CREAT | OFlag::O_WRONLY, default_file_mode()).unwrap();
        assert_eq!(fs.write(1, fd, b"hello world").unwrap(), 11);
        fs.close(1, fd).unwrap();

        let fd = fs.open(1, "/a.txt", OFlag::O_RDONLY, Mode::empty()).unwrap();
        let mut buf = [0u8; 11];
        assert_eq!(fs.read(1, fd, &mut buf).unwrap(), ReadOutcome::Ready(11));
        assert_eq!(&buf, b"hello world");
    }

    #[test]
    fn o_creat_on_existing_file_without_excl_opens_it() {
        let mut fs = Imfs::new();
        let a = fs.open(1, "/a.txt", OFlag::O_CREAT | OFlag::O_WRONLY, default_file_mode()).unwrap();
        fs.close(1, a).unwrap();
        let b = fs.open(1, "/a.txt", OFlag::O_CREAT | OFlag::O_WRONLY, default_file_mode());
        assert!(b.is_ok());
    }

    #[test]
    fn o_creat_excl_on_existing_file_fails() {
        let mut fs = Imfs::new();
        let a = fs.open(1, "/a.txt", OFlag::O_CREAT | OFlag::O_WRONLY, default_file_mode()).unwrap();
        fs.close(1, a).unwrap();
        let b = fs.open(1, "/a.txt", OFlag::O_CREAT | OFlag::O_EXCL | OFlag::O_WRONLY, default_file_mode());
        assert_eq!(b, Err(ImfsError::AlreadyExists));
    }

    #[test]
    fn nested_mkdir_and_dot_dotdot_lookup() {
        let mut fs = Imfs::new();
        fs.mkdir(1, "/x", default_dir_mode()).unwrap();
        fs.mkdir(1, "/x/y", default_dir_mode()).unwrap();
        assert!(fs.open(1, "/x/./y/../y", OFlag::O_DIRECTORY, Mode::empty()).is_ok());
    }

    #[test]
    fn dup_shares_offset() {
        let mut fs = Imfs::new();
        let fd = fs.open(1, "/a.txt", OFlag::O_CREAT | OFlag::O_WRONLY, default_file_mode()).unwrap();
        fs.write(1, fd, b"hello world").unwrap();
        fs.close(1, fd).unwrap();

        let fd = fs.open(1, "/a.txt", OFlag::O_RDONLY, Mode::empty()).unwrap();
        let g = fs.dup(1, fd).unwrap();
        let mut b1 = [0u8; 5];
        let mut b2 = [0u8; 6];
        assert_eq!(fs.read(1, fd, &mut b1).unwrap(), ReadOutcome::Ready(5));
        assert_eq!(fs.read(1, g, &mut b2).unwrap(), ReadOutcome::Ready(6));
        assert_eq!(&b1, b"hello");
        assert_eq!(&b2, b" world");
    }

    #[test]
    fn unlink_while_open_keeps_fd_usable_until_close() {
        let mut fs = Imfs::new();
        let creat = fs.open(1, "/a.txt", OFlag::O_CREAT | OFlag::O_WRONLY, default_file_mode()).unwrap();
        fs.write(1, creat, b"hello world").unwrap();
        fs.close(1, creat).unwrap();

        let fd = fs.open(1, "/a.txt", OFlag::O_RDONLY, Mode::empty()).unwrap();
        fs.unlink(1, "/a.txt").unwrap();
        assert_eq!(fs.open(1, "/a.txt", OFlag::O_RDONLY, Mode::empty()), Err(ImfsError::NoSuchEntry));

        let mut buf = [0u8; 5];
        assert_eq!(fs.read(1, fd, &mut buf).unwrap(), ReadOutcome::Ready(5));
        let before = fs.nodes.occupied();
        fs.close(1, fd).unwrap();
        assert_eq!(fs.nodes.occupied(), before - 1);
    }

    #[test]
    fn rmdir_rejects_non_empty_and_root() {
        let mut fs = Imfs::new();
        fs.mkdir(1, "/x", default_dir_mode()).unwrap();
        fs.mkdir(1, "/x/y", default_dir_mode()).unwrap();
        assert_eq!(fs.rmdir(1, "/x"), Err(ImfsError::Busy));
        fs.rmdir(1, "/x/y").unwrap();
        fs.rmdir(1, "/x").unwrap();
    }

    #[test]
    fn pipe_roundtrip() {
        let mut fs = Imfs::new();
        let (read_fd, write_fd) = fs.pipe(1).unwrap();
        assert_eq!(fs.write(1, write_fd, b"msg").unwrap(), 3);
        fs.close(1, write_fd).unwrap();
        let mut buf = [0u8; 4];
        assert_eq!(fs.read(1, read_fd, &mut buf[..3]).unwrap(), ReadOutcome::Ready(3));
        assert_eq!(&buf[..3], b"msg");
    }

    #[test]
    fn pipe_read_on_empty_open_pipe_blocks_until_data_or_close() {
        let mut fs = Imfs::new();
        let (read_fd, write_fd) = fs.pipe(1).unwrap();
        let mut buf = [0u8; 4];
        assert_eq!(fs.read(1, read_fd, &mut buf).unwrap(), ReadOutcome::WouldBlock);
        fs.close(1, write_fd).unwrap();
        assert_eq!(fs.read(1, read_fd, &mut buf).unwrap(), ReadOutcome::Ready(0));
    }

    #[test]
    fn mkdir_on_dot_or_dotdot_terminal_is_invalid() {
        let mut fs = Imfs::new();
        assert_eq!(fs.mkdir(1, "/.", default_dir_mode()), Err(ImfsError::InvalidArgument));
    }

    #[test]
    fn copy_fd_tables_inherits_and_bumps_refcount() {
        let mut fs = Imfs::new();
        let fd = fs.open(1, "/a.txt", OFlag::O_CREAT | OFlag::O_WRONLY, default_file_mode()).unwrap();
        fs.copy_fd_tables(1, 2).unwrap();
        let via_child = fs.fstat(2, fd).unwrap();
        let via_parent = fs.fstat(1, fd).unwrap();
        assert_eq!(via_child.ino, via_parent.ino);
    }
}
