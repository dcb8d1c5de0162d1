//! Per-cage descriptor tables.
//!
//! A table slot is either a direct descriptor (owns a node reference) or an
//! alias of another slot in the same table (`dup`/`dup2`): aliasing shares
//! one *table slot* rather than cloning a handle, so alias descriptors never
//! bump `in_use` on their own. Closing or overwriting a `Direct` slot that
//! other slots alias hands the descriptor off to one of them (`detach`)
//! instead of leaving the rest dangling, keeping alias chains at length <= 1.

use crate::error::{ImfsError, Result};
use crate::fcntl::OFlag;
use crate::param::{MAX_FDS, RESERVED_FDS};

#[derive(Clone, Debug)]
pub enum FileDesc {
    Direct {
        node: usize,
        offset: u64,
        flags: OFlag,
    },
    /// Forwards to another slot in the same table. Alias chains are kept to
    /// length <= 1 by resolving at creation time, so an alias always names a
    /// `Direct` slot, never another `Alias`.
    Alias {
        target: usize,
    },
}

/// A cage's open-file table: `MAX_FDS` slots, 0..`RESERVED_FDS` reserved for
/// the standard streams, bump allocation with a LIFO free list for the rest.
#[derive(Debug)]
pub struct FdTable {
    slots: Vec<Option<FileDesc>>,
    next_fd: usize,
    free_list: Vec<usize>,
}

impl FdTable {
    pub fn new() -> Self {
        Self {
            slots: (0..MAX_FDS).map(|_| None).collect(),
            next_fd: RESERVED_FDS,
            free_list: Vec::new(),
        }
    }

    fn claim_slot(&mut self) -> Result<usize> {
        if let Some(fd) = self.free_list.pop() {
            return Ok(fd);
        }
        if self.next_fd >= MAX_FDS {
            return Err(ImfsError::TooManyOpenFiles);
        }
        let fd = self.next_fd;
        self.next_fd += 1;
        Ok(fd)
    }

    /// Installs a new direct descriptor, returning its fd.
    pub fn open_direct(&mut self, node: usize, flags: OFlag) -> Result<usize> {
        let fd = self.claim_slot()?;
        self.slots[fd] = Some(FileDesc::Direct {
            node,
            offset: 0,
            flags,
        });
        Ok(fd)
    }

    /// `dup(old, -1)`: allocates a new slot aliasing `old`'s direct target.
    pub fn dup(&mut self, old: usize) -> Result<usize> {
        let target = self.resolve(old)?.0;
        let fd = self.claim_slot()?;
        self.slots[fd] = Some(FileDesc::Alias { target });
        Ok(fd)
    }

    /// `dup2(old, new)`: if `new == old`, returns `new` unchanged; if `new`
    /// is occupied, it is detached first (the caller drives node-refcount
    /// bookkeeping via the returned closed slot), then the alias is
    /// installed at `new`.
    pub fn dup2_prepare(&mut self, old: usize, new: usize) -> Result<Dup2Plan> {
        if old == new {
            self.get(old)?;
            return Ok(Dup2Plan::NoOp);
        }
        self.get(old)?;
        self.ensure_slot_exists(new)?;
        let closed = self.detach(new, None);
        let target = self.resolve(old)?.0;
        self.slots[new] = Some(FileDesc::Alias { target });
        Ok(Dup2Plan::Installed { closed })
    }

    /// Removes whatever is at `fd` and installs `replacement` in its place.
    /// If `fd` held a `Direct` descriptor that some other slot aliases, that
    /// alias is the heir: it is promoted to `Direct` with the same fields,
    /// every other alias that targeted `fd` is repointed at the heir, and
    /// the return value reports `Alias { target: heir }` rather than the
    /// `Direct` that was actually removed, so a caller that only reacts to
    /// `Direct` (to release the node or reclaim a pipe) correctly takes no
    /// action — the resource is still referenced, just through a different
    /// slot. If nothing aliased `fd`, the `Direct` (or `Alias`, or nothing)
    /// that was there is returned unchanged.
    fn detach(&mut self, fd: usize, replacement: Option<FileDesc>) -> Option<FileDesc> {
        let previous = self.slots[fd].take();
        self.slots[fd] = replacement;

        let (node, offset, flags) = match previous {
            Some(FileDesc::Direct { node, offset, flags }) => (node, offset, flags),
            other => return other,
        };

        let heir = self
            .slots
            .iter()
            .position(|slot| matches!(slot, Some(FileDesc::Alias { target }) if *target == fd));

        match heir {
            None => Some(FileDesc::Direct { node, offset, flags }),
            Some(heir) => {
                self.slots[heir] = Some(FileDesc::Direct { node, offset, flags });
                for slot in &mut self.slots {
                    if let Some(FileDesc::Alias { target }) = slot {
                        if *target == fd {
                            *target = heir;
                        }
                    }
                }
                Some(FileDesc::Alias { target: heir })
            }
        }
    }

    fn ensure_slot_exists(&mut self, fd: usize) -> Result<()> {
        if fd >= MAX_FDS {
            return Err(ImfsError::BadDescriptor);
        }
        if fd >= self.next_fd {
            self.free_list.extend(self.next_fd..fd);
            self.next_fd = fd + 1;
        } else {
            self.free_list.retain(|&f| f != fd);
        }
        Ok(())
    }

    pub fn get(&self, fd: usize) -> Result<&FileDesc> {
        self.slots
            .get(fd)
            .and_then(|s| s.as_ref())
            .ok_or(ImfsError::BadDescriptor)
    }

    /// Resolves `fd` through at most one alias hop, returning the direct
    /// slot's index and its `FileDesc::Direct` fields. An alias whose target
    /// is itself an alias would mean the length <= 1 invariant broke
    /// somewhere; reported as a bad descriptor rather than trusted.
    pub fn resolve(&self, fd: usize) -> Result<(usize, usize, u64, OFlag)> {
        match self.get(fd)? {
            FileDesc::Direct { node, offset, flags } => Ok((fd, *node, *offset, *flags)),
            FileDesc::Alias { target } => match self.get(*target)? {
                FileDesc::Direct { node, offset, flags } => Ok((*target, *node, *offset, *flags)),
                FileDesc::Alias { .. } => Err(ImfsError::BadDescriptor),
            },
        }
    }

    pub fn set_offset(&mut self, direct_fd: usize, offset: u64) {
        if let Some(FileDesc::Direct { offset: slot, .. }) = &mut self.slots[direct_fd] {
            *slot = offset;
        }
    }

    pub fn flags(&self, fd: usize) -> Result<OFlag> {
        Ok(self.resolve(fd)?.3)
    }

    /// Removes `fd`'s slot, returning what was there (the caller uses the
    /// `Direct` node index to drop its `in_use` count). Alias slots never
    /// touch `in_use`; neither does a `Direct` slot whose last alias just
    /// inherited it (see `detach`).
    pub fn close(&mut self, fd: usize) -> Result<FileDesc> {
        if self.slots.get(fd).map_or(true, Option::is_none) {
            return Err(ImfsError::BadDescriptor);
        }
        let desc = self.detach(fd, None).expect("slot occupied, checked above");
        self.free_list.push(fd);
        Ok(desc)
    }

    /// Bulk-copies this table into `dst`, simulating fd inheritance across
    /// fork.
    pub fn copy_into(&self, dst: &mut FdTable) {
        dst.slots = self.slots.clone();
        dst.next_fd = self.next_fd;
        dst.free_list = self.free_list.clone();
    }

    /// Node index of every occupied `Direct` slot, for the caller to bump
    /// `in_use` on after a `copy_into` duplicates the table into another cage.
    pub fn direct_nodes(&self) -> impl Iterator<Item = usize> + '_ {
        self.slots.iter().filter_map(|s| match s {
            Some(FileDesc::Direct { node, .. }) => Some(*node),
            _ => None,
        })
    }
}

impl Default for FdTable {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug)]
pub enum Dup2Plan {
    NoOp,
    Installed { closed: Option<FileDesc> },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn open_direct_then_resolve() {
        let mut table = FdTable::new();
        let fd = table.open_direct(7, OFlag::O_RDONLY).unwrap();
        assert_eq!(fd, RESERVED_FDS);
        let (direct_fd, node, offset, _) = table.resolve(fd).unwrap();
        assert_eq!(direct_fd, fd);
        assert_eq!(node, 7);
        assert_eq!(offset, 0);
    }

    #[test]
    fn dup_shares_direct_slot() {
        let mut table = FdTable::new();
        let fd = table.open_direct(7, OFlag::O_RDONLY).unwrap();
        let dup_fd = table.dup(fd).unwrap();
        table.set_offset(fd, 5);
        let (direct_a, ..) = table.resolve(fd).unwrap();
        let (direct_b, _, offset_b, _) = table.resolve(dup_fd).unwrap();
        assert_eq!(direct_a, direct_b);
        assert_eq!(offset_b, 5);
    }

    #[test]
    fn dup2_same_fd_is_noop() {
        let mut table = FdTable::new();
        let fd = table.open_direct(7, OFlag::O_RDONLY).unwrap();
        let plan = table.dup2_prepare(fd, fd).unwrap();
        assert!(matches!(plan, Dup2Plan::NoOp));
    }

    #[test]
    fn close_reclaims_slot_for_reuse() {
        let mut table = FdTable::new();
        let fd = table.open_direct(7, OFlag::O_RDONLY).unwrap();
        table.close(fd).unwrap();
        let fd2 = table.open_direct(8, OFlag::O_RDONLY).unwrap();
        assert_eq!(fd, fd2);
    }

    /// `dup2` overwriting a slot that another fd already aliases must hand
    /// the descriptor off to that alias rather than leave it dangling.
    #[test]
    fn dup2_over_a_slot_with_a_live_alias_repoints_the_alias() {
        let mut table = FdTable::new();
        let a = table.open_direct(7, OFlag::O_RDONLY).unwrap();
        let b = table.open_direct(8, OFlag::O_RDONLY).unwrap();
        let c = table.dup(a).unwrap();

        let plan = table.dup2_prepare(b, a).unwrap();
        assert!(matches!(plan, Dup2Plan::Installed { closed: Some(FileDesc::Alias { .. }) }));

        let (_, node, ..) = table.resolve(c).unwrap();
        assert_eq!(node, 7, "c must still see a's original node, not b's");
        let (_, node_a, ..) = table.resolve(a).unwrap();
        assert_eq!(node_a, 8, "a now aliases b's node");
    }
}
