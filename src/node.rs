//! Node allocator, node tree, and directory entries.
//!
//! A plain slab plus LIFO free list: the `in_use`/`doomed` fields on each
//! node carry their own liveness bookkeeping, so no separate handle wrapper
//! or refcounted pointer sits in front of a slot.

use crate::chunk::ChunkChain;
use crate::error::{ImfsError, Result};
use crate::fcntl::Mode;
use crate::param::{MAX_NODES, NAME_MAX};
use crate::path::Name;
use crate::stat::{NodeKind, Timestamps};

/// An entry in a directory's child list: a fixed-width name plus the index
/// of the node it names. Insertion order is preserved.
#[derive(Clone, Debug)]
pub struct DirEnt {
    pub name: Name,
    pub node: usize,
}

#[derive(Clone, Debug)]
pub enum Payload {
    Regular(ChunkChain),
    Directory(Vec<DirEnt>),
    Symlink { target: usize },
    Pipe { buffer: usize },
    Free,
}

impl Payload {
    pub fn kind(&self) -> NodeKind {
        match self {
            Payload::Regular(_) => NodeKind::Regular,
            Payload::Directory(_) => NodeKind::Directory,
            Payload::Symlink { .. } => NodeKind::Symlink,
            Payload::Pipe { .. } => NodeKind::Pipe,
            Payload::Free => NodeKind::Free,
        }
    }
}

/// An inode. `index` is its own slot number in the slab (stable identity,
/// also `st_ino`).
#[derive(Clone, Debug)]
pub struct Node {
    pub index: usize,
    pub name: Name,
    pub parent: usize,
    pub in_use: u32,
    pub doomed: bool,
    pub mode: Mode,
    pub timestamps: Timestamps,
    pub payload: Payload,
}

impl Node {
    fn free_at(index: usize) -> Self {
        Self {
            index,
            name: Name::new(),
            parent: index,
            in_use: 0,
            doomed: false,
            mode: Mode::empty(),
            timestamps: Timestamps::default(),
            payload: Payload::Free,
        }
    }

    pub fn kind(&self) -> NodeKind {
        self.payload.kind()
    }

    pub fn is_free(&self) -> bool {
        matches!(self.payload, Payload::Free)
    }

    /// The sum of `used` across a regular file's chunk chain, 0 for every
    /// other node kind.
    pub fn total_size(&self) -> u64 {
        match &self.payload {
            Payload::Regular(chain) => chain.total_size() as u64,
            _ => 0,
        }
    }

    pub fn as_dir(&self) -> Result<&Vec<DirEnt>> {
        match &self.payload {
            Payload::Directory(ents) => Ok(ents),
            _ => Err(ImfsError::NotADirectory),
        }
    }

    pub fn as_dir_mut(&mut self) -> Result<&mut Vec<DirEnt>> {
        match &mut self.payload {
            Payload::Directory(ents) => Ok(ents),
            _ => Err(ImfsError::NotADirectory),
        }
    }

    /// Live child count, excluding `.`/`..`. Only empty directories can be
    /// removed, so a directory's `Vec` never carries a doomed-but-still-open
    /// child the way a regular file's node can.
    pub fn live_child_count(&self) -> usize {
        match &self.payload {
            Payload::Directory(ents) => ents.len().saturating_sub(2),
            _ => 0,
        }
    }

    pub fn as_regular(&self) -> Result<&ChunkChain> {
        match &self.payload {
            Payload::Regular(chain) => Ok(chain),
            _ => Err(ImfsError::IsADirectory),
        }
    }

    pub fn as_regular_mut(&mut self) -> Result<&mut ChunkChain> {
        match &mut self.payload {
            Payload::Regular(chain) => Ok(chain),
            _ => Err(ImfsError::IsADirectory),
        }
    }
}

/// The global node slab: a bump index plus a LIFO free-hole list.
#[derive(Debug)]
pub struct NodeSlab {
    nodes: Vec<Node>,
    next_node: usize,
    free_holes: Vec<usize>,
}

pub const ROOT_INDEX: usize = 0;

impl NodeSlab {
    pub fn new() -> Self {
        Self {
            nodes: Vec::with_capacity(MAX_NODES),
            next_node: 0,
            free_holes: Vec::new(),
        }
    }

    /// Pops the free-hole LIFO if non-empty, re-verifying the slot is
    /// actually free, else bumps. The returned node is zeroed except type
    /// (via `payload`), mode, index, and timestamps.
    pub fn allocate(&mut self, name: Name, parent: usize, mode: Mode, payload: Payload) -> Result<usize> {
        let index = if let Some(index) = self.free_holes.pop() {
            debug_assert!(self.nodes[index].is_free(), "free-hole list pointed at a live node");
            index
        } else {
            if self.next_node >= MAX_NODES {
                return Err(ImfsError::OutOfSpace);
            }
            let index = self.next_node;
            self.next_node += 1;
            self.nodes.push(Node::free_at(index));
            index
        };

        let node = &mut self.nodes[index];
        node.name = name;
        node.parent = parent;
        node.in_use = 0;
        node.doomed = false;
        node.mode = mode;
        node.timestamps = Timestamps::now();
        node.payload = payload;
        log::trace!("node {index} allocated as {:?}", node.kind());
        Ok(index)
    }

    pub fn get(&self, index: usize) -> Result<&Node> {
        self.nodes
            .get(index)
            .filter(|n| !n.is_free())
            .ok_or(ImfsError::NoSuchEntry)
    }

    pub fn get_mut(&mut self, index: usize) -> Result<&mut Node> {
        self.nodes
            .get_mut(index)
            .filter(|n| !n.is_free())
            .ok_or(ImfsError::NoSuchEntry)
    }

    /// Bumps `in_use` for a newly-live direct descriptor.
    pub fn retain(&mut self, index: usize) -> Result<()> {
        self.get_mut(index)?.in_use += 1;
        Ok(())
    }

    /// Drops one live reference, reclaiming the node in place if it was
    /// doomed and this was the last reference. Returns whether the node was reclaimed.
    pub fn release(&mut self, index: usize) -> Result<bool> {
        let node = self.get_mut(index)?;
        debug_assert!(node.in_use > 0, "release on a node with no live references");
        node.in_use = node.in_use.saturating_sub(1);
        if node.doomed && node.in_use == 0 {
            self.reclaim(index)?;
            return Ok(true);
        }
        Ok(false)
    }

    /// Marks `index` doomed, reclaiming it immediately if nothing references
    /// it.
    pub fn doom(&mut self, index: usize) -> Result<bool> {
        let node = self.get_mut(index)?;
        node.doomed = true;
        if node.in_use == 0 {
            self.reclaim(index)?;
            return Ok(true);
        }
        Ok(false)
    }

    fn reclaim(&mut self, index: usize) -> Result<()> {
        if index == ROOT_INDEX {
            // The root is never deletable; `doom` is
            // never called on it by any entry point, but guard anyway.
            return Err(ImfsError::Busy);
        }
        self.nodes[index] = Node::free_at(index);
        self.free_holes.push(index);
        log::trace!("node {index} reclaimed");
        Ok(())
    }

    /// Number of slab slots currently backing a live node. Lets tests pin
    /// that occupancy returns to its pre-cycle value after an open/close
    /// round trip.
    pub fn occupied(&self) -> usize {
        self.nodes.iter().filter(|n| !n.is_free()).count()
    }
}

impl Default for NodeSlab {
    fn default() -> Self {
        Self::new()
    }
}

/// Installs `.` and `..` as symlink children of `dir_index`: both are real
/// symlink nodes allocated from the slab (not bare aliases of the
/// directory's own index), so path resolution
/// can walk them through the ordinary "dereference a symlink component" step
/// without special-casing `.`/`..` at all. `parent_index` is the directory
/// that will contain `dir_index` (itself, for the root).
pub fn install_dot_entries(slab: &mut NodeSlab, dir_index: usize, parent_index: usize, mode: Mode) -> Result<()> {
    let dot = slab.allocate(
        Name::from(".").map_err(|_| ImfsError::NameTooLong)?,
        dir_index,
        mode,
        Payload::Symlink { target: dir_index },
    )?;
    let dotdot = slab.allocate(
        Name::from("..").map_err(|_| ImfsError::NameTooLong)?,
        dir_index,
        mode,
        Payload::Symlink { target: parent_index },
    )?;
    let dir = slab.get_mut(dir_index)?.as_dir_mut()?;
    dir.push(DirEnt {
        name: Name::from(".").map_err(|_| ImfsError::NameTooLong)?,
        node: dot,
    });
    dir.push(DirEnt {
        name: Name::from("..").map_err(|_| ImfsError::NameTooLong)?,
        node: dotdot,
    });
    Ok(())
}

static_assertions::const_assert!(NAME_MAX >= 2); // room for ".."
