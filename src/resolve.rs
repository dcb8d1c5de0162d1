//! Symlink-aware path resolver.
//!
//! Walks a parsed component list against the in-memory node tree, one
//! component at a time. `.` and `..` need no special-casing here: `mkdirat`
//! installs them as ordinary symlink
//! children (node.rs), so the same "dereference a symlink component" step
//! that handles user-created symlinks handles self/parent navigation too.

use crate::error::{ImfsError, Result};
use crate::node::NodeSlab;
use crate::path::Name;
use crate::stat::NodeKind;

/// Bounds symlink-chain dereferencing. `symlinkat` has no cycle check, so a
/// symlink pointing at itself would otherwise spin resolution forever. 40
/// matches the common Unix `ELOOP` convention.
const MAX_SYMLINK_HOPS: usize = 40;

/// Resolves a single name inside `dir_index`'s child list, following any
/// symlink chain to a non-symlink node (or back to `InvalidArgument` if the
/// chain is too long). First match in insertion order wins.
pub(crate) fn lookup_one(slab: &NodeSlab, dir_index: usize, name: &Name) -> Result<usize> {
    let dir = slab.get(dir_index)?.as_dir()?;
    let mut index = dir
        .iter()
        .find(|e| &e.name == name)
        .map(|e| e.node)
        .ok_or(ImfsError::NoSuchEntry)?;

    for _ in 0..MAX_SYMLINK_HOPS {
        let node = slab.get(index)?;
        match &node.payload {
            crate::node::Payload::Symlink { target } => index = *target,
            _ => return Ok(index),
        }
    }
    Err(ImfsError::InvalidArgument)
}

/// Looks up a single name in `dir_index`'s child list without dereferencing
/// a symlink hit. Used by entry points that must act on the directory entry
/// itself rather than what it points to: `lstat`, `unlink`/`rmdir`, and the
/// existence checks in `mkdirat`/`linkat`/`symlinkat`.
pub fn lookup_immediate(slab: &NodeSlab, dir_index: usize, name: &Name) -> Result<usize> {
    let dir = slab.get(dir_index)?.as_dir()?;
    dir.iter()
        .find(|e| &e.name == name)
        .map(|e| e.node)
        .ok_or(ImfsError::NoSuchEntry)
}

/// Walks `components` starting at `base`, dereferencing symlinks along the
/// way. Returns the resolved node index, or `NoSuchEntry` for any missing
/// component, or `NotADirectory` if a non-terminal component isn't a
/// directory.
pub fn resolve(slab: &NodeSlab, base: usize, components: &[Name]) -> Result<usize> {
    let mut current = base;

    for name in components {
        if slab.get(current)?.kind() != NodeKind::Directory {
            return Err(ImfsError::NotADirectory);
        }
        current = lookup_one(slab, current, name)?;
    }
    Ok(current)
}

/// Resolves all but the last component, returning the parent directory's
/// node index. Fails with `NotADirectory` if any component along the way
/// (including the resolved parent itself) isn't a directory.
pub fn resolve_parent(slab: &NodeSlab, base: usize, parent_components: &[Name]) -> Result<usize> {
    let parent = resolve(slab, base, parent_components)?;
    if slab.get(parent)?.kind() != NodeKind::Directory {
        return Err(ImfsError::NotADirectory);
    }
    Ok(parent)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fcntl::default_dir_mode;
    use crate::node::{install_dot_entries, DirEnt, Payload, ROOT_INDEX};

    fn fresh_root() -> NodeSlab {
        let mut slab = NodeSlab::new();
        let root = slab
            .allocate(Name::new(), ROOT_INDEX, default_dir_mode(), Payload::Directory(Vec::new()))
            .unwrap();
        assert_eq!(root, ROOT_INDEX);
        install_dot_entries(&mut slab, root, root, default_dir_mode()).unwrap();
        slab
    }

    fn mkdir(slab: &mut NodeSlab, parent: usize, name: &str) -> usize {
        let child = slab
            .allocate(
                Name::from(name).unwrap(),
                parent,
                default_dir_mode(),
                Payload::Directory(Vec::new()),
            )
            .unwrap();
        install_dot_entries(slab, child, parent, default_dir_mode()).unwrap();
        slab.get_mut(parent)
            .unwrap()
            .as_dir_mut()
            .unwrap()
            .push(DirEnt {
                name: Name::from(name).unwrap(),
                node: child,
            });
        child
    }

    #[test]
    fn resolves_nested_dir_through_dot_and_dotdot() {
        let mut slab = fresh_root();
        let x = mkdir(&mut slab, ROOT_INDEX, "x");
        let y = mkdir(&mut slab, x, "y");

        let components: Vec<Name> = ["x", ".", "y", "..", "y"]
            .iter()
            .map(|s| Name::from(*s).unwrap())
            .collect();
        let resolved = resolve(&slab, ROOT_INDEX, &components).unwrap();
        assert_eq!(resolved, y);
    }

    #[test]
    fn missing_component_is_no_such_entry() {
        let slab = fresh_root();
        let components = vec![Name::from("missing").unwrap()];
        assert_eq!(resolve(&slab, ROOT_INDEX, &components), Err(ImfsError::NoSuchEntry));
    }

    #[test]
    fn lookup_immediate_does_not_dereference_symlinks() {
        let slab = fresh_root();
        let dot = lookup_immediate(&slab, ROOT_INDEX, &Name::from(".").unwrap()).unwrap();
        assert_eq!(slab.get(dot).unwrap().kind(), NodeKind::Symlink);
    }

    #[test]
    fn resolve_is_idempotent_on_split_then_rejoin() {
        let mut slab = fresh_root();
        mkdir(&mut slab, ROOT_INDEX, "a");
        let parsed = crate::path::parse("/a").unwrap();
        let once = resolve(&slab, ROOT_INDEX, &parsed.components).unwrap();

        let rejoined = format!("/{}", parsed.components.iter().map(|n| n.as_str()).collect::<Vec<_>>().join("/"));
        let reparsed = crate::path::parse(&rejoined).unwrap();
        let twice = resolve(&slab, ROOT_INDEX, &reparsed.components).unwrap();
        assert_eq!(once, twice);
    }
}
