//! Split an absolute or relative path into bounded components.
//!
//! Parses the whole component list up front into a fixed-capacity array,
//! since the resolver (resolve.rs) needs the full list before it starts
//! walking symlinks.

use arrayvec::{ArrayString, ArrayVec};

use crate::error::{ImfsError, Result};
use crate::param::{MAX_DEPTH, NAME_MAX};

pub type Name = ArrayString<NAME_MAX>;

/// A parsed path: whether it started at the root, and its components.
#[derive(Clone, Debug, Default)]
pub struct ParsedPath {
    pub absolute: bool,
    pub components: ArrayVec<Name, MAX_DEPTH>,
}

impl ParsedPath {
    pub fn is_root(&self) -> bool {
        self.absolute && self.components.is_empty()
    }
}

/// Splits `path` on `/`, collapsing repeated separators, and bounds-checks
/// against `MAX_DEPTH` components of at most `NAME_MAX` bytes each.
pub fn parse(path: &str) -> Result<ParsedPath> {
    if path.is_empty() {
        return Err(ImfsError::InvalidArgument);
    }

    let absolute = path.starts_with('/');
    let mut components = ArrayVec::new();

    for raw in path.split('/').filter(|s| !s.is_empty()) {
        if raw.len() > NAME_MAX {
            return Err(ImfsError::NameTooLong);
        }
        if components.is_full() {
            return Err(ImfsError::NameTooLong);
        }
        let name = Name::from(raw).map_err(|_| ImfsError::NameTooLong)?;
        components.push(name);
    }

    Ok(ParsedPath {
        absolute,
        components,
    })
}

/// Splits a path into (parent components, terminal component name), the
/// shape `nameiparent` needs. Fails with `InvalidArgument` for a path with
/// no terminal component (`"/"` or `""`).
pub fn parse_parent(path: &str) -> Result<(ParsedPath, Name)> {
    let mut parsed = parse(path)?;
    let name = parsed.components.pop().ok_or(ImfsError::InvalidArgument)?;
    Ok((parsed, name))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn names(p: &ParsedPath) -> Vec<&str> {
        p.components.iter().map(|n| n.as_str()).collect()
    }

    #[test]
    fn splits_on_slash_and_collapses_runs() {
        let p = parse("/x//y/z").unwrap();
        assert!(p.absolute);
        assert_eq!(names(&p), vec!["x", "y", "z"]);
    }

    #[test]
    fn relative_path_is_not_absolute() {
        let p = parse("a/b").unwrap();
        assert!(!p.absolute);
        assert_eq!(names(&p), vec!["a", "b"]);
    }

    #[test]
    fn root_has_no_components() {
        let p = parse("/").unwrap();
        assert!(p.is_root());
    }

    #[test]
    fn name_too_long_rejected() {
        let long = "a".repeat(NAME_MAX + 1);
        assert_eq!(parse(&format!("/{long}")), Err(ImfsError::NameTooLong));
    }

    #[test]
    fn too_many_components_rejected() {
        let deep = "/a".repeat(MAX_DEPTH + 1);
        assert_eq!(parse(&deep), Err(ImfsError::NameTooLong));
    }

    #[test]
    fn parse_parent_splits_terminal_component() {
        let (parent, name) = parse_parent("/x/y/z").unwrap();
        assert_eq!(names(&parent), vec!["x", "y"]);
        assert_eq!(name.as_str(), "z");
    }

    #[test]
    fn parse_parent_rejects_root() {
        assert_eq!(parse_parent("/"), Err(ImfsError::InvalidArgument));
    }
}
