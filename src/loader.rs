//! Host import/export: the other half of the external interface, since
//! populating an in-memory filesystem from nothing is only useful if
//! something can get files into (and back out of) it.
//!
//! The read side points at the host filesystem through ordinary `std::io`
//! calls; the write side lands in `Imfs::write_whole_file`.

use std::fs::File;
use std::io::{Read, Write};
use std::path::Path;

use crate::error::{ImfsError, Result};
use crate::state::with_state;

/// Reads `host_path` off the real filesystem and writes its contents into
/// IMFS at `imfs_path`, creating any missing parent directories along the
/// way (mode 0755, per `Imfs::ensure_parent_dirs`).
pub fn load_file(host_path: &Path, imfs_path: &str) -> Result<()> {
    let mut file = File::open(host_path).map_err(|_| ImfsError::NoSuchEntry)?;
    let mut contents = Vec::new();
    file.read_to_end(&mut contents).map_err(|_| ImfsError::InvalidArgument)?;
    with_state(|imfs| imfs.write_whole_file(imfs_path, &contents))
}

/// The mirror of `load_file`: reads `imfs_path` out of IMFS and writes it
/// to a real file at `host_path`, truncating or creating it as needed.
pub fn dump_file(imfs_path: &str, host_path: &Path) -> Result<()> {
    let contents = with_state(|imfs| imfs.read_whole_file(imfs_path))?;
    let mut file = File::create(host_path).map_err(|_| ImfsError::InvalidArgument)?;
    file.write_all(&contents).map_err(|_| ImfsError::InvalidArgument)?;
    Ok(())
}

/// Splits `list` on `:` and `load_file`s each entry into IMFS at the same
/// path it has on the host, skipping entries that don't exist on the host
/// rather than failing the whole batch.
pub fn preloads(list: &str) {
    for host_path in list.split(':').filter(|s| !s.is_empty()) {
        let path = Path::new(host_path);
        if !path.is_file() {
            log::debug!("preloads: skipping missing host file {host_path}");
            continue;
        }
        match load_file(path, host_path) {
            Ok(()) => log::debug!("preloads: loaded {host_path}"),
            Err(e) => log::warn!("preloads: failed to load {host_path}: {e}"),
        }
    }
}

/// Bulk-copies `src_cage`'s descriptor table into `dst_cage`, the public
/// free-function form of `Imfs::copy_fd_tables` used wherever a host
/// embeds this crate to simulate fork-style fd inheritance.
pub fn copy_fd_tables(src_cage: usize, dst_cage: usize) -> Result<()> {
    with_state(|imfs| imfs.copy_fd_tables(src_cage, dst_cage))
}
