//! Open-flag bits, `lseek` whence constants, and permission bits.

use bitflags::bitflags;

bitflags! {
    pub struct OFlag: i32 {
        const O_RDONLY    = 0x0000;
        const O_WRONLY    = 0x0001;
        const O_RDWR      = 0x0002;
        const O_ACCMODE   = 0x0003;
        const O_CREAT     = 0x0040;
        const O_EXCL      = 0x0080;
        const O_DIRECTORY = 0x0200;
    }
}

impl OFlag {
    /// Whether these flags require the node to be other-readable at open time.
    pub fn wants_read(self) -> bool {
        let acc = self.bits() & Self::O_ACCMODE.bits();
        acc == Self::O_RDONLY.bits() || acc == Self::O_RDWR.bits()
    }

    /// Whether these flags require the node to be other-writable at open time.
    pub fn wants_write(self) -> bool {
        let acc = self.bits() & Self::O_ACCMODE.bits();
        acc == Self::O_WRONLY.bits() || acc == Self::O_RDWR.bits()
    }
}

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum Whence {
    Set,
    Cur,
    End,
    /// Rejected: the chunked model has no hole representation.
    Hole,
    Data,
}

bitflags! {
    /// Permission bits, independent of the node's type tag. A node's `mode`
    /// is POSIX permission bits; the type tag lives separately as a
    /// `NodeKind` discriminant (see node.rs) rather than packed into the
    /// same bitfield.
    pub struct Mode: u32 {
        const OWNER_R = 0o400;
        const OWNER_W = 0o200;
        const OWNER_X = 0o100;
        const GROUP_R = 0o040;
        const GROUP_W = 0o020;
        const GROUP_X = 0o010;
        const OTHER_R = 0o004;
        const OTHER_W = 0o002;
        const OTHER_X = 0o001;
    }
}

/// Sentinel `dirfd` meaning "resolve relative paths against the cage's
/// current working directory" rather than an open directory descriptor.
pub const AT_FDCWD: i32 = -100;

/// `fcntl` operation: return the descriptor's open flags. The only
/// operation this core implements.
pub const F_GETFL: i32 = 3;

pub fn default_dir_mode() -> Mode {
    Mode::from_bits_truncate(0o755)
}

pub fn default_file_mode() -> Mode {
    Mode::from_bits_truncate(0o644)
}
