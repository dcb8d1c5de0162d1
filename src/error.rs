//! The closed error set every entry point can fail with.

use thiserror::Error;

/// Result alias used throughout the crate's internal (non-syscall) API.
pub type Result<T> = core::result::Result<T, ImfsError>;

#[derive(Error, Debug, Copy, Clone, Eq, PartialEq)]
pub enum ImfsError {
    #[error("no such entry")]
    NoSuchEntry,
    #[error("not a directory")]
    NotADirectory,
    #[error("is a directory")]
    IsADirectory,
    #[error("already exists")]
    AlreadyExists,
    #[error("permission denied")]
    PermissionDenied,
    #[error("out of memory or no space")]
    OutOfSpace,
    #[error("too many open files")]
    TooManyOpenFiles,
    #[error("bad descriptor")]
    BadDescriptor,
    #[error("busy")]
    Busy,
    #[error("invalid argument")]
    InvalidArgument,
    #[error("name too long")]
    NameTooLong,
    #[error("not supported")]
    NotSupported,
}
