//! Process-global singleton.
//!
//! One filesystem instance shared across every cage, reached through a
//! `spin::Once<Mutex<Imfs>>`: `Once` handles one-time lazy construction,
//! `Mutex` gives every call interior mutability without a `&mut` threaded
//! through the whole public surface.

use std::sync::{Mutex, MutexGuard};

use spin::Once;

use crate::fs::Imfs;

static STATE: Once<Mutex<Imfs>> = Once::new();

/// `init()`: zeros all tables, creates the root, installs its
/// `.`/`..`. Must be called exactly once before any other entry point; a
/// second call is a harmless no-op (`Once` only runs the closure the first
/// time).
pub fn init() {
    STATE.call_once(|| Mutex::new(Imfs::new()));
    log::info!("imfs::init() complete");
}

fn lock() -> MutexGuard<'static, Imfs> {
    STATE
        .get()
        .expect("imfs::init() must run before any other imfs call")
        .lock()
        .unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Runs `f` against the global filesystem state under the lock. Callers
/// that need to retry (the pipe busy-wait in `syscall.rs`) must call this
/// once per attempt rather than holding the guard across a spin: holding it
/// while spinning would starve a writer running on another thread.
pub(crate) fn with_state<R>(f: impl FnOnce(&mut Imfs) -> R) -> R {
    let mut guard = lock();
    f(&mut guard)
}
