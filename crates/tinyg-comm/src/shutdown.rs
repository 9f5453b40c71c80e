//! Process-exit teardown
//!
//! The first successful open anywhere in the process installs a C `atexit`
//! hook. At exit the hook closes every port of every registry still alive, so
//! device handles are released even when the owning driver was leaked.

use std::sync::{Arc, Mutex, Once, TryLockError, Weak};

use crate::error::{CommError, Result};
use crate::registry::PortRegistry;

static HOOK: Once = Once::new();
static REGISTRIES: Mutex<Vec<Weak<Mutex<PortRegistry>>>> = Mutex::new(Vec::new());

/// Add a registry to the exit-time close list and install the hook once
pub(crate) fn track(registry: &Arc<Mutex<PortRegistry>>) {
    {
        let mut list = REGISTRIES.lock().unwrap_or_else(|e| e.into_inner());
        list.retain(|weak| weak.strong_count() > 0);
        if !list.iter().any(|weak| weak.as_ptr() == Arc::as_ptr(registry)) {
            list.push(Arc::downgrade(registry));
        }
    }

    HOOK.call_once(|| {
        // SAFETY: `close_at_exit` is a plain extern "C" fn that never unwinds.
        let rc = unsafe { libc::atexit(close_at_exit) };
        if rc != 0 {
            tracing::warn!("could not register exit hook, ports will not be closed at exit");
        }
    });
}

/// Whether the exit hook has been installed in this process
pub fn hook_installed() -> bool {
    HOOK.is_completed()
}

/// Close every port of one registry without waiting for its lock
///
/// Gives [`CommError::Busy`] when another thread, or the call the exit
/// interrupted, holds the registry.
pub fn release_registry(registry: &Mutex<PortRegistry>) -> Result<usize> {
    let mut reg = match registry.try_lock() {
        Ok(reg) => reg,
        Err(TryLockError::Poisoned(e)) => e.into_inner(),
        Err(TryLockError::WouldBlock) => return Err(CommError::Busy),
    };
    Ok(reg.release_all())
}

/// Close every port of every tracked registry
///
/// Busy registries are skipped. Returns the number of ports closed.
pub fn release_tracked() -> usize {
    let list = match REGISTRIES.try_lock() {
        Ok(list) => list,
        Err(TryLockError::Poisoned(e)) => e.into_inner(),
        Err(TryLockError::WouldBlock) => return 0,
    };

    let mut released = 0;
    for registry in list.iter().filter_map(Weak::upgrade) {
        match release_registry(&registry) {
            Ok(closed) => released += closed,
            Err(e) => tracing::debug!("exit hook skipped a registry: {}", e),
        }
    }
    released
}

extern "C" fn close_at_exit() {
    let released = release_tracked();
    tracing::debug!("exit hook closed {} ports", released);
}
