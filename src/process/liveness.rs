// src/process/liveness.rs

use nix::errno::Errno;
use nix::sys::signal::{kill, Signal};
use nix::unistd::Pid;

/// Probes whether `pid` still belongs to the process that started us,
/// by sending signal 0 (no-op, existence check only).
///
/// Unlike a plain "does this PID exist" check, this treats *every*
/// failure — including `EPERM` — as "not alive". A PID can be reused
/// by an unrelated process between our fork and this probe; if that
/// process happens to run as a different user, `kill(pid, 0)` fails
/// with `EPERM` even though *something* is alive at that PID. Reading
/// `EPERM` as "still my parent" would make that race read as "parent
/// is alive" when it is not. Reading it as "dead" is the safe
/// direction for a liveness probe whose only consequence is tearing
/// down a child that has lost its parent.
pub fn parent_is_alive(pid: Pid) -> bool {
    matches!(kill(pid, None::<Signal>), Ok(()))
}

/// Distinguishes "doesn't exist" from other probe failures, for
/// callers that want the more detailed `io::Result<bool>` shape (used
/// by diagnostics, not by the watcher's termination decision).
pub fn probe(pid: Pid) -> Result<bool, Errno> {
    match kill(pid, None::<Signal>) {
        Ok(()) => Ok(true),
        Err(Errno::ESRCH) => Ok(false),
        Err(Errno::EPERM) => Ok(false),
        Err(other) => Err(other),
    }
}
