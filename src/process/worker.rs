// src/process/worker.rs

use crate::errors::SupervisorError;

/// What the child's main loop does after one `work()` call returns.
///
/// `Continue` means keep looping, `Stop` begins finalization without
/// treating the return as a failure. An `Err` from `work()` also ends
/// the loop, but is reported as a failed run rather than a clean one
/// (see `finalize_child`'s unconditional invocation either way).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkSignal {
    Continue,
    Stop,
}

/// The cooperative hooks a supervised process body implements.
///
/// `work` is the only hook a caller is required to override; it runs
/// on the child side after the startup handshake completes and after
/// `initialize_common`/`initialize_child` have both succeeded. The
/// remaining hooks default to no-ops, matching a plain function body
/// with nothing to set up or tear down.
///
/// All hooks run synchronously and are called from within the child's
/// own single-threaded runtime (see [`crate::process::Process::start`]),
/// so they may perform blocking setup without stalling anything else.
pub trait Worker: Send + 'static {
    /// Runs on both sides immediately after `fork()`, before role-
    /// specific initialization. Typically used for state that must be
    /// identical on both sides (shared counters, log context).
    fn initialize_common(&mut self) -> Result<(), SupervisorError> {
        Ok(())
    }

    /// Runs on the parent side only, after `initialize_common`.
    fn initialize_parent(&mut self) -> Result<(), SupervisorError> {
        Ok(())
    }

    /// Runs on the child side only, after `initialize_common` and
    /// before the first `work` call.
    fn initialize_child(&mut self) -> Result<(), SupervisorError> {
        Ok(())
    }

    /// The child's main body. Called repeatedly until it returns
    /// `Ok(WorkSignal::Stop)`, errors, or the terminate flag is
    /// observed; a single call should do one unit of work and return
    /// promptly so the watcher gets a chance to notice shutdown
    /// requests between calls.
    fn work(&mut self) -> Result<WorkSignal, SupervisorError>;

    /// Runs on the child side only, once, after the terminate flag is
    /// observed and before `finalize_common`.
    fn finalize_child(&mut self) -> Result<(), SupervisorError> {
        Ok(())
    }

    /// Runs on the parent side only, once `stop`/`join` has observed
    /// the child's exit, before `finalize_common`.
    fn finalize_parent(&mut self) -> Result<(), SupervisorError> {
        Ok(())
    }

    /// Runs on both sides as the very last step of shutdown.
    fn finalize_common(&mut self) -> Result<(), SupervisorError> {
        Ok(())
    }
}
