// src/process/mod.rs

pub mod lifeline;
pub mod liveness;
pub mod watcher;
pub mod worker;

pub use worker::{WorkSignal, Worker};

use crate::config::SupervisorSettings;
use crate::errors::SupervisorError;
use crate::log;
use crate::logger::LogLevel;
use lifeline::Lifeline;
use nix::sys::signal::{kill, Signal};
use nix::sys::wait::{waitpid, WaitPidFlag, WaitStatus};
use nix::unistd::{fork, ForkResult, Pid};
use std::io::Write;
use std::os::unix::net::UnixStream as StdUnixStream;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use watcher::Watcher;

/// Which side of a fork this `Process` handle is standing on. A
/// freshly constructed `Process` is `Uninitialized`; `start()` forks
/// and the surviving parent-side handle becomes `Parent`. `Child` is
/// never observed by calling code — the child side never returns from
/// `start()`, it runs to completion and calls `std::process::exit`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Uninitialized,
    Parent,
    Child,
}

/// A supervised, forked worker process with a bidirectional lifeline
/// back to the process that started it.
///
/// Construct with [`Process::new`], then call `start()`. On success
/// the returned handle is the *parent*-side view: the child runs
/// independently as its own OS process until `work()` returns an
/// error, `stop()` asks it to shut down, or its lifeline is severed
/// (e.g. this process dies).
pub struct Process<W: Worker> {
    name: String,
    worker: Option<W>,
    role: Role,
    start_timeout: Duration,
    stop_timeout: Duration,
    watch_interval: Duration,
    child_pid: Option<Pid>,
    terminate: CancellationToken,
    watcher_task: Option<JoinHandle<()>>,
    outbound: Option<mpsc::UnboundedSender<String>>,
    inbound: Option<mpsc::UnboundedReceiver<watcher::Inbound>>,
}

impl<W: Worker> Process<W> {
    pub fn new(name: impl Into<String>, worker: W, settings: &SupervisorSettings) -> Self {
        Self {
            name: name.into(),
            worker: Some(worker),
            role: Role::Uninitialized,
            start_timeout: settings.start_timeout(),
            stop_timeout: settings.stop_timeout(),
            watch_interval: settings.watch_interval(),
            child_pid: None,
            terminate: CancellationToken::new(),
            watcher_task: None,
            outbound: None,
            inbound: None,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn role(&self) -> Role {
        self.role
    }

    /// Forks a child to run `work()` until shutdown, after completing
    /// the startup handshake over a fresh lifeline.
    ///
    /// `initialize_common` runs independently on each side, immediately
    /// after `fork()` — not before it — so a side effect it has (an fd,
    /// a connection) is established separately by parent and child
    /// rather than shared by being carried across the fork. On the
    /// parent side it's followed by `initialize_parent`; on the child
    /// side, by `initialize_child`. The child must report `alive`
    /// within `start_timeout` or this returns
    /// [`SupervisorError::StartupTimeout`] and the child is killed.
    pub async fn start(mut self) -> Result<Self, SupervisorError> {
        let mut worker = self
            .worker
            .take()
            .expect("Process::start called on an already-started handle");

        let (parent_std, child_std) = StdUnixStream::pair()?;

        // Safety: the child branch never touches this process's live,
        // multi-threaded Tokio runtime; it builds its own from scratch
        // before doing any async work, which is the documented safe
        // pattern for forking out of an async process.
        match unsafe { fork() }
            .map_err(|e| SupervisorError::Io(std::io::Error::from_raw_os_error(e as i32)))?
        {
            ForkResult::Child => {
                drop(parent_std);
                run_child(worker, child_std, self.watch_interval);
            }
            ForkResult::Parent { child } => {
                drop(child_std);

                if let Err(e) = worker.initialize_common() {
                    let _ = kill(child, Signal::SIGKILL);
                    let _ = waitpid(child, None);
                    finalize_after_start_failure(&mut worker);
                    return Err(SupervisorError::StartupError(e.to_string()));
                }

                if let Err(e) = worker.initialize_parent() {
                    let _ = kill(child, Signal::SIGKILL);
                    let _ = waitpid(child, None);
                    finalize_after_start_failure(&mut worker);
                    return Err(SupervisorError::StartupError(e.to_string()));
                }

                parent_std.set_nonblocking(true)?;
                let tokio_stream = tokio::net::UnixStream::from_std(parent_std)?;
                let mut lifeline = Lifeline::new(tokio_stream);

                match tokio::time::timeout(self.start_timeout, lifeline.recv()).await {
                    Ok(Ok(Some(ref line))) if line == lifeline::ALIVE => {}
                    Ok(Ok(Some(line))) => {
                        let _ = kill(child, Signal::SIGKILL);
                        let _ = waitpid(child, None);
                        finalize_after_start_failure(&mut worker);
                        let payload = line.strip_prefix("error ").unwrap_or(&line).to_string();
                        return Err(SupervisorError::StartupError(payload));
                    }
                    Ok(Ok(None)) => {
                        let _ = waitpid(child, None);
                        finalize_after_start_failure(&mut worker);
                        return Err(SupervisorError::StartupError(
                            "child hung up before signaling alive".into(),
                        ));
                    }
                    Ok(Err(e)) => {
                        let _ = kill(child, Signal::SIGKILL);
                        let _ = waitpid(child, None);
                        finalize_after_start_failure(&mut worker);
                        return Err(e);
                    }
                    Err(_elapsed) => {
                        let _ = kill(child, Signal::SIGKILL);
                        let _ = waitpid(child, None);
                        finalize_after_start_failure(&mut worker);
                        return Err(SupervisorError::StartupTimeout);
                    }
                }

                log!(LogLevel::Info, "process '{}': child {} is alive", self.name, child);

                let (watcher, inbound_rx, outbound_tx) =
                    Watcher::new(lifeline, self.terminate.clone(), None, self.watch_interval);
                let watcher_task = tokio::spawn(watcher.run());

                self.role = Role::Parent;
                self.child_pid = Some(child);
                self.watcher_task = Some(watcher_task);
                self.inbound = Some(inbound_rx);
                self.outbound = Some(outbound_tx);
                self.worker = Some(worker);
                Ok(self)
            }
        }
    }

    /// PID of the forked child, once `start()` has returned
    /// successfully. Exposed for diagnostics and tests; `is_alive()`
    /// remains the right call for a liveness check.
    pub fn pid(&self) -> Option<i32> {
        self.child_pid.map(Pid::as_raw)
    }

    /// `true` if the child PID is still alive. Any probe failure,
    /// including a permission error, is treated as "not alive" (see
    /// [`liveness::parent_is_alive`]'s doc comment for why).
    pub fn is_alive(&self) -> bool {
        let Some(pid) = self.child_pid else {
            return false;
        };
        match waitpid(pid, Some(WaitPidFlag::WNOHANG)) {
            Ok(WaitStatus::StillAlive) => true,
            Ok(_) => false,
            Err(_) => false,
        }
    }

    /// Waits up to `timeout` for the child to exit, without sending
    /// any shutdown request of its own. Returns `true` if it observed
    /// the exit in time.
    pub async fn join(&mut self, timeout: Duration) -> bool {
        let Some(pid) = self.child_pid else {
            return true;
        };
        wait_exit(pid, timeout).await
    }

    /// Requests a graceful shutdown, escalating to `SIGTERM` then
    /// `SIGKILL` if the child doesn't exit in time.
    ///
    /// `stop_timeout` is deliberately applied up to three times: once
    /// for the graceful request, once after `SIGTERM`, and once more
    /// implicit in the final `SIGKILL` wait — so worst-case shutdown
    /// latency is bounded at `3 * stop_timeout`, not `stop_timeout`.
    pub async fn stop(&mut self) -> Result<(), SupervisorError> {
        let pid = self.child_pid.ok_or(SupervisorError::StopFailed)?;

        if let Some(outbound) = &self.outbound {
            let _ = outbound.send("terminate".to_string());
        }

        if !wait_exit(pid, self.stop_timeout).await {
            log!(LogLevel::Warn, "process '{}': escalating to SIGTERM", self.name);
            let _ = kill(pid, Signal::SIGTERM);

            if !wait_exit(pid, self.stop_timeout).await {
                log!(LogLevel::Warn, "process '{}': escalating to SIGKILL", self.name);
                let _ = kill(pid, Signal::SIGKILL);

                if !wait_exit(pid, self.stop_timeout).await {
                    return Err(SupervisorError::StopFailed);
                }
            }
        }

        self.terminate.cancel();
        if let Some(handle) = self.watcher_task.take() {
            let _ = handle.await;
        }

        if let Some(worker) = self.worker.as_mut() {
            if let Err(e) = worker.finalize_parent() {
                log!(LogLevel::Warn, "process '{}': finalize_parent: {}", self.name, e);
            }
            if let Err(e) = worker.finalize_common() {
                log!(LogLevel::Warn, "process '{}': finalize_common: {}", self.name, e);
            }
        }

        Ok(())
    }

    /// Drains any non-control records the watcher has pulled off the
    /// lifeline since the last call. Non-blocking.
    pub fn try_recv_inbound(&mut self) -> Option<String> {
        self.inbound.as_mut()?.try_recv().ok()
    }
}

async fn wait_exit(pid: Pid, timeout: Duration) -> bool {
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        match waitpid(pid, Some(WaitPidFlag::WNOHANG)) {
            Ok(WaitStatus::StillAlive) => {
                if tokio::time::Instant::now() >= deadline {
                    return false;
                }
                tokio::time::sleep(Duration::from_millis(20)).await;
            }
            Ok(_) => return true,
            Err(nix::errno::Errno::ECHILD) => return true,
            Err(_) => return false,
        }
    }
}

/// Runs the documented finalizer sequence (`finalize_parent` then
/// `finalize_common`) on a `start()` path that is about to fail.
/// Failures are logged, never escalated: the startup error that caused
/// the abort is always what's reported to the caller (spec.md §7:
/// finalizer failures "do not mask the primary error").
fn finalize_after_start_failure<W: Worker>(worker: &mut W) {
    if let Err(e) = worker.finalize_parent() {
        log!(LogLevel::Warn, "finalize_parent after failed start: {}", e);
    }
    if let Err(e) = worker.finalize_common() {
        log!(LogLevel::Warn, "finalize_common after failed start: {}", e);
    }
}

fn write_blocking_line(stream: &mut StdUnixStream, line: &str) -> std::io::Result<()> {
    if line.len() > lifeline::MAX_RECORD_LEN {
        return Err(std::io::Error::new(
            std::io::ErrorKind::InvalidInput,
            "lifeline record exceeds the wire cap",
        ));
    }
    stream.write_all(line.as_bytes())?;
    stream.write_all(b"\n")?;
    stream.flush()
}

/// The child side of `start()`. Runs the full child lifecycle inline
/// and never returns: it always ends in `std::process::exit`.
fn run_child<W: Worker>(mut worker: W, mut std_stream: StdUnixStream, watch_interval: Duration) -> ! {
    if let Err(e) = worker.initialize_common() {
        let _ = write_blocking_line(&mut std_stream, &format!("error {}", e));
        std::process::exit(1);
    }

    if let Err(e) = worker.initialize_child() {
        let _ = write_blocking_line(&mut std_stream, &format!("error {}", e));
        std::process::exit(1);
    }

    if write_blocking_line(&mut std_stream, lifeline::ALIVE).is_err() {
        std::process::exit(1);
    }

    let rt = match tokio::runtime::Builder::new_current_thread().enable_all().build() {
        Ok(rt) => rt,
        Err(_) => std::process::exit(1),
    };

    let parent_pid = nix::unistd::getppid();
    let terminate = CancellationToken::new();

    let exit_code = rt.block_on(async move {
        if std_stream.set_nonblocking(true).is_err() {
            return 1;
        }
        let tokio_stream = match tokio::net::UnixStream::from_std(std_stream) {
            Ok(s) => s,
            Err(_) => return 1,
        };
        let lifeline = Lifeline::new(tokio_stream);
        let (watcher, _inbound_rx, _outbound_tx) =
            Watcher::new(lifeline, terminate.clone(), Some(parent_pid), watch_interval);
        let watcher_handle = tokio::spawn(watcher.run());

        let terminate_for_work = terminate.clone();
        let work_result = tokio::task::spawn_blocking(move || {
            let mut result = Ok(());
            while !terminate_for_work.is_cancelled() {
                match worker.work() {
                    Ok(WorkSignal::Continue) => continue,
                    Ok(WorkSignal::Stop) => break,
                    Err(e) => {
                        result = Err(e);
                        break;
                    }
                }
            }
            (worker, result)
        })
        .await;

        terminate.cancel();
        let _ = watcher_handle.await;

        match work_result {
            Ok((mut worker, Ok(()))) => {
                let finalize = worker
                    .finalize_child()
                    .and_then(|_| worker.finalize_common());
                match finalize {
                    Ok(()) => 0,
                    Err(e) => {
                        log!(LogLevel::Error, "finalize failed: {}", e);
                        3
                    }
                }
            }
            Ok((mut worker, Err(e))) => {
                log!(LogLevel::Error, "work() failed: {}", e);
                let _ = worker.finalize_child();
                let _ = worker.finalize_common();
                2
            }
            Err(e) => {
                log!(LogLevel::Error, "work loop task panicked: {}", e);
                2
            }
        }
    });

    std::process::exit(exit_code);
}
