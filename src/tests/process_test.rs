// src/tests/process_test.rs

use crate::config::SupervisorSettings;
use crate::errors::SupervisorError;
use crate::process::lifeline::Lifeline;
use crate::process::liveness::{parent_is_alive, probe};
use crate::process::{Process, WorkSignal, Worker};
use std::time::{Duration, Instant};

/// Child `work` sleeps 200ms then returns `Stop`. `start` should
/// return well before the sleep elapses (the handshake only waits for
/// `alive`, sent before the first `work` call); `join` should observe
/// exit 200-400ms later.
struct SleepOnceWorker;

impl Worker for SleepOnceWorker {
    fn work(&mut self) -> Result<WorkSignal, SupervisorError> {
        std::thread::sleep(Duration::from_millis(200));
        Ok(WorkSignal::Stop)
    }
}

#[tokio::test(flavor = "current_thread")]
async fn basic_lifecycle_start_then_join() {
    let settings = SupervisorSettings::default();
    let start = Instant::now();

    let mut proc = Process::new("basic-lifecycle", SleepOnceWorker, &settings)
        .start()
        .await
        .expect("start should succeed");

    assert!(
        start.elapsed() < Duration::from_millis(150),
        "start() should not wait on work(); took {:?}",
        start.elapsed()
    );
    assert!(proc.is_alive());

    let exited = proc.join(Duration::from_millis(800)).await;
    let elapsed = start.elapsed();

    assert!(exited, "join should observe the child's exit");
    assert!(
        elapsed >= Duration::from_millis(180) && elapsed <= Duration::from_millis(600),
        "join returned after an unexpected delay: {:?}",
        elapsed
    );
    assert!(!proc.is_alive());
}

/// `initialize_child` fails; `start` must surface the failure, carrying
/// the hook's message.
struct FailInitChildWorker;

impl Worker for FailInitChildWorker {
    fn initialize_child(&mut self) -> Result<(), SupervisorError> {
        Err(SupervisorError::StartupError("oops init".into()))
    }

    fn work(&mut self) -> Result<WorkSignal, SupervisorError> {
        Ok(WorkSignal::Stop)
    }
}

#[tokio::test(flavor = "current_thread")]
async fn initializer_failure_surfaces_to_start() {
    let settings = SupervisorSettings::default();
    let err = Process::new("init-fails", FailInitChildWorker, &settings)
        .start()
        .await
        .expect_err("start should fail when initialize_child fails");

    match err {
        SupervisorError::StartupError(msg) => {
            assert!(msg.contains("oops init"), "unexpected message: {}", msg)
        }
        other => panic!("expected StartupError, got {:?}", other),
    }
}

/// `finalize_child` fails after five successful `work` iterations.
/// `start` still succeeds; the process still reaches a clean exit
/// either way (the finalizer failure is logged locally rather than
/// raised from `stop`/`join`, since the lifeline is already torn down
/// by the time finalizers run).
struct FinalizeFailWorker {
    iterations: u32,
}

impl Worker for FinalizeFailWorker {
    fn work(&mut self) -> Result<WorkSignal, SupervisorError> {
        self.iterations += 1;
        std::thread::sleep(Duration::from_millis(10));
        if self.iterations >= 5 {
            Ok(WorkSignal::Stop)
        } else {
            Ok(WorkSignal::Continue)
        }
    }

    fn finalize_child(&mut self) -> Result<(), SupervisorError> {
        Err(SupervisorError::ProtocolViolation("oops final".into()))
    }
}

#[tokio::test(flavor = "current_thread")]
async fn finalizer_failure_still_exits() {
    let settings = SupervisorSettings::default();
    let mut proc = Process::new(
        "finalizer-fails",
        FinalizeFailWorker { iterations: 0 },
        &settings,
    )
    .start()
    .await
    .expect("start should succeed despite the later finalizer failure");

    assert!(proc.join(Duration::from_secs(2)).await);
    assert!(!proc.is_alive());
}

/// `parent_is_alive` must read a PID as dead once the process holding
/// it has exited, which is exactly the probe the watcher relies on to
/// notice a dead parent within `watch_interval`.
#[test]
fn parent_is_alive_false_once_process_exits() {
    let mut child = std::process::Command::new("true")
        .spawn()
        .expect("spawn `true`");
    let pid = nix::unistd::Pid::from_raw(child.id() as i32);
    child.wait().expect("wait for child exit");

    assert!(!parent_is_alive(pid));
    assert_eq!(probe(pid), Ok(false));
}

/// Boundary: a lifeline record with a 1024-byte payload is accepted;
/// 1025 bytes is rejected with `MessageTooLarge`. The cap applies to
/// the payload alone, not the payload plus its trailing newline.
#[tokio::test(flavor = "current_thread")]
async fn lifeline_message_size_boundary() {
    let (a, b) = std::os::unix::net::UnixStream::pair().expect("socketpair");
    a.set_nonblocking(true).expect("nonblocking a");
    b.set_nonblocking(true).expect("nonblocking b");

    let mut sender = Lifeline::new(tokio::net::UnixStream::from_std(a).expect("wrap a"));
    let mut receiver = Lifeline::new(tokio::net::UnixStream::from_std(b).expect("wrap b"));

    let exactly_1024 = "x".repeat(1024);
    sender
        .send(&exactly_1024)
        .await
        .expect("1024-byte payload should be accepted");
    let received = receiver
        .recv()
        .await
        .expect("recv should succeed")
        .expect("recv should yield a record, not EOF");
    assert_eq!(received, exactly_1024);

    let too_big = "x".repeat(1025);
    let err = sender
        .send(&too_big)
        .await
        .expect_err("1025-byte payload should be rejected");
    assert!(matches!(err, SupervisorError::MessageTooLarge { .. }));
}

/// Scenario 4 (spec.md §8): when the parent OS process dies, the child
/// notices via its watcher's periodic `parent_is_alive` poll and exits
/// within `watch_interval + epsilon`. Exercising this for real means
/// killing an actual parent out from under a real child, so this test
/// forks a throwaway "surrogate parent" that itself runs
/// `Process::start`, hands the resulting grandchild's PID back over a
/// socket pair, and then exits without calling `stop()` — the "parent
/// work calls exit()" case spec.md describes. The test process then
/// polls the grandchild's liveness directly, the same way
/// `parent_is_alive_false_once_process_exits` above does.
struct LoopForeverWorker;

impl Worker for LoopForeverWorker {
    fn work(&mut self) -> Result<WorkSignal, SupervisorError> {
        std::thread::sleep(Duration::from_millis(20));
        Ok(WorkSignal::Continue)
    }
}

#[test]
fn parent_death_kills_child_within_watch_interval() {
    use std::io::{BufRead, BufReader, Write};
    use std::os::unix::net::UnixStream;

    let settings = SupervisorSettings {
        start_timeout_ms: 5_000,
        stop_timeout_ms: 5_000,
        watch_interval_ms: 150,
    };

    let (mut test_end, surrogate_end) = UnixStream::pair().expect("socketpair");

    match unsafe { nix::unistd::fork() }.expect("fork surrogate parent") {
        nix::unistd::ForkResult::Child => {
            drop(test_end);
            let mut surrogate_end = surrogate_end;

            let rt = tokio::runtime::Builder::new_current_thread()
                .enable_all()
                .build()
                .expect("surrogate runtime");
            let pid = rt.block_on(async {
                let proc = Process::new("surrogate-child", LoopForeverWorker, &settings)
                    .start()
                    .await
                    .expect("surrogate start");
                proc.pid().expect("started process has a pid")
            });

            let _ = writeln!(surrogate_end, "{}", pid);
            let _ = surrogate_end.flush();
            // Die without calling stop(): the grandchild's watcher is
            // all that's left to notice its parent is gone.
            std::process::exit(0);
        }
        nix::unistd::ForkResult::Parent { child: surrogate_pid } => {
            drop(surrogate_end);

            let mut line = String::new();
            BufReader::new(&mut test_end)
                .read_line(&mut line)
                .expect("read grandchild pid");
            let grandchild_pid =
                nix::unistd::Pid::from_raw(line.trim().parse().expect("pid is a number"));

            nix::sys::wait::waitpid(surrogate_pid, None).expect("reap surrogate");

            let deadline = Instant::now() + Duration::from_millis(150) + Duration::from_millis(350);
            let mut observed_dead = false;
            while Instant::now() < deadline {
                if !parent_is_alive(grandchild_pid) {
                    observed_dead = true;
                    break;
                }
                std::thread::sleep(Duration::from_millis(20));
            }

            if !observed_dead {
                let _ = nix::sys::signal::kill(grandchild_pid, nix::sys::signal::Signal::SIGKILL);
            }
            assert!(
                observed_dead,
                "grandchild should become unreachable within watch_interval + epsilon \
                 after its parent exits"
            );
        }
    }
}
