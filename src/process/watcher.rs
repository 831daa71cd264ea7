// src/process/watcher.rs

use crate::log;
use crate::logger::LogLevel;
use crate::process::lifeline::Lifeline;
use crate::process::liveness::parent_is_alive;
use nix::unistd::Pid;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// A message the watcher pulled off the lifeline that isn't a control
/// sentinel it handles itself (currently only `terminate`). Forwarded
/// to whoever asked for inbound traffic.
pub type Inbound = String;

/// Handle the watcher's owner keeps to ask it to write a record on
/// its behalf, since the watcher is the lifeline's sole owner.
pub type OutboundSender = mpsc::UnboundedSender<String>;

/// The sole reader/writer of one side's [`Lifeline`] for the lifetime
/// of a supervised process.
///
/// Watches for three things, whichever happens first:
/// - the peer hanging up (lifeline read returns EOF)
/// - a `terminate` record arriving from the peer
/// - (child side only) the parent PID disappearing, polled every
///   `watch_interval`
///
/// Any of the three sets `terminate` and ends the watch loop. Any
/// other inbound record is forwarded on `inbound` for the caller to
/// act on. Because the watcher alone owns the lifeline, a caller that
/// wants to *send* something (the parent requesting a graceful stop)
/// does so through `outbound` rather than reaching into the lifeline
/// directly.
pub struct Watcher {
    lifeline: Lifeline,
    terminate: CancellationToken,
    parent_pid: Option<Pid>,
    watch_interval: Duration,
    inbound: mpsc::UnboundedSender<Inbound>,
    outbound: mpsc::UnboundedReceiver<String>,
}

impl Watcher {
    pub fn new(
        lifeline: Lifeline,
        terminate: CancellationToken,
        parent_pid: Option<Pid>,
        watch_interval: Duration,
    ) -> (Self, mpsc::UnboundedReceiver<Inbound>, OutboundSender) {
        let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();
        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
        (
            Self {
                lifeline,
                terminate,
                parent_pid,
                watch_interval,
                inbound: inbound_tx,
                outbound: outbound_rx,
            },
            inbound_rx,
            outbound_tx,
        )
    }

    pub async fn run(mut self) {
        loop {
            if self.terminate.is_cancelled() {
                return;
            }

            let poll_parent = self.parent_pid.is_some();
            tokio::select! {
                _ = self.terminate.cancelled() => {
                    return;
                }
                outgoing = self.outbound.recv() => {
                    match outgoing {
                        Some(line) => {
                            if let Err(err) = self.lifeline.send(&line).await {
                                log!(LogLevel::Error, "lifeline: send failed: {}", err);
                                self.terminate.cancel();
                                return;
                            }
                        }
                        None => {
                            // Owner dropped the sender; nothing left to relay,
                            // but reads still matter, so keep watching.
                        }
                    }
                }
                line = self.lifeline.recv() => {
                    match line {
                        Ok(Some(record)) if record == "terminate" => {
                            log!(LogLevel::Debug, "lifeline: terminate received");
                            self.terminate.cancel();
                            return;
                        }
                        Ok(Some(record)) if record == crate::process::lifeline::ALIVE => {
                            // Stray alive re-send; not a control signal once the
                            // handshake has already completed.
                            continue;
                        }
                        Ok(Some(record)) => {
                            let _ = self.inbound.send(record);
                        }
                        Ok(None) => {
                            log!(LogLevel::Debug, "lifeline: peer hung up");
                            self.terminate.cancel();
                            return;
                        }
                        Err(err) => {
                            log!(LogLevel::Error, "lifeline: {}", err);
                            self.terminate.cancel();
                            return;
                        }
                    }
                }
                _ = tokio::time::sleep(self.watch_interval), if poll_parent => {
                    if let Some(pid) = self.parent_pid {
                        if !parent_is_alive(pid) {
                            log!(LogLevel::Warn, "lifeline: parent {} no longer alive", pid);
                            self.terminate.cancel();
                            return;
                        }
                    }
                }
            }
        }
    }
}
