// src/errors.rs

use dusa_collection_utils::core::errors::{ErrorArrayItem, Errors as CoreErrors};
use std::fmt;

/// Errors raised by the process supervisor: startup handshake, the
/// watcher task, and the shutdown protocol.
#[derive(Debug)]
pub enum SupervisorError {
    /// The child did not report "alive" within `start_timeout`.
    StartupTimeout,
    /// The child's `initialize_common`/`initialize_child` hook returned
    /// an error before the handshake completed; carries whatever the
    /// hook reported.
    StartupError(String),
    /// `stop()` exhausted its escalation budget (graceful request,
    /// signal escalation, and `join`) without observing exit.
    StopFailed,
    /// A lifeline record exceeded the 1024-byte wire cap.
    MessageTooLarge { len: usize, max: usize },
    /// The lifeline socket produced something other than a
    /// newline-terminated UTF-8 record.
    ProtocolViolation(String),
    /// Lifeline I/O failed for a reason other than the above.
    Io(std::io::Error),
}

impl fmt::Display for SupervisorError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SupervisorError::StartupTimeout => {
                write!(f, "child did not signal alive before start_timeout elapsed")
            }
            SupervisorError::StartupError(msg) => write!(f, "startup hook failed: {}", msg),
            SupervisorError::StopFailed => {
                write!(f, "process did not exit within the stop escalation budget")
            }
            SupervisorError::MessageTooLarge { len, max } => {
                write!(f, "lifeline record of {} bytes exceeds the {}-byte cap", len, max)
            }
            SupervisorError::ProtocolViolation(reason) => {
                write!(f, "lifeline protocol violation: {}", reason)
            }
            SupervisorError::Io(err) => write!(f, "lifeline I/O error: {}", err),
        }
    }
}

impl std::error::Error for SupervisorError {}

impl From<std::io::Error> for SupervisorError {
    fn from(err: std::io::Error) -> Self {
        SupervisorError::Io(err)
    }
}

impl From<SupervisorError> for ErrorArrayItem {
    fn from(err: SupervisorError) -> Self {
        ErrorArrayItem::new(CoreErrors::GeneralError, err.to_string())
    }
}

/// Errors raised by the queue bridge: the relay task and the
/// `Putter`/`Getter` client endpoints.
#[derive(Debug)]
pub enum BridgeError {
    /// A request or reply frame exceeded the negotiated size limit.
    MessageTooLarge { len: usize, max: usize },
    /// A syscall was interrupted (`EINTR`) more than the retry cap
    /// allows; the caller gave up, not the peer.
    TransportInterrupted,
    /// The transport failed in a way retrying cannot fix (connection
    /// reset, broken pipe, address unreachable, ...).
    TransportFatal(std::io::Error),
    /// A `Getter` issued a second request while the first was still
    /// unanswered, or a reply arrived out of turn.
    ProtocolViolation(String),
    /// The address file for a channel could not be located or parsed.
    Discovery(String),
    /// MessagePack encode/decode failure.
    Codec(String),
}

impl fmt::Display for BridgeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BridgeError::MessageTooLarge { len, max } => {
                write!(f, "frame of {} bytes exceeds the {}-byte limit", len, max)
            }
            BridgeError::TransportInterrupted => {
                write!(f, "transport retry budget exhausted after repeated EINTR")
            }
            BridgeError::TransportFatal(err) => write!(f, "transport failed: {}", err),
            BridgeError::ProtocolViolation(reason) => {
                write!(f, "REQ/REP protocol violation: {}", reason)
            }
            BridgeError::Discovery(reason) => write!(f, "address discovery failed: {}", reason),
            BridgeError::Codec(reason) => write!(f, "message codec error: {}", reason),
        }
    }
}

impl std::error::Error for BridgeError {}

impl From<std::io::Error> for BridgeError {
    fn from(err: std::io::Error) -> Self {
        if matches!(err.kind(), std::io::ErrorKind::Interrupted) {
            BridgeError::TransportInterrupted
        } else {
            BridgeError::TransportFatal(err)
        }
    }
}

impl From<BridgeError> for ErrorArrayItem {
    fn from(err: BridgeError) -> Self {
        ErrorArrayItem::new(CoreErrors::GeneralError, err.to_string())
    }
}
