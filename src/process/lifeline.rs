// src/process/lifeline.rs

use crate::errors::SupervisorError;
use tokio::io::{
    AsyncBufReadExt, AsyncWriteExt, BufReader,
};
use tokio::net::unix::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::UnixStream;

/// Maximum size, in bytes, of a single lifeline record's payload (not
/// counting the trailing newline added on the wire).
pub const MAX_RECORD_LEN: usize = 1024;

/// The sentinel the child sends once its startup hooks have succeeded.
pub const ALIVE: &str = "alive";

/// One side of a process lifeline: a newline-terminated UTF-8 record
/// stream over a `UnixStream`. Only the watcher task is meant to hold
/// a `Lifeline` at a time, per the single-owner invariant.
pub struct Lifeline {
    reader: BufReader<OwnedReadHalf>,
    writer: OwnedWriteHalf,
}

impl Lifeline {
    pub fn new(stream: UnixStream) -> Self {
        let (read_half, writer) = stream.into_split();
        Self {
            reader: BufReader::new(read_half),
            writer,
        }
    }

    /// Sends a single record. `line` must not itself contain `\n`;
    /// the record is rejected if its payload alone (not counting the
    /// added newline) would exceed [`MAX_RECORD_LEN`].
    pub async fn send(&mut self, line: &str) -> Result<(), SupervisorError> {
        if line.len() > MAX_RECORD_LEN {
            return Err(SupervisorError::MessageTooLarge {
                len: line.len(),
                max: MAX_RECORD_LEN,
            });
        }
        self.writer.write_all(line.as_bytes()).await?;
        self.writer.write_all(b"\n").await?;
        self.writer.flush().await?;
        Ok(())
    }

    /// Reads one record. Returns `Ok(None)` on a clean hangup (EOF
    /// with no partial data), the usual "peer is gone" signal the
    /// watcher treats as "parent/child has exited".
    pub async fn recv(&mut self) -> Result<Option<String>, SupervisorError> {
        let mut line = String::new();
        let n = self.reader.read_line(&mut line).await?;
        if n == 0 {
            return Ok(None);
        }
        if line.ends_with('\n') {
            line.pop();
        }
        if line.len() > MAX_RECORD_LEN {
            return Err(SupervisorError::MessageTooLarge {
                len: line.len(),
                max: MAX_RECORD_LEN,
            });
        }
        Ok(Some(line))
    }
}
