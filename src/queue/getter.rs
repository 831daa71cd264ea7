// src/queue/getter.rs

use crate::errors::BridgeError;
use serde::de::DeserializeOwned;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::Mutex;

use super::discovery;
use super::wire;

/// Consumer-side state behind the single mutex that enforces strict
/// REQ/REP alternation: `get`/`get_nowait` hold this lock for their
/// entire send-then-receive critical section, so only one request can
/// ever be outstanding on this connection at a time.
struct Inner {
    stream: TcpStream,
    /// True from the moment a request frame is sent until its reply
    /// has been read. A `get_nowait` that times out leaves this set,
    /// so the next call waits for the outstanding reply instead of
    /// sending a second request — the ordering discipline the output
    /// socket requires.
    request_in_flight: bool,
}

/// Consumer endpoint: connects to a bridge's output socket and pulls
/// bulks from it. Each `get`/`get_nowait` call corresponds to exactly
/// one request/reply round trip and returns the whole bulk the relay
/// sent, up to `bulk_size` messages.
pub struct Getter {
    channel_name: String,
    inner: Mutex<Inner>,
}

impl Getter {
    /// Resolves `<channel_name>.url`'s `GET` line and connects to it.
    pub async fn connect(channel_name: impl Into<String>) -> Result<Self, BridgeError> {
        let channel_name = channel_name.into();
        let addr = discovery::resolve(&channel_name, "GET")?;
        let stream = TcpStream::connect(strip_scheme(&addr))
            .await
            .map_err(BridgeError::from)?;
        Ok(Self {
            channel_name,
            inner: Mutex::new(Inner {
                stream,
                request_in_flight: false,
            }),
        })
    }

    pub fn channel_name(&self) -> &str {
        &self.channel_name
    }

    /// Blocks until the bridge replies, and returns the whole bulk (up
    /// to `bulk_size` messages, in arrival order) exactly as the relay
    /// sent it — not flattened to a single message.
    pub async fn get<T: DeserializeOwned>(&self) -> Result<Vec<T>, BridgeError> {
        let mut guard = self.inner.lock().await;
        ensure_request_sent(&mut guard, "Request").await?;
        let reply = wire::read_frame(&mut guard.stream).await?;
        guard.request_in_flight = false;
        decode_bulk(&reply)
    }

    /// Same contract as `get`, but returns `None` instead of blocking
    /// past `timeout_ms` when no bulk arrives in time. A timeout
    /// leaves any already-sent request outstanding rather than
    /// abandoning it, so the next call picks up its reply instead of
    /// violating REQ/REP ordering with a second request.
    pub async fn get_nowait<T: DeserializeOwned>(
        &self,
        timeout_ms: u64,
    ) -> Result<Option<Vec<T>>, BridgeError> {
        let mut guard = self.inner.lock().await;
        ensure_request_sent(&mut guard, "request").await?;

        match tokio::time::timeout(Duration::from_millis(timeout_ms), wire::read_frame(&mut guard.stream)).await
        {
            Ok(Ok(reply)) => {
                guard.request_in_flight = false;
                Ok(Some(decode_bulk(&reply)?))
            }
            Ok(Err(e)) => Err(e),
            Err(_elapsed) => Ok(None),
        }
    }
}

async fn ensure_request_sent(guard: &mut Inner, tag_prefix: &str) -> Result<(), BridgeError> {
    if guard.request_in_flight {
        return Ok(());
    }
    let tag = format!("{} {}", tag_prefix, std::process::id());
    wire::write_frame(&mut guard.stream, tag.as_bytes()).await?;
    guard.request_in_flight = true;
    Ok(())
}

fn decode_bulk<T: DeserializeOwned>(bytes: &[u8]) -> Result<Vec<T>, BridgeError> {
    wire::decode_bulk_reply(bytes)?
        .into_iter()
        .map(|item| wire::decode(&item))
        .collect()
}

fn strip_scheme(addr: &str) -> &str {
    addr.strip_prefix("tcp://").unwrap_or(addr)
}
