// src/queue/putter.rs

use crate::errors::BridgeError;
use serde::Serialize;
use tokio::net::TcpStream;

use super::discovery;
use super::wire::{self, Envelope};

/// Producer endpoint: connects to a bridge's input socket and pushes
/// messages onto it. Push order on one connection is transport FIFO,
/// so messages from a single `Putter` are always delivered in send
/// order.
pub struct Putter {
    channel_name: String,
    stream: TcpStream,
}

impl Putter {
    /// Resolves `<channel_name>.url`'s `PUT` line and connects to it.
    pub async fn connect(channel_name: impl Into<String>) -> Result<Self, BridgeError> {
        let channel_name = channel_name.into();
        let addr = discovery::resolve(&channel_name, "PUT")?;
        let stream = TcpStream::connect(strip_scheme(&addr))
            .await
            .map_err(BridgeError::from)?;
        Ok(Self {
            channel_name,
            stream,
        })
    }

    pub fn channel_name(&self) -> &str {
        &self.channel_name
    }

    /// Pushes one message. Non-blocking modulo transport backpressure
    /// (a full TCP send buffer blocks this future, never the caller's
    /// thread, until the relay drains it).
    pub async fn put<T: Serialize>(&mut self, msg: &T) -> Result<(), BridgeError> {
        let encoded = wire::encode(msg)?;
        let body = wire::encode_envelope(&Envelope::Single(encoded))?;
        wire::write_frame(&mut self.stream, &body).await
    }

    /// Pushes a whole slice as one frame; the relay extends its
    /// buffer with each element rather than appending the slice as one
    /// opaque value. Per-element order is preserved.
    pub async fn put_bulk<T: Serialize>(&mut self, msgs: &[T]) -> Result<(), BridgeError> {
        let mut encoded = Vec::with_capacity(msgs.len());
        for msg in msgs {
            encoded.push(wire::encode(msg)?);
        }
        let body = wire::encode_envelope(&Envelope::Bulk(encoded))?;
        wire::write_frame(&mut self.stream, &body).await
    }
}

fn strip_scheme(addr: &str) -> &str {
    addr.strip_prefix("tcp://").unwrap_or(addr)
}
