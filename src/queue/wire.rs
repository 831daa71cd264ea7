// src/queue/wire.rs

use crate::errors::BridgeError;
use serde::{de::DeserializeOwned, Serialize};
use serde_bytes::ByteBuf;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;

/// Frames are a 4-byte big-endian length prefix followed by a
/// MessagePack-encoded body.
const MAX_FRAME_LEN: usize = 16 * 1024 * 1024;

/// Caps a single transport retry loop: a syscall interrupted by a
/// signal (`EINTR`) is retried, but never more than this many times
/// in a row.
const MAX_RETRIES: u32 = 10;

pub fn encode<T: Serialize>(value: &T) -> Result<Vec<u8>, BridgeError> {
    rmp_serde::to_vec(value).map_err(|e| BridgeError::Codec(e.to_string()))
}

pub fn decode<T: DeserializeOwned>(bytes: &[u8]) -> Result<T, BridgeError> {
    rmp_serde::from_slice(bytes).map_err(|e| BridgeError::Codec(e.to_string()))
}

/// Writes one length-prefixed frame, retrying on `EINTR` up to
/// [`MAX_RETRIES`] times. Any other I/O error is fatal.
pub async fn write_frame(stream: &mut TcpStream, body: &[u8]) -> Result<(), BridgeError> {
    if body.len() > MAX_FRAME_LEN {
        return Err(BridgeError::MessageTooLarge {
            len: body.len(),
            max: MAX_FRAME_LEN,
        });
    }
    let len_prefix = (body.len() as u32).to_be_bytes();

    uninterruptible(|| async {
        stream.write_all(&len_prefix).await?;
        stream.write_all(body).await?;
        stream.flush().await
    })
    .await
}

/// Reads one length-prefixed frame, retrying on `EINTR` up to
/// [`MAX_RETRIES`] times.
pub async fn read_frame(stream: &mut TcpStream) -> Result<Vec<u8>, BridgeError> {
    let mut len_bytes = [0u8; 4];
    uninterruptible(|| async { stream.read_exact(&mut len_bytes).await }).await?;

    let len = u32::from_be_bytes(len_bytes) as usize;
    if len > MAX_FRAME_LEN {
        return Err(BridgeError::MessageTooLarge {
            len,
            max: MAX_FRAME_LEN,
        });
    }

    let mut body = vec![0u8; len];
    uninterruptible(|| async { stream.read_exact(&mut body).await }).await?;
    Ok(body)
}

/// What a single input-socket frame carries, pushed by a `Putter`.
///
/// The relay buffers opaque, already-encoded message bytes — it never
/// deserializes into an application type, so it has no way to tell a
/// single payload from a caller-supplied batch without this tag.
/// `Single` is the common case (one `put()` call, one frame); `Bulk`
/// is produced by `Putter::put_bulk` and tells the relay to extend its
/// buffer with every item rather than push one opaque blob.
pub enum Envelope {
    Single(Vec<u8>),
    Bulk(Vec<Vec<u8>>),
}

const ENVELOPE_TAG_SINGLE: u8 = 0;
const ENVELOPE_TAG_BULK: u8 = 1;

pub fn encode_envelope(envelope: &Envelope) -> Result<Vec<u8>, BridgeError> {
    let mut out = Vec::new();
    match envelope {
        Envelope::Single(body) => {
            out.push(ENVELOPE_TAG_SINGLE);
            out.extend(rmp_serde::to_vec(&ByteBuf::from(body.clone()))
                .map_err(|e| BridgeError::Codec(e.to_string()))?);
        }
        Envelope::Bulk(items) => {
            out.push(ENVELOPE_TAG_BULK);
            let bufs: Vec<ByteBuf> = items.iter().cloned().map(ByteBuf::from).collect();
            out.extend(rmp_serde::to_vec(&bufs).map_err(|e| BridgeError::Codec(e.to_string()))?);
        }
    }
    Ok(out)
}

pub fn decode_envelope(bytes: &[u8]) -> Result<Envelope, BridgeError> {
    let (tag, body) = bytes
        .split_first()
        .ok_or_else(|| BridgeError::Codec("empty envelope frame".into()))?;
    match *tag {
        ENVELOPE_TAG_SINGLE => {
            let buf: ByteBuf =
                rmp_serde::from_slice(body).map_err(|e| BridgeError::Codec(e.to_string()))?;
            Ok(Envelope::Single(buf.into_vec()))
        }
        ENVELOPE_TAG_BULK => {
            let bufs: Vec<ByteBuf> =
                rmp_serde::from_slice(body).map_err(|e| BridgeError::Codec(e.to_string()))?;
            Ok(Envelope::Bulk(bufs.into_iter().map(ByteBuf::into_vec).collect()))
        }
        other => Err(BridgeError::Codec(format!("unknown envelope tag {}", other))),
    }
}

/// Encodes a bulk reply: a contiguous prefix of the relay's buffer,
/// handed to a `Getter` in one frame on the output socket. Always a
/// list, even for a bulk of one, so the decoder never has to guess
/// whether a reply was a single value or a batch.
pub fn encode_bulk_reply(items: &[Vec<u8>]) -> Result<Vec<u8>, BridgeError> {
    let bufs: Vec<ByteBuf> = items.iter().cloned().map(ByteBuf::from).collect();
    rmp_serde::to_vec(&bufs).map_err(|e| BridgeError::Codec(e.to_string()))
}

pub fn decode_bulk_reply(bytes: &[u8]) -> Result<Vec<Vec<u8>>, BridgeError> {
    let bufs: Vec<ByteBuf> =
        rmp_serde::from_slice(bytes).map_err(|e| BridgeError::Codec(e.to_string()))?;
    Ok(bufs.into_iter().map(ByteBuf::into_vec).collect())
}

/// Retries `op` while it fails with `ErrorKind::Interrupted`, up to
/// [`MAX_RETRIES`] attempts. Any other error is treated as fatal and
/// returned immediately.
async fn uninterruptible<F, Fut>(mut op: F) -> Result<(), BridgeError>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = std::io::Result<()>>,
{
    let mut attempts = 0;
    loop {
        match op().await {
            Ok(()) => return Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::Interrupted => {
                attempts += 1;
                if attempts >= MAX_RETRIES {
                    return Err(BridgeError::TransportInterrupted);
                }
            }
            Err(e) => return Err(BridgeError::from(e)),
        }
    }
}
