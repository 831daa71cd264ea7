// src/queue/bridge.rs

use crate::config::BridgeSettings;
use crate::errors::BridgeError;
use crate::log;
use crate::logger::LogLevel;
use std::collections::VecDeque;
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use super::discovery;
use super::wire::{self, Envelope};

/// A consumer request waiting on the relay: the opaque tag carried on
/// the request frame (logged only, never interpreted) and the channel
/// the per-connection responder task is blocked on.
struct PendingRequest {
    tag: String,
    reply: oneshot::Sender<Vec<Vec<u8>>>,
}

/// The relay process: binds a PULL-semantics input socket and a
/// REP-semantics output socket, publishes their addresses, and runs
/// the buffering relay as a daemon task.
///
/// The transport substrate is plain `TcpStream` rather than a
/// dedicated messaging socket; fan-in and fan-out are each one task
/// per connection, funneling into the single relay task over
/// `mpsc`/`oneshot` rather than a polling loop.
pub struct Bridge {
    channel_name: String,
    input_address: String,
    output_address: String,
    relay_handle: JoinHandle<()>,
}

impl Bridge {
    /// Binds both sockets on any available port, publishes
    /// `<channel_name>.url`, and spawns the relay and its connection
    /// acceptors. Returns as soon as the sockets are listening; the
    /// relay itself runs in the background.
    pub async fn bind(
        channel_name: impl Into<String>,
        settings: &BridgeSettings,
    ) -> Result<Bridge, BridgeError> {
        let channel_name = channel_name.into();

        let input_listener = TcpListener::bind("0.0.0.0:0")
            .await
            .map_err(BridgeError::from)?;
        let output_listener = TcpListener::bind("0.0.0.0:0")
            .await
            .map_err(BridgeError::from)?;

        let host = discovery::local_ip();
        let input_port = input_listener
            .local_addr()
            .map_err(BridgeError::from)?
            .port();
        let output_port = output_listener
            .local_addr()
            .map_err(BridgeError::from)?
            .port();
        let input_address = format!("tcp://{}:{}", host, input_port);
        let output_address = format!("tcp://{}:{}", host, output_port);

        discovery::publish(&channel_name, &input_address, &output_address)?;

        let cancel = CancellationToken::new();
        let (input_tx, input_rx) = mpsc::unbounded_channel::<Envelope>();
        let (request_tx, request_rx) = mpsc::unbounded_channel::<PendingRequest>();

        tokio::spawn(input_accept_loop(input_listener, input_tx, cancel.clone()));
        tokio::spawn(output_accept_loop(
            output_listener,
            request_tx,
            cancel.clone(),
        ));

        let bulk_size = settings.bulk_size.max(1);
        let relay_handle = tokio::spawn(relay_loop(input_rx, request_rx, cancel, bulk_size));

        log!(
            LogLevel::Info,
            "bridge '{}': PUT {} / GET {}",
            channel_name,
            input_address,
            output_address
        );

        Ok(Bridge {
            channel_name,
            input_address,
            output_address,
            relay_handle,
        })
    }

    pub fn channel_name(&self) -> &str {
        &self.channel_name
    }

    pub fn input_address(&self) -> &str {
        &self.input_address
    }

    pub fn output_address(&self) -> &str {
        &self.output_address
    }

    /// Blocks up to `timeout` (or forever, if `None`) for the relay
    /// task to exit. Returns `true` if it has stopped; `false` on
    /// timeout. Polls `is_finished()` on an interval rather than
    /// awaiting the handle directly, so a caller can race it against
    /// its own cancellation elsewhere.
    pub async fn wait(&self, timeout: Option<Duration>) -> bool {
        let start = tokio::time::Instant::now();
        loop {
            if self.relay_handle.is_finished() {
                return true;
            }
            if let Some(limit) = timeout {
                if start.elapsed() >= limit {
                    return false;
                }
            }
            tokio::time::sleep(Duration::from_millis(100)).await;
        }
    }
}

async fn input_accept_loop(
    listener: TcpListener,
    input_tx: mpsc::UnboundedSender<Envelope>,
    cancel: CancellationToken,
) {
    loop {
        tokio::select! {
            _ = cancel.cancelled() => return,
            accepted = listener.accept() => {
                match accepted {
                    Ok((stream, _addr)) => {
                        tokio::spawn(input_connection(stream, input_tx.clone(), cancel.clone()));
                    }
                    Err(e) => log!(LogLevel::Warn, "bridge input accept failed: {}", e),
                }
            }
        }
    }
}

async fn input_connection(
    mut stream: TcpStream,
    input_tx: mpsc::UnboundedSender<Envelope>,
    cancel: CancellationToken,
) {
    loop {
        tokio::select! {
            _ = cancel.cancelled() => return,
            frame = wire::read_frame(&mut stream) => {
                let bytes = match frame {
                    Ok(bytes) => bytes,
                    Err(_) => return, // producer disconnected; not fatal to the bridge
                };
                match wire::decode_envelope(&bytes) {
                    Ok(envelope) => {
                        if input_tx.send(envelope).is_err() {
                            return;
                        }
                    }
                    Err(e) => {
                        // A malformed input frame is a codec failure the relay
                        // cannot recover from; shut the whole bridge down
                        // rather than silently dropping the message.
                        log!(LogLevel::Error, "bridge: fatal decode error: {}", e);
                        cancel.cancel();
                        return;
                    }
                }
            }
        }
    }
}

async fn output_accept_loop(
    listener: TcpListener,
    request_tx: mpsc::UnboundedSender<PendingRequest>,
    cancel: CancellationToken,
) {
    loop {
        tokio::select! {
            _ = cancel.cancelled() => return,
            accepted = listener.accept() => {
                match accepted {
                    Ok((stream, _addr)) => {
                        tokio::spawn(output_connection(stream, request_tx.clone(), cancel.clone()));
                    }
                    Err(e) => log!(LogLevel::Warn, "bridge output accept failed: {}", e),
                }
            }
        }
    }
}

/// One REP-style connection: strictly alternates reading a request
/// tag and writing a bulk reply, enforced simply by the sequential
/// shape of this loop (no second read before the matching write).
async fn output_connection(
    mut stream: TcpStream,
    request_tx: mpsc::UnboundedSender<PendingRequest>,
    cancel: CancellationToken,
) {
    loop {
        tokio::select! {
            _ = cancel.cancelled() => return,
            frame = wire::read_frame(&mut stream) => {
                let tag_bytes = match frame {
                    Ok(bytes) => bytes,
                    Err(_) => return,
                };
                let tag = String::from_utf8_lossy(&tag_bytes).into_owned();

                let (reply_tx, reply_rx) = oneshot::channel();
                if request_tx.send(PendingRequest { tag, reply: reply_tx }).is_err() {
                    return;
                }

                let bulk = match reply_rx.await {
                    Ok(bulk) => bulk,
                    Err(_) => return, // relay shut down before answering
                };

                let body = match wire::encode_bulk_reply(&bulk) {
                    Ok(body) => body,
                    Err(e) => {
                        log!(LogLevel::Error, "bridge: failed to encode bulk reply: {}", e);
                        return;
                    }
                };

                // A send failure here is logged, not retried: the bulk has
                // already left the buffer and is considered delivered.
                if wire::write_frame(&mut stream, &body).await.is_err() {
                    log!(LogLevel::Warn, "bridge: reply send failed, bulk not requeued");
                    return;
                }
            }
        }
    }
}

/// The single task that owns the buffer: everything here runs without
/// locks because nothing else ever touches `buffer` or `pending`.
async fn relay_loop(
    mut input_rx: mpsc::UnboundedReceiver<Envelope>,
    mut request_rx: mpsc::UnboundedReceiver<PendingRequest>,
    cancel: CancellationToken,
    bulk_size: usize,
) {
    let mut buffer: VecDeque<Vec<u8>> = VecDeque::new();
    let mut pending: VecDeque<PendingRequest> = VecDeque::new();

    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                log!(LogLevel::Debug, "relay: shutting down");
                return;
            }
            incoming = input_rx.recv() => {
                match incoming {
                    Some(Envelope::Single(bytes)) => buffer.push_back(bytes),
                    Some(Envelope::Bulk(items)) => buffer.extend(items),
                    None => return,
                }
                dispatch(&mut buffer, &mut pending, bulk_size);
            }
            requested = request_rx.recv() => {
                match requested {
                    Some(req) => {
                        pending.push_back(req);
                        dispatch(&mut buffer, &mut pending, bulk_size);
                    }
                    None => return,
                }
            }
        }
    }
}

/// Answers as many pending requests as the buffer currently allows,
/// FIFO over `pending`: whichever consumer asked first gets served
/// first. A request is only ever popped once the buffer has at least
/// one message for it, so a request against an empty buffer stays
/// queued — never answered with an empty bulk.
fn dispatch(buffer: &mut VecDeque<Vec<u8>>, pending: &mut VecDeque<PendingRequest>, bulk_size: usize) {
    while !buffer.is_empty() && !pending.is_empty() {
        let n = bulk_size.min(buffer.len());
        let bulk: Vec<Vec<u8>> = buffer.drain(..n).collect();
        let req = pending.pop_front().expect("checked non-empty above");
        log!(LogLevel::Debug, "relay: delivering {} message(s) to {}", bulk.len(), req.tag);
        let _ = req.reply.send(bulk);
    }
}
