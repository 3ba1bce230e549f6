//! One WebSocket connection bridged onto the hub.
//!
//! The reader runs on the connection's own task and decodes client frames;
//! the writer is a spawned task that drains the client queue to the socket.
//! When the reader stops (peer closed, idle deadline, oversized frame, or
//! the writer failing) the client is unregistered, which closes the queue
//! and lets the writer finish.

use crate::client::{Client, ClientQueue, DEFAULT_QUEUE_CAPACITY};
use crate::frame::{ClientCommand, Frame, FrameKind, OutboundFrame, ProtocolError};
use crate::hub::BroadcastHub;
use axum::body::Bytes;
use axum::extract::ws::{Message, WebSocket};
use futures::{Sink, SinkExt, Stream, StreamExt};
use spire_core::ClientId;
use std::fmt::Display;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{Instant, MissedTickBehavior, timeout};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Frames coalesced into one flush at most
const MAX_BATCH: usize = 64;

/// Shortest heartbeat period the writer will run with
const MIN_PING_INTERVAL: Duration = Duration::from_millis(10);

/// Per-connection limits and timers
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionConfig {
    /// Outbound queue capacity
    pub queue_capacity: usize,
    /// Largest accepted inbound frame, in bytes
    pub max_frame_bytes: usize,
    /// Heartbeat interval when no data is flowing
    pub ping_interval: Duration,
    /// Connection is dropped after this long without any inbound frame
    pub read_idle: Duration,
    /// Bound on a single socket write (or batch of writes)
    pub write_timeout: Duration,
}

impl ConnectionConfig {
    /// Set queue capacity
    #[must_use]
    pub fn with_queue_capacity(mut self, capacity: usize) -> Self {
        self.queue_capacity = capacity;
        self
    }

    /// Set max inbound frame size
    #[must_use]
    pub fn with_max_frame_bytes(mut self, bytes: usize) -> Self {
        self.max_frame_bytes = bytes;
        self
    }

    /// Set heartbeat interval and idle deadline together.
    ///
    /// The interval is clamped to at least 10ms and, when it is not already
    /// shorter than `read_idle`, to nine tenths of it.
    #[must_use]
    pub fn with_heartbeat(mut self, ping_interval: Duration, read_idle: Duration) -> Self {
        let ping_interval = if ping_interval >= read_idle {
            read_idle / 10 * 9
        } else {
            ping_interval
        };
        self.ping_interval = ping_interval.max(MIN_PING_INTERVAL);
        self.read_idle = read_idle;
        self
    }

    /// Set write timeout
    #[must_use]
    pub fn with_write_timeout(mut self, write_timeout: Duration) -> Self {
        self.write_timeout = write_timeout;
        self
    }
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
            max_frame_bytes: 64 * 1024,
            ping_interval: Duration::from_secs(54),
            read_idle: Duration::from_secs(60),
            write_timeout: Duration::from_secs(10),
        }
    }
}

/// Why a connection ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseReason {
    /// Peer sent a close frame or the stream ended
    PeerClosed,
    /// No inbound frame within the idle deadline
    IdleTimeout,
    /// Socket read failed
    ReadError,
    /// Inbound frame over the size limit
    FrameTooLarge,
    /// Writer could not deliver within its deadline
    WriterFailed,
}

/// Serve an upgraded axum WebSocket until it closes
pub async fn serve_socket(socket: WebSocket, hub: Arc<BroadcastHub>, config: ConnectionConfig) {
    let (sink, stream) = socket.split();
    Connection::new(hub, config).run(sink, stream).await;
}

/// A connection bound to a hub
pub struct Connection {
    hub: Arc<BroadcastHub>,
    config: ConnectionConfig,
}

impl Connection {
    /// Create a connection driver
    #[must_use]
    pub fn new(hub: Arc<BroadcastHub>, config: ConnectionConfig) -> Self {
        Self { hub, config }
    }

    /// Register with the hub, pump frames both ways, and unregister on exit.
    ///
    /// Returns the client ID the connection was registered under and why it
    /// ended.
    pub async fn run<W, R, E>(self, sink: W, stream: R) -> (ClientId, CloseReason)
    where
        W: Sink<Message> + Unpin + Send + 'static,
        W::Error: Display + Send,
        R: Stream<Item = Result<Message, E>> + Unpin,
        E: Display,
    {
        let (client, queue) = Client::channel(self.config.queue_capacity);
        let id = client.id();
        self.hub.register(client);

        let writer_failed = CancellationToken::new();
        let mut writer = tokio::spawn(write_loop(
            sink,
            queue,
            self.config.clone(),
            writer_failed.clone(),
        ));

        // a writer that ends on its own (error or panic) ends the connection too
        let mut writer_done = false;
        let reason = tokio::select! {
            reason = self.read_loop(stream, id, &writer_failed) => reason,
            joined = &mut writer => {
                writer_done = true;
                if let Err(err) = joined {
                    warn!(client_id = %id, error = %err, "writer task died");
                }
                CloseReason::WriterFailed
            }
        };
        self.hub.unregister(id);

        // the writer sees its queue close, flushes what is left, and exits
        let grace = self.config.write_timeout.saturating_mul(2);
        if !writer_done && timeout(grace, &mut writer).await.is_err() {
            warn!(client_id = %id, "writer did not stop in time, aborting");
            writer.abort();
        }

        info!(client_id = %id, reason = ?reason, "connection closed");
        (id, reason)
    }

    async fn read_loop<R, E>(
        &self,
        mut stream: R,
        id: ClientId,
        writer_failed: &CancellationToken,
    ) -> CloseReason
    where
        R: Stream<Item = Result<Message, E>> + Unpin,
        E: Display,
    {
        loop {
            let next = tokio::select! {
                _ = writer_failed.cancelled() => return CloseReason::WriterFailed,
                next = timeout(self.config.read_idle, stream.next()) => next,
            };

            let message = match next {
                Err(_) => return CloseReason::IdleTimeout,
                Ok(None) => return CloseReason::PeerClosed,
                Ok(Some(Err(err))) => {
                    debug!(client_id = %id, error = %err, "socket read failed");
                    return CloseReason::ReadError;
                }
                Ok(Some(Ok(message))) => message,
            };

            match message {
                Message::Text(text) => {
                    if text.len() > self.config.max_frame_bytes {
                        self.reject_oversized(id, text.len());
                        return CloseReason::FrameTooLarge;
                    }
                    self.handle_text(id, text.as_str());
                }
                Message::Binary(bytes) => {
                    if bytes.len() > self.config.max_frame_bytes {
                        self.reject_oversized(id, bytes.len());
                        return CloseReason::FrameTooLarge;
                    }
                    self.reply_error(id, &ProtocolError::BinaryFrame);
                }
                Message::Ping(_) | Message::Pong(_) => {}
                Message::Close(_) => return CloseReason::PeerClosed,
            }
        }
    }

    fn handle_text(&self, id: ClientId, text: &str) {
        match ClientCommand::decode(text) {
            Ok(ClientCommand::Subscribe { topic }) => {
                self.hub.subscribe(id, &topic);
                self.hub.send_to(id, &Frame::ack(FrameKind::Subscribe, &topic));
            }
            Ok(ClientCommand::Unsubscribe { topic }) => {
                self.hub.unsubscribe(id, &topic);
                self.hub.send_to(id, &Frame::ack(FrameKind::Unsubscribe, &topic));
            }
            Ok(ClientCommand::Broadcast { topic, data }) => {
                self.hub.publish_except(&topic, &data, id);
            }
            Err(err) => self.reply_error(id, &err),
        }
    }

    fn reply_error(&self, id: ClientId, err: &ProtocolError) {
        warn!(client_id = %id, error = %err, "protocol error");
        self.hub.send_to(id, &Frame::error(err.to_string()));
    }

    fn reject_oversized(&self, id: ClientId, size: usize) {
        self.reply_error(
            id,
            &ProtocolError::FrameTooLarge {
                size,
                limit: self.config.max_frame_bytes,
            },
        );
    }
}

fn to_message(frame: &OutboundFrame) -> Message {
    Message::Text(frame.as_str().into())
}

async fn write_loop<W>(
    mut sink: W,
    mut queue: ClientQueue,
    config: ConnectionConfig,
    failed: CancellationToken,
) where
    W: Sink<Message> + Unpin,
    W::Error: Display + Send,
{
    let id = queue.id();
    let period = config.ping_interval.max(MIN_PING_INTERVAL);
    let mut heartbeat = tokio::time::interval_at(Instant::now() + period, period);
    heartbeat.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            frame = queue.recv() => {
                let Some(frame) = frame else {
                    let _ = timeout(config.write_timeout, sink.send(Message::Close(None))).await;
                    return;
                };
                let written = write_batch(&mut sink, &mut queue, frame, config.write_timeout).await;
                if let Err(reason) = written {
                    warn!(client_id = %id, error = %reason, "write failed");
                    failed.cancel();
                    return;
                }
                heartbeat.reset();
            }
            _ = heartbeat.tick() => {
                match timeout(config.write_timeout, sink.send(Message::Ping(Bytes::new()))).await {
                    Ok(Ok(())) => {}
                    Ok(Err(err)) => {
                        warn!(client_id = %id, error = %err, "heartbeat failed");
                        failed.cancel();
                        return;
                    }
                    Err(_) => {
                        warn!(client_id = %id, "heartbeat timed out");
                        failed.cancel();
                        return;
                    }
                }
            }
        }
    }
}

/// Write `first` plus whatever else is already queued, then flush once.
async fn write_batch<W>(
    sink: &mut W,
    queue: &mut ClientQueue,
    first: OutboundFrame,
    write_timeout: Duration,
) -> Result<(), String>
where
    W: Sink<Message> + Unpin,
    W::Error: Display + Send,
{
    let write = async {
        sink.feed(to_message(&first)).await?;
        let mut batched = 1;
        while batched < MAX_BATCH {
            let Some(next) = queue.try_recv() else { break };
            sink.feed(to_message(&next)).await?;
            batched += 1;
        }
        sink.flush().await
    };

    match timeout(write_timeout, write).await {
        Ok(Ok(())) => Ok(()),
        Ok(Err(err)) => Err(err.to_string()),
        Err(_) => Err("write deadline exceeded".to_string()),
    }
}
