//! Client handles and their bounded outbound queues.

use crate::frame::OutboundFrame;
use spire_core::ClientId;
use tokio::sync::mpsc;

/// Default outbound queue capacity per client
pub const DEFAULT_QUEUE_CAPACITY: usize = 256;

/// Outcome of a non-blocking enqueue
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    /// Frame is queued for the client
    Queued,
    /// Queue was full; the frame is dropped for this client only
    Dropped,
    /// Client's writer is gone
    Closed,
}

/// Sending half of a client, owned by the hub while registered.
///
/// The hub holds the only sender, so removing the client from the hub
/// closes its queue.
#[derive(Debug)]
pub struct Client {
    id: ClientId,
    sender: mpsc::Sender<OutboundFrame>,
}

impl Client {
    /// Create a client and the receiving end of its queue
    #[must_use]
    pub fn channel(capacity: usize) -> (Self, ClientQueue) {
        let (sender, receiver) = mpsc::channel(capacity.max(1));
        let id = ClientId::new();
        (Self { id, sender }, ClientQueue { id, receiver })
    }

    /// Client ID
    #[must_use]
    pub fn id(&self) -> ClientId {
        self.id
    }

    /// Try to enqueue a frame without waiting
    pub(crate) fn offer(&self, frame: OutboundFrame) -> Delivery {
        match self.sender.try_send(frame) {
            Ok(()) => Delivery::Queued,
            Err(mpsc::error::TrySendError::Full(_)) => Delivery::Dropped,
            Err(mpsc::error::TrySendError::Closed(_)) => Delivery::Closed,
        }
    }
}

/// Receiving half of a client queue, drained by the connection writer
#[derive(Debug)]
pub struct ClientQueue {
    id: ClientId,
    receiver: mpsc::Receiver<OutboundFrame>,
}

impl ClientQueue {
    /// Client ID this queue belongs to
    #[must_use]
    pub fn id(&self) -> ClientId {
        self.id
    }

    /// Wait for the next frame; `None` once the client is unregistered
    /// and the queue is empty
    pub async fn recv(&mut self) -> Option<OutboundFrame> {
        self.receiver.recv().await
    }

    /// Take a frame that is already queued, without waiting
    pub fn try_recv(&mut self) -> Option<OutboundFrame> {
        self.receiver.try_recv().ok()
    }
}
