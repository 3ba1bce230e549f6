//! SPIRE Broadcast Hub
//!
//! Topic-based fan-out of JSON frames to WebSocket clients.
//!
//! Publishing never waits on a client: each client owns a bounded queue and
//! a frame that does not fit is dropped for that client alone. A
//! [`Connection`] pairs a socket reader with a queue-draining writer and
//! keeps the link alive with a ping heartbeat.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod client;
pub mod connection;
pub mod frame;
pub mod hub;
pub mod metrics;

// Re-exports
pub use client::{Client, ClientQueue, DEFAULT_QUEUE_CAPACITY, Delivery};
pub use connection::{CloseReason, Connection, ConnectionConfig, serve_socket};
pub use frame::{ClientCommand, Frame, FrameKind, OutboundFrame, ProtocolError};
pub use hub::BroadcastHub;
pub use metrics::{HubMetrics, HubStats};
