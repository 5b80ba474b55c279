//! Boundary to whatever carries bytes between producer and actuator.
//!
//! A transport finds its single peer, moves whole messages and reports
//! inbound traffic and link loss as [`TransportEvent`]s on a channel that
//! the delivery channel drains once per tick.

use crate::error::TransportError;
use tokio::sync::mpsc;

pub mod memory;
pub mod tcp;

pub use memory::{memory_link, MemoryPeer, MemoryTransport};
pub use tcp::TcpTransport;

/// Capacity of the per-connection event queue.
pub const EVENT_QUEUE: usize = 32;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    Received(Vec<u8>),
    Lost,
}

#[derive(Debug)]
pub struct Connection {
    pub peer: String,
    pub events: mpsc::Receiver<TransportEvent>,
}

#[allow(async_fn_in_trait)]
pub trait Transport {
    /// Prepares the local endpoint. Called once, failure is fatal.
    async fn open(&mut self) -> Result<(), TransportError>;

    /// Finds the peer and completes the handshake.
    async fn connect(&mut self) -> Result<Connection, TransportError>;

    /// Delivers one message as a unit.
    async fn send(&mut self, payload: &[u8]) -> Result<(), TransportError>;

    /// Drops the current link if there is one.
    async fn disconnect(&mut self);
}
