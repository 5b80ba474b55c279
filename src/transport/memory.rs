use super::{Connection, Transport, TransportEvent, EVENT_QUEUE};
use crate::error::TransportError;
use crate::wire;
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::{mpsc, watch};

pub const MEMORY_PEER: &str = "memory-peer";

#[derive(Default)]
struct Link {
    events: Option<mpsc::Sender<TransportEvent>>,
    sent: Vec<Vec<u8>>,
    failing_sends: usize,
    fail_open: bool,
    close_on_shutdown: bool,
    stall_sends: bool,
    stall_sentinel: bool,
    connects: usize,
    disconnects: usize,
}

/// Producer end of an in-process link, driven by a [`MemoryPeer`].
pub struct MemoryTransport {
    link: Arc<Mutex<Link>>,
    available: watch::Receiver<bool>,
}

/// Scripted actuator end of an in-process link.
#[derive(Clone)]
pub struct MemoryPeer {
    link: Arc<Mutex<Link>>,
    available: Arc<watch::Sender<bool>>,
}

pub fn memory_link() -> (MemoryTransport, MemoryPeer) {
    let link = Arc::new(Mutex::new(Link::default()));
    let (available_tx, available_rx) = watch::channel(true);
    (
        MemoryTransport {
            link: link.clone(),
            available: available_rx,
        },
        MemoryPeer {
            link,
            available: Arc::new(available_tx),
        },
    )
}

fn lock(link: &Mutex<Link>) -> MutexGuard<'_, Link> {
    // a panicking test thread must not hide the recorded traffic
    link.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl Transport for MemoryTransport {
    async fn open(&mut self) -> Result<(), TransportError> {
        if lock(&self.link).fail_open {
            return Err(TransportError::Connect(String::from(
                "memory link refused to open",
            )));
        }
        Ok(())
    }

    async fn connect(&mut self) -> Result<Connection, TransportError> {
        if self.available.wait_for(|available| *available).await.is_err() {
            return Err(TransportError::Connect(String::from("peer is gone")));
        }
        let (tx, rx) = mpsc::channel(EVENT_QUEUE);
        let mut link = lock(&self.link);
        link.events = Some(tx);
        link.connects += 1;
        Ok(Connection {
            peer: String::from(MEMORY_PEER),
            events: rx,
        })
    }

    async fn send(&mut self, payload: &[u8]) -> Result<(), TransportError> {
        let stalled = {
            let link = lock(&self.link);
            if link.events.is_none() {
                return Err(TransportError::NotConnected);
            }
            link.stall_sends || (link.stall_sentinel && wire::is_shutdown(payload))
        };
        if stalled {
            // a radio that never drains its buffer
            std::future::pending::<()>().await;
        }
        let mut link = lock(&self.link);
        if link.failing_sends > 0 {
            link.failing_sends -= 1;
            return Err(TransportError::Send(String::from("radio busy")));
        }
        link.sent.push(payload.to_vec());
        if link.close_on_shutdown && wire::is_shutdown(payload) {
            if let Some(events) = link.events.take() {
                let _ = events.try_send(TransportEvent::Lost);
            }
        }
        Ok(())
    }

    async fn disconnect(&mut self) {
        let mut link = lock(&self.link);
        link.events = None;
        link.disconnects += 1;
    }
}

impl MemoryPeer {
    /// Whether the producer can currently discover this peer.
    pub fn set_available(&self, available: bool) {
        self.available.send_replace(available);
    }

    pub fn fail_open(&self) {
        lock(&self.link).fail_open = true;
    }

    pub fn fail_next_sends(&self, count: usize) {
        lock(&self.link).failing_sends = count;
    }

    /// Sends never complete while set.
    pub fn stall_sends(&self, stall: bool) {
        lock(&self.link).stall_sends = stall;
    }

    /// Only the shutdown sentinel never completes.
    pub fn stall_sentinel(&self, stall: bool) {
        lock(&self.link).stall_sentinel = stall;
    }

    /// Acknowledge a shutdown sentinel by dropping the link.
    pub fn close_on_shutdown(&self, close: bool) {
        lock(&self.link).close_on_shutdown = close;
    }

    /// Pushes an inbound message to the producer. False without a link.
    pub fn notify(&self, payload: &[u8]) -> bool {
        lock(&self.link)
            .events
            .as_ref()
            .map(|events| {
                events
                    .try_send(TransportEvent::Received(payload.to_vec()))
                    .is_ok()
            })
            .unwrap_or(false)
    }

    /// Vanishes without saying goodbye.
    pub fn drop_link(&self) {
        if let Some(events) = lock(&self.link).events.take() {
            let _ = events.try_send(TransportEvent::Lost);
        }
    }

    pub fn is_linked(&self) -> bool {
        lock(&self.link).events.is_some()
    }

    pub fn sent(&self) -> Vec<Vec<u8>> {
        lock(&self.link).sent.clone()
    }

    pub fn connects(&self) -> usize {
        lock(&self.link).connects
    }

    pub fn disconnects(&self) -> usize {
        lock(&self.link).disconnects
    }
}
