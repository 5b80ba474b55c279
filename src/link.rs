//! Connection state machine for the single producer to actuator link.

use crate::error::TransportError;
use crate::pose::AngleVector;
use crate::transport::{Transport, TransportEvent};
use crate::wire::{self, Inbound};
use log::*;
use std::fmt;
use std::time::{Duration, Instant};
use tokio::sync::mpsc::error::TryRecvError;
use tokio::sync::mpsc::Receiver;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkState {
    Idle,
    Scanning,
    Connected,
    ShuttingDown,
    Disconnected,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownInitiator {
    Operator,
    Peer,
}

/// How a session came to an end.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionEnd {
    OperatorStop,
    PeerShutdown,
    /// Peer vanished without a shutdown notice.
    LinkLost,
}

impl SessionEnd {
    pub fn is_graceful(self) -> bool {
        !matches!(self, SessionEnd::LinkLost)
    }
}

impl fmt::Display for SessionEnd {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionEnd::OperatorStop => write!(f, "stopped by operator"),
            SessionEnd::PeerShutdown => write!(f, "peer shut down"),
            SessionEnd::LinkLost => write!(f, "link lost"),
        }
    }
}

/// Link activity that the tick loop has to react to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkUpdate {
    Quiet,
    Shutdown,
    Lost,
}

/// Outcome of a send that kept watching the link.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    Sent,
    /// The link shut down or dropped before the transport took the payload.
    Interrupted(LinkUpdate),
}

#[derive(Debug)]
pub struct LinkSession {
    peer: String,
    connected_at: Instant,
    events: Receiver<TransportEvent>,
    shutdown_received: bool,
    messages_sent: u64,
}

impl LinkSession {
    pub fn peer(&self) -> &str {
        &self.peer
    }

    pub fn uptime(&self) -> Duration {
        self.connected_at.elapsed()
    }

    pub fn shutdown_received(&self) -> bool {
        self.shutdown_received
    }

    pub fn messages_sent(&self) -> u64 {
        self.messages_sent
    }
}

pub struct DeliveryChannel<T> {
    transport: T,
    state: LinkState,
    session: Option<LinkSession>,
    malformed_inbound: u64,
}

impl<T: Transport> DeliveryChannel<T> {
    pub fn new(transport: T) -> Self {
        DeliveryChannel {
            transport,
            state: LinkState::Idle,
            session: None,
            malformed_inbound: 0,
        }
    }

    pub fn state(&self) -> LinkState {
        self.state
    }

    pub fn session(&self) -> Option<&LinkSession> {
        self.session.as_ref()
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    /// Inbound payloads that were neither the sentinel nor a vector.
    pub fn malformed_inbound(&self) -> u64 {
        self.malformed_inbound
    }

    pub async fn open(&mut self) -> Result<(), TransportError> {
        self.transport.open().await
    }

    pub fn start(&mut self) {
        if matches!(self.state, LinkState::Idle | LinkState::Disconnected) {
            self.set_state(LinkState::Scanning);
        }
    }

    /// Waits for the peer. The channel stays scanning if this fails or is cancelled.
    pub async fn connect(&mut self) -> Result<&LinkSession, TransportError> {
        if self.state != LinkState::Scanning {
            return Err(TransportError::Connect(format!(
                "cannot connect while {:?}",
                self.state
            )));
        }
        let connection = self.transport.connect().await?;
        info!("Connected to {}", connection.peer);
        self.set_state(LinkState::Connected);
        Ok(self.session.insert(LinkSession {
            peer: connection.peer,
            connected_at: Instant::now(),
            events: connection.events,
            shutdown_received: false,
            messages_sent: 0,
        }))
    }

    /// Sends one vector. A shutdown or loss seen while the transport is
    /// still busy abandons the payload.
    pub async fn send(&mut self, vector: &AngleVector) -> Result<Delivery, TransportError> {
        if self.state != LinkState::Connected {
            return Err(TransportError::NotConnected);
        }
        let session = self.session.as_mut().ok_or(TransportError::NotConnected)?;
        let payload = wire::encode(vector);
        tokio::select! {
            biased;
            sent = self.transport.send(&payload) => sent?,
            update = watch_link(session, &mut self.malformed_inbound) => {
                debug!("Abandoned send, link reported {:?}", update);
                return Ok(Delivery::Interrupted(update));
            }
        }
        session.messages_sent += 1;
        trace!("Sent: {}", String::from_utf8_lossy(&payload));
        Ok(Delivery::Sent)
    }

    /// Drains pending link events without waiting.
    pub fn poll(&mut self) -> LinkUpdate {
        let session = match self.session.as_mut() {
            Some(session) => session,
            None => return LinkUpdate::Quiet,
        };
        loop {
            match session.events.try_recv() {
                Ok(event) => {
                    if let Some(update) = handle_event(session, &mut self.malformed_inbound, event)
                    {
                        return update;
                    }
                }
                Err(TryRecvError::Empty) => return LinkUpdate::Quiet,
                Err(TryRecvError::Disconnected) => return LinkUpdate::Lost,
            }
        }
    }

    /// Waits for the next shutdown or loss. Never resolves without a session.
    pub async fn next_update(&mut self) -> LinkUpdate {
        match self.session.as_mut() {
            Some(session) => watch_link(session, &mut self.malformed_inbound).await,
            None => std::future::pending().await,
        }
    }

    /// Graceful teardown. An operator shutdown notifies the peer once and
    /// gives it `grace` to let go of the link, the notice itself included.
    pub async fn shutdown(&mut self, initiator: ShutdownInitiator, grace: Duration) {
        if self.state != LinkState::Connected {
            return;
        }
        self.set_state(LinkState::ShuttingDown);
        if initiator == ShutdownInitiator::Operator
            && tokio::time::timeout(grace, self.notify_shutdown())
                .await
                .is_err()
        {
            warn!("Peer did not let go within {:?}, closing anyway", grace);
        }
        self.release().await;
    }

    async fn notify_shutdown(&mut self) {
        match self.transport.send(wire::SHUTDOWN_SENTINEL).await {
            Ok(()) => {
                self.next_update().await;
            }
            Err(error) => warn!("Failed notifying peer of shutdown: {}", error),
        }
    }

    /// Abnormal end of the session, the peer is already gone.
    pub async fn link_lost(&mut self) {
        if self.state != LinkState::Connected {
            return;
        }
        warn!("Connection was lost");
        self.release().await;
    }

    /// Leaves `Disconnected`, scanning again unless the run is over.
    pub fn finish(&mut self, rescan: bool) {
        if self.state == LinkState::Disconnected || self.state == LinkState::Scanning {
            self.set_state(if rescan {
                LinkState::Scanning
            } else {
                LinkState::Idle
            });
        }
    }

    async fn release(&mut self) {
        self.transport.disconnect().await;
        if let Some(session) = self.session.take() {
            info!(
                "Disconnected from {} after {:.1}s, {} messages sent",
                session.peer,
                session.uptime().as_secs_f32(),
                session.messages_sent
            );
        }
        self.set_state(LinkState::Disconnected);
    }

    fn set_state(&mut self, state: LinkState) {
        if self.state != state {
            debug!("Link {:?} -> {:?}", self.state, state);
            self.state = state;
        }
    }
}

async fn watch_link(session: &mut LinkSession, malformed: &mut u64) -> LinkUpdate {
    loop {
        match session.events.recv().await {
            Some(event) => {
                if let Some(update) = handle_event(session, malformed, event) {
                    return update;
                }
            }
            None => return LinkUpdate::Lost,
        }
    }
}

fn handle_event(
    session: &mut LinkSession,
    malformed: &mut u64,
    event: TransportEvent,
) -> Option<LinkUpdate> {
    match event {
        TransportEvent::Lost => Some(LinkUpdate::Lost),
        TransportEvent::Received(payload) => match wire::classify(&payload) {
            Inbound::Shutdown => {
                info!("Peer is shutting down");
                session.shutdown_received = true;
                Some(LinkUpdate::Shutdown)
            }
            Inbound::Angles(_) => {
                debug!("Ignoring inbound angle payload");
                None
            }
            Inbound::Malformed(error) => {
                warn!("Malformed inbound payload: {}", error);
                *malformed += 1;
                None
            }
        },
    }
}
