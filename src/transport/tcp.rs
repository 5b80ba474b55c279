use super::{Connection, Transport, TransportEvent, EVENT_QUEUE};
use crate::error::TransportError;
use crate::wire::MESSAGE_DELIMITER;
use log::*;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWriteExt, BufReader};
use tokio::net::tcp::OwnedWriteHalf;
use tokio::net::{lookup_host, TcpStream};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

/// Newline framed link to an actuator bridge listening on TCP.
pub struct TcpTransport {
    address: String,
    retry_interval: Duration,
    writer: Option<OwnedWriteHalf>,
    reader: Option<JoinHandle<()>>,
}

impl TcpTransport {
    pub fn new(address: impl Into<String>) -> Self {
        TcpTransport {
            address: address.into(),
            retry_interval: Duration::from_millis(500),
            writer: None,
            reader: None,
        }
    }

    /// Delay between connection attempts while the peer is not reachable.
    pub fn with_retry_interval(mut self, retry_interval: Duration) -> Self {
        self.retry_interval = retry_interval;
        self
    }
}

impl Transport for TcpTransport {
    async fn open(&mut self) -> Result<(), TransportError> {
        let mut addresses = lookup_host(self.address.as_str())
            .await
            .map_err(|e| TransportError::Connect(format!("{}: {}", self.address, e)))?;
        if addresses.next().is_none() {
            return Err(TransportError::Connect(format!(
                "{} resolved to no address",
                self.address
            )));
        }
        Ok(())
    }

    async fn connect(&mut self) -> Result<Connection, TransportError> {
        let stream = loop {
            match TcpStream::connect(self.address.as_str()).await {
                Ok(stream) => break stream,
                Err(error) => {
                    trace!("Peer {} not reachable yet: {}", self.address, error);
                    tokio::time::sleep(self.retry_interval).await;
                }
            }
        };
        stream.set_nodelay(true)?;
        let peer = stream.peer_addr()?.to_string();
        let (read_half, write_half) = stream.into_split();
        let (events, reader) = spawn_reader(read_half);
        self.writer = Some(write_half);
        self.reader = Some(reader);
        Ok(Connection { peer, events })
    }

    async fn send(&mut self, payload: &[u8]) -> Result<(), TransportError> {
        let writer = self.writer.as_mut().ok_or(TransportError::NotConnected)?;
        let mut message = Vec::with_capacity(payload.len() + 1);
        message.extend_from_slice(payload);
        message.push(MESSAGE_DELIMITER);
        writer
            .write_all(&message)
            .await
            .map_err(|e| TransportError::Send(e.to_string()))?;
        Ok(())
    }

    async fn disconnect(&mut self) {
        if let Some(mut writer) = self.writer.take() {
            if let Err(error) = writer.shutdown().await {
                debug!("Failed closing link cleanly: {}", error);
            }
        }
        if let Some(reader) = self.reader.take() {
            reader.abort();
        }
    }
}

/// Splits a byte stream into messages and forwards them as events until
/// the stream ends.
pub fn spawn_reader<R>(reader: R) -> (mpsc::Receiver<TransportEvent>, JoinHandle<()>)
where
    R: AsyncRead + Unpin + Send + 'static,
{
    let (tx, rx) = mpsc::channel(EVENT_QUEUE);
    let handle = tokio::spawn(async move {
        let mut reader = BufReader::new(reader);
        let mut buffer = Vec::new();
        loop {
            buffer.clear();
            match reader.read_until(MESSAGE_DELIMITER, &mut buffer).await {
                Ok(0) => break,
                Ok(_) => {
                    if buffer.last() == Some(&MESSAGE_DELIMITER) {
                        buffer.pop();
                    }
                    if tx.send(TransportEvent::Received(buffer.clone())).await.is_err() {
                        // nobody is listening anymore
                        return;
                    }
                }
                Err(error) => {
                    warn!("Link read error: {}", error);
                    break;
                }
            }
        }
        let _ = tx.send(TransportEvent::Lost).await;
    });
    (rx, handle)
}
