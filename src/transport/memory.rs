//! In-process transport backed by bounded channels.
//!
//! The server side is a regular [`Connection`]; the client side is a
//! [`MemoryClient`] that can send configuration and audio, inject transport
//! failures, and read whatever the session sends back.

use crate::error::{Result, TransteekError};
use crate::transport::{Connection, InboundChannel, InboundMessage, Notice, OutboundChannel};
use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::mpsc;

/// Message observed by the client side of a memory connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutboundMessage {
    Audio(Bytes),
    Notice(Notice),
    Closed,
}

/// Creates a connected client/server pair. `capacity` bounds both
/// directions.
pub fn memory_connection(capacity: usize) -> (MemoryClient, Connection) {
    let (to_server, inbound_rx) = mpsc::channel(capacity.max(1));
    let (outbound_tx, from_server) = mpsc::channel(capacity.max(1));

    let client = MemoryClient {
        to_server: Some(to_server),
        from_server,
    };
    let connection = Connection::new(
        Box::new(MemoryInbound { rx: inbound_rx }),
        Box::new(MemoryOutbound {
            tx: outbound_tx,
            closed: false,
        }),
        "memory",
    );
    (client, connection)
}

/// Client end of a memory connection.
pub struct MemoryClient {
    to_server: Option<mpsc::Sender<Result<InboundMessage>>>,
    from_server: mpsc::Receiver<OutboundMessage>,
}

impl MemoryClient {
    pub async fn send_text(&self, text: &str) -> Result<()> {
        self.send(Ok(InboundMessage::Text(text.to_string()))).await
    }

    pub async fn send_audio(&self, audio: Bytes) -> Result<()> {
        self.send(Ok(InboundMessage::Binary(audio))).await
    }

    /// Make the server's next read fail with a transport error.
    pub async fn fail(&self, reason: &str) -> Result<()> {
        self.send(Err(TransteekError::transport(reason))).await
    }

    /// Stop sending. The server sees a clean end of stream.
    pub fn disconnect(&mut self) {
        self.to_server = None;
    }

    /// Next message from the server, `None` once the server dropped its end.
    pub async fn recv(&mut self) -> Option<OutboundMessage> {
        self.from_server.recv().await
    }

    /// Read until the server closes, returning everything before the close.
    pub async fn collect_until_closed(&mut self) -> Vec<OutboundMessage> {
        let mut received = Vec::new();
        while let Some(message) = self.from_server.recv().await {
            if message == OutboundMessage::Closed {
                break;
            }
            received.push(message);
        }
        received
    }

    async fn send(&self, message: Result<InboundMessage>) -> Result<()> {
        let tx = self
            .to_server
            .as_ref()
            .ok_or_else(|| TransteekError::transport("client already disconnected"))?;
        tx.send(message)
            .await
            .map_err(|_| TransteekError::transport("server stopped reading"))
    }
}

struct MemoryInbound {
    rx: mpsc::Receiver<Result<InboundMessage>>,
}

#[async_trait]
impl InboundChannel for MemoryInbound {
    async fn recv(&mut self) -> Option<Result<InboundMessage>> {
        self.rx.recv().await
    }
}

struct MemoryOutbound {
    tx: mpsc::Sender<OutboundMessage>,
    closed: bool,
}

impl MemoryOutbound {
    async fn deliver(&mut self, message: OutboundMessage) -> Result<()> {
        if self.closed {
            return Err(TransteekError::transport("outbound channel closed"));
        }
        self.tx
            .send(message)
            .await
            .map_err(|_| TransteekError::transport("client went away"))
    }
}

#[async_trait]
impl OutboundChannel for MemoryOutbound {
    async fn send_audio(&mut self, audio: Bytes) -> Result<()> {
        self.deliver(OutboundMessage::Audio(audio)).await
    }

    async fn send_notice(&mut self, notice: &Notice) -> Result<()> {
        self.deliver(OutboundMessage::Notice(notice.clone())).await
    }

    async fn close(&mut self) -> Result<()> {
        if self.closed {
            return Ok(());
        }
        // A client that already left does not need the close marker.
        let _ = self.tx.send(OutboundMessage::Closed).await;
        self.closed = true;
        Ok(())
    }
}
