//! Bidirectional media channel between a client and one session.
//!
//! A connection is split into an inbound half (configuration text followed
//! by binary PCM audio) and an outbound half (synthesized audio and
//! error notices). The WebSocket, in-memory and WAV file transports all
//! plug in through the same two traits.

pub mod memory;
pub mod wav;
pub mod ws;

use crate::error::Result;
use async_trait::async_trait;
use bytes::Bytes;
use serde::Serialize;

/// Message received from the client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InboundMessage {
    Text(String),
    Binary(Bytes),
}

/// Receiving half of a connection.
#[async_trait]
pub trait InboundChannel: Send {
    /// Next message, `None` once the client closed cleanly.
    async fn recv(&mut self) -> Option<Result<InboundMessage>>;
}

/// Sending half of a connection.
#[async_trait]
pub trait OutboundChannel: Send {
    /// Deliver one synthesized utterance.
    async fn send_audio(&mut self, audio: Bytes) -> Result<()>;

    /// Tell the client why the session ended early.
    async fn send_notice(&mut self, notice: &Notice) -> Result<()>;

    /// Close the channel. Safe to call more than once.
    async fn close(&mut self) -> Result<()>;
}

/// JSON text frame sent to clients on errors.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Notice {
    #[serde(rename = "type")]
    pub kind: NoticeKind,
    pub message: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum NoticeKind {
    ConfigError,
    ServiceError,
    Overload,
    Unavailable,
}

impl Notice {
    pub fn new(kind: NoticeKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn to_json(&self) -> String {
        // Serializing a struct of strings cannot fail.
        serde_json::to_string(self).unwrap_or_else(|_| String::from("{}"))
    }
}

/// Both halves of one client connection.
pub struct Connection {
    pub inbound: Box<dyn InboundChannel>,
    pub outbound: Box<dyn OutboundChannel>,
    /// Peer description for logs.
    pub peer: String,
}

impl Connection {
    pub fn new(
        inbound: Box<dyn InboundChannel>,
        outbound: Box<dyn OutboundChannel>,
        peer: impl Into<String>,
    ) -> Self {
        Self {
            inbound,
            outbound,
            peer: peer.into(),
        }
    }
}
