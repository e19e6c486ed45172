//! WebSocket transport.
//!
//! Text frames carry the configuration message and outbound notices, binary
//! frames carry PCM audio in and synthesized audio out.

use crate::error::{Result, TransteekError};
use crate::transport::{Connection, InboundChannel, InboundMessage, Notice, OutboundChannel};
use async_trait::async_trait;
use axum::extract::ws::{Message, WebSocket};
use bytes::Bytes;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};

/// Split an upgraded socket into a session connection.
pub fn connection(socket: WebSocket, peer: impl Into<String>) -> Connection {
    let (sink, stream) = socket.split();
    Connection::new(
        Box::new(WsInbound { stream }),
        Box::new(WsOutbound {
            sink,
            closed: false,
        }),
        peer,
    )
}

pub struct WsInbound {
    stream: SplitStream<WebSocket>,
}

/// What a single WebSocket frame means to a session.
#[derive(Debug, PartialEq, Eq)]
enum Decoded {
    Message(InboundMessage),
    Skip,
    Closed,
}

fn decode(message: Message) -> Decoded {
    match message {
        Message::Text(text) => Decoded::Message(InboundMessage::Text(text)),
        Message::Binary(data) => Decoded::Message(InboundMessage::Binary(Bytes::from(data))),
        Message::Ping(_) | Message::Pong(_) => Decoded::Skip,
        Message::Close(_) => Decoded::Closed,
    }
}

#[async_trait]
impl InboundChannel for WsInbound {
    async fn recv(&mut self) -> Option<Result<InboundMessage>> {
        loop {
            match self.stream.next().await? {
                Ok(message) => match decode(message) {
                    Decoded::Message(message) => return Some(Ok(message)),
                    Decoded::Skip => continue,
                    Decoded::Closed => return None,
                },
                Err(e) => return Some(Err(TransteekError::transport(e.to_string()))),
            }
        }
    }
}

pub struct WsOutbound {
    sink: SplitSink<WebSocket, Message>,
    closed: bool,
}

impl WsOutbound {
    async fn send(&mut self, message: Message) -> Result<()> {
        if self.closed {
            return Err(TransteekError::transport("websocket already closed"));
        }
        self.sink
            .send(message)
            .await
            .map_err(|e| TransteekError::transport(e.to_string()))
    }
}

#[async_trait]
impl OutboundChannel for WsOutbound {
    async fn send_audio(&mut self, audio: Bytes) -> Result<()> {
        self.send(Message::Binary(audio.to_vec())).await
    }

    async fn send_notice(&mut self, notice: &Notice) -> Result<()> {
        self.send(Message::Text(notice.to_json())).await
    }

    async fn close(&mut self) -> Result<()> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        if let Err(e) = self.sink.send(Message::Close(None)).await {
            tracing::debug!(error = %e, "close frame not delivered");
        }
        self.sink
            .close()
            .await
            .map_err(|e| TransteekError::transport(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_text_and_binary() {
        assert_eq!(
            decode(Message::Text("en-US,fr-FR".to_string())),
            Decoded::Message(InboundMessage::Text("en-US,fr-FR".to_string()))
        );
        assert_eq!(
            decode(Message::Binary(vec![1, 2, 3, 4])),
            Decoded::Message(InboundMessage::Binary(Bytes::from_static(&[1, 2, 3, 4])))
        );
    }

    #[test]
    fn test_decode_control_frames() {
        assert_eq!(decode(Message::Ping(vec![9])), Decoded::Skip);
        assert_eq!(decode(Message::Pong(Vec::new())), Decoded::Skip);
        assert_eq!(decode(Message::Close(None)), Decoded::Closed);
    }
}
