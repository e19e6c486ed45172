//! Output dispatcher: writes synthesized audio to the client in utterance
//! order.

use crate::error::{Result, TransteekError};
use crate::pipeline::frame::AudioOutputChunk;
use crate::transport::{Notice, OutboundChannel};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

pub struct OutputDispatcher {
    outbound: Box<dyn OutboundChannel>,
    write_timeout: Duration,
    last_index: Option<u64>,
    chunks_sent: u64,
    bytes_sent: u64,
}

impl OutputDispatcher {
    pub fn new(outbound: Box<dyn OutboundChannel>, write_timeout: Duration) -> Self {
        Self {
            outbound,
            write_timeout,
            last_index: None,
            chunks_sent: 0,
            bytes_sent: 0,
        }
    }

    /// Write one chunk. Chunks must arrive with increasing indices.
    ///
    /// A write that fails or exceeds the write timeout is a transport error.
    pub async fn dispatch(&mut self, chunk: AudioOutputChunk, cancel: &CancellationToken) -> Result<()> {
        if let Some(last) = self.last_index
            && chunk.index <= last
        {
            return Err(TransteekError::Other(format!(
                "utterance {} dispatched after utterance {}",
                chunk.index, last
            )));
        }

        let len = chunk.audio.len() as u64;
        let write = tokio::time::timeout(self.write_timeout, self.outbound.send_audio(chunk.audio));
        let written = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(TransteekError::Cancelled),
            written = write => written,
        };
        match written {
            Ok(Ok(())) => {}
            Ok(Err(e)) => return Err(e),
            Err(_) => {
                return Err(TransteekError::transport(format!(
                    "client did not accept audio within {}ms",
                    self.write_timeout.as_millis()
                )));
            }
        }

        self.last_index = Some(chunk.index);
        self.chunks_sent += 1;
        self.bytes_sent += len;
        tracing::debug!(index = chunk.index, bytes = len, "audio dispatched");
        Ok(())
    }

    /// Best-effort notice to the client.
    pub async fn notify(&mut self, notice: &Notice) {
        match tokio::time::timeout(self.write_timeout, self.outbound.send_notice(notice)).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => tracing::debug!(error = %e, "notice not delivered"),
            Err(_) => tracing::debug!("notice timed out"),
        }
    }

    /// Close the outbound channel.
    pub async fn close(&mut self) {
        match tokio::time::timeout(self.write_timeout, self.outbound.close()).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => tracing::debug!(error = %e, "outbound close failed"),
            Err(_) => tracing::debug!("outbound close timed out"),
        }
    }

    pub fn chunks_sent(&self) -> u64 {
        self.chunks_sent
    }

    pub fn bytes_sent(&self) -> u64 {
        self.bytes_sent
    }
}
