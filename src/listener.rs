//! Push listener for the server's subscribe stream.
//!
//! Maintains one long-lived SSE subscription for the lifetime of the core.
//! The stream is city-agnostic; filtering is the server's business. Decoded
//! readings are forwarded into the reconciliation queue as push changes;
//! malformed payloads are dropped, never surfaced.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_stream::StreamExt;
use tracing::{debug, warn};

use crate::client::WeatherClient;
use crate::models::{PushPayload, Reading};
use crate::snapshot::{Change, Source};

/// Delay before re-opening a dropped stream.
///
/// Matches the browser `EventSource` default reconnection delay the original
/// transport provided.
const RECONNECT_DELAY: Duration = Duration::from_secs(3);

/// Incremental decoder for an SSE byte stream.
///
/// Feeds raw chunks in, yields one decoded [`Reading`] per well-formed event.
/// Events are blocks separated by a blank line; the payload is the
/// concatenation of the block's `data:` lines.
#[derive(Debug, Default)]
pub struct SseDecoder {
    buffer: String,
}

impl SseDecoder {
    /// Create an empty decoder.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed one chunk of bytes, returning the readings of every event block
    /// completed by it.
    pub fn feed(&mut self, chunk: &[u8]) -> Vec<Reading> {
        self.buffer.push_str(&String::from_utf8_lossy(chunk));

        let mut readings = Vec::new();
        while let Some(end) = self.buffer.find("\n\n") {
            let block: String = self.buffer.drain(..end + 2).collect();
            if let Some(reading) = decode_block(&block) {
                readings.push(reading);
            }
        }
        readings
    }
}

/// Decode one event block into a reading.
///
/// Returns `None` for comment-only blocks, empty blocks, and malformed
/// payloads — the stream is best-effort and a bad event is simply dropped.
fn decode_block(block: &str) -> Option<Reading> {
    let mut data_lines = Vec::new();
    for line in block.lines() {
        let line = line.trim_end_matches('\r');
        if let Some(rest) = line.strip_prefix("data:") {
            data_lines.push(rest.strip_prefix(' ').unwrap_or(rest));
        }
        // "event:", "id:", "retry:" and ":" comment lines are ignored
    }
    if data_lines.is_empty() {
        return None;
    }

    let payload = data_lines.join("\n");
    match serde_json::from_str::<PushPayload>(&payload) {
        Ok(p) => Some(Reading::from(&p)),
        Err(e) => {
            debug!("dropping malformed push payload: {}", e);
            None
        }
    }
}

/// Handle to the live subscription.
///
/// Closing is idempotent; dropping the handle closes the subscription.
#[derive(Debug)]
pub struct PushListener {
    handle: Option<JoinHandle<()>>,
}

impl PushListener {
    /// Open the subscription and start forwarding decoded readings into `tx`.
    ///
    /// If the stream ends or errors, the task waits [`RECONNECT_DELAY`] and
    /// re-opens it, for as long as the listener stays open.
    #[must_use]
    pub fn open(client: Arc<WeatherClient>, tx: mpsc::UnboundedSender<Change>) -> Self {
        let handle = tokio::spawn(async move {
            loop {
                match client.subscribe().await {
                    Ok(response) => {
                        debug!("subscribe stream open");
                        let mut decoder = SseDecoder::new();
                        let mut stream = response.bytes_stream();
                        while let Some(chunk) = stream.next().await {
                            match chunk {
                                Ok(bytes) => {
                                    for reading in decoder.feed(&bytes) {
                                        if tx
                                            .send(Change::Observed {
                                                source: Source::Push,
                                                reading,
                                            })
                                            .is_err()
                                        {
                                            // Core torn down; stop for good
                                            return;
                                        }
                                    }
                                }
                                Err(e) => {
                                    warn!("subscribe stream error: {}", e);
                                    break;
                                }
                            }
                        }
                        debug!("subscribe stream closed, reconnecting");
                    }
                    Err(e) => {
                        warn!("failed to open subscribe stream: {}", e);
                    }
                }
                tokio::time::sleep(RECONNECT_DELAY).await;
            }
        });

        Self {
            handle: Some(handle),
        }
    }

    /// Close the subscription. Safe to call more than once.
    pub fn close(&mut self) {
        if let Some(handle) = self.handle.take() {
            handle.abort();
            debug!("push listener closed");
        }
    }

    /// Whether the subscription has been closed.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.handle.is_none()
    }
}

impl Drop for PushListener {
    fn drop(&mut self) {
        self.close();
    }
}
