//! Validator WebSocket sink.
//!
//! Each delivery opens a short-lived socket, writes one envelope as a text
//! frame and waits for a single reply. A reply mentioning `ERROR` is a
//! rejection.

use std::time::Duration;

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use serde::Serialize;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;
use tracing::{info, instrument, warn};

use crate::domain::error::{IndexerError, IndexerResult};
use crate::domain::message::PriceMessage;
use crate::domain::snapshot::UTC_FORMAT;
use crate::ports::delivery::MessageSink;

#[derive(Debug, Serialize)]
struct Envelope<'a> {
    message: &'a PriceMessage,
    node_id: &'a str,
    validation_timestamp: String,
}

fn is_rejection(reply: &str) -> bool {
    reply.contains("ERROR")
}

/// Delivers messages to a validator node.
pub struct ValidatorSink {
    url: String,
    node_id: String,
    timeout: Duration,
}

impl ValidatorSink {
    pub fn new(url: impl Into<String>, node_id: impl Into<String>, timeout: Duration) -> Self {
        Self { url: url.into(), node_id: node_id.into(), timeout }
    }

    fn encode(&self, message: &PriceMessage) -> IndexerResult<String> {
        let envelope = Envelope {
            message,
            node_id: &self.node_id,
            validation_timestamp: chrono::Utc::now().format(UTC_FORMAT).to_string(),
        };
        serde_json::to_string(&envelope)
            .map_err(|e| IndexerError::Data(format!("cannot encode envelope: {e}")))
    }

    async fn send(&self, frame: String) -> IndexerResult<String> {
        let (mut socket, _) = connect_async(&self.url)
            .await
            .map_err(|e| IndexerError::Transport(format!("validator connection failed: {e}")))?;
        socket
            .send(Message::Text(frame.into()))
            .await
            .map_err(|e| IndexerError::Transport(format!("validator send failed: {e}")))?;

        let reply = loop {
            match socket.next().await {
                Some(Ok(Message::Text(text))) => break text.to_string(),
                Some(Ok(Message::Close(_))) | None => break String::new(),
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    return Err(IndexerError::Transport(format!("validator receive failed: {e}")));
                }
            }
        };
        let _ = socket.close(None).await;
        Ok(reply)
    }
}

#[async_trait]
impl MessageSink for ValidatorSink {
    #[instrument(skip(self, message), fields(feed = %message.feed))]
    async fn deliver(&self, message: &PriceMessage) -> IndexerResult<bool> {
        let frame = self.encode(message)?;
        let reply = tokio::time::timeout(self.timeout, self.send(frame))
            .await
            .map_err(|_| IndexerError::Transport("validator reply timed out".into()))??;

        if is_rejection(&reply) {
            warn!(reply = %reply, "Validator rejected submission");
            return Ok(false);
        }
        info!("Submission accepted");
        Ok(true)
    }
}
