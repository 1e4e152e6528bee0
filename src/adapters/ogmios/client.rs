//! Ogmios WebSocket Client - JSON-RPC over a persistent socket
//!
//! One client owns one socket. Requests are strictly sequential: a
//! request is written, then frames are read until the one carrying the
//! same JSON-RPC id arrives. `nextBlock` waits without a deadline (the
//! caller races it against shutdown); every other call is bounded by the
//! configured request timeout.
//!
//! A transport failure drops the session; the next call (or an explicit
//! [`ChainSync::reconnect`]) opens a fresh socket.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use serde::de::DeserializeOwned;
use serde_json::{json, Value};
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, info, instrument, warn};

use super::types::{
    decode_response, IntersectionResult, NextBlockResult, RpcEnvelope, RpcRequest, WirePoint,
    WireUtxo, JSONRPC_VERSION,
};
use crate::config::OgmiosConfig;
use crate::domain::block::{ChainEvent, ChainPoint};
use crate::domain::error::{IndexerError, IndexerResult};
use crate::domain::utxo::CanonicalUtxo;
use crate::ports::chain::{ChainQuery, ChainSync};
use crate::ports::utxo_source::UtxoSource;

type Socket = WebSocketStream<MaybeTlsStream<TcpStream>>;

fn transport(context: &str, err: impl std::fmt::Display) -> IndexerError {
    IndexerError::Transport(format!("{context}: {err}"))
}

/// Ogmios client implementing the chain and UTxO ports.
pub struct OgmiosClient {
    url: String,
    request_timeout: Duration,
    session: Mutex<Option<Socket>>,
    next_id: AtomicU64,
}

impl OgmiosClient {
    /// Create a client. The socket is opened lazily on first use.
    pub fn new(config: &OgmiosConfig) -> Self {
        Self {
            url: config.url.clone(),
            request_timeout: Duration::from_secs(config.request_timeout_secs),
            session: Mutex::new(None),
            next_id: AtomicU64::new(1),
        }
    }

    /// Open the socket now instead of on first request.
    pub async fn connect(&self) -> IndexerResult<()> {
        let mut session = self.session.lock().await;
        *session = Some(self.open().await?);
        Ok(())
    }

    async fn open(&self) -> IndexerResult<Socket> {
        let (socket, _) = tokio::time::timeout(self.request_timeout, connect_async(&self.url))
            .await
            .map_err(|_| IndexerError::Transport(format!("connect to {} timed out", self.url)))?
            .map_err(|e| transport("Ogmios connection failed", e))?;
        info!(url = %self.url, "Ogmios WebSocket connected");
        Ok(socket)
    }

    /// Send one request and return the text of its response frame.
    async fn exchange(&self, method: &str, params: Option<Value>) -> IndexerResult<String> {
        let mut guard = self.session.lock().await;
        if guard.is_none() {
            *guard = Some(self.open().await?);
        }
        let Some(socket) = guard.as_mut() else {
            return Err(IndexerError::Transport("no Ogmios session".into()));
        };

        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let request = RpcRequest { jsonrpc: JSONRPC_VERSION, method, params, id };
        let text = serde_json::to_string(&request)
            .map_err(|e| IndexerError::Data(format!("cannot encode {method}: {e}")))?;

        let outcome = Self::round_trip(socket, text, id).await;
        if outcome.as_ref().is_err_and(IndexerError::is_transport) {
            *guard = None;
        }
        outcome
    }

    async fn round_trip(socket: &mut Socket, text: String, id: u64) -> IndexerResult<String> {
        socket
            .send(Message::Text(text.into()))
            .await
            .map_err(|e| transport("Ogmios send failed", e))?;

        loop {
            match socket.next().await {
                Some(Ok(Message::Text(frame))) => {
                    let frame = frame.to_string();
                    let envelope: RpcEnvelope = serde_json::from_str(&frame)
                        .map_err(|e| IndexerError::Data(format!("invalid Ogmios frame: {e}")))?;
                    if envelope.answers(id) {
                        return Ok(frame);
                    }
                    debug!(expected = id, "Skipping stale Ogmios response");
                }
                Some(Ok(Message::Ping(_) | Message::Pong(_))) => {}
                Some(Ok(Message::Close(frame))) => {
                    return Err(IndexerError::Transport(format!("Ogmios closed the socket: {frame:?}")));
                }
                Some(Ok(_)) => {}
                Some(Err(e)) => return Err(transport("Ogmios receive failed", e)),
                None => return Err(IndexerError::Transport("Ogmios stream ended".into())),
            }
        }
    }

    async fn call<T: DeserializeOwned>(&self, method: &str, params: Option<Value>) -> IndexerResult<T> {
        let frame = tokio::time::timeout(self.request_timeout, self.exchange(method, params))
            .await
            .map_err(|_| IndexerError::Transport(format!("{method} timed out")))??;
        decode_response(&frame, method)
    }
}

#[async_trait]
impl ChainQuery for OgmiosClient {
    async fn tip(&self) -> IndexerResult<ChainPoint> {
        let tip: WirePoint = self.call("queryNetwork/tip", None).await?;
        tip.into_point()
            .ok_or_else(|| IndexerError::Data("chain tip is at origin".into()))
    }

    async fn epoch(&self) -> IndexerResult<u64> {
        self.call("queryLedgerState/epoch", None).await
    }
}

#[async_trait]
impl ChainSync for OgmiosClient {
    #[instrument(skip(self), fields(slot = point.slot))]
    async fn find_intersection(&self, point: &ChainPoint) -> IndexerResult<ChainPoint> {
        let params = json!({ "points": [{ "slot": point.slot, "id": point.id }] });
        let found: IntersectionResult = self.call("findIntersection", Some(params)).await?;
        found
            .intersection
            .into_point()
            .ok_or_else(|| IndexerError::Consistency("intersection found at origin".into()))
    }

    async fn next_block(&self) -> IndexerResult<ChainEvent> {
        let frame = self.exchange("nextBlock", None).await?;
        let next: NextBlockResult = decode_response(&frame, "nextBlock")?;
        next.into_event()
    }

    async fn reconnect(&self) -> IndexerResult<()> {
        let mut session = self.session.lock().await;
        if let Some(mut old) = session.take() {
            if let Err(e) = old.close(None).await {
                debug!(error = %e, "Closing stale Ogmios socket failed");
            }
        }
        warn!(url = %self.url, "Reconnecting to Ogmios");
        *session = Some(self.open().await?);
        Ok(())
    }
}

#[async_trait]
impl UtxoSource for OgmiosClient {
    async fn utxos_at(&self, address: &str) -> IndexerResult<Vec<CanonicalUtxo>> {
        let params = json!({ "addresses": [address] });
        let utxos: Vec<WireUtxo> = self.call("queryLedgerState/utxo", Some(params)).await?;
        Ok(utxos.into_iter().map(WireUtxo::into_utxo).collect())
    }
}
