//! Push transports
//!
//! [`WsConnector`] opens a WebSocket to the push endpoint; [`memory_pair`]
//! wires a client to an in-process [`MemoryServer`] for tests and embedding.

use async_trait::async_trait;
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use shared::message::PushMessage;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::net::TcpStream;
use tokio::sync::{Mutex, mpsc};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};

use crate::config::Identity;
use crate::error::PushError;

/// One open push connection
///
/// `read_message` must be cancel-safe: the client races it against shutdown
/// and keepalive timers.
#[async_trait]
pub trait PushTransport: Send + Sync + std::fmt::Debug {
    /// Next frame. `InvalidMessage` / `Serialization` errors are per-frame;
    /// anything else means the connection is gone.
    async fn read_message(&self) -> Result<PushMessage, PushError>;
    async fn write_message(&self, msg: &PushMessage) -> Result<(), PushError>;
    /// Keepalive
    async fn ping(&self) -> Result<(), PushError>;
    async fn close(&self) -> Result<(), PushError>;
}

/// Opens push connections for an identity
#[async_trait]
pub trait Connector: Send + Sync + std::fmt::Debug {
    async fn connect(&self, identity: &Identity) -> Result<Box<dyn PushTransport>, PushError>;
}

// ========== WebSocket ==========

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// WebSocket connector (`ws://` or `wss://`)
///
/// Identity goes into the query string: `?userId=..&role=..&sessionId=..`.
#[derive(Debug, Clone)]
pub struct WsConnector {
    url: String,
}

impl WsConnector {
    pub fn new(url: impl Into<String>) -> Self {
        Self { url: url.into() }
    }

    /// Endpoint URL including identity query parameters
    pub fn endpoint(&self, identity: &Identity) -> Result<reqwest::Url, PushError> {
        let mut url = reqwest::Url::parse(&self.url)
            .map_err(|e| PushError::Connection(format!("Invalid push URL {}: {}", self.url, e)))?;
        {
            let mut query = url.query_pairs_mut();
            if let Some(user_id) = &identity.user_id {
                query.append_pair("userId", user_id);
            }
            query.append_pair("role", &identity.role);
            query.append_pair("sessionId", &identity.session_id);
        }
        Ok(url)
    }
}

#[async_trait]
impl Connector for WsConnector {
    async fn connect(&self, identity: &Identity) -> Result<Box<dyn PushTransport>, PushError> {
        let url = self.endpoint(identity)?;
        let (ws, _response) = tokio_tungstenite::connect_async(url.as_str())
            .await
            .map_err(|e| PushError::Connection(e.to_string()))?;
        tracing::debug!(url = %self.url, "WebSocket connected");
        Ok(Box::new(WsTransport::new(ws)))
    }
}

/// WebSocket transport: JSON text frames
pub struct WsTransport {
    sink: Mutex<SplitSink<WsStream, Message>>,
    stream: Mutex<SplitStream<WsStream>>,
}

impl WsTransport {
    pub fn new(ws: WsStream) -> Self {
        let (sink, stream) = ws.split();
        Self {
            sink: Mutex::new(sink),
            stream: Mutex::new(stream),
        }
    }
}

impl std::fmt::Debug for WsTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WsTransport").finish_non_exhaustive()
    }
}

#[async_trait]
impl PushTransport for WsTransport {
    async fn read_message(&self) -> Result<PushMessage, PushError> {
        let mut stream = self.stream.lock().await;
        loop {
            match stream.next().await {
                Some(Ok(Message::Text(text))) => {
                    return PushMessage::from_text(text.as_str())
                        .map_err(|e| PushError::InvalidMessage(e.to_string()));
                }
                Some(Ok(Message::Close(_))) | None => return Err(PushError::Closed),
                Some(Err(e)) => return Err(PushError::Connection(e.to_string())),
                // Ping is answered by tungstenite; Pong / Binary ignored
                Some(Ok(_)) => {}
            }
        }
    }

    async fn write_message(&self, msg: &PushMessage) -> Result<(), PushError> {
        let text = msg.to_text()?;
        self.sink
            .lock()
            .await
            .send(Message::Text(text.into()))
            .await
            .map_err(|e| PushError::Connection(e.to_string()))
    }

    async fn ping(&self) -> Result<(), PushError> {
        self.sink
            .lock()
            .await
            .send(Message::Ping(vec![].into()))
            .await
            .map_err(|e| PushError::Connection(e.to_string()))
    }

    async fn close(&self) -> Result<(), PushError> {
        let _ = self.sink.lock().await.close().await;
        Ok(())
    }
}

// ========== In-memory ==========

/// In-process connector for tests and embedded backends
///
/// Every successful `connect` hands a [`MemoryPeer`] to the paired
/// [`MemoryServer`].
#[derive(Debug, Clone)]
pub struct MemoryConnector {
    accept_tx: mpsc::UnboundedSender<MemoryPeer>,
    online: Arc<AtomicBool>,
}

/// Server side of [`MemoryConnector`]
#[derive(Debug)]
pub struct MemoryServer {
    accept_rx: mpsc::UnboundedReceiver<MemoryPeer>,
    online: Arc<AtomicBool>,
}

/// Create a connected connector / server pair
pub fn memory_pair() -> (MemoryConnector, MemoryServer) {
    let (accept_tx, accept_rx) = mpsc::unbounded_channel();
    let online = Arc::new(AtomicBool::new(true));
    (
        MemoryConnector {
            accept_tx,
            online: online.clone(),
        },
        MemoryServer { accept_rx, online },
    )
}

impl MemoryServer {
    /// Next client connection
    pub async fn accept(&mut self) -> Option<MemoryPeer> {
        self.accept_rx.recv().await
    }

    /// While offline, `connect` fails
    pub fn set_online(&self, online: bool) {
        self.online.store(online, Ordering::SeqCst);
    }
}

#[async_trait]
impl Connector for MemoryConnector {
    async fn connect(&self, identity: &Identity) -> Result<Box<dyn PushTransport>, PushError> {
        if !self.online.load(Ordering::SeqCst) {
            return Err(PushError::Connection("memory server offline".into()));
        }
        let (to_client_tx, to_client_rx) = mpsc::unbounded_channel();
        let (to_server_tx, to_server_rx) = mpsc::unbounded_channel();
        let peer = MemoryPeer {
            identity: identity.clone(),
            tx: to_client_tx,
            rx: to_server_rx,
        };
        self.accept_tx
            .send(peer)
            .map_err(|_| PushError::Connection("memory server dropped".into()))?;
        Ok(Box::new(MemoryTransport {
            rx: Mutex::new(to_client_rx),
            tx: to_server_tx,
        }))
    }
}

/// Server-side handle of one in-memory connection. Dropping it closes the
/// connection.
#[derive(Debug)]
pub struct MemoryPeer {
    pub identity: Identity,
    tx: mpsc::UnboundedSender<String>,
    rx: mpsc::UnboundedReceiver<String>,
}

impl MemoryPeer {
    pub fn send(&self, msg: &PushMessage) -> Result<(), PushError> {
        self.send_text(msg.to_text()?)
    }

    /// Send a raw text frame
    pub fn send_text(&self, text: impl Into<String>) -> Result<(), PushError> {
        self.tx.send(text.into()).map_err(|_| PushError::Closed)
    }

    /// Next frame from the client; `None` once the client is gone
    pub async fn recv(&mut self) -> Option<PushMessage> {
        loop {
            let text = self.rx.recv().await?;
            match PushMessage::from_text(&text) {
                Ok(msg) => return Some(msg),
                Err(e) => tracing::warn!("Memory peer got invalid frame: {}", e),
            }
        }
    }
}

/// Client side of an in-memory connection
#[derive(Debug)]
pub struct MemoryTransport {
    rx: Mutex<mpsc::UnboundedReceiver<String>>,
    tx: mpsc::UnboundedSender<String>,
}

#[async_trait]
impl PushTransport for MemoryTransport {
    async fn read_message(&self) -> Result<PushMessage, PushError> {
        let text = self.rx.lock().await.recv().await.ok_or(PushError::Closed)?;
        PushMessage::from_text(&text).map_err(|e| PushError::InvalidMessage(e.to_string()))
    }

    async fn write_message(&self, msg: &PushMessage) -> Result<(), PushError> {
        self.tx.send(msg.to_text()?).map_err(|_| PushError::Closed)
    }

    async fn ping(&self) -> Result<(), PushError> {
        if self.tx.is_closed() {
            return Err(PushError::Closed);
        }
        Ok(())
    }

    async fn close(&self) -> Result<(), PushError> {
        self.rx.lock().await.close();
        Ok(())
    }
}
