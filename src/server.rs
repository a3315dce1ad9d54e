//! WebSocket relay server.
//!
//! ```text
//! Client A ──┐                       ┌──► Client A
//!            ├──► SyncEngine ──► BroadcastRouter ──► Client B
//! Client B ──┘        │                 └──► Client C
//!                     │
//!              IdentityBinding · PresenceRegistry
//!              ChannelDirectory · HistoryTable
//! ```
//!
//! One task per connection, driving a `select!` over the WebSocket and
//! that connection's broadcast receiver. The engine call completes (and
//! releases every lock) before any frame is written to the network, so a
//! connection dying mid-mutation still leaves the stores consistent — it
//! just never sees the resulting broadcast.

use std::net::SocketAddr;
use std::sync::Arc;

use futures_util::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::RwLock;
use tokio_tungstenite::tungstenite::Message;
use uuid::Uuid;

use crate::broadcast::BroadcastRouter;
use crate::engine::SyncEngine;
use crate::files::AttachmentStore;
use crate::protocol::{ClientFrame, ServerFrame};

/// Server configuration.
#[derive(Debug, Clone)]
pub struct RelayConfig {
    /// Address to bind to
    pub bind_addr: String,
    /// Broadcast buffer per connection before a laggard drops frames
    pub broadcast_capacity: usize,
    /// Name of the channel the directory is seeded with
    pub default_channel: String,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            bind_addr: "127.0.0.1:9191".to_string(),
            broadcast_capacity: 256,
            default_channel: "general".to_string(),
        }
    }
}

/// Server-wide counters.
#[derive(Debug, Clone, Default)]
pub struct RelayStats {
    pub total_connections: u64,
    pub active_connections: u64,
    pub total_frames: u64,
    pub total_bytes: u64,
    pub malformed_frames: u64,
}

/// The chat relay.
pub struct RelayServer {
    config: RelayConfig,
    engine: Arc<SyncEngine>,
    router: Arc<BroadcastRouter>,
    stats: Arc<RwLock<RelayStats>>,
}

impl RelayServer {
    pub fn new(config: RelayConfig, attachments: Arc<dyn AttachmentStore>) -> Self {
        let engine = Arc::new(SyncEngine::new(&config.default_channel, attachments));
        let router = Arc::new(BroadcastRouter::new(config.broadcast_capacity));
        Self {
            config,
            engine,
            router,
            stats: Arc::new(RwLock::new(RelayStats::default())),
        }
    }

    /// Accept WebSocket connections until the process dies.
    ///
    /// Call from an async runtime.
    pub async fn run(&self) -> Result<(), Box<dyn std::error::Error>> {
        let listener = TcpListener::bind(&self.config.bind_addr).await?;
        log::info!("relay listening on {}", self.config.bind_addr);

        loop {
            let (stream, addr) = listener.accept().await?;
            log::debug!("new TCP connection from {addr}");

            let engine = self.engine.clone();
            let router = self.router.clone();
            let stats = self.stats.clone();

            tokio::spawn(async move {
                if let Err(e) = Self::handle_connection(stream, addr, engine, router, stats).await
                {
                    log::error!("connection error from {addr}: {e}");
                }
            });
        }
    }

    /// Drive a single connection from WebSocket upgrade to cleanup.
    async fn handle_connection(
        stream: TcpStream,
        addr: SocketAddr,
        engine: Arc<SyncEngine>,
        router: Arc<BroadcastRouter>,
        stats: Arc<RwLock<RelayStats>>,
    ) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        let ws_stream = tokio_tungstenite::accept_async(stream).await?;

        let conn_id = Uuid::new_v4();
        log::info!("WebSocket connection {conn_id} established from {addr}");

        {
            let mut s = stats.write().await;
            s.total_connections += 1;
            s.active_connections += 1;
        }

        // The session loop may fail mid-write on a dying socket; an
        // abrupt drop must still be treated as a clean leave, so cleanup
        // runs unconditionally afterwards
        let result =
            Self::session_loop(ws_stream, addr, conn_id, &engine, &router, &stats).await;

        let dispatch = engine.disconnect(conn_id).await;
        dispatch.publish_broadcasts(&router);
        stats.write().await.active_connections -= 1;

        result
    }

    /// Pump one connection's frames until it closes or errors.
    async fn session_loop(
        ws_stream: tokio_tungstenite::WebSocketStream<TcpStream>,
        addr: SocketAddr,
        conn_id: Uuid,
        engine: &SyncEngine,
        router: &BroadcastRouter,
        stats: &RwLock<RelayStats>,
    ) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        let (mut ws_sender, mut ws_receiver) = ws_stream.split();

        // Subscribing before the first frame means even an unbound
        // connection observes broadcasts, exactly like a lurking tab
        let mut broadcast_rx = router.subscribe();

        loop {
            tokio::select! {
                // Incoming WebSocket message
                msg = ws_receiver.next() => {
                    match msg {
                        Some(Ok(Message::Binary(data))) => {
                            let bytes: Vec<u8> = data.into();
                            {
                                let mut s = stats.write().await;
                                s.total_frames += 1;
                                s.total_bytes += bytes.len() as u64;
                            }

                            match ClientFrame::decode(&bytes) {
                                Ok(frame) => {
                                    // handle() returns with every lock
                                    // released; the broadcast goes out even
                                    // if this socket can no longer be
                                    // written to
                                    let dispatch = engine.handle(conn_id, frame).await;
                                    dispatch.publish_broadcasts(router);
                                    for frame in &dispatch.reply {
                                        let encoded = frame.encode()?;
                                        ws_sender.send(Message::Binary(encoded.into())).await?;
                                    }
                                }
                                Err(e) => {
                                    log::warn!("malformed frame from {addr}: {e}");
                                    stats.write().await.malformed_frames += 1;
                                    let rejected = ServerFrame::Rejected {
                                        reason: "malformed frame".to_string(),
                                    };
                                    ws_sender
                                        .send(Message::Binary(rejected.encode()?.into()))
                                        .await?;
                                }
                            }
                        }

                        Some(Ok(Message::Close(_))) | None => {
                            log::info!("connection {conn_id} closed from {addr}");
                            break;
                        }

                        Some(Ok(Message::Ping(data))) => {
                            ws_sender.send(Message::Pong(data)).await?;
                        }

                        Some(Ok(other)) => {
                            log::debug!("ignoring non-binary frame from {addr}: {other:?}");
                        }

                        Some(Err(e)) => {
                            log::warn!("WebSocket error from {addr}: {e}");
                            break;
                        }
                    }
                }

                // Outgoing broadcast frame
                out = broadcast_rx.recv() => {
                    match out {
                        Ok(bytes) => {
                            ws_sender.send(Message::Binary(bytes.to_vec().into())).await?;
                        }
                        Err(tokio::sync::broadcast::error::RecvError::Lagged(n)) => {
                            log::warn!("connection {conn_id} lagged by {n} frames");
                        }
                        Err(_) => break,
                    }
                }
            }
        }

        Ok(())
    }

    pub async fn stats(&self) -> RelayStats {
        self.stats.read().await.clone()
    }

    pub fn bind_addr(&self) -> &str {
        &self.config.bind_addr
    }

    pub fn engine(&self) -> &Arc<SyncEngine> {
        &self.engine
    }

    pub fn router(&self) -> &Arc<BroadcastRouter> {
        &self.router
    }
}
