//! WebSocket client for the chat relay.
//!
//! Wraps the connection lifecycle and hands the application a typed
//! event stream. Frames are already a closed enum, so events carry the
//! decoded [`ServerFrame`] directly; there is deliberately no offline
//! queue — delivery is best effort while connected, and a disconnected
//! send fails fast instead of being replayed later.

use std::sync::Arc;

use futures_util::{SinkExt, StreamExt};
use tokio::sync::{mpsc, RwLock};
use uuid::Uuid;

use crate::files::FileRef;
use crate::history::MessageDraft;
use crate::protocol::{ClientFrame, Identity, ProtocolError, ServerFrame};

/// Client connection state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
}

/// Events surfaced to the embedding application.
#[derive(Debug, Clone)]
pub enum ClientEvent {
    /// Connection established and the Join frame is on its way
    Connected,
    /// Connection lost or closed
    Disconnected,
    /// A frame pushed by the relay
    Server(ServerFrame),
}

/// The relay client.
pub struct RelayClient {
    identity: Identity,
    state: Arc<RwLock<ConnectionState>>,
    /// Channel to the WebSocket writer task
    outgoing_tx: Option<mpsc::Sender<tokio_tungstenite::tungstenite::Message>>,
    event_tx: mpsc::Sender<ClientEvent>,
    event_rx: Option<mpsc::Receiver<ClientEvent>>,
    server_url: String,
}

impl RelayClient {
    pub fn new(identity: Identity, server_url: impl Into<String>) -> Self {
        let (event_tx, event_rx) = mpsc::channel(256);
        Self {
            identity,
            state: Arc::new(RwLock::new(ConnectionState::Disconnected)),
            outgoing_tx: None,
            event_tx,
            event_rx: Some(event_rx),
            server_url: server_url.into(),
        }
    }

    /// Take the event receiver (can only be called once).
    pub fn take_event_rx(&mut self) -> Option<mpsc::Receiver<ClientEvent>> {
        self.event_rx.take()
    }

    pub fn identity(&self) -> &Identity {
        &self.identity
    }

    pub async fn connection_state(&self) -> ConnectionState {
        *self.state.read().await
    }

    /// Connect, claim the identity, and spawn the reader/writer tasks.
    pub async fn connect(&mut self) -> Result<(), ProtocolError> {
        *self.state.write().await = ConnectionState::Connecting;

        let ws_stream = match tokio_tungstenite::connect_async(&self.server_url).await {
            Ok((ws_stream, _)) => ws_stream,
            Err(e) => {
                log::warn!("connect to {} failed: {e}", self.server_url);
                *self.state.write().await = ConnectionState::Disconnected;
                return Err(ProtocolError::ConnectionClosed);
            }
        };
        let (mut ws_writer, mut ws_reader) = ws_stream.split();

        // Writer task: forward the outgoing channel to the socket
        let (out_tx, mut out_rx) =
            mpsc::channel::<tokio_tungstenite::tungstenite::Message>(256);
        self.outgoing_tx = Some(out_tx);
        tokio::spawn(async move {
            while let Some(msg) = out_rx.recv().await {
                if ws_writer.send(msg).await.is_err() {
                    break;
                }
            }
        });

        // First frame on the wire claims our identity
        self.send(ClientFrame::Join {
            identity: self.identity.clone(),
        })
        .await?;

        *self.state.write().await = ConnectionState::Connected;
        let _ = self.event_tx.send(ClientEvent::Connected).await;

        // Reader task: decode pushed frames into events
        let event_tx = self.event_tx.clone();
        let state = self.state.clone();
        tokio::spawn(async move {
            while let Some(msg) = ws_reader.next().await {
                match msg {
                    Ok(tokio_tungstenite::tungstenite::Message::Binary(data)) => {
                        match ServerFrame::decode(&data) {
                            Ok(frame) => {
                                if event_tx.send(ClientEvent::Server(frame)).await.is_err() {
                                    break;
                                }
                            }
                            Err(e) => log::warn!("undecodable frame from relay: {e}"),
                        }
                    }
                    Ok(tokio_tungstenite::tungstenite::Message::Close(_)) | Err(_) => break,
                    Ok(_) => {}
                }
            }
            *state.write().await = ConnectionState::Disconnected;
            let _ = event_tx.send(ClientEvent::Disconnected).await;
        });

        Ok(())
    }

    /// Send a close frame and stop; the reader task observes the close
    /// handshake and reports `Disconnected`.
    pub async fn disconnect(&mut self) {
        if let Some(tx) = self.outgoing_tx.take() {
            let _ = tx
                .send(tokio_tungstenite::tungstenite::Message::Close(None))
                .await;
        }
        *self.state.write().await = ConnectionState::Disconnected;
    }

    /// Encode and queue a frame for the writer task.
    pub async fn send(&self, frame: ClientFrame) -> Result<(), ProtocolError> {
        let encoded = frame.encode()?;
        match &self.outgoing_tx {
            Some(tx) => tx
                .send(tokio_tungstenite::tungstenite::Message::Binary(
                    encoded.into(),
                ))
                .await
                .map_err(|_| ProtocolError::ConnectionClosed),
            None => Err(ProtocolError::ConnectionClosed),
        }
    }

    // ── one helper per client frame ─────────────────────────────────

    pub async fn post(&self, channel_id: Uuid, text: impl Into<String>) -> Result<(), ProtocolError> {
        self.send(ClientFrame::Post {
            draft: MessageDraft::text(channel_id, text.into()),
        })
        .await
    }

    pub async fn post_with_attachment(
        &self,
        channel_id: Uuid,
        text: impl Into<String>,
        attachment: FileRef,
    ) -> Result<(), ProtocolError> {
        let mut draft = MessageDraft::text(channel_id, text.into());
        draft.attachment = Some(attachment);
        self.send(ClientFrame::Post { draft }).await
    }

    pub async fn reply(
        &self,
        channel_id: Uuid,
        reply_to: Uuid,
        text: impl Into<String>,
    ) -> Result<(), ProtocolError> {
        let mut draft = MessageDraft::text(channel_id, text.into());
        draft.reply_to = Some(reply_to);
        self.send(ClientFrame::Post { draft }).await
    }

    pub async fn edit(
        &self,
        channel_id: Uuid,
        message_id: Uuid,
        new_text: impl Into<String>,
    ) -> Result<(), ProtocolError> {
        self.send(ClientFrame::Edit {
            channel_id,
            message_id,
            new_text: new_text.into(),
        })
        .await
    }

    pub async fn delete(&self, channel_id: Uuid, message_id: Uuid) -> Result<(), ProtocolError> {
        self.send(ClientFrame::Delete {
            channel_id,
            message_id,
        })
        .await
    }

    pub async fn toggle_reaction(
        &self,
        channel_id: Uuid,
        message_id: Uuid,
        emoji: impl Into<String>,
    ) -> Result<(), ProtocolError> {
        self.send(ClientFrame::ToggleReaction {
            channel_id,
            message_id,
            emoji: emoji.into(),
        })
        .await
    }

    pub async fn create_channel(
        &self,
        name: impl Into<String>,
        description: Option<String>,
    ) -> Result<(), ProtocolError> {
        self.send(ClientFrame::CreateChannel {
            name: name.into(),
            description,
        })
        .await
    }

    pub async fn rename_channel(
        &self,
        channel_id: Uuid,
        name: impl Into<String>,
        description: Option<String>,
    ) -> Result<(), ProtocolError> {
        self.send(ClientFrame::RenameChannel {
            channel_id,
            name: name.into(),
            description,
        })
        .await
    }

    pub async fn delete_channel(&self, channel_id: Uuid) -> Result<(), ProtocolError> {
        self.send(ClientFrame::DeleteChannel { channel_id }).await
    }
}
