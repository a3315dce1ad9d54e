//! The synchronization engine: every mutation funnels through here.
//!
//! ```text
//! Connection task ── ClientFrame ──► SyncEngine::handle
//!                                        │ validate (boundary)
//!                                        │ mutate exactly one store
//!                                        ▼
//!                                    Dispatch ──► reply (this connection)
//!                                             └─► broadcast (all connections)
//! ```
//!
//! The engine owns the authoritative tables — identity binding, presence
//! roster, channel directory, per-channel histories — each behind its own
//! lock, and never touches the network: handlers return the frames to
//! send and the caller dispatches them after every lock is released. A
//! rejected frame mutates nothing and broadcasts nothing; validation and
//! not-found failures are reported to the offending connection only,
//! ownership violations silently.

use std::sync::Arc;

use tokio::sync::RwLock;
use uuid::Uuid;

use crate::broadcast::BroadcastRouter;
use crate::channels::{Channel, ChannelDirectory};
use crate::error::EventError;
use crate::files::{AttachmentError, AttachmentStore, FileRef};
use crate::history::{HistoryTable, Message, MessageDraft};
use crate::presence::{IdentityBinding, PresenceRegistry};
use crate::protocol::{ChannelSnapshot, ClientFrame, Identity, ServerFrame};

/// What to do with the frames a handler produced.
///
/// `reply` goes to the originating connection only; `broadcast` goes to
/// every live connection, sender included.
#[derive(Debug, Default)]
pub struct Dispatch {
    pub reply: Vec<ServerFrame>,
    pub broadcast: Vec<ServerFrame>,
}

impl Dispatch {
    pub fn none() -> Self {
        Self::default()
    }

    pub fn reply(frame: ServerFrame) -> Self {
        Self {
            reply: vec![frame],
            ..Self::default()
        }
    }

    pub fn broadcast(frame: ServerFrame) -> Self {
        Self {
            broadcast: vec![frame],
            ..Self::default()
        }
    }

    pub fn is_empty(&self) -> bool {
        self.reply.is_empty() && self.broadcast.is_empty()
    }

    /// Hand every broadcast frame to the router. Replies stay with the
    /// caller, which owns the originating connection's sink.
    pub fn publish_broadcasts(&self, router: &BroadcastRouter) {
        for frame in &self.broadcast {
            if let Err(e) = router.publish(frame) {
                log::error!("dropping undeliverable broadcast frame: {e}");
            }
        }
    }
}

/// Orchestrates binding, presence, channels and histories.
pub struct SyncEngine {
    binding: RwLock<IdentityBinding>,
    presence: RwLock<PresenceRegistry>,
    directory: RwLock<ChannelDirectory>,
    history: HistoryTable,
    attachments: Arc<dyn AttachmentStore>,
}

impl SyncEngine {
    pub fn new(default_channel: &str, attachments: Arc<dyn AttachmentStore>) -> Self {
        Self {
            binding: RwLock::new(IdentityBinding::new()),
            presence: RwLock::new(PresenceRegistry::new()),
            directory: RwLock::new(ChannelDirectory::new(default_channel)),
            history: HistoryTable::new(),
            attachments,
        }
    }

    /// Process one client frame on behalf of `conn`.
    pub async fn handle(&self, conn: Uuid, frame: ClientFrame) -> Dispatch {
        let result = match frame {
            ClientFrame::Join { identity } => self.join(conn, identity).await,
            ClientFrame::Post { draft } => self.post(conn, draft).await,
            ClientFrame::Edit {
                channel_id,
                message_id,
                new_text,
            } => self.edit(conn, channel_id, message_id, new_text).await,
            ClientFrame::Delete {
                channel_id,
                message_id,
            } => self.delete(conn, channel_id, message_id).await,
            ClientFrame::ToggleReaction {
                channel_id,
                message_id,
                emoji,
            } => self.toggle_reaction(conn, channel_id, message_id, emoji).await,
            ClientFrame::CreateChannel { name, description } => {
                self.create_channel(conn, name, description).await
            }
            ClientFrame::RenameChannel {
                channel_id,
                name,
                description,
            } => self.rename_channel(conn, channel_id, name, description).await,
            ClientFrame::DeleteChannel { channel_id } => {
                self.delete_channel(conn, channel_id).await
            }
        };

        match result {
            Ok(dispatch) => dispatch,
            Err(e) if e.is_reportable() => Dispatch::reply(ServerFrame::Rejected {
                reason: e.to_string(),
            }),
            Err(e) => {
                log::debug!("silently rejecting frame from {conn}: {e}");
                Dispatch::none()
            }
        }
    }

    /// A connection went away, cleanly or not. Completes like a clean
    /// leave: unbind, drop from the roster, announce.
    pub async fn disconnect(&self, conn: Uuid) -> Dispatch {
        let identity = match self.binding.write().await.unbind(conn) {
            Some(identity) => identity,
            None => return Dispatch::none(),
        };

        if self.presence.write().await.remove(identity.id).is_none() {
            return Dispatch::none();
        }
        log::info!("{} left ({conn})", identity.display_name);

        let mut dispatch = Dispatch::broadcast(self.presence_frame().await);
        dispatch
            .broadcast
            .push(ServerFrame::notice(format!("{} left", identity.display_name)));
        dispatch
    }

    // ── frame handlers ──────────────────────────────────────────────

    async fn join(&self, conn: Uuid, identity: Identity) -> Result<Dispatch, EventError> {
        if !self.binding.write().await.bind(conn, identity.clone()) {
            // Re-binding is a logged no-op, not a reportable rejection
            return Ok(Dispatch::none());
        }

        let newly_present = self.presence.write().await.add(identity.clone());

        let mut dispatch = Dispatch::reply(self.welcome().await);
        if newly_present {
            log::info!("{} joined ({conn})", identity.display_name);
            dispatch.broadcast.push(self.presence_frame().await);
            dispatch.broadcast.push(ServerFrame::notice(format!(
                "{} joined",
                identity.display_name
            )));
        }
        Ok(dispatch)
    }

    async fn post(&self, conn: Uuid, draft: MessageDraft) -> Result<Dispatch, EventError> {
        let author = self.bound_identity(conn).await?;

        let text = draft.text.trim();
        if text.is_empty() {
            return Err(EventError::Validation("message text is empty".into()));
        }
        let draft = MessageDraft {
            text: text.to_string(),
            ..draft
        };
        let channel_id = draft.channel_id;

        let message = {
            // Hold the directory read guard across the append so a
            // concurrent channel delete cannot orphan the message
            let directory = self.directory.read().await;
            if !directory.contains(channel_id) {
                return Err(EventError::Validation("unknown channel".into()));
            }
            let log = self.history.ensure(channel_id).await;
            let mut log = log.lock().await;
            log.append(draft, &author)
        };

        self.directory
            .write()
            .await
            .note_participant(channel_id, author.id);

        Ok(Dispatch::broadcast(ServerFrame::MessagePosted { message }))
    }

    async fn edit(
        &self,
        conn: Uuid,
        channel_id: Uuid,
        message_id: Uuid,
        new_text: String,
    ) -> Result<Dispatch, EventError> {
        let author = self.bound_identity(conn).await?;

        let new_text = new_text.trim().to_string();
        if new_text.is_empty() {
            return Err(EventError::Validation("message text is empty".into()));
        }

        let log = self
            .history
            .get(channel_id)
            .await
            .ok_or(EventError::NotFound("message"))?;
        let edited = {
            let mut log = log.lock().await;
            log.edit(message_id, author.id, new_text.clone())?
        };

        Ok(Dispatch::broadcast(ServerFrame::MessageEdited {
            channel_id: edited.channel_id,
            message_id: edited.id,
            new_text,
        }))
    }

    async fn delete(
        &self,
        conn: Uuid,
        channel_id: Uuid,
        message_id: Uuid,
    ) -> Result<Dispatch, EventError> {
        let author = self.bound_identity(conn).await?;

        let log = self
            .history
            .get(channel_id)
            .await
            .ok_or(EventError::NotFound("message"))?;
        let removed = {
            let mut log = log.lock().await;
            log.remove(message_id, author.id)?
        };

        // Cascade file cleanup with every lock released
        if let Some(file) = &removed.attachment {
            self.cleanup_attachment(file);
        }

        Ok(Dispatch::broadcast(ServerFrame::MessageDeleted {
            channel_id,
            message_id,
        }))
    }

    async fn toggle_reaction(
        &self,
        conn: Uuid,
        channel_id: Uuid,
        message_id: Uuid,
        emoji: String,
    ) -> Result<Dispatch, EventError> {
        let user = self.bound_identity(conn).await?;

        let emoji = emoji.trim().to_string();
        if emoji.is_empty() {
            return Err(EventError::Validation("emoji is empty".into()));
        }

        let log = self
            .history
            .get(channel_id)
            .await
            .ok_or(EventError::NotFound("message"))?;
        let reactions = {
            let mut log = log.lock().await;
            log.toggle_reaction(message_id, &emoji, user.id)?
        };

        Ok(Dispatch::broadcast(ServerFrame::ReactionUpdated {
            channel_id,
            message_id,
            reactions,
        }))
    }

    async fn create_channel(
        &self,
        conn: Uuid,
        name: String,
        description: Option<String>,
    ) -> Result<Dispatch, EventError> {
        let creator = self.bound_identity(conn).await?;

        let channel = self
            .directory
            .write()
            .await
            .create(&name, description, creator.id)?;
        log::info!("channel #{} created by {}", channel.name, creator.display_name);

        Ok(Dispatch::broadcast(ServerFrame::ChannelCreated { channel }))
    }

    async fn rename_channel(
        &self,
        conn: Uuid,
        channel_id: Uuid,
        name: String,
        description: Option<String>,
    ) -> Result<Dispatch, EventError> {
        self.bound_identity(conn).await?;

        let channel = self
            .directory
            .write()
            .await
            .rename(channel_id, &name, description)?;

        Ok(Dispatch::broadcast(ServerFrame::ChannelRenamed {
            channel_id,
            name: channel.name,
            description: channel.description,
        }))
    }

    async fn delete_channel(&self, conn: Uuid, channel_id: Uuid) -> Result<Dispatch, EventError> {
        let remover = self.bound_identity(conn).await?;

        let (removed, fallback_id) = self.directory.write().await.delete(channel_id)?;
        log::info!(
            "channel #{} deleted by {}, fallback {fallback_id}",
            removed.name,
            remover.display_name
        );

        // The log dies with the channel; its attachments cascade too
        let orphaned = self.history.remove(channel_id).await;
        for message in &orphaned {
            if let Some(file) = &message.attachment {
                self.cleanup_attachment(file);
            }
        }

        Ok(Dispatch::broadcast(ServerFrame::ChannelDeleted {
            channel_id,
            fallback_id,
        }))
    }

    // ── support ─────────────────────────────────────────────────────

    async fn bound_identity(&self, conn: Uuid) -> Result<Identity, EventError> {
        self.binding
            .read()
            .await
            .get(conn)
            .cloned()
            .ok_or_else(|| EventError::Validation("connection is not bound".into()))
    }

    /// Collaborator failures never fail the user-visible mutation.
    fn cleanup_attachment(&self, file: &FileRef) {
        match self.attachments.delete_by_location(&file.location) {
            Ok(()) => log::debug!("deleted attachment {}", file.location),
            Err(AttachmentError::NotFound(loc)) => {
                log::warn!("attachment {loc} already gone, nothing to delete")
            }
            Err(e) => log::error!("attachment cleanup failed for {}: {e}", file.location),
        }
    }

    async fn presence_frame(&self) -> ServerFrame {
        ServerFrame::Presence {
            identities: self.presence.read().await.snapshot(),
        }
    }

    /// Full state for a connection that just joined.
    async fn welcome(&self) -> ServerFrame {
        let presence = self.presence.read().await.snapshot();
        let directory = self.directory.read().await;
        let mut channels = Vec::with_capacity(directory.len());
        for channel in directory.list() {
            channels.push(ChannelSnapshot {
                channel: channel.clone(),
                messages: self.history.snapshot(channel.id).await,
            });
        }
        ServerFrame::Welcome { presence, channels }
    }

    // ── inspection (embedding and tests) ────────────────────────────

    pub async fn presence_snapshot(&self) -> Vec<Identity> {
        self.presence.read().await.snapshot()
    }

    pub async fn channels(&self) -> Vec<Channel> {
        self.directory.read().await.list().to_vec()
    }

    pub async fn channel_messages(&self, channel_id: Uuid) -> Vec<Message> {
        self.history.snapshot(channel_id).await
    }
}
