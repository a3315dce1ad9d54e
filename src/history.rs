//! Per-channel message logs with ownership-checked mutation.
//!
//! Each channel owns one [`ChannelHistory`] — an append-ordered log that
//! is the single authority for that channel's messages. The logs live in
//! a [`HistoryTable`] behind per-channel locks, so traffic on one channel
//! never contends with another. Append order equals lock-acquisition
//! order; timestamps are assigned server-side under the channel lock and
//! clamped non-decreasing, with log position breaking ties.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex, RwLock};
use uuid::Uuid;

use crate::error::EventError;
use crate::files::FileRef;
use crate::protocol::Identity;

/// Emoji glyph → set of reacting user ids.
///
/// An emoji entry with an empty user set must not exist; toggles drop the
/// entry eagerly when the last reactor leaves.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ReactionSet(BTreeMap<String, BTreeSet<Uuid>>);

impl ReactionSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Flip one user's membership in one emoji's reactor set.
    ///
    /// Returns `true` if the user is a reactor after the call. Exactly one
    /// state flip per call — re-applying the same toggle always inverts,
    /// so callers must not retry blindly on ambiguous network conditions.
    pub fn toggle(&mut self, emoji: &str, user: Uuid) -> bool {
        let reactors = self.0.entry(emoji.to_string()).or_default();
        if reactors.remove(&user) {
            if reactors.is_empty() {
                self.0.remove(emoji);
            }
            false
        } else {
            reactors.insert(user);
            true
        }
    }

    pub fn reactors(&self, emoji: &str) -> Option<&BTreeSet<Uuid>> {
        self.0.get(emoji)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &BTreeSet<Uuid>)> {
        self.0.iter()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }
}

/// Client-supplied fields of a message about to be posted.
///
/// Everything the server assigns (id, timestamp, author attribution) is
/// deliberately absent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MessageDraft {
    pub channel_id: Uuid,
    pub text: String,
    pub reply_to: Option<Uuid>,
    pub attachment: Option<FileRef>,
}

impl MessageDraft {
    pub fn text(channel_id: Uuid, text: impl Into<String>) -> Self {
        Self {
            channel_id,
            text: text.into(),
            reply_to: None,
            attachment: None,
        }
    }
}

/// A stored chat message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    /// Globally unique across channels, for cross-channel replies.
    pub id: Uuid,
    pub channel_id: Uuid,
    pub author_id: Uuid,
    /// Display name at send time; later renames don't rewrite history.
    pub author_name: String,
    pub text: String,
    /// Server-assigned; never trusted from the client.
    pub created_at: DateTime<Utc>,
    pub edited: bool,
    pub reply_to: Option<Uuid>,
    pub attachment: Option<FileRef>,
    pub reactions: ReactionSet,
}

/// Append-ordered message log for a single channel.
#[derive(Debug)]
pub struct ChannelHistory {
    channel_id: Uuid,
    log: Vec<Message>,
    last_stamp: Option<DateTime<Utc>>,
}

impl ChannelHistory {
    pub fn new(channel_id: Uuid) -> Self {
        Self {
            channel_id,
            log: Vec::new(),
            last_stamp: None,
        }
    }

    /// Append a draft, assigning id and timestamp server-side.
    ///
    /// The timestamp is clamped so it never moves backwards within a
    /// channel even if the wall clock does; log position breaks ties.
    pub fn append(&mut self, draft: MessageDraft, author: &Identity) -> Message {
        let mut stamp = Utc::now();
        if let Some(last) = self.last_stamp {
            if stamp < last {
                stamp = last;
            }
        }
        self.last_stamp = Some(stamp);

        let message = Message {
            id: Uuid::new_v4(),
            channel_id: self.channel_id,
            author_id: author.id,
            author_name: author.display_name.clone(),
            text: draft.text,
            created_at: stamp,
            edited: false,
            reply_to: draft.reply_to,
            attachment: draft.attachment,
            reactions: ReactionSet::new(),
        };
        self.log.push(message.clone());
        message
    }

    /// Replace the text of a message, author-only.
    ///
    /// Leaves `created_at`, `reply_to`, `attachment` and `reactions`
    /// untouched and marks the message edited.
    pub fn edit(
        &mut self,
        message_id: Uuid,
        author_id: Uuid,
        new_text: String,
    ) -> Result<Message, EventError> {
        let message = self
            .log
            .iter_mut()
            .find(|m| m.id == message_id)
            .ok_or(EventError::NotFound("message"))?;
        if message.author_id != author_id {
            return Err(EventError::Ownership);
        }
        message.text = new_text;
        message.edited = true;
        Ok(message.clone())
    }

    /// Remove a message from the log, author-only.
    ///
    /// Returns the removed message so the caller can cascade attachment
    /// cleanup through the storage collaborator.
    pub fn remove(&mut self, message_id: Uuid, author_id: Uuid) -> Result<Message, EventError> {
        let pos = self
            .log
            .iter()
            .position(|m| m.id == message_id)
            .ok_or(EventError::NotFound("message"))?;
        if self.log[pos].author_id != author_id {
            return Err(EventError::Ownership);
        }
        Ok(self.log.remove(pos))
    }

    /// Flip `user`'s reaction with `emoji` on a message, returning the
    /// message's full reaction set after the toggle.
    pub fn toggle_reaction(
        &mut self,
        message_id: Uuid,
        emoji: &str,
        user: Uuid,
    ) -> Result<ReactionSet, EventError> {
        let message = self
            .log
            .iter_mut()
            .find(|m| m.id == message_id)
            .ok_or(EventError::NotFound("message"))?;
        message.reactions.toggle(emoji, user);
        Ok(message.reactions.clone())
    }

    pub fn find(&self, message_id: Uuid) -> Option<&Message> {
        self.log.iter().find(|m| m.id == message_id)
    }

    /// The full log in append order.
    pub fn messages(&self) -> &[Message] {
        &self.log
    }

    pub fn channel_id(&self) -> Uuid {
        self.channel_id
    }

    pub fn len(&self) -> usize {
        self.log.len()
    }

    pub fn is_empty(&self) -> bool {
        self.log.is_empty()
    }
}

/// Channel id → its history, each behind its own lock.
///
/// The outer map is read-mostly; mutations on different channels take
/// different inner locks and never contend.
pub struct HistoryTable {
    logs: RwLock<HashMap<Uuid, Arc<Mutex<ChannelHistory>>>>,
}

impl HistoryTable {
    pub fn new() -> Self {
        Self {
            logs: RwLock::new(HashMap::new()),
        }
    }

    /// Get or create the log for a channel.
    pub async fn ensure(&self, channel_id: Uuid) -> Arc<Mutex<ChannelHistory>> {
        {
            let logs = self.logs.read().await;
            if let Some(log) = logs.get(&channel_id) {
                return log.clone();
            }
        }

        let mut logs = self.logs.write().await;
        // Double-check after acquiring the write lock
        if let Some(log) = logs.get(&channel_id) {
            return log.clone();
        }
        let log = Arc::new(Mutex::new(ChannelHistory::new(channel_id)));
        logs.insert(channel_id, log.clone());
        log
    }

    /// Look up an existing log without creating one.
    pub async fn get(&self, channel_id: Uuid) -> Option<Arc<Mutex<ChannelHistory>>> {
        self.logs.read().await.get(&channel_id).cloned()
    }

    /// Drop a channel's log, returning its messages for cascade cleanup.
    pub async fn remove(&self, channel_id: Uuid) -> Vec<Message> {
        let log = self.logs.write().await.remove(&channel_id);
        match log {
            Some(log) => log.lock().await.log.drain(..).collect(),
            None => Vec::new(),
        }
    }

    /// Copy of a channel's log in append order (empty if unknown).
    pub async fn snapshot(&self, channel_id: Uuid) -> Vec<Message> {
        match self.get(channel_id).await {
            Some(log) => log.lock().await.messages().to_vec(),
            None => Vec::new(),
        }
    }

    pub async fn channel_count(&self) -> usize {
        self.logs.read().await.len()
    }
}

impl Default for HistoryTable {
    fn default() -> Self {
        Self::new()
    }
}
