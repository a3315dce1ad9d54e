//! Channel records and the server-side channel directory.
//!
//! The directory is the authority for which channels exist, so that every
//! message's `channel_id` always refers to a live channel. Deletion of the
//! last remaining channel is rejected, and deleting any channel reports
//! the lowest-ordered survivor as the deterministic fallback for clients
//! that were viewing it.

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::EventError;

/// A named, independently-logged conversation stream.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Channel {
    pub id: Uuid,
    pub name: String,
    pub description: Option<String>,
    /// Identities that have taken part: the creator plus every author
    /// that has posted here. Membership is never dropped.
    pub participant_ids: BTreeSet<Uuid>,
    pub created_at: DateTime<Utc>,
}

impl Channel {
    fn new(name: String, description: Option<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            name,
            description,
            participant_ids: BTreeSet::new(),
            created_at: Utc::now(),
        }
    }
}

/// Ordered (by creation) table of live channels.
#[derive(Debug)]
pub struct ChannelDirectory {
    channels: Vec<Channel>,
}

impl ChannelDirectory {
    /// Create a directory seeded with one default channel, so the
    /// channel count can never drop below one from an empty start.
    pub fn new(default_name: &str) -> Self {
        Self {
            channels: vec![Channel::new(default_name.to_string(), None)],
        }
    }

    pub fn create(
        &mut self,
        name: &str,
        description: Option<String>,
        creator: Uuid,
    ) -> Result<Channel, EventError> {
        let name = name.trim();
        if name.is_empty() {
            return Err(EventError::Validation("channel name is empty".into()));
        }
        let mut channel = Channel::new(name.to_string(), normalize(description));
        channel.participant_ids.insert(creator);
        self.channels.push(channel.clone());
        Ok(channel)
    }

    pub fn rename(
        &mut self,
        id: Uuid,
        name: &str,
        description: Option<String>,
    ) -> Result<Channel, EventError> {
        let name = name.trim();
        if name.is_empty() {
            return Err(EventError::Validation("channel name is empty".into()));
        }
        let channel = self
            .channels
            .iter_mut()
            .find(|c| c.id == id)
            .ok_or(EventError::NotFound("channel"))?;
        channel.name = name.to_string();
        channel.description = normalize(description);
        Ok(channel.clone())
    }

    /// Delete a channel, returning the removed record and the id of the
    /// deterministic fallback (the lowest-ordered remaining channel).
    ///
    /// Rejected if it would leave the directory empty.
    pub fn delete(&mut self, id: Uuid) -> Result<(Channel, Uuid), EventError> {
        let pos = self
            .channels
            .iter()
            .position(|c| c.id == id)
            .ok_or(EventError::NotFound("channel"))?;
        if self.channels.len() == 1 {
            return Err(EventError::Validation(
                "the last remaining channel cannot be deleted".into(),
            ));
        }
        let removed = self.channels.remove(pos);
        Ok((removed, self.channels[0].id))
    }

    pub fn get(&self, id: Uuid) -> Option<&Channel> {
        self.channels.iter().find(|c| c.id == id)
    }

    pub fn contains(&self, id: Uuid) -> bool {
        self.get(id).is_some()
    }

    /// All channels in creation order.
    pub fn list(&self) -> &[Channel] {
        &self.channels
    }

    /// Record that `user` has taken part in `channel`.
    ///
    /// Returns `false` if the channel no longer exists or the user was
    /// already a participant.
    pub fn note_participant(&mut self, channel: Uuid, user: Uuid) -> bool {
        match self.channels.iter_mut().find(|c| c.id == channel) {
            Some(c) => c.participant_ids.insert(user),
            None => false,
        }
    }

    pub fn len(&self) -> usize {
        self.channels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.channels.is_empty()
    }
}

fn normalize(description: Option<String>) -> Option<String> {
    description.and_then(|d| {
        let d = d.trim().to_string();
        if d.is_empty() {
            None
        } else {
            Some(d)
        }
    })
}
