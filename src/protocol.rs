//! Wire protocol for the chat relay.
//!
//! Two closed, tagged frame sets, bincode-encoded over binary WebSocket
//! messages:
//!
//! ```text
//! ClientFrame  (one connection → server)   Join, Post, Edit, Delete,
//!                                          ToggleReaction, channel ops
//! ServerFrame  (server → connections)      state snapshot, presence,
//!                                          message/channel deltas, notices
//! ```
//!
//! Every variant carries only the fields its handler needs, and is
//! validated at the boundary before it reaches the engine. Server frames
//! are encoded once and fanned out as shared bytes.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use crate::channels::Channel;
use crate::history::{Message, MessageDraft, ReactionSet};

/// Client-chosen color tags, picked by id hash when the client has no
/// stored preference. Stable: the same id always maps to the same tag.
const COLOR_TAGS: [&str; 8] = [
    "tomato", "orange", "gold", "seagreen", "steelblue", "orchid", "slateblue", "crimson",
];

/// A user as the relay knows it: client-generated, persisted client-side
/// across sessions, immutable for the lifetime of a connection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identity {
    pub id: Uuid,
    pub display_name: String,
    pub color_tag: String,
}

impl Identity {
    /// Fresh identity with a color derived from the new id.
    pub fn new(display_name: impl Into<String>) -> Self {
        let id = Uuid::new_v4();
        Self {
            id,
            display_name: display_name.into(),
            color_tag: color_for(id).to_string(),
        }
    }

    /// Rebuild an identity persisted on the client.
    pub fn with_id(id: Uuid, display_name: impl Into<String>) -> Self {
        Self {
            id,
            display_name: display_name.into(),
            color_tag: color_for(id).to_string(),
        }
    }

    pub fn with_color(mut self, color_tag: impl Into<String>) -> Self {
        self.color_tag = color_tag.into();
        self
    }
}

fn color_for(id: Uuid) -> &'static str {
    COLOR_TAGS[(id.as_u128() % COLOR_TAGS.len() as u128) as usize]
}

/// Frames a client sends to the relay.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ClientFrame {
    /// First frame on a connection: claim an identity.
    Join { identity: Identity },

    /// Post a new message; id and timestamp are assigned server-side.
    Post { draft: MessageDraft },

    /// Replace the text of one's own message.
    Edit {
        channel_id: Uuid,
        message_id: Uuid,
        new_text: String,
    },

    /// Remove one's own message (cascades attachment cleanup).
    Delete { channel_id: Uuid, message_id: Uuid },

    /// Flip the sender's membership in one emoji's reactor set.
    ToggleReaction {
        channel_id: Uuid,
        message_id: Uuid,
        emoji: String,
    },

    CreateChannel {
        name: String,
        description: Option<String>,
    },

    RenameChannel {
        channel_id: Uuid,
        name: String,
        description: Option<String>,
    },

    DeleteChannel { channel_id: Uuid },
}

/// One channel plus its full log, as shipped in a [`ServerFrame::Welcome`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChannelSnapshot {
    pub channel: Channel,
    pub messages: Vec<Message>,
}

/// Frames the relay pushes to clients.
///
/// Everything except `Welcome` and `Rejected` goes to every live
/// connection, sender included — the sender reconciles its optimistic
/// local copy by message id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ServerFrame {
    /// Full state for a connection that just joined.
    Welcome {
        presence: Vec<Identity>,
        channels: Vec<ChannelSnapshot>,
    },

    /// Authoritative roster after any presence change.
    Presence { identities: Vec<Identity> },

    /// Human-readable join/leave announcement.
    Notice { text: String, at: DateTime<Utc> },

    MessagePosted { message: Message },

    MessageEdited {
        channel_id: Uuid,
        message_id: Uuid,
        new_text: String,
    },

    MessageDeleted { channel_id: Uuid, message_id: Uuid },

    /// Full reaction set for one message after a toggle.
    ReactionUpdated {
        channel_id: Uuid,
        message_id: Uuid,
        reactions: ReactionSet,
    },

    ChannelCreated { channel: Channel },

    ChannelRenamed {
        channel_id: Uuid,
        name: String,
        description: Option<String>,
    },

    /// `fallback_id` is where clients viewing the deleted channel land.
    ChannelDeleted { channel_id: Uuid, fallback_id: Uuid },

    /// Local-only rejection report; never broadcast.
    Rejected { reason: String },
}

impl ClientFrame {
    pub fn encode(&self) -> Result<Vec<u8>, ProtocolError> {
        encode(self)
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, ProtocolError> {
        decode(bytes)
    }
}

impl ServerFrame {
    pub fn encode(&self) -> Result<Vec<u8>, ProtocolError> {
        encode(self)
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, ProtocolError> {
        decode(bytes)
    }

    /// Joined/left announcement stamped now.
    pub fn notice(text: impl Into<String>) -> Self {
        Self::Notice {
            text: text.into(),
            at: Utc::now(),
        }
    }
}

fn encode<T: Serialize>(value: &T) -> Result<Vec<u8>, ProtocolError> {
    bincode::serde::encode_to_vec(value, bincode::config::standard())
        .map_err(|e| ProtocolError::Encode(e.to_string()))
}

fn decode<T: for<'de> Deserialize<'de>>(bytes: &[u8]) -> Result<T, ProtocolError> {
    let (value, _) = bincode::serde::decode_from_slice(bytes, bincode::config::standard())
        .map_err(|e| ProtocolError::Decode(e.to_string()))?;
    Ok(value)
}

/// Frame-level failures.
#[derive(Debug, Clone, Error)]
pub enum ProtocolError {
    #[error("frame encoding failed: {0}")]
    Encode(String),

    #[error("frame decoding failed: {0}")]
    Decode(String),

    #[error("connection closed")]
    ConnectionClosed,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_identity_color_is_stable() {
        let id = Uuid::parse_str("550e8400-e29b-41d4-a716-446655440000").unwrap();
        let a = Identity::with_id(id, "Test");
        let b = Identity::with_id(id, "Test");
        assert_eq!(a.color_tag, b.color_tag);
    }

    #[test]
    fn test_identity_with_color_overrides() {
        let identity = Identity::new("Alice").with_color("purple");
        assert_eq!(identity.color_tag, "purple");
    }

    #[test]
    fn test_join_roundtrip() {
        let frame = ClientFrame::Join {
            identity: Identity::new("Alice"),
        };
        let encoded = frame.encode().unwrap();
        let decoded = ClientFrame::decode(&encoded).unwrap();
        assert_eq!(decoded, frame);
    }

    #[test]
    fn test_post_roundtrip() {
        let mut draft = MessageDraft::text(Uuid::new_v4(), "hello there");
        draft.reply_to = Some(Uuid::new_v4());
        let frame = ClientFrame::Post { draft };

        let decoded = ClientFrame::decode(&frame.encode().unwrap()).unwrap();
        assert_eq!(decoded, frame);
    }

    #[test]
    fn test_toggle_reaction_roundtrip() {
        let frame = ClientFrame::ToggleReaction {
            channel_id: Uuid::new_v4(),
            message_id: Uuid::new_v4(),
            emoji: "👍".to_string(),
        };
        let decoded = ClientFrame::decode(&frame.encode().unwrap()).unwrap();
        assert_eq!(decoded, frame);
    }

    #[test]
    fn test_notice_roundtrip() {
        let frame = ServerFrame::notice("Alice joined");
        let decoded = ServerFrame::decode(&frame.encode().unwrap()).unwrap();
        match decoded {
            ServerFrame::Notice { text, .. } => assert_eq!(text, "Alice joined"),
            other => panic!("expected Notice, got {other:?}"),
        }
    }

    #[test]
    fn test_presence_roundtrip() {
        let frame = ServerFrame::Presence {
            identities: vec![Identity::new("Alice"), Identity::new("Bob")],
        };
        let decoded = ServerFrame::decode(&frame.encode().unwrap()).unwrap();
        assert_eq!(decoded, frame);
    }

    #[test]
    fn test_channel_deleted_roundtrip() {
        let frame = ServerFrame::ChannelDeleted {
            channel_id: Uuid::new_v4(),
            fallback_id: Uuid::new_v4(),
        };
        let decoded = ServerFrame::decode(&frame.encode().unwrap()).unwrap();
        assert_eq!(decoded, frame);
    }

    #[test]
    fn test_decode_garbage_fails() {
        assert!(ClientFrame::decode(&[0xFF, 0xFE, 0xFD]).is_err());
        assert!(ServerFrame::decode(&[0xFF, 0xFE, 0xFD]).is_err());
    }
}
