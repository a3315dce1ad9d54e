//! # murmur-relay — Real-time chat relay
//!
//! Presence tracking and channel message synchronization over WebSockets.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────┐     WebSocket      ┌─────────────┐
//! │ RelayClient │ ◄─────────────────► │ RelayServer │
//! │ (per user)  │    Binary frames    │ (authority) │
//! └─────────────┘                     └──────┬──────┘
//!                                            │
//!                                     ┌──────┴──────┐
//!                                     │ SyncEngine  │
//!                                     │ (validate + │
//!                                     │  mutate)    │
//!                                     └──────┬──────┘
//!                              ┌─────────────┼──────────────┐
//!                              ▼             ▼              ▼
//!                        PresenceRegistry  HistoryTable  ChannelDirectory
//!                        IdentityBinding   (per-channel
//!                                           locks)
//!                                            │
//!                                    ┌───────┴────────┐
//!                                    │ BroadcastRouter│
//!                                    │ (fan-out)      │
//!                                    └────────────────┘
//! ```
//!
//! The server owns the authoritative per-channel message log. Every
//! mutation — post, edit, delete, reaction toggle, channel change,
//! presence change — funnels through [`engine::SyncEngine`], which
//! validates it, applies it under the owning store's lock, and only then
//! hands the resulting deltas to [`broadcast::BroadcastRouter`] for
//! best-effort fan-out to every live connection.
//!
//! ## Modules
//!
//! - [`protocol`] — Binary wire protocol (bincode-encoded frames)
//! - [`engine`] — Event validation and store orchestration
//! - [`history`] — Per-channel message logs and reactions
//! - [`channels`] — Channel directory with last-channel guard
//! - [`presence`] — Connection binding and the live roster
//! - [`broadcast`] — Fan-out with lag accounting
//! - [`files`] — Attachment storage collaborator
//! - [`server`] — WebSocket relay server
//! - [`client`] — WebSocket relay client

pub mod broadcast;
pub mod channels;
pub mod client;
pub mod engine;
pub mod error;
pub mod files;
pub mod history;
pub mod presence;
pub mod protocol;
pub mod server;

// Re-exports for convenience
pub use broadcast::{BroadcastRouter, RouterStats};
pub use channels::{Channel, ChannelDirectory};
pub use client::{ClientEvent, ConnectionState, RelayClient};
pub use engine::{Dispatch, SyncEngine};
pub use error::EventError;
pub use files::{AttachmentError, AttachmentStore, FileRef, MemoryAttachmentStore};
pub use history::{ChannelHistory, HistoryTable, Message, MessageDraft, ReactionSet};
pub use presence::{IdentityBinding, PresenceRegistry};
pub use protocol::{ChannelSnapshot, ClientFrame, Identity, ProtocolError, ServerFrame};
pub use server::{RelayConfig, RelayServer, RelayStats};
