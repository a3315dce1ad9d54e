//! Rejection taxonomy for the synchronization engine.

use thiserror::Error;

/// Why the engine refused to act on an incoming frame.
///
/// A rejected frame mutates nothing and reaches no broadcast path.
/// `Validation` and `NotFound` are reported back to the originating
/// connection only; `Ownership` rejections stay silent so a non-author
/// probing someone else's message learns nothing.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EventError {
    /// The frame failed a precondition before touching any store
    /// (empty text, unknown channel, unbound connection).
    #[error("invalid request: {0}")]
    Validation(String),

    /// Edit or delete attempted by someone other than the author.
    #[error("only the author may modify a message")]
    Ownership,

    /// The target vanished between client intent and server processing.
    #[error("{0} no longer exists")]
    NotFound(&'static str),
}

impl EventError {
    /// Whether this rejection should be reported to the originating
    /// connection. Ownership violations are not.
    pub fn is_reportable(&self) -> bool {
        !matches!(self, EventError::Ownership)
    }
}
