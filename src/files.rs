//! Attachment storage collaborator.
//!
//! Binary file storage is outside the engine: upload acceptance, disk
//! layout, and static serving belong to whatever implements
//! [`AttachmentStore`]. The engine only ever sees a [`FileRef`] riding on
//! a message, and calls [`AttachmentStore::delete_by_location`] when that
//! message is removed — always after every store lock has been released.

use std::collections::HashMap;
use std::sync::Mutex;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

/// Pointer to externally stored binary content attached to a message.
///
/// Opaque to the engine beyond display fields and the deletion cascade.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileRef {
    pub original_name: String,
    /// Retrievable location, meaningful only to the store that issued it.
    pub location: String,
    pub size_bytes: u64,
    pub media_type: String,
}

/// Failures surfaced by a storage collaborator.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AttachmentError {
    #[error("attachment of {0} bytes exceeds the size limit")]
    TooLarge(u64),

    #[error("unsupported media type: {0}")]
    UnsupportedType(String),

    #[error("no stored attachment at {0}")]
    NotFound(String),
}

/// Storage collaborator interface.
///
/// Implementations may block on disk or network; the engine guarantees it
/// never calls into this trait while holding a store lock. A `NotFound`
/// from `delete_by_location` is tolerated and logged — it never fails the
/// user-visible message delete.
pub trait AttachmentStore: Send + Sync {
    fn store(
        &self,
        bytes: &[u8],
        original_name: &str,
        media_type: &str,
    ) -> Result<FileRef, AttachmentError>;

    fn delete_by_location(&self, location: &str) -> Result<(), AttachmentError>;
}

/// In-memory attachment store.
///
/// Backs the relay when no real storage is wired up, and doubles as the
/// test collaborator: every successful delete is recorded so tests can
/// assert the cleanup cascade fired exactly once per attachment.
pub struct MemoryAttachmentStore {
    max_bytes: u64,
    blobs: Mutex<HashMap<String, Vec<u8>>>,
    deletions: Mutex<Vec<String>>,
}

impl MemoryAttachmentStore {
    pub fn new(max_bytes: u64) -> Self {
        Self {
            max_bytes,
            blobs: Mutex::new(HashMap::new()),
            deletions: Mutex::new(Vec::new()),
        }
    }

    /// Locations passed to successful `delete_by_location` calls, in order.
    pub fn deletions(&self) -> Vec<String> {
        self.deletions.lock().unwrap().clone()
    }

    /// Number of blobs currently held.
    pub fn len(&self) -> usize {
        self.blobs.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.blobs.lock().unwrap().is_empty()
    }
}

impl Default for MemoryAttachmentStore {
    fn default() -> Self {
        Self::new(8 * 1024 * 1024)
    }
}

impl AttachmentStore for MemoryAttachmentStore {
    fn store(
        &self,
        bytes: &[u8],
        original_name: &str,
        media_type: &str,
    ) -> Result<FileRef, AttachmentError> {
        if bytes.len() as u64 > self.max_bytes {
            return Err(AttachmentError::TooLarge(bytes.len() as u64));
        }
        if !media_type.contains('/') {
            return Err(AttachmentError::UnsupportedType(media_type.to_string()));
        }

        let location = format!("mem://{}", Uuid::new_v4());
        self.blobs
            .lock()
            .unwrap()
            .insert(location.clone(), bytes.to_vec());

        Ok(FileRef {
            original_name: original_name.to_string(),
            location,
            size_bytes: bytes.len() as u64,
            media_type: media_type.to_string(),
        })
    }

    fn delete_by_location(&self, location: &str) -> Result<(), AttachmentError> {
        let removed = self.blobs.lock().unwrap().remove(location);
        match removed {
            Some(_) => {
                self.deletions.lock().unwrap().push(location.to_string());
                Ok(())
            }
            None => Err(AttachmentError::NotFound(location.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_store_and_delete() {
        let store = MemoryAttachmentStore::default();
        let file = store.store(b"hello", "notes.txt", "text/plain").unwrap();

        assert_eq!(file.original_name, "notes.txt");
        assert_eq!(file.size_bytes, 5);
        assert_eq!(store.len(), 1);

        store.delete_by_location(&file.location).unwrap();
        assert!(store.is_empty());
        assert_eq!(store.deletions(), vec![file.location]);
    }

    #[test]
    fn test_too_large_rejected() {
        let store = MemoryAttachmentStore::new(4);
        let err = store.store(b"hello", "big.bin", "application/octet-stream");
        assert_eq!(err, Err(AttachmentError::TooLarge(5)));
        assert!(store.is_empty());
    }

    #[test]
    fn test_bogus_media_type_rejected() {
        let store = MemoryAttachmentStore::default();
        let err = store.store(b"x", "x", "not-a-mime");
        assert_eq!(
            err,
            Err(AttachmentError::UnsupportedType("not-a-mime".into()))
        );
    }

    #[test]
    fn test_delete_missing_is_not_found() {
        let store = MemoryAttachmentStore::default();
        let err = store.delete_by_location("mem://nowhere");
        assert_eq!(err, Err(AttachmentError::NotFound("mem://nowhere".into())));
        assert!(store.deletions().is_empty());
    }

    #[test]
    fn test_locations_are_unique() {
        let store = MemoryAttachmentStore::default();
        let a = store.store(b"a", "a.png", "image/png").unwrap();
        let b = store.store(b"b", "b.png", "image/png").unwrap();
        assert_ne!(a.location, b.location);
    }
}
