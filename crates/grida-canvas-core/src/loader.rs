//! Document loading with supersession.
//!
//! Each load takes a [`LoadTicket`]. Starting a new load invalidates every
//! earlier ticket, so a slow response that arrives after a newer request is
//! discarded instead of replacing the newer document.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::document::Document;
use crate::error::LoadError;
use crate::io::archive;
use crate::storage::{Storage, StorageError};

/// Handle for one in-flight load.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LoadTicket {
    generation: u64,
}

impl LoadTicket {
    pub fn generation(&self) -> u64 {
        self.generation
    }
}

/// Issues load tickets and rejects stale results.
#[derive(Debug, Clone, Default)]
pub struct DocumentLoader {
    generation: Arc<AtomicU64>,
}

impl DocumentLoader {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start a load, superseding any load in progress.
    pub fn begin(&self) -> LoadTicket {
        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        log::debug!("load #{generation} started");
        LoadTicket { generation }
    }

    /// Whether `ticket` is still the latest load.
    pub fn is_current(&self, ticket: LoadTicket) -> bool {
        self.generation.load(Ordering::SeqCst) == ticket.generation
    }

    /// Invalidate every outstanding ticket.
    pub fn abort(&self) {
        self.generation.fetch_add(1, Ordering::SeqCst);
    }

    /// Turn the bytes fetched for `ticket` into a document.
    ///
    /// Returns [`LoadError::Aborted`] when a newer load started in the
    /// meantime.
    pub fn finish(
        &self,
        ticket: LoadTicket,
        result: Result<Vec<u8>, StorageError>,
    ) -> Result<Document, LoadError> {
        if !self.is_current(ticket) {
            log::debug!("load #{} superseded, discarding result", ticket.generation);
            return Err(LoadError::Aborted);
        }
        let doc = archive::unpack(&result?)?;
        // Unpacking takes time too; a load may have started while it ran.
        if !self.is_current(ticket) {
            return Err(LoadError::Aborted);
        }
        Ok(doc)
    }

    /// Load `id` from `storage` for `ticket`.
    pub async fn fetch(
        &self,
        storage: &dyn Storage,
        id: &str,
        ticket: LoadTicket,
    ) -> Result<Document, LoadError> {
        let result = storage.load(id).await;
        self.finish(ticket, result)
    }
}
