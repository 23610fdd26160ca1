//! In-flight operation table keyed by record id.

use std::collections::HashSet;
use std::sync::Mutex;

use dodoco_common::error::{DodocoError, Result};
use dodoco_common::types::RecordId;

/// Records that currently have an operation running.
#[derive(Debug, Default)]
pub struct RecordLocks {
    held: Mutex<HashSet<RecordId>>,
}

/// Releases its record when dropped.
#[derive(Debug)]
pub struct RecordGuard<'a> {
    locks: &'a RecordLocks,
    id: RecordId,
}

impl RecordLocks {
    /// Creates an empty table.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Claims `id` without waiting.
    ///
    /// # Errors
    ///
    /// Returns `Conflict` if another operation holds the record.
    pub fn try_acquire(&self, id: RecordId) -> Result<RecordGuard<'_>> {
        let mut held = self
            .held
            .lock()
            .map_err(|_| DodocoError::infra("locks.acquire", "lock table poisoned"))?;
        if !held.insert(id) {
            return Err(DodocoError::conflict(format!(
                "container {id} is busy with another operation"
            )));
        }
        Ok(RecordGuard { locks: self, id })
    }

    /// Returns whether `id` is currently held.
    #[must_use]
    pub fn is_held(&self, id: RecordId) -> bool {
        self.held.lock().is_ok_and(|h| h.contains(&id))
    }
}

impl Drop for RecordGuard<'_> {
    fn drop(&mut self) {
        if let Ok(mut held) = self.locks.held.lock() {
            let _ = held.remove(&self.id);
        }
    }
}
