//! Per-volume operation locks.

use std::collections::HashSet;
use std::sync::{Mutex, MutexGuard};

use crate::error::{Error, Result};

/// Set of volume ids with an operation in flight.
///
/// Acquisition never waits: a second caller for the same id is turned away
/// and expected to retry.
#[derive(Debug, Default)]
pub struct VolumeLocks {
    held: Mutex<HashSet<String>>,
}

impl VolumeLocks {
    pub fn new() -> Self {
        Self::default()
    }

    fn held(&self) -> MutexGuard<'_, HashSet<String>> {
        self.held.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Returns false if `volume_id` is already held.
    pub fn try_acquire(&self, volume_id: &str) -> bool {
        let mut held = self.held();
        if held.contains(volume_id) {
            return false;
        }
        held.insert(volume_id.to_string())
    }

    pub fn release(&self, volume_id: &str) {
        self.held().remove(volume_id);
    }

    /// Acquire `volume_id` for the lifetime of the returned guard.
    pub fn lock(&self, volume_id: &str) -> Result<VolumeLockGuard<'_>> {
        if !self.try_acquire(volume_id) {
            return Err(Error::OperationInProgress(volume_id.to_string()));
        }
        Ok(VolumeLockGuard {
            locks: self,
            volume_id: volume_id.to_string(),
        })
    }
}

/// Releases its volume id when dropped, on every exit path.
#[derive(Debug)]
pub struct VolumeLockGuard<'a> {
    locks: &'a VolumeLocks,
    volume_id: String,
}

impl Drop for VolumeLockGuard<'_> {
    fn drop(&mut self) {
        self.locks.release(&self.volume_id);
    }
}
