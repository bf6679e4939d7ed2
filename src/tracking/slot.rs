use std::sync::{Mutex, PoisonError};

use crate::common::DetectionResult;

/// Latest-value cell between the detection worker and its readers.
///
/// Holds at most one result. Writes replace the value, nothing is queued, and the lock is
/// held only for the copy of one `DetectionResult`.
#[derive(Debug, Default)]
pub struct ResultSlot {
    inner: Mutex<Option<DetectionResult>>,
}

impl ResultSlot {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stores `result` unless it is older than the current value. Returns whether it was stored.
    pub fn publish(&self, result: DetectionResult) -> bool {
        let mut current = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(existing) = current.as_ref() {
            if result.sequence_id < existing.sequence_id {
                return false;
            }
        }
        *current = Some(result);
        true
    }

    pub fn latest(&self) -> Option<DetectionResult> {
        *self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
