use std::sync::{Mutex, MutexGuard};

use chrono::Local;

use crate::analysis::AnalysisResult;

/// Most recent analysis, shared between the stream and `/analysis` readers.
///
/// The lock is only held to swap in or clone out a whole `AnalysisResult`, so a
/// reader sees either the previous result or the new one, never a mix.
pub struct AnalysisBoard {
    latest: Mutex<AnalysisResult>,
}

impl AnalysisBoard {
    pub fn new() -> Self {
        Self::with_initial(AnalysisResult::initial(Local::now()))
    }

    pub fn with_initial(initial: AnalysisResult) -> Self {
        Self {
            latest: Mutex::new(initial),
        }
    }

    /// Replace the current result.
    pub fn publish(&self, result: AnalysisResult) {
        *self.lock() = result;
    }

    /// Copy of the current result.
    pub fn snapshot(&self) -> AnalysisResult {
        self.lock().clone()
    }

    // A writer can only panic before or after the single assignment, so the value
    // behind a poisoned lock is still a complete result.
    fn lock(&self) -> MutexGuard<'_, AnalysisResult> {
        self.latest
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl Default for AnalysisBoard {
    fn default() -> Self {
        Self::new()
    }
}
