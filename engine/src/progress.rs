//! Batch observer trait.
//!
//! This module defines the BatchObserver trait, which decouples the batch
//! executor from any specific front end. The CLI implements it for its
//! verbose console output.

use uuid::Uuid;

use crate::model::{BatchResult, FileCandidate, FileOutcome};

/// Receives synchronous notifications while a batch runs.
pub trait BatchObserver {
    /// Called once before the first candidate is processed.
    fn on_batch_started(&self, run_id: Uuid, candidates: &[FileCandidate]);

    /// Called when a candidate is about to be processed.
    fn on_file_started(&self, index: usize, candidate: &FileCandidate);

    /// Called when a candidate reached its outcome (copied, skipped, or failed).
    fn on_file_completed(&self, index: usize, outcome: &FileOutcome);

    /// Called once after the last candidate, or after an abort.
    fn on_batch_completed(&self, result: &BatchResult);
}
