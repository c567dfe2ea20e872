//! Storage trait definitions for the pipeline timeline
//!
//! - `TimelineSnapshot`: immutable, versioned read view used by one resolution
//! - `TimelineStore`: append-only history store that hands out snapshots
//!
//! Snapshots are synchronous because resolution is CPU-bound; the store is
//! async and backend-agnostic. An in-memory fake lives in `fakes`.

use std::sync::Arc;

use async_trait::async_trait;

use crate::error::StorageError;
use crate::schema::{Fingerprint, NewInstance, PipelineInstance, PipelineName, Revision, SnapshotVersion};

/// Result type for storage operations
pub type StorageResult<T> = std::result::Result<T, StorageError>;

/// Read-only view of pipeline history as of one version.
///
/// Guarantees:
/// - `history(p)` is ordered by counter, oldest first, counters contiguous from 1.
/// - The view never changes after it is handed out.
pub trait TimelineSnapshot: Send + Sync {
    /// Version token of this view.
    fn version(&self) -> SnapshotVersion;

    /// All instances of `pipeline`, oldest first. Empty for unknown pipelines.
    fn history(&self, pipeline: &PipelineName) -> &[PipelineInstance];

    /// Known revisions of an scm material, oldest first.
    fn scm_revisions(&self, fingerprint: &Fingerprint) -> &[Revision];

    /// Instance `(pipeline, counter)` if recorded.
    fn instance(&self, pipeline: &PipelineName, counter: u64) -> Option<&PipelineInstance> {
        let index = usize::try_from(counter).ok()?.checked_sub(1)?;
        self.history(pipeline).get(index)
    }

    /// Most recent instance of `pipeline`.
    fn latest(&self, pipeline: &PipelineName) -> Option<&PipelineInstance> {
        self.history(pipeline).last()
    }

    /// Most recently seen revision of an scm material.
    fn latest_scm_revision(&self, fingerprint: &Fingerprint) -> Option<&Revision> {
        self.scm_revisions(fingerprint).last()
    }
}

/// Append-only pipeline history.
///
/// Guarantees:
/// - Counters are assigned by the store, contiguous and strictly increasing.
/// - Every successful write bumps the version; earlier snapshots are unaffected.
#[async_trait]
pub trait TimelineStore: Send + Sync {
    /// Take a consistent snapshot of the whole timeline.
    async fn snapshot(&self) -> StorageResult<Arc<dyn TimelineSnapshot>>;

    /// Append a new instance, returning it with its assigned counter.
    async fn append_instance(&self, instance: NewInstance) -> StorageResult<PipelineInstance>;

    /// Record a newly seen scm revision. Re-recording the latest one is a no-op.
    async fn record_scm_revision(
        &self,
        fingerprint: &Fingerprint,
        revision: Revision,
    ) -> StorageResult<()>;
}
