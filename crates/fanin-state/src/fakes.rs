//! In-memory timeline store (testing and local tooling)
//!
//! `MemoryTimelineStore` keeps the whole history in one `Arc<MemorySnapshot>`.
//! Writers clone-on-write, so every snapshot handed out stays frozen at the
//! version it was taken.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use chrono::Utc;
use tracing::debug;

use crate::error::StorageError;
use crate::schema::{Fingerprint, NewInstance, PipelineInstance, PipelineName, Revision, SnapshotVersion};
use crate::storage_traits::*;

// ---------------------------------------------------------------------------
// MemorySnapshot
// ---------------------------------------------------------------------------

/// Frozen timeline contents.
#[derive(Debug, Clone, Default)]
pub struct MemorySnapshot {
    version: SnapshotVersion,
    pipelines: HashMap<PipelineName, Vec<PipelineInstance>>,
    scm: HashMap<Fingerprint, Vec<Revision>>,
}

impl TimelineSnapshot for MemorySnapshot {
    fn version(&self) -> SnapshotVersion {
        self.version
    }

    fn history(&self, pipeline: &PipelineName) -> &[PipelineInstance] {
        self.pipelines
            .get(pipeline)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    fn scm_revisions(&self, fingerprint: &Fingerprint) -> &[Revision] {
        self.scm.get(fingerprint).map(Vec::as_slice).unwrap_or(&[])
    }
}

// ---------------------------------------------------------------------------
// MemoryTimelineStore
// ---------------------------------------------------------------------------

/// In-memory append-only timeline.
#[derive(Debug, Default)]
pub struct MemoryTimelineStore {
    current: Mutex<Arc<MemorySnapshot>>,
}

impl MemoryTimelineStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> StorageResult<MutexGuard<'_, Arc<MemorySnapshot>>> {
        self.current
            .lock()
            .map_err(|_| StorageError::Backend("timeline lock poisoned".to_string()))
    }
}

#[async_trait]
impl TimelineStore for MemoryTimelineStore {
    async fn snapshot(&self) -> StorageResult<Arc<dyn TimelineSnapshot>> {
        let current = Arc::clone(&*self.lock()?);
        let snapshot: Arc<dyn TimelineSnapshot> = current;
        Ok(snapshot)
    }

    async fn append_instance(&self, instance: NewInstance) -> StorageResult<PipelineInstance> {
        if instance.pipeline.as_str().trim().is_empty() {
            return Err(StorageError::EmptyPipelineName);
        }
        for (i, stage) in instance.stages.iter().enumerate() {
            if instance.stages[..i].iter().any(|s| s.name == stage.name) {
                return Err(StorageError::DuplicateStage {
                    pipeline: instance.pipeline.to_string(),
                    stage: stage.name.clone(),
                });
            }
        }

        let mut current = self.lock()?;
        let data = Arc::make_mut(&mut *current);
        let history = data.pipelines.entry(instance.pipeline.clone()).or_default();
        let recorded = PipelineInstance {
            pipeline: instance.pipeline,
            counter: history.len() as u64 + 1,
            build_cause: instance.build_cause,
            stages: instance.stages,
            scheduled_at: Utc::now(),
        };
        history.push(recorded.clone());
        data.version = SnapshotVersion(data.version.0 + 1);

        debug!(
            pipeline = %recorded.pipeline,
            counter = recorded.counter,
            version = %data.version,
            "Appended pipeline instance"
        );
        Ok(recorded)
    }

    async fn record_scm_revision(
        &self,
        fingerprint: &Fingerprint,
        revision: Revision,
    ) -> StorageResult<()> {
        let mut current = self.lock()?;
        if current.scm_revisions(fingerprint).last() == Some(&revision) {
            return Ok(());
        }
        let data = Arc::make_mut(&mut *current);
        data.scm.entry(fingerprint.clone()).or_default().push(revision);
        data.version = SnapshotVersion(data.version.0 + 1);
        Ok(())
    }
}
