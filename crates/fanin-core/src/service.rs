//! Trigger and diagnostic entry points.
//!
//! [`FanInService`] owns the configuration set and a handle to the timeline
//! store. Every call takes its own snapshot and runs the CPU-bound search on
//! tokio's blocking pool, so concurrent calls never share search state.

use std::collections::BTreeMap;
use std::sync::Arc;

use fanin_state::{Fingerprint, PipelineInstance, PipelineName, Revision, TimelineSnapshot, TimelineStore};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::config::PipelineConfigs;
use crate::error::{FanInError, FanInResult};
use crate::graph::GraphBuilder;
use crate::obs::{emit_resolution_failed, emit_resolution_finished, emit_trigger_decided, ResolveSpan};
use crate::report::{ReportStep, ResolutionReport};
use crate::resolver::{Resolution, ResolutionAttempt, Resolver};
use crate::settings::FanInSettings;

/// Request to resolve a pipeline ahead of scheduling it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TriggerRequest {
    pub pipeline: PipelineName,
    /// Materials pinned by the caller.
    #[serde(default)]
    pub overrides: BTreeMap<Fingerprint, Revision>,
}

impl TriggerRequest {
    pub fn new(pipeline: impl Into<PipelineName>) -> Self {
        Self {
            pipeline: pipeline.into(),
            overrides: BTreeMap::new(),
        }
    }

    pub fn pin(mut self, fingerprint: Fingerprint, revision: Revision) -> Self {
        self.overrides.insert(fingerprint, revision);
        self
    }
}

/// Whether the resolved revisions differ from the last run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TriggerDecision {
    pub should_trigger: bool,
    /// Direct materials whose revision differs from the latest instance.
    pub changed: Vec<Fingerprint>,
}

impl TriggerDecision {
    /// Compare the target's direct materials with the build cause of its
    /// latest instance. A pipeline that never ran always triggers.
    pub fn compare(resolution: &Resolution, latest: Option<&PipelineInstance>) -> Self {
        let direct = resolution.iter().filter(|(_, m)| m.direct);
        let changed: Vec<Fingerprint> = match latest {
            None => direct.map(|(fp, _)| fp.clone()).collect(),
            Some(instance) => direct
                .filter(|(fp, m)| instance.build_cause.get(fp) != Some(&m.revision))
                .map(|(fp, _)| fp.clone())
                .collect(),
        };
        Self {
            should_trigger: latest.is_none() || !changed.is_empty(),
            changed,
        }
    }
}

#[derive(Debug, Clone)]
pub struct TriggerOutcome {
    pub resolution: Resolution,
    pub decision: TriggerDecision,
}

pub struct FanInService {
    configs: Arc<PipelineConfigs>,
    store: Arc<dyn TimelineStore>,
    settings: FanInSettings,
}

impl FanInService {
    pub fn new(
        configs: Arc<PipelineConfigs>,
        store: Arc<dyn TimelineStore>,
        settings: FanInSettings,
    ) -> Self {
        Self {
            configs,
            store,
            settings,
        }
    }

    pub fn settings(&self) -> &FanInSettings {
        &self.settings
    }

    /// Resolve `request.pipeline` and decide whether it should run.
    pub async fn trigger(&self, request: TriggerRequest) -> FanInResult<TriggerOutcome> {
        let snapshot = self.store.snapshot().await?;
        let attempt = self
            .attempt(Arc::clone(&snapshot), request.pipeline.clone(), request.overrides)
            .await?;
        let resolution = attempt.outcome?;
        let decision = TriggerDecision::compare(&resolution, snapshot.latest(&request.pipeline));
        emit_trigger_decided(
            request.pipeline.as_str(),
            decision.should_trigger,
            decision.changed.len(),
        );
        Ok(TriggerOutcome {
            resolution,
            decision,
        })
    }

    /// Resolved `fingerprint -> revision` map, no trigger.
    pub async fn revisions(&self, pipeline: &PipelineName) -> FanInResult<BTreeMap<Fingerprint, Revision>> {
        let snapshot = self.store.snapshot().await?;
        let attempt = self
            .attempt(snapshot, pipeline.clone(), BTreeMap::new())
            .await?;
        Ok(attempt.outcome?.revision_map())
    }

    /// Full report. Resolution failures are described inside the report;
    /// configuration and storage errors are returned.
    pub async fn trace(&self, pipeline: &PipelineName) -> FanInResult<ResolutionReport> {
        let snapshot = self.store.snapshot().await?;
        let attempt = self
            .attempt(snapshot, pipeline.clone(), BTreeMap::new())
            .await?;
        let attempt = match attempt.outcome {
            Err(err) if !err.is_resolution_failure() => return Err(err),
            outcome => ResolutionAttempt { outcome, ..attempt },
        };
        Ok(ResolutionReport::describe(&attempt))
    }

    /// A page of search steps for debug tooling.
    pub async fn debug(
        &self,
        pipeline: &PipelineName,
        offset: usize,
        limit: usize,
    ) -> FanInResult<Vec<ReportStep>> {
        let report = self.trace(pipeline).await?;
        Ok(report.steps_page(offset, limit).to_vec())
    }

    async fn attempt(
        &self,
        snapshot: Arc<dyn TimelineSnapshot>,
        pipeline: PipelineName,
        overrides: BTreeMap<Fingerprint, Revision>,
    ) -> FanInResult<ResolutionAttempt> {
        let configs = Arc::clone(&self.configs);
        let settings = self.settings.clone();
        let request_id = Uuid::new_v4();

        tokio::task::spawn_blocking(move || {
            let _span = ResolveSpan::enter(pipeline.as_str(), request_id);
            let attempt = match GraphBuilder::new(&configs).build(&pipeline) {
                Ok(graph) => Resolver::new(&graph, snapshot.as_ref(), &settings)
                    .with_overrides(overrides)
                    .run(),
                Err(err) => ResolutionAttempt::failed(pipeline.clone(), snapshot.version(), err),
            };
            match &attempt.outcome {
                Ok(resolution) => {
                    emit_resolution_finished(pipeline.as_str(), resolution.len(), &attempt.stats)
                }
                Err(err) => emit_resolution_failed(pipeline.as_str(), err, &attempt.stats),
            }
            attempt
        })
        .await
        .map_err(|e| FanInError::Task(e.to_string()))
    }
}
