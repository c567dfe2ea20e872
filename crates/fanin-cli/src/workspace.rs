//! Workspace file: pipeline configuration plus recorded history, loaded into
//! an in-memory timeline.
//!
//! ```json
//! {
//!   "pipelines": [{ "name": "A", "materials": [...], "stages": ["build"] }],
//!   "runs": [{
//!     "pipeline": "A",
//!     "materials": [{ "material": { "type": "scm", ... }, "revision": { "kind": "scm", "id": "r1" } }],
//!     "stages": [{ "name": "build", "result": "passed" }]
//!   }],
//!   "scm": [{ "material": { "type": "scm", ... }, "revisions": ["r1", "r2"] }]
//! }
//! ```
//!
//! Runs are appended in file order, so counters follow their position.

use std::path::Path;

use anyhow::{bail, Context, Result};
use fanin_core::{MaterialConfig, PipelineConfigs};
use fanin_state::fakes::MemoryTimelineStore;
use fanin_state::{BuildCause, Fingerprint, NewInstance, PipelineName, Revision, StageRun, TimelineStore};
use serde::Deserialize;

#[derive(Debug, Deserialize)]
pub struct WorkspaceFile {
    pub pipelines: PipelineConfigs,
    #[serde(default)]
    pub runs: Vec<RunRecord>,
    #[serde(default)]
    pub scm: Vec<ScmRecord>,
}

#[derive(Debug, Deserialize)]
pub struct RunRecord {
    pub pipeline: PipelineName,
    #[serde(default)]
    pub materials: Vec<UsedMaterial>,
    #[serde(default)]
    pub stages: Vec<StageRun>,
}

#[derive(Debug, Deserialize)]
pub struct UsedMaterial {
    pub material: MaterialConfig,
    pub revision: Revision,
}

#[derive(Debug, Deserialize)]
pub struct ScmRecord {
    pub material: MaterialConfig,
    pub revisions: Vec<String>,
}

/// Configuration and timeline loaded from a workspace file.
pub struct Workspace {
    pub configs: PipelineConfigs,
    pub store: MemoryTimelineStore,
}

impl Workspace {
    pub async fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read workspace file: {:?}", path))?;
        let file: WorkspaceFile = serde_json::from_str(&content)
            .with_context(|| format!("Invalid workspace JSON in {:?}", path))?;
        Self::from_file(file).await
    }

    pub async fn from_file(file: WorkspaceFile) -> Result<Self> {
        let store = MemoryTimelineStore::new();

        for record in file.scm {
            let fingerprint = record.material.fingerprint();
            for id in record.revisions {
                store
                    .record_scm_revision(&fingerprint, Revision::scm(id))
                    .await
                    .context("Failed to record scm revision")?;
            }
        }

        for run in file.runs {
            let cause: BuildCause = run
                .materials
                .into_iter()
                .map(|used| (used.material.fingerprint(), used.revision))
                .collect();
            let mut instance = NewInstance::new(run.pipeline.clone(), cause);
            instance.stages = run.stages;
            store
                .append_instance(instance)
                .await
                .with_context(|| format!("Failed to record run of {}", run.pipeline))?;
        }

        Ok(Self {
            configs: file.pipelines,
            store,
        })
    }

    /// Resolve a `--pin NAME=REV` argument against the configured materials.
    ///
    /// Dependency pins accept `counter` or `pipeline/counter`; scm pins take
    /// the revision id verbatim.
    pub fn parse_pin(&self, pin: &str) -> Result<(Fingerprint, Revision)> {
        let Some((name, raw)) = pin.split_once('=') else {
            bail!("pin must look like NAME=REVISION, got {pin:?}");
        };
        let material = self
            .configs
            .names()
            .filter_map(|p| self.configs.get(p))
            .flat_map(|config| config.materials.iter())
            .find(|m| m.display_name() == name)
            .with_context(|| format!("No material named {name:?} in any pipeline"))?;

        let revision = match material.upstream() {
            Some((upstream, _)) => {
                let counter = raw.rsplit('/').next().unwrap_or(raw);
                let counter: u64 = counter
                    .parse()
                    .with_context(|| format!("Invalid pipeline counter in pin {pin:?}"))?;
                Revision::pipeline(upstream.clone(), counter)
            }
            None => Revision::scm(raw),
        };
        Ok((material.fingerprint(), revision))
    }
}
