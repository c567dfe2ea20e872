//! Pipeline configuration set passed explicitly into the graph builder.

use std::collections::BTreeMap;

use fanin_state::PipelineName;
use serde::{Deserialize, Serialize};

use crate::material::MaterialConfig;

/// One pipeline's declared materials and stages.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PipelineConfig {
    pub name: PipelineName,
    pub materials: Vec<MaterialConfig>,
    pub stages: Vec<String>,
}

impl PipelineConfig {
    pub fn new(name: impl Into<PipelineName>) -> Self {
        Self {
            name: name.into(),
            materials: Vec::new(),
            stages: Vec::new(),
        }
    }

    pub fn material(mut self, material: MaterialConfig) -> Self {
        self.materials.push(material);
        self
    }

    pub fn stage(mut self, stage: impl Into<String>) -> Self {
        self.stages.push(stage.into());
        self
    }

    pub fn has_stage(&self, stage: &str) -> bool {
        self.stages.iter().any(|s| s == stage)
    }
}

/// All known pipeline configurations, keyed by name.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "Vec<PipelineConfig>", into = "Vec<PipelineConfig>")]
pub struct PipelineConfigs {
    pipelines: BTreeMap<PipelineName, PipelineConfig>,
}

impl PipelineConfigs {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace a pipeline.
    pub fn insert(&mut self, config: PipelineConfig) {
        self.pipelines.insert(config.name.clone(), config);
    }

    pub fn with(mut self, config: PipelineConfig) -> Self {
        self.insert(config);
        self
    }

    pub fn get(&self, name: &PipelineName) -> Option<&PipelineConfig> {
        self.pipelines.get(name)
    }

    pub fn names(&self) -> impl Iterator<Item = &PipelineName> {
        self.pipelines.keys()
    }

    pub fn len(&self) -> usize {
        self.pipelines.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pipelines.is_empty()
    }
}

impl From<Vec<PipelineConfig>> for PipelineConfigs {
    fn from(configs: Vec<PipelineConfig>) -> Self {
        configs.into_iter().collect()
    }
}

impl From<PipelineConfigs> for Vec<PipelineConfig> {
    fn from(configs: PipelineConfigs) -> Self {
        configs.pipelines.into_values().collect()
    }
}

impl FromIterator<PipelineConfig> for PipelineConfigs {
    fn from_iter<T: IntoIterator<Item = PipelineConfig>>(iter: T) -> Self {
        let mut configs = Self::new();
        for config in iter {
            configs.insert(config);
        }
        configs
    }
}
