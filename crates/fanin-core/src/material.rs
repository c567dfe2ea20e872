//! Material definitions and the fingerprint registry.
//!
//! A fingerprint is derived from the identity attributes of a material only
//! (kind, scm type, url, branch / upstream pipeline and stage). Display names
//! and checkout folders are excluded, so one physical material declared under
//! different names in different pipelines collapses into a single node.

use std::collections::BTreeMap;

use fanin_state::{Fingerprint, PipelineName};
use serde::{Deserialize, Serialize};

use crate::error::{FanInError, FanInResult};

/// Supported source-control and package material types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScmType {
    Git,
    Hg,
    Svn,
    P4,
    Tfs,
    Package,
    Plugin,
}

impl ScmType {
    pub fn name(&self) -> &'static str {
        match self {
            ScmType::Git => "git",
            ScmType::Hg => "hg",
            ScmType::Svn => "svn",
            ScmType::P4 => "p4",
            ScmType::Tfs => "tfs",
            ScmType::Package => "package",
            ScmType::Plugin => "plugin",
        }
    }
}

/// A source-control (leaf) material.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScmMaterial {
    pub scm_type: ScmType,
    pub url: String,
    #[serde(default)]
    pub branch: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub folder: Option<String>,
}

/// A dependency on a stage of an upstream pipeline.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DependencyMaterial {
    pub pipeline: PipelineName,
    pub stage: String,
    #[serde(default)]
    pub name: Option<String>,
}

/// A material as declared in a pipeline's configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum MaterialConfig {
    Scm(ScmMaterial),
    Dependency(DependencyMaterial),
}

impl MaterialConfig {
    pub fn scm(scm_type: ScmType, url: impl Into<String>) -> Self {
        MaterialConfig::Scm(ScmMaterial {
            scm_type,
            url: url.into(),
            branch: None,
            name: None,
            folder: None,
        })
    }

    pub fn git(url: impl Into<String>) -> Self {
        Self::scm(ScmType::Git, url)
    }

    pub fn dependency(pipeline: impl Into<PipelineName>, stage: impl Into<String>) -> Self {
        MaterialConfig::Dependency(DependencyMaterial {
            pipeline: pipeline.into(),
            stage: stage.into(),
            name: None,
        })
    }

    /// Set the display name. Does not affect the fingerprint.
    pub fn named(mut self, display: impl Into<String>) -> Self {
        match &mut self {
            MaterialConfig::Scm(m) => m.name = Some(display.into()),
            MaterialConfig::Dependency(m) => m.name = Some(display.into()),
        }
        self
    }

    /// Set the checkout folder of an scm material. Does not affect the fingerprint.
    pub fn in_folder(mut self, folder: impl Into<String>) -> Self {
        if let MaterialConfig::Scm(m) = &mut self {
            m.folder = Some(folder.into());
        }
        self
    }

    /// Set the branch of an scm material. Part of the identity.
    pub fn on_branch(mut self, branch: impl Into<String>) -> Self {
        if let MaterialConfig::Scm(m) = &mut self {
            m.branch = Some(branch.into());
        }
        self
    }

    pub fn is_dependency(&self) -> bool {
        matches!(self, MaterialConfig::Dependency(_))
    }

    /// `(pipeline, stage)` for dependency materials.
    pub fn upstream(&self) -> Option<(&PipelineName, &str)> {
        match self {
            MaterialConfig::Dependency(m) => Some((&m.pipeline, m.stage.as_str())),
            MaterialConfig::Scm(_) => None,
        }
    }

    /// Name shown to users: the configured name, else the url or pipeline.
    pub fn display_name(&self) -> String {
        match self {
            MaterialConfig::Scm(m) => m.name.clone().unwrap_or_else(|| m.url.clone()),
            MaterialConfig::Dependency(m) => m
                .name
                .clone()
                .unwrap_or_else(|| m.pipeline.to_string()),
        }
    }

    /// One-line description of the material's identity.
    pub fn describe(&self) -> String {
        match self {
            MaterialConfig::Scm(m) => match &m.branch {
                Some(branch) => format!("{} {} [{}]", m.scm_type.name(), m.url, branch),
                None => format!("{} {}", m.scm_type.name(), m.url),
            },
            MaterialConfig::Dependency(m) => {
                format!("pipeline {} stage {}", m.pipeline, m.stage)
            }
        }
    }

    /// Compute the stable fingerprint over the identity attributes.
    pub fn fingerprint(&self) -> Fingerprint {
        Fingerprint::from_bytes(&self.identity_bytes())
    }

    /// True when both materials describe the same physical material.
    pub fn same_identity(&self, other: &MaterialConfig) -> bool {
        self.identity_bytes() == other.identity_bytes()
    }

    fn identity_bytes(&self) -> Vec<u8> {
        let parts: Vec<&str> = match self {
            MaterialConfig::Scm(m) => vec![
                "scm",
                m.scm_type.name(),
                m.url.as_str(),
                m.branch.as_deref().unwrap_or(""),
            ],
            MaterialConfig::Dependency(m) => {
                vec!["dependency", m.pipeline.as_str(), m.stage.as_str()]
            }
        };
        let mut bytes = Vec::new();
        for part in parts {
            bytes.extend_from_slice(part.as_bytes());
            bytes.push(0);
        }
        bytes
    }
}

/// Assigns and remembers one fingerprint per distinct material.
#[derive(Debug, Clone, Default)]
pub struct FingerprintRegistry {
    materials: BTreeMap<Fingerprint, MaterialConfig>,
}

impl FingerprintRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a material, returning its fingerprint.
    ///
    /// The first material registered under a fingerprint is kept. A second
    /// material with a different identity under the same fingerprint is a
    /// [`FanInError::FingerprintCollision`].
    pub fn register(&mut self, material: &MaterialConfig) -> FanInResult<Fingerprint> {
        let fingerprint = material.fingerprint();
        match self.materials.get(&fingerprint) {
            Some(existing) if !existing.same_identity(material) => {
                Err(FanInError::FingerprintCollision {
                    fingerprint,
                    first: existing.describe(),
                    second: material.describe(),
                })
            }
            Some(_) => Ok(fingerprint),
            None => {
                self.materials.insert(fingerprint.clone(), material.clone());
                Ok(fingerprint)
            }
        }
    }

    pub fn get(&self, fingerprint: &Fingerprint) -> Option<&MaterialConfig> {
        self.materials.get(fingerprint)
    }

    pub fn len(&self) -> usize {
        self.materials.len()
    }

    pub fn is_empty(&self) -> bool {
        self.materials.is_empty()
    }
}
