//! Timeline schema: pipeline instances, build causes and revisions.
//!
//! These records are what the external history store hands the resolver.
//! They are append-only: once an instance is recorded it never changes.

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::error::StorageError;

/// Name of a pipeline as declared in configuration.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PipelineName(String);

impl PipelineName {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PipelineName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for PipelineName {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

impl From<String> for PipelineName {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// Stable material identity (SHA-256 hex string).
///
/// The inner field is private so the value is always lowercase hex produced
/// by `from_bytes` or validated via `TryFrom<String>`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Fingerprint(String);

impl Fingerprint {
    /// SHA-256 of the given canonical bytes.
    pub fn from_bytes(data: &[u8]) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(data);
        Fingerprint(hex::encode(hasher.finalize()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Short form (first 12 hex chars).
    pub fn short(&self) -> &str {
        &self.0[..12.min(self.0.len())]
    }
}

impl TryFrom<String> for Fingerprint {
    type Error = StorageError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        if s.len() != 64 || !s.chars().all(|c| c.is_ascii_hexdigit()) {
            return Err(StorageError::InvalidFingerprint { fingerprint: s });
        }
        Ok(Fingerprint(s.to_ascii_lowercase()))
    }
}

impl From<Fingerprint> for String {
    fn from(fp: Fingerprint) -> Self {
        fp.0
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A revision of a material.
///
/// Scm materials carry an opaque revision id; dependency materials are
/// revisioned by the upstream pipeline instance that produced them.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Revision {
    Scm { id: String },
    Pipeline { pipeline: PipelineName, counter: u64 },
}

impl Revision {
    pub fn scm(id: impl Into<String>) -> Self {
        Revision::Scm { id: id.into() }
    }

    pub fn pipeline(pipeline: impl Into<PipelineName>, counter: u64) -> Self {
        Revision::Pipeline {
            pipeline: pipeline.into(),
            counter,
        }
    }

    /// `(pipeline, counter)` for dependency revisions.
    pub fn as_pipeline(&self) -> Option<(&PipelineName, u64)> {
        match self {
            Revision::Pipeline { pipeline, counter } => Some((pipeline, *counter)),
            Revision::Scm { .. } => None,
        }
    }
}

impl fmt::Display for Revision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Revision::Scm { id } => f.write_str(id),
            Revision::Pipeline { pipeline, counter } => write!(f, "{pipeline}/{counter}"),
        }
    }
}

/// The revisions an instance was built with, keyed by material fingerprint.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BuildCause(BTreeMap<Fingerprint, Revision>);

impl BuildCause {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style insert.
    pub fn with(mut self, fingerprint: Fingerprint, revision: Revision) -> Self {
        self.0.insert(fingerprint, revision);
        self
    }

    pub fn insert(&mut self, fingerprint: Fingerprint, revision: Revision) -> Option<Revision> {
        self.0.insert(fingerprint, revision)
    }

    pub fn get(&self, fingerprint: &Fingerprint) -> Option<&Revision> {
        self.0.get(fingerprint)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&Fingerprint, &Revision)> {
        self.0.iter()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl FromIterator<(Fingerprint, Revision)> for BuildCause {
    fn from_iter<T: IntoIterator<Item = (Fingerprint, Revision)>>(iter: T) -> Self {
        Self(iter.into_iter().collect())
    }
}

/// Outcome of one stage of a pipeline instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageResult {
    Passed,
    Failed,
    Cancelled,
}

/// A stage run recorded on an instance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageRun {
    pub name: String,
    pub result: StageResult,
}

impl StageRun {
    pub fn passed(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            result: StageResult::Passed,
        }
    }

    pub fn failed(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            result: StageResult::Failed,
        }
    }
}

/// One recorded run of a pipeline.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PipelineInstance {
    pub pipeline: PipelineName,
    /// 1-based, contiguous per pipeline.
    pub counter: u64,
    pub build_cause: BuildCause,
    pub stages: Vec<StageRun>,
    pub scheduled_at: DateTime<Utc>,
}

impl PipelineInstance {
    /// True when `stage` ran on this instance and passed.
    pub fn stage_passed(&self, stage: &str) -> bool {
        self.stages
            .iter()
            .any(|s| s.name == stage && s.result == StageResult::Passed)
    }

    /// The revision this instance represents as a dependency material.
    pub fn revision(&self) -> Revision {
        Revision::pipeline(self.pipeline.clone(), self.counter)
    }
}

/// Input for appending an instance; the store assigns the counter.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewInstance {
    pub pipeline: PipelineName,
    pub build_cause: BuildCause,
    pub stages: Vec<StageRun>,
}

impl NewInstance {
    pub fn new(pipeline: impl Into<PipelineName>, build_cause: BuildCause) -> Self {
        Self {
            pipeline: pipeline.into(),
            build_cause,
            stages: Vec::new(),
        }
    }

    pub fn stage(mut self, run: StageRun) -> Self {
        self.stages.push(run);
        self
    }
}

/// Monotonic token identifying a timeline snapshot.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SnapshotVersion(pub u64);

impl fmt::Display for SnapshotVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "v{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fingerprint_rejects_non_hex() {
        let err = Fingerprint::try_from("not-a-digest".to_string()).unwrap_err();
        assert!(matches!(err, StorageError::InvalidFingerprint { .. }));
    }

    #[test]
    fn test_fingerprint_accepts_uppercase_and_normalizes() {
        let raw = Fingerprint::from_bytes(b"git").as_str().to_ascii_uppercase();
        let fp = Fingerprint::try_from(raw).unwrap();
        assert_eq!(fp, Fingerprint::from_bytes(b"git"));
        assert_eq!(fp.short().len(), 12);
    }

    #[test]
    fn test_revision_display() {
        assert_eq!(Revision::scm("abc123").to_string(), "abc123");
        assert_eq!(Revision::pipeline("up", 4).to_string(), "up/4");
    }

    #[test]
    fn test_revision_serde_tagged() {
        let rev = Revision::pipeline("build", 2);
        let json = serde_json::to_value(&rev).unwrap();
        assert_eq!(json["kind"], "pipeline");
        assert_eq!(json["counter"], 2);
        let back: Revision = serde_json::from_value(json).unwrap();
        assert_eq!(back, rev);
    }

    #[test]
    fn test_stage_passed_only_for_named_stage() {
        let instance = PipelineInstance {
            pipeline: PipelineName::new("up"),
            counter: 1,
            build_cause: BuildCause::new(),
            stages: vec![StageRun::passed("build"), StageRun::failed("deploy")],
            scheduled_at: Utc::now(),
        };
        assert!(instance.stage_passed("build"));
        assert!(!instance.stage_passed("deploy"));
        assert!(!instance.stage_passed("missing"));
        assert_eq!(instance.revision(), Revision::pipeline("up", 1));
    }

    #[test]
    fn test_build_cause_serializes_as_map() {
        let fp = Fingerprint::from_bytes(b"m");
        let cause = BuildCause::new().with(fp.clone(), Revision::scm("r1"));
        let json = serde_json::to_value(&cause).unwrap();
        assert_eq!(json[fp.as_str()]["id"], "r1");
    }
}
