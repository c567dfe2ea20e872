//! Error types for fan-in graph building and revision resolution.

use fanin_state::{Fingerprint, PipelineName, Revision, StorageError};
use thiserror::Error;

use crate::trace::Conflict;

/// Which search ceiling was hit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BudgetLimit {
    Steps(u64),
    DurationMs(u64),
}

impl std::fmt::Display for BudgetLimit {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BudgetLimit::Steps(n) => write!(f, "step limit {n}"),
            BudgetLimit::DurationMs(ms) => write!(f, "time limit {ms}ms"),
        }
    }
}

/// Errors produced while building a fan-in graph or resolving revisions.
#[derive(Debug, Error)]
pub enum FanInError {
    /// A pipeline transitively depends on itself.
    #[error("cyclic dependency: {}", format_cycle(.cycle))]
    CyclicDependency { cycle: Vec<PipelineName> },

    /// A pipeline referenced by name is not configured.
    #[error("pipeline '{pipeline}' is not configured{}", referenced_by_suffix(.referenced_by))]
    UnknownPipeline {
        pipeline: PipelineName,
        referenced_by: Option<PipelineName>,
    },

    /// A dependency names a stage the upstream pipeline does not have.
    #[error("pipeline '{pipeline}' has no stage '{stage}' (referenced by '{referenced_by}')")]
    UnknownStage {
        pipeline: PipelineName,
        stage: String,
        referenced_by: PipelineName,
    },

    /// An override names a material that is not part of the graph.
    #[error("material {fingerprint} is not part of the fan-in graph")]
    UnknownMaterial { fingerprint: Fingerprint },

    /// An override revision does not fit the material it pins.
    #[error("revision {revision} cannot pin material {material}")]
    InvalidOverride { material: String, revision: Revision },

    /// Two materials with different identities hash to one fingerprint.
    #[error("fingerprint {fingerprint} shared by '{first}' and '{second}'")]
    FingerprintCollision {
        fingerprint: Fingerprint,
        first: String,
        second: String,
    },

    /// A material has nothing to resolve to (no passed upstream instance, no known scm revision).
    #[error("no viable revision for {material}")]
    NoViableRevision {
        fingerprint: Fingerprint,
        material: String,
        upstream: Option<PipelineName>,
    },

    /// Search exhausted without a mutually consistent assignment.
    #[error(
        "no consistent revision assignment; conflicting materials: {}",
        format_conflicts(.conflicts)
    )]
    NoConsistentAssignment {
        conflicts: Vec<Conflict>,
        last_combination: Vec<Revision>,
    },

    /// Bounded search hit its ceiling before finishing.
    #[error("search budget exceeded after {steps} steps ({limit})")]
    SearchBudgetExceeded {
        steps: u64,
        elapsed_ms: u64,
        limit: BudgetLimit,
    },

    /// A build cause references an instance the snapshot does not contain.
    #[error("timeline inconsistency: {pipeline}/{counter} referenced but not recorded")]
    TimelineInconsistency { pipeline: PipelineName, counter: u64 },

    /// A resolver setting could not be parsed or is out of range.
    #[error("invalid setting {key}={value}: {reason}")]
    InvalidSetting {
        key: String,
        value: String,
        reason: String,
    },

    /// Bubbled-up timeline store error.
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    /// The blocking search task panicked or was cancelled.
    #[error("resolution task failed: {0}")]
    Task(String),
}

impl FanInError {
    /// Stable snake_case name of the variant, for reports and logs.
    pub fn kind(&self) -> &'static str {
        match self {
            FanInError::CyclicDependency { .. } => "cyclic_dependency",
            FanInError::UnknownPipeline { .. } => "unknown_pipeline",
            FanInError::UnknownStage { .. } => "unknown_stage",
            FanInError::UnknownMaterial { .. } => "unknown_material",
            FanInError::InvalidOverride { .. } => "invalid_override",
            FanInError::FingerprintCollision { .. } => "fingerprint_collision",
            FanInError::NoViableRevision { .. } => "no_viable_revision",
            FanInError::NoConsistentAssignment { .. } => "no_consistent_assignment",
            FanInError::SearchBudgetExceeded { .. } => "search_budget_exceeded",
            FanInError::TimelineInconsistency { .. } => "timeline_inconsistency",
            FanInError::InvalidSetting { .. } => "invalid_setting",
            FanInError::Storage(_) => "storage",
            FanInError::Task(_) => "task",
        }
    }

    /// True for the four resolution outcomes (as opposed to config/storage faults).
    pub fn is_resolution_failure(&self) -> bool {
        matches!(
            self,
            FanInError::CyclicDependency { .. }
                | FanInError::NoViableRevision { .. }
                | FanInError::NoConsistentAssignment { .. }
                | FanInError::SearchBudgetExceeded { .. }
        )
    }
}

fn format_cycle(cycle: &[PipelineName]) -> String {
    cycle
        .iter()
        .map(PipelineName::as_str)
        .collect::<Vec<_>>()
        .join(" -> ")
}

fn referenced_by_suffix(referenced_by: &Option<PipelineName>) -> String {
    referenced_by
        .as_ref()
        .map(|p| format!(" (referenced by '{p}')"))
        .unwrap_or_default()
}

fn format_conflicts(conflicts: &[Conflict]) -> String {
    conflicts
        .iter()
        .map(|c| format!("{} ({} vs {})", c.material, c.assigned, c.proposed))
        .collect::<Vec<_>>()
        .join(", ")
}

/// Convenience result alias.
pub type FanInResult<T> = std::result::Result<T, FanInError>;
