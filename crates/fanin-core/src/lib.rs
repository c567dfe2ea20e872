//! Fanin Core Library
//!
//! Resolves, for a pipeline about to run, one revision per upstream material
//! such that every upstream pipeline it consumes was built from the same
//! revisions of whatever they share.
//!
//! ## Key Components
//!
//! - `GraphBuilder` / `FanInGraph`: materials reachable from a target, merged by fingerprint
//! - `CandidateEnumerator`: passed upstream instances, newest first
//! - `Resolver`: backtracking consistency search with a recorded trace
//! - `ResolutionReport`: compact, verbose and machine-readable rendering
//! - `FanInService`: trigger and diagnostic entry points over a `TimelineStore`

pub mod candidates;
pub mod config;
pub mod error;
pub mod graph;
pub mod material;
pub mod obs;
pub mod report;
pub mod resolver;
pub mod service;
pub mod settings;
pub mod telemetry;
pub mod trace;

pub use candidates::{Candidate, CandidateEnumerator, CandidateList};
pub use config::{PipelineConfig, PipelineConfigs};
pub use error::{BudgetLimit, FanInError, FanInResult};
pub use graph::{FanInEdge, FanInGraph, FanInNode, GraphBuilder};
pub use material::{DependencyMaterial, FingerprintRegistry, MaterialConfig, ScmMaterial, ScmType};
pub use report::{ReportEntry, ReportStatus, ReportStep, ResolutionReport};
pub use resolver::{Resolution, ResolutionAttempt, ResolvedMaterial, Resolver};
pub use service::{FanInService, TriggerDecision, TriggerOutcome, TriggerRequest};
pub use settings::FanInSettings;
pub use trace::{Conflict, Origin, SearchStats, SearchTrace, TraceEvent};

pub use fanin_state::{
    BuildCause, Fingerprint, PipelineInstance, PipelineName, Revision, SnapshotVersion,
    TimelineSnapshot, TimelineStore,
};

/// Crate version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
