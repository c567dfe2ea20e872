//! Fanin-State: pipeline timeline for the fan-in resolver
//!
//! This crate holds the data the resolver reads but never writes: the
//! append-only history of pipeline instances and the revisions each was
//! built with.
//!
//! ## Key Components
//!
//! - `PipelineInstance` / `BuildCause`: one recorded run and its inputs
//! - `TimelineSnapshot`: versioned, immutable read view
//! - `TimelineStore`: append-only store handing out snapshots
//! - `fakes::MemoryTimelineStore`: in-memory implementation

mod error;
pub mod fakes;
mod schema;
pub mod storage_traits;

pub use error::StorageError;
pub use schema::{
    BuildCause, Fingerprint, NewInstance, PipelineInstance, PipelineName, Revision,
    SnapshotVersion, StageResult, StageRun,
};
pub use storage_traits::{StorageResult, TimelineSnapshot, TimelineStore};
