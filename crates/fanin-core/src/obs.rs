//! Structured observability hooks for fan-in resolutions.
//!
//! This module provides:
//! - Resolution-scoped tracing spans via `ResolveSpan` RAII guard
//! - Emission functions for resolution outcomes and trigger decisions
//!
//! Events are emitted at `info!` level; failures at `warn!`.
//! Filter with `RUST_LOG` (e.g. `RUST_LOG=fanin_core=debug` for per-step logs).

use tracing::{info, warn};
use uuid::Uuid;

use crate::error::FanInError;
use crate::trace::SearchStats;

/// RAII guard that enters a resolution-scoped span.
///
/// # Example
///
/// ```ignore
/// let _span = ResolveSpan::enter("deploy", Uuid::new_v4());
/// // every search step logged now carries pipeline = "deploy"
/// ```
pub struct ResolveSpan {
    _span: tracing::span::EnteredSpan,
}

impl ResolveSpan {
    pub fn enter(pipeline: &str, request_id: Uuid) -> Self {
        let span = tracing::info_span!(
            "fanin.resolve",
            pipeline = %pipeline,
            request_id = %request_id
        );
        Self {
            _span: span.entered(),
        }
    }
}

/// Emit event: resolution succeeded.
pub fn emit_resolution_finished(pipeline: &str, materials: usize, stats: &SearchStats) {
    info!(
        event = "fanin.resolve.finished",
        pipeline = %pipeline,
        materials = materials,
        steps = stats.steps,
        backtracks = stats.backtracks,
        duration_ms = stats.elapsed_ms,
    );
}

/// Emit event: resolution failed (warning level).
pub fn emit_resolution_failed(pipeline: &str, error: &FanInError, stats: &SearchStats) {
    warn!(
        event = "fanin.resolve.failed",
        pipeline = %pipeline,
        steps = stats.steps,
        backtracks = stats.backtracks,
        duration_ms = stats.elapsed_ms,
        error = %error,
    );
}

/// Emit event: trigger decision made after a successful resolution.
pub fn emit_trigger_decided(pipeline: &str, should_trigger: bool, changed: usize) {
    info!(
        event = "fanin.trigger.decided",
        pipeline = %pipeline,
        should_trigger = should_trigger,
        changed = changed,
    );
}
