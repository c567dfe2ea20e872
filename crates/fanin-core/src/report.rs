//! Human- and machine-readable rendering of a resolution attempt.
//!
//! Building a report has no side effects; the same attempt always describes
//! to the same report apart from `generated_at`.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use fanin_state::{Fingerprint, PipelineName, Revision, SnapshotVersion};
use serde::{Deserialize, Serialize};

use crate::error::FanInError;
use crate::resolver::ResolutionAttempt;
use crate::trace::{Conflict, Origin, SearchStats, TraceEvent};

/// Overall outcome of the attempt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ReportStatus {
    Resolved,
    Failed { error_kind: String, message: String },
}

/// One resolved material.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReportEntry {
    pub fingerprint: Fingerprint,
    pub material: String,
    pub names: Vec<String>,
    pub revision: Revision,
    pub origin: Origin,
}

/// One search step, numbered from 1.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReportStep {
    pub index: usize,
    pub summary: String,
    pub event: TraceEvent,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResolutionReport {
    pub target: PipelineName,
    pub snapshot_version: SnapshotVersion,
    pub generated_at: DateTime<Utc>,
    #[serde(flatten)]
    pub status: ReportStatus,
    pub materials: Vec<ReportEntry>,
    pub conflicts: Vec<Conflict>,
    pub last_combination: Vec<Revision>,
    pub steps: Vec<ReportStep>,
    pub stats: SearchStats,
}

impl ResolutionReport {
    pub fn describe(attempt: &ResolutionAttempt) -> Self {
        let steps = attempt
            .trace
            .events()
            .iter()
            .enumerate()
            .map(|(i, event)| ReportStep {
                index: i + 1,
                summary: event.describe(),
                event: event.clone(),
            })
            .collect();

        let mut report = Self {
            target: attempt.target.clone(),
            snapshot_version: attempt.snapshot_version,
            generated_at: Utc::now(),
            status: ReportStatus::Resolved,
            materials: Vec::new(),
            conflicts: Vec::new(),
            last_combination: Vec::new(),
            steps,
            stats: attempt.stats,
        };

        match &attempt.outcome {
            Ok(resolution) => {
                report.materials = resolution
                    .iter()
                    .map(|(fingerprint, resolved)| ReportEntry {
                        fingerprint: fingerprint.clone(),
                        material: resolved.material.describe(),
                        names: resolved.names.iter().cloned().collect(),
                        revision: resolved.revision.clone(),
                        origin: resolved.origin.clone(),
                    })
                    .collect();
            }
            Err(err) => {
                report.status = ReportStatus::Failed {
                    error_kind: err.kind().to_string(),
                    message: err.to_string(),
                };
                if let FanInError::NoConsistentAssignment {
                    conflicts,
                    last_combination,
                } = err
                {
                    report.conflicts = conflicts.clone();
                    report.last_combination = last_combination.clone();
                }
            }
        }
        report
    }

    pub fn is_resolved(&self) -> bool {
        self.status == ReportStatus::Resolved
    }

    /// `fingerprint -> revision`; empty on failure.
    pub fn revision_map(&self) -> BTreeMap<Fingerprint, Revision> {
        self.materials
            .iter()
            .map(|e| (e.fingerprint.clone(), e.revision.clone()))
            .collect()
    }

    /// Steps `[offset, offset + limit)`.
    pub fn steps_page(&self, offset: usize, limit: usize) -> &[ReportStep] {
        let start = offset.min(self.steps.len());
        let end = start.saturating_add(limit).min(self.steps.len());
        &self.steps[start..end]
    }

    /// `material → revision` lines, or the failure with competing values.
    pub fn render_compact(&self) -> String {
        let mut out = String::new();
        match &self.status {
            ReportStatus::Resolved => {
                out.push_str(&format!(
                    "{} resolved at {} ({} steps, {} backtracks)\n",
                    self.target, self.snapshot_version, self.stats.steps, self.stats.backtracks
                ));
                for entry in &self.materials {
                    out.push_str(&format!(
                        "  {} → {}\n",
                        entry.names.join(", "),
                        entry.revision
                    ));
                }
            }
            ReportStatus::Failed { message, .. } => {
                out.push_str(&format!("{} failed: {}\n", self.target, message));
                for conflict in &self.conflicts {
                    out.push_str(&format!(
                        "  {} [{}]: {} ({}) vs {} (from {})\n",
                        conflict.material,
                        conflict.fingerprint.short(),
                        conflict.assigned,
                        conflict.assigned_by,
                        conflict.proposed,
                        conflict.proposed_by
                    ));
                }
            }
        }
        out
    }

    /// Markdown rendering with the full step trace.
    pub fn render_verbose(&self) -> String {
        let mut md = format!("# Fan-in resolution: {}\n\n", self.target);
        md.push_str(&format!("- Snapshot: {}\n", self.snapshot_version));
        md.push_str(&format!(
            "- Generated: {}\n",
            self.generated_at.format("%Y-%m-%dT%H:%M:%SZ")
        ));
        match &self.status {
            ReportStatus::Resolved => md.push_str("- Status: **resolved**\n"),
            ReportStatus::Failed {
                error_kind,
                message,
            } => md.push_str(&format!("- Status: **failed** (`{error_kind}`): {message}\n")),
        }
        md.push_str(&format!(
            "- Steps: {}, backtracks: {}, elapsed: {}ms\n",
            self.stats.steps, self.stats.backtracks, self.stats.elapsed_ms
        ));

        if !self.materials.is_empty() {
            md.push_str("\n## Materials\n\n");
            md.push_str("| Material | Names | Revision | Origin |\n");
            md.push_str("|---|---|---|---|\n");
            for entry in &self.materials {
                md.push_str(&format!(
                    "| `{}` | {} | `{}` | {} |\n",
                    entry.material,
                    entry.names.join(", "),
                    entry.revision,
                    entry.origin
                ));
            }
        }

        if !self.conflicts.is_empty() {
            md.push_str("\n## Conflicts\n\n");
            for c in &self.conflicts {
                md.push_str(&format!(
                    "- **{}** (`{}`): `{}` ({}) vs `{}` from `{}`\n",
                    c.material,
                    c.fingerprint.short(),
                    c.assigned,
                    c.assigned_by,
                    c.proposed,
                    c.proposed_by
                ));
            }
            if !self.last_combination.is_empty() {
                let combo: Vec<String> =
                    self.last_combination.iter().map(|r| format!("`{r}`")).collect();
                md.push_str(&format!("\nLast combination tried: {}\n", combo.join(", ")));
            }
        }

        md.push_str("\n## Search Steps\n\n");
        if self.steps.is_empty() {
            md.push_str("none\n");
        }
        for step in &self.steps {
            md.push_str(&format!("{}. {}\n", step.index, step.summary));
        }
        md
    }
}
