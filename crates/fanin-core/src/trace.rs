//! Search trace recorded by the resolver.
//!
//! The trace is the sequence of decisions the search actually took, not the
//! whole candidate space. Reports and debug tooling render it.

use fanin_state::{Fingerprint, Revision};
use serde::{Deserialize, Serialize};

/// Why a material holds its revision.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Origin {
    /// Pinned by the caller; never backtracked over.
    Override,
    /// Picked from this material's own candidate list.
    Chosen,
    /// Read from the build cause of the given upstream instance.
    Implied { by: Revision },
    /// Scm leaf no dependency constrained; newest known revision.
    LatestSeen,
}

impl std::fmt::Display for Origin {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Origin::Override => f.write_str("override"),
            Origin::Chosen => f.write_str("chosen"),
            Origin::Implied { by } => write!(f, "implied by {by}"),
            Origin::LatestSeen => f.write_str("latest seen"),
        }
    }
}

/// Two sources disagreeing on one material's revision.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Conflict {
    pub fingerprint: Fingerprint,
    /// Human-readable material description.
    pub material: String,
    /// Revision already held by the material.
    pub assigned: Revision,
    pub assigned_by: Origin,
    /// Revision the rejected candidate wanted.
    pub proposed: Revision,
    /// Instance whose build cause proposed it.
    pub proposed_by: Revision,
}

/// One decision of the search.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum TraceEvent {
    /// Override applied before the search.
    Seeded {
        material: String,
        revision: Revision,
    },
    /// Choice point already fixed by an earlier choice or override.
    Forced {
        choice: usize,
        material: String,
        revision: Revision,
    },
    /// Candidate consistent with everything fixed so far.
    Accepted {
        choice: usize,
        material: String,
        candidate: Revision,
        newly_assigned: usize,
    },
    /// Candidate disagreed with an already fixed material.
    Rejected {
        choice: usize,
        material: String,
        candidate: Revision,
        conflicts: Vec<Conflict>,
    },
    /// Choice point ran out of candidates.
    Exhausted { choice: usize, material: String },
    /// Previous choice undone so it can advance.
    Backtracked {
        choice: usize,
        material: String,
        undone: Option<Revision>,
    },
    /// Unconstrained scm leaf set to its newest known revision.
    DefaultedToLatest {
        material: String,
        revision: Revision,
    },
}

impl TraceEvent {
    /// Short event name, as used in structured logs.
    pub fn kind(&self) -> &'static str {
        match self {
            TraceEvent::Seeded { .. } => "seeded",
            TraceEvent::Forced { .. } => "forced",
            TraceEvent::Accepted { .. } => "accepted",
            TraceEvent::Rejected { .. } => "rejected",
            TraceEvent::Exhausted { .. } => "exhausted",
            TraceEvent::Backtracked { .. } => "backtracked",
            TraceEvent::DefaultedToLatest { .. } => "defaulted_to_latest",
        }
    }

    /// One-line rendering for verbose traces.
    pub fn describe(&self) -> String {
        match self {
            TraceEvent::Seeded { material, revision } => {
                format!("seed {material} = {revision} (override)")
            }
            TraceEvent::Forced {
                choice,
                material,
                revision,
            } => format!("#{choice} {material}: fixed at {revision} by earlier choice"),
            TraceEvent::Accepted {
                choice,
                material,
                candidate,
                newly_assigned,
            } => format!("#{choice} {material}: accept {candidate} (+{newly_assigned} materials)"),
            TraceEvent::Rejected {
                choice,
                material,
                candidate,
                conflicts,
            } => {
                let detail = conflicts
                    .iter()
                    .map(|c| {
                        format!(
                            "{} has {} ({}) but {} wants {}",
                            c.material, c.assigned, c.assigned_by, c.proposed_by, c.proposed
                        )
                    })
                    .collect::<Vec<_>>()
                    .join("; ");
                format!("#{choice} {material}: reject {candidate}: {detail}")
            }
            TraceEvent::Exhausted { choice, material } => {
                format!("#{choice} {material}: no candidates left")
            }
            TraceEvent::Backtracked {
                choice,
                material,
                undone,
            } => match undone {
                Some(rev) => format!("#{choice} {material}: backtrack from {rev}"),
                None => format!("#{choice} {material}: backtrack past fixed material"),
            },
            TraceEvent::DefaultedToLatest { material, revision } => {
                format!("{material}: latest seen {revision}")
            }
        }
    }
}

/// Ordered events of one resolution.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchTrace {
    events: Vec<TraceEvent>,
}

impl SearchTrace {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, event: TraceEvent) {
        self.events.push(event);
    }

    pub fn events(&self) -> &[TraceEvent] {
        &self.events
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    /// Events `[offset, offset + limit)`.
    pub fn page(&self, offset: usize, limit: usize) -> &[TraceEvent] {
        let start = offset.min(self.events.len());
        let end = start.saturating_add(limit).min(self.events.len());
        &self.events[start..end]
    }

    pub fn count(&self, kind: &str) -> usize {
        self.events.iter().filter(|e| e.kind() == kind).count()
    }
}

/// Counters for one resolution.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchStats {
    /// Candidate evaluations.
    pub steps: u64,
    pub backtracks: u64,
    pub elapsed_ms: u64,
}
