//! Consistency resolver: pick one revision per material so that every pair of
//! upstream instances agrees on what they share.
//!
//! The search walks the dependency choice points closest-to-target first and
//! tries each one's candidates newest first. Accepting a candidate expands its
//! build cause (transitively through implied pipeline instances) into implied
//! assignments. A candidate that disagrees with anything already fixed is
//! rejected; an exhausted choice point undoes the previous frame and advances
//! it. Backtracking is chronological over an explicit frame stack.

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::rc::Rc;
use std::time::Instant;

use fanin_state::{Fingerprint, PipelineName, Revision, SnapshotVersion, TimelineSnapshot};
use serde::Serialize;
use tracing::debug;

use crate::candidates::{CandidateEnumerator, CandidateList};
use crate::error::{BudgetLimit, FanInError, FanInResult};
use crate::graph::{FanInGraph, FanInNode};
use crate::material::MaterialConfig;
use crate::settings::FanInSettings;
use crate::trace::{Conflict, Origin, SearchStats, SearchTrace, TraceEvent};

/// One material's resolved revision.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ResolvedMaterial {
    pub material: MaterialConfig,
    pub names: BTreeSet<String>,
    pub revision: Revision,
    pub origin: Origin,
    /// Declared directly on the target pipeline.
    pub direct: bool,
}

/// A consistent revision for every material of a fan-in graph.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Resolution {
    pub target: PipelineName,
    pub snapshot_version: SnapshotVersion,
    materials: BTreeMap<Fingerprint, ResolvedMaterial>,
}

impl Resolution {
    pub fn get(&self, fingerprint: &Fingerprint) -> Option<&ResolvedMaterial> {
        self.materials.get(fingerprint)
    }

    pub fn revision(&self, fingerprint: &Fingerprint) -> Option<&Revision> {
        self.materials.get(fingerprint).map(|m| &m.revision)
    }

    /// First material declared under `name`.
    pub fn named(&self, name: &str) -> Option<&ResolvedMaterial> {
        self.materials.values().find(|m| m.names.contains(name))
    }

    /// `fingerprint -> revision`, the form a scheduler consumes.
    pub fn revision_map(&self) -> BTreeMap<Fingerprint, Revision> {
        self.materials
            .iter()
            .map(|(fp, m)| (fp.clone(), m.revision.clone()))
            .collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&Fingerprint, &ResolvedMaterial)> {
        self.materials.iter()
    }

    pub fn len(&self) -> usize {
        self.materials.len()
    }

    pub fn is_empty(&self) -> bool {
        self.materials.is_empty()
    }
}

/// Outcome of one resolution together with how it was reached.
#[derive(Debug)]
pub struct ResolutionAttempt {
    pub target: PipelineName,
    pub snapshot_version: SnapshotVersion,
    pub outcome: FanInResult<Resolution>,
    pub trace: SearchTrace,
    pub stats: SearchStats,
}

impl ResolutionAttempt {
    /// Attempt that failed before any search ran (e.g. graph construction).
    pub fn failed(target: PipelineName, snapshot_version: SnapshotVersion, error: FanInError) -> Self {
        Self {
            target,
            snapshot_version,
            outcome: Err(error),
            trace: SearchTrace::new(),
            stats: SearchStats::default(),
        }
    }

    pub fn is_resolved(&self) -> bool {
        self.outcome.is_ok()
    }
}

/// Resolves one fan-in graph against one timeline snapshot.
pub struct Resolver<'a> {
    graph: &'a FanInGraph,
    snapshot: &'a dyn TimelineSnapshot,
    settings: &'a FanInSettings,
    overrides: BTreeMap<Fingerprint, Revision>,
}

impl<'a> Resolver<'a> {
    pub fn new(
        graph: &'a FanInGraph,
        snapshot: &'a dyn TimelineSnapshot,
        settings: &'a FanInSettings,
    ) -> Self {
        Self {
            graph,
            snapshot,
            settings,
            overrides: BTreeMap::new(),
        }
    }

    /// Pin materials before the search. Pinned values are never backtracked.
    pub fn with_overrides(mut self, overrides: BTreeMap<Fingerprint, Revision>) -> Self {
        self.overrides = overrides;
        self
    }

    /// Run the search, keeping the trace and stats alongside the outcome.
    pub fn run(self) -> ResolutionAttempt {
        let mut search = Search::new(self.graph, self.snapshot, self.settings);
        let outcome = search.solve(&self.overrides);
        search.stats.elapsed_ms = search.started.elapsed().as_millis() as u64;
        ResolutionAttempt {
            target: self.graph.target().clone(),
            snapshot_version: self.snapshot.version(),
            outcome,
            trace: search.trace,
            stats: search.stats,
        }
    }

    /// Run the search and keep only the outcome.
    pub fn resolve(self) -> FanInResult<Resolution> {
        self.run().outcome
    }
}

// ---------------------------------------------------------------------------
// Search state
// ---------------------------------------------------------------------------

/// What one call to [`Search::step`] did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum SearchStep {
    Accepted,
    Rejected,
    Forced,
    Exhausted,
    Backtracked,
    Solved,
}

/// Position within the current choice point.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Cursor {
    /// Not yet visited.
    Fresh,
    /// Next candidate to evaluate.
    At(usize),
    /// No candidates left; next step backtracks.
    Exhausted,
}

struct Choice<'a> {
    node: &'a FanInNode,
    label: String,
    candidates: CandidateList<'a>,
}

/// A committed choice and the assignments it introduced.
struct Frame {
    choice: usize,
    /// `None` for forced choice points.
    candidate: Option<usize>,
    undo: Vec<Fingerprint>,
}

#[derive(Debug, Clone)]
struct Assignment {
    revision: Revision,
    origin: Origin,
}

struct Implied {
    fingerprint: Fingerprint,
    revision: Revision,
    by: Revision,
}

/// Everything an instance's build cause implies, transitively.
struct Expansion {
    implied: Vec<Implied>,
}

pub(crate) struct Search<'a> {
    graph: &'a FanInGraph,
    snapshot: &'a dyn TimelineSnapshot,
    settings: &'a FanInSettings,
    choices: Vec<Choice<'a>>,
    assigned: HashMap<Fingerprint, Assignment>,
    frames: Vec<Frame>,
    cursor: Cursor,
    expansions: HashMap<Revision, Rc<Expansion>>,
    conflicts: Vec<Conflict>,
    conflicted: HashSet<Fingerprint>,
    last_combination: Vec<Revision>,
    trace: SearchTrace,
    stats: SearchStats,
    started: Instant,
}

impl<'a> Search<'a> {
    pub(crate) fn new(
        graph: &'a FanInGraph,
        snapshot: &'a dyn TimelineSnapshot,
        settings: &'a FanInSettings,
    ) -> Self {
        Self {
            graph,
            snapshot,
            settings,
            choices: Vec::new(),
            assigned: HashMap::new(),
            frames: Vec::new(),
            cursor: Cursor::Fresh,
            expansions: HashMap::new(),
            conflicts: Vec::new(),
            conflicted: HashSet::new(),
            last_combination: Vec::new(),
            trace: SearchTrace::new(),
            stats: SearchStats::default(),
            started: Instant::now(),
        }
    }

    pub(crate) fn solve(
        &mut self,
        overrides: &BTreeMap<Fingerprint, Revision>,
    ) -> FanInResult<Resolution> {
        self.settings.validate()?;
        if !self.settings.enforce_upstream {
            return self.solve_unchecked(overrides);
        }
        self.seed(overrides)?;
        self.prepare()?;
        while self.step()? != SearchStep::Solved {}
        self.finish()
    }

    /// The graph node an override pins, if the override is admissible.
    ///
    /// A dependency may only be pinned to a recorded instance of its
    /// upstream pipeline whose stage passed.
    fn check_override(&self, fingerprint: &Fingerprint, revision: &Revision) -> FanInResult<&'a FanInNode> {
        let graph: &'a FanInGraph = self.graph;
        let node = graph
            .node(fingerprint)
            .ok_or_else(|| FanInError::UnknownMaterial {
                fingerprint: fingerprint.clone(),
            })?;
        let fits = match (node.material.upstream(), revision.as_pipeline()) {
            (Some((upstream, stage)), Some((pipeline, counter))) => {
                upstream == pipeline
                    && self
                        .snapshot
                        .instance(pipeline, counter)
                        .is_some_and(|instance| instance.stage_passed(stage))
            }
            (None, None) => true,
            _ => false,
        };
        if !fits {
            return Err(FanInError::InvalidOverride {
                material: node.material.describe(),
                revision: revision.clone(),
            });
        }
        Ok(node)
    }

    fn seed(&mut self, overrides: &BTreeMap<Fingerprint, Revision>) -> FanInResult<()> {
        for (fingerprint, revision) in overrides {
            let node = self.check_override(fingerprint, revision)?;
            if let Err(conflicts) = self.try_apply(fingerprint, revision, Origin::Override)? {
                self.record_conflicts(&conflicts);
                return Err(FanInError::NoConsistentAssignment {
                    conflicts: self.conflicts.clone(),
                    last_combination: overrides.values().cloned().collect(),
                });
            }
            self.trace.push(TraceEvent::Seeded {
                material: node.material.display_name(),
                revision: revision.clone(),
            });
        }
        Ok(())
    }

    /// Upstream agreement is not enforced: every dependency takes its newest
    /// passed instance and scm leaves their latest seen revision.
    fn solve_unchecked(&mut self, overrides: &BTreeMap<Fingerprint, Revision>) -> FanInResult<Resolution> {
        for (fingerprint, revision) in overrides {
            let node = self.check_override(fingerprint, revision)?;
            self.assigned.insert(
                fingerprint.clone(),
                Assignment {
                    revision: revision.clone(),
                    origin: Origin::Override,
                },
            );
            self.trace.push(TraceEvent::Seeded {
                material: node.material.display_name(),
                revision: revision.clone(),
            });
        }

        let graph = self.graph;
        let enumerator = CandidateEnumerator::new(self.snapshot, self.settings.max_candidates_per_edge);
        let mut chosen = Vec::new();
        for (choice, node) in graph.dependency_nodes_in_search_order().into_iter().enumerate() {
            if let Some(existing) = self.assigned.get(&node.fingerprint) {
                chosen.push(existing.revision.clone());
                continue;
            }
            self.charge_step()?;
            let revision = enumerator
                .candidates(node)
                .newest()
                .map(|candidate| candidate.revision())
                .ok_or_else(|| FanInError::NoViableRevision {
                    fingerprint: node.fingerprint.clone(),
                    material: node.material.describe(),
                    upstream: node.material.upstream().map(|(p, _)| p.clone()),
                })?;
            self.trace.push(TraceEvent::Accepted {
                choice,
                material: node.material.display_name(),
                candidate: revision.clone(),
                newly_assigned: 1,
            });
            self.assigned.insert(
                node.fingerprint.clone(),
                Assignment {
                    revision: revision.clone(),
                    origin: Origin::Chosen,
                },
            );
            chosen.push(revision);
        }

        // Leaves with no recorded history fall back to the first chosen
        // instance that built with them.
        for node in graph.nodes() {
            if node.material.is_dependency()
                || self.assigned.contains_key(&node.fingerprint)
                || self.snapshot.latest_scm_revision(&node.fingerprint).is_some()
            {
                continue;
            }
            let used = chosen.iter().find_map(|by| {
                let (pipeline, counter) = by.as_pipeline()?;
                let instance = self.snapshot.instance(pipeline, counter)?;
                instance
                    .build_cause
                    .get(&node.fingerprint)
                    .map(|revision| (revision.clone(), by.clone()))
            });
            if let Some((revision, by)) = used {
                self.assigned.insert(
                    node.fingerprint.clone(),
                    Assignment {
                        revision,
                        origin: Origin::Implied { by },
                    },
                );
            }
        }
        self.finish()
    }

    /// Enumerate candidates for every choice point.
    fn prepare(&mut self) -> FanInResult<()> {
        let graph = self.graph;
        let enumerator = CandidateEnumerator::new(self.snapshot, self.settings.max_candidates_per_edge);
        for node in graph.dependency_nodes_in_search_order() {
            let candidates = enumerator.candidates(node);
            if candidates.is_empty() && !self.assigned.contains_key(&node.fingerprint) {
                return Err(FanInError::NoViableRevision {
                    fingerprint: node.fingerprint.clone(),
                    material: node.material.describe(),
                    upstream: node.material.upstream().map(|(p, _)| p.clone()),
                });
            }
            if candidates.truncated {
                debug!(
                    material = %node.material.describe(),
                    available = candidates.available,
                    horizon = enumerator.horizon(),
                    "Candidate list truncated at horizon"
                );
            }
            self.choices.push(Choice {
                node,
                label: node.material.display_name(),
                candidates,
            });
        }
        Ok(())
    }

    pub(crate) fn step(&mut self) -> FanInResult<SearchStep> {
        let depth = self.frames.len();
        if depth == self.choices.len() {
            return Ok(SearchStep::Solved);
        }

        let next = match self.cursor {
            Cursor::Exhausted => return self.backtrack(),
            Cursor::At(k) => k,
            Cursor::Fresh => {
                let fingerprint = &self.choices[depth].node.fingerprint;
                if let Some(existing) = self.assigned.get(fingerprint) {
                    self.trace.push(TraceEvent::Forced {
                        choice: depth,
                        material: self.choices[depth].label.clone(),
                        revision: existing.revision.clone(),
                    });
                    debug!(choice = depth, revision = %existing.revision, "Forced choice point");
                    self.frames.push(Frame {
                        choice: depth,
                        candidate: None,
                        undo: Vec::new(),
                    });
                    return Ok(SearchStep::Forced);
                }
                0
            }
        };

        let Some(candidate) = self.choices[depth].candidates.get(next) else {
            self.trace.push(TraceEvent::Exhausted {
                choice: depth,
                material: self.choices[depth].label.clone(),
            });
            self.cursor = Cursor::Exhausted;
            return Ok(SearchStep::Exhausted);
        };

        self.charge_step()?;
        let revision = candidate.revision();
        self.last_combination = self.current_combination();
        self.last_combination.push(revision.clone());

        let fingerprint = self.choices[depth].node.fingerprint.clone();
        match self.try_apply(&fingerprint, &revision, Origin::Chosen)? {
            Ok(undo) => {
                debug!(choice = depth, candidate = %revision, assigned = undo.len(), "Accepted candidate");
                self.trace.push(TraceEvent::Accepted {
                    choice: depth,
                    material: self.choices[depth].label.clone(),
                    candidate: revision,
                    newly_assigned: undo.len(),
                });
                self.frames.push(Frame {
                    choice: depth,
                    candidate: Some(next),
                    undo,
                });
                self.cursor = Cursor::Fresh;
                Ok(SearchStep::Accepted)
            }
            Err(conflicts) => {
                debug!(choice = depth, candidate = %revision, conflicts = conflicts.len(), "Rejected candidate");
                self.record_conflicts(&conflicts);
                self.trace.push(TraceEvent::Rejected {
                    choice: depth,
                    material: self.choices[depth].label.clone(),
                    candidate: revision,
                    conflicts,
                });
                self.cursor = Cursor::At(next + 1);
                Ok(SearchStep::Rejected)
            }
        }
    }

    fn backtrack(&mut self) -> FanInResult<SearchStep> {
        let Some(frame) = self.frames.pop() else {
            return Err(FanInError::NoConsistentAssignment {
                conflicts: self.conflicts.clone(),
                last_combination: self.last_combination.clone(),
            });
        };
        for fingerprint in &frame.undo {
            self.assigned.remove(fingerprint);
        }
        self.stats.backtracks += 1;

        let choice = &self.choices[frame.choice];
        let undone = frame
            .candidate
            .and_then(|k| choice.candidates.get(k))
            .map(|c| c.revision());
        debug!(choice = frame.choice, undone = ?undone, "Backtracked");
        self.trace.push(TraceEvent::Backtracked {
            choice: frame.choice,
            material: choice.label.clone(),
            undone,
        });
        self.cursor = match frame.candidate {
            Some(k) => Cursor::At(k + 1),
            None => Cursor::Exhausted,
        };
        Ok(SearchStep::Backtracked)
    }

    fn charge_step(&mut self) -> FanInResult<()> {
        let elapsed_ms = self.started.elapsed().as_millis() as u64;
        let limit = if self.stats.steps >= self.settings.max_steps {
            Some(BudgetLimit::Steps(self.settings.max_steps))
        } else {
            self.settings
                .max_duration_ms
                .filter(|&max| elapsed_ms >= max)
                .map(BudgetLimit::DurationMs)
        };
        if let Some(limit) = limit {
            return Err(FanInError::SearchBudgetExceeded {
                steps: self.stats.steps,
                elapsed_ms,
                limit,
            });
        }
        self.stats.steps += 1;
        Ok(())
    }

    fn current_combination(&self) -> Vec<Revision> {
        self.frames
            .iter()
            .filter_map(|frame| {
                let fingerprint = &self.choices[frame.choice].node.fingerprint;
                self.assigned.get(fingerprint).map(|a| a.revision.clone())
            })
            .collect()
    }

    /// Check `revision` for `fingerprint` and everything it implies against
    /// the current assignments. Commits and returns the newly assigned
    /// fingerprints, or returns the conflicts without changing anything.
    fn try_apply(
        &mut self,
        fingerprint: &Fingerprint,
        revision: &Revision,
        origin: Origin,
    ) -> FanInResult<Result<Vec<Fingerprint>, Vec<Conflict>>> {
        let mut proposals = vec![(fingerprint.clone(), revision.clone(), origin, revision.clone())];
        if revision.as_pipeline().is_some() {
            let expansion = self.expand(revision)?;
            proposals.extend(expansion.implied.iter().map(|i| {
                (
                    i.fingerprint.clone(),
                    i.revision.clone(),
                    Origin::Implied { by: i.by.clone() },
                    i.by.clone(),
                )
            }));
        }

        let mut pending: Vec<(Fingerprint, Assignment)> = Vec::new();
        let mut conflicts = Vec::new();
        for (fp, proposed, origin, proposed_by) in proposals {
            let existing = self
                .assigned
                .get(&fp)
                .or_else(|| pending.iter().find(|(p, _)| p == &fp).map(|(_, a)| a));
            match existing {
                Some(current) if current.revision != proposed => {
                    conflicts.push(Conflict {
                        material: self.describe(&fp),
                        fingerprint: fp,
                        assigned: current.revision.clone(),
                        assigned_by: current.origin.clone(),
                        proposed,
                        proposed_by,
                    });
                }
                Some(_) => {}
                None => pending.push((
                    fp,
                    Assignment {
                        revision: proposed,
                        origin,
                    },
                )),
            }
        }

        if !conflicts.is_empty() {
            return Ok(Err(conflicts));
        }
        let mut undo = Vec::with_capacity(pending.len());
        for (fp, assignment) in pending {
            undo.push(fp.clone());
            self.assigned.insert(fp, assignment);
        }
        Ok(Ok(undo))
    }

    /// Transitive build-cause closure of a pipeline instance, memoised.
    fn expand(&mut self, root: &Revision) -> FanInResult<Rc<Expansion>> {
        if let Some(expansion) = self.expansions.get(root) {
            return Ok(Rc::clone(expansion));
        }

        let mut implied = Vec::new();
        let mut seen: HashSet<(Fingerprint, Revision)> = HashSet::new();
        let mut visited: HashSet<Revision> = HashSet::from([root.clone()]);
        let mut worklist = vec![root.clone()];
        while let Some(current) = worklist.pop() {
            let Some((pipeline, counter)) = current.as_pipeline() else {
                continue;
            };
            let instance = self.snapshot.instance(pipeline, counter).ok_or_else(|| {
                FanInError::TimelineInconsistency {
                    pipeline: pipeline.clone(),
                    counter,
                }
            })?;
            for (fp, revision) in instance.build_cause.iter() {
                if !self.graph.contains(fp) {
                    continue;
                }
                if seen.insert((fp.clone(), revision.clone())) {
                    implied.push(Implied {
                        fingerprint: fp.clone(),
                        revision: revision.clone(),
                        by: current.clone(),
                    });
                }
                if revision.as_pipeline().is_some() && visited.insert(revision.clone()) {
                    worklist.push(revision.clone());
                }
            }
        }

        let expansion = Rc::new(Expansion { implied });
        self.expansions.insert(root.clone(), Rc::clone(&expansion));
        Ok(expansion)
    }

    fn record_conflicts(&mut self, conflicts: &[Conflict]) {
        for conflict in conflicts {
            if self.conflicted.insert(conflict.fingerprint.clone()) {
                self.conflicts.push(conflict.clone());
            }
        }
    }

    fn describe(&self, fingerprint: &Fingerprint) -> String {
        self.graph
            .node(fingerprint)
            .map(|n| n.material.describe())
            .unwrap_or_else(|| fingerprint.short().to_string())
    }

    /// Default unconstrained scm leaves and assemble the resolution.
    fn finish(&mut self) -> FanInResult<Resolution> {
        let graph = self.graph;
        let mut materials = BTreeMap::new();
        for node in graph.nodes() {
            let assignment = match self.assigned.get(&node.fingerprint) {
                Some(assignment) => assignment.clone(),
                None => {
                    let revision = self
                        .snapshot
                        .latest_scm_revision(&node.fingerprint)
                        .cloned()
                        .ok_or_else(|| FanInError::NoViableRevision {
                            fingerprint: node.fingerprint.clone(),
                            material: node.material.describe(),
                            upstream: node.material.upstream().map(|(p, _)| p.clone()),
                        })?;
                    self.trace.push(TraceEvent::DefaultedToLatest {
                        material: node.material.display_name(),
                        revision: revision.clone(),
                    });
                    Assignment {
                        revision,
                        origin: Origin::LatestSeen,
                    }
                }
            };
            materials.insert(
                node.fingerprint.clone(),
                ResolvedMaterial {
                    material: node.material.clone(),
                    names: node.names.clone(),
                    revision: assignment.revision,
                    origin: assignment.origin,
                    direct: graph.direct_materials().contains(&node.fingerprint),
                },
            );
        }

        Ok(Resolution {
            target: self.graph.target().clone(),
            snapshot_version: self.snapshot.version(),
            materials,
        })
    }
}
