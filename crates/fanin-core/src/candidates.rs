//! Candidate revisions per material, newest first.
//!
//! For a dependency material the candidates are the upstream instances whose
//! named stage passed. For an scm material they are the revisions the
//! timeline has seen. Both are capped at the search horizon.

use fanin_state::{PipelineInstance, Revision, TimelineSnapshot};

use crate::graph::FanInNode;

/// One candidate revision of a material.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Candidate<'a> {
    /// Passed upstream instance, carrying its build cause.
    Instance(&'a PipelineInstance),
    Scm(&'a Revision),
}

impl<'a> Candidate<'a> {
    pub fn revision(&self) -> Revision {
        match self {
            Candidate::Instance(instance) => instance.revision(),
            Candidate::Scm(revision) => (*revision).clone(),
        }
    }

    pub fn instance(&self) -> Option<&'a PipelineInstance> {
        match self {
            Candidate::Instance(instance) => Some(instance),
            Candidate::Scm(_) => None,
        }
    }
}

/// Ordered candidates for one material.
#[derive(Debug, Clone, Default)]
pub struct CandidateList<'a> {
    candidates: Vec<Candidate<'a>>,
    /// Candidates that existed before the horizon cut.
    pub available: usize,
    /// True when older candidates were cut by the horizon.
    pub truncated: bool,
}

impl<'a> CandidateList<'a> {
    pub fn get(&self, index: usize) -> Option<Candidate<'a>> {
        self.candidates.get(index).copied()
    }

    pub fn iter(&self) -> impl Iterator<Item = Candidate<'a>> + '_ {
        self.candidates.iter().copied()
    }

    pub fn len(&self) -> usize {
        self.candidates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.candidates.is_empty()
    }

    pub fn newest(&self) -> Option<Candidate<'a>> {
        self.get(0)
    }

    fn from_newest_first(all: impl Iterator<Item = Candidate<'a>>, horizon: usize) -> Self {
        let mut candidates = Vec::new();
        let mut available = 0;
        for candidate in all {
            available += 1;
            if candidates.len() < horizon {
                candidates.push(candidate);
            }
        }
        Self {
            truncated: available > candidates.len(),
            candidates,
            available,
        }
    }
}

/// Reads candidate lists off one timeline snapshot.
pub struct CandidateEnumerator<'a> {
    snapshot: &'a dyn TimelineSnapshot,
    horizon: usize,
}

impl<'a> CandidateEnumerator<'a> {
    pub fn new(snapshot: &'a dyn TimelineSnapshot, horizon: usize) -> Self {
        Self { snapshot, horizon }
    }

    pub fn horizon(&self) -> usize {
        self.horizon
    }

    pub fn candidates(&self, node: &FanInNode) -> CandidateList<'a> {
        let snapshot = self.snapshot;
        match node.material.upstream() {
            Some((pipeline, stage)) => {
                let passed = snapshot
                    .history(pipeline)
                    .iter()
                    .rev()
                    .filter(|instance| instance.stage_passed(stage))
                    .map(Candidate::Instance);
                CandidateList::from_newest_first(passed, self.horizon)
            }
            None => {
                let seen = snapshot
                    .scm_revisions(&node.fingerprint)
                    .iter()
                    .rev()
                    .map(Candidate::Scm);
                CandidateList::from_newest_first(seen, self.horizon)
            }
        }
    }
}
