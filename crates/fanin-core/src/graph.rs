//! Fan-in graph: material nodes reachable from a target pipeline.
//!
//! The builder walks the configured dependency tree depth-first from the
//! target. A node is created the first time a fingerprint is seen; later
//! encounters through other paths only add consumers, names and edges, which
//! is what produces the convergence points the resolver has to reconcile.
//!
//! Traversal uses an explicit frame stack, so stack depth does not grow with
//! configuration depth. A dependency on a pipeline that is still on the path
//! is a cycle and aborts the build before any search runs.

use std::collections::{BTreeSet, HashMap, HashSet};

use fanin_state::{Fingerprint, PipelineName};
use serde::Serialize;
use tracing::debug;

use crate::config::PipelineConfigs;
use crate::error::{FanInError, FanInResult};
use crate::material::{FingerprintRegistry, MaterialConfig};

/// One unique material reachable from the target.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FanInNode {
    pub fingerprint: Fingerprint,
    /// Material as first declared.
    pub material: MaterialConfig,
    /// Every display name this material was declared under.
    pub names: BTreeSet<String>,
    /// Pipelines declaring this material, in discovery order.
    pub consumers: Vec<PipelineName>,
}

impl FanInNode {
    /// Reached through more than one consumer.
    pub fn is_fan_in(&self) -> bool {
        self.consumers.len() > 1
    }
}

/// A dependency declaration: `consumer` depends on `upstream`'s `stage`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct FanInEdge {
    pub consumer: PipelineName,
    pub upstream: PipelineName,
    pub stage: String,
    pub fingerprint: Fingerprint,
}

/// Materials and dependency edges reachable from one target pipeline.
#[derive(Debug, Clone, Serialize)]
pub struct FanInGraph {
    target: PipelineName,
    nodes: Vec<FanInNode>,
    #[serde(skip)]
    index: HashMap<Fingerprint, usize>,
    edges: Vec<FanInEdge>,
    direct: Vec<Fingerprint>,
    /// Pipelines ordered consumers-first (target at 0).
    pipelines: Vec<PipelineName>,
    /// Longest dependency distance from the target.
    #[serde(skip)]
    levels: HashMap<PipelineName, usize>,
}

impl FanInGraph {
    pub fn target(&self) -> &PipelineName {
        &self.target
    }

    /// All nodes in discovery order.
    pub fn nodes(&self) -> &[FanInNode] {
        &self.nodes
    }

    pub fn node(&self, fingerprint: &Fingerprint) -> Option<&FanInNode> {
        self.index.get(fingerprint).map(|&i| &self.nodes[i])
    }

    pub fn contains(&self, fingerprint: &Fingerprint) -> bool {
        self.index.contains_key(fingerprint)
    }

    pub fn edges(&self) -> &[FanInEdge] {
        &self.edges
    }

    /// Edges pointing at `fingerprint`.
    pub fn edges_into<'g>(&'g self, fingerprint: &'g Fingerprint) -> impl Iterator<Item = &'g FanInEdge> {
        self.edges.iter().filter(move |e| &e.fingerprint == fingerprint)
    }

    /// Fingerprints declared directly on the target, in declaration order.
    pub fn direct_materials(&self) -> &[Fingerprint] {
        &self.direct
    }

    /// Pipelines in the graph, consumers before their upstreams.
    pub fn pipelines_downstream_first(&self) -> &[PipelineName] {
        &self.pipelines
    }

    /// Longest dependency distance of `pipeline` from the target.
    pub fn level(&self, pipeline: &PipelineName) -> Option<usize> {
        self.levels.get(pipeline).copied()
    }

    /// Dependency nodes in the order the resolver fixes them.
    ///
    /// Sorted by the level of the upstream pipeline (closest to the target
    /// first, and always before anything it consumes), then discovery order.
    pub fn dependency_nodes_in_search_order(&self) -> Vec<&FanInNode> {
        let mut deps: Vec<(usize, usize, &FanInNode)> = self
            .nodes
            .iter()
            .enumerate()
            .filter_map(|(i, node)| {
                let (upstream, _) = node.material.upstream()?;
                let level = self.levels.get(upstream).copied().unwrap_or(usize::MAX);
                Some((level, i, node))
            })
            .collect();
        deps.sort_by_key(|&(level, i, _)| (level, i));
        deps.into_iter().map(|(_, _, node)| node).collect()
    }

    /// Nodes reached through more than one consumer.
    pub fn fan_in_points(&self) -> impl Iterator<Item = &FanInNode> {
        self.nodes.iter().filter(|n| n.is_fan_in())
    }

    fn attach(&mut self, consumer: &PipelineName, material: &MaterialConfig, fingerprint: Fingerprint) {
        let idx = match self.index.get(&fingerprint) {
            Some(&idx) => idx,
            None => {
                self.nodes.push(FanInNode {
                    fingerprint: fingerprint.clone(),
                    material: material.clone(),
                    names: BTreeSet::new(),
                    consumers: Vec::new(),
                });
                self.index.insert(fingerprint.clone(), self.nodes.len() - 1);
                self.nodes.len() - 1
            }
        };

        let node = &mut self.nodes[idx];
        node.names.insert(material.display_name());
        if !node.consumers.contains(consumer) {
            node.consumers.push(consumer.clone());
        }

        if let Some((upstream, stage)) = material.upstream() {
            let edge = FanInEdge {
                consumer: consumer.clone(),
                upstream: upstream.clone(),
                stage: stage.to_string(),
                fingerprint: fingerprint.clone(),
            };
            if !self.edges.contains(&edge) {
                self.edges.push(edge);
            }
        }

        if consumer == &self.target && !self.direct.contains(&fingerprint) {
            self.direct.push(fingerprint);
        }
    }
}

/// Builds [`FanInGraph`]s against an explicit configuration set.
pub struct GraphBuilder<'c> {
    configs: &'c PipelineConfigs,
}

struct Frame {
    pipeline: PipelineName,
    next: usize,
}

impl<'c> GraphBuilder<'c> {
    pub fn new(configs: &'c PipelineConfigs) -> Self {
        Self { configs }
    }

    /// Expand `target`'s materials into a fan-in graph.
    ///
    /// Returns [`FanInError::CyclicDependency`] listing the cycle if a
    /// pipeline transitively depends on itself, and
    /// [`FanInError::UnknownPipeline`] / [`FanInError::UnknownStage`] for
    /// dangling references.
    pub fn build(&self, target: &PipelineName) -> FanInResult<FanInGraph> {
        if self.configs.get(target).is_none() {
            return Err(FanInError::UnknownPipeline {
                pipeline: target.clone(),
                referenced_by: None,
            });
        }

        let mut graph = FanInGraph {
            target: target.clone(),
            nodes: Vec::new(),
            index: HashMap::new(),
            edges: Vec::new(),
            direct: Vec::new(),
            pipelines: Vec::new(),
            levels: HashMap::new(),
        };
        let mut registry = FingerprintRegistry::new();
        let mut expanded: HashSet<PipelineName> = HashSet::from([target.clone()]);
        let mut post_order: Vec<PipelineName> = Vec::new();
        let mut stack = vec![Frame {
            pipeline: target.clone(),
            next: 0,
        }];

        while let Some(frame) = stack.last_mut() {
            let config = self
                .configs
                .get(&frame.pipeline)
                .ok_or_else(|| FanInError::UnknownPipeline {
                    pipeline: frame.pipeline.clone(),
                    referenced_by: None,
                })?;

            let Some(material) = config.materials.get(frame.next) else {
                post_order.push(frame.pipeline.clone());
                stack.pop();
                continue;
            };
            frame.next += 1;
            let consumer = frame.pipeline.clone();

            let fingerprint = registry.register(material)?;
            graph.attach(&consumer, material, fingerprint);

            let Some((upstream, stage)) = material.upstream() else {
                continue;
            };

            if let Some(start) = stack.iter().position(|f| &f.pipeline == upstream) {
                let mut cycle: Vec<PipelineName> =
                    stack[start..].iter().map(|f| f.pipeline.clone()).collect();
                cycle.push(upstream.clone());
                return Err(FanInError::CyclicDependency { cycle });
            }

            let upstream_config =
                self.configs
                    .get(upstream)
                    .ok_or_else(|| FanInError::UnknownPipeline {
                        pipeline: upstream.clone(),
                        referenced_by: Some(consumer.clone()),
                    })?;
            if !upstream_config.has_stage(stage) {
                return Err(FanInError::UnknownStage {
                    pipeline: upstream.clone(),
                    stage: stage.to_string(),
                    referenced_by: consumer,
                });
            }

            if expanded.insert(upstream.clone()) {
                stack.push(Frame {
                    pipeline: upstream.clone(),
                    next: 0,
                });
            }
        }

        // Reverse post-order is a topological order with consumers first.
        post_order.reverse();
        let mut levels: HashMap<PipelineName, usize> = HashMap::from([(target.clone(), 0)]);
        for pipeline in &post_order {
            let level = levels.get(pipeline).copied().unwrap_or(0);
            let Some(config) = self.configs.get(pipeline) else {
                continue;
            };
            for (upstream, _) in config.materials.iter().filter_map(MaterialConfig::upstream) {
                let entry = levels.entry(upstream.clone()).or_insert(0);
                *entry = (*entry).max(level + 1);
            }
        }

        let mut pipelines = post_order;
        let topo_position: HashMap<PipelineName, usize> = pipelines
            .iter()
            .enumerate()
            .map(|(i, p)| (p.clone(), i))
            .collect();
        pipelines.sort_by_key(|p| (levels.get(p).copied().unwrap_or(0), topo_position[p]));

        graph.pipelines = pipelines;
        graph.levels = levels;

        debug!(
            target = %target,
            nodes = graph.nodes.len(),
            edges = graph.edges.len(),
            fan_in_points = graph.fan_in_points().count(),
            "Built fan-in graph"
        );
        Ok(graph)
    }
}
