//! End-to-end resolution scenarios over an in-memory timeline.
//!
//! Covers:
//! - Simple diamond where the latest runs already agree
//! - Backtracking to an older upstream run
//! - Missing passed upstream run
//! - No consistent combination at all
//! - Configuration cycles
//! - Deeper topologies: shared upstreams, failed runs, two fan-in points

use fanin_core::{
    FanInError, FanInGraph, FanInSettings, GraphBuilder, MaterialConfig, Origin, PipelineConfig,
    PipelineConfigs, Resolution, Resolver, Revision,
};
use fanin_state::fakes::MemoryTimelineStore;
use fanin_state::{BuildCause, NewInstance, StageRun, TimelineStore};

fn git(name: &str) -> MaterialConfig {
    MaterialConfig::git(format!("https://example.com/{name}.git")).named(name)
}

fn dep(pipeline: &str) -> MaterialConfig {
    MaterialConfig::dependency(pipeline, "build")
}

fn pipeline(name: &str, materials: Vec<MaterialConfig>) -> PipelineConfig {
    let mut config = PipelineConfig::new(name).stage("build");
    config.materials = materials;
    config
}

fn cause(entries: &[(&MaterialConfig, Revision)]) -> BuildCause {
    entries
        .iter()
        .map(|(m, r)| (m.fingerprint(), r.clone()))
        .collect()
}

async fn passed(store: &MemoryTimelineStore, name: &str, entries: &[(&MaterialConfig, Revision)]) -> Revision {
    store
        .append_instance(NewInstance::new(name, cause(entries)).stage(StageRun::passed("build")))
        .await
        .expect("append")
        .revision()
}

async fn failed(store: &MemoryTimelineStore, name: &str, entries: &[(&MaterialConfig, Revision)]) -> Revision {
    store
        .append_instance(NewInstance::new(name, cause(entries)).stage(StageRun::failed("build")))
        .await
        .expect("append")
        .revision()
}

fn graph(configs: &PipelineConfigs, target: &str) -> FanInGraph {
    GraphBuilder::new(configs).build(&target.into()).expect("graph")
}

async fn resolve(configs: &PipelineConfigs, store: &MemoryTimelineStore, target: &str) -> Result<Resolution, FanInError> {
    let graph = graph(configs, target);
    let snapshot = store.snapshot().await.expect("snapshot");
    let settings = FanInSettings::default();
    Resolver::new(&graph, snapshot.as_ref(), &settings).resolve()
}

fn rev(resolution: &Resolution, material: &MaterialConfig) -> Revision {
    resolution
        .revision(&material.fingerprint())
        .cloned()
        .expect("material resolved")
}

/// M -> A -> T, M -> B -> T
fn diamond() -> PipelineConfigs {
    PipelineConfigs::new()
        .with(pipeline("A", vec![git("m")]))
        .with(pipeline("B", vec![git("m")]))
        .with(pipeline("T", vec![dep("A"), dep("B")]))
}

// ---- Scenario A: latest runs agree ----

#[tokio::test]
async fn latest_runs_agreeing_are_chosen() {
    let store = MemoryTimelineStore::new();
    let m = git("m");
    passed(&store, "A", &[(&m, Revision::scm("rev4"))]).await;
    let a2 = passed(&store, "A", &[(&m, Revision::scm("rev5"))]).await;
    passed(&store, "B", &[(&m, Revision::scm("rev3"))]).await;
    let b2 = passed(&store, "B", &[(&m, Revision::scm("rev5"))]).await;

    let resolution = resolve(&diamond(), &store, "T").await.unwrap();
    assert_eq!(resolution.len(), 3);
    assert_eq!(rev(&resolution, &m), Revision::scm("rev5"));
    assert_eq!(rev(&resolution, &dep("A")), a2);
    assert_eq!(rev(&resolution, &dep("B")), b2);
}

// ---- Scenario B: backtrack the first choice ----

#[tokio::test]
async fn older_upstream_run_is_used_when_latest_disagrees() {
    let store = MemoryTimelineStore::new();
    let m = git("m");
    let a1 = passed(&store, "A", &[(&m, Revision::scm("rev5"))]).await;
    passed(&store, "A", &[(&m, Revision::scm("rev6"))]).await;
    let b1 = passed(&store, "B", &[(&m, Revision::scm("rev5"))]).await;

    let resolution = resolve(&diamond(), &store, "T").await.unwrap();
    assert_eq!(rev(&resolution, &m), Revision::scm("rev5"));
    assert_eq!(rev(&resolution, &dep("A")), a1);
    assert_eq!(rev(&resolution, &dep("B")), b1);
}

// ---- Scenario C: nothing passed upstream ----

#[tokio::test]
async fn upstream_without_passed_run_has_no_viable_revision() {
    let store = MemoryTimelineStore::new();
    let g = git("g");
    failed(&store, "U", &[(&g, Revision::scm("r1"))]).await;
    let configs = PipelineConfigs::new()
        .with(pipeline("U", vec![g.clone()]))
        .with(pipeline("T", vec![dep("U")]));

    let err = resolve(&configs, &store, "T").await.unwrap_err();
    match err {
        FanInError::NoViableRevision {
            upstream, material, ..
        } => {
            assert_eq!(upstream.unwrap().as_str(), "U");
            assert!(material.contains("pipeline U stage build"));
        }
        other => panic!("expected NoViableRevision, got {other:?}"),
    }
}

// ---- Scenario D: no combination agrees ----

#[tokio::test]
async fn disagreeing_history_reports_the_conflict() {
    let store = MemoryTimelineStore::new();
    let m = git("m");
    passed(&store, "A", &[(&m, Revision::scm("rev4"))]).await;
    let a2 = passed(&store, "A", &[(&m, Revision::scm("rev6"))]).await;
    passed(&store, "B", &[(&m, Revision::scm("rev3"))]).await;
    let b2 = passed(&store, "B", &[(&m, Revision::scm("rev5"))]).await;

    let err = resolve(&diamond(), &store, "T").await.unwrap_err();
    match err {
        FanInError::NoConsistentAssignment {
            conflicts,
            last_combination,
        } => {
            assert_eq!(conflicts.len(), 1);
            let conflict = &conflicts[0];
            assert_eq!(conflict.fingerprint, m.fingerprint());
            assert_eq!(conflict.assigned, Revision::scm("rev6"));
            assert_eq!(conflict.assigned_by, Origin::Implied { by: a2 });
            assert_eq!(conflict.proposed, Revision::scm("rev5"));
            assert_eq!(conflict.proposed_by, b2);
            assert_eq!(
                last_combination,
                vec![Revision::pipeline("A", 1), Revision::pipeline("B", 1)]
            );
        }
        other => panic!("expected NoConsistentAssignment, got {other:?}"),
    }
}

// ---- Scenario E: configuration cycle ----

#[test]
fn cycle_is_rejected_before_search() {
    let configs = PipelineConfigs::new()
        .with(pipeline("X", vec![dep("Y")]))
        .with(pipeline("Y", vec![dep("X")]))
        .with(pipeline("T", vec![dep("X")]));
    let err = GraphBuilder::new(&configs).build(&"T".into()).unwrap_err();
    assert_eq!(err.to_string(), "cyclic dependency: X -> Y -> X");
    assert!(err.is_resolution_failure());
}

// ---- Deeper topologies ----

/// g -> build -> acceptance -> regression; build -> regression;
/// acceptance + regression -> staging
fn staging() -> PipelineConfigs {
    PipelineConfigs::new()
        .with(pipeline("build", vec![git("g")]))
        .with(pipeline("acceptance", vec![dep("build")]))
        .with(pipeline("regression", vec![dep("build"), dep("acceptance")]))
        .with(pipeline("staging", vec![dep("acceptance"), dep("regression")]))
}

#[tokio::test]
async fn shared_upstream_follows_the_run_it_was_consumed_by() {
    let store = MemoryTimelineStore::new();
    let g = git("g");
    let build1 = passed(&store, "build", &[(&g, Revision::scm("r1"))]).await;
    let build2 = passed(&store, "build", &[(&g, Revision::scm("r2"))]).await;
    let acceptance1 = passed(&store, "acceptance", &[(&dep("build"), build1.clone())]).await;
    passed(&store, "acceptance", &[(&dep("build"), build2)]).await;
    let regression1 = passed(
        &store,
        "regression",
        &[(&dep("build"), build1.clone()), (&dep("acceptance"), acceptance1.clone())],
    )
    .await;

    let resolution = resolve(&staging(), &store, "staging").await.unwrap();
    assert_eq!(rev(&resolution, &dep("regression")), regression1);
    assert_eq!(rev(&resolution, &dep("acceptance")), acceptance1);
    assert_eq!(rev(&resolution, &dep("build")), build1);
    assert_eq!(rev(&resolution, &g), Revision::scm("r1"));
    assert_eq!(
        resolution.get(&dep("acceptance").fingerprint()).unwrap().origin,
        Origin::Implied { by: regression1 }
    );
}

#[tokio::test]
async fn failed_runs_are_never_candidates() {
    let store = MemoryTimelineStore::new();
    let g = git("g");
    let p1_1 = passed(&store, "P1", &[(&g, Revision::scm("r1"))]).await;
    let p1_2 = passed(&store, "P1", &[(&g, Revision::scm("r2"))]).await;
    failed(&store, "P1", &[(&g, Revision::scm("r3"))]).await;
    let p2_1 = passed(&store, "P2", &[(&dep("P1"), p1_1.clone())]).await;
    failed(&store, "P2", &[(&dep("P1"), p1_2)]).await;

    let configs = PipelineConfigs::new()
        .with(pipeline("P1", vec![g.clone()]))
        .with(pipeline("P2", vec![dep("P1")]))
        .with(pipeline("T", vec![dep("P2"), dep("P1")]));
    let resolution = resolve(&configs, &store, "T").await.unwrap();
    assert_eq!(rev(&resolution, &dep("P2")), p2_1);
    assert_eq!(rev(&resolution, &dep("P1")), p1_1);
    assert_eq!(rev(&resolution, &g), Revision::scm("r1"));
}

#[tokio::test]
async fn two_fan_in_points_resolve_together() {
    let store = MemoryTimelineStore::new();
    let m = git("m");
    let n = git("n");
    let a1 = passed(&store, "A", &[(&m, Revision::scm("m1")), (&n, Revision::scm("n1"))]).await;
    passed(&store, "A", &[(&m, Revision::scm("m2")), (&n, Revision::scm("n2"))]).await;
    let b1 = passed(&store, "B", &[(&m, Revision::scm("m1"))]).await;
    passed(&store, "B", &[(&m, Revision::scm("m2"))]).await;
    let c1 = passed(&store, "C", &[(&n, Revision::scm("n1"))]).await;

    let configs = PipelineConfigs::new()
        .with(pipeline("A", vec![m.clone(), n.clone()]))
        .with(pipeline("B", vec![m.clone()]))
        .with(pipeline("C", vec![n.clone()]))
        .with(pipeline("T", vec![dep("A"), dep("B"), dep("C")]));
    let graph = graph(&configs, "T");
    assert_eq!(graph.fan_in_points().count(), 2);

    let snapshot = store.snapshot().await.unwrap();
    let settings = FanInSettings::default();
    let attempt = Resolver::new(&graph, snapshot.as_ref(), &settings).run();
    let resolution = attempt.outcome.as_ref().unwrap();
    assert_eq!(rev(resolution, &dep("A")), a1);
    assert_eq!(rev(resolution, &dep("B")), b1);
    assert_eq!(rev(resolution, &dep("C")), c1);
    assert_eq!(rev(resolution, &m), Revision::scm("m1"));
    assert_eq!(rev(resolution, &n), Revision::scm("n1"));
    assert_eq!(attempt.stats.steps, 8);
    assert_eq!(attempt.stats.backtracks, 2);
}

#[tokio::test]
async fn renamed_dependency_resolves_once() {
    let store = MemoryTimelineStore::new();
    let g = git("g");
    let up1 = passed(&store, "up", &[(&g, Revision::scm("r1"))]).await;
    let mid1 = passed(&store, "mid", &[(&dep("up"), up1.clone())]).await;

    let configs = PipelineConfigs::new()
        .with(pipeline("up", vec![g.clone()]))
        .with(pipeline("mid", vec![dep("up").named("up-for-mid")]))
        .with(pipeline("down", vec![dep("mid"), dep("up").named("up-for-down")]));
    let resolution = resolve(&configs, &store, "down").await.unwrap();
    assert_eq!(resolution.len(), 3);
    assert_eq!(rev(&resolution, &dep("mid")), mid1);
    let up = resolution.named("up-for-down").unwrap();
    assert_eq!(up.revision, up1);
    assert!(up.names.contains("up-for-mid"));
}
