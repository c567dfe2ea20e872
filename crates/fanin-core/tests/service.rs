//! Trigger and diagnostic paths through `FanInService`.

use std::sync::Arc;

use fanin_core::{
    FanInError, FanInService, FanInSettings, MaterialConfig, PipelineConfig, PipelineConfigs,
    ReportStatus, Revision, TraceEvent, TriggerRequest,
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

fn configs() -> PipelineConfigs {
    PipelineConfigs::new()
        .with(pipeline("A", vec![git("m")]))
        .with(pipeline("B", vec![git("m")]))
        .with(pipeline("T", vec![dep("A"), dep("B")]))
        .with(pipeline("X", vec![dep("Y")]))
        .with(pipeline("Y", vec![dep("X")]))
        .with(pipeline("cyclic", vec![dep("X")]))
}

async fn passed(store: &MemoryTimelineStore, name: &str, cause: BuildCause) -> Revision {
    store
        .append_instance(NewInstance::new(name, cause).stage(StageRun::passed("build")))
        .await
        .expect("append")
        .revision()
}

fn m(rev: &str) -> BuildCause {
    BuildCause::new().with(git("m").fingerprint(), Revision::scm(rev))
}

fn service_with(store: Arc<MemoryTimelineStore>) -> FanInService {
    FanInService::new(Arc::new(configs()), store, FanInSettings::default())
}

#[tokio::test]
async fn trigger_for_never_run_pipeline_always_fires() {
    let store = Arc::new(MemoryTimelineStore::new());
    passed(&store, "A", m("rev5")).await;
    passed(&store, "B", m("rev5")).await;
    let service = service_with(Arc::clone(&store));

    let outcome = service.trigger(TriggerRequest::new("T")).await.unwrap();
    assert!(outcome.decision.should_trigger);
    assert_eq!(outcome.decision.changed.len(), 2);
    assert_eq!(outcome.resolution.len(), 3);
}

#[tokio::test]
async fn trigger_compares_with_latest_target_run() {
    let store = Arc::new(MemoryTimelineStore::new());
    let a1 = passed(&store, "A", m("rev5")).await;
    let b1 = passed(&store, "B", m("rev5")).await;
    let service = service_with(Arc::clone(&store));

    // T already ran with exactly these revisions.
    let cause = BuildCause::new()
        .with(dep("A").fingerprint(), a1)
        .with(dep("B").fingerprint(), b1);
    passed(&store, "T", cause).await;
    let outcome = service.trigger(TriggerRequest::new("T")).await.unwrap();
    assert!(!outcome.decision.should_trigger);
    assert!(outcome.decision.changed.is_empty());

    // Both upstreams move to a new shared revision.
    passed(&store, "A", m("rev6")).await;
    passed(&store, "B", m("rev6")).await;
    let outcome = service.trigger(TriggerRequest::new("T")).await.unwrap();
    assert!(outcome.decision.should_trigger);
    assert_eq!(
        outcome.decision.changed,
        {
            let mut expected = vec![dep("A").fingerprint(), dep("B").fingerprint()];
            expected.sort();
            expected
        }
    );
}

#[tokio::test]
async fn trigger_applies_overrides() {
    let store = Arc::new(MemoryTimelineStore::new());
    passed(&store, "A", m("rev5")).await;
    passed(&store, "A", m("rev6")).await;
    passed(&store, "B", m("rev5")).await;
    passed(&store, "B", m("rev6")).await;
    let service = service_with(Arc::clone(&store));

    let request = TriggerRequest::new("T").pin(git("m").fingerprint(), Revision::scm("rev5"));
    let outcome = service.trigger(request).await.unwrap();
    assert_eq!(
        outcome.resolution.named("A").unwrap().revision,
        Revision::pipeline("A", 1)
    );
}

#[tokio::test]
async fn trigger_surfaces_resolution_failure() {
    let store = Arc::new(MemoryTimelineStore::new());
    passed(&store, "A", m("rev6")).await;
    passed(&store, "B", m("rev5")).await;
    let service = service_with(Arc::clone(&store));

    let err = service.trigger(TriggerRequest::new("T")).await.unwrap_err();
    assert!(matches!(err, FanInError::NoConsistentAssignment { .. }));
}

#[tokio::test]
async fn revisions_are_idempotent_without_new_history() {
    let store = Arc::new(MemoryTimelineStore::new());
    passed(&store, "A", m("rev5")).await;
    passed(&store, "B", m("rev5")).await;
    let service = service_with(Arc::clone(&store));

    let first = service.revisions(&"T".into()).await.unwrap();
    let second = service.revisions(&"T".into()).await.unwrap();
    assert_eq!(first, second);
    assert_eq!(first.get(&git("m").fingerprint()), Some(&Revision::scm("rev5")));
}

#[tokio::test]
async fn trace_reports_failures_inside_the_report() {
    let store = Arc::new(MemoryTimelineStore::new());
    passed(&store, "A", m("rev6")).await;
    passed(&store, "B", m("rev5")).await;
    let service = service_with(Arc::clone(&store));

    let report = service.trace(&"T".into()).await.unwrap();
    assert!(!report.is_resolved());
    assert_eq!(report.conflicts.len(), 1);
    assert!(report.render_compact().contains("rev6"));
    assert!(report.render_verbose().contains("## Search Steps"));

    let report = service.trace(&"cyclic".into()).await.unwrap();
    assert!(matches!(
        report.status,
        ReportStatus::Failed { ref error_kind, .. } if error_kind == "cyclic_dependency"
    ));
    assert!(report.steps.is_empty());
}

#[tokio::test]
async fn trace_returns_configuration_errors() {
    let service = service_with(Arc::new(MemoryTimelineStore::new()));
    let err = service.trace(&"missing".into()).await.unwrap_err();
    assert!(matches!(err, FanInError::UnknownPipeline { .. }));
}

#[tokio::test]
async fn debug_pages_through_steps() {
    let store = Arc::new(MemoryTimelineStore::new());
    passed(&store, "A", m("rev5")).await;
    passed(&store, "A", m("rev6")).await;
    passed(&store, "B", m("rev5")).await;
    let service = service_with(Arc::clone(&store));

    let all = service.debug(&"T".into(), 0, usize::MAX).await.unwrap();
    assert_eq!(all.len(), 6);
    assert!(matches!(all[0].event, TraceEvent::Accepted { .. }));
    assert!(matches!(all[3].event, TraceEvent::Backtracked { .. }));

    let page = service.debug(&"T".into(), 2, 2).await.unwrap();
    assert_eq!(page.len(), 2);
    assert_eq!(page[0].index, 3);
    assert!(service.debug(&"T".into(), 10, 5).await.unwrap().is_empty());
}

#[tokio::test]
async fn concurrent_triggers_agree() {
    let store = Arc::new(MemoryTimelineStore::new());
    passed(&store, "A", m("rev5")).await;
    passed(&store, "A", m("rev6")).await;
    passed(&store, "B", m("rev5")).await;
    let service = Arc::new(service_with(Arc::clone(&store)));

    let handles: Vec<_> = (0..6)
        .map(|_| {
            let service = Arc::clone(&service);
            tokio::spawn(async move { service.revisions(&"T".into()).await.unwrap() })
        })
        .collect();
    let results: Vec<_> = futures::future::join_all(handles)
        .await
        .into_iter()
        .map(|r| r.unwrap())
        .collect();
    assert!(results.windows(2).all(|w| w[0] == w[1]));
}
