mod common;

use std::sync::Arc;

use serde_json::json;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use common::{FakeRuntime, collect, registry_with, simple, terraform};
use stratum_core::{ActionType, Spec};
use stratum_engine::{Engine, ExecuteOptions};
use stratum_storage::{LocalStateStorage, StateStorage};

#[tokio::test]
async fn preview_apply_destroy_round_trip_on_disk() {
    let dir = tempfile::tempdir().unwrap();
    let storage = Arc::new(LocalStateStorage::new(dir.path()));
    let runtime = Arc::new(FakeRuntime::new());
    let engine = Engine::new(registry_with(runtime.clone()), storage.clone());
    let opts = ExecuteOptions::new("dev");
    let spec = Spec::new(vec![
        terraform("net", json!({"cidr": "10.0.0.0/16"})),
        simple("vm").depends_on("net"),
    ]);

    // Preview walks the plan but writes nothing.
    let (tx, rx) = mpsc::channel(16);
    let collector = tokio::spawn(collect(rx));
    let preview = engine
        .preview(&spec, &opts, tx, CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(collector.await.unwrap().len(), 4);
    assert_eq!(preview.order.count(ActionType::Create), 2);
    assert_eq!(preview.report.summary.created, 2);
    assert!(runtime.calls().iter().all(|c| c.dry_run));
    assert!(storage.get("dev").await.unwrap().is_empty());

    // Apply the same plan for real.
    let (tx, rx) = mpsc::channel(16);
    let collector = tokio::spawn(collect(rx));
    let report = engine
        .apply(&preview.order, &opts, tx, CancellationToken::new())
        .await
        .unwrap();
    collector.await.unwrap();
    assert_eq!(report.summary.created, 2);
    assert_eq!(storage.get("dev").await.unwrap().len(), 2);
    assert!(engine.plan(&spec, "dev").await.unwrap().is_all_unchanged());

    // Tear it down.
    let order = engine.plan_destroy("dev").await.unwrap();
    let (tx, rx) = mpsc::channel(16);
    let collector = tokio::spawn(collect(rx));
    let report = engine
        .destroy(&order, &opts, tx, CancellationToken::new())
        .await
        .unwrap();
    collector.await.unwrap();
    assert_eq!(report.summary.deleted, 2);
    assert!(storage.get("dev").await.unwrap().is_empty());
}

#[tokio::test]
async fn plan_reports_config_errors_before_running_anything() {
    let dir = tempfile::tempdir().unwrap();
    let runtime = Arc::new(FakeRuntime::new());
    let engine = Engine::new(
        registry_with(runtime.clone()),
        Arc::new(LocalStateStorage::new(dir.path())),
    );
    let spec = Spec::new(vec![simple("a").depends_on("b"), simple("b").depends_on("a")]);

    let err = engine.plan(&spec, "dev").await.unwrap_err();
    assert!(err.is_config_error());
    assert!(runtime.calls().is_empty());
}
