#![cfg(unix)]

use std::os::unix::fs::PermissionsExt;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use serde_json::{Map, Value, json};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use stratum_core::{Message, Resource, ResourceType, Spec};
use stratum_engine::{
    ApplyRequest, DeleteRequest, Engine, ExecuteOptions, ImportRequest, ReadRequest, Registry,
    Runtime, RuntimeContext, RuntimeError, WatchEvent, WatchRequest,
};
use stratum_kubernetes::runtime::ext;
use stratum_kubernetes::{KubernetesConfig, KubernetesRuntime};
use stratum_storage::{LocalStateStorage, StateStorage};

/// Keeps one ConfigMap in `__STATE__`: `exists` marks it live and `rv`
/// holds its resourceVersion.
const SCRIPT: &str = r#"#!/bin/sh
state="__STATE__"
echo "$*" >> "$state/args.log"
while [ "${1#--}" != "$1" ]; do shift 2; done
rv=$(cat "$state/rv" 2>/dev/null || echo 0)
live() {
  printf '{"apiVersion":"v1","kind":"ConfigMap","metadata":{"name":"app","namespace":"default","uid":"u-1","resourceVersion":"%s","managedFields":[]},"data":{"k":"v"}}' "$1"
}
case "$1" in
  apply)
    body=$(cat)
    if echo "$body" | grep -q reject; then
      echo 'Error from server (Forbidden): admission webhook "policy" denied the request' >&2
      exit 1
    fi
    case "$*" in
      *--dry-run=server*) live "$rv" ;;
      *)
        rv=$((rv + 1))
        echo "$rv" > "$state/rv"
        touch "$state/exists"
        live "$rv"
        ;;
    esac
    ;;
  get)
    if [ -f "$state/exists" ]; then live "$rv"; fi
    ;;
  delete)
    rm -f "$state/exists"
    ;;
esac
"#;

struct Harness {
    dir: tempfile::TempDir,
    config: KubernetesConfig,
}

impl Harness {
    fn new() -> Self {
        let dir = tempfile::tempdir().unwrap();
        let bin = dir.path().join("kubectl");
        std::fs::write(&bin, SCRIPT.replace("__STATE__", dir.path().to_str().unwrap())).unwrap();
        std::fs::set_permissions(&bin, std::fs::Permissions::from_mode(0o755)).unwrap();

        let config = KubernetesConfig::default()
            .with_binary(&bin)
            .with_watch_interval(Duration::from_millis(20));
        Self { dir, config }
    }

    fn runtime(&self) -> KubernetesRuntime {
        KubernetesRuntime::new(self.config.clone())
    }

    fn state(&self, name: &str) -> PathBuf {
        self.dir.path().join(name)
    }

    fn args(&self) -> Vec<String> {
        std::fs::read_to_string(self.state("args.log"))
            .unwrap_or_default()
            .lines()
            .map(str::to_string)
            .collect()
    }
}

fn config_map(data: Value) -> Resource {
    let attributes: Map<String, Value> = match json!({
        "apiVersion": "v1",
        "kind": "ConfigMap",
        "metadata": {"name": "app", "namespace": "default"},
        "data": data,
    }) {
        Value::Object(map) => map,
        _ => unreachable!(),
    };
    Resource::new("v1:ConfigMap:default:app", ResourceType::Kubernetes, attributes)
}

fn apply_request(planned: Resource, dry_run: bool) -> ApplyRequest {
    ApplyRequest {
        planned,
        stack: "dev".into(),
        dry_run,
    }
}

#[tokio::test]
async fn apply_returns_declared_attributes_with_server_identity() {
    let h = Harness::new();
    let rt = h.runtime();
    let ctx = RuntimeContext::default();
    let planned = config_map(json!({"k": "v"}));

    let response = rt.apply(&ctx, apply_request(planned.clone(), false)).await.unwrap();

    assert_eq!(response.resource.attributes, planned.attributes);
    assert_eq!(response.resource.extension_str(ext::UID), Some("u-1"));
    assert_eq!(response.resource.extension_str(ext::RESOURCE_VERSION), Some("1"));
    assert_eq!(h.args(), vec!["apply -f - -o json".to_string()]);
}

#[tokio::test]
async fn dry_run_apply_asks_the_server_without_persisting() {
    let h = Harness::new();
    let rt = h.runtime();
    let ctx = RuntimeContext::default();
    let planned = config_map(json!({"k": "v"}));

    let response = rt.apply(&ctx, apply_request(planned.clone(), true)).await.unwrap();

    assert_eq!(response.resource, planned);
    assert!(!h.state("exists").exists());
    assert_eq!(h.args(), vec!["apply -f - -o json --dry-run=server".to_string()]);
}

#[tokio::test]
async fn apply_stays_client_side_in_both_modes() {
    let h = Harness::new();
    let rt = h.runtime();
    let ctx = RuntimeContext::default();
    let planned = config_map(json!({"k": "v"}));

    rt.apply(&ctx, apply_request(planned.clone(), true)).await.unwrap();
    rt.apply(&ctx, apply_request(planned, false)).await.unwrap();

    let args = h.args();
    assert_eq!(args.len(), 2);
    assert!(args.iter().all(|a| a.starts_with("apply -f - -o json")));
    assert!(args.iter().all(|a| !a.contains("--server-side")));
    assert_eq!(args.iter().filter(|a| a.ends_with("--dry-run=server")).count(), 1);
}

#[tokio::test]
async fn rejected_apply_surfaces_raw_stderr() {
    let h = Harness::new();
    let rt = h.runtime();
    let ctx = RuntimeContext::default();

    let err = rt
        .apply(&ctx, apply_request(config_map(json!({"k": "reject"})), false))
        .await
        .unwrap_err();

    match err {
        RuntimeError::Api(stderr) => assert_eq!(
            stderr,
            r#"Error from server (Forbidden): admission webhook "policy" denied the request"#
        ),
        other => panic!("unexpected error: {other:?}"),
    }
}

#[tokio::test]
async fn read_projects_live_object_and_reports_absence() {
    let h = Harness::new();
    let rt = h.runtime();
    let ctx = RuntimeContext::default();
    let planned = config_map(json!({"k": "v"}));

    let absent = rt
        .read(&ctx, ReadRequest {
            prior: None,
            planned: Some(planned.clone()),
            stack: "dev".into(),
        })
        .await
        .unwrap();
    assert!(absent.resource.is_none());

    rt.apply(&ctx, apply_request(planned.clone(), false)).await.unwrap();
    let read = rt
        .read(&ctx, ReadRequest {
            prior: Some(planned.clone()),
            planned: None,
            stack: "dev".into(),
        })
        .await
        .unwrap()
        .resource
        .unwrap();

    assert_eq!(read.attributes, planned.attributes);
    assert_eq!(read.extension_str(ext::RESOURCE_VERSION), Some("1"));
    assert!(
        h.args()
            .contains(&"get ConfigMap app -o json --ignore-not-found --namespace default".to_string())
    );
}

#[tokio::test]
async fn delete_waits_and_tolerates_missing_objects() {
    let h = Harness::new();
    let rt = h.runtime();
    let ctx = RuntimeContext::default();
    let resource = config_map(json!({"k": "v"}));

    rt.apply(&ctx, apply_request(resource.clone(), false)).await.unwrap();
    for _ in 0..2 {
        rt.delete(&ctx, DeleteRequest {
            resource: resource.clone(),
            stack: "dev".into(),
        })
        .await
        .unwrap();
    }

    assert!(!h.state("exists").exists());
    assert_eq!(
        h.args().last().unwrap(),
        "delete ConfigMap app --ignore-not-found --wait=true --namespace default"
    );
}

#[tokio::test]
async fn import_adopts_only_existing_objects() {
    let h = Harness::new();
    let rt = h.runtime();
    let ctx = RuntimeContext::default();
    let planned = config_map(json!({"k": "v"}));
    let request = || ImportRequest {
        planned: planned.clone(),
        stack: "dev".into(),
    };

    let err = rt.import(&ctx, request()).await.unwrap_err();
    assert!(matches!(err, RuntimeError::Api(ref m) if m == "v1:ConfigMap:default:app not found"));

    std::fs::write(h.state("rv"), "7").unwrap();
    std::fs::write(h.state("exists"), "").unwrap();
    let adopted = rt.import(&ctx, request()).await.unwrap().resource;
    assert_eq!(adopted.attributes, planned.attributes);
    assert_eq!(adopted.extension_str(ext::RESOURCE_VERSION), Some("7"));
}

#[tokio::test]
async fn context_and_kubeconfig_precede_the_subcommand() {
    let h = Harness::new();
    let rt = KubernetesRuntime::new(
        h.config
            .clone()
            .with_context("kind-dev")
            .with_kubeconfig("/tmp/kubeconfig"),
    );

    rt.delete(&RuntimeContext::default(), DeleteRequest {
        resource: config_map(json!({"k": "v"})),
        stack: "dev".into(),
    })
    .await
    .unwrap();

    assert_eq!(
        h.args(),
        vec![
            "--context kind-dev --kubeconfig /tmp/kubeconfig delete ConfigMap app --ignore-not-found --wait=true --namespace default"
                .to_string()
        ]
    );
}

async fn next(rx: &mut mpsc::Receiver<WatchEvent>) -> WatchEvent {
    tokio::time::timeout(Duration::from_secs(5), rx.recv())
        .await
        .expect("watch event in time")
        .expect("watch still open")
}

#[tokio::test]
async fn watch_reports_version_changes_until_cancelled() {
    let h = Harness::new();
    let rt = h.runtime();
    let ctx = RuntimeContext::default();
    let resource = config_map(json!({"k": "v"}));
    rt.apply(&ctx, apply_request(resource.clone(), false)).await.unwrap();

    let watch_ctx = RuntimeContext::new(CancellationToken::new());
    let mut rx = rt
        .watch(&watch_ctx, WatchRequest {
            resource: resource.clone(),
        })
        .await
        .unwrap()
        .expect("kubernetes supports watch");

    let first = next(&mut rx).await;
    assert_eq!(first.resource_id, "v1:ConfigMap:default:app");
    assert_eq!(first.live["metadata"]["resourceVersion"], "1");

    rt.apply(&ctx, apply_request(resource.clone(), false)).await.unwrap();
    let second = next(&mut rx).await;
    assert_eq!(second.live["metadata"]["resourceVersion"], "2");

    rt.delete(&ctx, DeleteRequest {
        resource,
        stack: "dev".into(),
    })
    .await
    .unwrap();
    assert_eq!(next(&mut rx).await.live, Value::Null);

    watch_ctx.cancel.cancel();
    let closed = tokio::time::timeout(Duration::from_secs(5), async {
        while rx.recv().await.is_some() {}
    })
    .await;
    assert!(closed.is_ok(), "watch stream should close after cancellation");
}

#[tokio::test]
async fn engine_converges_a_config_map_and_stays_converged() {
    let h = Harness::new();
    let state_dir = tempfile::tempdir().unwrap();
    let storage = Arc::new(LocalStateStorage::new(state_dir.path()));
    let mut registry = Registry::new();
    stratum_kubernetes::register(&mut registry, h.config.clone());
    let engine = Engine::new(registry, storage.clone());
    let opts = ExecuteOptions::new("dev");
    let spec = Spec::new(vec![config_map(json!({"k": "v"}))]);

    let order = engine.plan(&spec, "dev").await.unwrap();
    let (tx, mut rx) = mpsc::channel::<Message>(16);
    let drain = tokio::spawn(async move { while rx.recv().await.is_some() {} });
    let report = engine
        .apply(&order, &opts, tx, CancellationToken::new())
        .await
        .unwrap();
    drain.await.unwrap();

    assert_eq!(report.summary.created, 1);
    let stored = storage.get("dev").await.unwrap();
    assert_eq!(
        stored
            .get("v1:ConfigMap:default:app")
            .and_then(|r| r.extension_str(ext::UID)),
        Some("u-1")
    );
    assert!(engine.plan(&spec, "dev").await.unwrap().is_all_unchanged());
}

#[tokio::test]
#[ignore = "needs kubectl and a reachable cluster"]
async fn live_cluster_round_trip() {
    let rt = KubernetesRuntime::new(KubernetesConfig::default());
    let ctx = RuntimeContext::default();
    let resource = config_map(json!({"owner": "stratum"}));

    rt.apply(&ctx, apply_request(resource.clone(), false)).await.unwrap();
    let read = rt
        .read(&ctx, ReadRequest {
            prior: Some(resource.clone()),
            planned: None,
            stack: "live".into(),
        })
        .await
        .unwrap();
    assert_eq!(read.resource.unwrap().attributes, resource.attributes);
    rt.delete(&ctx, DeleteRequest {
        resource,
        stack: "live".into(),
    })
    .await
    .unwrap();
}
