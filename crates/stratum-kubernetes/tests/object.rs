use serde_json::{Map, Value, json};

use stratum_kubernetes::object::project;
use stratum_kubernetes::{KubectlError, ObjectRef};

fn manifest(value: Value) -> Map<String, Value> {
    match value {
        Value::Object(map) => map,
        other => panic!("not an object: {other}"),
    }
}

#[test]
fn namespaced_object_id_includes_namespace() {
    let obj = ObjectRef::from_manifest(&manifest(json!({
        "apiVersion": "apps/v1",
        "kind": "Deployment",
        "metadata": {"name": "web", "namespace": "prod"},
    })))
    .unwrap();

    assert_eq!(obj.canonical_id(), "apps/v1:Deployment:prod:web");
    assert_eq!(obj.kubectl_type(), "Deployment.v1.apps");
}

#[test]
fn cluster_scoped_object_id_omits_namespace() {
    let obj = ObjectRef::from_manifest(&manifest(json!({
        "apiVersion": "v1",
        "kind": "Namespace",
        "metadata": {"name": "prod"},
    })))
    .unwrap();

    assert_eq!(obj.namespace, None);
    assert_eq!(obj.canonical_id(), "v1:Namespace:prod");
    assert_eq!(obj.kubectl_type(), "Namespace");
}

#[test]
fn manifest_without_name_is_rejected() {
    let err = ObjectRef::from_manifest(&manifest(json!({
        "apiVersion": "v1",
        "kind": "ConfigMap",
        "metadata": {"namespace": "prod"},
    })))
    .unwrap_err();

    assert!(matches!(err, KubectlError::InvalidManifest(ref m) if m == "missing metadata.name"));
}

#[test]
fn ids_parse_back_into_refs() {
    let obj: ObjectRef = "rbac.authorization.k8s.io/v1:ClusterRole:reader".parse().unwrap();
    assert_eq!(obj.api_version, "rbac.authorization.k8s.io/v1");
    assert_eq!(obj.kind, "ClusterRole");
    assert_eq!(obj.namespace, None);
    assert_eq!(obj.name, "reader");

    let obj: ObjectRef = "v1:Secret:prod:db".parse().unwrap();
    assert_eq!(obj.namespace.as_deref(), Some("prod"));
    assert_eq!(obj.to_string(), "v1:Secret:prod:db");

    for bad in ["v1:Secret", "v1::prod:db", "a:b:c:d:e", ""] {
        assert!(bad.parse::<ObjectRef>().is_err(), "{bad:?} should not parse");
    }
}

#[test]
fn projection_keeps_only_declared_fields() {
    let declared = json!({
        "apiVersion": "apps/v1",
        "kind": "Deployment",
        "metadata": {"name": "web", "labels": {"app": "web"}},
        "spec": {
            "replicas": 2,
            "template": {"spec": {"containers": [{"name": "web", "image": "nginx:1"}]}},
        },
    });
    let live = json!({
        "apiVersion": "apps/v1",
        "kind": "Deployment",
        "metadata": {
            "name": "web",
            "labels": {"app": "web"},
            "uid": "1234",
            "resourceVersion": "88",
        },
        "spec": {
            "replicas": 3,
            "strategy": {"type": "RollingUpdate"},
            "template": {"spec": {"containers": [{
                "name": "web",
                "image": "nginx:1",
                "imagePullPolicy": "IfNotPresent",
            }]}},
        },
        "status": {"readyReplicas": 3},
    });

    assert_eq!(
        project(&declared, &live),
        json!({
            "apiVersion": "apps/v1",
            "kind": "Deployment",
            "metadata": {"name": "web", "labels": {"app": "web"}},
            "spec": {
                "replicas": 3,
                "template": {"spec": {"containers": [{"name": "web", "image": "nginx:1"}]}},
            },
        })
    );
}

#[test]
fn projection_drops_fields_missing_from_live_and_replaces_resized_arrays() {
    let declared = json!({"data": {"a": "1", "b": "2"}, "ports": [1, 2]});
    let live = json!({"data": {"a": "1"}, "ports": [1, 2, 3]});

    assert_eq!(project(&declared, &live), json!({"data": {"a": "1"}, "ports": [1, 2, 3]}));
}
