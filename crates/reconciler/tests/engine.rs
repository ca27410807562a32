#![forbid(unsafe_code)]

mod common;

use std::time::Duration;

use common::*;
use registry_core::{Clock, ObjectKind, ReconcileError};
use registry_reconciler::{decorator, RegistryReconciler};
use registry_store::Op;

fn create(kind: ObjectKind, name: &str) -> Op {
    Op::Create { kind, namespace: NS.into(), name: name.into() }
}

fn delete(kind: ObjectKind, name: &str) -> Op {
    Op::Delete { kind, namespace: NS.into(), name: name.into() }
}

#[tokio::test]
async fn first_reconcile_recreates_existing_objects() {
    let h = harness();
    let mut cs = source(IMAGE, None);
    let seeded = h.cluster.insert_pod(NS, decorator::desired_pod(&cs));
    h.cluster.insert_service(NS, decorator::desired_service(&cs));

    h.reconciler.ensure_registry_server(&mut cs).await.unwrap();

    let ops = h.cluster.take_ops();
    assert_eq!(ops.len(), 4, "ops: {:?}", ops);
    assert_eq!(ops[0], delete(ObjectKind::Pod, seeded.metadata.name.as_deref().unwrap()));
    assert!(matches!(&ops[1], Op::Create { kind: ObjectKind::Pod, .. }));
    assert_eq!(ops[2], delete(ObjectKind::Service, "community"));
    assert_eq!(ops[3], create(ObjectKind::Service, "community"));

    let status = cs.registry_service_status().unwrap();
    assert_eq!(status.protocol, "grpc");
    assert_eq!(status.service_name, "community");
    assert_eq!(status.service_namespace, NS);
    assert_eq!(status.port, "50051");
    assert_eq!(status.created_at.0, h.clock.now());
}

#[tokio::test]
async fn converged_source_is_a_fixed_point() {
    let h = harness();
    let mut cs = source(IMAGE, None);
    h.reconciler.ensure_registry_server(&mut cs).await.unwrap();
    let first = cs.registry_service_status().cloned();
    h.cluster.take_ops();

    h.clock.advance(Duration::from_secs(3600));
    h.reconciler.ensure_registry_server(&mut cs).await.unwrap();

    assert!(h.cluster.ops().is_empty());
    assert_eq!(cs.registry_service_status().cloned(), first);
}

#[tokio::test]
async fn image_change_replaces_pod_but_not_service() {
    let h = harness();
    let mut cs = source(IMAGE, None);
    h.reconciler.ensure_registry_server(&mut cs).await.unwrap();
    let old = serving_pods(&h.cluster)[0].metadata.name.clone().unwrap();
    h.cluster.take_ops();

    h.clock.advance(Duration::from_secs(60));
    cs.spec.image = "quay.io/example/catalog:v2".into();
    h.reconciler.ensure_registry_server(&mut cs).await.unwrap();

    let ops = h.cluster.take_ops();
    assert_eq!(ops.len(), 2, "ops: {:?}", ops);
    assert_eq!(ops[0], delete(ObjectKind::Pod, &old));
    assert!(matches!(&ops[1], Op::Create { kind: ObjectKind::Pod, .. }));
    let serving = serving_pods(&h.cluster);
    assert_eq!(serving.len(), 1);
    assert_eq!(registry_reconciler::pod_image(&serving[0]), Some("quay.io/example/catalog:v2"));
    assert_eq!(cs.registry_service_status().unwrap().created_at.0, h.clock.now());
}

#[tokio::test]
async fn missing_pod_is_created_without_deletes() {
    let h = harness();
    let mut cs = source(IMAGE, None);
    h.reconciler.ensure_registry_server(&mut cs).await.unwrap();
    let name = serving_pods(&h.cluster)[0].metadata.name.clone().unwrap();
    registry_kubehub::ObjectStore::delete_pod(h.cluster.as_ref(), NS, &name).await.unwrap();
    h.cluster.take_ops();

    h.reconciler.ensure_registry_server(&mut cs).await.unwrap();

    let ops = h.cluster.take_ops();
    assert_eq!(ops.len(), 1);
    assert!(matches!(&ops[0], Op::Create { kind: ObjectKind::Pod, .. }));
}

#[tokio::test]
async fn cache_outage_reads_as_absence() {
    let h = harness();
    let mut cs = source(IMAGE, None);
    h.reconciler.ensure_registry_server(&mut cs).await.unwrap();
    h.cluster.take_ops();

    // Nothing looks present, so the engine tries to create a service that already exists.
    h.cluster.set_fail_reads(true);
    let err = h.reconciler.ensure_registry_server(&mut cs).await.unwrap_err();

    assert!(matches!(err, ReconcileError::ResourceCreate { kind: ObjectKind::Service, .. }));
    assert_eq!(err.name(), "community");
    assert_eq!(err.to_string(), "error creating service: community");
    let ops = h.cluster.take_ops();
    assert_eq!(ops.len(), 1);
    assert_eq!(ops[0].kind(), ObjectKind::Pod);
}

#[tokio::test]
async fn delete_failure_aborts_with_kind_and_name() {
    let h = harness();
    let mut cs = source(IMAGE, None);
    h.reconciler.ensure_registry_server(&mut cs).await.unwrap();
    let before = cs.registry_service_status().cloned();
    let old = serving_pods(&h.cluster)[0].metadata.name.clone().unwrap();

    h.clock.advance(Duration::from_secs(60));
    cs.spec.image = "quay.io/example/catalog:v2".into();
    h.cluster.set_fail_deletes(Some(ObjectKind::Pod));
    let err = h.reconciler.ensure_registry_server(&mut cs).await.unwrap_err();

    assert_eq!(err.kind(), ObjectKind::Pod);
    assert_eq!(err.name(), old);
    assert!(matches!(err, ReconcileError::ResourceDelete { .. }));
    assert_eq!(cs.registry_service_status().cloned(), before);
}

#[tokio::test]
async fn create_failure_leaves_status_unset() {
    let h = harness();
    let mut cs = source(IMAGE, None);
    h.cluster.set_fail_creates(Some(ObjectKind::Pod));

    let err = h.reconciler.ensure_registry_server(&mut cs).await.unwrap_err();

    assert!(matches!(err, ReconcileError::ResourceCreate { kind: ObjectKind::Pod, .. }));
    assert_eq!(err.name(), "community-");
    assert!(cs.registry_service_status().is_none());
    assert!(h.cluster.service(NS, "community").is_none());
}
