//! Desired state derived from a CatalogSource. Pure functions, recomputed on
//! every reconcile; nothing here is stored.

use std::collections::BTreeMap;

use k8s_openapi::api::core::v1::{
    Container, ContainerPort, ExecAction, Pod, PodSpec, Probe, Service, ServicePort, ServiceSpec,
};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{ObjectMeta, OwnerReference};
use k8s_openapi::apimachinery::pkg::util::intstr::IntOrString;
use kube::{Resource, ResourceExt};
use registry_core::{
    CatalogSource, CATALOG_SOURCE_LABEL_KEY, REGISTRY_CONTAINER_NAME, REGISTRY_PORT, REGISTRY_PROTOCOL,
};
use registry_kubehub::LabelSelector;

const READINESS_DELAY_SECONDS: i32 = 5;
const LIVENESS_DELAY_SECONDS: i32 = 10;

pub fn canonical_labels(source: &CatalogSource) -> BTreeMap<String, String> {
    BTreeMap::from([(CATALOG_SOURCE_LABEL_KEY.to_string(), source.name_any())])
}

/// Exact-match selector over [`canonical_labels`].
pub fn selector(source: &CatalogSource) -> LabelSelector {
    canonical_labels(source)
}

/// Non-controller owner reference that does not block owner deletion, so
/// deleting the CatalogSource never waits on its registry objects.
pub fn owner_reference(source: &CatalogSource) -> OwnerReference {
    OwnerReference {
        api_version: CatalogSource::api_version(&()).into_owned(),
        kind: CatalogSource::kind(&()).into_owned(),
        name: source.name_any(),
        uid: source.uid().unwrap_or_default(),
        controller: Some(false),
        block_owner_deletion: Some(false),
    }
}

pub fn desired_service(source: &CatalogSource) -> Service {
    Service {
        metadata: ObjectMeta {
            name: Some(source.name_any()),
            namespace: source.namespace(),
            owner_references: Some(vec![owner_reference(source)]),
            ..Default::default()
        },
        spec: Some(ServiceSpec {
            ports: Some(vec![ServicePort {
                name: Some(REGISTRY_PROTOCOL.to_string()),
                port: REGISTRY_PORT,
                target_port: Some(IntOrString::Int(REGISTRY_PORT)),
                ..Default::default()
            }]),
            selector: Some(canonical_labels(source)),
            ..Default::default()
        }),
        ..Default::default()
    }
}

pub fn desired_pod(source: &CatalogSource) -> Pod {
    let image = source.spec.image.clone();
    Pod {
        metadata: ObjectMeta {
            generate_name: Some(format!("{}-", source.name_any())),
            namespace: source.namespace(),
            labels: Some(canonical_labels(source)),
            owner_references: Some(vec![owner_reference(source)]),
            ..Default::default()
        },
        spec: Some(PodSpec {
            containers: vec![Container {
                name: REGISTRY_CONTAINER_NAME.to_string(),
                image_pull_policy: Some(image_pull_policy(&image).to_string()),
                image: Some(image),
                ports: Some(vec![ContainerPort {
                    name: Some(REGISTRY_PROTOCOL.to_string()),
                    container_port: REGISTRY_PORT,
                    ..Default::default()
                }]),
                readiness_probe: Some(grpc_probe(READINESS_DELAY_SECONDS)),
                liveness_probe: Some(grpc_probe(LIVENESS_DELAY_SECONDS)),
                ..Default::default()
            }],
            ..Default::default()
        }),
        ..Default::default()
    }
}

/// The desired pod without the canonical label, so no service ever selects it.
pub fn probe_pod(source: &CatalogSource) -> Pod {
    let mut pod = desired_pod(source);
    if let Some(labels) = pod.metadata.labels.as_mut() {
        labels.remove(CATALOG_SOURCE_LABEL_KEY);
    }
    pod
}

/// Digest-pinned images never change under us; tags must be re-pulled.
pub fn image_pull_policy(image: &str) -> &'static str {
    if image.contains("@sha256:") { "IfNotPresent" } else { "Always" }
}

fn grpc_probe(initial_delay_seconds: i32) -> Probe {
    Probe {
        exec: Some(ExecAction {
            command: Some(vec!["grpc_health_probe".to_string(), format!("-addr=localhost:{}", REGISTRY_PORT)]),
        }),
        initial_delay_seconds: Some(initial_delay_seconds),
        ..Default::default()
    }
}
