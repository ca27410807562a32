#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use chrono::DateTime;
use k8s_openapi::api::core::v1::Pod;
use registry_core::{CatalogSource, CatalogSourceSpec, ManualClock, RegistryPoll};
use registry_reconciler::{GrpcRegistryReconciler, ReconcilerConfig};
use registry_store::MemoryCluster;

pub const NS: &str = "olm";
pub const IMAGE: &str = "quay.io/example/catalog:latest";

pub struct Harness {
    pub clock: Arc<ManualClock>,
    pub cluster: Arc<MemoryCluster>,
    pub reconciler: GrpcRegistryReconciler,
}

pub fn harness_with(config: ReconcilerConfig) -> Harness {
    let clock = Arc::new(ManualClock::new(DateTime::from_timestamp(1_700_000_000, 0).unwrap()));
    let cluster = Arc::new(MemoryCluster::new(clock.clone()));
    let reconciler = GrpcRegistryReconciler::new(cluster.clone(), cluster.clone(), clock.clone(), config);
    Harness { clock, cluster, reconciler }
}

pub fn harness() -> Harness {
    harness_with(ReconcilerConfig { probe_attempts: 50, probe_backoff: Duration::from_millis(5) })
}

pub fn source(image: &str, poll: Option<&str>) -> CatalogSource {
    let mut cs = CatalogSource::new("community", CatalogSourceSpec {
        image: image.to_string(),
        poll: poll.map(|p| RegistryPoll { interval: Some(p.to_string()) }),
        display_name: None,
    });
    cs.metadata.namespace = Some(NS.to_string());
    cs.metadata.uid = Some("0b6c9a3e-4d3c-4cbb-9a51-0cbd3c2f1f10".to_string());
    cs
}

/// Pods carrying no catalog source label: probe pods.
pub fn probe_pods(cluster: &MemoryCluster) -> Vec<Pod> {
    cluster
        .pods(NS)
        .into_iter()
        .filter(|p| p.metadata.labels.as_ref().map(|l| !l.contains_key("olm.catalogSource")).unwrap_or(true))
        .collect()
}

/// Pods selected by the catalog source label.
pub fn serving_pods(cluster: &MemoryCluster) -> Vec<Pod> {
    cluster
        .pods(NS)
        .into_iter()
        .filter(|p| p.metadata.labels.as_ref().map(|l| l.contains_key("olm.catalogSource")).unwrap_or(false))
        .collect()
}

/// Let spawned probe tasks run.
pub async fn settle() {
    tokio::time::sleep(Duration::from_millis(2)).await;
}
