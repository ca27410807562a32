//! Registry kubehub: the cluster collaborators the reconciler talks to.
//!
//! Reads go through a [`Lister`] (a cache, never the API server directly) and
//! writes through an [`ObjectStore`]. Both have kube-rs implementations here;
//! `registry-store` provides an in-memory one.

#![forbid(unsafe_code)]

use std::collections::BTreeMap;

use anyhow::{Context, Result};
use k8s_openapi::api::core::v1::{Pod, Service};
use kube::Client;
use once_cell::sync::OnceCell;

pub mod cache;
pub mod client;

pub use cache::ReflectorLister;
pub use client::KubeObjectStore;

/// Exact-match label selector.
pub type LabelSelector = BTreeMap<String, String>;

/// Read-only view over cached cluster state. Implementations must not block on the network.
pub trait Lister: Send + Sync {
    fn get_service(&self, namespace: &str, name: &str) -> Result<Option<Service>>;
    fn list_pods(&self, namespace: &str, selector: &LabelSelector) -> Result<Vec<Pod>>;
}

/// Mutating calls against the object store, plus a direct (uncached) pod read.
#[async_trait::async_trait]
pub trait ObjectStore: Send + Sync {
    /// Create a pod; the returned object carries the server-assigned name.
    async fn create_pod(&self, namespace: &str, pod: &Pod) -> Result<Pod>;
    async fn delete_pod(&self, namespace: &str, name: &str) -> Result<()>;
    async fn get_pod(&self, namespace: &str, name: &str) -> Result<Option<Pod>>;
    async fn create_service(&self, namespace: &str, service: &Service) -> Result<Service>;
    async fn delete_service(&self, namespace: &str, name: &str) -> Result<()>;
}

/// True when every selector pair is present in `labels`.
pub fn matches_selector(labels: Option<&BTreeMap<String, String>>, selector: &LabelSelector) -> bool {
    selector.iter().all(|(k, v)| labels.and_then(|l| l.get(k)) == Some(v))
}

/// Render a selector as `k=v,k2=v2` for logs and list params.
pub fn selector_string(selector: &LabelSelector) -> String {
    selector.iter().map(|(k, v)| format!("{}={}", k, v)).collect::<Vec<_>>().join(",")
}

static KUBE_CLIENT: OnceCell<Client> = OnceCell::new();

/// Shared kube client built from the default kubeconfig / in-cluster config.
pub async fn get_kube_client() -> Result<Client> {
    if let Some(c) = KUBE_CLIENT.get() {
        return Ok(c.clone());
    }
    let client = Client::try_default().await.context("building kube client")?;
    let _ = KUBE_CLIENT.set(client.clone());
    Ok(client)
}
