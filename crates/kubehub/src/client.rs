use anyhow::{Context, Result};
use k8s_openapi::api::core::v1::{Pod, Service};
use kube::{
    api::{Api, DeleteParams, PostParams},
    Client,
};
use tracing::debug;

use crate::ObjectStore;

/// [`ObjectStore`] backed by the API server. Deletes use a zero grace period.
#[derive(Clone)]
pub struct KubeObjectStore {
    client: Client,
}

impl KubeObjectStore {
    pub fn new(client: Client) -> Self { Self { client } }

    fn delete_params() -> DeleteParams {
        DeleteParams { grace_period_seconds: Some(0), ..Default::default() }
    }
}

#[async_trait::async_trait]
impl ObjectStore for KubeObjectStore {
    async fn create_pod(&self, namespace: &str, pod: &Pod) -> Result<Pod> {
        let api: Api<Pod> = Api::namespaced(self.client.clone(), namespace);
        let created = api.create(&PostParams::default(), pod).await.context("creating pod")?;
        debug!(ns = %namespace, pod = ?created.metadata.name, "pod created");
        Ok(created)
    }

    async fn delete_pod(&self, namespace: &str, name: &str) -> Result<()> {
        let api: Api<Pod> = Api::namespaced(self.client.clone(), namespace);
        let _ = api.delete(name, &Self::delete_params()).await.context("deleting pod")?;
        debug!(ns = %namespace, pod = %name, "pod deleted");
        Ok(())
    }

    async fn get_pod(&self, namespace: &str, name: &str) -> Result<Option<Pod>> {
        let api: Api<Pod> = Api::namespaced(self.client.clone(), namespace);
        api.get_opt(name).await.context("reading pod")
    }

    async fn create_service(&self, namespace: &str, service: &Service) -> Result<Service> {
        let api: Api<Service> = Api::namespaced(self.client.clone(), namespace);
        let created = api.create(&PostParams::default(), service).await.context("creating service")?;
        debug!(ns = %namespace, service = ?created.metadata.name, "service created");
        Ok(created)
    }

    async fn delete_service(&self, namespace: &str, name: &str) -> Result<()> {
        let api: Api<Service> = Api::namespaced(self.client.clone(), namespace);
        let _ = api.delete(name, &Self::delete_params()).await.context("deleting service")?;
        debug!(ns = %namespace, service = %name, "service deleted");
        Ok(())
    }
}
