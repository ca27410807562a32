//! Reflector-backed [`Lister`]: list+watch pods and services into local stores.

use anyhow::{anyhow, Result};
use futures::StreamExt;
use k8s_openapi::api::core::v1::{Pod, Service};
use kube::{
    api::Api,
    runtime::{
        reflector::{self, ObjectRef, Store},
        watcher, WatchStreamExt,
    },
    Client, Resource,
};
use metrics::counter;
use serde::de::DeserializeOwned;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::{matches_selector, LabelSelector, Lister};

pub struct ReflectorLister {
    namespace: Option<String>,
    pods: Store<Pod>,
    services: Store<Service>,
    tasks: Vec<JoinHandle<()>>,
}

impl ReflectorLister {
    /// Start watchers for pods and services (in `namespace`, or cluster-wide) and
    /// wait for their initial lists so reads never mistake a cold cache for absence.
    pub async fn start(client: Client, namespace: Option<&str>) -> Result<Self> {
        let (pods, pod_task) = spawn_reflector::<Pod>(api_for(client.clone(), namespace), "pods");
        let (services, svc_task) = spawn_reflector::<Service>(api_for(client, namespace), "services");
        pods.wait_until_ready().await.map_err(|_| anyhow!("pod cache stopped before initial sync"))?;
        services.wait_until_ready().await.map_err(|_| anyhow!("service cache stopped before initial sync"))?;
        info!(ns = ?namespace, pods = pods.state().len(), services = services.state().len(), "caches synced");
        Ok(Self { namespace: namespace.map(str::to_string), pods, services, tasks: vec![pod_task, svc_task] })
    }

    fn check_namespace(&self, namespace: &str) -> Result<()> {
        match self.namespace.as_deref() {
            Some(watched) if watched != namespace => Err(anyhow!("namespace {} is not cached (watching {})", namespace, watched)),
            _ => Ok(()),
        }
    }
}

impl Drop for ReflectorLister {
    fn drop(&mut self) {
        for t in &self.tasks { t.abort(); }
    }
}

impl Lister for ReflectorLister {
    fn get_service(&self, namespace: &str, name: &str) -> Result<Option<Service>> {
        self.check_namespace(namespace)?;
        let key = ObjectRef::new(name).within(namespace);
        Ok(self.services.get(&key).map(|s| (*s).clone()))
    }

    fn list_pods(&self, namespace: &str, selector: &LabelSelector) -> Result<Vec<Pod>> {
        self.check_namespace(namespace)?;
        Ok(self
            .pods
            .state()
            .into_iter()
            .filter(|p| p.metadata.namespace.as_deref() == Some(namespace))
            .filter(|p| matches_selector(p.metadata.labels.as_ref(), selector))
            .map(|p| (*p).clone())
            .collect())
    }
}

fn api_for<K>(client: Client, namespace: Option<&str>) -> Api<K>
where
    K: Resource<Scope = k8s_openapi::NamespaceResourceScope, DynamicType = ()>,
{
    match namespace {
        Some(ns) => Api::namespaced(client, ns),
        None => Api::all(client),
    }
}

fn spawn_reflector<K>(api: Api<K>, what: &'static str) -> (Store<K>, JoinHandle<()>)
where
    K: Resource<DynamicType = ()> + Clone + DeserializeOwned + std::fmt::Debug + Send + Sync + 'static,
{
    let (reader, writer) = reflector::store::<K>();
    let task = tokio::spawn(async move {
        let stream = reflector::reflector(writer, watcher::watcher(api, watcher::Config::default())).default_backoff();
        futures::pin_mut!(stream);
        info!(kind = what, "reflector started");
        while let Some(ev) = stream.next().await {
            if let Err(e) = ev {
                counter!("registry_cache_watch_errors_total", 1u64);
                warn!(kind = what, error = %e, "watch error; backing off");
            }
        }
        warn!(kind = what, "reflector stream ended");
    });
    (reader, task)
}
