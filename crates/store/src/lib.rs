//! Registry store: an in-RAM cluster implementing both [`Lister`] and
//! [`ObjectStore`]. Used by `registryctl reconcile --dry-run` and by tests,
//! which also use it to play the kubelet (reporting image digests).

#![forbid(unsafe_code)]

use std::sync::{Arc, Mutex, MutexGuard};

use anyhow::{anyhow, Result};
use k8s_openapi::api::core::v1::{ContainerStatus, Pod, PodStatus, Service};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::Time;
use kube::Resource;
use registry_core::{Clock, ObjectKind};
use registry_kubehub::{matches_selector, LabelSelector, Lister, ObjectStore};
use rustc_hash::FxHashMap;
use tracing::debug;
use uuid::Uuid;

/// A mutation observed by the store, in call order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Op {
    Create { kind: ObjectKind, namespace: String, name: String },
    Delete { kind: ObjectKind, namespace: String, name: String },
}

impl Op {
    pub fn kind(&self) -> ObjectKind {
        match self {
            Op::Create { kind, .. } | Op::Delete { kind, .. } => *kind,
        }
    }
}

type Key = (String, String);

#[derive(Default)]
struct State {
    pods: FxHashMap<Key, Pod>,
    services: FxHashMap<Key, Service>,
    ops: Vec<Op>,
    seq: u64,
    fail_reads: bool,
    fail_creates: Option<ObjectKind>,
    fail_deletes: Option<ObjectKind>,
}

pub struct MemoryCluster {
    clock: Arc<dyn Clock>,
    state: Mutex<State>,
}

impl MemoryCluster {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self { clock, state: Mutex::new(State::default()) }
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Mutations recorded so far.
    pub fn ops(&self) -> Vec<Op> { self.lock().ops.clone() }

    /// Return and clear the recorded mutations.
    pub fn take_ops(&self) -> Vec<Op> { std::mem::take(&mut self.lock().ops) }

    /// Make every cache read fail, as an unavailable informer would.
    pub fn set_fail_reads(&self, on: bool) { self.lock().fail_reads = on; }

    pub fn set_fail_creates(&self, kind: Option<ObjectKind>) { self.lock().fail_creates = kind; }

    pub fn set_fail_deletes(&self, kind: Option<ObjectKind>) { self.lock().fail_deletes = kind; }

    /// Every pod in `namespace`, labelled or not.
    pub fn pods(&self, namespace: &str) -> Vec<Pod> {
        let st = self.lock();
        let mut out: Vec<Pod> = st.pods.iter().filter(|((ns, _), _)| ns == namespace).map(|(_, p)| p.clone()).collect();
        out.sort_by(|a, b| a.metadata.name.cmp(&b.metadata.name));
        out
    }

    pub fn service(&self, namespace: &str, name: &str) -> Option<Service> {
        self.lock().services.get(&(namespace.to_string(), name.to_string())).cloned()
    }

    /// Seed an object without recording an op (pre-existing cluster state).
    pub fn insert_pod(&self, namespace: &str, pod: Pod) -> Pod {
        let mut st = self.lock();
        let pod = self.admit(&mut st, namespace, pod);
        let key = (namespace.to_string(), pod.metadata.name.clone().unwrap_or_default());
        st.pods.insert(key, pod.clone());
        pod
    }

    pub fn insert_service(&self, namespace: &str, service: Service) -> Service {
        let mut st = self.lock();
        let svc = self.admit(&mut st, namespace, service);
        let key = (namespace.to_string(), svc.metadata.name.clone().unwrap_or_default());
        st.services.insert(key, svc.clone());
        svc
    }

    /// Report `image_id` as the resolved digest of the pod's first container.
    pub fn set_image_id(&self, namespace: &str, name: &str, image_id: &str) -> Result<()> {
        let mut st = self.lock();
        let pod = st
            .pods
            .get_mut(&(namespace.to_string(), name.to_string()))
            .ok_or_else(|| anyhow!("pods \"{}\" not found", name))?;
        let (container, image) = pod
            .spec
            .as_ref()
            .and_then(|s| s.containers.first())
            .map(|c| (c.name.clone(), c.image.clone().unwrap_or_default()))
            .unwrap_or_default();
        let status = pod.status.get_or_insert_with(PodStatus::default);
        status.container_statuses = Some(vec![ContainerStatus {
            name: container,
            image,
            image_id: image_id.to_string(),
            ready: true,
            ..Default::default()
        }]);
        Ok(())
    }

    /// Assign server-side metadata: name (from generateName), uid, namespace, creation time.
    fn admit<K: Resource>(&self, st: &mut State, namespace: &str, mut obj: K) -> K {
        st.seq += 1;
        let now = self.clock.now();
        let meta = obj.meta_mut();
        if meta.name.is_none() {
            meta.name = Some(format!("{}{:05}", meta.generate_name.clone().unwrap_or_default(), st.seq));
        }
        meta.namespace = Some(namespace.to_string());
        meta.uid = Some(Uuid::new_v4().to_string());
        meta.creation_timestamp = Some(Time(now));
        obj
    }
}

impl Lister for MemoryCluster {
    fn get_service(&self, namespace: &str, name: &str) -> Result<Option<Service>> {
        let st = self.lock();
        if st.fail_reads { return Err(anyhow!("service cache unavailable")); }
        Ok(st.services.get(&(namespace.to_string(), name.to_string())).cloned())
    }

    fn list_pods(&self, namespace: &str, selector: &LabelSelector) -> Result<Vec<Pod>> {
        let st = self.lock();
        if st.fail_reads { return Err(anyhow!("pod cache unavailable")); }
        let mut out: Vec<Pod> = st
            .pods
            .iter()
            .filter(|((ns, _), p)| ns == namespace && matches_selector(p.metadata.labels.as_ref(), selector))
            .map(|(_, p)| p.clone())
            .collect();
        out.sort_by(|a, b| a.metadata.name.cmp(&b.metadata.name));
        Ok(out)
    }
}

#[async_trait::async_trait]
impl ObjectStore for MemoryCluster {
    async fn create_pod(&self, namespace: &str, pod: &Pod) -> Result<Pod> {
        let mut st = self.lock();
        if st.fail_creates == Some(ObjectKind::Pod) { return Err(anyhow!("admission denied pod create")); }
        let created = self.admit(&mut st, namespace, pod.clone());
        let name = created.metadata.name.clone().unwrap_or_default();
        let key = (namespace.to_string(), name.clone());
        if st.pods.contains_key(&key) { return Err(anyhow!("pods \"{}\" already exists", name)); }
        st.pods.insert(key, created.clone());
        st.ops.push(Op::Create { kind: ObjectKind::Pod, namespace: namespace.to_string(), name: name.clone() });
        debug!(ns = %namespace, pod = %name, "memory: pod created");
        Ok(created)
    }

    async fn delete_pod(&self, namespace: &str, name: &str) -> Result<()> {
        let mut st = self.lock();
        if st.fail_deletes == Some(ObjectKind::Pod) { return Err(anyhow!("admission denied pod delete")); }
        st.pods.remove(&(namespace.to_string(), name.to_string())).ok_or_else(|| anyhow!("pods \"{}\" not found", name))?;
        st.ops.push(Op::Delete { kind: ObjectKind::Pod, namespace: namespace.to_string(), name: name.to_string() });
        Ok(())
    }

    async fn get_pod(&self, namespace: &str, name: &str) -> Result<Option<Pod>> {
        Ok(self.lock().pods.get(&(namespace.to_string(), name.to_string())).cloned())
    }

    async fn create_service(&self, namespace: &str, service: &Service) -> Result<Service> {
        let mut st = self.lock();
        if st.fail_creates == Some(ObjectKind::Service) { return Err(anyhow!("admission denied service create")); }
        let created = self.admit(&mut st, namespace, service.clone());
        let name = created.metadata.name.clone().unwrap_or_default();
        let key = (namespace.to_string(), name.clone());
        if st.services.contains_key(&key) { return Err(anyhow!("services \"{}\" already exists", name)); }
        st.services.insert(key, created.clone());
        st.ops.push(Op::Create { kind: ObjectKind::Service, namespace: namespace.to_string(), name: name.clone() });
        debug!(ns = %namespace, service = %name, "memory: service created");
        Ok(created)
    }

    async fn delete_service(&self, namespace: &str, name: &str) -> Result<()> {
        let mut st = self.lock();
        if st.fail_deletes == Some(ObjectKind::Service) { return Err(anyhow!("admission denied service delete")); }
        st.services.remove(&(namespace.to_string(), name.to_string())).ok_or_else(|| anyhow!("services \"{}\" not found", name))?;
        st.ops.push(Op::Delete { kind: ObjectKind::Service, namespace: namespace.to_string(), name: name.to_string() });
        Ok(())
    }
}
