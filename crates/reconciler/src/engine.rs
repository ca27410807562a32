use std::sync::Arc;

use k8s_openapi::apimachinery::pkg::apis::meta::v1::Time;
use kube::ResourceExt;
use metrics::counter;
use registry_core::{
    CatalogSource, Clock, ObjectKind, ReconcileError, RegistryServiceStatus, REGISTRY_PORT, REGISTRY_PROTOCOL,
};
use registry_kubehub::{Lister, ObjectStore};
use tracing::{debug, info};

use crate::config::ReconcilerConfig;
use crate::prober::FreshnessProber;
use crate::{decorator, health, lookup, RegistryReconciler};

/// Keeps a gRPC registry pod and its service converged to a CatalogSource.
pub struct GrpcRegistryReconciler {
    lister: Arc<dyn Lister>,
    store: Arc<dyn ObjectStore>,
    clock: Arc<dyn Clock>,
    prober: FreshnessProber,
}

impl GrpcRegistryReconciler {
    pub fn new(lister: Arc<dyn Lister>, store: Arc<dyn ObjectStore>, clock: Arc<dyn Clock>, config: ReconcilerConfig) -> Self {
        let prober = FreshnessProber::new(Arc::clone(&lister), Arc::clone(&store), Arc::clone(&clock), config);
        Self { lister, store, clock, prober }
    }

    pub fn prober(&self) -> &FreshnessProber { &self.prober }

    async fn ensure_pod(&self, source: &CatalogSource, overwrite: bool) -> Result<(), ReconcileError> {
        let ns = source.namespace().unwrap_or_default();
        let current = lookup::current_pods(self.lister.as_ref(), source);
        if !current.is_empty() {
            if !overwrite {
                return Ok(());
            }
            for p in &current {
                let name = p.name_any();
                self.store
                    .delete_pod(&ns, &name)
                    .await
                    .map_err(|e| ReconcileError::ResourceDelete { kind: ObjectKind::Pod, name, source: e })?;
            }
            counter!("registry_pod_replaced_total", 1u64);
        }
        let pod = decorator::desired_pod(source);
        let created = self.store.create_pod(&ns, &pod).await.map_err(|e| ReconcileError::ResourceCreate {
            kind: ObjectKind::Pod,
            name: pod.metadata.generate_name.clone().unwrap_or_default(),
            source: e,
        })?;
        info!(ns = %ns, pod = %created.name_any(), image = %source.spec.image, replaced = current.len(), "registry pod created");
        Ok(())
    }

    async fn ensure_service(&self, source: &CatalogSource, overwrite: bool) -> Result<(), ReconcileError> {
        let service = decorator::desired_service(source);
        let ns = source.namespace().unwrap_or_default();
        let name = service.name_any();
        if lookup::current_service(self.lister.as_ref(), source).is_some() {
            if !overwrite {
                return Ok(());
            }
            self.store.delete_service(&ns, &name).await.map_err(|e| ReconcileError::ResourceDelete {
                kind: ObjectKind::Service,
                name: name.clone(),
                source: e,
            })?;
            counter!("registry_service_replaced_total", 1u64);
        }
        self.store.create_service(&ns, &service).await.map_err(|e| ReconcileError::ResourceCreate {
            kind: ObjectKind::Service,
            name: name.clone(),
            source: e,
        })?;
        info!(ns = %ns, service = %name, "registry service created");
        Ok(())
    }
}

#[async_trait::async_trait]
impl RegistryReconciler for GrpcRegistryReconciler {
    async fn ensure_registry_server(&self, source: &mut CatalogSource) -> Result<(), ReconcileError> {
        // First reconcile: recreate everything so objects match what this version would create.
        let overwrite = source.registry_service_status().is_none();
        let overwrite_pod = overwrite
            || lookup::current_pods_with_image(self.lister.as_ref(), source).is_empty()
            || self.prober.needs_refresh(source);
        debug!(source = %source.source_key(), overwrite, overwrite_pod, "ensuring registry server");

        if overwrite_pod {
            // A digest probed for the outgoing pod says nothing about its replacement.
            self.prober.stop(source);
        }

        self.ensure_pod(source, overwrite_pod).await?;
        self.ensure_service(source, overwrite).await?;

        if overwrite_pod {
            let service = decorator::desired_service(source);
            let port = service
                .spec
                .as_ref()
                .and_then(|s| s.ports.as_ref())
                .and_then(|p| p.first())
                .map(|p| p.port)
                .unwrap_or(REGISTRY_PORT);
            source.set_registry_service_status(RegistryServiceStatus {
                created_at: Time(self.clock.now()),
                protocol: REGISTRY_PROTOCOL.to_string(),
                service_name: service.name_any(),
                service_namespace: source.namespace().unwrap_or_default(),
                port: port.to_string(),
            });
        }
        Ok(())
    }

    fn check_registry_server(&self, source: &CatalogSource) -> bool {
        health::is_healthy(self.lister.as_ref(), source)
    }
}
