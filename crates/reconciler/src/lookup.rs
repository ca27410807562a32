//! Cache lookups for a source's registry objects. A failed read is logged and
//! reported as absence; callers cannot tell the two apart.

use k8s_openapi::api::core::v1::{Pod, Service};
use kube::ResourceExt;
use registry_core::CatalogSource;
use registry_kubehub::{selector_string, Lister};
use tracing::warn;

use crate::decorator;

pub(crate) fn current_service(lister: &dyn Lister, source: &CatalogSource) -> Option<Service> {
    let ns = source.namespace().unwrap_or_default();
    let name = source.name_any();
    match lister.get_service(&ns, &name) {
        Ok(svc) => svc,
        Err(e) => {
            warn!(service = %name, ns = %ns, error = %e, "couldn't find service in cache");
            None
        }
    }
}

pub(crate) fn current_pods(lister: &dyn Lister, source: &CatalogSource) -> Vec<Pod> {
    let ns = source.namespace().unwrap_or_default();
    let selector = decorator::selector(source);
    let pods = match lister.list_pods(&ns, &selector) {
        Ok(pods) => pods,
        Err(e) => {
            warn!(ns = %ns, error = %e, "couldn't find pod in cache");
            return Vec::new();
        }
    };
    if pods.len() > 1 {
        warn!(selector = %selector_string(&selector), count = pods.len(), "multiple pods found for selector");
    }
    pods
}

/// Selected pods whose first container runs exactly the declared image.
pub(crate) fn current_pods_with_image(lister: &dyn Lister, source: &CatalogSource) -> Vec<Pod> {
    let ns = source.namespace().unwrap_or_default();
    let pods = match lister.list_pods(&ns, &decorator::selector(source)) {
        Ok(pods) => pods,
        Err(e) => {
            warn!(ns = %ns, error = %e, "couldn't find pod in cache");
            return Vec::new();
        }
    };
    pods.into_iter().filter(|p| pod_image(p) == Some(source.spec.image.as_str())).collect()
}

pub fn pod_image(pod: &Pod) -> Option<&str> {
    pod.spec.as_ref()?.containers.first()?.image.as_deref()
}

/// Resolved image digest the kubelet reported for the first container, if any.
pub fn pod_image_id(pod: &Pod) -> Option<&str> {
    let id = pod.status.as_ref()?.container_statuses.as_ref()?.first()?.image_id.as_str();
    if id.is_empty() { None } else { Some(id) }
}
