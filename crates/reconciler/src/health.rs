use registry_core::CatalogSource;
use registry_kubehub::Lister;

use crate::lookup;

/// A source is healthy when a cached pod runs the declared image and its
/// service exists. The gRPC endpoint itself is not probed.
pub fn is_healthy(lister: &dyn Lister, source: &CatalogSource) -> bool {
    !lookup::current_pods_with_image(lister, source).is_empty() && lookup::current_service(lister, source).is_some()
}
