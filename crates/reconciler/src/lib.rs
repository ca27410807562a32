//! Registry reconciler: converges the gRPC registry pod and service backing a
//! CatalogSource, and detects when a mutable image tag has moved.
//!
//! Requeueing, backoff and persisting the updated status are the caller's job.

#![forbid(unsafe_code)]

use registry_core::{CatalogSource, ReconcileError};

pub mod config;
pub mod decorator;
pub mod engine;
pub mod health;
mod lookup;
pub mod prober;

pub use config::ReconcilerConfig;
pub use engine::GrpcRegistryReconciler;
pub use lookup::{pod_image, pod_image_id};
pub use prober::{FreshnessProber, ProbeHandle, ProbePoll};

/// Ensures and checks the registry server for a CatalogSource.
#[async_trait::async_trait]
pub trait RegistryReconciler: Send + Sync {
    /// Converge the registry objects. On a (re)created pod the source's
    /// `status.registryService` is rewritten; the caller persists it.
    async fn ensure_registry_server(&self, source: &mut CatalogSource) -> Result<(), ReconcileError>;

    /// Whether the registry objects exist and run the declared image.
    fn check_registry_server(&self, source: &CatalogSource) -> bool;
}
