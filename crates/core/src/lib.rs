//! Registry core types: the CatalogSource resource, its registry status, and the
//! time source shared by the reconciler and the in-memory cluster.

#![forbid(unsafe_code)]

use std::time::Duration;

use k8s_openapi::apimachinery::pkg::apis::meta::v1::Time;
use kube::{CustomResource, ResourceExt};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::warn;

pub mod clock;
pub mod error;

pub use clock::{Clock, ManualClock, SystemClock};
pub use error::{ObjectKind, ReconcileError};

/// Label identifying which CatalogSource owns a registry pod or service.
pub const CATALOG_SOURCE_LABEL_KEY: &str = "olm.catalogSource";
/// Port the registry server listens on, and the service exposes.
pub const REGISTRY_PORT: i32 = 50051;
pub const REGISTRY_PROTOCOL: &str = "grpc";
pub const REGISTRY_CONTAINER_NAME: &str = "registry-server";

/// Desired state of a registry-backed catalog.
#[derive(CustomResource, Debug, Clone, Default, Serialize, Deserialize)]
#[kube(
    group = "operators.coreos.com",
    version = "v1alpha1",
    kind = "CatalogSource",
    namespaced,
    status = "CatalogSourceStatus",
    schema = "disabled"
)]
#[serde(rename_all = "camelCase")]
pub struct CatalogSourceSpec {
    /// Registry image serving the catalog over gRPC.
    pub image: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub poll: Option<RegistryPoll>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
}

/// How often the registry image tag is checked for a new digest.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct RegistryPoll {
    /// Go-style duration, e.g. `45s`, `10m`, `1h30m`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub interval: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct CatalogSourceStatus {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub registry_service: Option<RegistryServiceStatus>,
}

/// Where the registry server for a CatalogSource can be reached.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct RegistryServiceStatus {
    pub created_at: Time,
    pub protocol: String,
    pub service_name: String,
    pub service_namespace: String,
    pub port: String,
}

impl CatalogSource {
    /// `namespace/name`, unique per source across the cluster.
    pub fn source_key(&self) -> String {
        format!("{}/{}", self.namespace().unwrap_or_default(), self.name_any())
    }

    pub fn registry_service_status(&self) -> Option<&RegistryServiceStatus> {
        self.status.as_ref().and_then(|s| s.registry_service.as_ref())
    }

    pub fn set_registry_service_status(&mut self, rs: RegistryServiceStatus) {
        self.status.get_or_insert_with(CatalogSourceStatus::default).registry_service = Some(rs);
    }

    /// Configured poll interval; zero when polling is disabled or the value is unusable.
    pub fn poll_interval(&self) -> Duration {
        let raw = match self.spec.poll.as_ref().and_then(|p| p.interval.as_deref()) {
            Some(s) => s,
            None => return Duration::ZERO,
        };
        match parse_interval(raw) {
            Some(d) => d,
            None => {
                warn!(source = %self.source_key(), interval = %raw, "invalid poll interval; polling disabled");
                Duration::ZERO
            }
        }
    }
}

static INTERVAL_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^(?:(\d+)h)?(?:(\d+)m)?(?:(\d+)s)?$").expect("static interval regex"));

/// Parse the subset of Go durations used for poll intervals (`1h30m`, `10m`, `45s`, `0`).
pub fn parse_interval(s: &str) -> Option<Duration> {
    let s = s.trim();
    if s == "0" { return Some(Duration::ZERO); }
    if s.is_empty() { return None; }
    let caps = INTERVAL_RE.captures(s)?;
    let part = |i: usize, unit: u64| -> Option<u64> {
        match caps.get(i) {
            Some(m) => m.as_str().parse::<u64>().ok()?.checked_mul(unit),
            None => Some(0),
        }
    };
    let secs = part(1, 3600)?.checked_add(part(2, 60)?)?.checked_add(part(3, 1)?)?;
    Some(Duration::from_secs(secs))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn source(poll: Option<&str>) -> CatalogSource {
        let mut cs = CatalogSource::new("community", CatalogSourceSpec {
            image: "quay.io/example/catalog:latest".into(),
            poll: poll.map(|p| RegistryPoll { interval: Some(p.to_string()) }),
            display_name: None,
        });
        cs.metadata.namespace = Some("olm".into());
        cs
    }

    #[test]
    fn parse_interval_accepts_go_durations() {
        assert_eq!(parse_interval("45s"), Some(Duration::from_secs(45)));
        assert_eq!(parse_interval("10m"), Some(Duration::from_secs(600)));
        assert_eq!(parse_interval("1h30m"), Some(Duration::from_secs(5400)));
        assert_eq!(parse_interval("1h0m15s"), Some(Duration::from_secs(3615)));
        assert_eq!(parse_interval("0"), Some(Duration::ZERO));
        assert!(parse_interval("").is_none());
        assert!(parse_interval("10x").is_none());
        assert!(parse_interval("m").is_none());
    }

    #[test]
    fn poll_interval_defaults_to_zero() {
        assert_eq!(source(None).poll_interval(), Duration::ZERO);
        assert_eq!(source(Some("bogus")).poll_interval(), Duration::ZERO);
        assert_eq!(source(Some("15m")).poll_interval(), Duration::from_secs(900));
    }

    #[test]
    fn spec_decodes_from_manifest_fields() {
        let cs: CatalogSource = serde_json::from_value(serde_json::json!({
            "apiVersion": "operators.coreos.com/v1alpha1",
            "kind": "CatalogSource",
            "metadata": {"name": "community", "namespace": "olm"},
            "spec": {
                "image": "quay.io/example/catalog:latest",
                "displayName": "Community Operators",
                "poll": {"interval": "45s"}
            }
        }))
        .unwrap();
        assert_eq!(cs.spec.display_name.as_deref(), Some("Community Operators"));
        assert_eq!(cs.poll_interval(), Duration::from_secs(45));
        assert!(cs.registry_service_status().is_none());
    }

    #[test]
    fn status_roundtrips_with_wire_names() {
        let mut cs = source(None);
        assert!(cs.registry_service_status().is_none());
        cs.set_registry_service_status(RegistryServiceStatus {
            created_at: Time(chrono::DateTime::from_timestamp(1_600_000_000, 0).unwrap()),
            protocol: REGISTRY_PROTOCOL.into(),
            service_name: "community".into(),
            service_namespace: "olm".into(),
            port: REGISTRY_PORT.to_string(),
        });
        let v = serde_json::to_value(&cs).unwrap();
        assert_eq!(v["status"]["registryService"]["serviceNamespace"], "olm");
        assert_eq!(v["status"]["registryService"]["port"], "50051");
        assert_eq!(cs.source_key(), "olm/community");
    }
}
