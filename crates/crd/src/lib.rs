//! CRD version handling: detect which `apiextensions.k8s.io` version a manifest
//! uses, and decide whether a storage-version change needs a migration pass.

#![forbid(unsafe_code)]

use std::collections::BTreeSet;

use k8s_openapi::apiextensions_apiserver::pkg::apis::apiextensions::v1 as apiextv1;
use serde::Deserialize;
use thiserror::Error;
use tracing::debug;

pub mod v1beta1;

pub use v1beta1::CustomResourceDefinition as V1beta1Crd;

/// Deprecated `apiextensions.k8s.io/v1beta1` CRD version tag.
pub const V1BETA1_VERSION: &str = "v1beta1";
/// Current `apiextensions.k8s.io/v1` CRD version tag.
pub const V1_VERSION: &str = "v1";

const SUPPORTED_CRD_VERSIONS: [&str; 2] = [V1BETA1_VERSION, V1_VERSION];

#[derive(Debug, Error)]
pub enum CrdError {
    #[error("empty CRD manifest")]
    Manifest,
    #[error("decoding CRD manifest: {0}")]
    Decode(#[source] serde_yaml::Error),
    #[error("CRD APIVersion from manifest not supported: {0}")]
    UnsupportedVersion(String),
}

/// One entry of `spec.versions`, reduced to what storage decisions need.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CrdVersion<'a> {
    pub name: &'a str,
    pub storage: bool,
}

/// Version metadata common to every CRD schema variant.
pub trait CrdVersions {
    /// `spec.versions` in declaration order.
    fn versions(&self) -> Vec<CrdVersion<'_>>;

    /// `status.storedVersions`; empty for a CRD that was never persisted.
    fn stored_versions(&self) -> Vec<&str>;

    /// Names flagged `storage: true`. Normally a single name, but not assumed.
    fn storage_versions(&self) -> BTreeSet<&str> {
        self.versions().into_iter().filter(|v| v.storage).map(|v| v.name).collect()
    }
}

impl CrdVersions for apiextv1::CustomResourceDefinition {
    fn versions(&self) -> Vec<CrdVersion<'_>> {
        self.spec.versions.iter().map(|v| CrdVersion { name: v.name.as_str(), storage: v.storage }).collect()
    }

    fn stored_versions(&self) -> Vec<&str> {
        self.status
            .as_ref()
            .and_then(|s| s.stored_versions.as_ref())
            .map(|vs| vs.iter().map(String::as_str).collect())
            .unwrap_or_default()
    }
}

/// A CRD decoded from a manifest of either supported API version.
#[derive(Debug, Clone)]
pub enum AnyCrd {
    V1(Box<apiextv1::CustomResourceDefinition>),
    V1beta1(Box<V1beta1Crd>),
}

impl AnyCrd {
    pub fn api_version(&self) -> &'static str {
        match self {
            AnyCrd::V1(_) => V1_VERSION,
            AnyCrd::V1beta1(_) => V1BETA1_VERSION,
        }
    }

    pub fn name(&self) -> Option<&str> {
        match self {
            AnyCrd::V1(c) => c.metadata.name.as_deref(),
            AnyCrd::V1beta1(c) => c.metadata.name.as_deref(),
        }
    }
}

impl CrdVersions for AnyCrd {
    fn versions(&self) -> Vec<CrdVersion<'_>> {
        match self {
            AnyCrd::V1(c) => c.versions(),
            AnyCrd::V1beta1(c) => c.versions(),
        }
    }

    fn stored_versions(&self) -> Vec<&str> {
        match self {
            AnyCrd::V1(c) => c.stored_versions(),
            AnyCrd::V1beta1(c) => c.stored_versions(),
        }
    }
}

fn first_document(manifest: &str) -> Result<serde_yaml::Value, CrdError> {
    // YAML is a superset of JSON, so one decoder covers both.
    match serde_yaml::Deserializer::from_str(manifest).next() {
        Some(doc) => serde_yaml::Value::deserialize(doc).map_err(CrdError::Decode),
        None => Ok(serde_yaml::Value::Null),
    }
}

fn version_of(doc: &serde_yaml::Value) -> Result<String, CrdError> {
    let api_version = doc.get("apiVersion").and_then(|v| v.as_str()).unwrap_or("");
    // `group/version` or bare `version`; anything with more slashes has no version.
    let version = match api_version.split_once('/') {
        Some((_, v)) if v.contains('/') => "",
        Some((_, v)) => v,
        None => api_version,
    };
    if !SUPPORTED_CRD_VERSIONS.contains(&version) {
        return Err(CrdError::UnsupportedVersion(version.to_string()));
    }
    Ok(version.to_string())
}

/// Determine whether a CRD manifest is `v1` or `v1beta1` from its `apiVersion`.
/// Nothing else in the document is validated.
pub fn detect_api_version(manifest: Option<&str>) -> Result<String, CrdError> {
    let manifest = manifest.ok_or(CrdError::Manifest)?;
    version_of(&first_document(manifest)?)
}

/// Decode a CRD manifest into the variant matching its `apiVersion`.
pub fn parse_crd(manifest: Option<&str>) -> Result<AnyCrd, CrdError> {
    let manifest = manifest.ok_or(CrdError::Manifest)?;
    let doc = first_document(manifest)?;
    let version = version_of(&doc)?;
    if version == V1_VERSION {
        let crd: apiextv1::CustomResourceDefinition = serde_yaml::from_value(doc).map_err(CrdError::Decode)?;
        Ok(AnyCrd::V1(Box::new(crd)))
    } else {
        let crd: V1beta1Crd = serde_yaml::from_value(doc).map_err(CrdError::Decode)?;
        Ok(AnyCrd::V1beta1(Box::new(crd)))
    }
}

/// Whether replacing `old` with `new` changes the storage version to one the
/// cluster has never persisted objects under. When true, existing custom
/// resources must be rewritten at the new storage version.
///
/// A CRD with no stored versions yet (freshly created) also yields true.
pub fn needs_storage_migration<O, N>(old: &O, new: &N) -> bool
where
    O: CrdVersions + ?Sized,
    N: CrdVersions + ?Sized,
{
    let new_storage = new.storage_versions();
    let old_stored = old.stored_versions();
    let overlap = old_stored.iter().any(|name| new_storage.contains(name));
    debug!(old_stored = ?old_stored, new_storage = ?new_storage, migrate = !overlap, "storage migration decision");
    !overlap
}

/// The first version flagged as storage, if any.
pub fn get_new_storage_version<C: CrdVersions + ?Sized>(crd: &C) -> Option<String> {
    crd.versions().into_iter().find(|v| v.storage).map(|v| v.name.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn v1(versions: &[(&str, bool)], stored: &[&str]) -> apiextv1::CustomResourceDefinition {
        let versions: Vec<_> = versions
            .iter()
            .map(|(n, s)| serde_json::json!({"name": n, "served": true, "storage": s}))
            .collect();
        serde_json::from_value(serde_json::json!({
            "apiVersion": "apiextensions.k8s.io/v1",
            "kind": "CustomResourceDefinition",
            "metadata": {"name": "widgets.example.com"},
            "spec": {
                "group": "example.com",
                "names": {"kind": "Widget", "plural": "widgets"},
                "scope": "Namespaced",
                "versions": versions,
            },
            "status": {
                "acceptedNames": {"kind": "Widget", "plural": "widgets"},
                "storedVersions": stored,
            },
        }))
        .unwrap()
    }

    #[test]
    fn migration_not_needed_when_storage_already_stored() {
        let old = v1(&[("v1alpha1", false), ("v1", true)], &["v1alpha1", "v1"]);
        let new = v1(&[("v1alpha1", false), ("v1", true)], &[]);
        assert!(!needs_storage_migration(&old, &new));
    }

    #[test]
    fn migration_needed_when_storage_version_is_new() {
        let old = v1(&[("v1alpha1", true)], &["v1alpha1"]);
        let new = v1(&[("v1alpha1", false), ("v1", true)], &[]);
        assert!(needs_storage_migration(&old, &new));
    }

    #[test]
    fn migration_needed_for_never_stored_crd() {
        let old = v1(&[("v1", true)], &[]);
        let new = v1(&[("v1", true)], &[]);
        assert!(needs_storage_migration(&old, &new));
    }

    #[test]
    fn multiple_storage_flags_are_tolerated() {
        let old = v1(&[("v1", true)], &["v1"]);
        let new = v1(&[("v1", true), ("v2", true)], &[]);
        assert_eq!(new.storage_versions().len(), 2);
        assert!(!needs_storage_migration(&old, &new));
    }

    #[test]
    fn new_storage_version_is_first_flagged() {
        let crd = v1(&[("v1", false), ("v2", true)], &[]);
        assert_eq!(get_new_storage_version(&crd).as_deref(), Some("v2"));
        let none = v1(&[("v1", false), ("v2", false)], &[]);
        assert_eq!(get_new_storage_version(&none), None);
    }

    #[test]
    fn detect_version_rejects_unknown_and_missing() {
        assert!(matches!(detect_api_version(None), Err(CrdError::Manifest)));
        let v2 = "apiVersion: apiextensions.k8s.io/v2\nkind: CustomResourceDefinition\n";
        match detect_api_version(Some(v2)) {
            Err(CrdError::UnsupportedVersion(v)) => assert_eq!(v, "v2"),
            other => panic!("unexpected: {:?}", other),
        }
        assert!(matches!(detect_api_version(Some("kind: Foo\n")), Err(CrdError::UnsupportedVersion(_))));
        assert!(matches!(detect_api_version(Some("apiVersion: [unclosed")), Err(CrdError::Decode(_))));
    }

    #[test]
    fn detect_version_rejects_malformed_group_version() {
        match detect_api_version(Some("apiVersion: apiextensions.k8s.io/extra/v1
")) {
            Err(CrdError::UnsupportedVersion(v)) => assert_eq!(v, ""),
            other => panic!("unexpected: {:?}", other),
        }
        assert_eq!(detect_api_version(Some("apiVersion: v1beta1
")).unwrap(), "v1beta1");
    }
}
