//! Legacy `apiextensions.k8s.io/v1beta1` CRD shape. Only the fields storage
//! decisions read are modelled; everything else is ignored on decode.

use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use serde::{Deserialize, Serialize};

use crate::{CrdVersion, CrdVersions};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CustomResourceDefinition {
    #[serde(default)]
    pub metadata: ObjectMeta,
    #[serde(default)]
    pub spec: CustomResourceDefinitionSpec,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<CustomResourceDefinitionStatus>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CustomResourceDefinitionSpec {
    #[serde(default)]
    pub group: String,
    /// Pre-`versions` single version field.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    #[serde(default)]
    pub versions: Vec<CustomResourceDefinitionVersion>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CustomResourceDefinitionVersion {
    pub name: String,
    #[serde(default)]
    pub served: bool,
    #[serde(default)]
    pub storage: bool,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CustomResourceDefinitionStatus {
    #[serde(default)]
    pub stored_versions: Vec<String>,
}

impl CrdVersions for CustomResourceDefinition {
    /// Only `spec.versions`; the singular `spec.version` never marks a storage version.
    fn versions(&self) -> Vec<CrdVersion<'_>> {
        self.spec.versions.iter().map(|v| CrdVersion { name: v.name.as_str(), storage: v.storage }).collect()
    }

    fn stored_versions(&self) -> Vec<&str> {
        self.status.as_ref().map(|s| s.stored_versions.iter().map(String::as_str).collect()).unwrap_or_default()
    }
}
