//! The `Environment` custom resource
use chrono::{DateTime, Utc};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::OwnerReference;
use kube::{CustomResource, Resource};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::{
    ttl::{Ttl, TtlError},
    Error, Result,
};

/// Desired state of an ephemeral development environment
///
/// An environment is a provisioned cluster with a source application and its
/// dependencies deployed onto it, optionally torn down after a ttl.
#[derive(CustomResource, Deserialize, Serialize, Clone, Debug, Default, PartialEq, JsonSchema)]
#[kube(
    group = "dev.vadasambar.github.io",
    version = "v1alpha1",
    kind = "Environment",
    status = "EnvironmentStatus",
    shortname = "env",
    printcolumn = r#"{"name":"Ready", "type":"boolean", "jsonPath":".status.ready"}"#,
    printcolumn = r#"{"name":"Cluster", "type":"string", "jsonPath":".spec.clusterName"}"#,
    printcolumn = r#"{"name":"TTL", "type":"string", "jsonPath":".spec.ttl"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct EnvironmentSpec {
    /// The main application
    pub source: AppSrc,

    /// Applications the main application needs, deployed from helm charts
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub dependencies: Vec<DependencySrc>,

    /// Selects the cluster class used to provision the cluster
    #[serde(default)]
    pub cluster_class_label: String,

    /// Name of the cluster to provision in the cloud provider
    #[serde(default)]
    pub cluster_name: String,

    /// How long the environment lives once ready, e.g. `2h`, `7d`
    ///
    /// The environment is deleted automatically once this is exceeded.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[schemars(regex(pattern = r"^(([0-9]+)m|([0-9]+)h|([0-9]+)d|([0-9]+)y)$"))]
    pub ttl: Option<String>,
}

/// Where the main application is deployed from
#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct AppSrc {
    #[schemars(length(min = 1))]
    pub name: String,

    #[serde(default)]
    pub namespace: String,

    #[schemars(length(min = 1))]
    pub path: String,

    #[schemars(length(min = 1))]
    pub revision: String,

    #[serde(rename = "repoURL")]
    #[schemars(length(min = 1))]
    pub repo_url: String,
}

/// Where a dependency chart is deployed from
#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct DependencySrc {
    #[schemars(length(min = 1))]
    pub name: String,

    #[serde(default)]
    pub namespace: String,

    #[schemars(length(min = 1))]
    pub revision: String,

    #[schemars(length(min = 1))]
    pub chart_name: String,

    #[serde(rename = "repoURL")]
    #[schemars(length(min = 1))]
    pub repo_url: String,
}

/// Observed state of an environment
#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct EnvironmentStatus {
    #[serde(default)]
    pub cluster_status: ClusterState,

    #[serde(default)]
    pub application_status: ApplicationState,

    #[serde(default)]
    pub dependency_status: Vec<ApplicationState>,

    /// Cluster bound and every application healthy and synced
    #[serde(default)]
    pub ready: bool,

    /// When the environment last became ready, only set while a ttl is configured
    ///
    /// Always serialized so that a merge patch clears it.
    #[serde(default)]
    pub ttl_start_timestamp: Option<DateTime<Utc>>,
}

/// Last observation of the cluster claim
///
/// Unobserved fields serialize as `null` so a merge patch clears them.
#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ClusterState {
    #[serde(default)]
    pub bound: bool,

    #[serde(default)]
    pub binding_phase: Option<String>,

    #[serde(default)]
    pub managed_resource: Option<String>,
}

/// Last observation of a gitops application
#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ApplicationState {
    #[serde(default)]
    pub name: String,

    #[serde(default)]
    pub ready: bool,

    #[serde(default)]
    pub health: Option<String>,

    #[serde(default)]
    pub sync: Option<String>,
}

impl Environment {
    /// The parsed ttl, `None` when unset or empty
    pub fn ttl(&self) -> Result<Option<Ttl>, TtlError> {
        match self.spec.ttl.as_deref() {
            None | Some("") => Ok(None),
            Some(ttl) => ttl.parse().map(Some),
        }
    }

    /// When the ttl timer was armed, if it is
    pub fn ttl_started(&self) -> Option<DateTime<Utc>> {
        self.status.as_ref().and_then(|s| s.ttl_start_timestamp)
    }

    /// Controller owner reference pointing at this environment
    ///
    /// Children carrying it are garbage collected when the environment is deleted.
    pub fn owner_reference(&self) -> Result<OwnerReference> {
        if self.meta().name.is_none() {
            return Err(Error::MissingObjectKey(".metadata.name"));
        }
        let owner = self
            .controller_owner_ref(&())
            .ok_or(Error::MissingObjectKey(".metadata.uid"))?;
        Ok(OwnerReference {
            block_owner_deletion: Some(true),
            ..owner
        })
    }
}
