//! Typed views of the external kinds the controller creates and observes
//!
//! Only the fields this controller reads or writes are modelled; the owning
//! operators (crossplane, argo cd) ship the authoritative schemas, so no schema
//! is derived here.
use k8s_openapi::apimachinery::pkg::apis::meta::v1::LabelSelector;
use kube::{
    api::{ApiResource, DynamicObject, GroupVersionKind},
    CustomResource, ResourceExt,
};
use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// Binding phase of a claim that has been matched to a managed resource
pub const BINDING_PHASE_BOUND: &str = "Bound";
/// Argo CD health status of a healthy application
pub const HEALTH_HEALTHY: &str = "Healthy";
/// Argo CD sync status of an application matching its source
pub const SYNC_SYNCED: &str = "Synced";

/// A reference to an object by name only
#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq)]
pub struct NameRef {
    pub name: String,
}

/// A reference to a secret in a specific namespace
#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq)]
pub struct SecretRef {
    pub name: String,
    pub namespace: String,
}

/// Crossplane portable claim for a kubernetes cluster
#[derive(CustomResource, Serialize, Deserialize, Clone, Debug, Default, PartialEq)]
#[kube(
    group = "compute.crossplane.io",
    version = "v1alpha1",
    kind = "KubernetesCluster",
    namespaced,
    status = "KubernetesClusterStatus",
    schema = "disabled"
)]
#[serde(rename_all = "camelCase")]
pub struct KubernetesClusterSpec {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub class_selector: Option<LabelSelector>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub write_connection_secret_to_ref: Option<NameRef>,

    /// Set by crossplane once the claim is bound to a managed cluster
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resource_ref: Option<NameRef>,
}

#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct KubernetesClusterStatus {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub binding_phase: Option<String>,
}

impl KubernetesCluster {
    pub fn binding_phase(&self) -> Option<&str> {
        self.status.as_ref()?.binding_phase.as_deref()
    }

    pub fn is_bound(&self) -> bool {
        self.binding_phase() == Some(BINDING_PHASE_BOUND)
    }

    /// Name of the provider specific cluster backing this claim, once known
    pub fn managed_resource(&self) -> Option<&str> {
        self.spec
            .resource_ref
            .as_ref()
            .map(|r| r.name.as_str())
            .filter(|name| !name.is_empty())
    }
}

/// Crossplane GKE node pool
#[derive(CustomResource, Serialize, Deserialize, Clone, Debug, Default, PartialEq)]
#[kube(
    group = "container.gcp.crossplane.io",
    version = "v1alpha1",
    kind = "NodePool",
    schema = "disabled"
)]
#[serde(rename_all = "camelCase")]
pub struct NodePoolSpec {
    pub provider_ref: NameRef,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub write_connection_secret_to_ref: Option<SecretRef>,

    pub for_provider: NodePoolParameters,
}

#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct NodePoolParameters {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cluster_ref: Option<NameRef>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub initial_node_count: Option<i64>,
}

/// Argo CD application
#[derive(CustomResource, Serialize, Deserialize, Clone, Debug, Default, PartialEq)]
#[kube(
    group = "argoproj.io",
    version = "v1alpha1",
    kind = "Application",
    namespaced,
    status = "ApplicationStatus",
    schema = "disabled"
)]
#[serde(rename_all = "camelCase")]
pub struct ApplicationSpec {
    pub source: ApplicationSource,
    pub destination: ApplicationDestination,
    pub project: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sync_policy: Option<SyncPolicy>,
}

#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ApplicationSource {
    #[serde(rename = "repoURL")]
    pub repo_url: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chart: Option<String>,

    #[serde(default)]
    pub target_revision: String,
}

#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ApplicationDestination {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub namespace: String,

    /// Name of the cluster as registered in argo cd
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub name: String,
}

#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SyncPolicy {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub automated: Option<SyncPolicyAutomated>,
}

#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SyncPolicyAutomated {
    #[serde(default)]
    pub prune: bool,
    #[serde(default)]
    pub self_heal: bool,
}

#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq)]
pub struct ApplicationStatus {
    #[serde(default)]
    pub health: HealthStatus,
    #[serde(default)]
    pub sync: SyncStatus,
}

#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq)]
pub struct HealthStatus {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
}

#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq)]
pub struct SyncStatus {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
}

impl Application {
    pub fn health(&self) -> Option<&str> {
        self.status.as_ref()?.health.status.as_deref()
    }

    pub fn sync(&self) -> Option<&str> {
        self.status.as_ref()?.sync.status.as_deref()
    }

    pub fn is_ready(&self) -> bool {
        self.health() == Some(HEALTH_HEALTHY) && self.sync() == Some(SYNC_SYNCED)
    }
}

/// Api resource for crossplane's cluster scoped GKE cluster classes
///
/// Classes keep their template outside of `spec`, so they are read dynamically.
pub fn cluster_class_resource() -> ApiResource {
    let gvk = GroupVersionKind::gvk("container.gcp.crossplane.io", "v1beta1", "GKEClusterClass");
    ApiResource::from_gvk_with_plural(&gvk, "gkeclusterclasses")
}

/// The parts of a resolved cluster class needed to provision node pools
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ClusterClass {
    pub name: String,
    pub provider: String,
}

impl TryFrom<DynamicObject> for ClusterClass {
    type Error = Error;

    fn try_from(obj: DynamicObject) -> Result<Self> {
        let name = obj.name_any();
        let provider = obj
            .data
            .pointer("/specTemplate/providerRef/name")
            .and_then(|v| v.as_str())
            .filter(|p| !p.is_empty())
            .ok_or_else(|| Error::MissingProviderRef(name.clone()))?;
        Ok(ClusterClass {
            provider: provider.to_string(),
            name,
        })
    }
}
