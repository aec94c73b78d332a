//! Cluster provisioning through crossplane claims and node pools
use k8s_openapi::apimachinery::pkg::apis::meta::v1::LabelSelector;
use kube::{
    api::{Api, DynamicObject},
    Client,
};
use std::collections::BTreeMap;
use tracing::{debug, warn};

use crate::{
    config::{Config, CLASS_NAME_LABEL, EXTERNAL_NAME_ANNOTATION, INITIAL_NODE_COUNT, NODE_POOL_SECRET_SUFFIX},
    crd::{ClusterState, Environment},
    resources::{
        cluster_class_resource, ClusterClass, KubernetesCluster, KubernetesClusterSpec, NameRef, NodePool,
        NodePoolParameters, NodePoolSpec, SecretRef,
    },
    store::{ensure, Ensured, ObjectStore},
    Error, Result,
};

/// Creates and observes the claim and node pool backing an environment
pub struct ClusterProvisioner {
    claims: Box<dyn ObjectStore<KubernetesCluster>>,
    node_pools: Box<dyn ObjectStore<NodePool>>,
    classes: Box<dyn ObjectStore<DynamicObject>>,
    namespace: String,
}

impl ClusterProvisioner {
    pub fn new(client: Client, config: &Config) -> Self {
        Self::with_stores(
            Box::new(Api::<KubernetesCluster>::namespaced(
                client.clone(),
                &config.crossplane_namespace,
            )),
            Box::new(Api::<NodePool>::all(client.clone())),
            Box::new(Api::<DynamicObject>::all_with(client, &cluster_class_resource())),
            &config.crossplane_namespace,
        )
    }

    pub fn with_stores(
        claims: Box<dyn ObjectStore<KubernetesCluster>>,
        node_pools: Box<dyn ObjectStore<NodePool>>,
        classes: Box<dyn ObjectStore<DynamicObject>>,
        namespace: &str,
    ) -> Self {
        Self {
            claims,
            node_pools,
            classes,
            namespace: namespace.to_string(),
        }
    }

    /// Look up the cluster class an environment selects
    pub async fn resolve_cluster_class(&self, name: &str) -> Result<ClusterClass> {
        match self.classes.get(name).await? {
            Some(obj) => ClusterClass::try_from(obj),
            None => Err(Error::ClusterClassNotFound(name.to_string())),
        }
    }

    /// Current state of the claim for `cluster_name`
    ///
    /// Probe failures are reported as an unbound cluster rather than an error.
    pub async fn observe_claim(&self, cluster_name: &str) -> ClusterState {
        match self.claims.get(cluster_name).await {
            Ok(Some(claim)) => {
                debug!(cluster = cluster_name, phase = ?claim.binding_phase(), "observed cluster claim");
                ClusterState {
                    bound: claim.is_bound(),
                    binding_phase: claim.binding_phase().map(String::from),
                    managed_resource: claim.managed_resource().map(String::from),
                }
            }
            Ok(None) => {
                debug!(cluster = cluster_name, "cluster claim does not exist yet");
                ClusterState::default()
            }
            Err(err) => {
                warn!(cluster = cluster_name, error = %err, "could not get cluster claim");
                ClusterState::default()
            }
        }
    }

    pub async fn is_bound(&self, cluster_name: &str) -> bool {
        self.observe_claim(cluster_name).await.bound
    }

    /// The claim requesting a cluster of the environment's class
    pub fn build_cluster_claim(&self, env: &Environment) -> KubernetesCluster {
        let cluster_name = &env.spec.cluster_name;
        let mut claim = KubernetesCluster::new(cluster_name, KubernetesClusterSpec {
            class_selector: Some(LabelSelector {
                match_labels: Some(BTreeMap::from([(
                    CLASS_NAME_LABEL.to_string(),
                    env.spec.cluster_class_label.clone(),
                )])),
                ..LabelSelector::default()
            }),
            write_connection_secret_to_ref: Some(NameRef {
                name: cluster_name.clone(),
            }),
            resource_ref: None,
        });
        claim.metadata.namespace = Some(self.namespace.clone());
        claim.metadata.annotations = Some(BTreeMap::from([(
            EXTERNAL_NAME_ANNOTATION.to_string(),
            cluster_name.clone(),
        )]));
        claim
    }

    /// Create the claim unless it exists, returning its latest state
    pub async fn ensure_cluster_claim(&self, env: &Environment) -> Result<Ensured<KubernetesCluster>> {
        ensure(self.claims.as_ref(), self.build_cluster_claim(env), env).await
    }

    /// The node pool for a claimed cluster
    ///
    /// `managed_resource` is the name of the provider specific cluster the claim was bound to.
    pub fn build_node_pool(&self, env: &Environment, class: &ClusterClass, managed_resource: &str) -> NodePool {
        let cluster_name = &env.spec.cluster_name;
        NodePool::new(cluster_name, NodePoolSpec {
            provider_ref: NameRef {
                name: class.provider.clone(),
            },
            write_connection_secret_to_ref: Some(SecretRef {
                name: format!("{cluster_name}{NODE_POOL_SECRET_SUFFIX}"),
                namespace: self.namespace.clone(),
            }),
            for_provider: NodePoolParameters {
                cluster_ref: Some(NameRef {
                    name: managed_resource.to_string(),
                }),
                initial_node_count: Some(INITIAL_NODE_COUNT),
            },
        })
    }

    pub async fn ensure_node_pool(
        &self,
        env: &Environment,
        class: &ClusterClass,
        managed_resource: &str,
    ) -> Result<Ensured<NodePool>> {
        let desired = self.build_node_pool(env, class, managed_resource);
        ensure(self.node_pools.as_ref(), desired, env).await
    }
}
