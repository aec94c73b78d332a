//! Operator configuration
use clap::Args;
use std::time::Duration;

/// Label on cluster classes matched by a claim's class selector
pub const CLASS_NAME_LABEL: &str = "className";
/// Annotation naming the cloud resource crossplane creates for a claim
pub const EXTERNAL_NAME_ANNOTATION: &str = "crossplane.io/external-name";
/// Argo CD project every application is created in
pub const DEFAULT_PROJECT: &str = "default";
/// Nodes in a freshly created node pool
///
/// Node pools are not part of cluster classes yet, so this is fixed.
pub const INITIAL_NODE_COUNT: i64 = 2;
/// Suffix of the connection secret written for a node pool
pub const NODE_POOL_SECRET_SUFFIX: &str = "-nodepool";

/// Namespaces and timings the controller runs with
#[derive(Args, Debug, Clone, PartialEq, Eq)]
pub struct Config {
    /// Namespace holding crossplane claims and connection secrets
    #[arg(long, env = "CROSSPLANE_NAMESPACE", default_value = "crossplane-system")]
    pub crossplane_namespace: String,

    /// Namespace argo cd watches for applications
    #[arg(long, env = "ARGOCD_NAMESPACE", default_value = "argocd")]
    pub argocd_namespace: String,

    /// Seconds between passes over a converged environment
    #[arg(long = "poll-interval-secs", env = "POLL_INTERVAL_SECS", default_value = "10", value_parser = parse_secs)]
    pub poll_interval: Duration,

    /// Seconds before retrying a failed or incomplete pass
    #[arg(long = "retry-delay-secs", env = "RETRY_DELAY_SECS", default_value = "2", value_parser = parse_secs)]
    pub retry_delay: Duration,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            crossplane_namespace: "crossplane-system".into(),
            argocd_namespace: "argocd".into(),
            poll_interval: Duration::from_secs(10),
            retry_delay: Duration::from_secs(2),
        }
    }
}

fn parse_secs(s: &str) -> Result<Duration, std::num::ParseIntError> {
    s.parse().map(Duration::from_secs)
}
