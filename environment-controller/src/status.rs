//! Aggregating child observations into the environment status
use chrono::{DateTime, Utc};

use crate::crd::{ApplicationState, ClusterState, EnvironmentStatus};

/// What was seen of every child during one pass
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Observation {
    pub cluster: ClusterState,
    pub source: ApplicationState,
    pub dependencies: Vec<ApplicationState>,
}

impl Observation {
    /// Cluster bound, source ready and every dependency ready
    pub fn is_ready(&self) -> bool {
        self.cluster.bound && self.source.ready && self.dependencies.iter().all(|d| d.ready)
    }
}

/// Build the status to persist for this pass
///
/// `ttl_start` is the armed ttl timestamp, if any. It is dropped whenever the
/// environment is not ready so that the timer restarts on the next ready pass.
pub fn aggregate(observation: Observation, ttl_start: Option<DateTime<Utc>>) -> EnvironmentStatus {
    let ready = observation.is_ready();
    EnvironmentStatus {
        ready,
        ttl_start_timestamp: ttl_start.filter(|_| ready),
        cluster_status: observation.cluster,
        application_status: observation.source,
        dependency_status: observation.dependencies,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn ready_app(name: &str) -> ApplicationState {
        ApplicationState {
            name: name.into(),
            ready: true,
            health: Some("Healthy".into()),
            sync: Some("Synced".into()),
        }
    }

    fn all_ready() -> Observation {
        Observation {
            cluster: ClusterState {
                bound: true,
                binding_phase: Some("Bound".into()),
                managed_resource: Some("kubernetescluster-4f2a".into()),
            },
            source: ready_app("guestbook"),
            dependencies: vec![ready_app("redis"), ready_app("postgres")],
        }
    }

    #[test]
    fn ready_is_the_conjunction_of_children() {
        assert!(all_ready().is_ready());

        let mut unbound = all_ready();
        unbound.cluster.bound = false;
        assert!(!unbound.is_ready());

        let mut source = all_ready();
        source.source.ready = false;
        assert!(!source.is_ready());

        let mut dep = all_ready();
        dep.dependencies[1].ready = false;
        assert!(!dep.is_ready());

        let mut no_deps = all_ready();
        no_deps.dependencies.clear();
        assert!(no_deps.is_ready());
    }

    #[test]
    fn ttl_start_survives_only_while_ready() {
        let t = Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap();
        let status = aggregate(all_ready(), Some(t));
        assert!(status.ready);
        assert_eq!(status.ttl_start_timestamp, Some(t));
        assert_eq!(status.dependency_status.len(), 2);

        let mut degraded = all_ready();
        degraded.dependencies[0].ready = false;
        let status = aggregate(degraded, Some(t));
        assert!(!status.ready);
        assert_eq!(status.ttl_start_timestamp, None);
        assert!(status.cluster_status.bound);
    }
}
