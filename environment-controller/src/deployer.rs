//! Deploying applications through argo cd
use kube::{Api, Client};
use tracing::{debug, warn};

use crate::{
    config::{Config, DEFAULT_PROJECT},
    crd::{ApplicationState, DependencySrc, Environment},
    resources::{
        Application, ApplicationDestination, ApplicationSource, ApplicationSpec, SyncPolicy,
        SyncPolicyAutomated,
    },
    store::{ensure, Ensured, ObjectStore},
    Result,
};

/// Creates and observes argo cd applications for an environment
pub struct AppDeployer {
    apps: Box<dyn ObjectStore<Application>>,
    namespace: String,
}

impl AppDeployer {
    pub fn new(client: Client, config: &Config) -> Self {
        Self::with_store(
            Box::new(Api::<Application>::namespaced(client, &config.argocd_namespace)),
            &config.argocd_namespace,
        )
    }

    pub fn with_store(apps: Box<dyn ObjectStore<Application>>, namespace: &str) -> Self {
        Self {
            apps,
            namespace: namespace.to_string(),
        }
    }

    pub async fn exists(&self, name: &str) -> Result<bool> {
        Ok(self.apps.get(name).await?.is_some())
    }

    /// Health and sync of an application
    ///
    /// A missing or unreadable application is reported as not ready.
    pub async fn observe(&self, name: &str) -> ApplicationState {
        let app = match self.apps.get(name).await {
            Ok(Some(app)) => app,
            Ok(None) => {
                debug!(application = name, "application does not exist yet");
                return ApplicationState {
                    name: name.to_string(),
                    ..ApplicationState::default()
                };
            }
            Err(err) => {
                warn!(application = name, error = %err, "could not get application");
                return ApplicationState {
                    name: name.to_string(),
                    ..ApplicationState::default()
                };
            }
        };
        debug!(application = name, health = ?app.health(), sync = ?app.sync(), "observed application");
        ApplicationState {
            name: name.to_string(),
            ready: app.is_ready(),
            health: app.health().map(String::from),
            sync: app.sync().map(String::from),
        }
    }

    pub async fn is_ready(&self, name: &str) -> bool {
        self.observe(name).await.ready
    }

    /// The application deploying the environment's source from a git path
    pub fn build_source_application(&self, env: &Environment) -> Application {
        let source = &env.spec.source;
        self.application(
            &source.name,
            ApplicationSource {
                repo_url: source.repo_url.clone(),
                path: Some(source.path.clone()),
                chart: None,
                target_revision: source.revision.clone(),
            },
            &source.namespace,
            &env.spec.cluster_name,
        )
    }

    /// The application deploying a dependency from a helm chart
    pub fn build_dependency_application(&self, dep: &DependencySrc, cluster_name: &str) -> Application {
        self.application(
            &dep.name,
            ApplicationSource {
                repo_url: dep.repo_url.clone(),
                path: None,
                chart: Some(dep.chart_name.clone()),
                target_revision: dep.revision.clone(),
            },
            &dep.namespace,
            cluster_name,
        )
    }

    fn application(&self, name: &str, source: ApplicationSource, namespace: &str, cluster_name: &str) -> Application {
        let mut app = Application::new(name, ApplicationSpec {
            source,
            destination: ApplicationDestination {
                namespace: namespace.to_string(),
                name: cluster_name.to_string(),
            },
            project: DEFAULT_PROJECT.to_string(),
            sync_policy: Some(SyncPolicy {
                automated: Some(SyncPolicyAutomated {
                    prune: true,
                    self_heal: true,
                }),
            }),
        });
        app.metadata.namespace = Some(self.namespace.clone());
        app
    }

    /// Create `desired` owned by `owner` unless it exists
    pub async fn ensure(&self, desired: Application, owner: &Environment) -> Result<Ensured<Application>> {
        ensure(self.apps.as_ref(), desired, owner).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        error::api_error,
        fixtures::{app_with_status, environment, MemoryStore},
    };
    use assert_json_diff::assert_json_eq;
    use serde_json::json;

    fn deployer(apps: &MemoryStore<Application>) -> AppDeployer {
        AppDeployer::with_store(Box::new(apps.clone()), "argocd")
    }

    #[test]
    fn source_application_deploys_path_with_self_heal() {
        let env = environment("demo");
        let app = deployer(&MemoryStore::default()).build_source_application(&env);
        assert_json_eq!(
            serde_json::to_value(&app).unwrap(),
            json!({
                "apiVersion": "argoproj.io/v1alpha1",
                "kind": "Application",
                "metadata": { "name": "guestbook", "namespace": "argocd" },
                "spec": {
                    "source": {
                        "repoURL": "https://github.com/argoproj/argocd-example-apps.git",
                        "path": "guestbook",
                        "targetRevision": "HEAD"
                    },
                    "destination": { "namespace": "guestbook", "name": "demo-cluster" },
                    "project": "default",
                    "syncPolicy": { "automated": { "prune": true, "selfHeal": true } }
                }
            })
        );
    }

    #[test]
    fn dependency_application_deploys_chart() {
        let env = environment("demo");
        let dep = &env.spec.dependencies[0];
        let app = deployer(&MemoryStore::default()).build_dependency_application(dep, "demo-cluster");
        assert_json_eq!(
            serde_json::to_value(&app.spec).unwrap(),
            json!({
                "source": {
                    "repoURL": "https://charts.bitnami.com/bitnami",
                    "chart": "redis",
                    "targetRevision": "10.5.7"
                },
                "destination": { "namespace": "redis", "name": "demo-cluster" },
                "project": "default",
                "syncPolicy": { "automated": { "prune": true, "selfHeal": true } }
            })
        );
    }

    #[tokio::test]
    async fn readiness_needs_healthy_and_synced() {
        let apps = MemoryStore::default();
        apps.insert(app_with_status("guestbook", "Healthy", "Synced"));
        apps.insert(app_with_status("redis", "Progressing", "Synced"));
        let d = deployer(&apps);

        assert!(d.is_ready("guestbook").await);
        assert!(!d.is_ready("redis").await);
        assert!(!d.is_ready("postgres").await);
        assert_eq!(d.observe("redis").await, ApplicationState {
            name: "redis".into(),
            ready: false,
            health: Some("Progressing".into()),
            sync: Some("Synced".into()),
        });
    }

    #[tokio::test]
    async fn probe_failures_are_not_fatal() {
        let apps = MemoryStore::<Application>::default();
        apps.fail_gets_with(|| api_error(503, "ServiceUnavailable"));
        let d = deployer(&apps);
        assert!(!d.is_ready("guestbook").await);
        assert!(d.exists("guestbook").await.is_err());
    }

    #[tokio::test]
    async fn ensure_creates_once_with_owner() {
        let env = environment("demo");
        let apps = MemoryStore::default();
        let d = deployer(&apps);
        assert!(!d.exists("guestbook").await.unwrap());

        let created = d.ensure(d.build_source_application(&env), &env).await.unwrap();
        assert!(created.created());
        assert!(d.exists("guestbook").await.unwrap());
        let again = d.ensure(d.build_source_application(&env), &env).await.unwrap();
        assert!(!again.created());
        assert_eq!(apps.creates(), 1);

        let owners = apps.stored("guestbook").unwrap().metadata.owner_references.unwrap();
        assert_eq!(owners[0].name, "demo");
        assert_eq!(owners[0].kind, "Environment");
    }

    #[tokio::test]
    async fn ensure_tolerates_creation_races() {
        let env = environment("demo");
        let apps = MemoryStore::default();
        apps.race_next_create(app_with_status("guestbook", "Healthy", "Synced"));
        let d = deployer(&apps);

        let ensured = d.ensure(d.build_source_application(&env), &env).await.unwrap();
        assert!(!ensured.created());
        assert!(ensured.into_inner().is_ready());
    }
}
