//! The reconciliation engine
//!
//! A pass loads one environment and runs a fixed pipeline of idempotent steps
//! against it. Each step either converges one part of the environment or
//! reports why it could not, and the first failing step ends the pipeline.
//! Status is published at the end of every pass that did not delete the
//! environment, so observations and ttl bookkeeping are persisted even when a
//! step failed.
//!
//! The engine keeps no state between passes; everything it needs is re-read
//! from the api server, so concurrent passes over different environments are
//! independent and a pass can be re-run at any point.
use chrono::{DateTime, Utc};
use kube::{Api, Client, ResourceExt};
use std::time::Duration;
use tracing::{debug, error, info, instrument, warn};

use crate::{
    config::Config,
    crd::Environment,
    deployer::AppDeployer,
    provisioner::ClusterProvisioner,
    resources::{ClusterClass, KubernetesCluster},
    status::{self, Observation},
    store::EnvironmentStore,
    ttl::{self, Expiry, Ttl},
    Error, Result,
};

/// When the environment should be looked at again
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Requeue {
    /// Retry as soon as the scheduler allows, something is failing or pending
    Immediate,
    /// Converged as far as possible, poll for changes made by other controllers
    After(Duration),
    /// The environment is gone
    Never,
}

/// The steps of a pass, in the order they run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    Expire,
    ResolveClass,
    EnsureClaim,
    EnsureSource,
    EnsureDependencies,
    EnsureNodePool,
    PublishStatus,
}

impl Step {
    /// Convergence steps, [`Step::PublishStatus`] always follows them
    pub const PIPELINE: [Step; 6] = [
        Step::Expire,
        Step::ResolveClass,
        Step::EnsureClaim,
        Step::EnsureSource,
        Step::EnsureDependencies,
        Step::EnsureNodePool,
    ];
}

/// What a step did
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepOutcome {
    /// Not applicable to this environment
    Skipped,
    /// Ran and found nothing to change
    Done,
    /// Created this many children
    Created(usize),
    /// Stamped the ttl start
    Armed,
    /// Waiting on another controller before it can act
    Pending,
    /// Deleted the environment
    Deleted,
    Failed,
}

/// Result of one reconcile pass
#[derive(Debug)]
pub struct Pass {
    pub requeue: Requeue,
    pub error: Option<Error>,
    pub steps: Vec<(Step, StepOutcome)>,
}

impl Pass {
    fn finished(requeue: Requeue) -> Self {
        Self {
            requeue,
            error: None,
            steps: Vec::new(),
        }
    }

    /// Outcome of `step`, `None` if it did not run
    pub fn outcome(&self, step: Step) -> Option<StepOutcome> {
        self.steps.iter().find(|(s, _)| *s == step).map(|(_, o)| *o)
    }
}

/// Everything learned so far in the current pass
struct PassState<'a> {
    env: &'a Environment,
    now: DateTime<Utc>,
    ttl: Option<Ttl>,
    ttl_start: Option<DateTime<Utc>>,
    class: Option<ClusterClass>,
    claim: Option<KubernetesCluster>,
}

/// Drives environments to convergence
pub struct Reconciler {
    environments: Box<dyn EnvironmentStore>,
    provisioner: ClusterProvisioner,
    deployer: AppDeployer,
    poll_interval: Duration,
}

impl Reconciler {
    pub fn new(client: Client, config: &Config) -> Self {
        Self::with_parts(
            Box::new(Api::<Environment>::all(client.clone())),
            ClusterProvisioner::new(client.clone(), config),
            AppDeployer::new(client, config),
            config.poll_interval,
        )
    }

    pub fn with_parts(
        environments: Box<dyn EnvironmentStore>,
        provisioner: ClusterProvisioner,
        deployer: AppDeployer,
        poll_interval: Duration,
    ) -> Self {
        Self {
            environments,
            provisioner,
            deployer,
            poll_interval,
        }
    }

    /// Run one pass over the environment `name` as of `now`
    #[instrument(skip(self, now))]
    pub async fn reconcile(&self, name: &str, now: DateTime<Utc>) -> Pass {
        let env = match self.environments.get(name).await {
            Ok(Some(env)) => env,
            Ok(None) => {
                debug!("environment no longer exists");
                return Pass::finished(Requeue::Never);
            }
            Err(err) => {
                error!(error = %err, "could not get environment");
                return Pass {
                    requeue: Requeue::Immediate,
                    error: Some(err),
                    steps: Vec::new(),
                };
            }
        };

        let mut state = PassState {
            env: &env,
            now,
            ttl: None,
            ttl_start: env.ttl_started(),
            class: None,
            claim: None,
        };
        let mut steps = Vec::with_capacity(Step::PIPELINE.len() + 1);
        let mut error = None;
        for step in Step::PIPELINE {
            match self.run_step(step, &mut state).await {
                Ok(StepOutcome::Deleted) => {
                    steps.push((step, StepOutcome::Deleted));
                    return Pass {
                        requeue: Requeue::Never,
                        error: None,
                        steps,
                    };
                }
                Ok(outcome) => steps.push((step, outcome)),
                Err(err) => {
                    error!(?step, error = %err, "reconcile step failed");
                    steps.push((step, StepOutcome::Failed));
                    error = Some(err);
                    break;
                }
            }
        }

        match self.publish_status(&state).await {
            Ok(()) => steps.push((Step::PublishStatus, StepOutcome::Done)),
            Err(err) => {
                error!(error = %err, "could not update environment status");
                steps.push((Step::PublishStatus, StepOutcome::Failed));
                error.get_or_insert(err);
            }
        }

        let pending = steps.iter().any(|(_, o)| *o == StepOutcome::Pending);
        let requeue = if error.is_some() || pending {
            Requeue::Immediate
        } else {
            Requeue::After(self.poll_interval)
        };
        Pass { requeue, error, steps }
    }

    async fn run_step(&self, step: Step, state: &mut PassState<'_>) -> Result<StepOutcome> {
        match step {
            Step::Expire => self.expire(state).await,
            Step::ResolveClass => self.resolve_class(state).await,
            Step::EnsureClaim => self.ensure_claim(state).await,
            Step::EnsureSource => self.ensure_source(state).await,
            Step::EnsureDependencies => self.ensure_dependencies(state).await,
            Step::EnsureNodePool => self.ensure_node_pool(state).await,
            Step::PublishStatus => self.publish_status(state).await.map(|()| StepOutcome::Done),
        }
    }

    async fn expire(&self, state: &mut PassState<'_>) -> Result<StepOutcome> {
        state.ttl = state.env.ttl()?;
        let Some(ttl) = state.ttl else {
            return Ok(StepOutcome::Skipped);
        };
        let ready = self.observe(state.env).await.is_ready();
        match ttl::evaluate(Some(&ttl), ready, state.ttl_start, state.now) {
            Expiry::Disabled | Expiry::Disarmed => Ok(StepOutcome::Skipped),
            Expiry::Arm(at) => {
                info!(%ttl, "environment is ready, starting ttl");
                state.ttl_start = Some(at);
                Ok(StepOutcome::Armed)
            }
            Expiry::Pending { remaining } => {
                debug!(%ttl, %remaining, "ttl not exceeded yet");
                Ok(StepOutcome::Done)
            }
            Expiry::Expired { elapsed } => {
                info!(%ttl, %elapsed, cluster = %state.env.spec.cluster_name, "environment exceeded its ttl, deleting");
                match self.environments.delete(&state.env.name_any()).await {
                    Ok(()) => Ok(StepOutcome::Deleted),
                    // owner reference cascades may already have removed it
                    Err(err) if err.is_not_found() => Ok(StepOutcome::Deleted),
                    Err(err) => Err(err),
                }
            }
        }
    }

    async fn resolve_class(&self, state: &mut PassState<'_>) -> Result<StepOutcome> {
        let class = self
            .provisioner
            .resolve_cluster_class(&state.env.spec.cluster_class_label)
            .await?;
        debug!(class = %class.name, provider = %class.provider, "resolved cluster class");
        state.class = Some(class);
        Ok(StepOutcome::Done)
    }

    async fn ensure_claim(&self, state: &mut PassState<'_>) -> Result<StepOutcome> {
        let ensured = self.provisioner.ensure_cluster_claim(state.env).await?;
        let outcome = if ensured.created() {
            info!(cluster = %state.env.spec.cluster_name, "created cluster claim");
            StepOutcome::Created(1)
        } else {
            StepOutcome::Done
        };
        state.claim = Some(ensured.into_inner());
        Ok(outcome)
    }

    async fn ensure_source(&self, state: &mut PassState<'_>) -> Result<StepOutcome> {
        let desired = self.deployer.build_source_application(state.env);
        let ensured = self.deployer.ensure(desired, state.env).await?;
        if ensured.created() {
            info!(source = %state.env.spec.source.name, "created source application");
            return Ok(StepOutcome::Created(1));
        }
        Ok(StepOutcome::Done)
    }

    /// Dependencies are independent, so every one is attempted before failing
    async fn ensure_dependencies(&self, state: &mut PassState<'_>) -> Result<StepOutcome> {
        let env = state.env;
        if env.spec.dependencies.is_empty() {
            return Ok(StepOutcome::Skipped);
        }
        let mut created = 0;
        let mut failures = Vec::new();
        for dep in &env.spec.dependencies {
            let desired = self
                .deployer
                .build_dependency_application(dep, &env.spec.cluster_name);
            match self.deployer.ensure(desired, env).await {
                Ok(ensured) if ensured.created() => {
                    info!(dependency = %dep.name, "created dependency application");
                    created += 1;
                }
                Ok(_) => {}
                Err(err) => {
                    warn!(dependency = %dep.name, error = %err, "could not ensure dependency application");
                    failures.push((dep.name.clone(), err));
                }
            }
        }
        if !failures.is_empty() {
            return Err(Error::Dependencies(failures));
        }
        Ok(match created {
            0 => StepOutcome::Done,
            n => StepOutcome::Created(n),
        })
    }

    /// Node pools attach to the managed cluster, which is only known once the claim is bound
    async fn ensure_node_pool(&self, state: &mut PassState<'_>) -> Result<StepOutcome> {
        let managed = state.claim.as_ref().and_then(|c| c.managed_resource());
        let (Some(class), Some(managed)) = (state.class.as_ref(), managed) else {
            debug!(cluster = %state.env.spec.cluster_name, "claim has no managed resource yet");
            return Ok(StepOutcome::Pending);
        };
        let ensured = self.provisioner.ensure_node_pool(state.env, class, managed).await?;
        if ensured.created() {
            info!(cluster = %state.env.spec.cluster_name, managed, "created node pool");
            return Ok(StepOutcome::Created(1));
        }
        Ok(StepOutcome::Done)
    }

    async fn publish_status(&self, state: &PassState<'_>) -> Result<()> {
        let observation = self.observe(state.env).await;
        // readiness may have been reached by the steps of this very pass
        let ttl_start = match (state.ttl, state.ttl_start) {
            (Some(ttl), None) if observation.is_ready() => {
                info!(%ttl, "environment is ready, starting ttl");
                Some(state.now)
            }
            (Some(_), start) => start,
            (None, _) => None,
        };
        let status = status::aggregate(observation, ttl_start);
        if !status.ready && state.env.ttl_started().is_some() {
            info!("environment is no longer ready, resetting ttl");
        }
        self.environments.publish_status(state.env, &status).await
    }

    async fn observe(&self, env: &Environment) -> Observation {
        let cluster = self.provisioner.observe_claim(&env.spec.cluster_name).await;
        let source = self.deployer.observe(&env.spec.source.name).await;
        let mut dependencies = Vec::with_capacity(env.spec.dependencies.len());
        for dep in &env.spec.dependencies {
            dependencies.push(self.deployer.observe(&dep.name).await);
        }
        Observation {
            cluster,
            source,
            dependencies,
        }
    }
}
