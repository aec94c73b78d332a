//! Wiring the reconcile engine into a kube-runtime controller
use chrono::Utc;
use futures::StreamExt;
use kube::{
    api::{Api, ListParams},
    runtime::{controller::Action, watcher, Controller},
    Client, ResourceExt,
};
use std::{sync::Arc, time::Duration};
use tracing::{debug, info, warn};

use crate::{
    config::Config,
    crd::Environment,
    reconciler::{Pass, Reconciler, Requeue},
    Result,
};

/// Shared state handed to every reconcile call
pub struct Context {
    reconciler: Reconciler,
    retry_delay: Duration,
}

impl Context {
    pub fn new(reconciler: Reconciler, retry_delay: Duration) -> Self {
        Self {
            reconciler,
            retry_delay,
        }
    }
}

impl Pass {
    /// Translate a pass into what the controller schedules next
    pub fn into_action(self, retry_delay: Duration) -> Result<Action> {
        if let Some(err) = self.error {
            return Err(err);
        }
        Ok(match self.requeue {
            Requeue::Immediate => Action::requeue(retry_delay),
            Requeue::After(delay) => Action::requeue(delay),
            Requeue::Never => Action::await_change(),
        })
    }
}

async fn reconcile(env: Arc<Environment>, ctx: Arc<Context>) -> Result<Action> {
    ctx.reconciler
        .reconcile(&env.name_any(), Utc::now())
        .await
        .into_action(ctx.retry_delay)
}

/// The controller triggers this on reconcile errors
fn error_policy(env: Arc<Environment>, error: &crate::Error, ctx: Arc<Context>) -> Action {
    warn!(environment = %env.name_any(), %error, "reconcile failed, retrying");
    Action::requeue(ctx.retry_delay)
}

/// Run the controller until a termination signal arrives
pub async fn run(client: Client, config: Config) -> Result<()> {
    let environments = Api::<Environment>::all(client.clone());
    // fail early when the crd is not installed
    environments.list(&ListParams::default().limit(1)).await?;

    let ctx = Arc::new(Context::new(
        Reconciler::new(client, &config),
        config.retry_delay,
    ));

    info!(
        crossplane_namespace = %config.crossplane_namespace,
        argocd_namespace = %config.argocd_namespace,
        "starting environment controller"
    );
    // children are polled rather than watched, see Requeue::After
    Controller::new(environments, watcher::Config::default())
        .shutdown_on_signal()
        .run(reconcile, error_policy, ctx)
        .for_each(|res| async move {
            match res {
                Ok((obj, action)) => debug!(environment = %obj.name, ?action, "reconciled"),
                Err(err) => warn!("reconcile failed: {err}"),
            }
        })
        .await;
    info!("controller shut down");
    Ok(())
}
