//! In-memory stores and sample objects for tests
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use kube::{Resource, ResourceExt};
use parking_lot::Mutex;
use serde_json::{Map, Value};
use std::{collections::BTreeMap, sync::Arc};

use crate::{
    crd::{AppSrc, DependencySrc, Environment, EnvironmentSpec, EnvironmentStatus},
    error::api_error,
    resources::{Application, ApplicationSpec, ApplicationStatus, HealthStatus, SyncStatus},
    store::{EnvironmentStore, ObjectStore},
    Error, Result,
};

type ErrorFn = fn() -> Error;

struct Inner<K> {
    objects: BTreeMap<String, K>,
    creates: usize,
    fail_gets: Option<ErrorFn>,
    fail_creates: BTreeMap<String, ErrorFn>,
    race: Option<K>,
}

/// A shared, name-keyed object store
pub struct MemoryStore<K>(Arc<Mutex<Inner<K>>>);

impl<K> Clone for MemoryStore<K> {
    fn clone(&self) -> Self {
        Self(self.0.clone())
    }
}

impl<K> Default for MemoryStore<K> {
    fn default() -> Self {
        Self(Arc::new(Mutex::new(Inner {
            objects: BTreeMap::new(),
            creates: 0,
            fail_gets: None,
            fail_creates: BTreeMap::new(),
            race: None,
        })))
    }
}

impl<K: Resource + Clone> MemoryStore<K> {
    pub fn insert(&self, obj: K) {
        self.0.lock().objects.insert(obj.name_any(), obj);
    }

    pub fn stored(&self, name: &str) -> Option<K> {
        self.0.lock().objects.get(name).cloned()
    }

    pub fn remove(&self, name: &str) -> Option<K> {
        self.0.lock().objects.remove(name)
    }

    pub fn names(&self) -> Vec<String> {
        self.0.lock().objects.keys().cloned().collect()
    }

    /// Successful creates so far
    pub fn creates(&self) -> usize {
        self.0.lock().creates
    }

    pub fn update(&self, name: &str, f: impl FnOnce(&mut K)) {
        if let Some(obj) = self.0.lock().objects.get_mut(name) {
            f(obj);
        }
    }

    pub fn fail_gets_with(&self, err: ErrorFn) {
        self.0.lock().fail_gets = Some(err);
    }

    pub fn fail_creates_of(&self, name: &str, err: ErrorFn) {
        self.0.lock().fail_creates.insert(name.to_string(), err);
    }

    /// Let another writer create `obj` just before our next create
    pub fn race_next_create(&self, obj: K) {
        self.0.lock().race = Some(obj);
    }
}

#[async_trait]
impl<K> ObjectStore<K> for MemoryStore<K>
where
    K: Resource + Clone + Send + Sync + 'static,
{
    async fn get(&self, name: &str) -> Result<Option<K>> {
        let inner = self.0.lock();
        if let Some(err) = inner.fail_gets {
            return Err(err());
        }
        Ok(inner.objects.get(name).cloned())
    }

    async fn create(&self, obj: &K) -> Result<K> {
        let mut inner = self.0.lock();
        let name = obj.name_any();
        if let Some(err) = inner.fail_creates.get(&name) {
            return Err(err());
        }
        if let Some(winner) = inner.race.take() {
            inner.objects.insert(winner.name_any(), winner);
        }
        if inner.objects.contains_key(&name) {
            return Err(api_error(409, "AlreadyExists"));
        }
        inner.creates += 1;
        inner.objects.insert(name, obj.clone());
        Ok(obj.clone())
    }
}

/// Environments with status writes and deletes recorded
#[derive(Clone, Default)]
pub struct MemoryEnvironments {
    pub envs: MemoryStore<Environment>,
    status_writes: Arc<Mutex<Vec<EnvironmentStatus>>>,
    deletes: Arc<Mutex<Vec<String>>>,
    fail_status: Arc<Mutex<Option<ErrorFn>>>,
}

impl MemoryEnvironments {
    pub fn with(env: Environment) -> Self {
        let store = Self::default();
        store.envs.insert(env);
        store
    }

    pub fn status(&self, name: &str) -> Option<EnvironmentStatus> {
        self.envs.stored(name).and_then(|env| env.status)
    }

    pub fn status_writes(&self) -> usize {
        self.status_writes.lock().len()
    }

    pub fn deletes(&self) -> Vec<String> {
        self.deletes.lock().clone()
    }

    pub fn fail_status_with(&self, err: ErrorFn) {
        *self.fail_status.lock() = Some(err);
    }
}

#[async_trait]
impl EnvironmentStore for MemoryEnvironments {
    async fn get(&self, name: &str) -> Result<Option<Environment>> {
        ObjectStore::get(&self.envs, name).await
    }

    async fn publish_status(&self, env: &Environment, status: &EnvironmentStatus) -> Result<()> {
        if let Some(err) = *self.fail_status.lock() {
            return Err(err());
        }
        self.status_writes.lock().push(status.clone());
        let patch = serde_json::to_value(status)?;
        self.envs.update(&env.name_any(), |stored| {
            let mut current = serde_json::to_value(&stored.status).unwrap_or(Value::Null);
            merge_patch(&mut current, &patch);
            stored.status = serde_json::from_value(current).ok();
        });
        Ok(())
    }

    async fn delete(&self, name: &str) -> Result<()> {
        self.deletes.lock().push(name.to_string());
        match self.envs.remove(name) {
            Some(_) => Ok(()),
            None => Err(api_error(404, "NotFound")),
        }
    }
}

/// Apply a json merge patch the way the api server does for status writes
pub fn merge_patch(target: &mut Value, patch: &Value) {
    let Value::Object(patch) = patch else {
        *target = patch.clone();
        return;
    };
    if !target.is_object() {
        *target = Value::Object(Map::new());
    }
    if let Value::Object(target) = target {
        for (key, value) in patch {
            if value.is_null() {
                target.remove(key);
            } else {
                merge_patch(target.entry(key.clone()).or_insert(Value::Null), value);
            }
        }
    }
}

/// An environment with one dependency and a one day ttl
pub fn environment(name: &str) -> Environment {
    let mut env = Environment::new(name, EnvironmentSpec {
        source: AppSrc {
            name: "guestbook".into(),
            namespace: "guestbook".into(),
            path: "guestbook".into(),
            revision: "HEAD".into(),
            repo_url: "https://github.com/argoproj/argocd-example-apps.git".into(),
        },
        dependencies: vec![DependencySrc {
            name: "redis".into(),
            namespace: "redis".into(),
            revision: "10.5.7".into(),
            chart_name: "redis".into(),
            repo_url: "https://charts.bitnami.com/bitnami".into(),
        }],
        cluster_class_label: "gke-standard".into(),
        cluster_name: format!("{name}-cluster"),
        ttl: Some("1d".into()),
    });
    env.metadata.uid = Some(format!("{name}-uid"));
    env.metadata.resource_version = Some("1".into());
    env
}

pub fn app_with_status(name: &str, health: &str, sync: &str) -> Application {
    let mut app = Application::new(name, ApplicationSpec::default());
    app.metadata.namespace = Some("argocd".into());
    app.status = Some(ApplicationStatus {
        health: HealthStatus {
            status: Some(health.into()),
        },
        sync: SyncStatus {
            status: Some(sync.into()),
        },
    });
    app
}

pub fn stamped(env: &mut Environment, at: DateTime<Utc>) {
    env.status.get_or_insert_with(EnvironmentStatus::default).ttl_start_timestamp = Some(at);
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn merge_patch_keeps_omitted_keys_and_drops_nulls() {
        let mut current = json!({
            "clusterStatus": { "bound": true, "bindingPhase": "Bound", "managedResource": "kc-1" },
            "dependencyStatus": [{ "name": "redis" }, { "name": "postgres" }]
        });
        merge_patch(&mut current, &json!({
            "clusterStatus": { "bound": false, "bindingPhase": null },
            "dependencyStatus": [{ "name": "redis" }]
        }));
        assert_eq!(current, json!({
            "clusterStatus": { "bound": false, "managedResource": "kc-1" },
            "dependencyStatus": [{ "name": "redis" }]
        }));
    }
}
