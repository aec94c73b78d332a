//! Access to the objects the controller reads and writes
//!
//! The reconciler only ever needs to probe, create, delete and write status,
//! so those operations are expressed as small traits. [`Api`] implements them
//! against the api server.
use async_trait::async_trait;
use kube::{
    api::{Api, DeleteParams, Patch, PatchParams, PostParams},
    Resource, ResourceExt,
};
use serde::{de::DeserializeOwned, Serialize};
use serde_json::json;
use std::fmt::Debug;
use tracing::debug;

use crate::{
    crd::{Environment, EnvironmentStatus},
    Error, Result,
};

/// Name-keyed get and create for one kind of child object
#[async_trait]
pub trait ObjectStore<K>: Send + Sync {
    /// Fetch an object, `None` if it does not exist
    async fn get(&self, name: &str) -> Result<Option<K>>;

    /// Create an object, failing with an already exists error on name clashes
    async fn create(&self, obj: &K) -> Result<K>;
}

#[async_trait]
impl<K> ObjectStore<K> for Api<K>
where
    K: Clone + DeserializeOwned + Serialize + Debug + Send + Sync + 'static,
{
    async fn get(&self, name: &str) -> Result<Option<K>> {
        Ok(self.get_opt(name).await?)
    }

    async fn create(&self, obj: &K) -> Result<K> {
        Ok(Api::create(self, &PostParams::default(), obj).await?)
    }
}

/// Reads and writes of the environments themselves
#[async_trait]
pub trait EnvironmentStore: Send + Sync {
    /// Fetch an environment, `None` once it has been deleted
    async fn get(&self, name: &str) -> Result<Option<Environment>>;

    /// Overwrite the status of `env`
    ///
    /// Fails with a conflict if `env` is no longer the latest revision.
    async fn publish_status(&self, env: &Environment, status: &EnvironmentStatus) -> Result<()>;

    /// Delete an environment, letting the garbage collector remove its children
    async fn delete(&self, name: &str) -> Result<()>;
}

#[async_trait]
impl EnvironmentStore for Api<Environment> {
    async fn get(&self, name: &str) -> Result<Option<Environment>> {
        Ok(self.get_opt(name).await?)
    }

    async fn publish_status(&self, env: &Environment, status: &EnvironmentStatus) -> Result<()> {
        let name = env
            .meta()
            .name
            .as_deref()
            .ok_or(Error::MissingObjectKey(".metadata.name"))?;
        let mut patch = json!({ "status": status });
        // resourceVersion in a merge patch acts as a precondition
        if let Some(rv) = env.resource_version() {
            patch["metadata"] = json!({ "resourceVersion": rv });
        }
        self.patch_status(name, &PatchParams::default(), &Patch::Merge(&patch))
            .await?;
        Ok(())
    }

    async fn delete(&self, name: &str) -> Result<()> {
        Api::delete(self, name, &DeleteParams::background()).await?;
        Ok(())
    }
}

/// Outcome of ensuring a child exists
#[derive(Debug, Clone, PartialEq)]
pub enum Ensured<K> {
    /// Already present before this pass, left untouched
    Existing(K),
    /// Created by this pass
    Created(K),
}

impl<K> Ensured<K> {
    pub fn created(&self) -> bool {
        matches!(self, Ensured::Created(_))
    }

    pub fn into_inner(self) -> K {
        match self {
            Ensured::Existing(obj) | Ensured::Created(obj) => obj,
        }
    }
}

/// Create `desired` owned by `owner` unless an object of the same name exists
///
/// Losing a creation race to another writer counts as the object existing.
/// The created object is read back, so fields populated by the api server or
/// other controllers are available to the caller.
pub async fn ensure<K>(store: &dyn ObjectStore<K>, mut desired: K, owner: &Environment) -> Result<Ensured<K>>
where
    K: Resource + Send + Sync,
{
    let name = desired
        .meta()
        .name
        .clone()
        .ok_or(Error::MissingObjectKey(".metadata.name"))?;
    if let Some(existing) = store.get(&name).await? {
        return Ok(Ensured::Existing(existing));
    }

    desired.owner_references_mut().push(owner.owner_reference()?);
    let raced = match store.create(&desired).await {
        Ok(_) => false,
        Err(err) if err.is_already_exists() => {
            debug!(%name, "lost creation race, treating as existing");
            true
        }
        Err(err) => return Err(err),
    };

    match store.get(&name).await? {
        Some(obj) if raced => Ok(Ensured::Existing(obj)),
        Some(obj) => Ok(Ensured::Created(obj)),
        None => Err(Error::Vanished(name)),
    }
}
