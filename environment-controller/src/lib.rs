//! A controller provisioning short lived development environments
//!
//! An [`Environment`](crd::Environment) names an application source, the
//! helm charts it depends on and the class of cluster it should run on. The
//! controller claims a cluster through crossplane, deploys the source and its
//! dependencies through argo cd, attaches a node pool once the cluster is
//! bound, and deletes the environment again once it has been ready for longer
//! than its ttl. Every child is owned by the environment, so deleting it tears
//! down the whole stack.
//!
//! The reconcile engine lives in [`reconciler`], and [`controller`] runs it
//! under a kube-runtime [`Controller`](kube::runtime::Controller).
#![forbid(unsafe_code)]

pub mod config;
pub mod controller;
pub mod crd;
pub mod deployer;
pub mod error;
pub mod provisioner;
pub mod reconciler;
pub mod resources;
pub mod status;
pub mod store;
pub mod ttl;

pub use error::{Error, Result};

#[cfg(test)]
mod fixtures;
