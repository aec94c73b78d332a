//! Error handling in [`environment_controller`][crate]
use kube::core::ErrorResponse;
use thiserror::Error;

use crate::ttl::TtlError;

/// Possible errors while reconciling an [`Environment`](crate::crd::Environment)
#[derive(Error, Debug)]
pub enum Error {
    /// Failure talking to the Kubernetes api server
    ///
    /// Not found and already exists responses surface here as well, but are
    /// classified with [`Error::is_not_found`] and [`Error::is_already_exists`]
    /// before they get this far.
    #[error("Kubernetes api error: {0}")]
    Kube(#[source] kube::Error),

    /// The cluster class referenced by the environment does not exist
    #[error("cluster class {0:?} not found")]
    ClusterClassNotFound(String),

    /// The cluster class exists but carries no provider reference
    #[error("cluster class {0:?} has no provider reference")]
    MissingProviderRef(String),

    /// An object was missing a field required to reference it
    #[error("object is missing {0}")]
    MissingObjectKey(&'static str),

    /// A child was created but could not be read back
    #[error("{0} vanished right after creation")]
    Vanished(String),

    /// The environment carries a ttl that cannot be parsed
    #[error("invalid ttl: {0}")]
    InvalidTtl(#[from] TtlError),

    /// One or more dependency applications could not be ensured
    #[error("failed to ensure dependencies: {}", describe_failures(.0))]
    Dependencies(Vec<(String, Error)>),

    /// Failure serializing an object for the api server
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Convenience alias
pub type Result<T, E = Error> = std::result::Result<T, E>;

impl From<kube::Error> for Error {
    fn from(err: kube::Error) -> Self {
        Error::Kube(err)
    }
}

impl Error {
    fn api_response(&self) -> Option<&ErrorResponse> {
        match self {
            Error::Kube(kube::Error::Api(response)) => Some(response),
            _ => None,
        }
    }

    /// The api server answered 404
    pub fn is_not_found(&self) -> bool {
        self.api_response().is_some_and(|r| r.code == 404)
    }

    /// A create raced with another writer for the same name
    pub fn is_already_exists(&self) -> bool {
        self.api_response()
            .is_some_and(|r| r.code == 409 && r.reason == "AlreadyExists")
    }

    /// An optimistic concurrency check failed on update
    pub fn is_conflict(&self) -> bool {
        self.api_response()
            .is_some_and(|r| r.code == 409 && r.reason == "Conflict")
    }
}

fn describe_failures(failures: &[(String, Error)]) -> String {
    failures
        .iter()
        .map(|(name, err)| format!("{name}: {err}"))
        .collect::<Vec<_>>()
        .join("; ")
}

#[cfg(test)]
pub(crate) fn api_error(code: u16, reason: &str) -> Error {
    let response: ErrorResponse = serde_json::from_value(serde_json::json!({
        "status": "Failure",
        "message": format!("{reason} (test)"),
        "reason": reason,
        "code": code,
    }))
    .expect("valid error response");
    Error::Kube(kube::Error::Api(response))
}
