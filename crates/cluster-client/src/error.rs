//! Cluster client errors

use thiserror::Error;

/// Errors that can occur when talking to the cluster API.
///
/// Raw `kube::Error`s are classified on the way in so callers can branch on
/// conflict and not-found without inspecting messages.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ResourceError {
    /// The object does not exist
    #[error("Not found: {0}")]
    NotFound(String),

    /// Create hit an object that already exists
    #[error("Already exists: {0}")]
    AlreadyExists(String),

    /// Update raced another writer (stale resourceVersion)
    #[error("Conflict: {0}")]
    Conflict(String),

    /// Timeouts, throttling, unavailable API server, dropped connections
    #[error("Transient API error: {0}")]
    Transient(String),

    /// The API server rejected the request
    #[error("API error ({code}): {message}")]
    Api { code: u16, message: String },

    /// JSON serialization/deserialization error
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Kubeconfig could not be loaded or the client could not be built
    #[error("Client configuration error: {0}")]
    Config(String),
}

impl ResourceError {
    /// Classify a kube error for the object described by `target`.
    pub fn from_kube(err: kube::Error, target: &str) -> Self {
        match err {
            kube::Error::Api(status) => {
                Self::from_status(status.code, &status.reason, &status.message, target)
            }
            kube::Error::SerdeError(e) => ResourceError::Serialization(format!("{}: {}", target, e)),
            kube::Error::InferConfig(e) => ResourceError::Config(e.to_string()),
            other => ResourceError::Transient(format!("{}: {}", target, other)),
        }
    }

    /// Classify an API status response.
    pub fn from_status(code: u16, reason: &str, message: &str, target: &str) -> Self {
        let message = format!("{}: {}", target, message);
        match code {
            404 => ResourceError::NotFound(message),
            409 if reason == "AlreadyExists" => ResourceError::AlreadyExists(message),
            409 => ResourceError::Conflict(message),
            408 | 429 | 500 | 502 | 503 | 504 => ResourceError::Transient(message),
            _ => ResourceError::Api { code, message },
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, ResourceError::NotFound(_))
    }

    /// Create-side or update-side collision with an existing object.
    pub fn is_conflict(&self) -> bool {
        matches!(self, ResourceError::AlreadyExists(_) | ResourceError::Conflict(_))
    }

    pub fn is_transient(&self) -> bool {
        matches!(self, ResourceError::Transient(_))
    }
}

impl From<serde_json::Error> for ResourceError {
    fn from(err: serde_json::Error) -> Self {
        ResourceError::Serialization(err.to_string())
    }
}
