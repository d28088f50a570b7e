//! devplane error types.
//!
//! Leaf components return their own typed errors; `Error` unifies them for
//! the pipeline, which classifies each stage failure as abort or warn.

use crate::health::HealthSnapshot;
use cluster_client::ResourceError;
use std::time::Duration;
use thiserror::Error;

/// Errors from building value trees and parsing `key=value` overrides.
#[derive(Debug, Error)]
pub enum ValuesError {
    /// Override pair without `=`, with an empty path segment, or that would
    /// nest under an existing scalar
    #[error("malformed override '{pair}': {reason}")]
    MalformedOverride { pair: String, reason: String },

    /// Values documents must have a mapping at the top
    #[error("values document must be a mapping, found {0}")]
    NotAMapping(String),

    /// Mapping keys must be scalars
    #[error("unsupported mapping key: {0}")]
    UnsupportedKey(String),

    #[error("yaml error: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

impl ValuesError {
    pub(crate) fn malformed(pair: &str, reason: impl Into<String>) -> Self {
        ValuesError::MalformedOverride {
            pair: pair.to_string(),
            reason: reason.into(),
        }
    }
}

/// Health convergence failures. Never treated as success.
#[derive(Debug, Error)]
pub enum ConvergenceError {
    /// Deadline elapsed before the predicate held
    #[error("timed out waiting for health")]
    TimedOut {
        resource: String,
        waited: Duration,
        last: Option<HealthSnapshot>,
    },

    /// Cancel signal fired mid-poll
    #[error("cancelled while waiting for {resource}")]
    Cancelled {
        resource: String,
        last: Option<HealthSnapshot>,
    },

    /// Too many consecutive fetch errors
    #[error("{resource} unreachable after {failures} consecutive errors: {last_error}")]
    Unreachable {
        resource: String,
        failures: u32,
        last_error: ResourceError,
    },

    /// One or more polls of a fan-out failed
    #[error("{}", aggregate_message(.failures, .total))]
    Aggregate {
        failures: Vec<(String, ConvergenceError)>,
        total: usize,
    },
}

fn aggregate_message(failures: &[(String, ConvergenceError)], total: &usize) -> String {
    match failures {
        [(_, only)] => only.to_string(),
        _ => {
            let detail: Vec<String> = failures
                .iter()
                .map(|(resource, err)| format!("{}: {}", resource, err))
                .collect();
            format!(
                "{} of {} resources failed to converge: {}",
                failures.len(),
                total,
                detail.join("; ")
            )
        }
    }
}

impl ConvergenceError {
    /// Last snapshot observed before giving up, when there was one.
    pub fn last_snapshot(&self) -> Option<&HealthSnapshot> {
        match self {
            ConvergenceError::TimedOut { last, .. } | ConvergenceError::Cancelled { last, .. } => {
                last.as_ref()
            }
            _ => None,
        }
    }
}

/// Credential material resolution and persistence failures.
#[derive(Debug, Error)]
pub enum CredentialError {
    /// A required field is absent from the chosen source
    #[error("missing credential field {field} for {backend}")]
    Missing { backend: String, field: String },

    /// Material exists but cannot be used
    #[error("malformed {backend} credentials: {reason}")]
    Malformed { backend: String, reason: String },

    /// The backend cannot read this source type
    #[error("{backend} does not support {source_kind} credentials")]
    UnsupportedSource { backend: String, source_kind: String },

    #[error("failed to read credentials file {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to persist credentials: {0}")]
    Resource(#[from] ResourceError),
}

/// Chart operation failures.
#[derive(Debug, Error)]
pub enum InstallError {
    #[error("release {release} already installed in {namespace}")]
    AlreadyInstalled { release: String, namespace: String },

    #[error("release {release} not found in {namespace}")]
    NotInstalled { release: String, namespace: String },

    /// Destructive operation refused without confirmation or --force
    #[error("uninstall of {0} requires confirmation (use --force to skip)")]
    ConfirmationRequired(String),

    #[error("helm {command} failed: {stderr}")]
    Command { command: String, stderr: String },

    #[error("pre-install step failed for {namespace}: {reason}")]
    PreInstall { namespace: String, reason: String },

    #[error("unexpected helm output: {0}")]
    Output(String),

    #[error(transparent)]
    Values(#[from] ValuesError),

    #[error("failed to run helm: {0}")]
    Io(#[from] std::io::Error),
}

/// Cluster runtime failures.
#[derive(Debug, Error)]
pub enum ClusterError {
    #[error("kind {command} failed: {stderr}")]
    Command { command: String, stderr: String },

    #[error("cluster {0} does not exist")]
    NotFound(String),

    #[error("invalid cluster configuration: {0}")]
    InvalidConfig(String),

    #[error("failed to run kind: {0}")]
    Io(#[from] std::io::Error),

    #[error("yaml error: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

/// Top-level devplane error.
#[derive(Debug, Error)]
pub enum Error {
    /// Malformed configuration or overrides
    #[error("validation error: {0}")]
    Validation(String),

    /// Target cluster, release or object absent when required
    #[error("not found: {0}")]
    NotFound(String),

    /// Single-call failure eligible for bounded retry
    #[error("transient error: {0}")]
    Transient(String),

    /// Destructive command declined at the prompt
    #[error("{0} requires confirmation (use --force to skip)")]
    ConfirmationRequired(String),

    #[error(transparent)]
    Convergence(#[from] ConvergenceError),

    #[error(transparent)]
    Credential(#[from] CredentialError),

    #[error(transparent)]
    Install(#[from] InstallError),

    #[error(transparent)]
    Cluster(#[from] ClusterError),

    /// Non-retryable API failure
    #[error("cluster API error: {0}")]
    Resource(ResourceError),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}

impl Error {
    pub fn validation(message: impl Into<String>) -> Self {
        Error::Validation(message.into())
    }

    /// Whether the failed operation may be attempted again.
    pub fn is_transient(&self) -> bool {
        match self {
            Error::Transient(_) => true,
            Error::Credential(CredentialError::Resource(e)) => e.is_transient(),
            _ => false,
        }
    }
}

impl From<ResourceError> for Error {
    fn from(err: ResourceError) -> Self {
        match err {
            ResourceError::NotFound(what) => Error::NotFound(what),
            ResourceError::Transient(msg) | ResourceError::Conflict(msg) => Error::Transient(msg),
            other => Error::Resource(other),
        }
    }
}

impl From<ValuesError> for Error {
    fn from(err: ValuesError) -> Self {
        Error::Validation(err.to_string())
    }
}

impl From<serde_yaml::Error> for Error {
    fn from(err: serde_yaml::Error) -> Self {
        Error::Validation(err.to_string())
    }
}
