//! ResourceClient trait for mocking
//!
//! This trait abstracts cluster access so the poller, the credentials
//! provisioner and the pipeline stages can be unit tested against an
//! in-memory implementation. `KubeResourceClient` implements it for a real
//! cluster.

use crate::error::ResourceError;
use crate::models::{object_conditions, ResourceKind, ResourceRef};
use crds::Condition;
use serde_json::Value;

/// Trait for cluster API operations
///
/// All async methods must be `Send` to work with Tokio's work-stealing runtime.
/// Every call reads the cluster directly; implementations keep no cache.
#[async_trait::async_trait]
pub trait ResourceClient: Send + Sync {
    async fn get(&self, target: &ResourceRef) -> Result<Value, ResourceError>;

    /// List every object of `kind`, optionally restricted to one namespace.
    async fn list(&self, kind: &ResourceKind, namespace: Option<&str>) -> Result<Vec<Value>, ResourceError>;

    /// Create `object` as `target`; fails with `AlreadyExists` if present.
    async fn create(&self, target: &ResourceRef, object: &Value) -> Result<Value, ResourceError>;

    /// Replace `target` with `object`; fails with `Conflict` on a stale
    /// `metadata.resourceVersion` and `NotFound` if absent.
    async fn update(&self, target: &ResourceRef, object: &Value) -> Result<Value, ResourceError>;

    async fn delete(&self, target: &ResourceRef) -> Result<(), ResourceError>;

    /// Conditions currently reported under `status.conditions`.
    async fn conditions(&self, target: &ResourceRef) -> Result<Vec<Condition>, ResourceError> {
        let object = self.get(target).await?;
        Ok(object_conditions(&object))
    }

    /// `get` that maps `NotFound` to `None`.
    async fn get_opt(&self, target: &ResourceRef) -> Result<Option<Value>, ResourceError> {
        match self.get(target).await {
            Ok(object) => Ok(Some(object)),
            Err(ResourceError::NotFound(_)) => Ok(None),
            Err(e) => Err(e),
        }
    }
}
