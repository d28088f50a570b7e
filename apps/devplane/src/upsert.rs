//! Idempotent create-or-update
//!
//! Create first; when the object already exists, read its current
//! `resourceVersion` and replace it with the desired body. Collisions and
//! transient failures are retried a bounded number of times with backoff.

use crate::backoff::RetryPolicy;
use cluster_client::{resource_version, set_resource_version, ResourceClient, ResourceError, ResourceRef};
use serde::Serialize;
use serde_json::Value;
use tracing::{debug, warn};

/// Which branch an upsert took.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum UpsertOutcome {
    Created,
    Updated,
}

/// Create `target` from `desired`, or update it in place if it exists.
///
/// Applying the same `desired` twice leaves exactly one object whose
/// content matches `desired`.
pub async fn upsert(
    client: &dyn ResourceClient,
    target: &ResourceRef,
    desired: &Value,
    policy: &RetryPolicy,
) -> Result<(UpsertOutcome, Value), ResourceError> {
    let mut backoff = policy.backoff();
    let mut attempt = 1;
    loop {
        match try_upsert(client, target, desired).await {
            Ok(result) => return Ok(result),
            Err(e) if is_retryable(&e) && attempt < policy.max_attempts => {
                let delay = backoff.next_backoff();
                warn!(
                    "Upsert of {} failed (attempt {}/{}): {}, retrying in {:?}",
                    target, attempt, policy.max_attempts, e, delay
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
            Err(e) => return Err(e),
        }
    }
}

fn is_retryable(err: &ResourceError) -> bool {
    err.is_transient() || matches!(err, ResourceError::Conflict(_))
}

async fn try_upsert(
    client: &dyn ResourceClient,
    target: &ResourceRef,
    desired: &Value,
) -> Result<(UpsertOutcome, Value), ResourceError> {
    match client.create(target, desired).await {
        Ok(created) => {
            debug!("Created {}", target);
            Ok((UpsertOutcome::Created, created))
        }
        Err(e) if e.is_conflict() => {
            // Deleted between create and get: surface as a conflict so the
            // next attempt goes back through create.
            let current = client.get(target).await.map_err(|e| vanished(e, target))?;
            let mut body = desired.clone();
            if let Some(version) = resource_version(&current) {
                set_resource_version(&mut body, version);
            }
            let updated = client
                .update(target, &body)
                .await
                .map_err(|e| vanished(e, target))?;
            debug!("Updated {}", target);
            Ok((UpsertOutcome::Updated, updated))
        }
        Err(e) => Err(e),
    }
}

fn vanished(err: ResourceError, target: &ResourceRef) -> ResourceError {
    match err {
        ResourceError::NotFound(_) => ResourceError::Conflict(format!("{} deleted during update", target)),
        other => other,
    }
}
