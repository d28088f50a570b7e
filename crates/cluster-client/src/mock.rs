//! Mock ResourceClient for unit testing
//!
//! Stores objects in memory keyed by `ResourceRef` and mimics the API
//! server's create/update contract (AlreadyExists on create, Conflict on a
//! stale resourceVersion). Tests can script the condition sets a background
//! controller would report on successive polls and inject failures for
//! specific operations.

use crate::error::ResourceError;
use crate::models::{object_conditions, resource_version, set_resource_version, ResourceKind, ResourceRef};
use crate::resource_trait::ResourceClient;
use crds::Condition;
use serde_json::Value;
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};

/// Operations that can have failures injected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MockOp {
    Get,
    List,
    Create,
    Update,
    Delete,
    Conditions,
}

#[derive(Debug, Default)]
struct MockState {
    objects: BTreeMap<ResourceRef, Value>,
    condition_scripts: HashMap<ResourceRef, VecDeque<Vec<Condition>>>,
    failures: HashMap<(MockOp, Option<ResourceRef>), VecDeque<ResourceError>>,
    calls: HashMap<MockOp, usize>,
    next_version: u64,
}

/// Mock cluster for testing
#[derive(Debug, Clone, Default)]
pub struct MockResourceClient {
    state: Arc<Mutex<MockState>>,
}

impl MockResourceClient {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, MockState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Seed an object (for test setup)
    pub fn insert(&self, target: &ResourceRef, object: Value) {
        let mut state = self.lock();
        state.next_version += 1;
        let mut object = object;
        set_resource_version(&mut object, &state.next_version.to_string());
        state.objects.insert(target.clone(), object);
    }

    /// Stored object, if any (for assertions)
    pub fn object(&self, target: &ResourceRef) -> Option<Value> {
        self.lock().objects.get(target).cloned()
    }

    /// Number of stored objects of `kind`
    pub fn count(&self, kind: &ResourceKind) -> usize {
        self.lock().objects.keys().filter(|r| r.kind() == kind).count()
    }

    /// Script the condition sets returned by successive `conditions` calls.
    ///
    /// Each call consumes one entry; the final entry is returned forever.
    pub fn script_conditions(&self, target: &ResourceRef, sequence: Vec<Vec<Condition>>) {
        self.lock()
            .condition_scripts
            .insert(target.clone(), sequence.into_iter().collect());
    }

    /// Overwrite `status.conditions` on a stored object.
    pub fn set_conditions(&self, target: &ResourceRef, conditions: Vec<Condition>) {
        let mut state = self.lock();
        if let Some(object) = state.objects.get_mut(target) {
            let conditions = serde_json::to_value(conditions).unwrap_or(Value::Null);
            object["status"] = serde_json::json!({ "conditions": conditions });
        }
    }

    /// Fail the next `op` against `target` (any target when `None`).
    pub fn fail_next(&self, op: MockOp, target: Option<&ResourceRef>, error: ResourceError) {
        self.lock()
            .failures
            .entry((op, target.cloned()))
            .or_default()
            .push_back(error);
    }

    /// How many times `op` was called
    pub fn calls(&self, op: MockOp) -> usize {
        self.lock().calls.get(&op).copied().unwrap_or(0)
    }

    fn enter(&self, op: MockOp, target: Option<&ResourceRef>) -> Result<MutexGuard<'_, MockState>, ResourceError> {
        let mut state = self.lock();
        *state.calls.entry(op).or_default() += 1;
        let keys = [(op, target.cloned()), (op, None)];
        for key in keys {
            if let Some(queue) = state.failures.get_mut(&key) {
                if let Some(err) = queue.pop_front() {
                    return Err(err);
                }
            }
        }
        Ok(state)
    }
}

#[async_trait::async_trait]
impl ResourceClient for MockResourceClient {
    async fn get(&self, target: &ResourceRef) -> Result<Value, ResourceError> {
        let state = self.enter(MockOp::Get, Some(target))?;
        state
            .objects
            .get(target)
            .cloned()
            .ok_or_else(|| ResourceError::NotFound(target.to_string()))
    }

    async fn list(&self, kind: &ResourceKind, namespace: Option<&str>) -> Result<Vec<Value>, ResourceError> {
        let state = self.enter(MockOp::List, None)?;
        Ok(state
            .objects
            .iter()
            .filter(|(r, _)| r.kind() == kind && (namespace.is_none() || r.namespace() == namespace))
            .map(|(_, o)| o.clone())
            .collect())
    }

    async fn create(&self, target: &ResourceRef, object: &Value) -> Result<Value, ResourceError> {
        let mut state = self.enter(MockOp::Create, Some(target))?;
        if state.objects.contains_key(target) {
            return Err(ResourceError::AlreadyExists(target.to_string()));
        }
        state.next_version += 1;
        let mut stored = object.clone();
        set_resource_version(&mut stored, &state.next_version.to_string());
        state.objects.insert(target.clone(), stored.clone());
        Ok(stored)
    }

    async fn update(&self, target: &ResourceRef, object: &Value) -> Result<Value, ResourceError> {
        let mut state = self.enter(MockOp::Update, Some(target))?;
        let current = state
            .objects
            .get(target)
            .ok_or_else(|| ResourceError::NotFound(target.to_string()))?;
        if let Some(requested) = resource_version(object) {
            if Some(requested) != resource_version(current) {
                return Err(ResourceError::Conflict(target.to_string()));
            }
        }
        let mut stored = object.clone();
        if stored.get("status").is_none() {
            if let Some(status) = current.get("status").cloned() {
                stored["status"] = status;
            }
        }
        state.next_version += 1;
        set_resource_version(&mut stored, &state.next_version.to_string());
        state.objects.insert(target.clone(), stored.clone());
        Ok(stored)
    }

    async fn delete(&self, target: &ResourceRef) -> Result<(), ResourceError> {
        let mut state = self.enter(MockOp::Delete, Some(target))?;
        state
            .objects
            .remove(target)
            .map(|_| ())
            .ok_or_else(|| ResourceError::NotFound(target.to_string()))
    }

    async fn conditions(&self, target: &ResourceRef) -> Result<Vec<Condition>, ResourceError> {
        let mut state = self.enter(MockOp::Conditions, Some(target))?;
        if let Some(script) = state.condition_scripts.get_mut(target) {
            let next = if script.len() > 1 {
                script.pop_front()
            } else {
                script.front().cloned()
            };
            return Ok(next.unwrap_or_default());
        }
        state
            .objects
            .get(target)
            .map(object_conditions)
            .ok_or_else(|| ResourceError::NotFound(target.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crds::ConditionStatus;

    fn secret() -> ResourceRef {
        ResourceRef::namespaced("", "v1", "Secret", "default", "creds")
    }

    #[tokio::test]
    async fn test_create_then_create_again_reports_already_exists() {
        let mock = MockResourceClient::new();
        let target = secret();
        mock.create(&target, &target.object_skeleton()).await.unwrap();
        let err = mock.create(&target, &target.object_skeleton()).await.unwrap_err();
        assert!(matches!(err, ResourceError::AlreadyExists(_)));
    }

    #[tokio::test]
    async fn test_update_with_stale_version_conflicts() {
        let mock = MockResourceClient::new();
        let target = secret();
        let created = mock.create(&target, &target.object_skeleton()).await.unwrap();
        mock.update(&target, &created).await.unwrap();
        let err = mock.update(&target, &created).await.unwrap_err();
        assert!(matches!(err, ResourceError::Conflict(_)));
    }

    #[tokio::test]
    async fn test_scripted_conditions_hold_last_entry() {
        let mock = MockResourceClient::new();
        let target = secret();
        mock.script_conditions(
            &target,
            vec![vec![], vec![Condition::new("Healthy", ConditionStatus::True)]],
        );
        assert!(mock.conditions(&target).await.unwrap().is_empty());
        assert_eq!(mock.conditions(&target).await.unwrap().len(), 1);
        assert_eq!(mock.conditions(&target).await.unwrap().len(), 1);
        assert_eq!(mock.calls(MockOp::Conditions), 3);
    }

    #[tokio::test]
    async fn test_injected_failure_is_consumed_once() {
        let mock = MockResourceClient::new();
        let target = secret();
        mock.insert(&target, target.object_skeleton());
        mock.fail_next(MockOp::Get, Some(&target), ResourceError::Transient("timeout".into()));
        assert!(mock.get(&target).await.unwrap_err().is_transient());
        assert!(mock.get(&target).await.is_ok());
    }
}
