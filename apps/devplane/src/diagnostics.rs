//! Condition snapshots across a resource set, for health reports and for
//! explaining why a stage failed.

use cluster_client::{object_conditions, object_name, ResourceClient, ResourceError, ResourceKind};
use crds::Condition;
use serde::Serialize;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ConditionSnapshot {
    pub name: String,
    pub kind: String,
    pub conditions: Vec<Condition>,
}

impl ConditionSnapshot {
    /// Healthy only when at least one condition is reported and all are True.
    pub fn is_healthy(&self) -> bool {
        !self.conditions.is_empty() && self.conditions.iter().all(Condition::is_true)
    }
}

/// One list call per kind, keeping only names in `allow` when given.
pub async fn collect_conditions(
    client: &dyn ResourceClient,
    kinds: &[ResourceKind],
    namespace: Option<&str>,
    allow: Option<&[String]>,
) -> Result<Vec<ConditionSnapshot>, ResourceError> {
    let mut snapshots = Vec::new();
    for kind in kinds {
        for object in client.list(kind, namespace).await? {
            let Some(name) = object_name(&object) else {
                continue;
            };
            if allow.is_some_and(|names| !names.iter().any(|n| n == name)) {
                continue;
            }
            snapshots.push(ConditionSnapshot {
                name: name.to_string(),
                kind: kind.kind.clone(),
                conditions: object_conditions(&object),
            });
        }
    }
    Ok(snapshots)
}

pub fn unhealthy(snapshots: &[ConditionSnapshot]) -> Vec<&ConditionSnapshot> {
    snapshots.iter().filter(|s| !s.is_healthy()).collect()
}

/// `name: type - message` for every condition that is not True.
pub fn error_messages(snapshots: &[ConditionSnapshot]) -> Vec<String> {
    let mut messages = Vec::new();
    for snapshot in snapshots {
        if snapshot.conditions.is_empty() {
            messages.push(format!("{}: no conditions reported", snapshot.name));
            continue;
        }
        for condition in snapshot.conditions.iter().filter(|c| !c.is_true()) {
            let detail = condition
                .message
                .as_deref()
                .or(condition.reason.as_deref())
                .map(str::to_string)
                .unwrap_or_else(|| format!("status {}", condition.status));
            messages.push(format!("{}: {} - {}", snapshot.name, condition.type_, detail));
        }
    }
    messages
}

#[cfg(test)]
mod tests {
    use super::*;
    use cluster_client::{MockOp, MockResourceClient, ResourceRef};
    use crds::ConditionStatus;

    fn provider(name: &str) -> ResourceRef {
        ResourceRef::cluster("pkg.crossplane.io", "v1", "Provider", name)
    }

    fn seeded() -> MockResourceClient {
        let mock = MockResourceClient::new();
        for name in ["healthy", "sick", "silent"] {
            mock.insert(&provider(name), provider(name).object_skeleton());
        }
        mock.set_conditions(
            &provider("healthy"),
            vec![
                Condition::new("Installed", ConditionStatus::True),
                Condition::new("Healthy", ConditionStatus::True),
            ],
        );
        mock.set_conditions(
            &provider("sick"),
            vec![
                Condition::new("Installed", ConditionStatus::True),
                Condition::new("Healthy", ConditionStatus::False)
                    .with_reason("UnhealthyPackageRevision")
                    .with_message("post establish hook failed"),
            ],
        );
        mock
    }

    #[tokio::test]
    async fn test_collect_lists_each_kind_once() {
        let mock = seeded();
        let kinds = [provider("x").kind().clone()];
        let snapshots = collect_conditions(&mock, &kinds, None, None).await.unwrap();
        assert_eq!(snapshots.len(), 3);
        assert_eq!(mock.calls(MockOp::List), 1);
    }

    #[tokio::test]
    async fn test_collect_honors_allow_list() {
        let mock = seeded();
        let kinds = [provider("x").kind().clone()];
        let allow = vec!["sick".to_string()];
        let snapshots = collect_conditions(&mock, &kinds, None, Some(&allow)).await.unwrap();
        assert_eq!(snapshots.len(), 1);
        assert_eq!(snapshots[0].name, "sick");
    }

    #[tokio::test]
    async fn test_unhealthy_and_messages() {
        let mock = seeded();
        let kinds = [provider("x").kind().clone()];
        let snapshots = collect_conditions(&mock, &kinds, None, None).await.unwrap();

        let names: Vec<_> = unhealthy(&snapshots).iter().map(|s| s.name.as_str()).collect();
        assert_eq!(names, vec!["sick", "silent"]);

        let messages = error_messages(&snapshots);
        assert!(messages.contains(&"sick: Healthy - post establish hook failed".to_string()));
        assert!(messages.contains(&"silent: no conditions reported".to_string()));
        assert!(!messages.iter().any(|m| m.starts_with("healthy")));
    }

    #[test]
    fn test_message_falls_back_to_reason() {
        let snapshot = ConditionSnapshot {
            name: "p".to_string(),
            kind: "Provider".to_string(),
            conditions: vec![Condition::new("Installed", ConditionStatus::Unknown).with_reason("Pending")],
        };
        assert_eq!(error_messages(&[snapshot]), vec!["p: Installed - Pending".to_string()]);
    }
}
