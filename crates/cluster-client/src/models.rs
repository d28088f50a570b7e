//! Cluster object identifiers and JSON helpers

use crds::Condition;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

/// Group/version/kind of an API type.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ResourceKind {
    /// API group; empty for the core group
    pub group: String,
    pub version: String,
    pub kind: String,
}

impl ResourceKind {
    pub fn new(group: impl Into<String>, version: impl Into<String>, kind: impl Into<String>) -> Self {
        Self {
            group: group.into(),
            version: version.into(),
            kind: kind.into(),
        }
    }

    /// "group/version", or just "version" for the core group
    pub fn api_version(&self) -> String {
        if self.group.is_empty() {
            self.version.clone()
        } else {
            format!("{}/{}", self.group, self.version)
        }
    }

    /// Lowercase plural used in API paths
    pub fn plural(&self) -> String {
        pluralize_kind(&self.kind)
    }
}

/// (group, version, kind, namespace, name) of one cluster object.
///
/// Fields are private so a ref cannot change after construction.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ResourceRef {
    kind: ResourceKind,
    namespace: Option<String>,
    name: String,
}

impl ResourceRef {
    pub fn new(kind: ResourceKind, namespace: Option<String>, name: impl Into<String>) -> Self {
        Self {
            kind,
            namespace,
            name: name.into(),
        }
    }

    /// A namespaced object
    pub fn namespaced(
        group: impl Into<String>,
        version: impl Into<String>,
        kind: impl Into<String>,
        namespace: impl Into<String>,
        name: impl Into<String>,
    ) -> Self {
        Self::new(
            ResourceKind::new(group, version, kind),
            Some(namespace.into()),
            name,
        )
    }

    /// A cluster-scoped object
    pub fn cluster(
        group: impl Into<String>,
        version: impl Into<String>,
        kind: impl Into<String>,
        name: impl Into<String>,
    ) -> Self {
        Self::new(ResourceKind::new(group, version, kind), None, name)
    }

    pub fn kind(&self) -> &ResourceKind {
        &self.kind
    }

    pub fn namespace(&self) -> Option<&str> {
        self.namespace.as_deref()
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// JSON skeleton carrying this ref's apiVersion, kind and metadata.
    pub fn object_skeleton(&self) -> Value {
        let mut metadata = serde_json::json!({ "name": self.name });
        if let Some(ns) = &self.namespace {
            metadata["namespace"] = Value::String(ns.clone());
        }
        serde_json::json!({
            "apiVersion": self.kind.api_version(),
            "kind": self.kind.kind,
            "metadata": metadata,
        })
    }
}

impl fmt::Display for ResourceRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.namespace {
            Some(ns) => write!(f, "{}/{}/{}", self.kind.kind, ns, self.name),
            None => write!(f, "{}/{}", self.kind.kind, self.name),
        }
    }
}

/// Conditions under `status.conditions`; malformed entries are skipped.
pub fn object_conditions(object: &Value) -> Vec<Condition> {
    object
        .get("status")
        .and_then(|s| s.get("conditions"))
        .and_then(Value::as_array)
        .map(|items| {
            items
                .iter()
                .filter_map(|c| serde_json::from_value::<Condition>(c.clone()).ok())
                .collect()
        })
        .unwrap_or_default()
}

pub fn object_name(object: &Value) -> Option<&str> {
    object.get("metadata")?.get("name")?.as_str()
}

pub fn resource_version(object: &Value) -> Option<&str> {
    object.get("metadata")?.get("resourceVersion")?.as_str()
}

/// Copy `resourceVersion` onto `object`, creating `metadata` if needed.
pub fn set_resource_version(object: &mut Value, version: &str) {
    if let Some(map) = object.as_object_mut() {
        let metadata = map
            .entry("metadata")
            .or_insert_with(|| Value::Object(serde_json::Map::new()));
        if let Some(meta) = metadata.as_object_mut() {
            meta.insert("resourceVersion".to_string(), Value::String(version.to_string()));
        }
    }
}

/// Kinds whose plural is not a simple suffix rule.
const KIND_PLURALS: &[(&str, &str)] = &[
    ("customresourcedefinition", "customresourcedefinitions"),
    ("deploymentruntimeconfig", "deploymentruntimeconfigs"),
    ("endpoints", "endpoints"),
    ("ingress", "ingresses"),
    ("networkpolicy", "networkpolicies"),
    ("providerconfig", "providerconfigs"),
];

/// Pluralize a Kubernetes resource kind
pub fn pluralize_kind(kind: &str) -> String {
    let lower = kind.to_lowercase();

    for (singular, plural) in KIND_PLURALS {
        if *singular == lower {
            return (*plural).to_string();
        }
    }

    if lower.ends_with('s') || lower.ends_with("ch") || lower.ends_with("sh") {
        format!("{}es", lower)
    } else if lower.ends_with('y') && !lower.ends_with("ay") && !lower.ends_with("ey") {
        format!("{}ies", &lower[..lower.len() - 1])
    } else {
        format!("{}s", lower)
    }
}
