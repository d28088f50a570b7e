//! Provider
//!
//! A package-controller plugin. devplane creates one `Provider` per entry in
//! the configuration's plugin list; the package controller reports its
//! `Installed` and `Healthy` conditions asynchronously.

use crate::condition::Condition;
use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// API group of package-controller objects.
pub const PACKAGE_GROUP: &str = "pkg.crossplane.io";

/// Served version of `Provider`.
pub const PROVIDER_VERSION: &str = "v1";

/// Name of the CustomResourceDefinition that serves `Provider`s.
pub const PROVIDER_CRD_NAME: &str = "providers.pkg.crossplane.io";

#[derive(CustomResource, Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq)]
#[kube(
    group = "pkg.crossplane.io",
    version = "v1",
    kind = "Provider",
    status = "ProviderStatus"
)]
#[serde(rename_all = "camelCase")]
pub struct ProviderSpec {
    /// OCI reference of the provider package
    /// Example: "xpkg.upbound.io/upbound/provider-aws-s3:v1.1.0"
    pub package: String,

    /// IfNotPresent, Always or Never
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub package_pull_policy: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ProviderStatus {
    #[serde(default)]
    pub conditions: Vec<Condition>,

    /// Name of the active package revision
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current_revision: Option<String>,
}

impl ProviderSpec {
    pub fn for_package(package: impl Into<String>) -> Self {
        Self {
            package: package.into(),
            package_pull_policy: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kube::Resource;

    #[test]
    fn test_provider_serializes_with_package_api_version() {
        let provider = Provider::new(
            "provider-aws-s3",
            ProviderSpec::for_package("xpkg.upbound.io/upbound/provider-aws-s3:v1.1.0"),
        );
        let value = serde_json::to_value(&provider).unwrap();
        assert_eq!(value["apiVersion"], "pkg.crossplane.io/v1");
        assert_eq!(value["kind"], "Provider");
        assert_eq!(value["metadata"]["name"], "provider-aws-s3");
        assert!(value["spec"].get("packagePullPolicy").is_none());
        assert_eq!(Provider::group(&()), PACKAGE_GROUP);
        assert_eq!(Provider::version(&()), PROVIDER_VERSION);
    }

    #[test]
    fn test_provider_status_reads_reported_conditions() {
        let raw = serde_json::json!({
            "apiVersion": "pkg.crossplane.io/v1",
            "kind": "Provider",
            "metadata": { "name": "provider-nop" },
            "spec": { "package": "xpkg.upbound.io/crossplane-contrib/provider-nop:v0.2.1" },
            "status": {
                "conditions": [
                    { "type": "Installed", "status": "True" },
                    { "type": "Healthy", "status": "False", "message": "pod crashlooping" }
                ],
                "currentRevision": "provider-nop-7f6b"
            }
        });
        let provider: Provider = serde_json::from_value(raw).unwrap();
        let status = provider.status.unwrap();
        assert_eq!(status.conditions.len(), 2);
        assert_eq!(status.current_revision.as_deref(), Some("provider-nop-7f6b"));
    }
}
