//! ProviderConfig
//!
//! Each credential backend has its own `ProviderConfig` kind in its own API
//! group, but they share one spec shape: a reference to a secret key holding
//! the credential material. The material itself is never embedded.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Version served by every backend's `ProviderConfig`.
pub const PROVIDER_CONFIG_VERSION: &str = "v1beta1";

/// Kind shared by every backend.
pub const PROVIDER_CONFIG_KIND: &str = "ProviderConfig";

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ProviderConfigSpec {
    pub credentials: ProviderCredentials,

    /// GCP project the provider acts in
    #[serde(default, rename = "projectID", skip_serializing_if = "Option::is_none")]
    pub project_id: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ProviderCredentials {
    pub source: CredentialsSource,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub secret_ref: Option<SecretKeySelector>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, JsonSchema, PartialEq, Eq, Default)]
pub enum CredentialsSource {
    #[default]
    Secret,
}

/// namespace/name/key of a secret entry
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct SecretKeySelector {
    pub namespace: String,
    pub name: String,
    pub key: String,
}

impl ProviderConfigSpec {
    /// Spec that reads credentials from `namespace/name[key]`.
    pub fn from_secret(
        namespace: impl Into<String>,
        name: impl Into<String>,
        key: impl Into<String>,
    ) -> Self {
        Self {
            credentials: ProviderCredentials {
                source: CredentialsSource::Secret,
                secret_ref: Some(SecretKeySelector {
                    namespace: namespace.into(),
                    name: name.into(),
                    key: key.into(),
                }),
            },
            project_id: None,
        }
    }
}
