//! # Credentials provisioning
//!
//! Resolves per-backend credential material from an explicit key/value set,
//! the environment, or a local profile file, then persists it as an Opaque
//! secret plus a cluster-scoped `ProviderConfig` that references the secret.
//! Both writes are upserts, so configuring twice with the same material
//! changes nothing.

use crate::backoff::RetryPolicy;
use crate::error::CredentialError;
use crate::upsert::upsert;
use base64::Engine;
use cluster_client::{ResourceClient, ResourceRef};
use crds::{ProviderConfigSpec, PROVIDER_CONFIG_KIND, PROVIDER_CONFIG_VERSION};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;

/// Secret key every backend stores its material under.
pub const CREDENTIALS_KEY: &str = "credentials";

/// Name of the `ProviderConfig` each backend writes.
pub const PROVIDER_CONFIG_NAME: &str = "default";

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, clap::ValueEnum,
)]
#[serde(rename_all = "lowercase")]
pub enum Backend {
    Aws,
    Gcp,
    Azure,
}

impl Backend {
    pub const ALL: [Backend; 3] = [Backend::Aws, Backend::Gcp, Backend::Azure];

    pub fn name(&self) -> &'static str {
        match self {
            Backend::Aws => "aws",
            Backend::Gcp => "gcp",
            Backend::Azure => "azure",
        }
    }

    pub fn secret_name(&self) -> String {
        format!("{}-credentials", self.name())
    }

    pub fn secret_ref(&self, namespace: &str) -> ResourceRef {
        ResourceRef::namespaced("", "v1", "Secret", namespace, self.secret_name())
    }

    /// The backend's cluster-scoped `ProviderConfig`.
    pub fn provider_config_ref(&self) -> ResourceRef {
        ResourceRef::cluster(
            format!("{}.upbound.io", self.name()),
            PROVIDER_CONFIG_VERSION,
            PROVIDER_CONFIG_KIND,
            PROVIDER_CONFIG_NAME,
        )
    }
}

impl fmt::Display for Backend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Where credential material comes from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MaterialSource {
    /// Field name to value
    Explicit(BTreeMap<String, String>),
    Environment,
    /// Named section of an INI credentials file
    Profile { path: PathBuf, name: String },
}

impl MaterialSource {
    fn kind(&self) -> &'static str {
        match self {
            MaterialSource::Explicit(_) => "explicit",
            MaterialSource::Environment => "environment",
            MaterialSource::Profile { .. } => "profile",
        }
    }
}

/// Environment variable lookup, injectable for tests.
pub trait EnvLookup: Send + Sync {
    fn var(&self, key: &str) -> Option<String>;
}

/// The process environment. Empty variables count as unset.
#[derive(Debug, Clone, Copy, Default)]
pub struct ProcessEnv;

impl EnvLookup for ProcessEnv {
    fn var(&self, key: &str) -> Option<String> {
        std::env::var(key).ok().filter(|v| !v.is_empty())
    }
}

impl EnvLookup for HashMap<String, String> {
    fn var(&self, key: &str) -> Option<String> {
        self.get(key).filter(|v| !v.is_empty()).cloned()
    }
}

/// Resolved material ready to persist.
#[derive(Clone, PartialEq, Eq)]
pub struct CredentialMaterial {
    pub backend: Backend,
    /// Serialized secret content (INI for aws, JSON otherwise)
    pub content: String,
    pub project_id: Option<String>,
}

impl fmt::Debug for CredentialMaterial {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CredentialMaterial")
            .field("backend", &self.backend)
            .field("content", &"<redacted>")
            .field("project_id", &self.project_id)
            .finish()
    }
}

/// Persisted state of one backend's credentials.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CredentialRecord {
    pub backend: Backend,
    pub secret_name: String,
    pub config_name: String,
    /// Both the secret and the `ProviderConfig` exist
    pub configured: bool,
}

/// Field lookup over one material source.
struct Fields<'a> {
    backend: Backend,
    source: &'a MaterialSource,
    env: &'a dyn EnvLookup,
    profile: Option<BTreeMap<String, String>>,
}

impl Fields<'_> {
    /// `key` names the explicit/profile field, `env_key` the variable.
    fn get(&self, key: &str, env_key: &str) -> Option<String> {
        match self.source {
            MaterialSource::Explicit(values) => values.get(key).filter(|v| !v.is_empty()).cloned(),
            MaterialSource::Environment => self.env.var(env_key),
            MaterialSource::Profile { .. } => self
                .profile
                .as_ref()
                .and_then(|p| p.get(key))
                .filter(|v| !v.is_empty())
                .cloned(),
        }
    }

    fn require(&self, key: &str, env_key: &str) -> Result<String, CredentialError> {
        self.get(key, env_key).ok_or_else(|| CredentialError::Missing {
            backend: self.backend.to_string(),
            field: match self.source {
                MaterialSource::Environment => env_key.to_string(),
                _ => key.to_string(),
            },
        })
    }
}

/// Resolve `backend`'s material from `source`.
///
/// Fails on the first absent field, naming it; nothing is defaulted.
pub fn resolve_material(
    backend: Backend,
    source: &MaterialSource,
    env: &dyn EnvLookup,
) -> Result<CredentialMaterial, CredentialError> {
    let profile = match source {
        MaterialSource::Profile { path, name } => {
            if backend != Backend::Aws {
                return Err(CredentialError::UnsupportedSource {
                    backend: backend.to_string(),
                    source_kind: source.kind().to_string(),
                });
            }
            let content = std::fs::read_to_string(path).map_err(|source| CredentialError::Io {
                path: path.display().to_string(),
                source,
            })?;
            let section = ini_section(&content, name).ok_or_else(|| CredentialError::Missing {
                backend: backend.to_string(),
                field: format!("profile [{}]", name),
            })?;
            Some(section)
        }
        _ => None,
    };
    let fields = Fields {
        backend,
        source,
        env,
        profile,
    };

    match backend {
        Backend::Aws => {
            let key_id = fields.require("aws_access_key_id", "AWS_ACCESS_KEY_ID")?;
            let secret = fields.require("aws_secret_access_key", "AWS_SECRET_ACCESS_KEY")?;
            let token = fields.get("aws_session_token", "AWS_SESSION_TOKEN");
            let mut content = format!(
                "[default]\naws_access_key_id = {}\naws_secret_access_key = {}\n",
                key_id, secret
            );
            if let Some(token) = token {
                content.push_str(&format!("aws_session_token = {}\n", token));
            }
            Ok(CredentialMaterial {
                backend,
                content,
                project_id: None,
            })
        }
        Backend::Gcp => {
            let key = match source {
                MaterialSource::Environment => {
                    let path = fields.require("credentials", "GOOGLE_APPLICATION_CREDENTIALS")?;
                    std::fs::read_to_string(&path)
                        .map_err(|source| CredentialError::Io { path, source })?
                }
                _ => fields.require("credentials", "GOOGLE_APPLICATION_CREDENTIALS")?,
            };
            let parsed: Value = serde_json::from_str(&key).map_err(|e| CredentialError::Malformed {
                backend: backend.to_string(),
                reason: format!("service account key is not JSON: {}", e),
            })?;
            let project_id = match fields.get("project_id", "GCP_PROJECT_ID") {
                Some(project) => project,
                None => parsed
                    .get("project_id")
                    .and_then(Value::as_str)
                    .map(str::to_string)
                    .ok_or_else(|| CredentialError::Missing {
                        backend: backend.to_string(),
                        field: match source {
                            MaterialSource::Environment => "GCP_PROJECT_ID".to_string(),
                            _ => "project_id".to_string(),
                        },
                    })?,
            };
            Ok(CredentialMaterial {
                backend,
                content: key,
                project_id: Some(project_id),
            })
        }
        Backend::Azure => {
            let client_id = fields.require("client_id", "AZURE_CLIENT_ID")?;
            let client_secret = fields.require("client_secret", "AZURE_CLIENT_SECRET")?;
            let tenant_id = fields.require("tenant_id", "AZURE_TENANT_ID")?;
            let subscription_id = fields.require("subscription_id", "AZURE_SUBSCRIPTION_ID")?;
            let content = serde_json::to_string_pretty(&json!({
                "clientId": client_id,
                "clientSecret": client_secret,
                "subscriptionId": subscription_id,
                "tenantId": tenant_id,
            }))
            .map_err(|e| CredentialError::Malformed {
                backend: backend.to_string(),
                reason: e.to_string(),
            })?;
            Ok(CredentialMaterial {
                backend,
                content,
                project_id: None,
            })
        }
    }
}

/// `key = value` pairs of `[section]` in an INI document.
fn ini_section(content: &str, section: &str) -> Option<BTreeMap<String, String>> {
    let mut found = None;
    let mut current: Option<&str> = None;
    for line in content.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') || line.starts_with(';') {
            continue;
        }
        if let Some(name) = line.strip_prefix('[').and_then(|l| l.strip_suffix(']')) {
            current = Some(name.trim());
            if current == Some(section) {
                found.get_or_insert_with(BTreeMap::new);
            }
            continue;
        }
        if current != Some(section) {
            continue;
        }
        if let (Some(values), Some((key, value))) = (found.as_mut(), line.split_once('=')) {
            values.insert(key.trim().to_string(), value.trim().to_string());
        }
    }
    found
}

pub fn secret_object(namespace: &str, material: &CredentialMaterial) -> Value {
    let mut object = material.backend.secret_ref(namespace).object_skeleton();
    object["metadata"]["labels"] = json!({ "app.kubernetes.io/managed-by": "devplane" });
    object["type"] = json!("Opaque");
    object["data"] = json!({});
    object["data"][CREDENTIALS_KEY] = json!(base64::engine::general_purpose::STANDARD.encode(&material.content));
    object
}

/// `ProviderConfig` referencing the secret by namespace/name/key.
pub fn provider_config_object(namespace: &str, material: &CredentialMaterial) -> Result<Value, serde_json::Error> {
    let mut spec = ProviderConfigSpec::from_secret(namespace, material.backend.secret_name(), CREDENTIALS_KEY);
    spec.project_id = material.project_id.clone();
    let mut object = material.backend.provider_config_ref().object_skeleton();
    object["spec"] = serde_json::to_value(spec)?;
    Ok(object)
}

/// Writes and inspects credentials in one namespace.
pub struct CredentialsProvisioner {
    client: Arc<dyn ResourceClient>,
    namespace: String,
    policy: RetryPolicy,
}

impl CredentialsProvisioner {
    pub fn new(client: Arc<dyn ResourceClient>, namespace: impl Into<String>, policy: RetryPolicy) -> Self {
        Self {
            client,
            namespace: namespace.into(),
            policy,
        }
    }

    /// Resolve and persist `backend`'s credentials.
    pub async fn configure(
        &self,
        backend: Backend,
        source: &MaterialSource,
        env: &dyn EnvLookup,
    ) -> Result<CredentialRecord, CredentialError> {
        let material = resolve_material(backend, source, env)?;
        self.persist(&material).await
    }

    pub async fn persist(&self, material: &CredentialMaterial) -> Result<CredentialRecord, CredentialError> {
        let backend = material.backend;
        let secret = backend.secret_ref(&self.namespace);
        let (outcome, _) = upsert(self.client.as_ref(), &secret, &secret_object(&self.namespace, material), &self.policy).await?;
        info!("{:?} secret {}", outcome, secret);

        let config = backend.provider_config_ref();
        let body = provider_config_object(&self.namespace, material).map_err(|e| CredentialError::Malformed {
            backend: backend.to_string(),
            reason: e.to_string(),
        })?;
        let (outcome, _) = upsert(self.client.as_ref(), &config, &body, &self.policy).await?;
        info!("{:?} provider config {}", outcome, config);

        Ok(CredentialRecord {
            backend,
            secret_name: backend.secret_name(),
            config_name: PROVIDER_CONFIG_NAME.to_string(),
            configured: true,
        })
    }

    /// Read back whether `backend` is configured.
    pub async fn status(&self, backend: Backend) -> Result<CredentialRecord, CredentialError> {
        let secret = self.client.get_opt(&backend.secret_ref(&self.namespace)).await?;
        let config = self.client.get_opt(&backend.provider_config_ref()).await?;
        Ok(CredentialRecord {
            backend,
            secret_name: backend.secret_name(),
            config_name: PROVIDER_CONFIG_NAME.to_string(),
            configured: secret.is_some() && config.is_some(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cluster_client::MockResourceClient;
    use std::io::Write;

    const NS: &str = "crossplane-system";

    fn aws_env() -> HashMap<String, String> {
        HashMap::from([
            ("AWS_ACCESS_KEY_ID".to_string(), "AKIAEXAMPLE".to_string()),
            ("AWS_SECRET_ACCESS_KEY".to_string(), "s3cr3t".to_string()),
        ])
    }

    fn no_env() -> HashMap<String, String> {
        HashMap::new()
    }

    fn provisioner(mock: &MockResourceClient) -> CredentialsProvisioner {
        CredentialsProvisioner::new(Arc::new(mock.clone()), NS, RetryPolicy::default())
    }

    fn decoded_secret(mock: &MockResourceClient, backend: Backend) -> String {
        let secret = mock.object(&backend.secret_ref(NS)).unwrap();
        let encoded = secret["data"][CREDENTIALS_KEY].as_str().unwrap();
        let bytes = base64::engine::general_purpose::STANDARD.decode(encoded).unwrap();
        String::from_utf8(bytes).unwrap()
    }

    #[tokio::test]
    async fn test_configure_twice_leaves_one_secret_and_one_config() {
        let mock = MockResourceClient::new();
        let provisioner = provisioner(&mock);

        provisioner.configure(Backend::Aws, &MaterialSource::Environment, &aws_env()).await.unwrap();
        provisioner.configure(Backend::Aws, &MaterialSource::Environment, &aws_env()).await.unwrap();

        assert_eq!(mock.count(Backend::Aws.secret_ref(NS).kind()), 1);
        assert_eq!(mock.count(Backend::Aws.provider_config_ref().kind()), 1);
        let content = decoded_secret(&mock, Backend::Aws);
        assert!(content.contains("aws_access_key_id = AKIAEXAMPLE"));
        assert!(content.contains("aws_secret_access_key = s3cr3t"));
    }

    #[tokio::test]
    async fn test_provider_config_references_secret_without_material() {
        let mock = MockResourceClient::new();
        provisioner(&mock)
            .configure(Backend::Aws, &MaterialSource::Environment, &aws_env())
            .await
            .unwrap();

        let config = mock.object(&Backend::Aws.provider_config_ref()).unwrap();
        assert_eq!(config["apiVersion"], "aws.upbound.io/v1beta1");
        let secret_ref = &config["spec"]["credentials"]["secretRef"];
        assert_eq!(secret_ref["namespace"], NS);
        assert_eq!(secret_ref["name"], "aws-credentials");
        assert_eq!(secret_ref["key"], CREDENTIALS_KEY);
        assert!(!config.to_string().contains("s3cr3t"));
    }

    #[test]
    fn test_missing_env_names_exact_variable() {
        let mut env = aws_env();
        env.remove("AWS_SECRET_ACCESS_KEY");
        let err = resolve_material(Backend::Aws, &MaterialSource::Environment, &env).unwrap_err();
        assert!(
            matches!(err, CredentialError::Missing { ref field, .. } if field == "AWS_SECRET_ACCESS_KEY"),
            "unexpected error: {:?}",
            err
        );
    }

    #[test]
    fn test_missing_explicit_field_names_field() {
        let values = BTreeMap::from([
            ("client_id".to_string(), "id".to_string()),
            ("client_secret".to_string(), "secret".to_string()),
            ("tenant_id".to_string(), "tenant".to_string()),
        ]);
        let err = resolve_material(Backend::Azure, &MaterialSource::Explicit(values), &no_env()).unwrap_err();
        assert!(matches!(err, CredentialError::Missing { ref field, .. } if field == "subscription_id"));
    }

    #[test]
    fn test_aws_profile_is_read_from_ini_section() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            "[default]\naws_access_key_id = DEFAULT\naws_secret_access_key = d\n\n[dev]\naws_access_key_id = DEVKEY\naws_secret_access_key = devsecret\naws_session_token = tok"
        )
        .unwrap();
        let source = MaterialSource::Profile {
            path: file.path().to_path_buf(),
            name: "dev".to_string(),
        };

        let material = resolve_material(Backend::Aws, &source, &no_env()).unwrap();
        assert!(material.content.contains("aws_access_key_id = DEVKEY"));
        assert!(material.content.contains("aws_session_token = tok"));
        assert!(!material.content.contains("DEFAULT"));
    }

    #[test]
    fn test_unknown_profile_is_missing() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[default]\naws_access_key_id = x").unwrap();
        let source = MaterialSource::Profile {
            path: file.path().to_path_buf(),
            name: "prod".to_string(),
        };
        assert!(matches!(
            resolve_material(Backend::Aws, &source, &no_env()),
            Err(CredentialError::Missing { .. })
        ));
    }

    #[test]
    fn test_gcp_profile_is_unsupported() {
        let source = MaterialSource::Profile {
            path: PathBuf::from("/nonexistent"),
            name: "default".to_string(),
        };
        assert!(matches!(
            resolve_material(Backend::Gcp, &source, &no_env()),
            Err(CredentialError::UnsupportedSource { .. })
        ));
    }

    #[test]
    fn test_gcp_key_file_from_env_sets_project() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{"type":"service_account","project_id":"from-key"}}"#).unwrap();
        let env = HashMap::from([(
            "GOOGLE_APPLICATION_CREDENTIALS".to_string(),
            file.path().display().to_string(),
        )]);

        let material = resolve_material(Backend::Gcp, &MaterialSource::Environment, &env).unwrap();
        assert_eq!(material.project_id.as_deref(), Some("from-key"));

        let config = provider_config_object(NS, &material).unwrap();
        assert_eq!(config["spec"]["projectID"], "from-key");
    }

    #[test]
    fn test_gcp_rejects_non_json_key() {
        let values = BTreeMap::from([
            ("credentials".to_string(), "not json".to_string()),
            ("project_id".to_string(), "p".to_string()),
        ]);
        assert!(matches!(
            resolve_material(Backend::Gcp, &MaterialSource::Explicit(values), &no_env()),
            Err(CredentialError::Malformed { .. })
        ));
    }

    #[tokio::test]
    async fn test_status_requires_both_objects() {
        let mock = MockResourceClient::new();
        let provisioner = provisioner(&mock);
        assert!(!provisioner.status(Backend::Aws).await.unwrap().configured);

        provisioner.configure(Backend::Aws, &MaterialSource::Environment, &aws_env()).await.unwrap();
        assert!(provisioner.status(Backend::Aws).await.unwrap().configured);

        mock.delete(&Backend::Aws.provider_config_ref()).await.unwrap();
        assert!(!provisioner.status(Backend::Aws).await.unwrap().configured);
    }
}
