//! # Configuration
//!
//! `devplane.yaml` declares the cluster, the package controller release,
//! plugins, credential backends and charts. Relative values-file paths are
//! resolved against the directory holding the config file. The whole
//! document is validated at load so a malformed override or duplicate name
//! fails before anything touches a cluster.

use crate::backoff::RetryPolicy;
use crate::credentials::{Backend, EnvLookup, MaterialSource};
use crate::error::Error;
use crate::health::PollConfig;
use crate::installer::ChartSpec;
use crate::values::{merge, parse_overrides, ValueTree};
use serde::Deserialize;
use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::debug;

pub const DEFAULT_CONFIG_PATH: &str = "devplane.yaml";

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct Config {
    #[serde(default)]
    pub cluster: ClusterConfig,
    #[serde(default)]
    pub package_controller: PackageControllerConfig,
    #[serde(default)]
    pub plugins: Vec<PluginConfig>,
    #[serde(default)]
    pub credentials: Vec<CredentialConfig>,
    #[serde(default)]
    pub charts: Vec<ChartConfig>,
    #[serde(default)]
    pub timeouts: Timeouts,

    /// Directory relative paths are resolved against
    #[serde(skip)]
    pub base_dir: PathBuf,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct ClusterConfig {
    #[serde(default = "default_cluster_name")]
    pub name: String,
    /// Node image, e.g. "kindest/node:v1.30.0"
    #[serde(default)]
    pub image: Option<String>,
    #[serde(default)]
    pub workers: u32,
    #[serde(default)]
    pub ports: Vec<PortMapping>,
    #[serde(default)]
    pub mounts: Vec<Mount>,
    #[serde(default)]
    pub registry_mirrors: Vec<RegistryMirror>,
}

impl Default for ClusterConfig {
    fn default() -> Self {
        Self {
            name: default_cluster_name(),
            image: None,
            workers: 0,
            ports: Vec::new(),
            mounts: Vec::new(),
            registry_mirrors: Vec::new(),
        }
    }
}

impl ClusterConfig {
    /// kubeconfig context kind writes for this cluster
    pub fn kube_context(&self) -> String {
        format!("kind-{}", self.name)
    }
}

fn default_cluster_name() -> String {
    "devplane".to_string()
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct PortMapping {
    pub container_port: u16,
    pub host_port: u16,
    #[serde(default)]
    pub protocol: Option<String>,
    #[serde(default)]
    pub listen_address: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct Mount {
    pub host_path: String,
    pub container_path: String,
    #[serde(default)]
    pub read_only: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct RegistryMirror {
    /// Registry host being mirrored, e.g. "docker.io"
    pub registry: String,
    pub endpoint: String,
}

/// Values sources shared by every chart install.
#[derive(Debug, Clone, Default)]
pub struct ValuesSources {
    /// Merged first, in order
    pub values_files: Vec<PathBuf>,
    /// Merged after the files
    pub values: ValueTree,
    /// `a.b=value` overrides, applied last
    pub set: Vec<String>,
}

impl ValuesSources {
    /// Files, then inline values, then `set`, then `extra_set`.
    pub fn resolve(&self, base_dir: &Path, extra_set: &[String]) -> Result<ValueTree, Error> {
        let mut sources = Vec::with_capacity(self.values_files.len() + 1);
        for file in &self.values_files {
            let path = base_dir.join(file);
            debug!("Loading values file {}", path.display());
            let content = std::fs::read_to_string(&path)
                .map_err(|e| Error::NotFound(format!("values file {}: {}", path.display(), e)))?;
            sources.push(ValueTree::from_yaml_str(&content)?);
        }
        sources.push(self.values.clone());

        let pairs: Vec<&str> = self
            .set
            .iter()
            .chain(extra_set)
            .map(String::as_str)
            .collect();
        let overrides = parse_overrides(&pairs)?;
        Ok(merge(&sources, &overrides))
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(from = "PackageControllerDoc")]
pub struct PackageControllerConfig {
    pub release: String,
    pub namespace: String,
    pub chart: String,
    pub repo: String,
    pub version: Option<String>,
    pub values: ValuesSources,
}

/// On-disk shape of `packageController`. Values sources sit beside the
/// release fields; serde cannot deny unknown keys through `flatten`.
#[derive(Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
struct PackageControllerDoc {
    #[serde(default = "default_controller_release")]
    release: String,
    #[serde(default = "default_controller_namespace")]
    namespace: String,
    #[serde(default = "default_controller_chart")]
    chart: String,
    #[serde(default = "default_controller_repo")]
    repo: String,
    #[serde(default)]
    version: Option<String>,
    #[serde(default)]
    values_files: Vec<PathBuf>,
    #[serde(default)]
    values: ValueTree,
    #[serde(default)]
    set: Vec<String>,
}

impl From<PackageControllerDoc> for PackageControllerConfig {
    fn from(doc: PackageControllerDoc) -> Self {
        Self {
            release: doc.release,
            namespace: doc.namespace,
            chart: doc.chart,
            repo: doc.repo,
            version: doc.version,
            values: ValuesSources {
                values_files: doc.values_files,
                values: doc.values,
                set: doc.set,
            },
        }
    }
}

impl Default for PackageControllerConfig {
    fn default() -> Self {
        Self {
            release: default_controller_release(),
            namespace: default_controller_namespace(),
            chart: default_controller_chart(),
            repo: default_controller_repo(),
            version: None,
            values: ValuesSources::default(),
        }
    }
}

impl PackageControllerConfig {
    pub fn chart_spec(&self) -> ChartSpec {
        ChartSpec {
            release: self.release.clone(),
            namespace: self.namespace.clone(),
            chart: self.chart.clone(),
            repo: Some(self.repo.clone()),
            version: self.version.clone(),
        }
    }
}

fn default_controller_release() -> String {
    "crossplane".to_string()
}

fn default_controller_namespace() -> String {
    "crossplane-system".to_string()
}

fn default_controller_chart() -> String {
    "crossplane".to_string()
}

fn default_controller_repo() -> String {
    "https://charts.crossplane.io/stable".to_string()
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct PluginConfig {
    /// Provider object name
    pub name: String,
    /// OCI package reference
    pub package: String,
    #[serde(default)]
    pub package_pull_policy: Option<String>,
    #[serde(default = "default_true")]
    pub required: bool,
}

/// Where a backend's material comes from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CredentialSourceConfig {
    Environment,
    Profile {
        profile: String,
        /// Defaults to ~/.aws/credentials
        path: Option<PathBuf>,
    },
    Explicit {
        values: BTreeMap<String, String>,
    },
}

fn default_profile() -> String {
    "default".to_string()
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(try_from = "CredentialDoc")]
pub struct CredentialConfig {
    pub backend: Backend,
    pub source: CredentialSourceConfig,
    pub required: bool,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
enum SourceKind {
    Environment,
    Profile,
    Explicit,
}

/// On-disk shape of a `credentials` entry.
#[derive(Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
struct CredentialDoc {
    backend: Backend,
    source: SourceKind,
    #[serde(default)]
    profile: Option<String>,
    #[serde(default)]
    path: Option<PathBuf>,
    #[serde(default)]
    values: Option<BTreeMap<String, String>>,
    #[serde(default)]
    required: bool,
}

impl TryFrom<CredentialDoc> for CredentialConfig {
    type Error = String;

    fn try_from(doc: CredentialDoc) -> Result<Self, Self::Error> {
        let source = match doc.source {
            SourceKind::Environment => {
                if doc.profile.is_some() || doc.path.is_some() || doc.values.is_some() {
                    return Err(format!("{}: environment source takes no profile, path or values", doc.backend));
                }
                CredentialSourceConfig::Environment
            }
            SourceKind::Profile => {
                if doc.values.is_some() {
                    return Err(format!("{}: profile source takes no values", doc.backend));
                }
                CredentialSourceConfig::Profile {
                    profile: doc.profile.unwrap_or_else(default_profile),
                    path: doc.path,
                }
            }
            SourceKind::Explicit => {
                if doc.profile.is_some() || doc.path.is_some() {
                    return Err(format!("{}: explicit source takes no profile or path", doc.backend));
                }
                let values = doc
                    .values
                    .ok_or_else(|| format!("{}: explicit source requires values", doc.backend))?;
                CredentialSourceConfig::Explicit { values }
            }
        };
        Ok(Self {
            backend: doc.backend,
            source,
            required: doc.required,
        })
    }
}

impl CredentialSourceConfig {
    pub fn material_source(&self, base_dir: &Path, env: &dyn EnvLookup) -> Result<MaterialSource, Error> {
        Ok(match self {
            CredentialSourceConfig::Environment => MaterialSource::Environment,
            CredentialSourceConfig::Explicit { values } => MaterialSource::Explicit(values.clone()),
            CredentialSourceConfig::Profile { profile, path } => MaterialSource::Profile {
                path: match path {
                    Some(path) => base_dir.join(path),
                    None => default_profile_path(env)?,
                },
                name: profile.clone(),
            },
        })
    }
}

/// ~/.aws/credentials, honoring AWS_SHARED_CREDENTIALS_FILE.
pub fn default_profile_path(env: &dyn EnvLookup) -> Result<PathBuf, Error> {
    if let Some(path) = env.var("AWS_SHARED_CREDENTIALS_FILE") {
        return Ok(PathBuf::from(path));
    }
    env.var("HOME")
        .map(|home| Path::new(&home).join(".aws").join("credentials"))
        .ok_or_else(|| Error::validation("HOME is not set; pass an explicit profile path"))
}

#[derive(Debug, Clone, Deserialize)]
#[serde(from = "ChartDoc")]
pub struct ChartConfig {
    pub release: String,
    pub namespace: String,
    pub chart: String,
    pub repo: Option<String>,
    pub version: Option<String>,
    pub values: ValuesSources,
    pub required: bool,
}

/// On-disk shape of a `charts` entry.
#[derive(Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
struct ChartDoc {
    release: String,
    #[serde(default = "default_chart_namespace")]
    namespace: String,
    chart: String,
    #[serde(default)]
    repo: Option<String>,
    #[serde(default)]
    version: Option<String>,
    #[serde(default)]
    values_files: Vec<PathBuf>,
    #[serde(default)]
    values: ValueTree,
    #[serde(default)]
    set: Vec<String>,
    #[serde(default)]
    required: bool,
}

impl From<ChartDoc> for ChartConfig {
    fn from(doc: ChartDoc) -> Self {
        Self {
            release: doc.release,
            namespace: doc.namespace,
            chart: doc.chart,
            repo: doc.repo,
            version: doc.version,
            values: ValuesSources {
                values_files: doc.values_files,
                values: doc.values,
                set: doc.set,
            },
            required: doc.required,
        }
    }
}

impl ChartConfig {
    pub fn chart_spec(&self) -> ChartSpec {
        ChartSpec {
            release: self.release.clone(),
            namespace: self.namespace.clone(),
            chart: self.chart.clone(),
            repo: self.repo.clone(),
            version: self.version.clone(),
        }
    }
}

fn default_chart_namespace() -> String {
    "default".to_string()
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct Timeouts {
    #[serde(default = "default_poll_interval")]
    pub poll_interval_secs: u64,
    #[serde(default = "default_convergence")]
    pub convergence_secs: u64,
    #[serde(default = "default_failures")]
    pub max_consecutive_failures: u32,
    /// Concurrent health polls per stage
    #[serde(default = "default_concurrency")]
    pub max_concurrency: usize,
    #[serde(default = "default_attempts")]
    pub apply_attempts: u32,
}

impl Default for Timeouts {
    fn default() -> Self {
        Self {
            poll_interval_secs: default_poll_interval(),
            convergence_secs: default_convergence(),
            max_consecutive_failures: default_failures(),
            max_concurrency: default_concurrency(),
            apply_attempts: default_attempts(),
        }
    }
}

impl Timeouts {
    pub fn poll_config(&self) -> PollConfig {
        PollConfig {
            interval: Duration::from_secs(self.poll_interval_secs),
            deadline: Duration::from_secs(self.convergence_secs),
            max_consecutive_failures: self.max_consecutive_failures,
        }
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::with_attempts(self.apply_attempts)
    }
}

fn default_poll_interval() -> u64 {
    2
}

fn default_convergence() -> u64 {
    300
}

fn default_failures() -> u32 {
    5
}

fn default_concurrency() -> usize {
    4
}

fn default_attempts() -> u32 {
    3
}

impl Config {
    /// Read and validate `path`.
    pub fn load(path: &Path) -> Result<Self, Error> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| Error::NotFound(format!("config file {}: {}", path.display(), e)))?;
        let base_dir = path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .map_or_else(|| PathBuf::from("."), Path::to_path_buf);
        Self::parse(&content, base_dir)
    }

    pub fn parse(content: &str, base_dir: PathBuf) -> Result<Self, Error> {
        let mut config: Config = serde_yaml::from_str(content)?;
        config.base_dir = base_dir;
        config.validate()?;
        Ok(config)
    }

    pub fn chart(&self, release: &str) -> Option<&ChartConfig> {
        self.charts.iter().find(|c| c.release == release)
    }

    pub fn credential(&self, backend: Backend) -> Option<&CredentialConfig> {
        self.credentials.iter().find(|c| c.backend == backend)
    }

    pub fn validate(&self) -> Result<(), Error> {
        if !is_dns_label(&self.cluster.name) {
            return Err(Error::validation(format!(
                "cluster name '{}' must be a lowercase DNS label",
                self.cluster.name
            )));
        }
        for port in &self.cluster.ports {
            if port.container_port == 0 || port.host_port == 0 {
                return Err(Error::validation(format!(
                    "port mapping {}:{} must use non-zero ports",
                    port.host_port, port.container_port
                )));
            }
        }
        for mount in &self.cluster.mounts {
            if !mount.container_path.starts_with('/') {
                return Err(Error::validation(format!(
                    "mount containerPath '{}' must be absolute",
                    mount.container_path
                )));
            }
        }

        let mut plugin_names = HashSet::new();
        for plugin in &self.plugins {
            if !is_dns_label(&plugin.name) {
                return Err(Error::validation(format!("invalid plugin name '{}'", plugin.name)));
            }
            if plugin.package.trim().is_empty() {
                return Err(Error::validation(format!("plugin '{}' has no package", plugin.name)));
            }
            if !plugin_names.insert(&plugin.name) {
                return Err(Error::validation(format!("duplicate plugin '{}'", plugin.name)));
            }
        }

        let mut backends = HashSet::new();
        for credential in &self.credentials {
            if !backends.insert(credential.backend) {
                return Err(Error::validation(format!(
                    "credentials for {} declared twice",
                    credential.backend
                )));
            }
        }

        let mut releases = HashSet::new();
        for chart in &self.charts {
            if !releases.insert(&chart.release) {
                return Err(Error::validation(format!("duplicate chart release '{}'", chart.release)));
            }
            parse_overrides(&chart.values.set)?;
        }
        parse_overrides(&self.package_controller.values.set)?;

        let t = &self.timeouts;
        if t.poll_interval_secs == 0 || t.convergence_secs == 0 {
            return Err(Error::validation("poll interval and convergence timeout must be positive"));
        }
        if t.max_concurrency == 0 || t.apply_attempts == 0 || t.max_consecutive_failures == 0 {
            return Err(Error::validation(
                "maxConcurrency, applyAttempts and maxConsecutiveFailures must be positive",
            ));
        }
        Ok(())
    }
}

fn is_dns_label(name: &str) -> bool {
    !name.is_empty()
        && name.len() <= 63
        && name
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-')
        && !name.starts_with('-')
        && !name.ends_with('-')
}
