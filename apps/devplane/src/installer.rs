//! # Package installer
//!
//! Installs, upgrades and uninstalls Helm chart releases. The `helm` binary
//! sits behind `HelmBackend` so the install flow (repository naming, hooks,
//! confirmation) can be tested without a cluster.

use crate::confirm::Confirm;
use crate::error::InstallError;
use crate::values::ValueTree;
use serde::{Deserialize, Deserializer, Serialize};
use std::fmt;
use std::process::Stdio;
use std::sync::Arc;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::{debug, info};

/// Length of the hostname-derived part of a repository name.
pub const REPO_PREFIX_LEN: usize = 20;

/// Hex digits of the URL hash appended to a repository name.
const REPO_HASH_LEN: usize = 8;

/// Local repository name for a chart source URL.
///
/// Lowercased hostname with every non-alphanumeric character replaced by
/// `-`, truncated to `REPO_PREFIX_LEN`, then `-` and a short blake3 hash of
/// the full URL. The same URL always yields the same name.
pub fn repo_name(url: &str) -> String {
    let rest = url.split_once("://").map_or(url, |(_, rest)| rest);
    let host = rest.split(['/', '?', '#']).next().unwrap_or(rest);
    let sanitized: String = host
        .chars()
        .take(REPO_PREFIX_LEN)
        .map(|c| {
            if c.is_ascii_alphanumeric() {
                c.to_ascii_lowercase()
            } else {
                '-'
            }
        })
        .collect();
    let prefix = match sanitized.trim_matches('-') {
        "" => "repo",
        trimmed => trimmed,
    };
    let hash = blake3::hash(url.as_bytes()).to_hex();
    format!("{}-{}", prefix, &hash.as_str()[..REPO_HASH_LEN])
}

/// Which chart and where it goes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChartSpec {
    pub release: String,
    pub namespace: String,
    /// Chart name within `repo`, or a local path / full reference when
    /// `repo` is unset
    pub chart: String,
    /// Repository URL; `oci://` references are used directly
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub repo: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
}

/// Installed state of one release.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReleaseState {
    pub release: String,
    pub namespace: String,
    pub installed: bool,
    pub revision: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub chart: Option<String>,
}

impl ReleaseState {
    pub fn absent(release: &str, namespace: &str) -> Self {
        Self {
            release: release.to_string(),
            namespace: namespace.to_string(),
            installed: false,
            revision: None,
            status: None,
            chart: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApplyMode {
    Install,
    Upgrade,
}

impl ApplyMode {
    fn verb(&self) -> &'static str {
        match self {
            ApplyMode::Install => "install",
            ApplyMode::Upgrade => "upgrade",
        }
    }
}

/// Chart operations against one cluster.
#[async_trait::async_trait]
pub trait HelmBackend: Send + Sync {
    /// Register `url` under `name`; re-adding the same pair is a no-op.
    async fn ensure_repo(&self, name: &str, url: &str) -> Result<(), InstallError>;

    async fn apply(
        &self,
        mode: ApplyMode,
        spec: &ChartSpec,
        chart_ref: &str,
        values_yaml: &str,
    ) -> Result<ReleaseState, InstallError>;

    async fn uninstall(&self, release: &str, namespace: &str) -> Result<(), InstallError>;

    /// `None` when the release does not exist.
    async fn status(&self, release: &str, namespace: &str) -> Result<Option<ReleaseState>, InstallError>;

    async fn list(&self, namespace: Option<&str>) -> Result<Vec<ReleaseState>, InstallError>;
}

/// Last-mile structural edit of the resolved values.
pub type ValuesTransformer = Arc<dyn Fn(ValueTree) -> ValueTree + Send + Sync>;

/// Observer of the final values; must not alter behavior.
pub type ValuesLogger = Arc<dyn Fn(&ValueTree) + Send + Sync>;

/// Namespace-scoped prerequisite run before the chart is applied.
#[async_trait::async_trait]
pub trait PreInstall: Send + Sync {
    async fn run(&self, namespace: &str) -> Result<(), InstallError>;
}

/// Optional install hooks. Unset hooks are skipped.
#[derive(Clone, Default)]
pub struct InstallOptions {
    pub values_transformer: Option<ValuesTransformer>,
    pub values_logger: Option<ValuesLogger>,
    pub pre_install: Option<Arc<dyn PreInstall>>,
}

impl fmt::Debug for InstallOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InstallOptions")
            .field("values_transformer", &self.values_transformer.is_some())
            .field("values_logger", &self.values_logger.is_some())
            .field("pre_install", &self.pre_install.is_some())
            .finish()
    }
}

impl InstallOptions {
    #[must_use]
    pub fn with_logger(mut self, f: impl Fn(&ValueTree) + Send + Sync + 'static) -> Self {
        self.values_logger = Some(Arc::new(f));
        self
    }

    #[must_use]
    pub fn with_pre_install(mut self, hook: Arc<dyn PreInstall>) -> Self {
        self.pre_install = Some(hook);
        self
    }
}

/// Release lifecycle on top of a `HelmBackend`.
#[derive(Clone)]
pub struct PackageInstaller {
    helm: Arc<dyn HelmBackend>,
}

impl PackageInstaller {
    pub fn new(helm: Arc<dyn HelmBackend>) -> Self {
        Self { helm }
    }

    /// Install a release that must not exist yet.
    pub async fn install(
        &self,
        spec: &ChartSpec,
        values: &ValueTree,
        options: &InstallOptions,
    ) -> Result<ReleaseState, InstallError> {
        if self.is_installed(&spec.release, &spec.namespace).await? {
            return Err(InstallError::AlreadyInstalled {
                release: spec.release.clone(),
                namespace: spec.namespace.clone(),
            });
        }
        self.apply(ApplyMode::Install, spec, values, options).await
    }

    /// Upgrade a release that must already exist.
    pub async fn upgrade(
        &self,
        spec: &ChartSpec,
        values: &ValueTree,
        options: &InstallOptions,
    ) -> Result<ReleaseState, InstallError> {
        if !self.is_installed(&spec.release, &spec.namespace).await? {
            return Err(InstallError::NotInstalled {
                release: spec.release.clone(),
                namespace: spec.namespace.clone(),
            });
        }
        self.apply(ApplyMode::Upgrade, spec, values, options).await
    }

    /// Install, or upgrade when the release is already there.
    pub async fn install_or_upgrade(
        &self,
        spec: &ChartSpec,
        values: &ValueTree,
        options: &InstallOptions,
    ) -> Result<ReleaseState, InstallError> {
        let mode = if self.is_installed(&spec.release, &spec.namespace).await? {
            ApplyMode::Upgrade
        } else {
            ApplyMode::Install
        };
        self.apply(mode, spec, values, options).await
    }

    /// Remove a release. Asks `confirm` first unless `force` is set.
    pub async fn uninstall(
        &self,
        release: &str,
        namespace: &str,
        force: bool,
        confirm: &dyn Confirm,
    ) -> Result<(), InstallError> {
        if !self.is_installed(release, namespace).await? {
            return Err(InstallError::NotInstalled {
                release: release.to_string(),
                namespace: namespace.to_string(),
            });
        }
        if !force && !confirm.confirm(&format!("Uninstall release {} from {}?", release, namespace)) {
            return Err(InstallError::ConfirmationRequired(release.to_string()));
        }
        self.helm.uninstall(release, namespace).await?;
        info!("Uninstalled release {} from {}", release, namespace);
        Ok(())
    }

    pub async fn is_installed(&self, release: &str, namespace: &str) -> Result<bool, InstallError> {
        Ok(self
            .helm
            .status(release, namespace)
            .await?
            .is_some_and(|state| state.installed))
    }

    /// Release state, reporting `installed: false` when absent.
    pub async fn status(&self, release: &str, namespace: &str) -> Result<ReleaseState, InstallError> {
        Ok(self
            .helm
            .status(release, namespace)
            .await?
            .unwrap_or_else(|| ReleaseState::absent(release, namespace)))
    }

    pub async fn list(&self, namespace: Option<&str>) -> Result<Vec<ReleaseState>, InstallError> {
        self.helm.list(namespace).await
    }

    async fn apply(
        &self,
        mode: ApplyMode,
        spec: &ChartSpec,
        values: &ValueTree,
        options: &InstallOptions,
    ) -> Result<ReleaseState, InstallError> {
        let chart_ref = self.chart_ref(spec).await?;

        if let Some(hook) = &options.pre_install {
            hook.run(&spec.namespace).await?;
        }
        let values = match &options.values_transformer {
            Some(transform) => transform(values.clone()),
            None => values.clone(),
        };
        if let Some(log) = &options.values_logger {
            log(&values);
        }

        let values_yaml = values.to_yaml_string()?;
        info!("Running helm {} for {} ({})", mode.verb(), spec.release, chart_ref);
        self.helm.apply(mode, spec, &chart_ref, &values_yaml).await
    }

    async fn chart_ref(&self, spec: &ChartSpec) -> Result<String, InstallError> {
        match &spec.repo {
            Some(url) if url.starts_with("oci://") => {
                Ok(format!("{}/{}", url.trim_end_matches('/'), spec.chart))
            }
            Some(url) => {
                let name = repo_name(url);
                self.helm.ensure_repo(&name, url).await?;
                Ok(format!("{}/{}", name, spec.chart))
            }
            None => Ok(spec.chart.clone()),
        }
    }
}

/// `helm` driven as a child process.
#[derive(Debug, Clone)]
pub struct HelmCli {
    binary: String,
    kube_context: Option<String>,
}

impl HelmCli {
    pub fn new(kube_context: Option<String>) -> Self {
        Self {
            binary: "helm".to_string(),
            kube_context,
        }
    }

    async fn run(&self, args: &[String], stdin: Option<&str>) -> Result<String, InstallError> {
        let mut cmd = Command::new(&self.binary);
        cmd.args(args);
        if let Some(context) = &self.kube_context {
            cmd.args(["--kube-context", context]);
        }
        cmd.stdin(if stdin.is_some() { Stdio::piped() } else { Stdio::null() })
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());

        debug!("Running {} {}", self.binary, args.join(" "));
        let mut child = cmd.spawn()?;
        if let (Some(input), Some(mut pipe)) = (stdin, child.stdin.take()) {
            pipe.write_all(input.as_bytes()).await?;
        }

        let output = child.wait_with_output().await?;
        if !output.status.success() {
            return Err(InstallError::Command {
                command: args.iter().take(2).cloned().collect::<Vec<_>>().join(" "),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}

/// Anchored `helm list --filter` regex matching exactly `release`.
fn exact_filter(release: &str) -> String {
    format!("^{}$", release.replace('.', "\\."))
}

fn strings<const N: usize>(args: [&str; N]) -> Vec<String> {
    args.iter().map(|s| s.to_string()).collect()
}

#[async_trait::async_trait]
impl HelmBackend for HelmCli {
    async fn ensure_repo(&self, name: &str, url: &str) -> Result<(), InstallError> {
        self.run(&strings(["repo", "add", name, url, "--force-update"]), None).await?;
        self.run(&strings(["repo", "update", name]), None).await?;
        Ok(())
    }

    async fn apply(
        &self,
        mode: ApplyMode,
        spec: &ChartSpec,
        chart_ref: &str,
        values_yaml: &str,
    ) -> Result<ReleaseState, InstallError> {
        let mut args = strings([
            mode.verb(),
            spec.release.as_str(),
            chart_ref,
            "--namespace",
            spec.namespace.as_str(),
            "--create-namespace",
            "--wait",
            "--values",
            "-",
            "--output",
            "json",
        ]);
        if let Some(version) = &spec.version {
            args.extend(strings(["--version", version.as_str()]));
        }
        let stdout = self.run(&args, Some(values_yaml)).await?;
        parse_release(&stdout)
    }

    async fn uninstall(&self, release: &str, namespace: &str) -> Result<(), InstallError> {
        if self.status(release, namespace).await?.is_none() {
            return Err(InstallError::NotInstalled {
                release: release.to_string(),
                namespace: namespace.to_string(),
            });
        }
        self.run(&strings(["uninstall", release, "--namespace", namespace, "--wait"]), None)
            .await?;
        Ok(())
    }

    async fn status(&self, release: &str, namespace: &str) -> Result<Option<ReleaseState>, InstallError> {
        let filter = exact_filter(release);
        let stdout = self
            .run(
                &strings([
                    "list",
                    "--namespace",
                    namespace,
                    "--filter",
                    filter.as_str(),
                    "--all",
                    "--output",
                    "json",
                ]),
                None,
            )
            .await?;
        parse_status(&stdout, release)
    }

    async fn list(&self, namespace: Option<&str>) -> Result<Vec<ReleaseState>, InstallError> {
        let mut args = strings(["list", "--output", "json"]);
        match namespace {
            Some(ns) => args.extend(strings(["--namespace", ns])),
            None => args.push("--all-namespaces".to_string()),
        }
        let stdout = self.run(&args, None).await?;
        parse_list(&stdout)
    }
}

/// `helm install|upgrade|status -o json`
#[derive(Debug, Deserialize)]
struct HelmRelease {
    name: String,
    namespace: String,
    version: u32,
    #[serde(default)]
    info: Option<HelmReleaseInfo>,
    #[serde(default)]
    chart: Option<HelmChart>,
}

#[derive(Debug, Deserialize)]
struct HelmReleaseInfo {
    status: String,
}

#[derive(Debug, Deserialize)]
struct HelmChart {
    metadata: HelmChartMetadata,
}

#[derive(Debug, Deserialize)]
struct HelmChartMetadata {
    name: String,
    version: String,
}

/// `helm list -o json` entry; revision is a string there
#[derive(Debug, Deserialize)]
struct HelmListEntry {
    name: String,
    namespace: String,
    #[serde(deserialize_with = "revision_from_string")]
    revision: u32,
    status: String,
    chart: String,
}

fn revision_from_string<'de, D: Deserializer<'de>>(deserializer: D) -> Result<u32, D::Error> {
    let raw = String::deserialize(deserializer)?;
    raw.parse().map_err(serde::de::Error::custom)
}

fn parse_release(stdout: &str) -> Result<ReleaseState, InstallError> {
    let release: HelmRelease =
        serde_json::from_str(stdout).map_err(|e| InstallError::Output(e.to_string()))?;
    let status = release.info.map(|i| i.status);
    Ok(ReleaseState {
        installed: status.as_deref() != Some("uninstalled"),
        release: release.name,
        namespace: release.namespace,
        revision: Some(release.version),
        status,
        chart: release
            .chart
            .map(|c| format!("{}-{}", c.metadata.name, c.metadata.version)),
    })
}

/// The entry named exactly `release`, if helm listed one.
fn parse_status(stdout: &str, release: &str) -> Result<Option<ReleaseState>, InstallError> {
    Ok(parse_list(stdout)?.into_iter().find(|state| state.release == release))
}

fn parse_list(stdout: &str) -> Result<Vec<ReleaseState>, InstallError> {
    let entries: Vec<HelmListEntry> =
        serde_json::from_str(stdout).map_err(|e| InstallError::Output(e.to_string()))?;
    Ok(entries
        .into_iter()
        .map(|e| ReleaseState {
            release: e.name,
            namespace: e.namespace,
            installed: e.status != "uninstalled",
            revision: Some(e.revision),
            status: Some(e.status),
            chart: Some(e.chart),
        })
        .collect())
}
