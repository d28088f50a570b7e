//! Test utilities: in-memory Helm and cluster runtime, plus a stage
//! context wired to the mock cluster client.

use crate::cluster::{control_plane_node, ClusterRuntime};
use crate::config::Config;
use crate::error::{ClusterError, InstallError};
use crate::installer::{ApplyMode, ChartSpec, HelmBackend, ReleaseState};
use crate::stages::package_controller::provider_crd;
use crate::stages::StageContext;
use cluster_client::MockResourceClient;
use crds::{Condition, ConditionStatus, CONDITION_ESTABLISHED};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

/// A chart from the stable Crossplane repository whose chart name is the
/// release name.
pub fn chart(release: &str, namespace: &str) -> ChartSpec {
    ChartSpec {
        release: release.to_string(),
        namespace: namespace.to_string(),
        chart: release.to_string(),
        repo: Some("https://charts.crossplane.io/stable".to_string()),
        version: None,
    }
}

#[derive(Debug, Clone)]
pub struct AppliedChart {
    pub mode: ApplyMode,
    pub release: String,
    pub namespace: String,
    pub chart_ref: String,
    pub values_yaml: String,
}

#[derive(Debug, Default)]
struct HelmState {
    repos: Vec<String>,
    releases: BTreeMap<(String, String), ReleaseState>,
    applied: Vec<AppliedChart>,
    apply_failures: HashMap<String, String>,
}

/// Helm that keeps releases in memory.
#[derive(Debug, Default)]
pub struct MockHelm {
    state: Mutex<HelmState>,
}

impl MockHelm {
    pub fn repos(&self) -> Vec<String> {
        self.state.lock().unwrap().repos.clone()
    }

    pub fn applied(&self) -> Vec<AppliedChart> {
        self.state.lock().unwrap().applied.clone()
    }

    /// Every apply of `release` fails with `stderr`.
    pub fn fail_apply(&self, release: &str, stderr: &str) {
        self.state
            .lock()
            .unwrap()
            .apply_failures
            .insert(release.to_string(), stderr.to_string());
    }
}

#[async_trait::async_trait]
impl HelmBackend for MockHelm {
    async fn ensure_repo(&self, name: &str, _url: &str) -> Result<(), InstallError> {
        let mut state = self.state.lock().unwrap();
        if !state.repos.iter().any(|r| r == name) {
            state.repos.push(name.to_string());
        }
        Ok(())
    }

    async fn apply(
        &self,
        mode: ApplyMode,
        spec: &ChartSpec,
        chart_ref: &str,
        values_yaml: &str,
    ) -> Result<ReleaseState, InstallError> {
        let mut state = self.state.lock().unwrap();
        if let Some(stderr) = state.apply_failures.get(&spec.release) {
            return Err(InstallError::Command {
                command: "install".to_string(),
                stderr: stderr.clone(),
            });
        }
        let key = (spec.release.clone(), spec.namespace.clone());
        let revision = state
            .releases
            .get(&key)
            .and_then(|r| r.revision)
            .unwrap_or(0)
            + 1;
        let release = ReleaseState {
            release: spec.release.clone(),
            namespace: spec.namespace.clone(),
            installed: true,
            revision: Some(revision),
            status: Some("deployed".to_string()),
            chart: Some(spec.chart.clone()),
        };
        state.releases.insert(key, release.clone());
        state.applied.push(AppliedChart {
            mode,
            release: spec.release.clone(),
            namespace: spec.namespace.clone(),
            chart_ref: chart_ref.to_string(),
            values_yaml: values_yaml.to_string(),
        });
        Ok(release)
    }

    async fn uninstall(&self, release: &str, namespace: &str) -> Result<(), InstallError> {
        self.state
            .lock()
            .unwrap()
            .releases
            .remove(&(release.to_string(), namespace.to_string()))
            .map(|_| ())
            .ok_or_else(|| InstallError::NotInstalled {
                release: release.to_string(),
                namespace: namespace.to_string(),
            })
    }

    async fn status(&self, release: &str, namespace: &str) -> Result<Option<ReleaseState>, InstallError> {
        Ok(self
            .state
            .lock()
            .unwrap()
            .releases
            .get(&(release.to_string(), namespace.to_string()))
            .cloned())
    }

    async fn list(&self, namespace: Option<&str>) -> Result<Vec<ReleaseState>, InstallError> {
        Ok(self
            .state
            .lock()
            .unwrap()
            .releases
            .values()
            .filter(|r| namespace.is_none_or(|ns| ns == r.namespace))
            .cloned()
            .collect())
    }
}

#[derive(Debug, Default)]
struct RuntimeState {
    existing: HashSet<String>,
    created: Vec<(String, String)>,
    deleted: Vec<String>,
}

/// Cluster runtime that records what it was asked to do.
#[derive(Debug, Default)]
pub struct MockRuntime {
    state: Mutex<RuntimeState>,
}

impl MockRuntime {
    pub fn add_existing(&self, name: &str) {
        self.state.lock().unwrap().existing.insert(name.to_string());
    }

    /// (name, rendered config) per create call
    pub fn created(&self) -> Vec<(String, String)> {
        self.state.lock().unwrap().created.clone()
    }

    pub fn deleted(&self) -> Vec<String> {
        self.state.lock().unwrap().deleted.clone()
    }
}

#[async_trait::async_trait]
impl ClusterRuntime for MockRuntime {
    async fn exists(&self, name: &str) -> Result<bool, ClusterError> {
        Ok(self.state.lock().unwrap().existing.contains(name))
    }

    async fn create(&self, name: &str, config: &str) -> Result<(), ClusterError> {
        let mut state = self.state.lock().unwrap();
        state.existing.insert(name.to_string());
        state.created.push((name.to_string(), config.to_string()));
        Ok(())
    }

    async fn delete(&self, name: &str) -> Result<(), ClusterError> {
        let mut state = self.state.lock().unwrap();
        if !state.existing.remove(name) {
            return Err(ClusterError::NotFound(name.to_string()));
        }
        state.deleted.push(name.to_string());
        Ok(())
    }

    async fn kubeconfig(&self, name: &str) -> Result<String, ClusterError> {
        if !self.state.lock().unwrap().existing.contains(name) {
            return Err(ClusterError::NotFound(name.to_string()));
        }
        Ok(format!("apiVersion: v1\nkind: Config\ncurrent-context: kind-{}\n", name))
    }
}

pub struct TestContext {
    pub stage: StageContext,
    pub mock: MockResourceClient,
    pub helm: Arc<MockHelm>,
    pub runtime: Arc<MockRuntime>,
}

pub fn context(config: &str) -> TestContext {
    context_with_env(config, &[])
}

pub fn context_with_env(config: &str, env: &[(&str, &str)]) -> TestContext {
    let config = Config::parse(config, PathBuf::from(".")).unwrap();
    let env: HashMap<String, String> = env
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();
    let mock = MockResourceClient::new();
    let helm = Arc::new(MockHelm::default());
    let runtime = Arc::new(MockRuntime::default());
    let stage = StageContext::new(
        config,
        Arc::new(mock.clone()),
        helm.clone(),
        runtime.clone(),
        Arc::new(env),
    );
    TestContext {
        stage,
        mock,
        helm,
        runtime,
    }
}

/// Seed the control-plane node of `cluster` reporting Ready.
pub fn ready_node(mock: &MockResourceClient, cluster: &str) {
    let node = control_plane_node(cluster);
    mock.insert(&node, node.object_skeleton());
    mock.set_conditions(&node, vec![Condition::new("Ready", ConditionStatus::True)]);
}

/// Seed the Provider CRD reporting Established.
pub fn established_crd(mock: &MockResourceClient) {
    let crd = provider_crd();
    mock.insert(&crd, crd.object_skeleton());
    mock.set_conditions(&crd, vec![Condition::new(CONDITION_ESTABLISHED, ConditionStatus::True)]);
}
