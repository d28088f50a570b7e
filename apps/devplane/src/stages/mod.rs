//! Pipeline stages
//!
//! cluster -> package-controller -> plugins -> credentials:<backend> ->
//! chart:<release>. Each stage owns its desired-state producer and its
//! convergence predicate; the orchestrator only sequences them.

mod charts;
mod cluster;
mod credentials;
pub(crate) mod package_controller;
mod plugins;

pub use charts::ChartStage;
pub use cluster::ClusterStage;
pub use credentials::CredentialsStage;
pub use package_controller::PackageControllerStage;
pub use plugins::{provider_ref, PluginsStage};

use crate::backoff::RetryPolicy;
use crate::cluster::ClusterRuntime;
use crate::config::Config;
use crate::credentials::EnvLookup;
use crate::diagnostics::{collect_conditions, error_messages, unhealthy};
use crate::health::PollConfig;
use crate::installer::{HelmBackend, PackageInstaller};
use crate::orchestrator::Stage;
use cluster_client::{ResourceClient, ResourceKind};
use std::sync::Arc;

/// Everything a stage needs, shared across the run.
#[derive(Clone)]
pub struct StageContext {
    pub config: Arc<Config>,
    pub client: Arc<dyn ResourceClient>,
    pub helm: Arc<dyn HelmBackend>,
    pub runtime: Arc<dyn ClusterRuntime>,
    pub env: Arc<dyn EnvLookup>,
    pub poll: PollConfig,
    pub retry: RetryPolicy,
}

impl StageContext {
    pub fn new(
        config: Config,
        client: Arc<dyn ResourceClient>,
        helm: Arc<dyn HelmBackend>,
        runtime: Arc<dyn ClusterRuntime>,
        env: Arc<dyn EnvLookup>,
    ) -> Self {
        let poll = config.timeouts.poll_config();
        let retry = config.timeouts.retry_policy();
        Self {
            config: Arc::new(config),
            client,
            helm,
            runtime,
            env,
            poll,
            retry,
        }
    }

    pub fn installer(&self) -> PackageInstaller {
        PackageInstaller::new(self.helm.clone())
    }
}

/// Every stage of a full `up`, in order.
pub fn build_pipeline(ctx: &StageContext) -> Vec<Box<dyn Stage>> {
    let mut stages: Vec<Box<dyn Stage>> = vec![
        Box::new(ClusterStage::new(ctx.clone())),
        Box::new(PackageControllerStage::new(ctx.clone())),
        Box::new(PluginsStage::new(ctx.clone(), None)),
    ];
    for credential in &ctx.config.credentials {
        stages.push(Box::new(CredentialsStage::new(ctx.clone(), credential.clone())));
    }
    for chart in &ctx.config.charts {
        stages.push(Box::new(ChartStage::new(ctx.clone(), chart.clone())));
    }
    stages
}

/// Messages for unhealthy Deployments in `namespace`.
async fn deployment_messages(client: &dyn ResourceClient, namespace: &str) -> Vec<String> {
    let deployments = ResourceKind::new("apps", "v1", "Deployment");
    match collect_conditions(client, &[deployments], Some(namespace), None).await {
        Ok(snapshots) => {
            let unhealthy: Vec<_> = unhealthy(&snapshots).into_iter().cloned().collect();
            error_messages(&unhealthy)
        }
        Err(e) => vec![format!("failed to list deployments in {}: {}", namespace, e)],
    }
}
