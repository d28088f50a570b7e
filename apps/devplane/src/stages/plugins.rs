//! Plugins stage: upsert one Provider per configured plugin, then poll them
//! all until each reports Installed and Healthy.

use super::StageContext;
use crate::config::PluginConfig;
use crate::diagnostics::{collect_conditions, error_messages, unhealthy};
use crate::error::Error;
use crate::health::{installed_and_healthy, wait_all_healthy};
use crate::orchestrator::Stage;
use crate::upsert::upsert;
use cluster_client::ResourceRef;
use crds::{Provider, ProviderSpec, PACKAGE_GROUP, PROVIDER_VERSION};
use tokio_util::sync::CancellationToken;
use tracing::info;

pub fn provider_ref(name: &str) -> ResourceRef {
    ResourceRef::cluster(PACKAGE_GROUP, PROVIDER_VERSION, "Provider", name)
}

fn provider_object(plugin: &PluginConfig) -> Result<serde_json::Value, serde_json::Error> {
    let mut spec = ProviderSpec::for_package(&plugin.package);
    spec.package_pull_policy = plugin.package_pull_policy.clone();
    serde_json::to_value(Provider::new(&plugin.name, spec))
}

pub struct PluginsStage {
    ctx: StageContext,
    /// Restrict to one plugin by name
    only: Option<String>,
}

impl PluginsStage {
    pub fn new(ctx: StageContext, only: Option<String>) -> Self {
        Self { ctx, only }
    }

    fn plugins(&self) -> Vec<&PluginConfig> {
        self.ctx
            .config
            .plugins
            .iter()
            .filter(|p| self.only.as_ref().is_none_or(|only| *only == p.name))
            .collect()
    }

    fn names(&self) -> Vec<String> {
        self.plugins().iter().map(|p| p.name.clone()).collect()
    }
}

#[async_trait::async_trait]
impl Stage for PluginsStage {
    fn name(&self) -> String {
        "plugins".to_string()
    }

    fn required(&self) -> bool {
        self.plugins().iter().any(|p| p.required)
    }

    fn skip_reason(&self) -> Option<String> {
        if !self.plugins().is_empty() {
            return None;
        }
        Some(match &self.only {
            Some(name) => format!("plugin {} is not configured", name),
            None => "no plugins configured".to_string(),
        })
    }

    async fn apply(&self, _cancel: &CancellationToken) -> Result<(), Error> {
        for plugin in self.plugins() {
            let target = provider_ref(&plugin.name);
            let (outcome, _) = upsert(
                self.ctx.client.as_ref(),
                &target,
                &provider_object(plugin)?,
                &self.ctx.retry,
            )
            .await?;
            info!("{:?} provider {} ({})", outcome, plugin.name, plugin.package);
        }
        Ok(())
    }

    async fn converge(&self, cancel: &CancellationToken) -> Result<(), Error> {
        let targets: Vec<ResourceRef> = self.plugins().iter().map(|p| provider_ref(&p.name)).collect();
        wait_all_healthy(
            self.ctx.client.as_ref(),
            &targets,
            &installed_and_healthy,
            &self.ctx.poll,
            cancel,
            self.ctx.config.timeouts.max_concurrency,
        )
        .await?;
        Ok(())
    }

    async fn diagnose(&self) -> Vec<String> {
        let names = self.names();
        let kind = provider_ref("").kind().clone();
        match collect_conditions(self.ctx.client.as_ref(), &[kind], None, Some(&names)).await {
            Ok(snapshots) => {
                let unhealthy: Vec<_> = unhealthy(&snapshots).into_iter().cloned().collect();
                error_messages(&unhealthy)
            }
            Err(e) => vec![format!("failed to list providers: {}", e)],
        }
    }
}
