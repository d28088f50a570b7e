//! Package controller stage: install the controller chart into its
//! namespace, then wait for the Provider CRD to be Established.

use super::{deployment_messages, StageContext};
use crate::backoff::RetryPolicy;
use crate::error::{Error, InstallError};
use crate::health::{condition_true, wait_until_healthy};
use crate::installer::{InstallOptions, PreInstall};
use crate::orchestrator::Stage;
use crate::upsert::upsert;
use cluster_client::{ResourceClient, ResourceRef};
use crds::{CONDITION_ESTABLISHED, PROVIDER_CRD_NAME};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// CRD whose establishment means the controller is serving its API.
pub fn provider_crd() -> ResourceRef {
    ResourceRef::cluster(
        "apiextensions.k8s.io",
        "v1",
        "CustomResourceDefinition",
        PROVIDER_CRD_NAME,
    )
}

/// Makes sure the release namespace exists before the chart is applied.
pub struct EnsureNamespace {
    pub client: Arc<dyn ResourceClient>,
    pub retry: RetryPolicy,
}

#[async_trait::async_trait]
impl PreInstall for EnsureNamespace {
    async fn run(&self, namespace: &str) -> Result<(), InstallError> {
        let target = ResourceRef::cluster("", "v1", "Namespace", namespace);
        let existing = self.client.get_opt(&target).await.map_err(|e| InstallError::PreInstall {
            namespace: namespace.to_string(),
            reason: e.to_string(),
        })?;
        if existing.is_some() {
            debug!("Namespace {} already exists", namespace);
            return Ok(());
        }
        upsert(self.client.as_ref(), &target, &target.object_skeleton(), &self.retry)
            .await
            .map_err(|e| InstallError::PreInstall {
                namespace: namespace.to_string(),
                reason: e.to_string(),
            })?;
        Ok(())
    }
}

pub struct PackageControllerStage {
    ctx: StageContext,
}

impl PackageControllerStage {
    pub fn new(ctx: StageContext) -> Self {
        Self { ctx }
    }
}

#[async_trait::async_trait]
impl Stage for PackageControllerStage {
    fn name(&self) -> String {
        "package-controller".to_string()
    }

    fn required(&self) -> bool {
        true
    }

    async fn apply(&self, _cancel: &CancellationToken) -> Result<(), Error> {
        let controller = &self.ctx.config.package_controller;
        let values = controller.values.resolve(&self.ctx.config.base_dir, &[])?;
        let options = InstallOptions::default().with_pre_install(Arc::new(EnsureNamespace {
            client: self.ctx.client.clone(),
            retry: self.ctx.retry,
        }));
        self.ctx
            .installer()
            .install_or_upgrade(&controller.chart_spec(), &values, &options)
            .await?;
        Ok(())
    }

    async fn converge(&self, cancel: &CancellationToken) -> Result<(), Error> {
        wait_until_healthy(
            self.ctx.client.as_ref(),
            &provider_crd(),
            &condition_true(CONDITION_ESTABLISHED),
            &self.ctx.poll,
            cancel,
        )
        .await?;
        Ok(())
    }

    async fn diagnose(&self) -> Vec<String> {
        deployment_messages(self.ctx.client.as_ref(), &self.ctx.config.package_controller.namespace).await
    }
}
