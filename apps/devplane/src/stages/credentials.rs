//! Credentials stage: resolve one backend's material and persist its
//! secret and ProviderConfig. Nothing to converge.

use super::StageContext;
use crate::config::CredentialConfig;
use crate::credentials::CredentialsProvisioner;
use crate::error::Error;
use crate::orchestrator::Stage;
use tokio_util::sync::CancellationToken;

pub struct CredentialsStage {
    ctx: StageContext,
    credential: CredentialConfig,
}

impl CredentialsStage {
    pub fn new(ctx: StageContext, credential: CredentialConfig) -> Self {
        Self { ctx, credential }
    }
}

#[async_trait::async_trait]
impl Stage for CredentialsStage {
    fn name(&self) -> String {
        format!("credentials:{}", self.credential.backend)
    }

    fn required(&self) -> bool {
        self.credential.required
    }

    async fn apply(&self, _cancel: &CancellationToken) -> Result<(), Error> {
        let source = self
            .credential
            .source
            .material_source(&self.ctx.config.base_dir, self.ctx.env.as_ref())?;
        let provisioner = CredentialsProvisioner::new(
            self.ctx.client.clone(),
            self.ctx.config.package_controller.namespace.clone(),
            self.ctx.retry,
        );
        provisioner
            .configure(self.credential.backend, &source, self.ctx.env.as_ref())
            .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::credentials::Backend;
    use crate::error::CredentialError;
    use crate::orchestrator::{Orchestrator, StageOutcome};
    use crate::test_utils::{context, context_with_env};

    const AZURE: &str = "credentials: [{ backend: azure, source: environment }]";

    #[tokio::test]
    async fn test_configures_backend_from_environment() {
        let ctx = context_with_env(
            AZURE,
            &[
                ("AZURE_CLIENT_ID", "id"),
                ("AZURE_CLIENT_SECRET", "secret"),
                ("AZURE_TENANT_ID", "tenant"),
                ("AZURE_SUBSCRIPTION_ID", "sub"),
            ],
        );
        let stage = CredentialsStage::new(ctx.stage.clone(), ctx.stage.config.credentials[0].clone());
        assert_eq!(stage.name(), "credentials:azure");

        stage.apply(&CancellationToken::new()).await.unwrap();
        assert!(ctx.mock.object(&Backend::Azure.secret_ref("crossplane-system")).is_some());
        assert!(ctx.mock.object(&Backend::Azure.provider_config_ref()).is_some());
    }

    #[tokio::test]
    async fn test_missing_material_warns_when_optional() {
        let ctx = context(AZURE);
        let stage = CredentialsStage::new(ctx.stage.clone(), ctx.stage.config.credentials[0].clone());
        let err = stage.apply(&CancellationToken::new()).await.unwrap_err();
        assert!(matches!(
            err,
            Error::Credential(CredentialError::Missing { ref field, .. }) if field == "AZURE_CLIENT_ID"
        ));

        let stages: Vec<Box<dyn Stage>> = vec![Box::new(stage)];
        let result = Orchestrator::default().run(&stages, &CancellationToken::new()).await;
        assert_eq!(
            result.stages[0].outcome,
            StageOutcome::Warned("missing credential field AZURE_CLIENT_ID for azure".to_string())
        );
    }
}
