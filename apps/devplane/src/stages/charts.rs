//! Chart stage: resolve one chart's values and install or upgrade it.

use super::{deployment_messages, StageContext};
use crate::config::ChartConfig;
use crate::error::Error;
use crate::installer::InstallOptions;
use crate::orchestrator::Stage;
use tokio_util::sync::CancellationToken;
use tracing::debug;

pub struct ChartStage {
    ctx: StageContext,
    chart: ChartConfig,
}

impl ChartStage {
    pub fn new(ctx: StageContext, chart: ChartConfig) -> Self {
        Self { ctx, chart }
    }
}

#[async_trait::async_trait]
impl Stage for ChartStage {
    fn name(&self) -> String {
        format!("chart:{}", self.chart.release)
    }

    fn required(&self) -> bool {
        self.chart.required
    }

    async fn apply(&self, _cancel: &CancellationToken) -> Result<(), Error> {
        let values = self.chart.values.resolve(&self.ctx.config.base_dir, &[])?;
        let release = self.chart.release.clone();
        let options = InstallOptions::default().with_logger(move |values| {
            debug!(
                "Values for {}:\n{}",
                release,
                values.to_yaml_string().unwrap_or_default()
            );
        });
        self.ctx
            .installer()
            .install_or_upgrade(&self.chart.chart_spec(), &values, &options)
            .await?;
        Ok(())
    }

    async fn diagnose(&self) -> Vec<String> {
        deployment_messages(self.ctx.client.as_ref(), &self.chart.namespace).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::orchestrator::{Orchestrator, StageOutcome};
    use crate::test_utils::context;

    #[tokio::test]
    async fn test_chart_values_reach_helm() {
        let ctx = context(
            r#"
charts:
  - release: app
    namespace: apps
    chart: app
    repo: https://charts.example.com
    values: { image: { tag: v1 } }
    set: ["image.tag=v2"]
"#,
        );
        let stage = ChartStage::new(ctx.stage.clone(), ctx.stage.config.charts[0].clone());
        stage.apply(&CancellationToken::new()).await.unwrap();

        let applied = ctx.helm.applied();
        assert_eq!(applied[0].namespace, "apps");
        assert!(applied[0].values_yaml.contains("tag: v2"));
    }

    #[tokio::test]
    async fn test_failed_optional_chart_warns() {
        let ctx = context("charts: [{ release: app, chart: app }]");
        ctx.helm.fail_apply("app", "chart not found");

        let stages: Vec<Box<dyn Stage>> = vec![Box::new(ChartStage::new(
            ctx.stage.clone(),
            ctx.stage.config.charts[0].clone(),
        ))];
        let result = Orchestrator::default().run(&stages, &CancellationToken::new()).await;
        assert!(matches!(result.stages[0].outcome, StageOutcome::Warned(ref r) if r.contains("chart not found")));
        assert_eq!(result.exit_code(), 2);
    }
}
