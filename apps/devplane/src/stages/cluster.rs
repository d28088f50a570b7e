//! Cluster stage: create the kind cluster if absent, then wait for its
//! control-plane node to report Ready.

use super::StageContext;
use crate::cluster::{cluster_values, control_plane_node, ClusterTranslator, KindTranslator};
use crate::diagnostics::{collect_conditions, error_messages};
use crate::error::Error;
use crate::health::{condition_true, wait_until_healthy};
use crate::orchestrator::Stage;
use tokio_util::sync::CancellationToken;
use tracing::info;

pub struct ClusterStage {
    ctx: StageContext,
}

impl ClusterStage {
    pub fn new(ctx: StageContext) -> Self {
        Self { ctx }
    }
}

#[async_trait::async_trait]
impl Stage for ClusterStage {
    fn name(&self) -> String {
        "cluster".to_string()
    }

    fn required(&self) -> bool {
        true
    }

    async fn apply(&self, _cancel: &CancellationToken) -> Result<(), Error> {
        let cluster = &self.ctx.config.cluster;
        if self.ctx.runtime.exists(&cluster.name).await? {
            info!("Cluster {} already exists", cluster.name);
            return Ok(());
        }
        let rendered = KindTranslator.render(&cluster_values(cluster))?;
        self.ctx.runtime.create(&cluster.name, &rendered).await?;
        Ok(())
    }

    async fn converge(&self, cancel: &CancellationToken) -> Result<(), Error> {
        let node = control_plane_node(&self.ctx.config.cluster.name);
        wait_until_healthy(
            self.ctx.client.as_ref(),
            &node,
            &condition_true("Ready"),
            &self.ctx.poll,
            cancel,
        )
        .await?;
        Ok(())
    }

    async fn diagnose(&self) -> Vec<String> {
        let node = control_plane_node(&self.ctx.config.cluster.name);
        match collect_conditions(self.ctx.client.as_ref(), &[node.kind().clone()], None, None).await {
            Ok(snapshots) => error_messages(&snapshots),
            Err(e) => vec![format!("failed to list nodes: {}", e)],
        }
    }
}
