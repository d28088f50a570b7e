//! Subcommand dispatch. Each command returns a `Report` for the renderer;
//! only `up`, `cluster create` and `plugin install` go through the
//! orchestrator.

use crate::cli::{ChartArgs, ChartCommand, ClusterCommand, Command, ConfigureArgs, CredentialsCommand, PluginCommand};
use crate::cluster::control_plane_node;
use crate::config::{default_profile_path, ChartConfig};
use crate::confirm::Confirm;
use crate::credentials::{Backend, CredentialRecord, CredentialsProvisioner, MaterialSource};
use crate::diagnostics::{collect_conditions, ConditionSnapshot};
use crate::error::Error;
use crate::health::HealthSnapshot;
use crate::installer::{InstallOptions, ReleaseState};
use crate::orchestrator::{Orchestrator, PipelineResult, Stage};
use crate::stages::{build_pipeline, provider_ref, ClusterStage, PluginsStage, StageContext};
use crate::values::ValueTree;
use cluster_client::{object_conditions, object_name};
use serde::Serialize;
use std::collections::BTreeMap;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ClusterStatus {
    pub name: String,
    pub exists: bool,
    pub nodes: Vec<ConditionSnapshot>,
}

/// What a command produced.
#[derive(Debug, Clone, PartialEq)]
pub enum Report {
    Pipeline(PipelineResult),
    Cluster(ClusterStatus),
    Message(String),
    Kubeconfig(String),
    Health(Vec<HealthSnapshot>),
    Credentials(Vec<CredentialRecord>),
    Release(ReleaseState),
    Releases(Vec<ReleaseState>),
}

impl Report {
    pub fn exit_code(&self) -> u8 {
        match self {
            Report::Pipeline(result) => result.exit_code(),
            _ => 0,
        }
    }
}

pub async fn run(
    command: Command,
    ctx: &StageContext,
    confirm: &dyn Confirm,
    cancel: &CancellationToken,
) -> Result<Report, Error> {
    match command {
        Command::Up => {
            let stages = build_pipeline(ctx);
            Ok(Report::Pipeline(run_stages(ctx, &stages, cancel).await))
        }
        Command::Cluster(command) => cluster(command, ctx, confirm, cancel).await,
        Command::Plugin(command) => plugin(command, ctx, confirm, cancel).await,
        Command::Credentials(command) => credentials(command, ctx).await,
        Command::Chart(command) => chart(command, ctx, confirm).await,
    }
}

async fn run_stages(ctx: &StageContext, stages: &[Box<dyn Stage>], cancel: &CancellationToken) -> PipelineResult {
    Orchestrator::new(ctx.retry).run(stages, cancel).await
}

async fn cluster(
    command: ClusterCommand,
    ctx: &StageContext,
    confirm: &dyn Confirm,
    cancel: &CancellationToken,
) -> Result<Report, Error> {
    let name = ctx.config.cluster.name.clone();
    match command {
        ClusterCommand::Create => {
            let stages: Vec<Box<dyn Stage>> = vec![Box::new(ClusterStage::new(ctx.clone()))];
            Ok(Report::Pipeline(run_stages(ctx, &stages, cancel).await))
        }
        ClusterCommand::Delete { force } => {
            if !ctx.runtime.exists(&name).await? {
                return Err(Error::NotFound(format!("cluster {}", name)));
            }
            if !force && !confirm.confirm(&format!("Delete cluster {}?", name)) {
                return Err(Error::ConfirmationRequired(format!("deleting cluster {}", name)));
            }
            ctx.runtime.delete(&name).await?;
            info!("Deleted cluster {}", name);
            Ok(Report::Message(format!("cluster {} deleted", name)))
        }
        ClusterCommand::Status => {
            let exists = ctx.runtime.exists(&name).await?;
            let nodes = if exists {
                let kind = control_plane_node(&name).kind().clone();
                collect_conditions(ctx.client.as_ref(), &[kind], None, None).await?
            } else {
                Vec::new()
            };
            Ok(Report::Cluster(ClusterStatus { name, exists, nodes }))
        }
        ClusterCommand::Kubeconfig => Ok(Report::Kubeconfig(ctx.runtime.kubeconfig(&name).await?)),
    }
}

async fn plugin(
    command: PluginCommand,
    ctx: &StageContext,
    confirm: &dyn Confirm,
    cancel: &CancellationToken,
) -> Result<Report, Error> {
    match command {
        PluginCommand::List => {
            let kind = provider_ref("").kind().clone();
            let snapshots = ctx
                .client
                .list(&kind, None)
                .await?
                .iter()
                .filter_map(|object| {
                    object_name(object).map(|name| HealthSnapshot::from_conditions(name, object_conditions(object)))
                })
                .collect();
            Ok(Report::Health(snapshots))
        }
        PluginCommand::Install { name } => {
            if let Some(name) = &name {
                if !ctx.config.plugins.iter().any(|p| &p.name == name) {
                    return Err(Error::NotFound(format!("plugin {} is not configured", name)));
                }
            }
            let stages: Vec<Box<dyn Stage>> = vec![Box::new(PluginsStage::new(ctx.clone(), name))];
            Ok(Report::Pipeline(run_stages(ctx, &stages, cancel).await))
        }
        PluginCommand::Uninstall { name, force } => {
            let target = provider_ref(&name);
            if ctx.client.get_opt(&target).await?.is_none() {
                return Err(Error::NotFound(format!("plugin {}", name)));
            }
            if !force && !confirm.confirm(&format!("Uninstall plugin {}?", name)) {
                return Err(Error::ConfirmationRequired(format!("uninstalling plugin {}", name)));
            }
            ctx.client.delete(&target).await?;
            info!("Uninstalled plugin {}", name);
            Ok(Report::Message(format!("plugin {} uninstalled", name)))
        }
    }
}

async fn credentials(command: CredentialsCommand, ctx: &StageContext) -> Result<Report, Error> {
    let provisioner = CredentialsProvisioner::new(
        ctx.client.clone(),
        ctx.config.package_controller.namespace.clone(),
        ctx.retry,
    );
    match command {
        CredentialsCommand::Configure(args) => {
            let source = material_source(&args, ctx)?;
            let record = provisioner.configure(args.backend, &source, ctx.env.as_ref()).await?;
            Ok(Report::Credentials(vec![record]))
        }
        CredentialsCommand::Status { backend } => {
            let backends = match backend {
                Some(backend) => vec![backend],
                None => Backend::ALL.to_vec(),
            };
            let mut records = Vec::with_capacity(backends.len());
            for backend in backends {
                records.push(provisioner.status(backend).await?);
            }
            Ok(Report::Credentials(records))
        }
    }
}

/// Flags first, then the backend's configured source, then the environment.
fn material_source(args: &ConfigureArgs, ctx: &StageContext) -> Result<MaterialSource, Error> {
    if args.from_env {
        return Ok(MaterialSource::Environment);
    }
    if let Some(profile) = &args.profile {
        let path = match &args.profile_file {
            Some(path) => path.clone(),
            None => default_profile_path(ctx.env.as_ref())?,
        };
        return Ok(MaterialSource::Profile {
            path,
            name: profile.clone(),
        });
    }
    if !args.set.is_empty() {
        let mut fields = BTreeMap::new();
        for pair in &args.set {
            let (key, value) = pair
                .split_once('=')
                .filter(|(key, _)| !key.is_empty())
                .ok_or_else(|| Error::validation(format!("malformed credential field '{}'", pair)))?;
            fields.insert(key.to_string(), value.to_string());
        }
        return Ok(MaterialSource::Explicit(fields));
    }
    match ctx.config.credential(args.backend) {
        Some(configured) => configured
            .source
            .material_source(&ctx.config.base_dir, ctx.env.as_ref()),
        None => Ok(MaterialSource::Environment),
    }
}

async fn chart(command: ChartCommand, ctx: &StageContext, confirm: &dyn Confirm) -> Result<Report, Error> {
    let installer = ctx.installer();
    match command {
        ChartCommand::Install(args) => {
            let (chart, values) = configured_chart(ctx, &args)?;
            let state = installer
                .install(&chart.chart_spec(), &values, &InstallOptions::default())
                .await?;
            Ok(Report::Release(state))
        }
        ChartCommand::Upgrade(args) => {
            let (chart, values) = configured_chart(ctx, &args)?;
            let state = installer
                .upgrade(&chart.chart_spec(), &values, &InstallOptions::default())
                .await?;
            Ok(Report::Release(state))
        }
        ChartCommand::Uninstall { release, namespace, force } => {
            let namespace = chart_namespace(ctx, &release, namespace);
            installer.uninstall(&release, &namespace, force, confirm).await?;
            Ok(Report::Message(format!("release {} uninstalled from {}", release, namespace)))
        }
        ChartCommand::List { namespace } => Ok(Report::Releases(installer.list(namespace.as_deref()).await?)),
        ChartCommand::Status { release, namespace } => {
            let namespace = chart_namespace(ctx, &release, namespace);
            Ok(Report::Release(installer.status(&release, &namespace).await?))
        }
    }
}

fn configured_chart<'a>(
    ctx: &'a StageContext,
    args: &ChartArgs,
) -> Result<(&'a ChartConfig, ValueTree), Error> {
    let chart = ctx
        .config
        .chart(&args.release)
        .ok_or_else(|| Error::NotFound(format!("chart {} is not configured", args.release)))?;
    let values = chart.values.resolve(&ctx.config.base_dir, &args.set)?;
    debug!("Resolved {} top-level values for {}", values.len(), args.release);
    Ok((chart, values))
}

fn chart_namespace(ctx: &StageContext, release: &str, namespace: Option<String>) -> String {
    namespace
        .or_else(|| ctx.config.chart(release).map(|c| c.namespace.clone()))
        .unwrap_or_else(|| "default".to_string())
}
