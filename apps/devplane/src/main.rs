//! devplane
//!
//! Brings up a local development control plane from one config file:
//! - a kind cluster with the configured ports, mounts and registry mirrors
//! - the Crossplane package controller, installed through Helm
//! - one Provider per configured plugin, polled until Installed and Healthy
//! - a Secret and ProviderConfig per credential backend
//! - any additional Helm charts
//!
//! Re-running is safe: every stage converges existing state instead of
//! failing on it.

mod backoff;
mod cli;
mod cluster;
mod commands;
mod config;
mod confirm;
mod credentials;
mod diagnostics;
mod error;
mod health;
mod installer;
mod orchestrator;
mod output;
mod stages;
mod upsert;
mod values;

#[cfg(test)]
mod test_utils;

use crate::cli::Cli;
use crate::cluster::KindRuntime;
use crate::config::{Config, DEFAULT_CONFIG_PATH};
use crate::confirm::TerminalConfirm;
use crate::credentials::ProcessEnv;
use crate::error::Error;
use crate::installer::HelmCli;
use crate::stages::StageContext;
use clap::Parser;
use cluster_client::KubeResourceClient;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    match run(cli).await {
        Ok(code) => ExitCode::from(code),
        Err(e) => {
            error!("{}", e);
            ExitCode::FAILURE
        }
    }
}

/// Logs go to stderr so stdout carries only the report. RUST_LOG wins over
/// --verbose.
fn init_tracing(verbose: bool) {
    let default = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

async fn run(cli: Cli) -> Result<u8, Error> {
    let config = load_config(&cli.config)?;
    let kube_context = config.cluster.kube_context();
    info!("Using cluster {} (context {})", config.cluster.name, kube_context);

    let ctx = StageContext::new(
        config,
        Arc::new(KubeResourceClient::new(Some(kube_context.clone()))),
        Arc::new(HelmCli::new(Some(kube_context))),
        Arc::new(KindRuntime::default()),
        Arc::new(ProcessEnv),
    );

    let cancel = CancellationToken::new();
    let on_signal = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupted, cancelling");
            on_signal.cancel();
        }
    });

    let report = commands::run(cli.command, &ctx, &TerminalConfirm, &cancel).await?;
    println!("{}", output::render(&report, cli.format)?);
    Ok(report.exit_code())
}

/// A missing config at the default location means "all defaults"; an
/// explicitly named file must exist.
fn load_config(path: &Path) -> Result<Config, Error> {
    if path == Path::new(DEFAULT_CONFIG_PATH) && !path.exists() {
        info!("No {} found, using defaults", DEFAULT_CONFIG_PATH);
        return Ok(Config {
            base_dir: PathBuf::from("."),
            ..Config::default()
        });
    }
    Config::load(path)
}
