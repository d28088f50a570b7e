//! Command tree, built once at startup and passed down.

use crate::config::DEFAULT_CONFIG_PATH;
use crate::credentials::Backend;
use clap::{Args, Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

#[derive(Debug, Parser)]
#[command(
    name = "devplane",
    version,
    about = "Provision a local Kubernetes control plane with Crossplane, providers and charts"
)]
pub struct Cli {
    /// Configuration file
    #[arg(long, global = true, env = "DEVPLANE_CONFIG", default_value = DEFAULT_CONFIG_PATH)]
    pub config: PathBuf,

    /// Debug logging (RUST_LOG takes precedence)
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Output format
    #[arg(long, global = true, value_enum, default_value_t = OutputFormat::Text)]
    pub format: OutputFormat,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    Text,
    Json,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Run the whole bootstrap pipeline
    Up,
    /// Cluster lifecycle
    #[command(subcommand)]
    Cluster(ClusterCommand),
    /// Package controller plugins (providers)
    #[command(subcommand)]
    Plugin(PluginCommand),
    /// Backend credentials
    #[command(subcommand)]
    Credentials(CredentialsCommand),
    /// Helm chart releases
    #[command(subcommand)]
    Chart(ChartCommand),
}

#[derive(Debug, Subcommand)]
pub enum ClusterCommand {
    /// Create the cluster and wait for its control plane
    Create,
    Delete {
        /// Skip confirmation
        #[arg(long)]
        force: bool,
    },
    Status,
    /// Print the cluster's kubeconfig
    Kubeconfig,
}

#[derive(Debug, Subcommand)]
pub enum PluginCommand {
    /// Installed providers and their health
    List,
    /// Install configured plugins, or just one
    Install { name: Option<String> },
    Uninstall {
        name: String,
        #[arg(long)]
        force: bool,
    },
}

#[derive(Debug, Subcommand)]
pub enum CredentialsCommand {
    Configure(ConfigureArgs),
    Status {
        #[arg(value_enum)]
        backend: Option<Backend>,
    },
}

/// Without a source flag the backend's configured source is used, falling
/// back to the environment.
#[derive(Debug, Args)]
pub struct ConfigureArgs {
    #[arg(value_enum)]
    pub backend: Backend,

    /// Read material from environment variables
    #[arg(long, conflicts_with_all = ["profile", "set"])]
    pub from_env: bool,

    /// Profile in the local credentials file
    #[arg(long, conflicts_with = "set")]
    pub profile: Option<String>,

    /// Credentials file holding the profile
    #[arg(long, requires = "profile")]
    pub profile_file: Option<PathBuf>,

    /// Explicit field, e.g. --set aws_access_key_id=AKIA...
    #[arg(long = "set", value_name = "FIELD=VALUE")]
    pub set: Vec<String>,
}

#[derive(Debug, Subcommand)]
pub enum ChartCommand {
    /// Install a chart declared in the config
    Install(ChartArgs),
    /// Upgrade an installed chart declared in the config
    Upgrade(ChartArgs),
    Uninstall {
        release: String,
        /// Defaults to the namespace declared in the config
        #[arg(long)]
        namespace: Option<String>,
        #[arg(long)]
        force: bool,
    },
    List {
        #[arg(long)]
        namespace: Option<String>,
    },
    Status {
        release: String,
        #[arg(long)]
        namespace: Option<String>,
    },
}

#[derive(Debug, Args)]
pub struct ChartArgs {
    pub release: String,

    /// Value override applied after the config's own, e.g. --set image.tag=v2
    #[arg(long = "set", value_name = "KEY=VALUE")]
    pub set: Vec<String>,
}
