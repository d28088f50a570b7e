//! # Cluster
//!
//! The cluster section of the config becomes an abstract value tree
//! (nodes, ports, mounts, registry mirrors). A translator renders that tree
//! into the runtime's own config format, and `ClusterRuntime` creates and
//! deletes clusters from it. `kind` is the only runtime.

use crate::config::ClusterConfig;
use crate::error::ClusterError;
use crate::values::{Value, ValueTree};
use cluster_client::ResourceRef;
use std::process::Stdio;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::{debug, info};

/// Runtime-neutral description of the cluster.
pub fn cluster_values(config: &ClusterConfig) -> ValueTree {
    let ports: Vec<Value> = config
        .ports
        .iter()
        .map(|p| {
            let mut port = ValueTree::new()
                .with("containerPort", i64::from(p.container_port))
                .with("hostPort", i64::from(p.host_port));
            if let Some(protocol) = &p.protocol {
                port.insert("protocol", protocol.as_str());
            }
            if let Some(address) = &p.listen_address {
                port.insert("listenAddress", address.as_str());
            }
            Value::Tree(port)
        })
        .collect();
    let mounts: Vec<Value> = config
        .mounts
        .iter()
        .map(|m| {
            Value::Tree(
                ValueTree::new()
                    .with("hostPath", m.host_path.as_str())
                    .with("containerPath", m.container_path.as_str())
                    .with("readOnly", m.read_only),
            )
        })
        .collect();

    let node = |role: &str, ports: Vec<Value>| {
        let mut node = ValueTree::new().with("role", role);
        if let Some(image) = &config.image {
            node.insert("image", image.as_str());
        }
        node.insert("ports", Value::Sequence(ports));
        node.insert("mounts", Value::Sequence(mounts.clone()));
        Value::Tree(node)
    };

    let mut nodes = vec![node("control-plane", ports)];
    for _ in 0..config.workers {
        nodes.push(node("worker", Vec::new()));
    }

    let mirrors = config
        .registry_mirrors
        .iter()
        .map(|m| {
            Value::Tree(
                ValueTree::new()
                    .with("registry", m.registry.as_str())
                    .with("endpoint", m.endpoint.as_str()),
            )
        })
        .collect();

    ValueTree::new()
        .with("name", config.name.as_str())
        .with("nodes", Value::Sequence(nodes))
        .with("registryMirrors", Value::Sequence(mirrors))
}

/// The control-plane node kind creates for cluster `name`.
pub fn control_plane_node(name: &str) -> ResourceRef {
    ResourceRef::cluster("", "v1", "Node", format!("{}-control-plane", name))
}

/// Renders the abstract cluster tree into a runtime config document.
pub trait ClusterTranslator: Send + Sync {
    fn render(&self, values: &ValueTree) -> Result<String, ClusterError>;
}

/// kind `Cluster` config (kind.x-k8s.io/v1alpha4).
#[derive(Debug, Clone, Copy, Default)]
pub struct KindTranslator;

impl ClusterTranslator for KindTranslator {
    fn render(&self, values: &ValueTree) -> Result<String, ClusterError> {
        let mut out = ValueTree::new()
            .with("kind", "Cluster")
            .with("apiVersion", "kind.x-k8s.io/v1alpha4");
        if let Some(name) = values.get("name") {
            out.insert("name", name.clone());
        }

        let nodes = match values.get("nodes") {
            Some(Value::Sequence(nodes)) => nodes.iter().map(render_node).collect::<Result<Vec<_>, _>>()?,
            None => vec![Value::Tree(ValueTree::new().with("role", "control-plane"))],
            Some(_) => return Err(ClusterError::InvalidConfig("nodes must be a list".to_string())),
        };
        out.insert("nodes", Value::Sequence(nodes));

        if let Some(Value::Sequence(mirrors)) = values.get("registryMirrors") {
            if !mirrors.is_empty() {
                let patches = mirrors
                    .iter()
                    .map(render_mirror)
                    .collect::<Result<Vec<_>, _>>()?;
                out.insert("containerdConfigPatches", Value::Sequence(patches));
            }
        }

        out.to_yaml_string()
            .map_err(|e| ClusterError::InvalidConfig(e.to_string()))
    }
}

fn render_node(node: &Value) -> Result<Value, ClusterError> {
    let tree = node
        .as_tree()
        .ok_or_else(|| ClusterError::InvalidConfig("node must be a mapping".to_string()))?;
    let mut out = ValueTree::new();
    for (key, value) in tree.iter() {
        if matches!(value, Value::Sequence(items) if items.is_empty()) {
            continue;
        }
        let key = match key {
            "ports" => "extraPortMappings",
            "mounts" => "extraMounts",
            other => other,
        };
        out.insert(key, value.clone());
    }
    Ok(Value::Tree(out))
}

fn render_mirror(mirror: &Value) -> Result<Value, ClusterError> {
    let field = |name: &str| {
        mirror
            .as_tree()
            .and_then(|t| t.get(name))
            .and_then(Value::as_str)
            .ok_or_else(|| ClusterError::InvalidConfig(format!("registry mirror needs {}", name)))
    };
    let registry = field("registry")?;
    let endpoint = field("endpoint")?;
    Ok(Value::string(format!(
        "[plugins.\"io.containerd.grpc.v1.cri\".registry.mirrors.\"{}\"]\n  endpoint = [\"{}\"]",
        registry, endpoint
    )))
}

/// Creates and deletes local clusters.
#[async_trait::async_trait]
pub trait ClusterRuntime: Send + Sync {
    async fn exists(&self, name: &str) -> Result<bool, ClusterError>;

    /// Create `name` from a rendered config document.
    async fn create(&self, name: &str, config: &str) -> Result<(), ClusterError>;

    async fn delete(&self, name: &str) -> Result<(), ClusterError>;

    /// Kubeconfig document for reaching `name`.
    async fn kubeconfig(&self, name: &str) -> Result<String, ClusterError>;
}

/// `kind` driven as a child process.
#[derive(Debug, Clone)]
pub struct KindRuntime {
    binary: String,
}

impl Default for KindRuntime {
    fn default() -> Self {
        Self {
            binary: "kind".to_string(),
        }
    }
}

impl KindRuntime {
    async fn run(&self, args: &[&str], stdin: Option<&str>) -> Result<String, ClusterError> {
        debug!("Running {} {}", self.binary, args.join(" "));
        let mut child = Command::new(&self.binary)
            .args(args)
            .stdin(if stdin.is_some() { Stdio::piped() } else { Stdio::null() })
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()?;

        if let (Some(input), Some(mut pipe)) = (stdin, child.stdin.take()) {
            pipe.write_all(input.as_bytes()).await?;
        }

        let output = child.wait_with_output().await?;
        if !output.status.success() {
            return Err(ClusterError::Command {
                command: args.iter().take(2).copied().collect::<Vec<_>>().join(" "),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}

#[async_trait::async_trait]
impl ClusterRuntime for KindRuntime {
    async fn exists(&self, name: &str) -> Result<bool, ClusterError> {
        let stdout = self.run(&["get", "clusters"], None).await?;
        Ok(stdout.lines().any(|line| line.trim() == name))
    }

    async fn create(&self, name: &str, config: &str) -> Result<(), ClusterError> {
        info!("Creating kind cluster: {}", name);
        self.run(&["create", "cluster", "--name", name, "--config", "-"], Some(config))
            .await?;
        Ok(())
    }

    /// `kind delete` succeeds on unknown names; report them instead.
    async fn delete(&self, name: &str) -> Result<(), ClusterError> {
        if !self.exists(name).await? {
            return Err(ClusterError::NotFound(name.to_string()));
        }
        info!("Deleting kind cluster: {}", name);
        self.run(&["delete", "cluster", "--name", name], None).await?;
        Ok(())
    }

    async fn kubeconfig(&self, name: &str) -> Result<String, ClusterError> {
        if !self.exists(name).await? {
            return Err(ClusterError::NotFound(name.to_string()));
        }
        self.run(&["get", "kubeconfig", "--name", name], None).await
    }
}
