//! Kubernetes-backed ResourceClient
//!
//! Every kind is reached through `Api<DynamicObject>` with an `ApiResource`
//! derived from the target's group/version/kind, so no per-kind client code
//! is needed. The underlying `kube::Client` is built on first use: the
//! cluster it talks to may not exist yet when the client is constructed.

use crate::error::ResourceError;
use crate::models::{ResourceKind, ResourceRef};
use crate::resource_trait::ResourceClient;
use kube::api::{Api, DeleteParams, ListParams, PostParams};
use kube::config::{KubeConfigOptions, Kubeconfig};
use kube::core::{ApiResource, DynamicObject};
use kube::{Client, Config};
use serde_json::Value;
use tokio::sync::OnceCell;
use tracing::debug;

/// Cluster API client
pub struct KubeResourceClient {
    context: Option<String>,
    client: OnceCell<Client>,
}

impl std::fmt::Debug for KubeResourceClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KubeResourceClient")
            .field("context", &self.context)
            .field("connected", &self.client.initialized())
            .finish()
    }
}

impl KubeResourceClient {
    /// Create a client for the given kubeconfig context, or the current
    /// context when `None`.
    pub fn new(context: Option<String>) -> Self {
        Self {
            context,
            client: OnceCell::new(),
        }
    }

    async fn client(&self) -> Result<&Client, ResourceError> {
        self.client
            .get_or_try_init(|| async {
                let config = match &self.context {
                    Some(context) => {
                        debug!(context = %context, "Loading kubeconfig context");
                        let kubeconfig = Kubeconfig::read()
                            .map_err(|e| ResourceError::Config(e.to_string()))?;
                        let options = KubeConfigOptions {
                            context: Some(context.clone()),
                            ..Default::default()
                        };
                        Config::from_custom_kubeconfig(kubeconfig, &options)
                            .await
                            .map_err(|e| ResourceError::Config(e.to_string()))?
                    }
                    None => Config::infer()
                        .await
                        .map_err(|e| ResourceError::Config(e.to_string()))?,
                };
                Client::try_from(config).map_err(|e| ResourceError::Config(e.to_string()))
            })
            .await
    }

    fn api_resource(kind: &ResourceKind) -> ApiResource {
        ApiResource {
            group: kind.group.clone(),
            version: kind.version.clone(),
            api_version: kind.api_version(),
            kind: kind.kind.clone(),
            plural: kind.plural(),
        }
    }

    async fn api(&self, kind: &ResourceKind, namespace: Option<&str>) -> Result<Api<DynamicObject>, ResourceError> {
        let client = self.client().await?.clone();
        let ar = Self::api_resource(kind);
        Ok(match namespace {
            Some(ns) => Api::namespaced_with(client, ns, &ar),
            None => Api::all_with(client, &ar),
        })
    }

    fn to_dynamic(object: &Value) -> Result<DynamicObject, ResourceError> {
        Ok(serde_json::from_value(object.clone())?)
    }

    fn to_value(object: &DynamicObject) -> Result<Value, ResourceError> {
        Ok(serde_json::to_value(object)?)
    }
}

#[async_trait::async_trait]
impl ResourceClient for KubeResourceClient {
    async fn get(&self, target: &ResourceRef) -> Result<Value, ResourceError> {
        let api = self.api(target.kind(), target.namespace()).await?;
        debug!(resource = %target, "GET");
        let object = api
            .get(target.name())
            .await
            .map_err(|e| ResourceError::from_kube(e, &target.to_string()))?;
        Self::to_value(&object)
    }

    async fn list(&self, kind: &ResourceKind, namespace: Option<&str>) -> Result<Vec<Value>, ResourceError> {
        let api = self.api(kind, namespace).await?;
        debug!(kind = %kind.kind, namespace = namespace.unwrap_or("*"), "LIST");
        let list = api
            .list(&ListParams::default())
            .await
            .map_err(|e| ResourceError::from_kube(e, &kind.kind))?;
        list.items.iter().map(Self::to_value).collect()
    }

    async fn create(&self, target: &ResourceRef, object: &Value) -> Result<Value, ResourceError> {
        let api = self.api(target.kind(), target.namespace()).await?;
        debug!(resource = %target, "CREATE");
        let created = api
            .create(&PostParams::default(), &Self::to_dynamic(object)?)
            .await
            .map_err(|e| ResourceError::from_kube(e, &target.to_string()))?;
        Self::to_value(&created)
    }

    async fn update(&self, target: &ResourceRef, object: &Value) -> Result<Value, ResourceError> {
        let api = self.api(target.kind(), target.namespace()).await?;
        debug!(resource = %target, "REPLACE");
        let updated = api
            .replace(target.name(), &PostParams::default(), &Self::to_dynamic(object)?)
            .await
            .map_err(|e| ResourceError::from_kube(e, &target.to_string()))?;
        Self::to_value(&updated)
    }

    async fn delete(&self, target: &ResourceRef) -> Result<(), ResourceError> {
        let api = self.api(target.kind(), target.namespace()).await?;
        debug!(resource = %target, "DELETE");
        api.delete(target.name(), &DeleteParams::default())
            .await
            .map_err(|e| ResourceError::from_kube(e, &target.to_string()))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_api_resource_from_kind() {
        let ar = KubeResourceClient::api_resource(&ResourceKind::new("aws.upbound.io", "v1beta1", "ProviderConfig"));
        assert_eq!(ar.api_version, "aws.upbound.io/v1beta1");
        assert_eq!(ar.plural, "providerconfigs");

        let core = KubeResourceClient::api_resource(&ResourceKind::new("", "v1", "Namespace"));
        assert_eq!(core.api_version, "v1");
        assert_eq!(core.plural, "namespaces");
    }
}
