//! Cluster API client
//!
//! A narrow capability boundary over the Kubernetes API: get, list, create,
//! update and delete a named, typed object, and read its reported status
//! conditions. Objects travel as untyped JSON so one client serves every kind
//! devplane touches (Secrets, Namespaces, CRDs, Providers, ProviderConfigs).
//!
//! # Example
//!
//! ```no_run
//! use cluster_client::{KubeResourceClient, ResourceClient, ResourceRef};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let client = KubeResourceClient::new(Some("kind-devplane".to_string()));
//! let provider = ResourceRef::cluster("pkg.crossplane.io", "v1", "Provider", "provider-nop");
//! for condition in client.conditions(&provider).await? {
//!     println!("{} = {}", condition.type_, condition.status);
//! }
//! # Ok(())
//! # }
//! ```

pub mod client;
pub mod error;
#[cfg(feature = "test-util")]
pub mod mock;
pub mod models;
#[path = "trait.rs"]
pub mod resource_trait;

pub use client::KubeResourceClient;
pub use error::ResourceError;
#[cfg(feature = "test-util")]
pub use mock::{MockOp, MockResourceClient};
pub use models::*;
pub use resource_trait::ResourceClient;
