//! devplane object definitions
//!
//! Typed shapes for the cluster-side objects the bootstrapper authors
//! (package-controller `Provider`s, per-backend `ProviderConfig`s) and the
//! status `Condition`s background controllers report on them.

pub mod condition;
pub mod provider;
pub mod provider_config;

pub use condition::*;
pub use provider::*;
pub use provider_config::*;
