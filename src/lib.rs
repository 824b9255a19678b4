//! Layered identity configuration.
//!
//! Settings live in named identities, each targeting a scope (global,
//! protocol, ircd, network, server, channel). An [`AggregateConfig`] resolves
//! a key for one context by consulting the applicable identities from most
//! to least specific; the [`ConfigBinder`] keeps object fields in sync with
//! those answers as identities change.

pub mod aggregate;
pub mod binder;
pub mod cli;
pub mod error;
pub mod identity;
pub mod logging;
pub mod provider;
pub mod registry;
pub mod retriever;
pub mod settings;
pub mod store;
pub mod target;
pub mod validator;
pub mod watcher;

pub use aggregate::{AggregateConfig, ConfigContext};
pub use binder::{BindingTable, ConfigBinder};
pub use error::{ConfigError, Result};
pub use identity::Identity;
pub use provider::{ConfigChangeListener, ListenerId, ReadOnlyConfigProvider};
pub use registry::{IdentityPaths, IdentityRegistry};
pub use target::{ConfigTarget, TargetKind};
pub use validator::Validator;
