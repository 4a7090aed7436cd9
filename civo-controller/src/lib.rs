//! civo-controller: keeps the set of Civo Kubernetes clusters in line with a
//! declared list.
//!
//! A [`DriftDetector`] polls the provider and emits add/delete events, a
//! [`Controller`] worker pool resolves each one through a [`Storage`] and
//! applies it with a [`Handler`]. Deletion only happens in dangerous mode.

pub mod config;
pub mod controller;
pub mod desired;
pub mod error;
pub mod handler;
pub mod lister;
pub mod metrics;
pub mod provider;
pub mod reload;
pub mod server;
pub mod storage;

pub use config::{DesiredCluster, FileConfig, Overrides, Settings};
pub use controller::{Controller, ControllerConfig};
pub use desired::{ConfigSnapshot, DesiredState};
pub use error::{ConfigError, ControllerError, ProviderError, ProviderResult};
pub use handler::{ClusterHandler, ClusterObject, Handler, Outcome};
pub use lister::{DriftDetector, DriftEvent, EventKind, ListerWatcher};
pub use metrics::ControllerMetrics;
pub use provider::{CivoClient, InMemoryProvider, ProviderCluster, ProviderGateway};
pub use reload::{spawn_config_reload, ConfigReloader, FileWatcher};
pub use storage::{ProviderStorage, Storage};
