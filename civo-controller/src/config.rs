//! Config file schema, search path and environment overrides.
//!
//! The file is YAML. Only `clusters` is hot-reloaded; every other key is read
//! once at startup and layered as CLI flag > environment > file > default.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Duration;

use ::config::{Environment, File, FileFormat};
use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Prefix for environment overrides: `CIVO_CONTROLLER_<KEY>` sets `<key>`.
pub const ENV_PREFIX: &str = "CIVO_CONTROLLER";

/// Variable the first controller releases read the API key from.
pub const LEGACY_TOKEN_ENV: &str = "CIVO_API_KEY";

/// Civo Kubernetes clusters endpoint.
pub const DEFAULT_API_URL: &str = "https://api.civo.com/v2/kubernetes/clusters";

pub const DEFAULT_METRICS_LISTEN: &str = "[::]:8081";
pub const DEFAULT_INTERVAL_SECS: u64 = 10;
pub const DEFAULT_WORKERS: usize = 3;
pub const DEFAULT_MAX_RETRIES: u32 = 2;
pub const DEFAULT_RETRY_DELAY_MS: u64 = 1000;
pub const DEFAULT_LOG_LEVEL: &str = "info";

const APP_NAME: &str = "civo-controller";

/// One entry of the desired cluster list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DesiredCluster {
    pub name: String,
    /// Target node count; `None` leaves the provider default in place.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nodes: Option<u32>,
}

impl DesiredCluster {
    pub fn new(name: impl Into<String>, nodes: u32) -> Self {
        Self {
            name: name.into(),
            nodes: Some(nodes),
        }
    }
}

/// On-disk config file.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct FileConfig {
    #[serde(default)]
    pub clusters: Vec<DesiredCluster>,
    pub token: Option<String>,
    pub dangerous: Option<bool>,
    pub log_level: Option<String>,
    pub api_url: Option<String>,
    pub interval_secs: Option<u64>,
    pub workers: Option<usize>,
    pub max_retries: Option<u32>,
    pub retry_delay_ms: Option<u64>,
    pub recreate_missing: Option<bool>,
    pub metrics_listen: Option<String>,
}

impl FileConfig {
    /// Parse and validate file contents without any environment layer.
    /// `path` is only used for error context.
    pub fn parse(path: &Path, contents: &str) -> Result<Self, ConfigError> {
        Self::layered(path, contents, None)
    }

    /// Read the file at `path` and layer the process environment over it.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let legacy = std::env::var(LEGACY_TOKEN_ENV).ok();
        Ok(Self::load_with_env(path, env_source())?.with_legacy_token(legacy))
    }

    /// Read the file at `path` and layer `env` over it.
    pub fn load_with_env(path: &Path, env: Environment) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::layered(path, &contents, Some(env))
    }

    fn layered(path: &Path, contents: &str, env: Option<Environment>) -> Result<Self, ConfigError> {
        let mut builder = ::config::Config::builder();
        // An empty document has no mapping to merge.
        if !contents.trim().is_empty() {
            builder = builder.add_source(File::from_str(contents, FileFormat::Yaml));
        }
        if let Some(env) = env {
            builder = builder.add_source(env);
        }

        let config: FileConfig = builder
            .build()
            .and_then(|c| c.try_deserialize())
            .map_err(|source| ConfigError::Parse {
                path: path.to_path_buf(),
                source,
            })?;
        config.validate()?;
        Ok(config)
    }

    /// Use `legacy` as the token when neither the file nor the prefixed
    /// environment set one.
    pub fn with_legacy_token(mut self, legacy: Option<String>) -> Self {
        if self.token.is_none() {
            self.token = legacy.filter(|t| !t.trim().is_empty());
        }
        self
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        validate_clusters(&self.clusters)?;
        if self.workers == Some(0) {
            return Err(ConfigError::Invalid("workers must be at least 1".into()));
        }
        if self.interval_secs == Some(0) {
            return Err(ConfigError::Invalid(
                "interval_secs must be at least 1".into(),
            ));
        }
        Ok(())
    }
}

/// Names must be non-empty and unique within the desired set.
pub fn validate_clusters(clusters: &[DesiredCluster]) -> Result<(), ConfigError> {
    let mut seen = HashSet::new();
    for cluster in clusters {
        if cluster.name.trim().is_empty() {
            return Err(ConfigError::Invalid("cluster name must not be empty".into()));
        }
        if !seen.insert(cluster.name.as_str()) {
            return Err(ConfigError::Invalid(format!(
                "duplicate cluster name: {}",
                cluster.name
            )));
        }
    }
    Ok(())
}

/// Default config locations, in search order.
pub fn search_paths() -> Vec<PathBuf> {
    let mut paths = vec![PathBuf::from(format!("{APP_NAME}.yaml"))];
    if let Some(home) = dirs::home_dir() {
        paths.push(home.join(format!(".{APP_NAME}.yaml")));
    }
    paths.push(PathBuf::from(format!("/etc/{APP_NAME}/{APP_NAME}.yaml")));
    paths
}

/// Resolve the config file: the explicit path if given, else the first
/// existing search location.
pub fn locate(explicit: Option<&Path>) -> Result<PathBuf, ConfigError> {
    match explicit {
        Some(path) => Ok(path.to_path_buf()),
        None => find_first(search_paths()),
    }
}

fn find_first(candidates: Vec<PathBuf>) -> Result<PathBuf, ConfigError> {
    match candidates.iter().find(|p| p.is_file()) {
        Some(path) => Ok(path.clone()),
        None => Err(ConfigError::NotFound {
            searched: candidates,
        }),
    }
}

/// `CIVO_CONTROLLER_<KEY>` variables, merged over the file by key.
pub fn env_source() -> Environment {
    Environment::with_prefix(ENV_PREFIX).ignore_empty(true)
}

/// Settings given on the command line. Set fields win over the environment
/// and the file.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Overrides {
    pub token: Option<String>,
    pub dangerous: Option<bool>,
    pub log_level: Option<String>,
}

/// Fully resolved startup settings.
#[derive(Clone)]
pub struct Settings {
    pub config_path: PathBuf,
    pub token: String,
    pub dangerous: bool,
    pub log_level: String,
    pub api_url: String,
    pub interval: Duration,
    pub workers: usize,
    pub max_retries: u32,
    pub retry_delay: Duration,
    pub recreate_missing: bool,
    pub metrics_listen: String,
    pub clusters: Vec<DesiredCluster>,
}

impl Settings {
    /// Apply overrides and defaults on top of a parsed file.
    pub fn resolve(
        config_path: PathBuf,
        file: FileConfig,
        overrides: Overrides,
    ) -> Result<Self, ConfigError> {
        let token = overrides
            .token
            .or(file.token)
            .filter(|t| !t.trim().is_empty())
            .ok_or_else(|| {
                ConfigError::Invalid(format!(
                    "no API token configured (set `token`, --token or {ENV_PREFIX}_TOKEN)"
                ))
            })?;

        Ok(Self {
            config_path,
            token,
            dangerous: overrides.dangerous.or(file.dangerous).unwrap_or(false),
            log_level: overrides
                .log_level
                .or(file.log_level)
                .unwrap_or_else(|| DEFAULT_LOG_LEVEL.to_string()),
            api_url: file.api_url.unwrap_or_else(|| DEFAULT_API_URL.to_string()),
            interval: Duration::from_secs(file.interval_secs.unwrap_or(DEFAULT_INTERVAL_SECS)),
            workers: file.workers.unwrap_or(DEFAULT_WORKERS),
            max_retries: file.max_retries.unwrap_or(DEFAULT_MAX_RETRIES),
            retry_delay: Duration::from_millis(
                file.retry_delay_ms.unwrap_or(DEFAULT_RETRY_DELAY_MS),
            ),
            recreate_missing: file.recreate_missing.unwrap_or(true),
            metrics_listen: file
                .metrics_listen
                .unwrap_or_else(|| DEFAULT_METRICS_LISTEN.to_string()),
            clusters: file.clusters,
        })
    }
}
