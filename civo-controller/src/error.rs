//! Error types shared across the controller.

use std::path::PathBuf;

use thiserror::Error;

/// Errors raised while locating, reading or validating the config file.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The file exists but could not be read.
    #[error("failed to read config {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The file or an environment override does not fit the config schema.
    #[error("failed to parse config {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: ::config::ConfigError,
    },

    /// The file parsed but violates a constraint (duplicate names, zero workers, ...).
    #[error("invalid config: {0}")]
    Invalid(String),

    /// No `--config` was given and none of the search locations had a file.
    #[error("no config file found (searched {})", display_paths(.searched))]
    NotFound { searched: Vec<PathBuf> },
}

fn display_paths(paths: &[PathBuf]) -> String {
    paths
        .iter()
        .map(|p| p.display().to_string())
        .collect::<Vec<_>>()
        .join(", ")
}

/// Errors returned by a [`crate::provider::ProviderGateway`].
///
/// Every variant is treated as transient by the worker pool.
#[derive(Debug, Error)]
pub enum ProviderError {
    /// Transport-level failure (connect, TLS, timeout).
    #[error("provider request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// The provider answered with a non-2xx status.
    #[error("provider returned {status}: {body}")]
    Status { status: u16, body: String },

    /// The response body could not be decoded.
    #[error("failed to decode provider response: {0}")]
    Decode(String),

    /// The provider is unavailable for this operation.
    #[error("provider unavailable: {0}")]
    Unavailable(String),
}

/// Errors surfaced by the controller core.
#[derive(Debug, Error)]
pub enum ControllerError {
    /// The controller was constructed with an unusable configuration.
    #[error("invalid controller config: {0}")]
    InvalidConfig(String),

    /// The initial enumeration of desired names failed.
    #[error("initial list failed: {0}")]
    List(#[source] ProviderError),

    /// A provider call made on behalf of a work item failed.
    #[error(transparent)]
    Provider(#[from] ProviderError),
}

/// Result alias for provider calls.
pub type ProviderResult<T> = std::result::Result<T, ProviderError>;
