//! Error types
//!
//! `BindingError` is scoped to a single binding request: the batch runner turns
//! it into a failed row and moves on. `RegistryError` covers the asset-type
//! registry and its config documents.

use crate::gcp::http::TransportError;
use std::path::PathBuf;

/// Failure of one binding request.
#[derive(Debug, thiserror::Error)]
pub enum BindingError {
    /// The asset type is not registered.
    #[error("unsupported asset type: {0}")]
    UnsupportedAssetType(String),

    /// The asset name does not match the registered pattern.
    #[error("invalid asset name for {asset_type}: {asset_name}")]
    InvalidAssetName {
        asset_name: String,
        asset_type: String,
    },

    /// The registered pattern is not a valid regular expression.
    #[error("invalid asset name pattern for {asset_type}: {source}")]
    InvalidPattern {
        asset_type: String,
        #[source]
        source: regex::Error,
    },

    /// A resource path needed a coordinate the asset name did not provide.
    #[error("missing coordinate `{coordinate}` for {asset_type}")]
    MissingCoordinate {
        coordinate: String,
        asset_type: String,
    },

    /// The principal column names nobody (e.g. an empty `user:`).
    #[error("invalid principal: `{0}`")]
    InvalidPrincipal(String),

    /// No policy handler is registered for the resource kind.
    #[error("no policy handler for resource kind `{kind}` (asset type {asset_type})")]
    UnimplementedAssetKind { kind: String, asset_type: String },

    /// The remote API call failed.
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// The remote API answered with something that is not a policy.
    #[error("malformed policy in response: {0}")]
    MalformedPolicy(String),
}

impl BindingError {
    /// Short, stable name of the error kind (used in batch reports)
    pub fn kind(&self) -> &'static str {
        match self {
            BindingError::UnsupportedAssetType(_) => "unsupported_asset_type",
            BindingError::InvalidAssetName { .. } => "invalid_asset_name",
            BindingError::InvalidPattern { .. } => "invalid_pattern",
            BindingError::MissingCoordinate { .. } => "missing_coordinate",
            BindingError::InvalidPrincipal(_) => "invalid_principal",
            BindingError::UnimplementedAssetKind { .. } => "unimplemented_asset_kind",
            BindingError::Transport(_) => "transport",
            BindingError::MalformedPolicy(_) => "malformed_policy",
        }
    }
}

/// Failure of a registry operation or config document I/O.
#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    #[error("asset type not found: {0}")]
    NotFound(String),

    #[error("unsupported config file format: {0}")]
    UnsupportedConfigFormat(String),

    #[error("config file I/O failed for {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid JSON config: {0}")]
    Json(#[from] serde_json::Error),

    #[error("invalid YAML config: {0}")]
    Yaml(#[from] serde_yaml::Error),
}
