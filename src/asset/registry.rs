//! Asset Type Registry
//!
//! Maps asset-type identifiers (`bigquery.googleapis.com/Dataset`, ...) to the
//! API that owns them and the pattern their asset names follow. Six built-in
//! types are always present at construction; JSON or YAML documents can add
//! or overwrite entries on top.

use crate::error::RegistryError;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use std::sync::OnceLock;

/// Built-in asset types: (asset_type, service, version, method, resource kind, pattern)
const BUILTIN_ASSET_TYPES: &[(&str, &str, &str, &str, &str, &str)] = &[
    (
        "cloudresourcemanager.googleapis.com/Project",
        "cloudresourcemanager",
        "v1",
        "setIamPolicy",
        "project",
        r"//cloudresourcemanager\.googleapis\.com/projects/([^/]+)",
    ),
    (
        "storage.googleapis.com/Bucket",
        "storage",
        "v1",
        "setIamPolicy",
        "bucket",
        r"//storage\.googleapis\.com/projects/_/buckets/([^/]+)",
    ),
    (
        "bigquery.googleapis.com/Dataset",
        "bigquery",
        "v2",
        "patch",
        "dataset",
        r"//bigquery\.googleapis\.com/projects/([^/]+)/datasets/([^/]+)",
    ),
    (
        "bigquery.googleapis.com/Table",
        "bigquery",
        "v2",
        "patch",
        "table",
        r"//bigquery\.googleapis\.com/projects/([^/]+)/datasets/([^/]+)/tables/([^/]+)",
    ),
    (
        "bigquery.googleapis.com/Model",
        "bigquery",
        "v2",
        "patch",
        "model",
        r"//bigquery\.googleapis\.com/projects/([^/]+)/datasets/([^/]+)/models/([^/]+)",
    ),
    (
        "bigquery.googleapis.com/Routine",
        "bigquery",
        "v2",
        "patch",
        "routine",
        r"//bigquery\.googleapis\.com/projects/([^/]+)/datasets/([^/]+)/routines/([^/]+)",
    ),
];

/// Everything the engine knows about one asset type
#[derive(Debug, Clone, Default)]
pub struct AssetTypeDescriptor {
    pub asset_type: String,
    pub service_name: String,
    pub version: String,
    /// Write method name, informational (`setIamPolicy`, `patch`, ...)
    pub method: String,
    /// Resource kind tag; selects the policy handler
    pub resource_type: String,
    pattern: String,
    /// Anchored regex, compiled on first use
    compiled: OnceLock<Regex>,
}

impl AssetTypeDescriptor {
    pub fn new(
        asset_type: impl Into<String>,
        service_name: impl Into<String>,
        version: impl Into<String>,
        method: impl Into<String>,
        resource_type: impl Into<String>,
        pattern: impl Into<String>,
    ) -> Self {
        Self {
            asset_type: asset_type.into(),
            service_name: service_name.into(),
            version: version.into(),
            method: method.into(),
            resource_type: resource_type.into(),
            pattern: pattern.into(),
            compiled: OnceLock::new(),
        }
    }

    /// The asset name pattern as registered
    pub fn pattern(&self) -> &str {
        &self.pattern
    }

    /// Replace the pattern; it is compiled again on next use
    pub fn set_pattern(&mut self, pattern: impl Into<String>) {
        self.pattern = pattern.into();
        self.compiled = OnceLock::new();
    }

    /// The compiled pattern, anchored at the start of the asset name
    pub fn regex(&self) -> Result<&Regex, regex::Error> {
        if let Some(regex) = self.compiled.get() {
            return Ok(regex);
        }
        let regex = Regex::new(&format!("^(?:{})", self.pattern))?;
        Ok(self.compiled.get_or_init(|| regex))
    }

    fn to_record(&self) -> AssetTypeRecord {
        AssetTypeRecord {
            asset_type: Some(self.asset_type.clone()),
            service_name: self.service_name.clone(),
            version: self.version.clone(),
            method: self.method.clone(),
            resource_type: self.resource_type.clone(),
            asset_name_pattern: self.pattern.clone(),
        }
    }
}

impl PartialEq for AssetTypeDescriptor {
    fn eq(&self, other: &Self) -> bool {
        self.asset_type == other.asset_type
            && self.service_name == other.service_name
            && self.version == other.version
            && self.method == other.method
            && self.resource_type == other.resource_type
            && self.pattern == other.pattern
    }
}

impl Eq for AssetTypeDescriptor {}

/// One entry of the `asset_types` list in a config document
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssetTypeRecord {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub asset_type: Option<String>,
    #[serde(default)]
    pub service_name: String,
    #[serde(default)]
    pub version: String,
    #[serde(default)]
    pub method: String,
    #[serde(default)]
    pub resource_type: String,
    #[serde(default)]
    pub asset_name_pattern: String,
}

/// Root structure of an asset type config document
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AssetTypeDocument {
    #[serde(default)]
    pub asset_types: Vec<AssetTypeRecord>,
}

/// Config document format, chosen by file extension
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigFormat {
    Json,
    Yaml,
}

impl ConfigFormat {
    pub fn from_path(path: &Path) -> Result<Self, RegistryError> {
        let extension = path
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.to_ascii_lowercase())
            .unwrap_or_default();

        match extension.as_str() {
            "json" => Ok(ConfigFormat::Json),
            "yaml" | "yml" => Ok(ConfigFormat::Yaml),
            _ => Err(RegistryError::UnsupportedConfigFormat(format!(
                ".{}",
                extension
            ))),
        }
    }
}

/// Registry of asset type descriptors
#[derive(Debug, Clone)]
pub struct AssetTypeRegistry {
    descriptors: HashMap<String, AssetTypeDescriptor>,
}

impl Default for AssetTypeRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl AssetTypeRegistry {
    /// Registry holding the six built-in asset types
    pub fn new() -> Self {
        let mut registry = Self::empty();
        for (asset_type, service, version, method, kind, pattern) in BUILTIN_ASSET_TYPES {
            registry.register(AssetTypeDescriptor::new(
                *asset_type,
                *service,
                *version,
                *method,
                *kind,
                *pattern,
            ));
        }
        registry
    }

    /// Registry with no asset types at all
    pub fn empty() -> Self {
        Self {
            descriptors: HashMap::new(),
        }
    }

    /// Insert or overwrite a descriptor by its identifier
    pub fn register(&mut self, descriptor: AssetTypeDescriptor) {
        tracing::debug!("Registered asset type: {}", descriptor.asset_type);
        self.descriptors
            .insert(descriptor.asset_type.clone(), descriptor);
    }

    /// Remove an asset type
    pub fn unregister(&mut self, asset_type: &str) -> Result<AssetTypeDescriptor, RegistryError> {
        let removed = self
            .descriptors
            .remove(asset_type)
            .ok_or_else(|| RegistryError::NotFound(asset_type.to_string()))?;
        tracing::info!("Removed asset type: {}", asset_type);
        Ok(removed)
    }

    /// Replace the name pattern of an existing asset type
    ///
    /// The pattern is not compiled here; a malformed pattern surfaces the
    /// first time a name is parsed against it.
    pub fn update_pattern(
        &mut self,
        asset_type: &str,
        pattern: impl Into<String>,
    ) -> Result<(), RegistryError> {
        let descriptor = self
            .descriptors
            .get_mut(asset_type)
            .ok_or_else(|| RegistryError::NotFound(asset_type.to_string()))?;
        descriptor.set_pattern(pattern);
        tracing::info!("Updated asset name pattern: {}", asset_type);
        Ok(())
    }

    pub fn get(&self, asset_type: &str) -> Option<&AssetTypeDescriptor> {
        self.descriptors.get(asset_type)
    }

    pub fn pattern_for(&self, asset_type: &str) -> Option<&str> {
        self.get(asset_type).map(|d| d.pattern())
    }

    pub fn contains(&self, asset_type: &str) -> bool {
        self.descriptors.contains_key(asset_type)
    }

    /// All registered identifiers, sorted
    pub fn list(&self) -> Vec<&str> {
        let mut keys: Vec<&str> = self.descriptors.keys().map(|s| s.as_str()).collect();
        keys.sort_unstable();
        keys
    }

    pub fn len(&self) -> usize {
        self.descriptors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.descriptors.is_empty()
    }

    /// Layer a JSON or YAML document on top of the current entries
    ///
    /// Returns the number of descriptors registered from the document.
    pub fn load_from_document(&mut self, path: &Path) -> Result<usize, RegistryError> {
        let format = ConfigFormat::from_path(path)?;
        let content = std::fs::read_to_string(path).map_err(|source| RegistryError::Io {
            path: path.to_path_buf(),
            source,
        })?;

        let loaded = self.load_from_str(&content, format)?;
        tracing::info!(
            "Loaded {} asset types from {}",
            loaded,
            path.display()
        );
        Ok(loaded)
    }

    /// Layer document content on top of the current entries
    pub fn load_from_str(
        &mut self,
        content: &str,
        format: ConfigFormat,
    ) -> Result<usize, RegistryError> {
        let document: AssetTypeDocument = match format {
            ConfigFormat::Json => serde_json::from_str(content)?,
            ConfigFormat::Yaml => serde_yaml::from_str(content)?,
        };

        let mut loaded = 0;
        for (index, record) in document.asset_types.into_iter().enumerate() {
            let Some(asset_type) = record.asset_type.filter(|s| !s.trim().is_empty()) else {
                tracing::warn!("Skipping asset type record {} without asset_type", index);
                continue;
            };

            self.register(AssetTypeDescriptor::new(
                asset_type,
                record.service_name,
                record.version,
                record.method,
                record.resource_type,
                record.asset_name_pattern,
            ));
            loaded += 1;
        }

        Ok(loaded)
    }

    /// Snapshot of the registry as a config document, sorted by identifier
    pub fn to_document(&self) -> AssetTypeDocument {
        AssetTypeDocument {
            asset_types: self
                .list()
                .into_iter()
                .filter_map(|key| self.get(key))
                .map(AssetTypeDescriptor::to_record)
                .collect(),
        }
    }

    /// Render the registry in the given format
    pub fn to_document_string(&self, format: ConfigFormat) -> Result<String, RegistryError> {
        let document = self.to_document();
        Ok(match format {
            ConfigFormat::Json => serde_json::to_string_pretty(&document)?,
            ConfigFormat::Yaml => serde_yaml::to_string(&document)?,
        })
    }

    /// Write the registry to `path`, replacing the whole file atomically
    pub fn export_to_document(&self, path: &Path) -> Result<(), RegistryError> {
        let format = ConfigFormat::from_path(path)?;
        let content = self.to_document_string(format)?;

        let io_err = |source| RegistryError::Io {
            path: path.to_path_buf(),
            source,
        };

        let file_name = path
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or("asset_types");
        let tmp_path = path.with_file_name(format!(".{}.{}.tmp", file_name, uuid::Uuid::new_v4()));

        let written = std::fs::write(&tmp_path, content).and_then(|()| std::fs::rename(&tmp_path, path));
        if let Err(source) = written {
            let _ = std::fs::remove_file(&tmp_path);
            return Err(io_err(source));
        }

        tracing::info!("Exported {} asset types to {}", self.len(), path.display());
        Ok(())
    }
}
