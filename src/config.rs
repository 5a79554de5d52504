//! Configuration Management
//!
//! Explicit configuration for the binding engine and its transport.

use std::path::PathBuf;
use url::Url;

/// Version injected at compile time via GCP_BINDINGS_VERSION env var (set by CI/CD),
/// or the crate version for local builds.
pub const VERSION: &str = match option_env!("GCP_BINDINGS_VERSION") {
    Some(v) => v,
    None => env!("CARGO_PKG_VERSION"),
};

/// Settings passed into the engine and connector constructors
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Replaces `https://*.googleapis.com` for every service (emulators, tests)
    pub endpoint: Option<Url>,
    pub user_agent: String,
    /// Project used when neither the asset name nor the request carries one
    pub default_project: Option<String>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            endpoint: None,
            user_agent: format!("gcp-bindings/{}", VERSION),
            default_project: None,
        }
    }
}

impl EngineConfig {
    pub fn with_endpoint(mut self, endpoint: Option<Url>) -> Self {
        self.endpoint = endpoint;
        self
    }

    pub fn with_default_project(mut self, project: Option<String>) -> Self {
        self.default_project = project;
        self
    }

    /// Get effective project (request > config)
    pub fn effective_project(&self, requested: Option<&str>) -> Option<String> {
        requested
            .map(str::trim)
            .filter(|p| !p.is_empty())
            .map(str::to_string)
            .or_else(|| self.default_project.clone())
    }
}

/// Default location of the log file
pub fn default_log_path() -> PathBuf {
    if let Some(config_dir) = dirs::config_dir() {
        return config_dir.join("gcp-bindings").join("gcp-bindings.log");
    }
    if let Some(home) = dirs::home_dir() {
        return home.join(".gcp-bindings").join("gcp-bindings.log");
    }
    PathBuf::from("gcp-bindings.log")
}
