//! Binding Engine
//!
//! Runs one binding request through
//! `PARSE -> FETCH -> MERGE -> (no-op: DONE) | (changed: COMMIT -> DONE)`.
//! A dry run stops after FETCH. Every failure is returned to the caller as a
//! failed [`BindingResult`]; nothing is retried here.

use crate::asset::{AssetTypeRegistry, ResourceCoordinates};
use crate::config::EngineConfig;
use crate::error::BindingError;
use crate::gcp::api::{ApiConnector, ServiceApi};
use crate::policy::handler::{HandlerRegistry, PolicyHandler, PolicyTarget};
use crate::policy::{AccessPolicy, Grant};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;

/// One grant to apply, usually one CSV row
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BindingRequest {
    pub principal: String,
    pub role: String,
    pub asset_name: String,
    pub asset_type: String,
    pub project_id: Option<String>,
    pub dry_run: bool,
}

impl BindingRequest {
    pub fn new(
        principal: impl Into<String>,
        role: impl Into<String>,
        asset_name: impl Into<String>,
        asset_type: impl Into<String>,
    ) -> Self {
        Self {
            principal: principal.into(),
            role: role.into(),
            asset_name: asset_name.into(),
            asset_type: asset_type.into(),
            project_id: None,
            dry_run: false,
        }
    }

    pub fn with_project_id(mut self, project_id: Option<String>) -> Self {
        self.project_id = project_id;
        self
    }

    pub fn with_dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BindingStatus {
    /// Policy changed and committed
    Granted,
    /// Grant already present; nothing written
    AlreadyGranted,
    /// Dry run: policy fetched, nothing merged or written
    DryRun,
    Failed,
}

/// Outcome of one request
#[derive(Debug)]
pub struct BindingResult {
    pub status: BindingStatus,
    /// Raw write response; only set when a commit happened
    pub response: Option<Value>,
    pub error: Option<BindingError>,
}

impl BindingResult {
    pub fn success(&self) -> bool {
        self.status != BindingStatus::Failed
    }

    fn failed(error: BindingError) -> Self {
        Self {
            status: BindingStatus::Failed,
            response: None,
            error: Some(error),
        }
    }
}

/// Resolved (service, version, handler) for an asset type
struct Route {
    service: String,
    version: String,
    handler: Arc<dyn PolicyHandler>,
}

pub struct BindingEngine {
    registry: AssetTypeRegistry,
    handlers: HandlerRegistry,
    connector: Arc<dyn ApiConnector>,
    /// Append-only cache of client handles keyed by (service, version)
    clients: HashMap<(String, String), Arc<dyn ServiceApi>>,
    config: EngineConfig,
}

impl BindingEngine {
    pub fn new(
        registry: AssetTypeRegistry,
        connector: Arc<dyn ApiConnector>,
        config: EngineConfig,
    ) -> Self {
        Self {
            registry,
            handlers: HandlerRegistry::new(),
            connector,
            clients: HashMap::new(),
            config,
        }
    }

    pub fn registry(&self) -> &AssetTypeRegistry {
        &self.registry
    }

    pub fn registry_mut(&mut self) -> &mut AssetTypeRegistry {
        &mut self.registry
    }

    pub fn handlers(&self) -> &HandlerRegistry {
        &self.handlers
    }

    /// Install the policy handler for a resource kind (custom kinds or overrides)
    pub fn register_handler(&mut self, kind: impl Into<String>, handler: impl PolicyHandler + 'static) {
        self.handlers.register(kind, handler);
    }

    /// Number of cached client handles
    pub fn client_count(&self) -> usize {
        self.clients.len()
    }

    fn route(&self, asset_type: &str) -> Result<Route, BindingError> {
        let descriptor = self
            .registry
            .get(asset_type)
            .ok_or_else(|| BindingError::UnsupportedAssetType(asset_type.to_string()))?;

        let handler = self.handlers.get(&descriptor.resource_type).ok_or_else(|| {
            BindingError::UnimplementedAssetKind {
                kind: descriptor.resource_type.clone(),
                asset_type: asset_type.to_string(),
            }
        })?;

        Ok(Route {
            service: descriptor.service_name.clone(),
            version: descriptor.version.clone(),
            handler,
        })
    }

    async fn client(&mut self, service: &str, version: &str) -> Result<Arc<dyn ServiceApi>, BindingError> {
        let key = (service.to_string(), version.to_string());
        if let Some(client) = self.clients.get(&key) {
            return Ok(Arc::clone(client));
        }

        let client = self.connector.connect(service, version).await?;
        self.clients.insert(key, Arc::clone(&client));
        Ok(client)
    }

    /// Read the current policy of a parsed resource
    pub async fn fetch_policy(
        &mut self,
        coordinates: &ResourceCoordinates,
        asset_type: &str,
        project_id: Option<&str>,
    ) -> Result<AccessPolicy, BindingError> {
        let route = self.route(asset_type)?;
        let api = self.client(&route.service, &route.version).await?;
        let project = self.config.effective_project(project_id);
        let target = PolicyTarget {
            asset_type,
            coordinates,
            project_id: project.as_deref(),
        };
        route.handler.fetch(api.as_ref(), &target).await
    }

    /// Write a merged policy back to a parsed resource
    pub async fn commit_policy(
        &mut self,
        coordinates: &ResourceCoordinates,
        asset_type: &str,
        project_id: Option<&str>,
        policy: &AccessPolicy,
    ) -> Result<Value, BindingError> {
        let route = self.route(asset_type)?;
        let api = self.client(&route.service, &route.version).await?;
        let project = self.config.effective_project(project_id);
        let target = PolicyTarget {
            asset_type,
            coordinates,
            project_id: project.as_deref(),
        };
        route.handler.commit(api.as_ref(), &target, policy).await
    }

    /// Apply one request, returning its status and the raw commit response
    pub async fn try_add_binding(
        &mut self,
        request: &BindingRequest,
    ) -> Result<(BindingStatus, Option<Value>), BindingError> {
        let asset_type = request.asset_type.as_str();

        let grant = Grant::new(&request.principal, &request.role)?;
        let coordinates = self.registry.parse(&request.asset_name, asset_type)?;
        let route = self.route(asset_type)?;
        let api = self.client(&route.service, &route.version).await?;

        let project = self.config.effective_project(request.project_id.as_deref());
        let target = PolicyTarget {
            asset_type,
            coordinates: &coordinates,
            project_id: project.as_deref(),
        };

        let mut policy = route.handler.fetch(api.as_ref(), &target).await?;

        if request.dry_run {
            tracing::info!(
                "[dry run] would grant {} to {} on {} ({} policy, {} grants)",
                request.role,
                request.principal,
                request.asset_name,
                policy.shape(),
                policy.grant_count()
            );
            return Ok((BindingStatus::DryRun, None));
        }

        let outcome = route.handler.merge(&mut policy, &grant);

        if outcome.is_noop() {
            tracing::info!(
                "{} already has {} on {}",
                grant.principal,
                grant.role,
                request.asset_name
            );
            return Ok((BindingStatus::AlreadyGranted, None));
        }

        let response = route.handler.commit(api.as_ref(), &target, &policy).await?;

        tracing::info!(
            "Granted {} to {} on {} ({:?})",
            grant.role,
            grant.principal,
            request.asset_name,
            outcome
        );
        Ok((BindingStatus::Granted, Some(response)))
    }

    /// Apply one request; failures are captured in the result
    pub async fn add_binding(&mut self, request: &BindingRequest) -> BindingResult {
        match self.try_add_binding(request).await {
            Ok((status, response)) => BindingResult {
                status,
                response,
                error: None,
            },
            Err(error) => {
                tracing::error!(
                    "Failed to grant {} to {} on {}: {}",
                    request.role,
                    request.principal,
                    request.asset_name,
                    error
                );
                BindingResult::failed(error)
            },
        }
    }
}
